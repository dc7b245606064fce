use std::fmt;

use bytes::Bytes;

/// Separator between fields of composite text payloads.
pub const FIELD_SEPARATOR: char = '|';

/// Informational status codes carried by [`MessageKind::Info`].
pub mod info {
    pub const REGISTER_OK: &str = "REGISTER_OK";
    pub const REGISTER_FAIL: &str = "REGISTER_FAIL";
    pub const LOGIN_OK: &str = "LOGIN_OK";
    pub const LOGIN_FAIL: &str = "LOGIN_FAIL";
    pub const NEED_LOGIN: &str = "NEED_LOGIN";
    pub const ALREADY_IN_ROOM: &str = "ALREADY_IN_ROOM";
    pub const ROOM_CREATED: &str = "ROOM_CREATED";
    pub const ROOM_NOT_FOUND: &str = "ROOM_NOT_FOUND";
    pub const JOIN_OK: &str = "JOIN_OK";
    pub const NOT_HOST: &str = "NOT_HOST";
    pub const KICKED: &str = "KICKED";
    pub const REPLACED: &str = "REPLACED";
    pub const SERVER_SHUTDOWN: &str = "SERVER_SHUTDOWN";
}

/// Message kind tag, the first byte of every frame.
///
/// Bytes outside the known set are preserved as [`MessageKind::Unknown`] so
/// newer peers can round-trip kinds this build does not understand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Register,
    Login,
    CreateRoom,
    JoinRoom,
    Chat,
    Video,
    Audio,
    Kick,
    Leave,
    Info,
    Participants,
    ToggleCam,
    ToggleMic,
    Unknown(u8),
}

impl MessageKind {
    pub fn as_byte(self) -> u8 {
        match self {
            MessageKind::Register => 1,
            MessageKind::Login => 2,
            MessageKind::CreateRoom => 3,
            MessageKind::JoinRoom => 4,
            MessageKind::Chat => 5,
            MessageKind::Video => 6,
            MessageKind::Audio => 7,
            MessageKind::Kick => 8,
            MessageKind::Leave => 9,
            MessageKind::Info => 10,
            MessageKind::Participants => 11,
            MessageKind::ToggleCam => 12,
            MessageKind::ToggleMic => 13,
            MessageKind::Unknown(byte) => byte,
        }
    }
}

impl From<u8> for MessageKind {
    fn from(byte: u8) -> Self {
        match byte {
            1 => MessageKind::Register,
            2 => MessageKind::Login,
            3 => MessageKind::CreateRoom,
            4 => MessageKind::JoinRoom,
            5 => MessageKind::Chat,
            6 => MessageKind::Video,
            7 => MessageKind::Audio,
            8 => MessageKind::Kick,
            9 => MessageKind::Leave,
            10 => MessageKind::Info,
            11 => MessageKind::Participants,
            12 => MessageKind::ToggleCam,
            13 => MessageKind::ToggleMic,
            other => MessageKind::Unknown(other),
        }
    }
}

impl From<MessageKind> for u8 {
    fn from(kind: MessageKind) -> Self {
        kind.as_byte()
    }
}

/// One decoded frame: a kind tag plus its opaque payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub kind: MessageKind,
    pub payload: Bytes,
}

impl Message {
    pub fn new(kind: MessageKind, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    pub fn text(kind: MessageKind, text: impl Into<String>) -> Self {
        Self::new(kind, Bytes::from(text.into()))
    }

    pub fn empty(kind: MessageKind) -> Self {
        Self::new(kind, Bytes::new())
    }

    pub fn info(code: impl Into<String>) -> Self {
        Self::text(MessageKind::Info, code)
    }

    /// Lossy UTF-8 view of the payload.
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({} bytes)", self.kind, self.payload.len())
    }
}

/// Splits a `"username|password"` payload on the first separator.
///
/// Returns `None` when the separator is missing or the username is empty.
pub fn split_credentials(text: &str) -> Option<(&str, &str)> {
    let (username, password) = text.split_once(FIELD_SEPARATOR)?;
    if username.is_empty() {
        return None;
    }
    Some((username, password))
}

/// Only the exact text `ON` switches a device on.
pub fn parse_toggle(text: &str) -> bool {
    text == "ON"
}

/// Joins status fields with the protocol separator, e.g. `JOIN_OK|R123456|HOST=alice`.
pub fn join_fields<I, S>(fields: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut joined = String::new();
    for (index, field) in fields.into_iter().enumerate() {
        if index > 0 {
            joined.push(FIELD_SEPARATOR);
        }
        joined.push_str(field.as_ref());
    }
    joined
}
