//! Per-connection session state.
//!
//! A connection moves `Unauthenticated -> Authenticated -> InRoom` and back to
//! `Authenticated` when it leaves a room. Handlers ask for the state they need
//! and treat `None` as a rejection.

use crate::room::RoomId;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MediaFlags {
    pub cam_on: bool,
    pub mic_on: bool,
}

/// Room membership as seen from the member's side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Membership {
    pub username: String,
    pub room: RoomId,
    pub is_host: bool,
    pub media: MediaFlags,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Unauthenticated,
    Authenticated {
        username: String,
    },
    InRoom(Membership),
}

impl SessionState {
    pub fn username(&self) -> Option<&str> {
        match self {
            SessionState::Unauthenticated => None,
            SessionState::Authenticated { username } => Some(username),
            SessionState::InRoom(membership) => Some(&membership.username),
        }
    }

    pub fn membership(&self) -> Option<&Membership> {
        match self {
            SessionState::InRoom(membership) => Some(membership),
            _ => None,
        }
    }

    /// Records a successful login. Refused while inside a room, since the
    /// room indexes members by their current name.
    pub fn log_in(&mut self, username: impl Into<String>) -> bool {
        if matches!(self, SessionState::InRoom(_)) {
            return false;
        }
        *self = SessionState::Authenticated {
            username: username.into(),
        };
        true
    }

    /// Authenticated -> InRoom with fresh media flags.
    pub fn enter_room(&mut self, room: RoomId, is_host: bool) -> Option<&Membership> {
        match std::mem::take(self) {
            SessionState::Authenticated { username } => {
                *self = SessionState::InRoom(Membership {
                    username,
                    room,
                    is_host,
                    media: MediaFlags::default(),
                });
                self.membership()
            }
            other => {
                *self = other;
                None
            }
        }
    }

    /// InRoom -> Authenticated, returning the membership that ended.
    pub fn leave_room(&mut self) -> Option<Membership> {
        match std::mem::take(self) {
            SessionState::InRoom(membership) => {
                *self = SessionState::Authenticated {
                    username: membership.username.clone(),
                };
                Some(membership)
            }
            other => {
                *self = other;
                None
            }
        }
    }

    pub fn set_cam(&mut self, on: bool) -> bool {
        self.update_media(|media| media.cam_on = on)
    }

    pub fn set_mic(&mut self, on: bool) -> bool {
        self.update_media(|media| media.mic_on = on)
    }

    pub fn promote_to_host(&mut self) -> bool {
        match self {
            SessionState::InRoom(membership) => {
                membership.is_host = true;
                true
            }
            _ => false,
        }
    }

    fn update_media(&mut self, apply: impl FnOnce(&mut MediaFlags)) -> bool {
        match self {
            SessionState::InRoom(membership) => {
                apply(&mut membership.media);
                true
            }
            _ => false,
        }
    }
}
