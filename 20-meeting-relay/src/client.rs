use std::net::SocketAddr;

use anyhow::{Context, Result, anyhow, bail};
use tokio::{
    io::{self, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
};
use tracing::{info, warn};

use crate::{
    cli::ClientArgs,
    codec::{FrameDecoder, encode},
    message::{Message, MessageKind, info as codes, join_fields},
};

/// Framed connection to a relay.
pub struct RelayClient {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    decoder: FrameDecoder,
}

impl RelayClient {
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("failed to connect to {addr}"))?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader,
            writer,
            decoder: FrameDecoder::new(),
        })
    }

    pub async fn send(&mut self, kind: MessageKind, payload: &[u8]) -> Result<()> {
        let frame = encode(kind, payload)?;
        self.writer.write_all(&frame).await?;
        self.writer.flush().await?;
        Ok(())
    }

    pub async fn send_text(&mut self, kind: MessageKind, text: &str) -> Result<()> {
        self.send(kind, text.as_bytes()).await
    }

    pub async fn send_message(&mut self, message: &Message) -> Result<()> {
        self.send(message.kind, &message.payload).await
    }

    /// Next message from the relay, or `None` once the relay closes the
    /// stream. Cancel safe: partial frames stay buffered.
    pub async fn recv(&mut self) -> Result<Option<Message>> {
        loop {
            if let Some(message) = self.decoder.next_message() {
                return Ok(Some(message));
            }
            let read = self.reader.read_buf(self.decoder.buffer_mut()).await?;
            if read == 0 {
                if self.decoder.buffered_len() > 0 {
                    bail!("relay closed the connection mid-frame");
                }
                return Ok(None);
            }
        }
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

/// A line typed into the terminal client.
#[derive(Debug, PartialEq, Eq)]
pub enum ClientCommand {
    Register { username: String, password: String },
    Login { username: String, password: String },
    Create,
    Join { room: String },
    Kick { username: String },
    Leave,
    Camera(bool),
    Microphone(bool),
    Chat(String),
    Quit,
}

impl ClientCommand {
    /// Parses `/command args`; anything not starting with `/` is chat.
    pub fn parse(line: &str) -> Result<Self> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            bail!("empty input");
        }
        if !trimmed.starts_with('/') {
            return Ok(ClientCommand::Chat(trimmed.to_string()));
        }

        let parts: Vec<&str> = trimmed.split_whitespace().collect();
        let command = parts[0].to_ascii_lowercase();
        match (command.as_str(), &parts[1..]) {
            ("/register", [username, password]) => Ok(ClientCommand::Register {
                username: username.to_string(),
                password: password.to_string(),
            }),
            ("/login", [username, password]) => Ok(ClientCommand::Login {
                username: username.to_string(),
                password: password.to_string(),
            }),
            ("/create", []) => Ok(ClientCommand::Create),
            ("/join", [room]) => Ok(ClientCommand::Join {
                room: room.to_string(),
            }),
            ("/kick", [username]) => Ok(ClientCommand::Kick {
                username: username.to_string(),
            }),
            ("/leave", []) => Ok(ClientCommand::Leave),
            ("/cam", [state]) => parse_switch(state).map(ClientCommand::Camera),
            ("/mic", [state]) => parse_switch(state).map(ClientCommand::Microphone),
            ("/quit", []) => Ok(ClientCommand::Quit),
            _ => Err(anyhow!(
                "unknown command. Try: /register u p, /login u p, /create, /join <id>, \
                 /kick <user>, /leave, /cam on|off, /mic on|off, /quit"
            )),
        }
    }

    /// Wire message for this command; `None` for purely local commands.
    pub fn to_message(&self) -> Option<Message> {
        let message = match self {
            ClientCommand::Register { username, password } => Message::text(
                MessageKind::Register,
                join_fields([username.as_str(), password.as_str()]),
            ),
            ClientCommand::Login { username, password } => Message::text(
                MessageKind::Login,
                join_fields([username.as_str(), password.as_str()]),
            ),
            ClientCommand::Create => Message::empty(MessageKind::CreateRoom),
            ClientCommand::Join { room } => Message::text(MessageKind::JoinRoom, room.clone()),
            ClientCommand::Kick { username } => Message::text(MessageKind::Kick, username.clone()),
            ClientCommand::Leave => Message::empty(MessageKind::Leave),
            ClientCommand::Camera(on) => Message::text(MessageKind::ToggleCam, switch_text(*on)),
            ClientCommand::Microphone(on) => {
                Message::text(MessageKind::ToggleMic, switch_text(*on))
            }
            ClientCommand::Chat(text) => Message::text(MessageKind::Chat, text.clone()),
            ClientCommand::Quit => return None,
        };
        Some(message)
    }
}

fn parse_switch(state: &str) -> Result<bool> {
    match state.to_ascii_lowercase().as_str() {
        "on" => Ok(true),
        "off" => Ok(false),
        other => Err(anyhow!("expected on or off, got '{other}'")),
    }
}

fn switch_text(on: bool) -> &'static str {
    if on { "ON" } else { "OFF" }
}

pub async fn run(args: ClientArgs) -> Result<()> {
    let mut client = RelayClient::connect(args.server).await?;
    info!("connected to {}", args.server);

    let mut stdin = BufReader::new(io::stdin()).lines();
    let mut session = TerminalSession::default();

    loop {
        select! {
            message = client.recv() => {
                match message? {
                    Some(message) => session.render(&message).await?,
                    None => {
                        write_stdout("*** relay closed the connection").await?;
                        break;
                    }
                }
            }
            line = stdin.next_line() => {
                let Some(line) = line? else { break };
                if !session.handle_input(&line, &mut client).await? {
                    break;
                }
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                if let Err(error) = ctrl_c {
                    warn!(?error, "ctrl-c handler failed");
                }
                break;
            }
        }
    }

    if let Err(error) = client.shutdown().await {
        warn!(?error, "failed to shutdown client writer cleanly");
    }
    Ok(())
}

#[derive(Default)]
struct TerminalSession {
    username: Option<String>,
    pending_login: Option<String>,
}

impl TerminalSession {
    async fn handle_input(&mut self, line: &str, client: &mut RelayClient) -> Result<bool> {
        if line.trim().is_empty() {
            return Ok(true);
        }
        let command = match ClientCommand::parse(line) {
            Ok(command) => command,
            Err(err) => {
                write_stderr(&format!("!!! {err}")).await?;
                return Ok(true);
            }
        };

        match &command {
            ClientCommand::Quit => {
                write_stdout("*** leaving").await?;
                return Ok(false);
            }
            ClientCommand::Login { username, .. } => {
                self.pending_login = Some(username.clone());
            }
            ClientCommand::Chat(text) => {
                // The relay does not echo chat back to its sender.
                let me = self.username.as_deref().unwrap_or("me");
                write_stdout(&format!("{me}: {text}")).await?;
            }
            _ => {}
        }

        if let Some(message) = command.to_message() {
            client.send_message(&message).await?;
        }
        Ok(true)
    }

    async fn render(&mut self, message: &Message) -> io::Result<()> {
        match message.kind {
            MessageKind::Info => {
                let text = message.payload_text();
                if text == codes::LOGIN_OK {
                    self.username = self.pending_login.take();
                }
                write_stdout(&format!("*** {text}")).await
            }
            MessageKind::Participants => {
                write_stdout(&format!(
                    "*** participants: {}",
                    describe_participants(&message.payload_text())
                ))
                .await
            }
            MessageKind::Chat => write_stdout(&message.payload_text()).await,
            MessageKind::Video | MessageKind::Audio => Ok(()),
            MessageKind::ToggleCam => {
                write_stdout(&format!("*** a camera turned {}", message.payload_text())).await
            }
            MessageKind::ToggleMic => {
                write_stdout(&format!("*** a microphone turned {}", message.payload_text())).await
            }
            other => write_stderr(&format!("!!! unexpected {other:?} message")).await,
        }
    }
}

/// Turns `alice:1:0:1;bob:0:1:0` into `alice (host, mic), bob (cam)`.
pub fn describe_participants(payload: &str) -> String {
    payload
        .split(';')
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let fields: Vec<&str> = entry.split(':').collect();
            let flag = |index: usize| fields.get(index) == Some(&"1");
            let tags: Vec<&str> = [(1, "host"), (2, "cam"), (3, "mic")]
                .into_iter()
                .filter(|(index, _)| flag(*index))
                .map(|(_, tag)| tag)
                .collect();
            if tags.is_empty() {
                fields[0].to_string()
            } else {
                format!("{} ({})", fields[0], tags.join(", "))
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}

async fn write_stderr(line: &str) -> io::Result<()> {
    let mut stderr = io::stderr();
    stderr.write_all(line.as_bytes()).await?;
    stderr.write_all(b"\n").await?;
    stderr.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_parse_case_insensitively() {
        assert_eq!(
            ClientCommand::parse("/LOGIN alice pw1").expect("parse"),
            ClientCommand::Login {
                username: "alice".into(),
                password: "pw1".into()
            }
        );
        assert_eq!(
            ClientCommand::parse("/Cam ON").expect("parse"),
            ClientCommand::Camera(true)
        );
        assert_eq!(
            ClientCommand::parse("/join R123456").expect("parse"),
            ClientCommand::Join {
                room: "R123456".into()
            }
        );
    }

    #[test]
    fn plain_text_is_chat() {
        assert_eq!(
            ClientCommand::parse("  hello there ").expect("parse"),
            ClientCommand::Chat("hello there".into())
        );
    }

    #[test]
    fn bad_arguments_are_rejected() {
        assert!(ClientCommand::parse("").is_err());
        assert!(ClientCommand::parse("/login alice").is_err());
        assert!(ClientCommand::parse("/mic maybe").is_err());
        assert!(ClientCommand::parse("/dance").is_err());
    }

    #[test]
    fn commands_map_to_wire_messages() {
        let login = ClientCommand::Login {
            username: "bob".into(),
            password: "pw2".into(),
        };
        assert_eq!(
            login.to_message(),
            Some(Message::text(MessageKind::Login, "bob|pw2"))
        );
        assert_eq!(
            ClientCommand::Microphone(false).to_message(),
            Some(Message::text(MessageKind::ToggleMic, "OFF"))
        );
        assert_eq!(ClientCommand::Quit.to_message(), None);
    }

    #[test]
    fn participants_render_with_flags() {
        assert_eq!(
            describe_participants("alice:1:0:1;bob:0:1:0;carol:0:0:0"),
            "alice (host, mic), bob (cam), carol"
        );
        assert_eq!(describe_participants(""), "");
    }
}
