use std::{
    fmt,
    future::Future,
    io,
    net::SocketAddr,
    pin::Pin,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use bytes::Bytes;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    select,
    sync::Mutex as AsyncMutex,
    time::timeout,
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    codec::{FrameDecoder, encode_message},
    message::Message,
    session::SessionState,
};

pub type ConnectionId = u64;

type BoxedWriter = Pin<Box<dyn AsyncWrite + Send>>;

/// Receives decoded frames and the final disconnect for a connection.
pub trait FrameHandler: Send + Sync {
    fn on_message(
        &self,
        conn: &Arc<Connection>,
        message: Message,
    ) -> impl Future<Output = ()> + Send;

    fn on_disconnect(
        &self,
        conn: &Arc<Connection>,
        reason: &DisconnectReason,
    ) -> impl Future<Output = ()> + Send;
}

/// Why a connection's read loop ended.
#[derive(Debug)]
pub enum DisconnectReason {
    PeerClosed,
    Closed,
    FrameTooLarge { len: usize },
    Io(io::Error),
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::PeerClosed => write!(f, "peer closed the connection"),
            DisconnectReason::Closed => write!(f, "closed by server"),
            DisconnectReason::FrameTooLarge { len } => {
                write!(f, "frame of {len} bytes exceeds the limit")
            }
            DisconnectReason::Io(err) => write!(f, "i/o error: {err}"),
        }
    }
}

/// One accepted client stream.
///
/// The read half is driven by [`Connection::run`]; the write half lives here
/// behind an async mutex so frames from concurrent senders never interleave.
pub struct Connection {
    id: ConnectionId,
    peer: SocketAddr,
    writer: AsyncMutex<BoxedWriter>,
    session: Mutex<SessionState>,
    shutdown: CancellationToken,
    write_timeout: Duration,
}

impl Connection {
    pub fn new<W>(
        id: ConnectionId,
        peer: SocketAddr,
        writer: W,
        shutdown: CancellationToken,
        write_timeout: Duration,
    ) -> Self
    where
        W: AsyncWrite + Send + 'static,
    {
        Self {
            id,
            peer,
            writer: AsyncMutex::new(Box::pin(writer)),
            session: Mutex::new(SessionState::default()),
            shutdown,
            write_timeout,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn session(&self) -> SessionState {
        self.with_session(|session| session.clone())
    }

    pub fn username(&self) -> Option<String> {
        self.with_session(|session| session.username().map(str::to_string))
    }

    /// Runs `f` with the session locked. Keep `f` short and synchronous.
    pub fn with_session<T>(&self, f: impl FnOnce(&mut SessionState) -> T) -> T {
        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut session)
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Stops the read loop; the transport is shut down once it exits.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    pub async fn send(&self, message: &Message) -> io::Result<()> {
        let frame = encode_message(message)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;
        self.send_frame(&frame).await
    }

    /// Writes one pre-encoded frame as a unit.
    ///
    /// A failed or stalled write marks the connection closed, which makes its
    /// own read loop run the disconnect path.
    pub async fn send_frame(&self, frame: &Bytes) -> io::Result<()> {
        if self.is_closed() {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "connection is closed",
            ));
        }

        let write = async {
            let mut writer = self.writer.lock().await;
            writer.write_all(frame).await?;
            writer.flush().await
        };

        let result = match timeout(self.write_timeout, write).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "write stalled")),
        };

        if let Err(err) = &result {
            debug!(conn = self.id, peer = %self.peer, error = %err, "write failed; closing connection");
            self.close();
        }
        result
    }

    /// Like [`Connection::send_frame`], but only reports whether the frame
    /// went out. Used for fan-out where one dead peer must not stop the rest.
    pub async fn deliver(&self, frame: &Bytes) -> bool {
        self.send_frame(frame).await.is_ok()
    }

    /// Read loop: accumulate bytes, drain complete frames into `handler`, and
    /// run the disconnect path exactly once when the stream ends.
    pub async fn run<R, H>(
        self: Arc<Self>,
        mut reader: R,
        handler: &H,
        max_frame_bytes: usize,
    ) -> DisconnectReason
    where
        R: AsyncRead + Unpin,
        H: FrameHandler,
    {
        let mut decoder = FrameDecoder::new();

        let reason = loop {
            while let Some(message) = decoder.next_message() {
                handler.on_message(&self, message).await;
            }

            if let Some(len) = decoder.pending_frame_len() {
                if len > max_frame_bytes {
                    break DisconnectReason::FrameTooLarge { len };
                }
            }

            select! {
                biased;
                _ = self.shutdown.cancelled() => break DisconnectReason::Closed,
                read = reader.read_buf(decoder.buffer_mut()) => match read {
                    Ok(0) => break DisconnectReason::PeerClosed,
                    Ok(_) => {}
                    Err(err) => break DisconnectReason::Io(err),
                },
            }
        };

        self.close();
        handler.on_disconnect(&self, &reason).await;
        self.shutdown_writer().await;
        reason
    }

    async fn shutdown_writer(&self) {
        let mut writer = self.writer.lock().await;
        if let Err(err) = timeout(self.write_timeout, writer.shutdown()).await {
            debug!(conn = self.id, error = %err, "writer shutdown timed out");
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("session", &self.session())
            .finish()
    }
}
