use std::{
    future::Future,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use anyhow::{Context, Result};
use bytes::{BufMut, Bytes, BytesMut};
use dashmap::DashMap;
use futures::future::join_all;
use tokio::{
    net::{TcpListener, TcpStream},
    select,
    time::{MissedTickBehavior, interval, timeout},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, info, warn};

use crate::{
    auth::Authenticator,
    codec::encode_message,
    config::RelayConfig,
    connection::{Connection, ConnectionId, DisconnectReason, FrameHandler},
    message::{Message, MessageKind, info, join_fields, parse_toggle, split_credentials},
    room::{JoinOutcome, Room, RoomRegistry},
    stats::{RelayStats, StatsSnapshot},
};

/// Accept loop for the relay. Owns the listener and hands every accepted
/// stream to a [`Connection`] driven by the shared [`Relay`].
pub struct RelayServer {
    listener: TcpListener,
    relay: Arc<Relay>,
    config: RelayConfig,
}

impl RelayServer {
    pub fn new(listener: TcpListener, config: RelayConfig, auth: Arc<dyn Authenticator>) -> Self {
        let relay = Arc::new(Relay::new(auth, config.max_video_bytes));
        Self {
            listener,
            relay,
            config,
        }
    }

    pub async fn bind(config: RelayConfig, auth: Arc<dyn Authenticator>) -> Result<Self> {
        config.validate()?;
        let listener = TcpListener::bind(config.listen)
            .await
            .with_context(|| format!("failed to bind {}", config.listen))?;
        Ok(Self::new(listener, config, auth))
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn relay(&self) -> Arc<Relay> {
        Arc::clone(&self.relay)
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let RelayServer {
            listener,
            relay,
            config,
        } = self;
        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();
        tokio::pin!(shutdown);

        if let Some(period) = config.stats_interval {
            spawn_stats_reporter(&relay, &tracker, cancel.clone(), period);
        }

        let next_id = AtomicU64::new(1);
        loop {
            select! {
                _ = &mut shutdown => break,
                accept_result = listener.accept() => match accept_result {
                    Ok((stream, peer)) => {
                        let id = next_id.fetch_add(1, Ordering::Relaxed);
                        spawn_connection(stream, peer, id, &relay, &config, &tracker, &cancel);
                    }
                    Err(err) => warn!(error = ?err, "failed to accept connection"),
                },
            }
        }

        handle_shutdown(&relay).await;
        drop(listener);
        cancel.cancel();
        tracker.close();
        if timeout(config.shutdown_grace, tracker.wait()).await.is_err() {
            warn!(
                grace = ?config.shutdown_grace,
                "connection tasks did not finish before the shutdown deadline"
            );
        }
        info!("relay stopped");

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

async fn handle_shutdown(relay: &Relay) {
    info!(
        connections = relay.connections.len(),
        rooms = relay.rooms.len(),
        "relay shutting down"
    );
    let everyone: Vec<Arc<Connection>> = relay
        .connections
        .iter()
        .map(|entry| Arc::clone(entry.value()))
        .collect();
    relay
        .fan_out(&everyone, &Message::info(info::SERVER_SHUTDOWN))
        .await;
}

fn spawn_connection(
    stream: TcpStream,
    peer: SocketAddr,
    id: ConnectionId,
    relay: &Arc<Relay>,
    config: &RelayConfig,
    tracker: &TaskTracker,
    cancel: &CancellationToken,
) {
    if let Err(err) = stream.set_nodelay(true) {
        debug!(conn = id, error = %err, "failed to disable nagle");
    }
    let (reader, writer) = stream.into_split();
    let conn = Arc::new(Connection::new(
        id,
        peer,
        writer,
        cancel.child_token(),
        config.write_timeout,
    ));
    relay.register_connection(&conn);
    info!(conn = id, peer = %peer, "client connected");

    let relay = Arc::clone(relay);
    let max_frame_bytes = config.max_frame_bytes;
    tracker.spawn(async move {
        let reason = conn.run(reader, relay.as_ref(), max_frame_bytes).await;
        match reason {
            DisconnectReason::Io(err) => {
                info!(conn = id, peer = %peer, error = %err, "client disconnected with error")
            }
            reason => info!(conn = id, peer = %peer, %reason, "client disconnected"),
        }
    });
}

fn spawn_stats_reporter(
    relay: &Arc<Relay>,
    tracker: &TaskTracker,
    cancel: CancellationToken,
    period: std::time::Duration,
) {
    let relay = Arc::clone(relay);
    tracker.spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let stats = relay.stats();
                    info!(
                        open = stats.connections_open,
                        accepted = stats.connections_accepted,
                        rooms = relay.rooms().len(),
                        received = stats.frames_received,
                        relayed = stats.frames_relayed,
                        video_dropped = stats.video_dropped,
                        "relay stats"
                    );
                }
            }
        }
    });
}

/// Message dispatch and room fan-out shared by every connection.
pub struct Relay {
    rooms: RoomRegistry,
    auth: Arc<dyn Authenticator>,
    connections: DashMap<ConnectionId, Arc<Connection>>,
    stats: RelayStats,
    max_video_bytes: usize,
}

impl Relay {
    pub fn new(auth: Arc<dyn Authenticator>, max_video_bytes: usize) -> Self {
        Self {
            rooms: RoomRegistry::new(),
            auth,
            connections: DashMap::new(),
            stats: RelayStats::default(),
            max_video_bytes,
        }
    }

    pub fn rooms(&self) -> &RoomRegistry {
        &self.rooms
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    fn register_connection(&self, conn: &Arc<Connection>) {
        self.connections.insert(conn.id(), Arc::clone(conn));
        self.stats.connection_opened();
    }

    async fn dispatch(&self, conn: &Arc<Connection>, message: Message) {
        self.stats.frame_received();
        let Message { kind, payload } = message;
        match kind {
            MessageKind::Register => self.handle_register(conn, &payload).await,
            MessageKind::Login => self.handle_login(conn, &payload).await,
            MessageKind::CreateRoom => self.handle_create_room(conn).await,
            MessageKind::JoinRoom => self.handle_join_room(conn, &payload).await,
            MessageKind::Chat => self.handle_chat(conn, &payload).await,
            MessageKind::Video => {
                if payload.len() > self.max_video_bytes {
                    self.stats.video_dropped();
                    debug!(conn = conn.id(), bytes = payload.len(), "dropping oversize video frame");
                    return;
                }
                self.relay_to_room(conn, Message::new(kind, payload)).await;
            }
            MessageKind::Audio => self.relay_to_room(conn, Message::new(kind, payload)).await,
            MessageKind::ToggleCam | MessageKind::ToggleMic => {
                self.handle_toggle(conn, kind, payload).await
            }
            MessageKind::Kick => self.handle_kick(conn, &payload).await,
            MessageKind::Leave => self.leave_room(conn).await,
            MessageKind::Info | MessageKind::Participants | MessageKind::Unknown(_) => {
                debug!(conn = conn.id(), ?kind, "ignoring message kind from client");
            }
        }
    }

    async fn handle_register(&self, conn: &Connection, payload: &[u8]) {
        let text = String::from_utf8_lossy(payload);
        let ok = match split_credentials(&text) {
            Some((username, password)) => {
                let (username, password) = (username.to_string(), password.to_string());
                self.call_auth(move |auth| auth.register(&username, &password))
                    .await
            }
            None => false,
        };
        info!(conn = conn.id(), ok, "register");
        let code = if ok { info::REGISTER_OK } else { info::REGISTER_FAIL };
        self.reply(conn, Message::info(code)).await;
    }

    async fn handle_login(&self, conn: &Connection, payload: &[u8]) {
        if conn.session().membership().is_some() {
            self.reply(conn, Message::info(info::ALREADY_IN_ROOM)).await;
            return;
        }

        let text = String::from_utf8_lossy(payload);
        let Some((username, password)) = split_credentials(&text) else {
            self.reply(conn, Message::info(info::LOGIN_FAIL)).await;
            return;
        };

        let (user, pass) = (username.to_string(), password.to_string());
        let ok = self.call_auth(move |auth| auth.authenticate(&user, &pass)).await;
        let ok = ok && conn.with_session(|session| session.log_in(username));
        info!(conn = conn.id(), user = %username, ok, "login");

        let code = if ok { info::LOGIN_OK } else { info::LOGIN_FAIL };
        self.reply(conn, Message::info(code)).await;
    }

    /// Runs a credential check off the async workers; the store may block.
    async fn call_auth<F>(&self, check: F) -> bool
    where
        F: FnOnce(&dyn Authenticator) -> bool + Send + 'static,
    {
        let auth = Arc::clone(&self.auth);
        match tokio::task::spawn_blocking(move || check(auth.as_ref())).await {
            Ok(ok) => ok,
            Err(err) => {
                warn!(error = ?err, "credential check failed");
                false
            }
        }
    }

    async fn handle_create_room(&self, conn: &Arc<Connection>) {
        if conn.username().is_none() {
            self.reply(conn, Message::info(info::NEED_LOGIN)).await;
            return;
        }
        self.leave_room(conn).await;

        let Some(room) = self.rooms.create_room(conn) else {
            self.reply(conn, Message::info(info::NEED_LOGIN)).await;
            return;
        };
        info!(conn = conn.id(), room = %room.id(), "room created");

        self.reply(
            conn,
            Message::info(join_fields([info::ROOM_CREATED, room.id().as_str()])),
        )
        .await;
        self.broadcast_participants(&room).await;
    }

    async fn handle_join_room(&self, conn: &Arc<Connection>, payload: &[u8]) {
        let text = String::from_utf8_lossy(payload);
        let room_id = text.trim();
        let session = conn.session();
        if session.username().is_none() {
            self.reply(conn, Message::info(info::NEED_LOGIN)).await;
            return;
        }

        let Some(room) = self.rooms.get(room_id) else {
            self.reply(conn, Message::info(info::ROOM_NOT_FOUND)).await;
            return;
        };

        let already_here = session
            .membership()
            .is_some_and(|membership| membership.room.as_str() == room_id);
        if already_here {
            self.reply_join_ok(conn, &room).await;
            return;
        }
        self.leave_room(conn).await;

        let (room, replaced) = match self.rooms.join(room_id, conn) {
            JoinOutcome::Joined { room, replaced } => (room, replaced),
            JoinOutcome::RoomNotFound => {
                self.reply(conn, Message::info(info::ROOM_NOT_FOUND)).await;
                return;
            }
            JoinOutcome::NotAuthenticated => {
                self.reply(conn, Message::info(info::NEED_LOGIN)).await;
                return;
            }
        };
        info!(conn = conn.id(), room = %room.id(), "joined room");

        if let Some(stale) = replaced {
            self.evict_replaced(&room, &stale, conn).await;
        }
        self.reply_join_ok(conn, &room).await;
        self.broadcast_participants(&room).await;
    }

    async fn reply_join_ok(&self, conn: &Connection, room: &Room) {
        let host = format!("HOST={}", room.host_username().unwrap_or_default());
        self.reply(
            conn,
            Message::info(join_fields([info::JOIN_OK, room.id().as_str(), host.as_str()])),
        )
        .await;
    }

    /// A second connection took over this username in the room; the first
    /// one is told and closed so it does not linger unreachable. A replaced
    /// host keeps the role on its new connection.
    async fn evict_replaced(
        &self,
        room: &Room,
        stale: &Arc<Connection>,
        successor: &Arc<Connection>,
    ) {
        info!(conn = stale.id(), room = %room.id(), "connection replaced by a newer login");
        if room.is_host(stale) {
            room.set_host(successor);
        }
        stale.with_session(|session| session.leave_room());
        self.reply(stale, Message::info(info::REPLACED)).await;
        stale.close();
    }

    async fn handle_chat(&self, conn: &Connection, payload: &[u8]) {
        let Some(username) = conn.session().membership().map(|m| m.username.clone()) else {
            return;
        };

        let mut text = BytesMut::with_capacity(username.len() + 2 + payload.len());
        text.put_slice(username.as_bytes());
        text.put_slice(b": ");
        text.put_slice(payload);
        self.relay_to_room(conn, Message::new(MessageKind::Chat, text.freeze()))
            .await;
    }

    async fn handle_toggle(&self, conn: &Connection, kind: MessageKind, payload: Bytes) {
        let Some(room) = self.current_room(conn) else {
            return;
        };

        let on = parse_toggle(&String::from_utf8_lossy(&payload));
        let updated = conn.with_session(|session| match kind {
            MessageKind::ToggleCam => session.set_cam(on),
            _ => session.set_mic(on),
        });
        if !updated {
            return;
        }

        self.broadcast_participants(&room).await;
        self.broadcast_others(&room, conn, &Message::new(kind, payload))
            .await;
    }

    async fn handle_kick(&self, conn: &Connection, payload: &[u8]) {
        let Some(room) = self.current_room(conn) else {
            return;
        };
        if !room.is_host(conn) {
            self.reply(conn, Message::info(info::NOT_HOST)).await;
            return;
        }

        let target_name = String::from_utf8_lossy(payload);
        let Some(target) = room.get(&target_name) else {
            return;
        };
        if room.is_host(&target) {
            return;
        }

        info!(host = conn.id(), target = target.id(), room = %room.id(), "kicking member");
        self.reply(&target, Message::info(info::KICKED)).await;
        self.rooms.leave(&target);
        target.close();
        self.broadcast_participants(&room).await;
    }

    /// Leave / disconnect path. Idempotent per connection.
    async fn leave_room(&self, conn: &Connection) {
        let Some(departure) = self.rooms.leave(conn) else {
            return;
        };
        let room = departure.room;
        info!(conn = conn.id(), user = %departure.username, room = %room.id(), "left room");

        if departure.room_removed {
            info!(room = %room.id(), "room closed");
            return;
        }
        if let Some(host) = room.hand_over_host() {
            info!(room = %room.id(), new_host = host.id(), "host handed over");
        }
        self.broadcast_participants(&room).await;
    }

    fn current_room(&self, conn: &Connection) -> Option<Arc<Room>> {
        let room_id = conn.session().membership()?.room.clone();
        self.rooms.get(room_id.as_str())
    }

    async fn relay_to_room(&self, conn: &Connection, message: Message) {
        if let Some(room) = self.current_room(conn) {
            self.broadcast_others(&room, conn, &message).await;
        }
    }

    async fn broadcast_others(&self, room: &Room, sender: &Connection, message: &Message) {
        let targets: Vec<Arc<Connection>> = room
            .members()
            .into_iter()
            .filter(|member| member.id() != sender.id())
            .collect();
        self.fan_out(&targets, message).await;
    }

    async fn broadcast_participants(&self, room: &Room) {
        let message = Message::text(MessageKind::Participants, room.participants_payload());
        self.fan_out(&room.members(), &message).await;
    }

    /// Writes one frame to every target concurrently; each write is bounded
    /// by the connection's own timeout, so a stalled peer only costs itself.
    async fn fan_out(&self, targets: &[Arc<Connection>], message: &Message) -> usize {
        if targets.is_empty() {
            return 0;
        }
        let frame = match encode_message(message) {
            Ok(frame) => frame,
            Err(err) => {
                debug!(error = %err, "cannot encode broadcast");
                return 0;
            }
        };

        let delivered = join_all(targets.iter().map(|target| target.deliver(&frame)))
            .await
            .into_iter()
            .filter(|ok| *ok)
            .count();
        self.stats.frames_relayed(delivered);
        delivered
    }

    async fn reply(&self, conn: &Connection, message: Message) {
        if let Err(err) = conn.send(&message).await {
            debug!(conn = conn.id(), error = %err, "failed to reply");
        }
    }
}

impl FrameHandler for Relay {
    async fn on_message(&self, conn: &Arc<Connection>, message: Message) {
        self.dispatch(conn, message).await;
    }

    async fn on_disconnect(&self, conn: &Arc<Connection>, _reason: &DisconnectReason) {
        self.leave_room(conn).await;
        if self.connections.remove(&conn.id()).is_some() {
            self.stats.connection_closed();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, DuplexStream, ReadHalf, duplex};

    use super::*;
    use crate::{auth::MemoryAuthenticator, codec::FrameDecoder};

    struct Peer {
        conn: Arc<Connection>,
        inbox: ReadHalf<DuplexStream>,
        decoder: FrameDecoder,
    }

    impl Peer {
        fn new(id: ConnectionId) -> Self {
            let (server_side, client_side) = duplex(1 << 20);
            let (_server_read, server_write) = tokio::io::split(server_side);
            let (inbox, _client_write) = tokio::io::split(client_side);
            let conn = Arc::new(Connection::new(
                id,
                SocketAddr::from(([127, 0, 0, 1], 40000)),
                server_write,
                CancellationToken::new(),
                Duration::from_secs(1),
            ));
            Self {
                conn,
                inbox,
                decoder: FrameDecoder::new(),
            }
        }

        async fn next(&mut self) -> Message {
            loop {
                if let Some(message) = self.decoder.next_message() {
                    return message;
                }
                timeout(
                    Duration::from_secs(1),
                    self.inbox.read_buf(self.decoder.buffer_mut()),
                )
                .await
                .expect("message in time")
                .expect("read");
            }
        }

        async fn nothing_pending(&mut self) -> bool {
            if self.decoder.buffered_len() > 0 {
                return false;
            }
            timeout(
                Duration::from_millis(50),
                self.inbox.read_buf(self.decoder.buffer_mut()),
            )
            .await
            .is_err()
        }
    }

    fn relay() -> Relay {
        let auth = MemoryAuthenticator::new();
        auth.register("alice", "pw1");
        auth.register("bob", "pw2");
        Relay::new(Arc::new(auth), 16)
    }

    async fn login(relay: &Relay, peer: &mut Peer, user: &str, pass: &str) {
        relay
            .dispatch(&peer.conn, Message::text(MessageKind::Login, format!("{user}|{pass}")))
            .await;
        assert_eq!(peer.next().await, Message::info(info::LOGIN_OK));
    }

    #[tokio::test]
    async fn room_commands_require_login() {
        let relay = relay();
        let mut peer = Peer::new(1);

        relay
            .dispatch(&peer.conn, Message::empty(MessageKind::CreateRoom))
            .await;
        assert_eq!(peer.next().await, Message::info(info::NEED_LOGIN));

        relay
            .dispatch(&peer.conn, Message::text(MessageKind::JoinRoom, "R123456"))
            .await;
        assert_eq!(peer.next().await, Message::info(info::NEED_LOGIN));

        relay
            .dispatch(&peer.conn, Message::text(MessageKind::Chat, "hello?"))
            .await;
        assert!(peer.nothing_pending().await);
    }

    #[tokio::test]
    async fn malformed_credentials_fail_without_closing() {
        let relay = relay();
        let mut peer = Peer::new(1);

        relay
            .dispatch(&peer.conn, Message::text(MessageKind::Login, "alice"))
            .await;
        assert_eq!(peer.next().await, Message::info(info::LOGIN_FAIL));
        relay
            .dispatch(&peer.conn, Message::text(MessageKind::Register, "nopipe"))
            .await;
        assert_eq!(peer.next().await, Message::info(info::REGISTER_FAIL));
        assert!(!peer.conn.is_closed());
    }

    #[tokio::test]
    async fn oversize_video_is_dropped_silently() {
        let relay = relay();
        let mut alice = Peer::new(1);
        let mut bob = Peer::new(2);
        login(&relay, &mut alice, "alice", "pw1").await;
        login(&relay, &mut bob, "bob", "pw2").await;

        relay
            .dispatch(&alice.conn, Message::empty(MessageKind::CreateRoom))
            .await;
        let created = alice.next().await.payload_text();
        let room_id = created.split('|').nth(1).expect("room id").to_string();
        alice.next().await;

        relay
            .dispatch(&bob.conn, Message::text(MessageKind::JoinRoom, room_id))
            .await;
        bob.next().await;
        bob.next().await;
        alice.next().await;

        relay
            .dispatch(&alice.conn, Message::new(MessageKind::Video, vec![0u8; 17]))
            .await;
        assert!(bob.nothing_pending().await);
        assert!(alice.nothing_pending().await);
        assert_eq!(relay.stats().video_dropped, 1);

        relay
            .dispatch(&alice.conn, Message::new(MessageKind::Video, vec![7u8; 16]))
            .await;
        assert_eq!(
            bob.next().await,
            Message::new(MessageKind::Video, vec![7u8; 16])
        );
    }

    #[tokio::test]
    async fn login_inside_a_room_is_refused() {
        let relay = relay();
        let mut alice = Peer::new(1);
        login(&relay, &mut alice, "alice", "pw1").await;
        relay
            .dispatch(&alice.conn, Message::empty(MessageKind::CreateRoom))
            .await;
        alice.next().await;
        alice.next().await;

        relay
            .dispatch(&alice.conn, Message::text(MessageKind::Login, "bob|pw2"))
            .await;
        assert_eq!(alice.next().await, Message::info(info::ALREADY_IN_ROOM));
        assert_eq!(alice.conn.username().as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn disconnect_cleanup_is_idempotent() {
        let relay = relay();
        let mut alice = Peer::new(1);
        relay.register_connection(&alice.conn);
        login(&relay, &mut alice, "alice", "pw1").await;
        relay
            .dispatch(&alice.conn, Message::empty(MessageKind::CreateRoom))
            .await;
        assert_eq!(relay.rooms().len(), 1);

        relay
            .on_disconnect(&alice.conn, &DisconnectReason::PeerClosed)
            .await;
        relay
            .on_disconnect(&alice.conn, &DisconnectReason::Closed)
            .await;
        assert!(relay.rooms().is_empty());
        assert_eq!(relay.connection_count(), 0);
        assert_eq!(relay.stats().connections_open, 0);
    }

    async fn meet(relay: &Relay, alice: &mut Peer, bob: &mut Peer) -> String {
        login(relay, alice, "alice", "pw1").await;
        login(relay, bob, "bob", "pw2").await;
        relay
            .dispatch(&alice.conn, Message::empty(MessageKind::CreateRoom))
            .await;
        let created = alice.next().await.payload_text();
        let room_id = created.split('|').nth(1).expect("room id").to_string();
        alice.next().await;

        relay
            .dispatch(&bob.conn, Message::text(MessageKind::JoinRoom, room_id.clone()))
            .await;
        bob.next().await;
        bob.next().await;
        alice.next().await;
        room_id
    }

    #[tokio::test]
    async fn stalled_or_dead_recipients_do_not_hold_up_fan_out() {
        let relay = relay();
        let mut healthy = Peer::new(1);

        let (stalled_side, _never_read) = duplex(8);
        let stalled = Arc::new(Connection::new(
            2,
            SocketAddr::from(([127, 0, 0, 1], 40002)),
            stalled_side,
            CancellationToken::new(),
            Duration::from_millis(100),
        ));
        let (dead_side, gone) = duplex(64);
        drop(gone);
        let dead = Arc::new(Connection::new(
            3,
            SocketAddr::from(([127, 0, 0, 1], 40003)),
            dead_side,
            CancellationToken::new(),
            Duration::from_millis(100),
        ));

        let message = Message::new(MessageKind::Audio, vec![3u8; 64]);
        let targets = [
            Arc::clone(&stalled),
            Arc::clone(&dead),
            Arc::clone(&healthy.conn),
        ];
        let started = tokio::time::Instant::now();
        let delivered = relay.fan_out(&targets, &message).await;

        assert_eq!(delivered, 1);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(healthy.next().await, message);
        assert!(stalled.is_closed());
        assert!(dead.is_closed());
        assert!(!healthy.conn.is_closed());
    }

    #[tokio::test]
    async fn kick_removes_target_before_closing_it() {
        let relay = relay();
        let mut alice = Peer::new(1);
        let mut bob = Peer::new(2);
        let room_id = meet(&relay, &mut alice, &mut bob).await;

        relay
            .dispatch(&alice.conn, Message::text(MessageKind::Kick, "bob"))
            .await;
        assert_eq!(bob.next().await, Message::info(info::KICKED));
        assert!(bob.conn.is_closed());
        assert!(bob.conn.session().membership().is_none());
        assert_eq!(
            alice.next().await,
            Message::text(MessageKind::Participants, "alice:1:0:0")
        );

        // The kicked connection's own cleanup finds nothing left to do.
        relay
            .on_disconnect(&bob.conn, &DisconnectReason::Closed)
            .await;
        assert!(alice.nothing_pending().await);
        let room = relay.rooms().get(&room_id).expect("room");
        assert_eq!(room.len(), 1);
    }

    #[tokio::test]
    async fn reconnected_host_keeps_the_room() {
        let relay = relay();
        let mut alice = Peer::new(1);
        let mut bob = Peer::new(2);
        let room_id = meet(&relay, &mut alice, &mut bob).await;

        let mut alice_again = Peer::new(3);
        login(&relay, &mut alice_again, "alice", "pw1").await;
        relay
            .dispatch(
                &alice_again.conn,
                Message::text(MessageKind::JoinRoom, room_id.clone()),
            )
            .await;

        assert_eq!(alice.next().await, Message::info(info::REPLACED));
        assert!(alice.conn.is_closed());
        assert_eq!(
            alice_again.next().await,
            Message::info(format!("JOIN_OK|{room_id}|HOST=alice"))
        );
        let room = relay.rooms().get(&room_id).expect("room");
        assert!(room.is_host(&alice_again.conn));
        assert!(
            alice_again
                .conn
                .session()
                .membership()
                .is_some_and(|membership| membership.is_host)
        );
        assert_eq!(room.participants_payload(), "alice:1:0:0;bob:0:0:0");
    }
}
