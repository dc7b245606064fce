//! Rooms and the registry that owns them.
//!
//! Both maps are concurrent, so callers never lock around them. The registry
//! keeps one invariant: every room it holds has at least one member. Joins
//! take the registry's read guard while inserting, so a concurrent
//! remove-if-empty cannot drop a room that is gaining a member.

use std::{
    borrow::Borrow,
    fmt,
    sync::{Arc, PoisonError, RwLock},
};

use dashmap::{DashMap, mapref::entry::Entry};
use rand::Rng;

use crate::{
    connection::{Connection, ConnectionId},
    session::MediaFlags,
};

const ROOM_ID_PREFIX: char = 'R';

/// Short human-typeable room code such as `R123456`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoomId(String);

impl RoomId {
    pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self(format!(
            "{ROOM_ID_PREFIX}{}",
            rng.gen_range(100_000..1_000_000)
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RoomId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for RoomId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl Borrow<str> for RoomId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One line of a participants snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub username: String,
    pub is_host: bool,
    pub media: MediaFlags,
}

impl fmt::Display for Participant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.username,
            u8::from(self.is_host),
            u8::from(self.media.cam_on),
            u8::from(self.media.mic_on)
        )
    }
}

pub struct Room {
    id: RoomId,
    host: RwLock<Arc<Connection>>,
    members: DashMap<String, Arc<Connection>>,
}

impl Room {
    fn new(id: RoomId, host_username: String, host: Arc<Connection>) -> Self {
        let members = DashMap::new();
        members.insert(host_username, Arc::clone(&host));
        Self {
            id,
            host: RwLock::new(host),
            members,
        }
    }

    pub fn id(&self) -> &RoomId {
        &self.id
    }

    pub fn host(&self) -> Arc<Connection> {
        Arc::clone(&self.host.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn host_username(&self) -> Option<String> {
        self.host().username()
    }

    pub fn is_host(&self, conn: &Connection) -> bool {
        self.host().id() == conn.id()
    }

    /// Inserts by username, last writer wins. Returns the connection that was
    /// displaced, if it was a different one.
    pub fn add(
        &self,
        username: impl Into<String>,
        conn: Arc<Connection>,
    ) -> Option<Arc<Connection>> {
        let conn_id = conn.id();
        self.members
            .insert(username.into(), conn)
            .filter(|previous| previous.id() != conn_id)
    }

    pub fn remove(&self, username: &str) -> Option<Arc<Connection>> {
        self.members.remove(username).map(|(_, conn)| conn)
    }

    /// Removes `username` only while it still maps to connection `id`.
    pub fn remove_member(&self, username: &str, id: ConnectionId) -> bool {
        self.members
            .remove_if(username, |_, conn| conn.id() == id)
            .is_some()
    }

    pub fn get(&self, username: &str) -> Option<Arc<Connection>> {
        self.members.get(username).map(|entry| Arc::clone(entry.value()))
    }

    /// Snapshot of the current members; iterate this, not the live map.
    pub fn members(&self) -> Vec<Arc<Connection>> {
        self.members
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Current membership with host and media flags, ordered by username.
    pub fn participants(&self) -> Vec<Participant> {
        let host_id = self.host().id();
        let mut participants: Vec<Participant> = self
            .members
            .iter()
            .map(|entry| {
                let media = entry
                    .value()
                    .with_session(|session| session.membership().map(|m| m.media))
                    .unwrap_or_default();
                Participant {
                    username: entry.key().clone(),
                    is_host: entry.value().id() == host_id,
                    media,
                }
            })
            .collect();
        participants.sort_by(|a, b| a.username.cmp(&b.username));
        participants
    }

    /// `name:isHost:cam:mic` entries joined by `;`.
    pub fn participants_payload(&self) -> String {
        self.participants()
            .iter()
            .map(Participant::to_string)
            .collect::<Vec<_>>()
            .join(";")
    }

    /// Moves host privilege to the longest-connected remaining member.
    ///
    /// Does nothing while the current host is still a member.
    pub fn hand_over_host(&self) -> Option<Arc<Connection>> {
        let current = self.host();
        if self.members.iter().any(|entry| entry.value().id() == current.id()) {
            return None;
        }

        let successor = self
            .members()
            .into_iter()
            .min_by_key(|conn| conn.id())?;
        self.set_host(&successor);
        Some(successor)
    }

    /// Makes `conn` the host and marks its session accordingly.
    pub fn set_host(&self, conn: &Arc<Connection>) {
        conn.with_session(|session| session.promote_to_host());
        *self.host.write().unwrap_or_else(PoisonError::into_inner) = Arc::clone(conn);
    }
}

impl fmt::Debug for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Room")
            .field("id", &self.id)
            .field("members", &self.len())
            .finish()
    }
}

pub enum JoinOutcome {
    Joined {
        room: Arc<Room>,
        /// Earlier connection registered under the same username.
        replaced: Option<Arc<Connection>>,
    },
    RoomNotFound,
    NotAuthenticated,
}

/// Result of taking a connection out of its room.
pub struct Departure {
    pub room: Arc<Room>,
    pub username: String,
    pub was_host: bool,
    /// The room became empty and was dropped from the registry.
    pub room_removed: bool,
}

#[derive(Default)]
pub struct RoomRegistry {
    rooms: DashMap<RoomId, Arc<Room>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a room under a fresh id with `host` as host and sole member.
    ///
    /// Returns `None` if `host` is not in the authenticated state.
    pub fn create_room(&self, host: &Arc<Connection>) -> Option<Arc<Room>> {
        let username = host.with_session(|session| {
            session
                .membership()
                .is_none()
                .then(|| session.username().map(str::to_string))
                .flatten()
        })?;

        loop {
            let id = RoomId::generate(&mut rand::thread_rng());
            match self.rooms.entry(id.clone()) {
                Entry::Occupied(_) => continue,
                Entry::Vacant(slot) => {
                    let entered = host
                        .with_session(|session| session.enter_room(id.clone(), true).is_some());
                    if !entered {
                        return None;
                    }
                    let room = Arc::new(Room::new(id, username, Arc::clone(host)));
                    slot.insert(Arc::clone(&room));
                    return Some(room);
                }
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<Room>> {
        self.rooms.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Adds `conn` to room `id` as a regular member.
    pub fn join(&self, id: &str, conn: &Arc<Connection>) -> JoinOutcome {
        let Some(entry) = self.rooms.get(id) else {
            return JoinOutcome::RoomNotFound;
        };
        let room = Arc::clone(entry.value());

        let username = conn.with_session(|session| {
            session
                .enter_room(room.id().clone(), false)
                .map(|membership| membership.username.clone())
        });
        let Some(username) = username else {
            return JoinOutcome::NotAuthenticated;
        };

        let replaced = room.add(username, Arc::clone(conn));
        drop(entry);
        JoinOutcome::Joined { room, replaced }
    }

    /// Takes `conn` out of its room, dropping the room if it empties.
    ///
    /// Safe to call repeatedly: once the session has left, later calls
    /// return `None`.
    pub fn leave(&self, conn: &Connection) -> Option<Departure> {
        let membership = conn.with_session(|session| session.leave_room())?;
        let room = self.get(membership.room.as_str())?;

        room.remove_member(&membership.username, conn.id());
        let room_removed = self.remove_if_empty(room.id().as_str());
        Some(Departure {
            room,
            username: membership.username,
            was_host: membership.is_host,
            room_removed,
        })
    }

    /// Removes the room iff it has no members. Returns whether it was removed.
    pub fn remove_if_empty(&self, id: &str) -> bool {
        self.rooms.remove_if(id, |_, room| room.is_empty()).is_some()
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    pub fn room_ids(&self) -> Vec<RoomId> {
        self.rooms.iter().map(|entry| entry.key().clone()).collect()
    }
}
