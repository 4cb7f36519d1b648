//! Room membership
//!
//! Rooms are created by the first join and pruned when their last member
//! disconnects. There is no explicit leave; membership only decays with the
//! underlying connection.

use std::collections::{BTreeSet, HashMap};

use rand::Rng;

use super::connection::ConnectionId;
use super::RoomId;

const ROOM_CODE_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const ROOM_CODE_GROUPS: usize = 3;
const ROOM_CODE_GROUP_LEN: usize = 3;

/// Generate a room code such as `k3f-0qa-zz9`
pub fn generate_room_code() -> RoomId {
    let mut rng = rand::thread_rng();
    let groups: Vec<String> = (0..ROOM_CODE_GROUPS)
        .map(|_| {
            (0..ROOM_CODE_GROUP_LEN)
                .map(|_| ROOM_CODE_ALPHABET[rng.gen_range(0..ROOM_CODE_ALPHABET.len())] as char)
                .collect()
        })
        .collect();
    groups.join("-")
}

/// Room id -> members
#[derive(Debug, Default)]
pub struct RoomMembership {
    /// Members of each room, ordered by connection id for stable fan-out
    rooms: HashMap<RoomId, BTreeSet<ConnectionId>>,

    /// Rooms each connection joined, oldest first
    joined: HashMap<ConnectionId, Vec<RoomId>>,
}

impl RoomMembership {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `connection` to `room`
    ///
    /// Joining the same room twice is a no-op apart from making it the
    /// connection's current room.
    pub fn join(&mut self, room: &str, connection: ConnectionId) {
        self.rooms
            .entry(room.to_owned())
            .or_default()
            .insert(connection);

        let joined = self.joined.entry(connection).or_default();
        joined.retain(|r| r != room);
        joined.push(room.to_owned());
    }

    /// Every member of `room` except `excluding`
    ///
    /// This is the fan-out set for a room broadcast.
    pub fn members_except(&self, room: &str, excluding: ConnectionId) -> Vec<ConnectionId> {
        self.rooms
            .get(room)
            .map(|members| {
                members
                    .iter()
                    .copied()
                    .filter(|member| *member != excluding)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Room the connection joined most recently
    pub fn current_room(&self, connection: ConnectionId) -> Option<&RoomId> {
        self.joined.get(&connection).and_then(|rooms| rooms.last())
    }

    pub fn is_member(&self, room: &str, connection: ConnectionId) -> bool {
        self.rooms
            .get(room)
            .is_some_and(|members| members.contains(&connection))
    }

    /// Drop `connection` from every room it joined
    pub fn leave_all(&mut self, connection: ConnectionId) {
        let Some(rooms) = self.joined.remove(&connection) else {
            return;
        };

        for room in rooms {
            if let Some(members) = self.rooms.get_mut(&room) {
                members.remove(&connection);
                if members.is_empty() {
                    self.rooms.remove(&room);
                    tracing::debug!(room = %room, "Room empty, pruned");
                }
            }
        }
    }

    pub fn member_count(&self, room: &str) -> usize {
        self.rooms.get(room).map_or(0, BTreeSet::len)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Drop all rooms, returning how many existed
    pub fn clear(&mut self) -> usize {
        let count = self.rooms.len();
        self.rooms.clear();
        self.joined.clear();
        count
    }
}
