use std::collections::HashMap;

use glam::Vec3;
use thiserror::Error;

use crate::body::BodyDescriptor;
use crate::constraint::ConstraintDescriptor;

use super::Room;

#[derive(Debug, Error)]
pub enum RoomManagerError {
    #[error("room id '{0}' already exists")]
    DuplicateRoomId(String),
    #[error("room id '{0}' does not exist")]
    UnknownRoomId(String),
}

/// Owns every room on this process and enforces id uniqueness on creation.
/// One process owns all of its rooms; there is no cross-process sharing.
#[derive(Default)]
pub struct RoomManager {
    rooms: HashMap<String, Room>,
}

impl RoomManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_room(
        &mut self,
        room_id: String,
        initial_bodies: Vec<BodyDescriptor>,
        initial_constraints: Vec<ConstraintDescriptor>,
        gravity: Vec3,
        tick_rate: u32,
    ) -> Result<(), RoomManagerError> {
        if self.rooms.contains_key(&room_id) {
            return Err(RoomManagerError::DuplicateRoomId(room_id));
        }
        let room = Room::new(room_id.clone(), initial_bodies, initial_constraints, gravity, tick_rate);
        self.rooms.insert(room_id, room);
        Ok(())
    }

    pub fn get(&self, room_id: &str) -> Option<&Room> {
        self.rooms.get(room_id)
    }

    pub fn get_mut(&mut self, room_id: &str) -> Option<&mut Room> {
        self.rooms.get_mut(room_id)
    }

    pub fn remove(&mut self, room_id: &str) -> Option<Room> {
        self.rooms.remove(room_id)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&String, &mut Room)> {
        self.rooms.iter_mut()
    }

    pub fn room_ids(&self) -> impl Iterator<Item = &str> {
        self.rooms.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_room_id_is_rejected() {
        let mut manager = RoomManager::new();
        manager
            .create_room("r".into(), vec![], vec![], Vec3::ZERO, 60)
            .unwrap();
        let err = manager
            .create_room("r".into(), vec![], vec![], Vec3::ZERO, 60)
            .unwrap_err();
        assert!(matches!(err, RoomManagerError::DuplicateRoomId(id) if id == "r"));
    }

    #[test]
    fn unknown_room_lookup_is_none() {
        let manager = RoomManager::new();
        assert!(manager.get("missing").is_none());
    }

    #[test]
    fn removed_room_is_gone() {
        let mut manager = RoomManager::new();
        manager
            .create_room("r".into(), vec![], vec![], Vec3::ZERO, 60)
            .unwrap();
        assert!(manager.remove("r").is_some());
        assert!(manager.get("r").is_none());
    }
}
