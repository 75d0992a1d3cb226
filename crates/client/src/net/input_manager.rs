//! Queues locally generated input actions and, at a fixed rate, batches them
//! tagged with the current server-tick estimate for sending.

use std::collections::VecDeque;

use physync::{InputAction, InputBatch};

pub struct InputManager {
    pending: Vec<InputAction>,
    history: VecDeque<InputBatch>,
    max_history: usize,
    sequence: u64,
}

impl InputManager {
    pub fn new(max_history: usize) -> Self {
        Self { pending: Vec::new(), history: VecDeque::new(), max_history, sequence: 0 }
    }

    pub fn queue_action(&mut self, action: InputAction) {
        self.pending.push(action);
    }

    /// If any actions are pending, tags them with `server_tick`, files the
    /// batch into bounded history, and returns it for sending. Also bumps
    /// the client's own monotonic sequence counter (used for bookkeeping;
    /// it does not travel on the wire since `InputBatch` is shared with the
    /// server's tick-keyed buffer).
    pub fn build_batch(&mut self, server_tick: u32) -> Option<InputBatch> {
        if self.pending.is_empty() {
            return None;
        }
        let batch = InputBatch { tick: server_tick, actions: std::mem::take(&mut self.pending) };
        self.sequence += 1;
        self.history.push_back(batch.clone());
        while self.history.len() > self.max_history {
            self.history.pop_front();
        }
        Some(batch)
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn no_pending_actions_builds_nothing() {
        let mut manager = InputManager::new(120);
        assert!(manager.build_batch(1).is_none());
    }

    #[test]
    fn pending_actions_are_batched_and_tagged_with_server_tick() {
        let mut manager = InputManager::new(120);
        manager.queue_action(InputAction::Impulse { body_id: "a".into(), value: Vec3::X });
        let batch = manager.build_batch(42).unwrap();
        assert_eq!(batch.tick, 42);
        assert_eq!(batch.actions.len(), 1);
        assert_eq!(manager.history_len(), 1);
    }

    #[test]
    fn history_is_bounded() {
        let mut manager = InputManager::new(2);
        for tick in 0..5 {
            manager.queue_action(InputAction::Impulse { body_id: "a".into(), value: Vec3::ZERO });
            manager.build_batch(tick);
        }
        assert_eq!(manager.history_len(), 2);
    }
}
