use std::collections::BTreeMap;

use crate::input::InputBatch;

/// Max ticks of history retained; batches older than
/// `current_tick - MAX_INPUT_BUFFER` are pruned on insert.
pub const MAX_INPUT_BUFFER: u32 = 120;

/// Tick-keyed queue of input batches for a single client.
#[derive(Default)]
pub struct InputBuffer {
    batches: BTreeMap<u32, Vec<InputBatch>>,
}

impl InputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `batch` at its own tick and prunes anything older than
    /// `batch.tick - MAX_INPUT_BUFFER`.
    pub fn push(&mut self, batch: InputBatch) {
        let floor = batch.tick.saturating_sub(MAX_INPUT_BUFFER);
        self.batches.entry(batch.tick).or_default().push(batch);
        self.batches.retain(|&tick, _| tick >= floor);
    }

    /// Removes and returns every batch targeted at `tick`.
    pub fn take(&mut self, tick: u32) -> Vec<InputBatch> {
        self.batches.remove(&tick).unwrap_or_default()
    }

    pub fn clear(&mut self) {
        self.batches.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::InputAction;

    fn batch(tick: u32) -> InputBatch {
        InputBatch {
            tick,
            actions: vec![InputAction::Impulse {
                body_id: "a".into(),
                value: glam::Vec3::ZERO,
            }],
        }
    }

    #[test]
    fn take_removes_and_returns() {
        let mut buf = InputBuffer::new();
        buf.push(batch(5));
        assert_eq!(buf.take(5).len(), 1);
        assert!(buf.take(5).is_empty());
    }

    #[test]
    fn take_missing_tick_is_empty() {
        let mut buf = InputBuffer::new();
        assert!(buf.take(1).is_empty());
    }

    #[test]
    fn prunes_entries_older_than_window() {
        let mut buf = InputBuffer::new();
        buf.push(batch(1));
        buf.push(batch(1 + MAX_INPUT_BUFFER + 10));
        assert!(buf.take(1).is_empty());
    }

    #[test]
    fn clear_discards_everything() {
        let mut buf = InputBuffer::new();
        buf.push(batch(1));
        buf.clear();
        assert!(buf.take(1).is_empty());
    }
}
