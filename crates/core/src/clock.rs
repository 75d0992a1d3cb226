use std::collections::VecDeque;

/// How many ticks fit in one second at the simulation rate; used to derive a
/// server tick estimate from an estimated server wall-clock time.
pub const TICK_RATE_HZ: u32 = 60;
pub const BROADCAST_INTERVAL_TICKS: u32 = 3;
pub const CLOCK_SYNC_INTERVAL_SECS: u64 = 3;
pub const CLOCK_SYNC_WINDOW: usize = 10;

/// Rolling window of RTT/offset samples, arithmetic mean, bounded to
/// `CLOCK_SYNC_WINDOW` entries. Shared estimator used by the client (the
/// only side that needs an estimate of the other side's clock).
#[derive(Default)]
pub struct ClockSync {
    rtt_samples: VecDeque<f64>,
    offset_samples: VecDeque<f64>,
}

impl ClockSync {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one `(clientTs, serverTs, now)` sample, all in milliseconds.
    pub fn record(&mut self, client_ts_ms: f64, server_ts_ms: f64, now_ms: f64) {
        let rtt = now_ms - client_ts_ms;
        let offset = server_ts_ms - client_ts_ms - rtt / 2.0;

        push_bounded(&mut self.rtt_samples, rtt);
        push_bounded(&mut self.offset_samples, offset);
    }

    pub fn is_calibrated(&self) -> bool {
        self.offset_samples.len() >= 3
    }

    pub fn rtt_ms(&self) -> f64 {
        mean(&self.rtt_samples)
    }

    pub fn offset_ms(&self) -> f64 {
        mean(&self.offset_samples)
    }

    /// Estimated current server wall-clock time given the local clock's
    /// current reading.
    pub fn estimated_server_time_ms(&self, local_now_ms: f64) -> f64 {
        local_now_ms + self.offset_ms()
    }

    pub fn estimated_server_tick(&self, local_now_ms: f64) -> u32 {
        let ms_per_tick = 1000.0 / TICK_RATE_HZ as f64;
        (self.estimated_server_time_ms(local_now_ms) / ms_per_tick).floor() as u32
    }
}

fn push_bounded(window: &mut VecDeque<f64>, value: f64) {
    window.push_back(value);
    while window.len() > CLOCK_SYNC_WINDOW {
        window.pop_front();
    }
}

fn mean(samples: &VecDeque<f64>) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().sum::<f64>() / samples.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uncalibrated_until_three_samples() {
        let mut sync = ClockSync::new();
        assert!(!sync.is_calibrated());
        sync.record(0.0, 50.0, 100.0);
        sync.record(0.0, 50.0, 100.0);
        assert!(!sync.is_calibrated());
        sync.record(0.0, 50.0, 100.0);
        assert!(sync.is_calibrated());
    }

    #[test]
    fn offset_is_arithmetic_mean() {
        let mut sync = ClockSync::new();
        // rtt = 100, offset = serverTs - clientTs - rtt/2 = 50 - 0 - 50 = 0
        sync.record(0.0, 50.0, 100.0);
        // rtt = 100, offset = 60 - 0 - 50 = 10
        sync.record(0.0, 60.0, 100.0);
        assert!((sync.offset_ms() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn window_is_bounded() {
        let mut sync = ClockSync::new();
        for i in 0..(CLOCK_SYNC_WINDOW * 3) {
            sync.record(0.0, i as f64, 100.0);
        }
        assert_eq!(sync.rtt_samples.len(), CLOCK_SYNC_WINDOW);
    }
}
