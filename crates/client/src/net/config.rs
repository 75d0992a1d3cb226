//! Client-side tuning constants, matching the wire-observable values in the
//! protocol crate this client talks to.

#[derive(Debug, Clone, Copy)]
pub struct ClientConfig {
    /// How often the input manager samples pending actions and sends a batch.
    pub input_rate_hz: u32,
    /// Server broadcast cadence; used only to size the default render delay.
    pub broadcast_hz: u32,
    /// Bound on retained pending-input history.
    pub max_input_buffer: usize,
    /// Squared-distance threshold (metres) past which a locally predicted
    /// body is considered to have diverged from the authority.
    pub reconciliation_threshold: f32,
    /// Per-frame blend factor applied to a local body's position correction.
    pub position_lerp_speed: f32,
    /// Per-frame blend factor applied to a local body's orientation correction.
    pub rotation_slerp_speed: f32,
    /// How often the clock-sync request fires.
    pub clock_sync_interval_secs: u64,
    /// Ring size for each remote body's interpolation buffer.
    pub interpolation_buffer_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            input_rate_hz: 60,
            broadcast_hz: 20,
            max_input_buffer: 120,
            reconciliation_threshold: 0.1,
            position_lerp_speed: 0.3,
            rotation_slerp_speed: 0.3,
            clock_sync_interval_secs: 3,
            interpolation_buffer_size: 3,
        }
    }
}

impl ClientConfig {
    /// Absorbs roughly three broadcast periods of jitter.
    pub fn render_delay_ms(&self) -> f64 {
        3.0 * (1000.0 / self.broadcast_hz as f64)
    }
}
