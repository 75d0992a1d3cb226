//! Per-body interpolation buffer: a short time-ordered ring of
//! `(timestamp, state)` samples, queried at a render time that lags real
//! time by `renderDelay` to absorb broadcast jitter.

use std::collections::VecDeque;

use glam::{Quat, Vec3};

use physync::BodyState;

#[derive(Debug, Clone, Copy)]
struct Sample {
    timestamp_ms: f64,
    state: BodyState,
}

/// Holds at most `capacity` samples (the configured buffer size plus one, so
/// a full window of `N` intervals is available to interpolate across).
pub struct InterpolationBuffer {
    samples: VecDeque<Sample>,
    capacity: usize,
}

impl InterpolationBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity + 1),
            capacity: capacity + 1,
        }
    }

    pub fn push(&mut self, timestamp_ms: f64, state: BodyState) {
        self.samples.push_back(Sample { timestamp_ms, state });
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Samples the buffer at `render_time_ms`, interpolating between the two
    /// bracketing entries, extrapolating past the newest, or clamping to the
    /// oldest if `render_time_ms` precedes everything buffered.
    pub fn sample(&self, render_time_ms: f64) -> Option<BodyState> {
        let oldest = self.samples.front()?;
        if render_time_ms <= oldest.timestamp_ms {
            return Some(oldest.state);
        }

        let newest = *self.samples.back()?;
        if render_time_ms >= newest.timestamp_ms {
            let dt = (render_time_ms - newest.timestamp_ms) / 1000.0;
            return Some(extrapolate(&newest.state, dt as f32));
        }

        let mut older = oldest;
        let mut newer = oldest;
        for sample in self.samples.iter() {
            if sample.timestamp_ms <= render_time_ms {
                older = sample;
            }
            if sample.timestamp_ms >= render_time_ms {
                newer = sample;
                break;
            }
        }

        Some(interpolate(older, newer, render_time_ms))
    }
}

fn interpolate(older: &Sample, newer: &Sample, render_time_ms: f64) -> BodyState {
    let span = newer.timestamp_ms - older.timestamp_ms;
    if span <= 0.0 {
        return newer.state;
    }
    let t = ((render_time_ms - older.timestamp_ms) / span) as f32;
    let dt_secs = (span / 1000.0) as f32;

    BodyState {
        position: hermite(
            older.state.position,
            older.state.linear_velocity,
            newer.state.position,
            newer.state.linear_velocity,
            t,
            dt_secs,
        ),
        orientation: slerp(older.state.orientation, newer.state.orientation, t),
        linear_velocity: older.state.linear_velocity.lerp(newer.state.linear_velocity, t),
        angular_velocity: older.state.angular_velocity.lerp(newer.state.angular_velocity, t),
        sleeping: newer.state.sleeping,
    }
}

/// Cubic Hermite spline with endpoint velocities as tangents, scaled by the
/// interval duration so the tangent is expressed in the same `t in [0,1]`
/// parameterization as the positions.
fn hermite(p0: Vec3, v0: Vec3, p1: Vec3, v1: Vec3, t: f32, dt_secs: f32) -> Vec3 {
    let t2 = t * t;
    let t3 = t2 * t;
    let m0 = v0 * dt_secs;
    let m1 = v1 * dt_secs;

    let h00 = 2.0 * t3 - 3.0 * t2 + 1.0;
    let h10 = t3 - 2.0 * t2 + t;
    let h01 = -2.0 * t3 + 3.0 * t2;
    let h11 = t3 - t2;

    p0 * h00 + m0 * h10 + p1 * h01 + m1 * h11
}

/// Shortest-arc slerp; falls back to a normalized linear blend when the two
/// quaternions are nearly collinear (slerp's denominator would blow up).
fn slerp(a: Quat, b: Quat, t: f32) -> Quat {
    let mut b = b;
    let mut dot = a.dot(b);
    if dot < 0.0 {
        b = -b;
        dot = -dot;
    }
    if dot > 0.9995 {
        return (a + (b - a) * t).normalize();
    }
    a.slerp(b, t)
}

/// Advances position by `linVel * dt * decay`; angular velocity decays the
/// same way, orientation is held, velocity fades out over ~0.5s.
fn extrapolate(state: &BodyState, dt: f32) -> BodyState {
    let decay = (1.0 - 2.0 * dt).max(0.0);
    BodyState {
        position: state.position + state.linear_velocity * dt * decay,
        orientation: state.orientation,
        linear_velocity: state.linear_velocity,
        angular_velocity: state.angular_velocity * decay,
        sleeping: state.sleeping,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(position: Vec3) -> BodyState {
        BodyState { position, ..BodyState::IDENTITY }
    }

    #[test]
    fn midpoint_with_zero_velocity_is_the_average() {
        let mut buf = InterpolationBuffer::new(3);
        buf.push(0.0, state(Vec3::ZERO));
        buf.push(100.0, state(Vec3::new(10.0, 0.0, 0.0)));

        let sampled = buf.sample(50.0).unwrap();
        assert!((sampled.position - Vec3::new(5.0, 0.0, 0.0)).length() < 1e-4);
    }

    #[test]
    fn extrapolates_past_the_newest_sample() {
        let mut buf = InterpolationBuffer::new(3);
        let mut moving = state(Vec3::ZERO);
        moving.linear_velocity = Vec3::new(1.0, 0.0, 0.0);
        buf.push(0.0, moving);

        let sampled = buf.sample(100.0).unwrap(); // 0.1s past the newest entry
        assert!(sampled.position.x > 0.0);
        assert!(sampled.position.x < 0.1); // decayed, not a full dt*v step
    }

    #[test]
    fn before_oldest_clamps_to_oldest_verbatim() {
        let mut buf = InterpolationBuffer::new(3);
        buf.push(100.0, state(Vec3::new(3.0, 0.0, 0.0)));
        let sampled = buf.sample(0.0).unwrap();
        assert_eq!(sampled.position, Vec3::new(3.0, 0.0, 0.0));
    }

    #[test]
    fn slerp_output_stays_unit_norm() {
        let a = Quat::from_axis_angle(Vec3::Y, 0.1);
        let b = Quat::from_axis_angle(Vec3::Y, 2.0);
        let mid = slerp(a, b, 0.5);
        assert!((mid.length() - 1.0).abs() < 1e-2);
    }

    #[test]
    fn empty_buffer_samples_to_none() {
        let buf = InterpolationBuffer::new(3);
        assert!(buf.sample(0.0).is_none());
    }
}
