//! Smallest-three unit-quaternion compression: 1 index byte + 3 scaled i16s.

use glam::Quat;

/// Non-largest components lie within `±1/√2` on a unit quaternion; this is
/// the scale factor mapping that range onto the full `i16` range.
const SCALE: f32 = 32767.0 / std::f32::consts::FRAC_1_SQRT_2;

pub const ENCODED_LEN: usize = 7;

pub fn encode(q: Quat) -> [u8; ENCODED_LEN] {
    let components = [q.x, q.y, q.z, q.w];
    let (largest_index, largest_value) = components
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.abs().partial_cmp(&b.abs()).unwrap())
        .map(|(i, &v)| (i, v))
        .unwrap();

    // q and -q represent the same rotation; normalize sign so the dropped
    // component is never negative.
    let sign = if largest_value < 0.0 { -1.0 } else { 1.0 };

    let mut out = [0u8; ENCODED_LEN];
    out[0] = largest_index as u8;

    let mut slot = 1;
    for (i, &c) in components.iter().enumerate() {
        if i == largest_index {
            continue;
        }
        let scaled = (c * sign * SCALE).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        out[slot..slot + 2].copy_from_slice(&scaled.to_le_bytes());
        slot += 2;
    }
    out
}

pub fn decode(bytes: &[u8; ENCODED_LEN]) -> Quat {
    let largest_index = bytes[0] as usize;
    let mut others = [0.0f32; 3];
    for (slot, value) in others.iter_mut().enumerate() {
        let start = 1 + slot * 2;
        let raw = i16::from_le_bytes([bytes[start], bytes[start + 1]]);
        *value = raw as f32 / SCALE;
    }

    let sum_sq: f32 = others.iter().map(|v| v * v).sum();
    let largest = (1.0 - sum_sq).max(0.0).sqrt();

    let mut components = [0.0f32; 4];
    let mut slot = 0;
    for i in 0..4 {
        if i == largest_index {
            components[i] = largest;
        } else {
            components[i] = others[slot];
            slot += 1;
        }
    }
    Quat::from_xyzw(components[0], components[1], components[2], components[3])
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn round_trip_90_degrees_about_y() {
        let q = Quat::from_axis_angle(Vec3::Y, std::f32::consts::FRAC_PI_2);
        let decoded = decode(&encode(q));
        assert!((decoded.x - q.x).abs() < 1e-3);
        assert!((decoded.y - q.y).abs() < 1e-3);
        assert!((decoded.z - q.z).abs() < 1e-3);
        assert!((decoded.w - q.w).abs() < 1e-3);
    }

    #[test]
    fn round_trip_identity() {
        let decoded = decode(&encode(Quat::IDENTITY));
        assert!((decoded.length() - 1.0).abs() < 1e-3);
    }

    #[test]
    fn decoded_norm_within_tolerance() {
        let q = Quat::from_euler(glam::EulerRot::XYZ, 0.3, 1.1, -0.4).normalize();
        let decoded = decode(&encode(q));
        assert!((decoded.length() - 1.0).abs() < 1e-3);
    }
}
