//! Angle helpers for rotary actuators.
//!
//! All angles are in degrees. Differences are normalized into `(-180, 180]`
//! so that a commanded move always takes the shortest rotational path.
//!
//! # Example
//! ```rust
//! use rv2_core::utils::math::angles::{shortest_delta, wrap_degrees};
//! assert_eq!(wrap_degrees(190.0), -170.0);
//! assert_eq!(shortest_delta(-179.0, 179.0), -2.0);
//! ```

/// Normalize an angle into `(-180, 180]`.
///
/// `-180` maps to `180` so that the boundary has exactly one representation.
pub fn wrap_degrees(angle: f32) -> f32 {
    let mut a = libm::fmodf(angle, 360.0);
    if a <= -180.0 {
        a += 360.0;
    } else if a > 180.0 {
        a -= 360.0;
    }
    a
}

/// Signed shortest rotation that takes `current` onto `target`.
pub fn shortest_delta(
    current: f32,
    target: f32,
) -> f32 {
    wrap_degrees(target - current)
}

/// True when `current` lies within `tolerance` of `target` on the circle.
pub fn within_tolerance(
    current: f32,
    target: f32,
    tolerance: f32,
) -> bool {
    libm::fabsf(shortest_delta(current, target)) <= tolerance
}

/// Clamp `delta` so that `|delta| / dt` never exceeds `max_velocity`.
///
/// Non-positive `dt` or velocity yields zero motion.
pub fn bound_step(
    delta: f32,
    max_velocity: f32,
    dt: f32,
) -> f32 {
    if dt <= 0.0 || max_velocity <= 0.0 {
        return 0.0;
    }
    let limit = max_velocity * dt;
    delta.clamp(-limit, limit)
}
