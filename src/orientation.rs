//! Orientation math
//!
//! Euler angles are roll → pitch → yaw (intrinsic Z-Y-X) in degrees. Rotations are
//! composed as quaternions and converted back, because adding Euler angles degree by
//! degree is only valid far from the ±90° pitch singularity.

use crate::profile::SensorProfile;
use std::ops::Mul;

/// Half-width of the gimbal-lock band around ±90° pitch, in degrees
pub const GIMBAL_LOCK_EPSILON_DEG: f64 = 1.0;

/// Roll, pitch and yaw in degrees
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Euler {
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
}

impl Euler {
    pub fn new(roll: f64, pitch: f64, yaw: f64) -> Self {
        Self { roll, pitch, yaw }
    }
}

/// Unit quaternion, scalar first
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quaternion {
    pub q0: f64,
    pub q1: f64,
    pub q2: f64,
    pub q3: f64,
}

impl Quaternion {
    pub fn new(q0: f64, q1: f64, q2: f64, q3: f64) -> Self {
        Self { q0, q1, q2, q3 }
    }
}

impl Mul for Quaternion {
    type Output = Quaternion;

    fn mul(self, rhs: Quaternion) -> Quaternion {
        quaternion_multiply(self, rhs)
    }
}

/// Convert Euler angles (degrees) to a quaternion using the half-angle formulas.
pub fn euler_to_quaternion(e: Euler) -> Quaternion {
    let (sin_r, cos_r) = (e.roll.to_radians() / 2.0).sin_cos();
    let (sin_p, cos_p) = (e.pitch.to_radians() / 2.0).sin_cos();
    let (sin_y, cos_y) = (e.yaw.to_radians() / 2.0).sin_cos();

    Quaternion {
        q0: cos_r * cos_p * cos_y + sin_r * sin_p * sin_y,
        q1: sin_r * cos_p * cos_y - cos_r * sin_p * sin_y,
        q2: cos_r * sin_p * cos_y + sin_r * cos_p * sin_y,
        q3: cos_r * cos_p * sin_y - sin_r * sin_p * cos_y,
    }
}

/// Convert a quaternion to Euler angles (degrees).
///
/// Inside the gimbal-lock band (|pitch| ≥ 90° − ε) roll and yaw are not separately
/// observable; pitch is pinned to ±90°, roll to 0 and the whole heading goes to yaw.
pub fn quaternion_to_euler(q: Quaternion) -> Euler {
    let lock_sin = (90.0 - GIMBAL_LOCK_EPSILON_DEG).to_radians().sin();
    let sin_p = 2.0 * (q.q0 * q.q2 - q.q3 * q.q1);

    let (roll, pitch, yaw) = if sin_p >= lock_sin {
        (0.0, std::f64::consts::FRAC_PI_2, -2.0 * q.q1.atan2(q.q0))
    } else if sin_p <= -lock_sin {
        (0.0, -std::f64::consts::FRAC_PI_2, 2.0 * q.q1.atan2(q.q0))
    } else {
        let sin_y = 2.0 * (q.q0 * q.q3 + q.q1 * q.q2);
        let cos_y = 1.0 - 2.0 * (q.q2 * q.q2 + q.q3 * q.q3);
        let sin_r = 2.0 * (q.q0 * q.q1 + q.q2 * q.q3);
        let cos_r = 1.0 - 2.0 * (q.q1 * q.q1 + q.q2 * q.q2);
        (sin_r.atan2(cos_r), sin_p.asin(), sin_y.atan2(cos_y))
    };

    Euler {
        roll: roll.to_degrees(),
        pitch: pitch.to_degrees(),
        yaw: yaw.to_degrees(),
    }
}

/// Hamilton product `a * b`.
pub fn quaternion_multiply(a: Quaternion, b: Quaternion) -> Quaternion {
    Quaternion {
        q0: a.q0 * b.q0 - a.q1 * b.q1 - a.q2 * b.q2 - a.q3 * b.q3,
        q1: a.q0 * b.q1 + a.q1 * b.q0 + a.q2 * b.q3 - a.q3 * b.q2,
        q2: a.q0 * b.q2 - a.q1 * b.q3 + a.q2 * b.q0 + a.q3 * b.q1,
        q3: a.q0 * b.q3 + a.q1 * b.q2 - a.q2 * b.q1 + a.q3 * b.q0,
    }
}

/// Rotate `rotation` by `offset` expressed in the rotated (body) frame.
pub fn apply_rotational_offset(rotation: Euler, offset: Euler) -> Euler {
    quaternion_to_euler(euler_to_quaternion(rotation) * euler_to_quaternion(offset))
}

/// Bring a vendor orientation into the common frame where a nadir camera has pitch 0.
///
/// Gimbal-referenced vendors report straight down as −90° pitch and get their
/// profile's pitch offset applied; everything else is returned unchanged.
pub fn standardize(rotation: Euler, profile: SensorProfile) -> Euler {
    match profile.gimbal_pitch_offset() {
        Some(offset) => apply_rotational_offset(rotation, Euler::new(0.0, offset, 0.0)),
        None => rotation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_euler_close(actual: Euler, expected: Euler, tol: f64) {
        assert!(
            (actual.roll - expected.roll).abs() < tol
                && (actual.pitch - expected.pitch).abs() < tol
                && (actual.yaw - expected.yaw).abs() < tol,
            "expected {:?}, got {:?}",
            expected,
            actual
        );
    }

    #[test]
    fn test_round_trip_outside_lock_band() {
        for roll in [-170.0, -45.0, -2.445596, 0.0, 30.0, 179.0] {
            for pitch in [-88.9, -60.0, -1.0, 0.0, 1.003452, 45.0, 88.9] {
                for yaw in [-179.5, -90.0, 0.0, 29.639198, 135.0] {
                    let e = Euler::new(roll, pitch, yaw);
                    assert_euler_close(quaternion_to_euler(euler_to_quaternion(e)), e, 1e-9);
                }
            }
        }
    }

    #[test]
    fn test_lock_band_pins_roll_to_zero() {
        for pitch in [89.2, 89.5, 90.0, -89.3, -90.0] {
            for roll in [0.0, 10.0, -35.0] {
                let out = quaternion_to_euler(euler_to_quaternion(Euler::new(roll, pitch, 40.0)));
                assert_eq!(out.roll, 0.0);
                assert_eq!(out.pitch.abs(), 90.0);
                assert_eq!(out.pitch.signum(), pitch.signum());
            }
        }
    }

    #[test]
    fn test_lock_band_preserves_heading_when_roll_is_zero() {
        let out = quaternion_to_euler(euler_to_quaternion(Euler::new(0.0, 90.0, 37.0)));
        assert_euler_close(out, Euler::new(0.0, 90.0, 37.0), 1e-9);

        let out = quaternion_to_euler(euler_to_quaternion(Euler::new(0.0, -90.0, -120.0)));
        assert_euler_close(out, Euler::new(0.0, -90.0, -120.0), 1e-9);
    }

    #[test]
    fn test_multiply_identity_and_inverse() {
        let identity = Quaternion::new(1.0, 0.0, 0.0, 0.0);
        let q = euler_to_quaternion(Euler::new(10.0, 20.0, 30.0));
        assert_eq!(q * identity, q);
        assert_eq!(identity * q, q);

        let conjugate = Quaternion::new(q.q0, -q.q1, -q.q2, -q.q3);
        let product = q * conjugate;
        assert!((product.q0 - 1.0).abs() < 1e-12);
        assert!(product.q1.abs() < 1e-12 && product.q2.abs() < 1e-12 && product.q3.abs() < 1e-12);
    }

    #[test]
    fn test_standardize_gimbal_vendor() {
        // Gimbal pointing straight down is nadir in the common frame
        let raw = Euler::new(0.0, -89.9, 90.2);
        assert_euler_close(standardize(raw, SensorProfile::Dji), Euler::new(0.0, 0.1, 90.2), 1e-6);
    }

    #[test]
    fn test_standardize_near_singularity_lands_in_band() {
        // A level gimbal (+0.1°) becomes +90.1°, which lies in the lock band and is
        // reported pinned at +90° with roll folded into yaw
        let out = standardize(Euler::new(0.0, 0.1, 0.0), SensorProfile::Dji);
        assert_eq!(out.roll, 0.0);
        assert_eq!(out.pitch, 90.0);
        assert!((out.pitch - 90.1).abs() <= 0.1 + 1e-9);
    }

    #[test]
    fn test_standardize_leaves_in_house_unchanged() {
        let raw = Euler::new(-2.445596, 1.003452, 29.639198);
        assert_eq!(standardize(raw, SensorProfile::Sentera), raw);
        assert_eq!(standardize(raw, SensorProfile::Default), raw);
    }

    #[test]
    fn test_offset_with_roll_is_not_naive_addition() {
        let raw = Euler::new(20.0, -60.0, 10.0);
        let out = apply_rotational_offset(raw, Euler::new(0.0, 90.0, 0.0));
        let naive = Euler::new(20.0, 30.0, 10.0);
        assert!(
            (out.roll - naive.roll).abs() > 1e-3
                || (out.pitch - naive.pitch).abs() > 1e-3
                || (out.yaw - naive.yaw).abs() > 1e-3
        );
    }
}
