//! Analytical boundary primitives.
//!
//! Planes are resolved directly in the force model against every
//! component sphere; they never enter the broad phase or the contact
//! mailbox.

use glam::{DVec3, Vec3};
use serde::{Deserialize, Serialize};

/// An infinite boundary plane.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct BcPlane {
    /// Any point on the plane (m).
    pub point: DVec3,
    /// Unit normal pointing into the simulation domain.
    pub normal: Vec3,
    /// Material id used for the contact-pair lookup.
    pub material: u32,
}

impl BcPlane {
    pub fn new(point: DVec3, normal: Vec3, material: u32) -> Self {
        Self {
            point,
            normal: normal.normalize(),
            material,
        }
    }

    /// Signed distance of a world point above the plane (m); negative
    /// means behind it.
    #[inline]
    pub fn signed_distance(&self, world: DVec3) -> f64 {
        (world - self.point).dot(self.normal.as_dvec3())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_distance_sign_convention() {
        let floor = BcPlane::new(DVec3::ZERO, Vec3::Z, 0);
        assert!(floor.signed_distance(DVec3::new(0.0, 0.0, 2.0)) > 0.0);
        assert!(floor.signed_distance(DVec3::new(5.0, -1.0, -0.5)) < 0.0);
    }

    #[test]
    fn normal_is_normalized_on_construction() {
        let p = BcPlane::new(DVec3::ZERO, Vec3::new(0.0, 0.0, 10.0), 0);
        assert!((p.normal.length() - 1.0).abs() < 1e-6);
    }
}
