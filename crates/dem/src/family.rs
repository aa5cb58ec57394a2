//! Family tags: per-group boundary-condition and prescribed-motion rules.
//!
//! Every clump carries a family number. Rules are per family, not per
//! body, so a whole group (e.g. a fixed container wall built from
//! clumps) is controlled by a single entry.

use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Number of distinct family tags.
pub const NUM_FAMILIES: usize = 256;

/// Motion rule applied to every clump in a family during integration.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct FamilyPrescription {
    /// Fixed families have effectively infinite mass: they hold position
    /// and orientation and ignore accumulated forces.
    pub fixed: bool,
    /// Prescribed constant linear velocity (m/s). Overrides integration
    /// of the linear accelerations; the family still translates.
    pub linear_velocity: Option<Vec3>,
}

/// Frozen per-family rule table, shared read-only by the kernels.
#[derive(Clone, Debug)]
pub struct FamilyTable {
    entries: Vec<FamilyPrescription>,
}

impl Default for FamilyTable {
    fn default() -> Self {
        Self {
            entries: vec![FamilyPrescription::default(); NUM_FAMILIES],
        }
    }
}

impl FamilyTable {
    pub fn set(&mut self, family: u32, prescription: FamilyPrescription) {
        self.entries[family as usize % NUM_FAMILIES] = prescription;
    }

    #[inline]
    pub fn get(&self, family: u32) -> FamilyPrescription {
        self.entries[family as usize % NUM_FAMILIES]
    }

    #[inline]
    pub fn is_fixed(&self, family: u32) -> bool {
        self.get(family).fixed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_families_are_free() {
        let table = FamilyTable::default();
        assert!(!table.is_fixed(0));
        assert!(table.get(17).linear_velocity.is_none());
    }

    #[test]
    fn set_and_get_round_trip() {
        let mut table = FamilyTable::default();
        table.set(
            3,
            FamilyPrescription {
                fixed: true,
                linear_velocity: None,
            },
        );
        assert!(table.is_fixed(3));
        assert!(!table.is_fixed(4));
    }
}
