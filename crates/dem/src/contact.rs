//! Contact-pair storage.
//!
//! [`ContactBatch`] is the kT → dT mailbox payload: just the candidate
//! pair ids plus the stamp of the snapshot they were detected from.
//! [`ContactStore`] is the dynamic stage's working set: pair ids plus the
//! per-pair force and contact point filled in by the force model. The
//! store is over-provisioned (a heuristic multiple of the clump count)
//! and grows but never shrinks; everything is index-addressed, so views
//! into it are re-resolved per use and survive reallocation.

use glam::Vec3;

/// Heuristic initial pair capacity per clump. Total contact pairs rarely
/// exceed 4× the body count; starting there keeps mid-run reallocations
/// rare without over-committing memory.
pub const PAIRS_PER_CLUMP_ESTIMATE: usize = 4;

/// Candidate contact pairs produced by one kinematic cycle.
#[derive(Clone, Debug, Default)]
pub struct ContactBatch {
    /// Sphere id of geometry A, per pair.
    pub id_a: Vec<u32>,
    /// Sphere id of geometry B, per pair.
    pub id_b: Vec<u32>,
    /// Dynamic-stage stamp of the snapshot these pairs came from.
    pub origin_stamp: i64,
}

impl ContactBatch {
    pub fn with_capacity(n: usize) -> Self {
        Self {
            id_a: Vec::with_capacity(n),
            id_b: Vec::with_capacity(n),
            origin_stamp: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.id_a.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_a.is_empty()
    }

    pub fn clear(&mut self) {
        self.id_a.clear();
        self.id_b.clear();
    }

    pub fn push(&mut self, a: u32, b: u32) {
        self.id_a.push(a);
        self.id_b.push(b);
    }

    /// Overwrite this batch with another's content (mailbox publish path).
    pub fn copy_from(&mut self, other: &ContactBatch) {
        self.clear();
        self.id_a.extend_from_slice(&other.id_a);
        self.id_b.extend_from_slice(&other.id_b);
        self.origin_stamp = other.origin_stamp;
    }
}

/// Dynamic-stage contact working set: ids, forces, contact points.
///
/// Contact points are stored as offsets from each owner's center (world
/// orientation), which keeps them precise at large domain extents and
/// doubles as the torque lever arm in the scatter-reduce.
#[derive(Clone, Debug, Default)]
pub struct ContactStore {
    pub id_a: Vec<u32>,
    pub id_b: Vec<u32>,
    /// Force on geometry A per pair (N); B receives the reaction.
    pub force: Vec<Vec3>,
    /// Contact point relative to owner A's center (m).
    pub point_a: Vec<Vec3>,
    /// Contact point relative to owner B's center (m).
    pub point_b: Vec<Vec3>,
    n_active: usize,
}

impl ContactStore {
    pub fn with_capacity(capacity: usize) -> Self {
        let mut store = Self::default();
        store.grow_to(capacity);
        store
    }

    /// Number of live pairs this cycle.
    pub fn active(&self) -> usize {
        self.n_active
    }

    pub fn capacity(&self) -> usize {
        self.id_a.len()
    }

    /// Growth-only resize of the backing arrays; existing entries keep
    /// their indices and content.
    pub fn grow_to(&mut self, capacity: usize) {
        if capacity <= self.capacity() {
            return;
        }
        log::debug!(
            "contact store growing {} -> {} pairs",
            self.capacity(),
            capacity
        );
        self.id_a.resize(capacity, 0);
        self.id_b.resize(capacity, 0);
        self.force.resize(capacity, Vec3::ZERO);
        self.point_a.resize(capacity, Vec3::ZERO);
        self.point_b.resize(capacity, Vec3::ZERO);
    }

    /// Swap in a freshly received batch, growing storage first if the
    /// incoming count exceeds capacity.
    pub fn ingest(&mut self, batch: &ContactBatch) {
        let n = batch.len();
        if n > self.capacity() {
            self.grow_to(n);
        }
        self.id_a[..n].copy_from_slice(&batch.id_a);
        self.id_b[..n].copy_from_slice(&batch.id_b);
        self.n_active = n;
    }

    /// Live pair ids, resolved fresh on every call.
    pub fn active_pairs(&self) -> (&[u32], &[u32]) {
        (&self.id_a[..self.n_active], &self.id_b[..self.n_active])
    }

    /// Split borrows over the live prefix: `(id_a, id_b, force, point_a,
    /// point_b)`. Lets a force kernel read the ids while filling the
    /// per-pair output arrays.
    pub fn parts_mut(
        &mut self,
    ) -> (&[u32], &[u32], &mut [Vec3], &mut [Vec3], &mut [Vec3]) {
        let n = self.n_active;
        (
            &self.id_a[..n],
            &self.id_b[..n],
            &mut self.force[..n],
            &mut self.point_a[..n],
            &mut self.point_b[..n],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ingest_grows_and_preserves_ids() {
        let mut store = ContactStore::with_capacity(2);
        let mut batch = ContactBatch::default();
        batch.push(0, 1);
        batch.push(2, 3);
        store.ingest(&batch);
        assert_eq!(store.active(), 2);

        // Exceed capacity: pairs written before and after the growth
        // boundary must all be present and correctly indexed.
        batch.push(4, 5);
        batch.push(6, 7);
        batch.push(8, 9);
        store.ingest(&batch);
        assert_eq!(store.active(), 5);
        assert!(store.capacity() >= 5);
        let (a, b) = store.active_pairs();
        assert_eq!(a, &[0, 2, 4, 6, 8]);
        assert_eq!(b, &[1, 3, 5, 7, 9]);
    }

    #[test]
    fn grow_never_shrinks() {
        let mut store = ContactStore::with_capacity(8);
        store.grow_to(4);
        assert_eq!(store.capacity(), 8);
    }
}
