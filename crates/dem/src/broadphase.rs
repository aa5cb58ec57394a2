//! Default broad phase: sphere-center binning over the domain's bin
//! lattice with a 27-neighborhood sweep.
//!
//! Candidate criterion: center distance under `rA + rB + expand_factor`.
//! Spheres of the same owner clump never pair (their overlap is the
//! clump's own shape). Correctness requires one bin to cover the largest
//! possible contact reach, i.e. `bin_size >= 2·r_max + expand`; `bind`
//! warns when the configuration violates that.

use glam::DVec3;
use rayon::prelude::*;
use rustc_hash::FxHashMap;

use crate::contact::ContactBatch;
use crate::kernels::{ContactDetector, KernelError, KernelScene};
use crate::state::StateSnapshot;

/// Bin-sweep contact detector (the stock kinematic kernel).
#[derive(Default)]
pub struct BinSweepDetector {
    /// Sphere centers relative to the domain corner (m), rebuilt per call.
    sphere_pos: Vec<DVec3>,
    /// Occupied bins only; the lattice itself is far too large to store
    /// densely.
    bins: FxHashMap<u64, Vec<u32>>,
}

impl BinSweepDetector {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    fn bin_coords(&self, scene: &KernelScene, pos: DVec3) -> (u64, u64, u64) {
        let p = &scene.params;
        let bx = ((pos.x / p.bin_size) as i64).clamp(0, p.nb_x as i64 - 1) as u64;
        let by = ((pos.y / p.bin_size) as i64).clamp(0, p.nb_y as i64 - 1) as u64;
        let bz = ((pos.z / p.bin_size) as i64).clamp(0, p.nb_z as i64 - 1) as u64;
        (bx, by, bz)
    }

    #[inline]
    fn bin_id(&self, scene: &KernelScene, bx: u64, by: u64, bz: u64) -> u64 {
        let p = &scene.params;
        (bz * p.nb_y + by) * p.nb_x + bx
    }
}

impl ContactDetector for BinSweepDetector {
    fn bind(&mut self, scene: &KernelScene) -> Result<(), KernelError> {
        let reach = 2.0 * scene.geom.max_sphere_radius() as f64 + scene.params.expand_factor as f64;
        if scene.params.bin_size < reach {
            log::warn!(
                "bin size {:.3e} below max contact reach {:.3e}; contacts may be missed",
                scene.params.bin_size,
                reach
            );
        }
        Ok(())
    }

    fn detect_contacts(
        &mut self,
        scene: &KernelScene,
        snapshot: &StateSnapshot,
        out: &mut ContactBatch,
    ) -> Result<(), KernelError> {
        let geom = &scene.geom;
        let params = &scene.params;
        let n = geom.n_spheres();

        self.sphere_pos.resize(n, DVec3::ZERO);
        self.sphere_pos
            .par_iter_mut()
            .enumerate()
            .for_each(|(sph, pos)| {
                let owner = geom.owner[sph] as usize;
                let center = snapshot.world_position(params, owner);
                let offset = snapshot.ori[owner] * geom.sphere_rel_pos(sph as u32);
                *pos = center - params.lbf + offset.as_dvec3();
            });

        self.bins.clear();
        for sph in 0..n {
            let (bx, by, bz) = self.bin_coords(scene, self.sphere_pos[sph]);
            let id = self.bin_id(scene, bx, by, bz);
            self.bins.entry(id).or_default().push(sph as u32);
        }

        out.clear();
        let expand = params.expand_factor as f64;
        for i in 0..n as u32 {
            let pos_i = self.sphere_pos[i as usize];
            let (bx, by, bz) = self.bin_coords(scene, pos_i);
            let r_i = geom.sphere_radius(i) as f64;
            let owner_i = geom.owner[i as usize];

            for dz in -1i64..=1 {
                for dy in -1i64..=1 {
                    for dx in -1i64..=1 {
                        let nx = bx as i64 + dx;
                        let ny = by as i64 + dy;
                        let nz = bz as i64 + dz;
                        if nx < 0
                            || ny < 0
                            || nz < 0
                            || nx >= params.nb_x as i64
                            || ny >= params.nb_y as i64
                            || nz >= params.nb_z as i64
                        {
                            continue;
                        }
                        let Some(list) =
                            self.bins
                                .get(&self.bin_id(scene, nx as u64, ny as u64, nz as u64))
                        else {
                            continue;
                        };
                        for &j in list {
                            // Each unordered pair is emitted exactly once.
                            if j <= i || geom.owner[j as usize] == owner_i {
                                continue;
                            }
                            let reach = r_i + geom.sphere_radius(j) as f64 + expand;
                            let d2 = (self.sphere_pos[j as usize] - pos_i).length_squared();
                            if d2 < reach * reach {
                                out.push(i, j);
                            }
                        }
                    }
                }
            }
        }

        out.origin_stamp = snapshot.stamp;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clump::{ClumpTemplate, GeometryTables, Material};
    use crate::family::FamilyTable;
    use crate::params::SimParams;
    use crate::state::{encode_position, StateSnapshot};
    use glam::Quat;
    use std::sync::Arc;

    fn scene_with_spheres(centers: &[DVec3], radius: f32) -> (KernelScene, StateSnapshot) {
        let mut params = SimParams::default();
        params.nv_x_p2 = 8;
        params.nv_y_p2 = 8;
        params.nv_z_p2 = 8;
        params.l = 1e-6;
        params.bin_size = 4.0 * radius as f64;
        params.lbf = DVec3::splat(-1.0);
        params.derive_geometry();

        let templates = vec![ClumpTemplate::simple_sphere(1.0, radius, 0)];
        let ids: Vec<u32> = vec![0; centers.len()];
        let geom = GeometryTables::build(&templates, &[Material::default()], &ids);

        let mut snapshot = StateSnapshot::with_len(centers.len());
        for (i, &c) in centers.iter().enumerate() {
            let (voxel, loc) = encode_position(&params, c);
            snapshot.voxel[i] = voxel;
            snapshot.loc[i] = loc;
            snapshot.ori[i] = Quat::IDENTITY;
        }

        params.n_clumps = centers.len();
        params.n_spheres = centers.len();
        let scene = KernelScene {
            params,
            geom: Arc::new(geom),
            families: Arc::new(FamilyTable::default()),
            planes: Arc::new(Vec::new()),
        };
        (scene, snapshot)
    }

    #[test]
    fn overlapping_spheres_pair_once() {
        let (scene, snapshot) = scene_with_spheres(
            &[
                DVec3::new(0.0, 0.0, 0.0),
                DVec3::new(0.15, 0.0, 0.0), // overlaps the first (radii 0.1)
                DVec3::new(0.9, 0.0, 0.0),  // far away
            ],
            0.1,
        );
        let mut detector = BinSweepDetector::new();
        let mut out = ContactBatch::default();
        detector
            .detect_contacts(&scene, &snapshot, &mut out)
            .expect("detect failed");

        assert_eq!(out.len(), 1);
        assert_eq!((out.id_a[0], out.id_b[0]), (0, 1));
    }

    #[test]
    fn expand_margin_catches_near_misses() {
        let (mut scene, snapshot) = scene_with_spheres(
            &[DVec3::new(0.0, 0.0, 0.0), DVec3::new(0.25, 0.0, 0.0)],
            0.1,
        );
        let mut detector = BinSweepDetector::new();
        let mut out = ContactBatch::default();

        detector
            .detect_contacts(&scene, &snapshot, &mut out)
            .expect("detect failed");
        assert!(out.is_empty(), "gap of 0.05 must not pair without margin");

        scene.params.expand_factor = 0.06;
        detector
            .detect_contacts(&scene, &snapshot, &mut out)
            .expect("detect failed");
        assert_eq!(out.len(), 1, "margin widens the candidate criterion");
    }

    #[test]
    fn neighbors_across_bin_faces_are_found() {
        // Straddle a bin boundary (bin size 0.4, domain corner at -1):
        // relative coordinates 1.19 and 1.21 land in adjacent bins.
        let (scene, snapshot) = scene_with_spheres(
            &[DVec3::new(0.19, 0.0, 0.0), DVec3::new(0.21, 0.0, 0.0)],
            0.1,
        );
        let mut detector = BinSweepDetector::new();
        let mut out = ContactBatch::default();
        detector
            .detect_contacts(&scene, &snapshot, &mut out)
            .expect("detect failed");
        assert_eq!(out.len(), 1);
    }
}
