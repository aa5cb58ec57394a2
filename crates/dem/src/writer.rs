//! CSV output: the scene as world-space component spheres.
//!
//! One row per physical sphere (`x,y,z,r`), positions reconstructed from
//! the split voxel encoding plus the owner's orientation applied to the
//! component offset. Meant for quick plotting and regression diffs, not
//! for checkpointing.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::clump::GeometryTables;
use crate::params::SimParams;
use crate::state::ClumpState;
use crate::SolverError;

/// Write every component sphere as a `x,y,z,r` row.
pub fn write_spheres_csv<W: Write>(
    out: &mut W,
    params: &SimParams,
    geom: &GeometryTables,
    state: &ClumpState,
) -> Result<(), SolverError> {
    writeln!(out, "x,y,z,r")?;
    for sph in 0..geom.n_spheres() as u32 {
        let owner = geom.owner[sph as usize] as usize;
        let center = state.world_position(params, owner);
        let offset = state.ori[owner] * geom.sphere_rel_pos(sph);
        let pos = center + offset.as_dvec3();
        writeln!(
            out,
            "{},{},{},{}",
            pos.x,
            pos.y,
            pos.z,
            geom.sphere_radius(sph)
        )?;
    }
    Ok(())
}

/// Path convenience wrapper around [`write_spheres_csv`].
pub fn write_spheres_csv_file(
    path: impl AsRef<Path>,
    params: &SimParams,
    geom: &GeometryTables,
    state: &ClumpState,
) -> Result<(), SolverError> {
    let mut out = BufWriter::new(File::create(path.as_ref())?);
    write_spheres_csv(&mut out, params, geom, state)?;
    out.flush()?;
    log::info!(
        "wrote {} spheres to {}",
        geom.n_spheres(),
        path.as_ref().display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clump::{ClumpTemplate, Material};
    use crate::state::encode_position;
    use glam::DVec3;

    #[test]
    fn rows_match_sphere_count_and_decode() {
        let mut params = SimParams::default();
        params.nv_x_p2 = 8;
        params.nv_y_p2 = 8;
        params.nv_z_p2 = 8;
        params.l = 1e-6;
        params.lbf = DVec3::splat(-1.0);
        params.derive_geometry();

        let geom = GeometryTables::build(
            &[ClumpTemplate::simple_sphere(1.0, 0.25, 0)],
            &[Material::default()],
            &[0],
        );
        let mut state = ClumpState::with_len(1);
        let (voxel, loc) = encode_position(&params, DVec3::new(0.5, 0.0, 0.0));
        state.voxel[0] = voxel;
        state.loc[0] = loc;

        let mut buf = Vec::new();
        write_spheres_csv(&mut buf, &params, &geom, &state).expect("write failed");
        let text = String::from_utf8(buf).expect("utf8");
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("x,y,z,r"));

        let row = lines.next().expect("one sphere row");
        let cols: Vec<f64> = row.split(',').map(|c| c.parse().expect("number")).collect();
        assert!((cols[0] - 0.5).abs() < 1e-5);
        assert!((cols[3] - 0.25).abs() < 1e-6);
        assert!(lines.next().is_none());
    }
}
