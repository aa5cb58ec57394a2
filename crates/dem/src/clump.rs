//! Clump templates, materials, and the frozen geometry catalog.
//!
//! A clump is a rigid union of overlapping spheres. Its shape is defined
//! once as a template (radii, sphere offsets relative to the center of
//! mass, per-sphere materials, aggregate mass and principal moments of
//! inertia) and shared by every instance. At `initialize()` all templates
//! are flattened into `GeometryTables`, the read-only catalog both worker
//! stages index into.

use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Surface material for contact-force evaluation.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Material {
    /// Normal contact stiffness (N/m).
    pub normal_stiffness: f32,
    /// Viscous damping ratio (0 = elastic, 1 = critically damped).
    pub damping_ratio: f32,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            normal_stiffness: 5e6,
            damping_ratio: 0.3,
        }
    }
}

/// A clump shape prototype shared by many clump instances.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClumpTemplate {
    /// Total mass (kg).
    pub mass: f32,
    /// Principal moments of inertia (kg·m²), body frame.
    pub moi: Vec3,
    /// Component sphere radii (m).
    pub radii: Vec<f32>,
    /// Component sphere centers relative to the center of mass (m).
    pub rel_pos: Vec<Vec3>,
    /// Material id per component sphere.
    pub materials: Vec<u32>,
}

impl ClumpTemplate {
    /// Single-sphere template: MOI of a solid sphere about its center.
    pub fn simple_sphere(mass: f32, radius: f32, material: u32) -> Self {
        let i = 0.4 * mass * radius * radius;
        Self {
            mass,
            moi: Vec3::splat(i),
            radii: vec![radius],
            rel_pos: vec![Vec3::ZERO],
            materials: vec![material],
        }
    }

    pub fn sphere_count(&self) -> usize {
        self.radii.len()
    }

    /// Radius of the sphere bounding every component.
    pub fn bounding_radius(&self) -> f32 {
        self.radii
            .iter()
            .zip(&self.rel_pos)
            .map(|(r, p)| p.length() + r)
            .fold(0.0f32, f32::max)
    }
}

/// Index into the upper-triangle material-pair proxy tables.
///
/// For materials `a`, `b` out of `n`, with the smaller index first.
#[inline]
pub fn pair_offset(a: u32, b: u32, n: usize) -> usize {
    let (i, j) = if a <= b { (a, b) } else { (b, a) };
    let (i, j) = (i as usize, j as usize);
    i * n - i * (i + 1) / 2 + j
}

/// Read-only geometry catalog, flattened from the scene's templates at
/// initialization and shared by both stages.
///
/// Per-sphere arrays map each physical sphere back to its owner clump,
/// its slot in the flattened component arrays, and its material.
#[derive(Clone, Debug, Default)]
pub struct GeometryTables {
    // Per template.
    pub mass: Vec<f32>,
    pub moi: Vec<Vec3>,
    /// Start of each template's run in the flattened component arrays.
    pub component_prescan: Vec<u32>,

    // Flattened per distinct component.
    pub comp_radius: Vec<f32>,
    pub comp_rel_pos: Vec<Vec3>,
    pub comp_material: Vec<u32>,

    // Per physical sphere.
    pub owner: Vec<u32>,
    pub component_offset: Vec<u32>,

    // Material-pair proxies, upper triangle of the n_materials matrix.
    pub stiffness_proxy: Vec<f32>,
    pub damping_proxy: Vec<f32>,
    pub n_materials: usize,
}

impl GeometryTables {
    /// Flatten templates and instances into the catalog.
    ///
    /// `clump_templates[i]` is the template id of clump instance `i`.
    pub fn build(
        templates: &[ClumpTemplate],
        materials: &[Material],
        clump_templates: &[u32],
    ) -> Self {
        let mut tables = Self {
            n_materials: materials.len(),
            ..Self::default()
        };

        // Template-level arrays plus the component prescan, exactly one
        // run of component slots per distinct template.
        let mut offset = 0u32;
        for t in templates {
            tables.mass.push(t.mass);
            tables.moi.push(t.moi);
            tables.component_prescan.push(offset);
            for k in 0..t.sphere_count() {
                tables.comp_radius.push(t.radii[k]);
                tables.comp_rel_pos.push(t.rel_pos[k]);
                tables.comp_material.push(t.materials[k]);
            }
            offset += t.sphere_count() as u32;
        }

        // Per-sphere back-maps for every clump instance.
        for (clump_id, &template_id) in clump_templates.iter().enumerate() {
            let t = &templates[template_id as usize];
            let base = tables.component_prescan[template_id as usize];
            for k in 0..t.sphere_count() {
                tables.owner.push(clump_id as u32);
                tables.component_offset.push(base + k as u32);
            }
        }

        // Pairwise material proxies: series-spring stiffness, averaged
        // damping ratio.
        let n = materials.len();
        tables.stiffness_proxy = vec![0.0; n * (n + 1) / 2];
        tables.damping_proxy = vec![0.0; n * (n + 1) / 2];
        for i in 0..n {
            for j in i..n {
                let (a, b) = (&materials[i], &materials[j]);
                let k_pair = if a.normal_stiffness + b.normal_stiffness > 0.0 {
                    2.0 * a.normal_stiffness * b.normal_stiffness
                        / (a.normal_stiffness + b.normal_stiffness)
                } else {
                    0.0
                };
                let idx = pair_offset(i as u32, j as u32, n);
                tables.stiffness_proxy[idx] = k_pair;
                tables.damping_proxy[idx] = 0.5 * (a.damping_ratio + b.damping_ratio);
            }
        }

        tables
    }

    pub fn n_spheres(&self) -> usize {
        self.owner.len()
    }

    /// Radius of sphere `sph`.
    #[inline]
    pub fn sphere_radius(&self, sph: u32) -> f32 {
        self.comp_radius[self.component_offset[sph as usize] as usize]
    }

    /// Body-frame offset of sphere `sph` from its owner's center of mass.
    #[inline]
    pub fn sphere_rel_pos(&self, sph: u32) -> Vec3 {
        self.comp_rel_pos[self.component_offset[sph as usize] as usize]
    }

    /// Material id of sphere `sph`.
    #[inline]
    pub fn sphere_material(&self, sph: u32) -> u32 {
        self.comp_material[self.component_offset[sph as usize] as usize]
    }

    /// Pair proxies (stiffness, damping ratio) for two spheres in contact.
    #[inline]
    pub fn contact_proxies(&self, sph_a: u32, sph_b: u32) -> (f32, f32) {
        let idx = pair_offset(
            self.sphere_material(sph_a),
            self.sphere_material(sph_b),
            self.n_materials,
        );
        (self.stiffness_proxy[idx], self.damping_proxy[idx])
    }

    /// Largest component sphere radius in the catalog.
    pub fn max_sphere_radius(&self) -> f32 {
        self.comp_radius.iter().copied().fold(0.0f32, f32::max)
    }
}
