//! Flatten a scene snapshot into world-space triangles and a material table.
//!
//! Bridges the host's per-object meshes to the tracer's [`Triangle`] list
//! for BVH construction.

use std::collections::HashMap;
use std::sync::Arc;

use super::bvh::Triangle;
use super::gpu_data::GpuMaterial;
use crate::scene::{Material, SceneSnapshot};

/// Flattened scene: everything the BVH builder and packer need.
#[derive(Debug, Clone)]
pub struct FlatScene {
    pub triangles: Vec<Triangle>,
    pub materials: Vec<GpuMaterial>,
    /// True when the snapshot produced no triangles and a degenerate
    /// placeholder was injected.
    pub placeholder: bool,
}

/// Walk every retained object and emit its triangles in world space.
///
/// Skips objects that are hidden, have no material, or have no complete
/// triangle. Materials are indexed in first-seen order, keyed by `Arc`
/// identity.
#[tracing::instrument(skip_all, fields(objects = scene.objects.len()))]
pub fn flatten_scene(scene: &SceneSnapshot) -> FlatScene {
    let mut triangles = Vec::new();
    let mut materials = Vec::new();
    let mut material_ids: HashMap<*const Material, u32> = HashMap::new();

    for object in &scene.objects {
        let Some(material) = &object.material else {
            tracing::trace!(name = %object.name, "skipping object without material");
            continue;
        };
        if !object.visible || object.positions.is_empty() || object.indices.len() < 3 {
            continue;
        }

        let key = Arc::as_ptr(material);
        let material_id = material_ids
            .get(&key)
            .copied()
            .unwrap_or(materials.len() as u32);
        let extracted = extract_triangles(&object.positions, &object.indices, &object.model_matrix, material_id);
        if extracted.is_empty() {
            tracing::trace!(name = %object.name, "skipping object without valid triangles");
            continue;
        }

        // Registered only once a triangle references it
        material_ids.entry(key).or_insert_with(|| {
            materials.push(material_from_params(material));
            material_id
        });
        triangles.extend(extracted);
    }

    let placeholder = triangles.is_empty();
    if placeholder {
        // Keeps every device buffer non-empty; zero area, so never hit
        triangles.push(Triangle::new([0.0; 3], [0.0; 3], [0.0; 3], 0));
        materials.clear();
        materials.push(default_material());
    }

    tracing::debug!(
        triangles = triangles.len(),
        materials = materials.len(),
        placeholder,
        "scene flattened"
    );

    FlatScene {
        triangles,
        materials,
        placeholder,
    }
}

/// Extract world-space triangles from an indexed position buffer.
///
/// Triples referencing missing vertices are dropped, as is a trailing
/// partial triple.
pub fn extract_triangles(
    positions: &[[f32; 3]],
    indices: &[u32],
    transform: &glam::Mat4,
    material_id: u32,
) -> Vec<Triangle> {
    let mut tris = Vec::with_capacity(indices.len() / 3);

    for chunk in indices.chunks_exact(3) {
        let (i0, i1, i2) = (chunk[0] as usize, chunk[1] as usize, chunk[2] as usize);
        if i0 >= positions.len() || i1 >= positions.len() || i2 >= positions.len() {
            continue;
        }

        let p0 = transform.transform_point3(glam::Vec3::from(positions[i0]));
        let p1 = transform.transform_point3(glam::Vec3::from(positions[i1]));
        let p2 = transform.transform_point3(glam::Vec3::from(positions[i2]));

        tris.push(Triangle::new(p0.to_array(), p1.to_array(), p2.to_array(), material_id));
    }

    tris
}

/// Convert a host material to its GPU record.
pub fn material_from_params(material: &Material) -> GpuMaterial {
    GpuMaterial {
        tint: material.tint.to_array(),
        _pad0: 0.0,
        emissive: material.emissive.to_array(),
        _pad1: 0.0,
        metallic: material.metallic.clamp(0.0, 1.0),
        roughness: material.roughness.clamp(0.0, 1.0),
        _pad2: [0.0; 2],
    }
}

/// Create a default material (grey diffuse).
pub fn default_material() -> GpuMaterial {
    material_from_params(&Material::default())
}
