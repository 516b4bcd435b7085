//! Device record layouts and BVH serialization.
//!
//! Every struct here has a WGSL twin in `shaders/trace.wgsl`. Field order,
//! explicit padding and total size must stay in lockstep with the shader;
//! the size assertions below catch the obvious breakages at compile time.

use bytemuck::{Pod, Zeroable};
use glam::Vec3;

use super::build::Bvh;
use super::bvh::{BvhNode, Triangle};
use crate::scene::CameraState;
use crate::util::{Error, Result};

/// BVH node (32 bytes, matches WGSL `Node`).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuNode {
    pub aabb_min: [f32; 3],
    pub left_first: u32,
    pub aabb_max: [f32; 3],
    pub tri_count: u32,
}

/// Triangle with precomputed face normal (64 bytes, matches WGSL `Triangle`).
///
/// Each vec3 sits in its own 16-byte slot; the material index rides in the
/// first slot's fourth lane.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuTriangle {
    pub v0: [f32; 3],
    pub material_id: u32,
    pub v1: [f32; 3],
    pub _pad0: u32,
    pub v2: [f32; 3],
    pub _pad1: u32,
    pub normal: [f32; 3],
    pub _pad2: u32,
}

/// Material params (48 bytes, matches WGSL `Material`).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuMaterial {
    pub tint: [f32; 3],
    pub _pad0: f32,
    pub emissive: [f32; 3],
    pub _pad1: f32,
    pub metallic: f32,
    pub roughness: f32,
    pub _pad2: [f32; 2],
}

/// Per-frame uniform (144 bytes, matches WGSL `Frame`).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct FrameUniform {
    /// Clip space to world space.
    pub inv_view_proj: [[f32; 4]; 4],
    /// Camera world position (primary ray origin).
    pub camera_position: [f32; 3],
    /// Multiplier applied to direct light when the shadow ray is blocked.
    pub shadow_factor: f32,
    /// Unit direction from surfaces toward the light.
    pub light_dir: [f32; 3],
    pub metallic_threshold: f32,
    pub sky_horizon: [f32; 3],
    /// Offset along the normal for secondary ray origins.
    pub shadow_bias: f32,
    pub sky_zenith: [f32; 3],
    pub _pad0: f32,
    pub resolution: [u32; 2],
    pub _pad1: [u32; 2],
}

const _: () = assert!(std::mem::size_of::<GpuNode>() == 32);
const _: () = assert!(std::mem::size_of::<GpuTriangle>() == 64);
const _: () = assert!(std::mem::size_of::<GpuMaterial>() == 48);
const _: () = assert!(std::mem::size_of::<FrameUniform>() == 144);

/// Lighting and sky constants folded into [`FrameUniform`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadingParams {
    /// Direction toward the light; normalized when the uniform is built.
    pub light_dir: Vec3,
    pub shadow_factor: f32,
    pub metallic_threshold: f32,
    pub sky_horizon: Vec3,
    pub sky_zenith: Vec3,
    pub shadow_bias: f32,
}

impl Default for ShadingParams {
    fn default() -> Self {
        Self {
            light_dir: Vec3::new(0.3, 1.0, 0.5).normalize(),
            shadow_factor: 0.2,
            metallic_threshold: 0.5,
            sky_horizon: Vec3::ONE,
            sky_zenith: Vec3::new(0.5, 0.7, 1.0),
            shadow_bias: 1e-3,
        }
    }
}

impl FrameUniform {
    pub fn new(camera: &CameraState, shading: &ShadingParams, width: u32, height: u32) -> Self {
        Self {
            inv_view_proj: camera.inverse_view_proj().to_cols_array_2d(),
            camera_position: camera.position.to_array(),
            shadow_factor: shading.shadow_factor,
            light_dir: shading.light_dir.normalize_or_zero().to_array(),
            metallic_threshold: shading.metallic_threshold,
            sky_horizon: shading.sky_horizon.to_array(),
            shadow_bias: shading.shadow_bias,
            sky_zenith: shading.sky_zenith.to_array(),
            _pad0: 0.0,
            resolution: [width, height],
            _pad1: [0; 2],
        }
    }
}

impl From<&BvhNode> for GpuNode {
    fn from(node: &BvhNode) -> Self {
        Self {
            aabb_min: node.aabb.min,
            left_first: node.left_first,
            aabb_max: node.aabb.max,
            tri_count: node.tri_count,
        }
    }
}

impl Triangle {
    /// Convert to GPU-friendly packed format.
    pub fn to_gpu(&self) -> GpuTriangle {
        GpuTriangle {
            v0: self.v0,
            material_id: self.material_id,
            v1: self.v1,
            _pad0: 0,
            v2: self.v2,
            _pad1: 0,
            normal: self.face_normal(),
            _pad2: 0,
        }
    }
}

/// Complete scene data ready for GPU upload.
#[derive(Debug, Clone, PartialEq)]
pub struct GpuSceneData {
    pub nodes: Vec<GpuNode>,
    /// Triangles in BVH leaf order: leaf ranges index this array directly.
    pub triangles: Vec<GpuTriangle>,
    pub materials: Vec<GpuMaterial>,
}

/// Serialize BVH + triangles + materials.
///
/// Triangles are reordered by the BVH permutation so the GPU needs no
/// separate index indirection.
#[tracing::instrument(skip_all, fields(nodes = bvh.nodes.len(), tris = triangles.len()))]
pub fn pack(bvh: &Bvh, triangles: &[Triangle], materials: &[GpuMaterial]) -> GpuSceneData {
    GpuSceneData {
        nodes: bvh.nodes.iter().map(GpuNode::from).collect(),
        triangles: bvh.tri_indices.iter().map(|&idx| triangles[idx].to_gpu()).collect(),
        materials: materials.to_vec(),
    }
}

impl GpuSceneData {
    /// BVH nodes as bytes.
    pub fn nodes_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.nodes)
    }

    /// Triangle data as bytes.
    pub fn triangles_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.triangles)
    }

    /// Material data as bytes.
    pub fn materials_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.materials)
    }

    /// Rebuild records from raw device bytes.
    pub fn unpack(nodes: &[u8], triangles: &[u8], materials: &[u8]) -> Result<Self> {
        Ok(Self {
            nodes: records("nodes", nodes)?,
            triangles: records("triangles", triangles)?,
            materials: records("materials", materials)?,
        })
    }
}

/// Copy bytes into a record vector. Source alignment does not matter.
fn records<T: Pod>(what: &str, bytes: &[u8]) -> Result<Vec<T>> {
    let stride = std::mem::size_of::<T>();
    if bytes.len() % stride != 0 {
        return Err(Error::BufferLayout(format!(
            "{what}: {} bytes is not a multiple of the {stride}-byte stride",
            bytes.len()
        )));
    }
    Ok(bytemuck::pod_collect_to_vec(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracer::build::build_bvh;
    use std::mem::offset_of;

    fn sample_tris() -> Vec<Triangle> {
        (0..23)
            .map(|i| {
                let f = i as f32;
                Triangle::new([f, 0.0, -f], [f + 1.0, 0.25 * f, 0.0], [f, 2.0, 1.0 / (f + 1.0)], i % 3)
            })
            .collect()
    }

    fn sample_materials() -> Vec<GpuMaterial> {
        (0..3)
            .map(|i| GpuMaterial {
                tint: [0.1 * i as f32, 0.2, 0.3],
                emissive: [0.0, 1.0 / 3.0, i as f32],
                metallic: i as f32 / 2.0,
                roughness: 0.7,
                ..Zeroable::zeroed()
            })
            .collect()
    }

    #[test]
    fn test_field_offsets_match_wgsl() {
        assert_eq!(offset_of!(GpuNode, left_first), 12);
        assert_eq!(offset_of!(GpuNode, aabb_max), 16);
        assert_eq!(offset_of!(GpuNode, tri_count), 28);

        assert_eq!(offset_of!(GpuTriangle, material_id), 12);
        assert_eq!(offset_of!(GpuTriangle, v1), 16);
        assert_eq!(offset_of!(GpuTriangle, v2), 32);
        assert_eq!(offset_of!(GpuTriangle, normal), 48);

        assert_eq!(offset_of!(GpuMaterial, emissive), 16);
        assert_eq!(offset_of!(GpuMaterial, metallic), 32);
        assert_eq!(offset_of!(GpuMaterial, roughness), 36);

        assert_eq!(offset_of!(FrameUniform, camera_position), 64);
        assert_eq!(offset_of!(FrameUniform, shadow_factor), 76);
        assert_eq!(offset_of!(FrameUniform, light_dir), 80);
        assert_eq!(offset_of!(FrameUniform, sky_horizon), 96);
        assert_eq!(offset_of!(FrameUniform, sky_zenith), 112);
        assert_eq!(offset_of!(FrameUniform, resolution), 128);
    }

    #[test]
    fn test_pack_reorders_by_permutation() {
        let tris = sample_tris();
        let bvh = build_bvh(&tris);
        let data = pack(&bvh, &tris, &sample_materials());

        assert_eq!(data.nodes.len(), bvh.nodes.len());
        assert_eq!(data.triangles.len(), tris.len());
        for (slot, &src) in bvh.tri_indices.iter().enumerate() {
            assert_eq!(data.triangles[slot].v0, tris[src].v0);
            assert_eq!(data.triangles[slot].material_id, tris[src].material_id);
        }
        assert_eq!(data.nodes_bytes().len(), bvh.nodes.len() * 32);
        assert_eq!(data.triangles_bytes().len(), tris.len() * 64);
        assert_eq!(data.materials_bytes().len(), 3 * 48);
    }

    #[test]
    fn test_pack_is_deterministic() {
        let tris = sample_tris();
        let mats = sample_materials();
        let a = pack(&build_bvh(&tris), &tris, &mats);
        let b = pack(&build_bvh(&tris), &tris, &mats);
        assert_eq!(a.nodes_bytes(), b.nodes_bytes());
        assert_eq!(a.triangles_bytes(), b.triangles_bytes());
    }

    #[test]
    fn test_buffer_roundtrip_bit_identical() {
        let tris = sample_tris();
        let data = pack(&build_bvh(&tris), &tris, &sample_materials());

        // Shift by one byte so the source is misaligned for every record type
        let shifted = |bytes: &[u8]| {
            let mut v = vec![0u8; bytes.len() + 1];
            v[1..].copy_from_slice(bytes);
            v
        };
        let (n, t, m) = (
            shifted(data.nodes_bytes()),
            shifted(data.triangles_bytes()),
            shifted(data.materials_bytes()),
        );
        let back = GpuSceneData::unpack(&n[1..], &t[1..], &m[1..]).expect("unpack");

        let bits = |v: &[f32]| v.iter().map(|f| f.to_bits()).collect::<Vec<_>>();
        for (a, b) in data.nodes.iter().zip(&back.nodes) {
            assert_eq!(bits(&a.aabb_min), bits(&b.aabb_min));
            assert_eq!(bits(&a.aabb_max), bits(&b.aabb_max));
            assert_eq!((a.left_first, a.tri_count), (b.left_first, b.tri_count));
        }
        for (a, b) in data.triangles.iter().zip(&back.triangles) {
            assert_eq!(bits(&a.v2), bits(&b.v2));
            assert_eq!(bits(&a.normal), bits(&b.normal));
        }
        assert_eq!(back, data);
    }

    #[test]
    fn test_unpack_rejects_partial_record() {
        let err = GpuSceneData::unpack(&[0u8; 33], &[], &[]).unwrap_err();
        assert!(matches!(err, Error::BufferLayout(_)));
        assert!(err.to_string().contains("nodes"));
    }

    #[test]
    fn test_frame_uniform_normalizes_light() {
        let cam = CameraState::look_at(Vec3::Z * 3.0, Vec3::ZERO, Vec3::Y, 1.0, 1.0);
        let shading = ShadingParams {
            light_dir: Vec3::new(0.0, 0.0, 5.0),
            ..Default::default()
        };
        let frame = FrameUniform::new(&cam, &shading, 64, 32);
        assert_eq!(frame.light_dir, [0.0, 0.0, 1.0]);
        assert_eq!(frame.resolution, [64, 32]);
        assert_eq!(frame.camera_position, [0.0, 0.0, 3.0]);
    }
}
