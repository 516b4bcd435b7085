//! Read-only scene snapshot handed over by the host viewport.
//!
//! The tracer never sees the host's scene graph. On mode entry the host
//! copies what is needed into a [`SceneSnapshot`]; later edits to the live
//! scene are invisible until the mode is re-entered.

use std::sync::Arc;

use glam::{Mat4, Vec3};

/// Surface material as seen by the tracer.
///
/// Deduplication is by identity: objects sharing one `Arc<Material>` share
/// one GPU record, two equal but distinct allocations get two records.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Material {
    /// Base color / tint (linear RGB).
    pub tint: Vec3,
    /// Emitted color added on top of lighting.
    pub emissive: Vec3,
    /// 0 = dielectric, 1 = mirror. Above the reflection threshold a
    /// reflection ray is traced and blended by this weight.
    pub metallic: f32,
    pub roughness: f32,
}

impl Material {
    /// Plain diffuse surface.
    pub fn diffuse(tint: Vec3) -> Self {
        Self {
            tint,
            emissive: Vec3::ZERO,
            metallic: 0.0,
            roughness: 0.5,
        }
    }

    /// Metallic surface with the given tint.
    pub fn metal(tint: Vec3, roughness: f32) -> Self {
        Self {
            tint,
            emissive: Vec3::ZERO,
            metallic: 1.0,
            roughness,
        }
    }

    /// Unlit surface that only emits `color`.
    pub fn emissive(color: Vec3) -> Self {
        Self {
            tint: Vec3::ZERO,
            emissive: color,
            metallic: 0.0,
            roughness: 1.0,
        }
    }
}

impl Default for Material {
    fn default() -> Self {
        Self::diffuse(Vec3::splat(0.8))
    }
}

/// One renderable object: a triangle soup in object space plus its transform.
#[derive(Debug, Clone)]
pub struct SceneObject {
    pub name: String,
    /// Object-to-world transform.
    pub model_matrix: Mat4,
    pub positions: Vec<[f32; 3]>,
    /// Triangle list, three indices per triangle.
    pub indices: Vec<u32>,
    pub material: Option<Arc<Material>>,
    /// Hidden objects are skipped by the flattener.
    pub visible: bool,
}

impl SceneObject {
    pub fn new(name: impl Into<String>, positions: Vec<[f32; 3]>, indices: Vec<u32>) -> Self {
        Self {
            name: name.into(),
            model_matrix: Mat4::IDENTITY,
            positions,
            indices,
            material: None,
            visible: true,
        }
    }

    /// Axis-aligned rectangle in the XY plane centered at the origin,
    /// wound counter-clockwise when seen from +Z.
    pub fn plane_xy(name: impl Into<String>, half_width: f32, half_height: f32) -> Self {
        let (w, h) = (half_width, half_height);
        Self::new(
            name,
            vec![[-w, -h, 0.0], [w, -h, 0.0], [w, h, 0.0], [-w, h, 0.0]],
            vec![0, 1, 2, 0, 2, 3],
        )
    }

    pub fn with_transform(mut self, model_matrix: Mat4) -> Self {
        self.model_matrix = model_matrix;
        self
    }

    pub fn with_material(mut self, material: Arc<Material>) -> Self {
        self.material = Some(material);
        self
    }

    pub fn with_visible(mut self, visible: bool) -> Self {
        self.visible = visible;
        self
    }

    /// Number of complete index triples.
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }
}

/// Point-in-time copy of the host scene.
#[derive(Debug, Clone, Default)]
pub struct SceneSnapshot {
    pub objects: Vec<SceneObject>,
}

impl SceneSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, object: SceneObject) -> &mut Self {
        self.objects.push(object);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

/// Camera matrices for one frame.
///
/// `projection` maps depth to 0..1 (wgpu convention). Finite, infinite and
/// reversed-z perspective projections all work; primary rays are
/// reconstructed through a point at NDC depth 0.5.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraState {
    pub view: Mat4,
    pub projection: Mat4,
    /// Camera world position (ray origin).
    pub position: Vec3,
}

impl CameraState {
    pub fn new(view: Mat4, projection: Mat4, position: Vec3) -> Self {
        Self { view, projection, position }
    }

    /// Perspective camera looking from `eye` at `target`. `fov_y` in radians.
    pub fn look_at(eye: Vec3, target: Vec3, up: Vec3, fov_y: f32, aspect: f32) -> Self {
        Self {
            view: Mat4::look_at_rh(eye, target, up),
            projection: Mat4::perspective_rh(fov_y, aspect, 0.1, 1000.0),
            position: eye,
        }
    }

    pub fn view_proj(&self) -> Mat4 {
        self.projection * self.view
    }

    /// Clip space back to world space.
    pub fn inverse_view_proj(&self) -> Mat4 {
        self.view_proj().inverse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plane_xy() {
        let quad = SceneObject::plane_xy("floor", 2.0, 1.0);
        assert_eq!(quad.triangle_count(), 2);
        assert_eq!(quad.positions[2], [2.0, 1.0, 0.0]);
        assert!(quad.visible);
        assert!(quad.material.is_none());
    }

    #[test]
    fn test_camera_center_maps_to_target() {
        let cam = CameraState::look_at(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, Vec3::Y, 1.0, 1.0);
        let clip = cam.view_proj() * glam::Vec4::new(0.0, 0.0, 0.0, 1.0);
        let ndc = clip.truncate() / clip.w;
        assert!(ndc.x.abs() < 1e-6 && ndc.y.abs() < 1e-6);
        assert!(ndc.z > 0.0 && ndc.z < 1.0);

        let back = cam.inverse_view_proj() * glam::Vec4::new(ndc.x, ndc.y, ndc.z, 1.0);
        assert!((back.truncate() / back.w).length() < 1e-3);
    }
}
