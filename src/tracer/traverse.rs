//! CPU traversal and shading, mirroring `shaders/trace.wgsl` line for line.
//!
//! Used by the software device and by tests that check tracing results
//! without a GPU. Any change to the shader's math belongs here too.

use glam::{Mat4, Vec2, Vec3, Vec4};

use super::gpu_data::{FrameUniform, GpuMaterial, GpuNode, GpuSceneData, GpuTriangle};

/// Capacity of the explicit traversal stack (WGSL `STACK_SIZE`).
pub const TRAVERSAL_STACK_SIZE: usize = 32;

/// Minimum accepted hit distance.
pub const T_MIN: f32 = 1e-4;

/// Below this, a direction component is nudged so its reciprocal stays finite.
const DIR_EPSILON: f32 = 1e-9;

/// Determinant cutoff for ray/triangle parallelism.
const DET_EPSILON: f32 = 1e-8;

/// NDC depth of the point primary rays are aimed through.
const UNPROJECT_DEPTH: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    /// Unit direction.
    pub dir: Vec3,
}

impl Ray {
    pub fn new(origin: Vec3, dir: Vec3) -> Self {
        Self { origin, dir }
    }

    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + self.dir * t
    }
}

/// Closest (or any) hit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit {
    pub t: f32,
    pub position: Vec3,
    /// Face normal, flipped to face the incoming ray.
    pub normal: Vec3,
    pub material_id: u32,
}

/// Result of one BVH walk.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Traversal {
    pub hit: Option<Hit>,
    /// The stack could not hold a node's children; `hit` is the best found
    /// before traversal stopped.
    pub overflowed: bool,
}

/// Colour of one pixel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Shaded {
    pub color: Vec3,
    pub overflowed: bool,
}

/// Slab test. Returns the entry distance (clamped to 0 when the origin is
/// inside) or `None` when the box is missed or behind the ray.
#[inline]
pub fn intersect_aabb(ray: &Ray, inv_dir: Vec3, min: Vec3, max: Vec3) -> Option<f32> {
    let t0 = (min - ray.origin) * inv_dir;
    let t1 = (max - ray.origin) * inv_dir;
    let t_enter = t0.min(t1).max_element().max(0.0);
    let t_exit = t0.max(t1).min_element();
    (t_exit >= t_enter).then_some(t_enter)
}

/// Möller–Trumbore. Returns `t` for hits beyond [`T_MIN`].
#[inline]
pub fn intersect_triangle(ray: &Ray, v0: Vec3, v1: Vec3, v2: Vec3) -> Option<f32> {
    let e1 = v1 - v0;
    let e2 = v2 - v0;
    let p = ray.dir.cross(e2);
    let det = e1.dot(p);
    if det.abs() < DET_EPSILON {
        return None;
    }
    let inv_det = 1.0 / det;
    let s = ray.origin - v0;
    let u = s.dot(p) * inv_det;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let q = s.cross(e1);
    let v = ray.dir.dot(q) * inv_det;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    let t = e2.dot(q) * inv_det;
    (t > T_MIN).then_some(t)
}

/// Reciprocal direction with near-zero components nudged away from zero.
#[inline]
fn safe_inverse(dir: Vec3) -> Vec3 {
    let nudge = |c: f32| {
        if c.abs() < DIR_EPSILON {
            DIR_EPSILON.copysign(c)
        } else {
            c
        }
    };
    Vec3::new(nudge(dir.x), nudge(dir.y), nudge(dir.z)).recip()
}

/// Borrowed view over unpacked device records.
#[derive(Debug, Clone, Copy)]
pub struct SceneView<'a> {
    pub nodes: &'a [GpuNode],
    pub triangles: &'a [GpuTriangle],
    pub materials: &'a [GpuMaterial],
}

impl<'a> From<&'a GpuSceneData> for SceneView<'a> {
    fn from(data: &'a GpuSceneData) -> Self {
        Self {
            nodes: &data.nodes,
            triangles: &data.triangles,
            materials: &data.materials,
        }
    }
}

impl SceneView<'_> {
    /// Closest hit along the ray.
    pub fn closest_hit(&self, ray: &Ray) -> Traversal {
        self.traverse(ray, false)
    }

    /// Stop at the first hit found (shadow rays).
    pub fn any_hit(&self, ray: &Ray) -> Traversal {
        self.traverse(ray, true)
    }

    fn traverse(&self, ray: &Ray, any_hit: bool) -> Traversal {
        let inv_dir = safe_inverse(ray.dir);
        let mut best_t = f32::INFINITY;
        let mut best: Option<(f32, GpuTriangle)> = None;
        let mut overflowed = false;

        let mut stack = [0u32; TRAVERSAL_STACK_SIZE];
        let mut sp = 1usize;

        while sp > 0 {
            sp -= 1;
            let Some(node) = self.nodes.get(stack[sp] as usize) else {
                continue;
            };
            let Some(t_enter) = intersect_aabb(ray, inv_dir, node.aabb_min.into(), node.aabb_max.into()) else {
                continue;
            };
            if t_enter >= best_t {
                continue;
            }

            if node.tri_count > 0 {
                let first = node.left_first as usize;
                let end = (first + node.tri_count as usize).min(self.triangles.len());
                for tri in &self.triangles[first.min(end)..end] {
                    if let Some(t) = intersect_triangle(ray, tri.v0.into(), tri.v1.into(), tri.v2.into()) {
                        if t < best_t {
                            best_t = t;
                            best = Some((t, *tri));
                        }
                    }
                }
                if any_hit && best.is_some() {
                    break;
                }
            } else if node.left_first != 0 {
                if sp + 2 > TRAVERSAL_STACK_SIZE {
                    overflowed = true;
                    break;
                }
                stack[sp] = node.left_first;
                stack[sp + 1] = node.left_first + 1;
                sp += 2;
            }
        }

        let hit = best.map(|(t, tri)| {
            let mut normal = Vec3::from(tri.normal);
            if normal.dot(ray.dir) > 0.0 {
                normal = -normal;
            }
            Hit {
                t,
                position: ray.at(t),
                normal,
                material_id: tri.material_id,
            }
        });

        Traversal { hit, overflowed }
    }

    fn material(&self, id: u32) -> GpuMaterial {
        self.materials
            .get(id as usize)
            .or_else(|| self.materials.first())
            .copied()
            .unwrap_or_else(bytemuck::Zeroable::zeroed)
    }

    /// Full shading for one primary ray: diffuse, shadow ray, optional
    /// single-bounce reflection.
    pub fn shade(&self, ray: &Ray, frame: &FrameUniform) -> Shaded {
        let primary = self.closest_hit(ray);
        let mut overflowed = primary.overflowed;

        let Some(hit) = primary.hit else {
            return Shaded {
                color: sky_color(ray.dir, frame),
                overflowed,
            };
        };

        let light_dir = Vec3::from(frame.light_dir);
        let mat = self.material(hit.material_id);
        let origin = hit.position + hit.normal * frame.shadow_bias;

        let n_dot_l = hit.normal.dot(light_dir).max(0.0);
        let mut diffuse = Vec3::from(mat.tint) * n_dot_l;
        if n_dot_l > 0.0 {
            let shadow = self.any_hit(&Ray::new(origin, light_dir));
            overflowed |= shadow.overflowed;
            if shadow.hit.is_some() {
                diffuse *= frame.shadow_factor;
            }
        }
        let mut color = Vec3::from(mat.emissive) + diffuse;

        if mat.metallic > frame.metallic_threshold {
            let r = reflect(ray.dir, hit.normal);
            let bounce = self.closest_hit(&Ray::new(origin, r));
            overflowed |= bounce.overflowed;
            let reflected = match bounce.hit {
                Some(h) => lambert(&h, &self.material(h.material_id), light_dir),
                None => sky_color(r, frame),
            };
            color = color.lerp(reflected, mat.metallic);
        }

        Shaded { color, overflowed }
    }

    /// Trace one pixel of a `frame.resolution` image.
    pub fn shade_pixel(&self, frame: &FrameUniform, x: u32, y: u32) -> Shaded {
        self.shade(&primary_ray(frame, x, y), frame)
    }
}

/// Emission plus unshadowed Lambert term (used for reflected hits).
#[inline]
fn lambert(hit: &Hit, mat: &GpuMaterial, light_dir: Vec3) -> Vec3 {
    Vec3::from(mat.emissive) + Vec3::from(mat.tint) * hit.normal.dot(light_dir).max(0.0)
}

/// Mirror `d` about `n` (same as WGSL `reflect`).
#[inline]
pub fn reflect(d: Vec3, n: Vec3) -> Vec3 {
    d - 2.0 * d.dot(n) * n
}

/// Vertical gradient from horizon (looking down) to zenith (looking up).
pub fn sky_color(dir: Vec3, frame: &FrameUniform) -> Vec3 {
    let t = (0.5 * (dir.y + 1.0)).clamp(0.0, 1.0);
    Vec3::from(frame.sky_horizon).lerp(Vec3::from(frame.sky_zenith), t)
}

/// Camera ray through the center of pixel `(x, y)`; `y` grows downward.
pub fn primary_ray(frame: &FrameUniform, x: u32, y: u32) -> Ray {
    let res = Vec2::new(frame.resolution[0] as f32, frame.resolution[1] as f32);
    let uv = (Vec2::new(x as f32, y as f32) + 0.5) / res;
    let ndc = Vec2::new(uv.x * 2.0 - 1.0, 1.0 - uv.y * 2.0);

    // Mid-depth stays finite for infinite and reversed-z projections
    let inv_view_proj = Mat4::from_cols_array_2d(&frame.inv_view_proj);
    let point = inv_view_proj * Vec4::new(ndc.x, ndc.y, UNPROJECT_DEPTH, 1.0);
    let origin = Vec3::from(frame.camera_position);
    let dir = (point.truncate() / point.w - origin).normalize();
    Ray::new(origin, dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::CameraState;
    use crate::tracer::build::build_bvh;
    use crate::tracer::bvh::Triangle;
    use crate::tracer::gpu_data::{pack, ShadingParams};
    use crate::tracer::scene_convert::default_material;

    fn frame(eye: Vec3, w: u32, h: u32) -> FrameUniform {
        let cam = CameraState::look_at(eye, Vec3::ZERO, Vec3::Y, 60f32.to_radians(), w as f32 / h as f32);
        let shading = ShadingParams {
            light_dir: Vec3::Z,
            ..Default::default()
        };
        FrameUniform::new(&cam, &shading, w, h)
    }

    fn scene(tris: &[Triangle]) -> GpuSceneData {
        pack(&build_bvh(tris), tris, &[default_material()])
    }

    #[test]
    fn test_ray_through_centroid_hits_centroid() {
        let tri = Triangle::new([1.0, 0.0, 2.0], [3.0, 1.0, 2.5], [1.5, 2.5, 1.0], 0);
        let c = Vec3::from(tri.centroid);
        let n = Vec3::from(tri.face_normal());
        let ray = Ray::new(c + n * 5.0, -n);

        let t = intersect_triangle(&ray, tri.v0.into(), tri.v1.into(), tri.v2.into()).expect("hit");
        assert!((t - 5.0).abs() < 1e-4);
        assert!((ray.at(t) - c).length() < 1e-4);

        // Same through the BVH, approaching from the back face
        let data = scene(std::slice::from_ref(&tri));
        let back = Ray::new(c - n * 2.0, n);
        let hit = SceneView::from(&data).closest_hit(&back).hit.expect("hit");
        assert!((hit.position - c).length() < 1e-4);
        assert!(hit.normal.dot(back.dir) < 0.0, "normal faces the ray");
    }

    #[test]
    fn test_triangle_miss_and_parallel() {
        let (v0, v1, v2) = (Vec3::ZERO, Vec3::X, Vec3::Y);
        let outside = Ray::new(Vec3::new(2.0, 2.0, 1.0), -Vec3::Z);
        assert!(intersect_triangle(&outside, v0, v1, v2).is_none());
        let parallel = Ray::new(Vec3::new(0.2, 0.2, 0.0), Vec3::X);
        assert!(intersect_triangle(&parallel, v0, v1, v2).is_none());
        let behind = Ray::new(Vec3::new(0.2, 0.2, -1.0), -Vec3::Z);
        assert!(intersect_triangle(&behind, v0, v1, v2).is_none());
    }

    #[test]
    fn test_aabb_slab() {
        let ray = Ray::new(Vec3::new(0.0, 0.0, 5.0), -Vec3::Z);
        let inv = safe_inverse(ray.dir);
        let t = intersect_aabb(&ray, inv, Vec3::splat(-1.0), Vec3::splat(1.0)).expect("hit");
        assert!((t - 4.0).abs() < 1e-5);

        // Axis-parallel ray outside the slab
        let miss = Ray::new(Vec3::new(2.0, 0.0, 5.0), -Vec3::Z);
        assert!(intersect_aabb(&miss, safe_inverse(miss.dir), Vec3::splat(-1.0), Vec3::splat(1.0)).is_none());

        // Origin inside: entry clamps to 0
        let inside = Ray::new(Vec3::ZERO, Vec3::X);
        assert_eq!(intersect_aabb(&inside, safe_inverse(inside.dir), Vec3::splat(-1.0), Vec3::splat(1.0)), Some(0.0));

        // Box behind the ray
        let away = Ray::new(Vec3::new(0.0, 0.0, 5.0), Vec3::Z);
        assert!(intersect_aabb(&away, safe_inverse(away.dir), Vec3::splat(-1.0), Vec3::splat(1.0)).is_none());
    }

    #[test]
    fn test_closest_of_stacked_triangles() {
        let tris: Vec<Triangle> = (0..20)
            .map(|i| {
                let z = -(i as f32);
                Triangle::new([-1.0, -1.0, z], [1.0, -1.0, z], [0.0, 1.0, z], 0)
            })
            .collect();
        let data = scene(&tris);
        let view = SceneView::from(&data);

        let ray = Ray::new(Vec3::new(0.0, 0.0, 3.0), -Vec3::Z);
        let hit = view.closest_hit(&ray).hit.expect("hit");
        assert!((hit.t - 3.0).abs() < 1e-5);

        let from_below = Ray::new(Vec3::new(0.0, 0.0, -30.0), Vec3::Z);
        let hit = view.closest_hit(&from_below).hit.expect("hit");
        assert!((hit.position.z + 19.0).abs() < 1e-4);
        assert!(view.any_hit(&from_below).hit.is_some());
    }

    #[test]
    fn test_sky_gradient() {
        let f = frame(Vec3::Z * 3.0, 4, 4);
        assert_eq!(sky_color(Vec3::Y, &f), Vec3::from(f.sky_zenith));
        assert_eq!(sky_color(-Vec3::Y, &f), Vec3::from(f.sky_horizon));
        let mid = sky_color(Vec3::X, &f);
        assert!((mid - (Vec3::from(f.sky_horizon) + Vec3::from(f.sky_zenith)) * 0.5).length() < 1e-6);
    }

    #[test]
    fn test_primary_ray_center_and_corners() {
        let f = frame(Vec3::new(0.0, 0.0, 4.0), 9, 9);
        let center = primary_ray(&f, 4, 4);
        assert!((center.dir - -Vec3::Z).length() < 1e-4);
        assert_eq!(center.origin, Vec3::new(0.0, 0.0, 4.0));

        let top_left = primary_ray(&f, 0, 0);
        assert!(top_left.dir.x < 0.0 && top_left.dir.y > 0.0);
        let bottom_right = primary_ray(&f, 8, 8);
        assert!(bottom_right.dir.x > 0.0 && bottom_right.dir.y < 0.0);
    }

    #[test]
    fn test_primary_ray_independent_of_depth_convention() {
        let eye = Vec3::new(1.0, 2.0, 4.0);
        let view = Mat4::look_at_rh(eye, Vec3::ZERO, Vec3::Y);
        let projections = [
            Mat4::perspective_rh(1.0, 1.0, 0.1, 100.0),
            Mat4::perspective_infinite_rh(1.0, 1.0, 0.1),
            Mat4::perspective_infinite_reverse_rh(1.0, 1.0, 0.1),
        ];
        let rays: Vec<Ray> = projections
            .iter()
            .map(|&projection| {
                let cam = CameraState::new(view, projection, eye);
                let f = FrameUniform::new(&cam, &ShadingParams::default(), 9, 9);
                primary_ray(&f, 2, 7)
            })
            .collect();

        for ray in &rays {
            assert!(ray.dir.is_finite());
            assert!((ray.dir - rays[0].dir).length() < 1e-4);
        }
    }

    #[test]
    fn test_empty_tree_never_hits() {
        let data = scene(&[]);
        assert_eq!(data.nodes.len(), 1);
        let view = SceneView {
            nodes: &data.nodes,
            triangles: &[],
            materials: &data.materials,
        };
        let t = view.closest_hit(&Ray::new(Vec3::Z, -Vec3::Z));
        assert!(t.hit.is_none());
        assert!(!t.overflowed);
    }

    /// Right-leaning chain: every level leaves a pending left leaf on the
    /// stack, so the stack grows by one per level until it overflows.
    fn deep_chain(depth: usize) -> GpuSceneData {
        let internal = |left_first: u32| GpuNode {
            aabb_min: [-10.0; 3],
            left_first,
            aabb_max: [10.0; 3],
            tri_count: 0,
        };
        let leaf = GpuNode { tri_count: 1, ..internal(0) };

        // Level k owns nodes 2k+1 (left leaf) and 2k+2 (right subtree)
        let mut nodes = vec![internal(1)];
        for level in 0..depth {
            nodes.push(leaf);
            nodes.push(if level + 1 == depth { leaf } else { internal((2 * level + 3) as u32) });
        }

        let tri = Triangle::new([-1.0, -1.0, 0.0], [1.0, -1.0, 0.0], [0.0, 1.0, 0.0], 0).to_gpu();
        GpuSceneData {
            nodes,
            triangles: vec![tri],
            materials: vec![default_material()],
        }
    }

    #[test]
    fn test_stack_overflow_is_bounded() {
        let ray = Ray::new(Vec3::new(0.0, 0.0, 5.0), -Vec3::Z);

        let shallow = deep_chain(8);
        let t = SceneView::from(&shallow).closest_hit(&ray);
        assert!(!t.overflowed);
        assert!(t.hit.is_some());

        let deep = deep_chain(64);
        let t = SceneView::from(&deep).closest_hit(&ray);
        assert!(t.overflowed);

        let f = frame(Vec3::new(0.0, 0.0, 5.0), 3, 3);
        let shaded = SceneView::from(&deep).shade(&ray, &f);
        assert!(shaded.overflowed);
        assert!(shaded.color.is_finite());
    }
}
