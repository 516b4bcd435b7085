//! BVH node and primitive types.
//!
//! Flat arena layout: nodes reference children and triangle ranges by index,
//! which is also what the GPU buffers need.

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: [f32; 3],
    pub max: [f32; 3],
}

impl Aabb {
    pub const EMPTY: Self = Self {
        min: [f32::INFINITY; 3],
        max: [f32::NEG_INFINITY; 3],
    };

    /// Grow to include a point.
    #[inline]
    pub fn grow_point(&mut self, p: [f32; 3]) {
        for i in 0..3 {
            self.min[i] = self.min[i].min(p[i]);
            self.max[i] = self.max[i].max(p[i]);
        }
    }

    /// Grow to include another AABB.
    #[inline]
    pub fn grow(&mut self, other: &Aabb) {
        for i in 0..3 {
            self.min[i] = self.min[i].min(other.min[i]);
            self.max[i] = self.max[i].max(other.max[i]);
        }
    }

    /// Per-axis size.
    #[inline]
    pub fn extent(&self) -> [f32; 3] {
        [
            self.max[0] - self.min[0],
            self.max[1] - self.min[1],
            self.max[2] - self.min[2],
        ]
    }

    /// Longest axis (0=x, 1=y, 2=z).
    #[inline]
    pub fn longest_axis(&self) -> usize {
        let [dx, dy, dz] = self.extent();
        if dx >= dy && dx >= dz {
            0
        } else if dy >= dz {
            1
        } else {
            2
        }
    }

    /// Centroid of the AABB.
    #[inline]
    pub fn centroid(&self) -> [f32; 3] {
        [
            (self.min[0] + self.max[0]) * 0.5,
            (self.min[1] + self.max[1]) * 0.5,
            (self.min[2] + self.max[2]) * 0.5,
        ]
    }

    /// True if `other` lies entirely inside (boundaries inclusive).
    #[inline]
    pub fn contains(&self, other: &Aabb) -> bool {
        (0..3).all(|i| self.min[i] <= other.min[i] && self.max[i] >= other.max[i])
    }
}

/// BVH node.
///
/// Internal node: `tri_count == 0`, left child at `left_first`, right child
/// at `left_first + 1`.
/// Leaf node: `tri_count > 0`, owns `tri_indices[left_first..left_first + tri_count]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BvhNode {
    pub aabb: Aabb,
    pub left_first: u32,
    pub tri_count: u32,
}

impl BvhNode {
    pub const PLACEHOLDER: Self = Self {
        aabb: Aabb::EMPTY,
        left_first: 0,
        tri_count: 0,
    };

    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.tri_count > 0
    }
}

/// World-space triangle used during BVH build (before GPU upload).
#[derive(Debug, Clone, PartialEq)]
pub struct Triangle {
    pub v0: [f32; 3],
    pub v1: [f32; 3],
    pub v2: [f32; 3],
    /// Unweighted average of the three vertices.
    pub centroid: [f32; 3],
    pub material_id: u32,
}

impl Triangle {
    pub fn new(v0: [f32; 3], v1: [f32; 3], v2: [f32; 3], material_id: u32) -> Self {
        let centroid = [
            (v0[0] + v1[0] + v2[0]) / 3.0,
            (v0[1] + v1[1] + v2[1]) / 3.0,
            (v0[2] + v1[2] + v2[2]) / 3.0,
        ];
        Self {
            v0,
            v1,
            v2,
            centroid,
            material_id,
        }
    }

    /// Compute AABB of this triangle.
    pub fn aabb(&self) -> Aabb {
        let mut b = Aabb::EMPTY;
        b.grow_point(self.v0);
        b.grow_point(self.v1);
        b.grow_point(self.v2);
        b
    }

    /// Unit face normal, `normalize(cross(v1 - v0, v2 - v0))`.
    /// Zero for degenerate triangles.
    pub fn face_normal(&self) -> [f32; 3] {
        let v0 = glam::Vec3::from(self.v0);
        let e1 = glam::Vec3::from(self.v1) - v0;
        let e2 = glam::Vec3::from(self.v2) - v0;
        e1.cross(e2).normalize_or_zero().to_array()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aabb_grow_and_axis() {
        let mut b = Aabb::EMPTY;
        b.grow_point([0.0, 0.0, 0.0]);
        b.grow_point([1.0, 4.0, 2.0]);
        assert_eq!(b.extent(), [1.0, 4.0, 2.0]);
        assert_eq!(b.longest_axis(), 1);
        assert_eq!(b.centroid(), [0.5, 2.0, 1.0]);

        let mut inner = Aabb::EMPTY;
        inner.grow_point([0.5, 1.0, 1.0]);
        assert!(b.contains(&inner));
        assert!(!inner.contains(&b));
    }

    #[test]
    fn test_triangle_centroid_and_normal() {
        let t = Triangle::new([0.0, 0.0, 0.0], [3.0, 0.0, 0.0], [0.0, 3.0, 0.0], 7);
        assert_eq!(t.centroid, [1.0, 1.0, 0.0]);
        assert_eq!(t.face_normal(), [0.0, 0.0, 1.0]);
        assert_eq!(t.material_id, 7);

        let degenerate = Triangle::new([0.0; 3], [0.0; 3], [0.0; 3], 0);
        assert_eq!(degenerate.face_normal(), [0.0; 3]);
    }
}
