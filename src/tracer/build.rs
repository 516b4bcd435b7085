//! Object-median BVH builder.
//!
//! Constructs a flat BVH array from a list of triangles. Each node is split
//! at the midpoint of its longest AABB axis; no surface-area cost is
//! evaluated, which keeps mode activation fast at some cost in trace speed.

use super::bvh::{Aabb, BvhNode, Triangle};
use crate::util::{Error, Result};

/// Maximum triangles per leaf.
pub const MAX_LEAF_SIZE: usize = 4;

/// Built BVH result.
#[derive(Debug, Clone)]
pub struct Bvh {
    /// Flat node array (index 0 = root).
    pub nodes: Vec<BvhNode>,
    /// Permutation of triangle indices; leaves reference ranges of it.
    pub tri_indices: Vec<usize>,
}

/// Shape summary of a built tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BvhStats {
    pub tri_count: usize,
    pub node_count: usize,
    pub leaf_count: usize,
    /// Root has depth 0.
    pub max_depth: usize,
    pub max_leaf_size: usize,
}

/// Build BVH from triangles.
///
/// Returns a flat node array + permuted triangle index list.
/// Triangles are NOT modified; indices map into the original slice.
///
/// An empty input yields a lone root with `tri_count == 0` and
/// `left_first == 0`. Child index 0 can never occur in a real tree, so
/// traversal treats that root as empty.
#[tracing::instrument(skip_all, fields(tri_count = triangles.len()))]
pub fn build_bvh(triangles: &[Triangle]) -> Bvh {
    let n = triangles.len();
    if n == 0 {
        return Bvh {
            nodes: vec![BvhNode::PLACEHOLDER],
            tri_indices: vec![],
        };
    }

    // Working index array (reordered in place by partitioning)
    let mut indices: Vec<usize> = (0..n).collect();

    // A full binary tree with leaves of >= 1 triangle has at most 2n - 1 nodes
    let mut nodes: Vec<BvhNode> = Vec::with_capacity(2 * n);
    nodes.push(BvhNode::PLACEHOLDER);

    // Explicit task stack so degenerate inputs cannot blow the thread stack.
    // Left is pushed last and so processed first: same node order as the
    // recursive formulation.
    struct Task {
        node_idx: usize,
        first: usize,
        count: usize,
    }

    let mut stack = vec![Task {
        node_idx: 0,
        first: 0,
        count: n,
    }];

    while let Some(Task { node_idx, first, count }) = stack.pop() {
        let range = first..first + count;

        let mut node_aabb = Aabb::EMPTY;
        for &idx in &indices[range.clone()] {
            node_aabb.grow(&triangles[idx].aabb());
        }

        if count <= MAX_LEAF_SIZE {
            nodes[node_idx] = BvhNode {
                aabb: node_aabb,
                left_first: first as u32,
                tri_count: count as u32,
            };
            continue;
        }

        let axis = node_aabb.longest_axis();
        let split = node_aabb.centroid()[axis];

        let left_count = partition(&mut indices[range], |&idx| triangles[idx].centroid[axis] < split);

        // All on one side (e.g. identical centroids): split the range evenly
        let left_count = if left_count == 0 || left_count == count {
            count / 2
        } else {
            left_count
        };

        let left_idx = nodes.len();
        nodes.push(BvhNode::PLACEHOLDER);
        nodes.push(BvhNode::PLACEHOLDER);

        nodes[node_idx] = BvhNode {
            aabb: node_aabb,
            left_first: left_idx as u32,
            tri_count: 0,
        };

        stack.push(Task {
            node_idx: left_idx + 1,
            first: first + left_count,
            count: count - left_count,
        });
        stack.push(Task {
            node_idx: left_idx,
            first,
            count: left_count,
        });
    }

    tracing::debug!(nodes = nodes.len(), "bvh built");

    Bvh {
        nodes,
        tri_indices: indices,
    }
}

/// Partition slice in-place. Returns count of elements where predicate is true.
fn partition<T, F>(slice: &mut [T], pred: F) -> usize
where
    F: Fn(&T) -> bool,
{
    let mut left = 0;
    let mut right = slice.len();
    while left < right {
        if pred(&slice[left]) {
            left += 1;
        } else {
            right -= 1;
            slice.swap(left, right);
        }
    }
    left
}

impl Bvh {
    pub fn root(&self) -> &BvhNode {
        &self.nodes[0]
    }

    /// Walk the tree once and summarize its shape.
    pub fn stats(&self) -> BvhStats {
        let mut stats = BvhStats {
            tri_count: self.tri_indices.len(),
            node_count: self.nodes.len(),
            ..Default::default()
        };
        if self.tri_indices.is_empty() {
            return stats;
        }

        let mut stack = vec![(0usize, 0usize)];
        while let Some((idx, depth)) = stack.pop() {
            let node = &self.nodes[idx];
            stats.max_depth = stats.max_depth.max(depth);
            if node.is_leaf() {
                stats.leaf_count += 1;
                stats.max_leaf_size = stats.max_leaf_size.max(node.tri_count as usize);
            } else {
                let left = node.left_first as usize;
                stack.push((left, depth + 1));
                stack.push((left + 1, depth + 1));
            }
        }
        stats
    }

    /// Check the structural invariants against the source triangles:
    /// child indices in bounds and after their parent, parent boxes
    /// containing child boxes, leaf boxes containing their triangles, leaf
    /// size bound, and leaf ranges covering every triangle exactly once.
    pub fn validate(&self, triangles: &[Triangle]) -> Result<()> {
        let n = triangles.len();
        if self.tri_indices.len() != n {
            return Err(Error::invalid_bvh(format!(
                "permutation has {} entries for {} triangles",
                self.tri_indices.len(),
                n
            )));
        }
        if n == 0 {
            return Ok(());
        }

        let mut owned = vec![false; n];
        let mut stack = vec![0usize];
        while let Some(idx) = stack.pop() {
            let node = &self.nodes[idx];
            if node.is_leaf() {
                if node.tri_count as usize > MAX_LEAF_SIZE {
                    return Err(Error::invalid_bvh(format!(
                        "leaf {idx} holds {} triangles",
                        node.tri_count
                    )));
                }
                let first = node.left_first as usize;
                let end = first + node.tri_count as usize;
                if end > n {
                    return Err(Error::invalid_bvh(format!("leaf {idx} range {first}..{end} out of bounds")));
                }
                for &tri in &self.tri_indices[first..end] {
                    if tri >= n || std::mem::replace(&mut owned[tri], true) {
                        return Err(Error::invalid_bvh(format!("triangle {tri} missing or referenced twice")));
                    }
                    if !node.aabb.contains(&triangles[tri].aabb()) {
                        return Err(Error::invalid_bvh(format!("leaf {idx} does not contain triangle {tri}")));
                    }
                }
            } else {
                let left = node.left_first as usize;
                if left <= idx || left + 1 >= self.nodes.len() {
                    return Err(Error::invalid_bvh(format!("node {idx} has bad child index {left}")));
                }
                for child in [left, left + 1] {
                    if !node.aabb.contains(&self.nodes[child].aabb) {
                        return Err(Error::invalid_bvh(format!("node {idx} does not contain child {child}")));
                    }
                    stack.push(child);
                }
            }
        }

        match owned.iter().position(|&o| !o) {
            Some(tri) => Err(Error::invalid_bvh(format!("triangle {tri} not owned by any leaf"))),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_tri(cx: f32, cy: f32, cz: f32) -> Triangle {
        Triangle::new(
            [cx - 0.5, cy - 0.5, cz],
            [cx + 0.5, cy - 0.5, cz],
            [cx, cy + 0.5, cz],
            0,
        )
    }

    /// Cheap deterministic scatter (no RNG dependency).
    fn scatter(n: usize) -> Vec<Triangle> {
        (0..n)
            .map(|i| {
                let f = i as f32;
                make_tri((f * 7.31).sin() * 20.0, (f * 3.17).cos() * 20.0, (f * 1.73).sin() * 5.0)
            })
            .collect()
    }

    #[test]
    fn test_empty_bvh() {
        let bvh = build_bvh(&[]);
        assert_eq!(bvh.nodes.len(), 1);
        assert_eq!(bvh.tri_indices.len(), 0);
        assert_eq!(bvh.root().left_first, 0);
        assert!(!bvh.root().is_leaf());
        assert!(bvh.validate(&[]).is_ok());
    }

    #[test]
    fn test_single_triangle() {
        let tris = vec![make_tri(0.0, 0.0, 0.0)];
        let bvh = build_bvh(&tris);
        assert_eq!(bvh.nodes.len(), 1); // just a leaf
        assert_eq!(bvh.nodes[0].tri_count, 1);
        assert_eq!(bvh.tri_indices, vec![0]);
    }

    #[test]
    fn test_leaf_count_correct() {
        // 4 triangles -> exactly one leaf
        let tris: Vec<Triangle> = (0..4).map(|i| make_tri(i as f32, 0.0, 0.0)).collect();
        let bvh = build_bvh(&tris);
        assert_eq!(bvh.nodes.len(), 1);
        assert_eq!(bvh.nodes[0].tri_count, 4);
    }

    #[test]
    fn test_many_triangles_builds_tree() {
        // 100 triangles spread along X axis -> should split into a tree
        let tris: Vec<Triangle> = (0..100).map(|i| make_tri(i as f32 * 2.0, 0.0, 0.0)).collect();
        let bvh = build_bvh(&tris);

        assert!(bvh.nodes.len() > 1, "BVH should have internal nodes");

        let mut sorted = bvh.tri_indices.clone();
        sorted.sort();
        assert_eq!(sorted, (0..100).collect::<Vec<_>>());

        let root = bvh.root();
        assert!(root.aabb.min[0] <= -0.5);
        assert!(root.aabb.max[0] >= 198.5);
        bvh.validate(&tris).expect("valid tree");
    }

    #[test]
    fn test_first_split_is_spatial_median() {
        // 10 triangles along X: centroids 0..9, root extent -0.5..9.5, split at 4.5
        let tris: Vec<Triangle> = (0..10).map(|i| make_tri(i as f32, 0.0, 0.0)).collect();
        let bvh = build_bvh(&tris);
        let root = bvh.root();
        assert_eq!(root.tri_count, 0);
        assert_eq!(root.left_first, 1, "children allocated right after root");

        let left = &bvh.nodes[1];
        let right = &bvh.nodes[2];
        assert!(left.aabb.max[0] <= 4.5);
        assert!(right.aabb.min[0] >= 4.5);
    }

    #[test]
    fn test_children_contiguous_and_contained() {
        let tris = scatter(500);
        let bvh = build_bvh(&tris);
        for (i, node) in bvh.nodes.iter().enumerate() {
            if node.is_leaf() {
                continue;
            }
            let l = node.left_first as usize;
            assert!(l > i);
            assert!(node.aabb.contains(&bvh.nodes[l].aabb));
            assert!(node.aabb.contains(&bvh.nodes[l + 1].aabb));
        }
        for tri in &tris {
            assert!(bvh.root().aabb.contains(&tri.aabb()));
        }
    }

    #[test]
    fn test_partition_complete_and_leaf_bound() {
        for n in [1, 2, 5, 17, 64, 333, 1000] {
            let tris = scatter(n);
            let bvh = build_bvh(&tris);
            bvh.validate(&tris).unwrap_or_else(|e| panic!("n={n}: {e}"));
            let stats = bvh.stats();
            assert!(stats.max_leaf_size <= MAX_LEAF_SIZE);
            assert_eq!(stats.tri_count, n);
            // Every node is either the root or one of a sibling pair
            assert_eq!(stats.node_count % 2, 1);
            assert_eq!(stats.leaf_count, stats.node_count / 2 + 1);
        }
    }

    #[test]
    fn test_identical_centroids_fall_back_to_half_split() {
        let tris: Vec<Triangle> = (0..64).map(|_| make_tri(1.0, 1.0, 1.0)).collect();
        let bvh = build_bvh(&tris);
        bvh.validate(&tris).expect("valid tree");

        let stats = bvh.stats();
        // 64 -> 32 -> 16 -> 8 -> 4: balanced despite zero centroid spread
        assert_eq!(stats.max_depth, 4);
        assert_eq!(stats.leaf_count, 16);
    }

    #[test]
    fn test_validate_rejects_duplicate_index() {
        let tris = scatter(40);
        let mut bvh = build_bvh(&tris);
        bvh.tri_indices[1] = bvh.tri_indices[0];
        assert!(matches!(bvh.validate(&tris), Err(Error::InvalidBvh(_))));
    }

    #[test]
    fn test_partition_helper() {
        let mut v = vec![5, 1, 8, 2, 9, 3];
        let k = partition(&mut v, |&x| x < 5);
        assert_eq!(k, 3);
        assert!(v[..k].iter().all(|&x| x < 5));
        assert!(v[k..].iter().all(|&x| x >= 5));
    }
}
