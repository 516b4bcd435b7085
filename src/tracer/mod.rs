//! Ray tracer: WGSL compute shader with a CPU mirror.
//!
//! Provides BVH acceleration structure, device buffer serialization,
//! traversal/shading, and the trace + composite stages.
//!
//! ## Architecture
//! ```text
//! SceneSnapshot → flatten → BVH build (CPU, object median) → packed records
//!   → device buffers → trace (compute) → output image → composite → target
//! ```

pub mod build;
pub mod bvh;
pub mod composite;
#[cfg(feature = "gpu")]
pub mod compute;
pub mod gpu_data;
pub mod scene_convert;
pub mod traverse;

pub use build::{build_bvh, Bvh, BvhStats};
pub use composite::Framebuffer;
#[cfg(feature = "gpu")]
pub use compute::TraceCompute;
pub use gpu_data::{FrameUniform, GpuSceneData, ShadingParams};
pub use scene_convert::{flatten_scene, FlatScene};
pub use traverse::SceneView;
