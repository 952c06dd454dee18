//! Triad Training Crate
//!
//! Scene management for tiled Gaussian Splatting training. A large scene is
//! split into spatial parts; each part is trained from the cameras that can
//! see it, saved clipped to its bounds, and the clipped results are merged
//! back into one point cloud.
//!
//! ## Modules
//!
//! - [`dataset`]: COLMAP and Blender dataset readers
//! - [`registry`]: Train/test camera lists per resolution scale
//! - [`partition`]: Part manifest loading and camera membership
//! - [`scene`]: Session state and the model slot
//! - [`merge`]: Concatenation of per-part artifacts
//! - [`model`]: The Gaussian model the scene creates, loads and saves

pub mod camera;
pub mod checkpoint;
pub mod config;
pub mod dataset;
pub mod error;
pub mod merge;
pub mod model;
pub mod partition;
pub mod registry;
pub mod scene;

pub use camera::Camera;
pub use config::{LoadIteration, ModelParams, SceneOptions};
pub use error::SceneError;
pub use merge::{MergeError, PointCloudMerger};
pub use model::{GaussianModel, OptimizableModel};
pub use partition::{PartDescriptor, PartitionError, PartitionLoader};
pub use registry::CameraRegistry;
pub use scene::Scene;
