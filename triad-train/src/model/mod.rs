//! Optimizable point-set models
//!
//! The scene only constructs, initializes, loads and saves models; the
//! optimization itself happens elsewhere behind [`OptimizableModel`].

pub mod gaussian;
pub mod sh;

pub use gaussian::GaussianModel;

use std::path::Path;
use thiserror::Error;
use triad_data::{Bounds, PlyError, PointCloud};

/// Contract between the scene and the model being trained.
pub trait OptimizableModel: Sized {
    fn new(sh_degree: u32) -> Self;

    /// Seed the model from the dataset's initial point cloud.
    fn create_from_point_cloud(&mut self, cloud: &PointCloud, spatial_lr_scale: f32);

    /// Replace the model state with a checkpoint artifact.
    fn load_ply(&mut self, path: &Path) -> Result<(), ModelError>;

    /// Persist the model, keeping only points inside `bounds` when given.
    fn save_ply(&self, path: &Path, bounds: Option<&Bounds>) -> Result<(), ModelError>;

    fn point_count(&self) -> usize;
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Model PLY error: {0}")]
    Ply(#[from] PlyError),

    #[error("IO error at {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Checkpoint holds {found} f_rest properties, SH degree {sh_degree} needs {expected}")]
    ShDegreeMismatch {
        sh_degree: u32,
        expected: usize,
        found: usize,
    },
}
