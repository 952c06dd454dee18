use std::path::PathBuf;
use thiserror::Error;
use triad_data::PlyError;

use crate::dataset::DatasetError;
use crate::merge::MergeError;
use crate::model::ModelError;
use crate::partition::PartitionError;

/// Errors surfaced by [`crate::Scene`].
#[derive(Debug, Error)]
pub enum SceneError {
    #[error("Dataset error: {0}")]
    Dataset(#[from] DatasetError),

    #[error("Partition error: {0}")]
    Partition(#[from] PartitionError),

    #[error("Merge error: {0}")]
    Merge(#[from] MergeError),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("PLY error: {0}")]
    Ply(#[from] PlyError),

    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("No iteration_<N> checkpoint found under {0}")]
    NoCheckpoint(PathBuf),

    #[error("Resolution scale {0} was not loaded")]
    UnknownScale(f32),

    #[error("No model has been created, call replace_model first")]
    NoModel,
}

impl SceneError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io { path, source }
    }
}
