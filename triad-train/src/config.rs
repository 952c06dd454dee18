//! Scene configuration

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Dataset and output settings for a training session.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelParams {
    /// Dataset root (COLMAP or Blender layout).
    pub source_path: PathBuf,
    /// Output directory for snapshots and checkpoints.
    pub model_path: PathBuf,
    /// Image directory name inside `source_path` (COLMAP datasets).
    pub images: String,
    /// Hold out test cameras.
    pub eval: bool,
    pub white_background: bool,
    pub sh_degree: u32,
    /// `1`, `2`, `4`, `8` divide the image size, `-1` caps the width at 1600,
    /// any other positive value is a target width.
    pub resolution: i32,
    /// Every `llffhold`-th COLMAP camera becomes a test camera when `eval` is set.
    pub llffhold: usize,
    /// Overrides the dataset-derived normalization radius.
    pub cameras_extent: Option<f32>,
    /// Decode images while building the camera lists.
    pub load_images: bool,
    /// Partition manifest; defaults to `<source_path>/parted/parts.json`.
    pub parts_manifest: Option<PathBuf>,
}

impl ModelParams {
    pub fn new(source_path: impl Into<PathBuf>, model_path: impl Into<PathBuf>) -> Self {
        Self {
            source_path: source_path.into(),
            model_path: model_path.into(),
            ..Self::default()
        }
    }

    /// Load parameters from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parts_manifest_path(&self) -> PathBuf {
        self.parts_manifest
            .clone()
            .unwrap_or_else(|| self.source_path.join("parted").join("parts.json"))
    }
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            source_path: PathBuf::new(),
            model_path: PathBuf::new(),
            images: "images".to_string(),
            eval: false,
            white_background: false,
            sh_degree: 3,
            resolution: -1,
            llffhold: 8,
            cameras_extent: None,
            load_images: true,
            parts_manifest: None,
        }
    }
}

/// Which checkpoint iteration to resume from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadIteration {
    /// Highest `iteration_<N>` found under `<model_path>/point_cloud`.
    Latest,
    At(u32),
}

impl LoadIteration {
    /// Map the conventional integer flag: `-1` is latest, positive values are
    /// explicit iterations, anything else means a fresh run.
    pub fn from_flag(flag: i64) -> Option<Self> {
        match flag {
            -1 => Some(Self::Latest),
            n if n > 0 => u32::try_from(n).ok().map(Self::At),
            _ => None,
        }
    }
}

/// Construction options for [`crate::Scene`].
#[derive(Debug, Clone, PartialEq)]
pub struct SceneOptions {
    pub load_iteration: Option<LoadIteration>,
    pub shuffle: bool,
    pub resolution_scales: Vec<f32>,
}

impl Default for SceneOptions {
    fn default() -> Self {
        Self {
            load_iteration: None,
            shuffle: true,
            resolution_scales: vec![1.0],
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
