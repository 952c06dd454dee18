//! Dataset readers
//!
//! Recognizes the on-disk layout of a dataset and turns it into camera
//! descriptions plus the initial point cloud:
//! - COLMAP text models (`sparse/0/*.txt`)
//! - Blender synthetic scenes (`transforms_train.json`)

pub mod blender;
pub mod colmap;

use glam::{Mat3, Mat4, Vec3};
use rand::Rng;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;
use triad_data::{PlyError, PointCloud};

use crate::config::ModelParams;

/// Camera as described by a dataset, before any image is decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraInfo {
    pub uid: u32,
    /// World-to-camera rotation, stored transposed.
    pub rotation: Mat3,
    pub translation: Vec3,
    pub fov_x: f32,
    pub fov_y: f32,
    pub image_path: PathBuf,
    pub image_name: String,
    pub width: u32,
    pub height: u32,
}

impl CameraInfo {
    pub fn world_to_view(&self) -> Mat4 {
        world_to_view(self.rotation, self.translation)
    }

    pub fn center(&self) -> Vec3 {
        self.world_to_view().inverse().w_axis.truncate()
    }
}

/// Center and radius enclosing the training camera positions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NerfNormalization {
    pub translate: Vec3,
    pub radius: f32,
}

impl NerfNormalization {
    pub fn from_cameras(cameras: &[CameraInfo]) -> Self {
        if cameras.is_empty() {
            return Self {
                translate: Vec3::ZERO,
                radius: 0.0,
            };
        }
        let centers: Vec<Vec3> = cameras.iter().map(CameraInfo::center).collect();
        let center = centers.iter().copied().sum::<Vec3>() / centers.len() as f32;
        let diagonal = centers
            .iter()
            .map(|c| c.distance(center))
            .fold(0.0f32, f32::max);
        Self {
            translate: -center,
            radius: diagonal * 1.1,
        }
    }
}

/// Everything a dataset contributes to a scene.
#[derive(Debug, Clone)]
pub struct SceneInfo {
    pub point_cloud: PointCloud,
    pub train_cameras: Vec<CameraInfo>,
    pub test_cameras: Vec<CameraInfo>,
    pub nerf_normalization: NerfNormalization,
    /// The PLY file the point cloud was read from.
    pub ply_path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetKind {
    Colmap,
    Blender,
}

impl DatasetKind {
    pub fn detect(source: &Path) -> Result<Self, DatasetError> {
        if source.join("sparse").exists() {
            Ok(Self::Colmap)
        } else if source.join("transforms_train.json").exists() {
            Ok(Self::Blender)
        } else {
            Err(DatasetError::Unrecognized(source.to_path_buf()))
        }
    }
}

/// Errors raised while reading a dataset.
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("Could not recognize scene type at {0}: expected a 'sparse' directory or 'transforms_train.json'")]
    Unrecognized(PathBuf),

    #[error("Required dataset file missing: {0}")]
    MissingFile(PathBuf),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}:{line}: {message}")]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("Failed to parse {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Unsupported COLMAP camera model '{0}', only undistorted (PINHOLE, SIMPLE_PINHOLE) datasets are handled")]
    UnsupportedCameraModel(String),

    #[error("Image '{image}' references unknown camera {camera_id}")]
    UnknownCamera { image: String, camera_id: u32 },

    #[error("Failed to read image {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Point cloud error: {0}")]
    Ply(#[from] PlyError),

    #[error("Resolution scale must be a positive finite number, got {0}")]
    InvalidScale(f32),
}

/// Detect the dataset layout under `params.source_path` and read it.
///
/// `rng` seeds the random initial cloud of Blender scenes shipped without one.
pub fn load_scene_info<R: Rng + ?Sized>(
    params: &ModelParams,
    rng: &mut R,
) -> Result<SceneInfo, DatasetError> {
    let source = params.source_path.as_path();
    match DatasetKind::detect(source)? {
        DatasetKind::Colmap => {
            info!("Found sparse directory, assuming COLMAP data set");
            colmap::read_scene(source, &params.images, params.eval, params.llffhold)
        }
        DatasetKind::Blender => {
            info!("Found transforms_train.json file, assuming Blender data set");
            blender::read_scene(source, params.eval, rng)
        }
    }
}

/// World-to-view matrix from a transposed rotation and a translation.
pub fn world_to_view(rotation: Mat3, translation: Vec3) -> Mat4 {
    let mut rt = Mat4::from_mat3(rotation.transpose());
    rt.w_axis = translation.extend(1.0);
    rt
}

pub fn focal_to_fov(focal: f32, pixels: f32) -> f32 {
    2.0 * (pixels / (2.0 * focal)).atan()
}

pub fn fov_to_focal(fov: f32, pixels: f32) -> f32 {
    pixels / (2.0 * (fov / 2.0).tan())
}

pub(crate) fn read_text(path: &Path) -> Result<String, DatasetError> {
    if !path.exists() {
        return Err(DatasetError::MissingFile(path.to_path_buf()));
    }
    std::fs::read_to_string(path).map_err(|source| DatasetError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info_at(center: Vec3) -> CameraInfo {
        // Identity rotation: T = -C
        CameraInfo {
            uid: 0,
            rotation: Mat3::IDENTITY,
            translation: -center,
            fov_x: 1.0,
            fov_y: 1.0,
            image_path: PathBuf::new(),
            image_name: String::new(),
            width: 1,
            height: 1,
        }
    }

    #[test]
    fn test_detect_layouts() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            DatasetKind::detect(dir.path()),
            Err(DatasetError::Unrecognized(_))
        ));

        std::fs::write(dir.path().join("transforms_train.json"), "{}").unwrap();
        assert_eq!(DatasetKind::detect(dir.path()).unwrap(), DatasetKind::Blender);

        std::fs::create_dir(dir.path().join("sparse")).unwrap();
        assert_eq!(DatasetKind::detect(dir.path()).unwrap(), DatasetKind::Colmap);
    }

    #[test]
    fn test_camera_center() {
        let info = info_at(Vec3::new(1.0, 2.0, 3.0));
        assert!((info.center() - Vec3::new(1.0, 2.0, 3.0)).length() < 1e-5);
    }

    #[test]
    fn test_nerf_normalization() {
        let cameras = vec![info_at(Vec3::new(-1.0, 0.0, 0.0)), info_at(Vec3::new(1.0, 0.0, 0.0))];
        let norm = NerfNormalization::from_cameras(&cameras);
        assert!(norm.translate.length() < 1e-5);
        assert!((norm.radius - 1.1).abs() < 1e-5);
    }

    #[test]
    fn test_fov_focal_inverse() {
        let fov = focal_to_fov(500.0, 800.0);
        assert!((fov_to_focal(fov, 800.0) - 500.0).abs() < 1e-3);
    }
}
