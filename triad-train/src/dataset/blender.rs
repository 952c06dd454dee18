//! Blender synthetic scene reader (`transforms_*.json`)

use glam::{Mat3, Mat4, Vec3};
use rand::Rng;
use serde::Deserialize;
use std::path::Path;
use tracing::{info, warn};
use triad_data::{Point, PointCloud, load_point_cloud, store_point_cloud};

use super::{
    CameraInfo, DatasetError, NerfNormalization, SceneInfo, focal_to_fov, fov_to_focal, read_text,
};
use crate::model::sh;

/// Number of random points generated when a scene ships without a cloud.
pub const RANDOM_POINT_COUNT: usize = 100_000;

/// Half extent of the cube the random points are drawn from.
const RANDOM_POINT_EXTENT: f32 = 1.3;

#[derive(Debug, Clone, Deserialize)]
pub struct Transforms {
    pub camera_angle_x: f32,
    pub frames: Vec<Frame>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Frame {
    /// Image path relative to the dataset root, without extension.
    pub file_path: String,
    /// Camera-to-world matrix, row major, OpenGL axes.
    pub transform_matrix: [[f32; 4]; 4],
}

/// Read the cameras of one `transforms_*.json` file.
pub fn read_cameras_from_transforms(
    source: &Path,
    transforms_file: &str,
    extension: &str,
) -> Result<Vec<CameraInfo>, DatasetError> {
    let path = source.join(transforms_file);
    let text = read_text(&path)?;
    let transforms: Transforms =
        serde_json::from_str(&text).map_err(|source| DatasetError::Json {
            path: path.clone(),
            source,
        })?;

    let fov_x = transforms.camera_angle_x;
    transforms
        .frames
        .iter()
        .enumerate()
        .map(|(idx, frame)| {
            let mut c2w = Mat4::from_cols_array_2d(&frame.transform_matrix).transpose();
            // OpenGL/Blender (Y up, Z back) to COLMAP (Y down, Z forward)
            c2w.y_axis = (-c2w.y_axis.truncate()).extend(c2w.y_axis.w);
            c2w.z_axis = (-c2w.z_axis.truncate()).extend(c2w.z_axis.w);
            let w2c = c2w.inverse();

            let image_path = source.join(format!("{}{}", frame.file_path, extension));
            let image_name = image_path
                .file_stem()
                .and_then(|n| n.to_str())
                .unwrap_or_default()
                .to_string();
            let (width, height) =
                image::image_dimensions(&image_path).map_err(|source| DatasetError::Image {
                    path: image_path.clone(),
                    source,
                })?;
            let fov_y = focal_to_fov(fov_to_focal(fov_x, width as f32), height as f32);

            Ok(CameraInfo {
                uid: idx as u32,
                rotation: Mat3::from_mat4(w2c).transpose(),
                translation: w2c.w_axis.truncate(),
                fov_x,
                fov_y,
                image_path,
                image_name,
                width,
                height,
            })
        })
        .collect()
}

/// Uniformly random points with random colors, as a starting cloud for
/// synthetic scenes that come without one.
pub fn random_point_cloud<R: Rng + ?Sized>(count: usize, rng: &mut R) -> PointCloud {
    let points = (0..count)
        .map(|_| {
            let position = Vec3::new(
                rng.gen_range(-RANDOM_POINT_EXTENT..RANDOM_POINT_EXTENT),
                rng.gen_range(-RANDOM_POINT_EXTENT..RANDOM_POINT_EXTENT),
                rng.gen_range(-RANDOM_POINT_EXTENT..RANDOM_POINT_EXTENT),
            );
            let dc = Vec3::new(
                rng.gen_range(0.0..1.0 / 255.0),
                rng.gen_range(0.0..1.0 / 255.0),
                rng.gen_range(0.0..1.0 / 255.0),
            );
            Point::new(position, sh::sh_to_rgb(dc))
        })
        .collect();
    PointCloud::new(points)
}

/// Read a Blender dataset rooted at `source`.
#[tracing::instrument(skip_all, fields(source = %source.display()))]
pub fn read_scene<R: Rng + ?Sized>(
    source: &Path,
    eval: bool,
    rng: &mut R,
) -> Result<SceneInfo, DatasetError> {
    info!("Reading training transforms");
    let mut train_cameras = read_cameras_from_transforms(source, "transforms_train.json", ".png")?;
    info!("Reading test transforms");
    let mut test_cameras = if source.join("transforms_test.json").exists() {
        read_cameras_from_transforms(source, "transforms_test.json", ".png")?
    } else {
        Vec::new()
    };

    if !eval {
        train_cameras.append(&mut test_cameras);
    }

    let nerf_normalization = NerfNormalization::from_cameras(&train_cameras);

    let ply_path = source.join("points3d.ply");
    if !ply_path.exists() {
        warn!(
            "No points3d.ply found, generating {} random points",
            RANDOM_POINT_COUNT
        );
        store_point_cloud(&ply_path, &random_point_cloud(RANDOM_POINT_COUNT, rng))?;
    }
    let point_cloud = load_point_cloud(&ply_path)?;

    Ok(SceneInfo {
        point_cloud,
        train_cameras,
        test_cameras,
        nerf_normalization,
        ply_path,
    })
}
