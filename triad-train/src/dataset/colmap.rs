//! COLMAP text model reader

use glam::{Mat3, Quat, Vec3};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};
use triad_data::{Point, PointCloud, load_point_cloud, store_point_cloud};

use super::{CameraInfo, DatasetError, NerfNormalization, SceneInfo, focal_to_fov, read_text};

/// Intrinsics entry of `cameras.txt`.
#[derive(Debug, Clone, PartialEq)]
pub struct ColmapCamera {
    pub camera_id: u32,
    pub model: String,
    pub width: u32,
    pub height: u32,
    pub params: Vec<f32>,
}

impl ColmapCamera {
    /// Horizontal and vertical field of view for undistorted models.
    pub fn fov(&self) -> Result<(f32, f32), DatasetError> {
        let (fx, fy) = match (self.model.as_str(), self.params.as_slice()) {
            ("SIMPLE_PINHOLE", [f, ..]) => (*f, *f),
            ("PINHOLE", [fx, fy, ..]) => (*fx, *fy),
            _ => return Err(DatasetError::UnsupportedCameraModel(self.model.clone())),
        };
        Ok((
            focal_to_fov(fx, self.width as f32),
            focal_to_fov(fy, self.height as f32),
        ))
    }
}

/// Pose entry of `images.txt`.
#[derive(Debug, Clone, PartialEq)]
pub struct ColmapImage {
    pub image_id: u32,
    /// Rotation quaternion (w, x, y, z) as written by COLMAP.
    pub qvec: [f32; 4],
    pub tvec: Vec3,
    pub camera_id: u32,
    pub name: String,
}

impl ColmapImage {
    pub fn rotation_matrix(&self) -> Mat3 {
        let [w, x, y, z] = self.qvec;
        Mat3::from_quat(Quat::from_xyzw(x, y, z, w).normalize())
    }
}

fn parse_error(path: &Path, line: usize, message: impl Into<String>) -> DatasetError {
    DatasetError::Parse {
        path: path.to_path_buf(),
        line: line + 1,
        message: message.into(),
    }
}

fn field<T: std::str::FromStr>(
    parts: &[&str],
    index: usize,
    path: &Path,
    line: usize,
) -> Result<T, DatasetError> {
    parts
        .get(index)
        .and_then(|p| p.parse::<T>().ok())
        .ok_or_else(|| parse_error(path, line, format!("invalid or missing field {}", index)))
}

/// Parse `cameras.txt`.
pub fn parse_cameras(path: &Path) -> Result<HashMap<u32, ColmapCamera>, DatasetError> {
    let content = read_text(path)?;
    let mut cameras = HashMap::new();

    for (n, line) in content.lines().enumerate() {
        if line.starts_with('#') || line.trim().is_empty() {
            continue;
        }
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 5 {
            return Err(parse_error(path, n, "expected CAMERA_ID MODEL WIDTH HEIGHT PARAMS[]"));
        }
        let camera_id = field(&parts, 0, path, n)?;
        let params = (4..parts.len())
            .map(|i| field::<f32>(&parts, i, path, n))
            .collect::<Result<Vec<_>, _>>()?;
        cameras.insert(
            camera_id,
            ColmapCamera {
                camera_id,
                model: parts[1].to_string(),
                width: field(&parts, 2, path, n)?,
                height: field(&parts, 3, path, n)?,
                params,
            },
        );
    }

    Ok(cameras)
}

/// Parse `images.txt`, skipping the POINTS2D line that follows each image.
pub fn parse_images(path: &Path) -> Result<Vec<ColmapImage>, DatasetError> {
    let content = read_text(path)?;
    let lines: Vec<&str> = content.lines().collect();
    let mut images = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        if line.starts_with('#') || line.trim().is_empty() {
            i += 1;
            continue;
        }
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 10 {
            return Err(parse_error(
                path,
                i,
                "expected IMAGE_ID QW QX QY QZ TX TY TZ CAMERA_ID NAME",
            ));
        }
        images.push(ColmapImage {
            image_id: field(&parts, 0, path, i)?,
            qvec: [
                field(&parts, 1, path, i)?,
                field(&parts, 2, path, i)?,
                field(&parts, 3, path, i)?,
                field(&parts, 4, path, i)?,
            ],
            tvec: Vec3::new(
                field(&parts, 5, path, i)?,
                field(&parts, 6, path, i)?,
                field(&parts, 7, path, i)?,
            ),
            camera_id: field(&parts, 8, path, i)?,
            name: parts[9..].join(" "),
        });
        i += 2;
    }

    Ok(images)
}

/// Parse `points3D.txt` into a point cloud.
pub fn parse_points3d(path: &Path) -> Result<PointCloud, DatasetError> {
    let content = read_text(path)?;
    let mut points = Vec::new();

    for (n, line) in content.lines().enumerate() {
        if line.starts_with('#') || line.trim().is_empty() {
            continue;
        }
        let parts: Vec<&str> = line.split_whitespace().collect();
        let position = Vec3::new(
            field(&parts, 1, path, n)?,
            field(&parts, 2, path, n)?,
            field(&parts, 3, path, n)?,
        );
        let color = Vec3::new(
            field::<u8>(&parts, 4, path, n)? as f32,
            field::<u8>(&parts, 5, path, n)? as f32,
            field::<u8>(&parts, 6, path, n)? as f32,
        ) / 255.0;
        points.push(Point::new(position, color));
    }

    Ok(PointCloud::new(points))
}

/// Build camera descriptions, sorted by image name.
pub fn camera_infos(
    cameras: &HashMap<u32, ColmapCamera>,
    images: &[ColmapImage],
    images_dir: &Path,
) -> Result<Vec<CameraInfo>, DatasetError> {
    let mut infos = images
        .iter()
        .map(|image| {
            let camera = cameras
                .get(&image.camera_id)
                .ok_or_else(|| DatasetError::UnknownCamera {
                    image: image.name.clone(),
                    camera_id: image.camera_id,
                })?;
            let (fov_x, fov_y) = camera.fov()?;
            let image_path = images_dir.join(&image.name);
            let image_name = image_path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.split('.').next())
                .unwrap_or(&image.name)
                .to_string();
            Ok(CameraInfo {
                uid: camera.camera_id,
                rotation: image.rotation_matrix().transpose(),
                translation: image.tvec,
                fov_x,
                fov_y,
                image_path,
                image_name,
                width: camera.width,
                height: camera.height,
            })
        })
        .collect::<Result<Vec<_>, DatasetError>>()?;

    infos.sort_by(|a, b| a.image_name.cmp(&b.image_name));
    Ok(infos)
}

/// Read a COLMAP dataset rooted at `source`.
#[tracing::instrument(skip_all, fields(source = %source.display()))]
pub fn read_scene(
    source: &Path,
    images: &str,
    eval: bool,
    llffhold: usize,
) -> Result<SceneInfo, DatasetError> {
    let sparse = source.join("sparse").join("0");
    let cameras = parse_cameras(&sparse.join("cameras.txt"))?;
    let colmap_images = parse_images(&sparse.join("images.txt"))?;
    let infos = camera_infos(&cameras, &colmap_images, &source.join(images))?;
    debug!("Parsed {} cameras, {} images", cameras.len(), infos.len());

    let (train_cameras, test_cameras): (Vec<_>, Vec<_>) = if eval {
        let hold = llffhold.max(1);
        let (test, train): (Vec<_>, Vec<_>) =
            infos.into_iter().enumerate().partition(|(i, _)| i % hold == 0);
        (
            train.into_iter().map(|(_, c)| c).collect(),
            test.into_iter().map(|(_, c)| c).collect(),
        )
    } else {
        (infos, Vec::new())
    };

    let nerf_normalization = NerfNormalization::from_cameras(&train_cameras);

    let ply_path = sparse.join("points3D.ply");
    if !ply_path.exists() {
        warn!("Converting points3D.txt to .ply, will happen only the first time you open the scene");
        let cloud = parse_points3d(&sparse.join("points3D.txt"))?;
        store_point_cloud(&ply_path, &cloud)?;
    }
    let point_cloud = load_point_cloud(&ply_path)?;

    info!(
        "COLMAP scene: {} train, {} test cameras, {} points",
        train_cameras.len(),
        test_cameras.len(),
        point_cloud.len()
    );

    Ok(SceneInfo {
        point_cloud,
        train_cameras,
        test_cameras,
        nerf_normalization,
        ply_path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAMERAS: &str = "# Camera list\n1 PINHOLE 800 600 400 300 400 300\n2 SIMPLE_PINHOLE 100 100 50 50 50\n";
    const IMAGES: &str = "# Image list\n\
        2 1 0 0 0 0 0 1 1 b.jpg\n\
        10.0 20.0 -1\n\
        1 1 0 0 0 0 0 2 2 a.jpg\n\
        \n";

    #[test]
    fn test_parse_cameras() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cameras.txt");
        std::fs::write(&path, CAMERAS).unwrap();

        let cameras = parse_cameras(&path).unwrap();
        assert_eq!(cameras.len(), 2);
        let pinhole = &cameras[&1];
        assert_eq!((pinhole.width, pinhole.height), (800, 600));
        let (fov_x, fov_y) = pinhole.fov().unwrap();
        assert!((fov_x - std::f32::consts::FRAC_PI_2).abs() < 1e-5);
        assert!((fov_y - std::f32::consts::FRAC_PI_2).abs() < 1e-5);
    }

    #[test]
    fn test_unsupported_model() {
        let camera = ColmapCamera {
            camera_id: 1,
            model: "OPENCV".into(),
            width: 10,
            height: 10,
            params: vec![1.0; 8],
        };
        assert!(matches!(camera.fov(), Err(DatasetError::UnsupportedCameraModel(m)) if m == "OPENCV"));
    }

    #[test]
    fn test_parse_images_skips_points_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("images.txt");
        std::fs::write(&path, IMAGES).unwrap();

        let images = parse_images(&path).unwrap();
        assert_eq!(images.len(), 2);
        assert_eq!(images[0].name, "b.jpg");
        assert_eq!(images[0].tvec, Vec3::new(0.0, 0.0, 1.0));
        assert_eq!(images[1].camera_id, 2);
        assert_eq!(images[0].rotation_matrix(), Mat3::IDENTITY);
    }

    #[test]
    fn test_camera_infos_sorted_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let cameras_path = dir.path().join("cameras.txt");
        let images_path = dir.path().join("images.txt");
        std::fs::write(&cameras_path, CAMERAS).unwrap();
        std::fs::write(&images_path, IMAGES).unwrap();

        let infos = camera_infos(
            &parse_cameras(&cameras_path).unwrap(),
            &parse_images(&images_path).unwrap(),
            Path::new("/data/images"),
        )
        .unwrap();

        let names: Vec<_> = infos.iter().map(|c| c.image_name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(infos[0].image_path, Path::new("/data/images/a.jpg"));
        assert_eq!((infos[0].width, infos[0].height), (100, 100));
    }

    #[test]
    fn test_read_scene_converts_points_and_holds_out_tests() {
        let dir = tempfile::tempdir().unwrap();
        let sparse = dir.path().join("sparse").join("0");
        std::fs::create_dir_all(&sparse).unwrap();
        std::fs::write(sparse.join("cameras.txt"), CAMERAS).unwrap();
        std::fs::write(sparse.join("images.txt"), IMAGES).unwrap();
        std::fs::write(
            sparse.join("points3D.txt"),
            "# 3D point list\n1 0.5 1.5 2.5 255 128 0 0.1 1 0\n2 -1 -2 -3 0 0 255 0.2\n",
        )
        .unwrap();

        let info = read_scene(dir.path(), "images", true, 8).unwrap();
        assert_eq!(info.test_cameras.len(), 1);
        assert_eq!(info.train_cameras.len(), 1);
        assert_eq!(info.test_cameras[0].image_name, "a");
        assert!(sparse.join("points3D.ply").exists());
        assert_eq!(info.ply_path, sparse.join("points3D.ply"));
        assert_eq!(info.point_cloud.len(), 2);
        assert_eq!(info.point_cloud.points[1].position, Vec3::new(-1.0, -2.0, -3.0));
    }

    #[test]
    fn test_missing_model_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sparse")).unwrap();
        let err = read_scene(dir.path(), "images", false, 8).unwrap_err();
        assert!(matches!(err, DatasetError::MissingFile(p) if p.ends_with("cameras.txt")));
    }
}
