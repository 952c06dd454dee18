//! Training cameras built from dataset camera descriptions

use glam::{Mat3, Mat4, Vec3};
use image::imageops::FilterType;
use image::{DynamicImage, RgbImage};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::ModelParams;
use crate::dataset::{CameraInfo, DatasetError, fov_to_focal, world_to_view};

/// Width images are capped at when no explicit resolution is requested.
const MAX_AUTO_WIDTH: u32 = 1600;

/// A camera at one resolution scale, with its optional decoded image.
#[derive(Debug, Clone)]
pub struct Camera {
    /// Position in the camera list it belongs to.
    pub uid: usize,
    /// Identifier assigned by the dataset.
    pub colmap_id: u32,
    /// World-to-camera rotation, stored transposed.
    pub rotation: Mat3,
    pub translation: Vec3,
    pub fov_x: f32,
    pub fov_y: f32,
    pub image_name: String,
    pub image_width: u32,
    pub image_height: u32,
    /// Decoded RGB image, dropped by the image cache eviction.
    pub image: Option<RgbImage>,
}

impl Camera {
    /// Build the camera for `info` at `scale`, decoding its image when
    /// `params.load_images` is set.
    pub fn from_info(
        uid: usize,
        info: &CameraInfo,
        scale: f32,
        params: &ModelParams,
    ) -> Result<Self, DatasetError> {
        let (image_width, image_height) =
            target_resolution(info.width, info.height, scale, params.resolution);

        let image = if params.load_images {
            let decoded = image::open(&info.image_path).map_err(|source| DatasetError::Image {
                path: info.image_path.clone(),
                source,
            })?;
            let background = if params.white_background { 255 } else { 0 };
            Some(prepare_image(decoded, image_width, image_height, background))
        } else {
            None
        };

        Ok(Self {
            uid,
            colmap_id: info.uid,
            rotation: info.rotation,
            translation: info.translation,
            fov_x: info.fov_x,
            fov_y: info.fov_y,
            image_name: info.image_name.clone(),
            image_width,
            image_height,
            image,
        })
    }

    pub fn world_to_view(&self) -> Mat4 {
        world_to_view(self.rotation, self.translation)
    }

    pub fn center(&self) -> Vec3 {
        self.world_to_view().inverse().w_axis.truncate()
    }

    /// Release the decoded image, keeping pose and metadata.
    pub fn clear_image(&mut self) {
        self.image = None;
    }
}

/// Resolution a camera image is trained at.
///
/// `resolution` of 1, 2, 4 or 8 divides the original size; `-1` caps the
/// width at 1600 pixels; any other positive value is the target width.
pub fn target_resolution(width: u32, height: u32, scale: f32, resolution: i32) -> (u32, u32) {
    let (w, h) = (width as f32, height as f32);
    if matches!(resolution, 1 | 2 | 4 | 8) {
        let factor = scale * resolution as f32;
        return ((w / factor).round() as u32, (h / factor).round() as u32);
    }

    let global_down = if resolution == -1 {
        if width > MAX_AUTO_WIDTH {
            info!(
                "Input images wider than {} pixels, rescaling to {}. Set an explicit resolution to keep the original size",
                MAX_AUTO_WIDTH, MAX_AUTO_WIDTH
            );
            w / MAX_AUTO_WIDTH as f32
        } else {
            1.0
        }
    } else {
        w / resolution.max(1) as f32
    };

    let factor = global_down * scale;
    ((w / factor) as u32, (h / factor) as u32)
}

/// Resize to the training resolution, compositing transparency over a gray
/// level background.
fn prepare_image(image: DynamicImage, width: u32, height: u32, background: u8) -> RgbImage {
    let resized = if image.width() == width && image.height() == height {
        image
    } else {
        image.resize_exact(width.max(1), height.max(1), FilterType::CatmullRom)
    };

    if !resized.color().has_alpha() {
        return resized.to_rgb8();
    }

    let rgba = resized.to_rgba8();
    let bg = background as f32;
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let alpha = a as f32 / 255.0;
        let blend = |c: u8| (c as f32 * alpha + bg * (1.0 - alpha)).round() as u8;
        image::Rgb([blend(r), blend(g), blend(b)])
    })
}

/// Build one camera list at `scale`, preserving the order of `infos`.
pub fn camera_list_from_infos(
    infos: &[CameraInfo],
    scale: f32,
    params: &ModelParams,
) -> Result<Vec<Camera>, DatasetError> {
    let cameras = infos
        .iter()
        .enumerate()
        .map(|(uid, info)| Camera::from_info(uid, info, scale, params))
        .collect::<Result<Vec<_>, _>>()?;
    debug!("Built {} cameras at scale {}", cameras.len(), scale);
    Ok(cameras)
}

/// Entry of the `cameras.json` snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CameraJson {
    pub id: usize,
    pub img_name: String,
    pub width: u32,
    pub height: u32,
    pub position: [f32; 3],
    /// Camera-to-world rotation, row major.
    pub rotation: [[f32; 3]; 3],
    pub fy: f32,
    pub fx: f32,
}

impl CameraJson {
    pub fn from_info(id: usize, info: &CameraInfo) -> Self {
        let c2w = info.world_to_view().inverse();
        let rotation = Mat3::from_mat4(c2w);
        Self {
            id,
            img_name: info.image_name.clone(),
            width: info.width,
            height: info.height,
            position: c2w.w_axis.truncate().to_array(),
            rotation: rotation.transpose().to_cols_array_2d(),
            fy: fov_to_focal(info.fov_y, info.height as f32),
            fx: fov_to_focal(info.fov_x, info.width as f32),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn info(name: &str, path: PathBuf, width: u32, height: u32) -> CameraInfo {
        CameraInfo {
            uid: 3,
            rotation: Mat3::IDENTITY,
            translation: Vec3::new(0.0, 0.0, -2.0),
            fov_x: std::f32::consts::FRAC_PI_2,
            fov_y: std::f32::consts::FRAC_PI_2,
            image_path: path,
            image_name: name.to_string(),
            width,
            height,
        }
    }

    #[test]
    fn test_target_resolution_divisors() {
        assert_eq!(target_resolution(800, 600, 1.0, 2), (400, 300));
        assert_eq!(target_resolution(800, 600, 2.0, 1), (400, 300));
        assert_eq!(target_resolution(800, 600, 1.0, 8), (100, 75));
    }

    #[test]
    fn test_target_resolution_auto_caps_width() {
        assert_eq!(target_resolution(1200, 900, 1.0, -1), (1200, 900));
        assert_eq!(target_resolution(3200, 1800, 1.0, -1), (1600, 900));
        assert_eq!(target_resolution(3200, 1800, 2.0, -1), (800, 450));
    }

    #[test]
    fn test_target_resolution_explicit_width() {
        assert_eq!(target_resolution(1000, 500, 1.0, 500), (500, 250));
    }

    #[test]
    fn test_from_info_loads_and_clears_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("A001.png");
        image::RgbaImage::from_pixel(16, 8, image::Rgba([200, 100, 50, 0]))
            .save(&path)
            .unwrap();

        let params = ModelParams {
            resolution: 2,
            white_background: true,
            ..ModelParams::default()
        };
        let mut camera = Camera::from_info(0, &info("A001", path, 16, 8), 1.0, &params).unwrap();

        let image = camera.image.as_ref().unwrap();
        assert_eq!(image.dimensions(), (8, 4));
        assert_eq!(image.get_pixel(0, 0).0, [255, 255, 255]);
        assert_eq!((camera.image_width, camera.image_height), (8, 4));
        assert_eq!(camera.colmap_id, 3);

        camera.clear_image();
        assert!(camera.image.is_none());
        assert_eq!(camera.image_name, "A001");
    }

    #[test]
    fn test_missing_image_is_an_error() {
        let params = ModelParams::default();
        let err = Camera::from_info(0, &info("x", PathBuf::from("/nonexistent/x.png"), 4, 4), 1.0, &params)
            .unwrap_err();
        assert!(matches!(err, DatasetError::Image { .. }));
    }

    #[test]
    fn test_camera_json() {
        let json = CameraJson::from_info(5, &info("B002", PathBuf::new(), 800, 600));
        assert_eq!(json.id, 5);
        assert_eq!(json.img_name, "B002");
        assert_eq!(json.position, [0.0, 0.0, 2.0]);
        assert_eq!(json.rotation, [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]);
        assert!((json.fx - 400.0).abs() < 1e-3);
        assert!((json.fy - 300.0).abs() < 1e-3);

        let value = serde_json::to_value(&json).unwrap();
        assert_eq!(value["img_name"], "B002");
        assert_eq!(value["width"], 800);
    }
}
