//! Train/test camera lists at every requested resolution scale

use ordered_float::OrderedFloat;
use rand::Rng;
use rand::seq::SliceRandom;
use std::collections::BTreeMap;
use tracing::info;

use crate::camera::{Camera, camera_list_from_infos};
use crate::config::ModelParams;
use crate::dataset::{CameraInfo, DatasetError};

/// Scale that partitions and image cache eviction refer to.
pub const REFERENCE_SCALE: f32 = 1.0;

type ScaleKey = OrderedFloat<f32>;

/// Index-aligned camera lists per resolution scale.
///
/// Index `i` names the same logical camera at every scale.
#[derive(Debug, Clone, Default)]
pub struct CameraRegistry {
    train: BTreeMap<ScaleKey, Vec<Camera>>,
    test: BTreeMap<ScaleKey, Vec<Camera>>,
}

/// Permute train and test descriptions independently, once.
///
/// Must run before any scale is built so every scale shares the order.
pub fn shuffle_cameras<R: Rng + ?Sized>(
    train: &mut [CameraInfo],
    test: &mut [CameraInfo],
    rng: &mut R,
) {
    train.shuffle(rng);
    test.shuffle(rng);
}

impl CameraRegistry {
    /// Build train and test lists at every scale in `scales`.
    pub fn load(
        train_infos: &[CameraInfo],
        test_infos: &[CameraInfo],
        scales: &[f32],
        params: &ModelParams,
    ) -> Result<Self, DatasetError> {
        if let Some(&scale) = scales.iter().find(|s| !(s.is_finite() && **s > 0.0)) {
            return Err(DatasetError::InvalidScale(scale));
        }

        let mut registry = Self::default();
        for &scale in scales {
            info!("Loading training cameras at scale {}", scale);
            registry
                .train
                .insert(OrderedFloat(scale), camera_list_from_infos(train_infos, scale, params)?);
            info!("Loading test cameras at scale {}", scale);
            registry
                .test
                .insert(OrderedFloat(scale), camera_list_from_infos(test_infos, scale, params)?);
        }
        Ok(registry)
    }

    pub fn train(&self, scale: f32) -> Option<&[Camera]> {
        self.train.get(&OrderedFloat(scale)).map(Vec::as_slice)
    }

    pub fn test(&self, scale: f32) -> Option<&[Camera]> {
        self.test.get(&OrderedFloat(scale)).map(Vec::as_slice)
    }

    /// Drop decoded images of the reference-scale training cameras.
    pub fn clear_image_cache(&mut self) {
        if let Some(cameras) = self.train.get_mut(&OrderedFloat(REFERENCE_SCALE)) {
            cameras.iter_mut().for_each(Camera::clear_image);
        }
    }
}
