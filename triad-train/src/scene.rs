//! Per-session scene state
//!
//! A [`Scene`] owns everything a tiled training session needs: the camera
//! registry, the dataset point cloud, the spatial parts and the slot holding
//! the model currently being trained. Parts are trained one at a time; each
//! one starts from a fresh model obtained through [`Scene::replace_model`]
//! and is persisted with [`Scene::save_part`].

use rand::Rng;
use std::path::Path;
use tracing::{debug, info};
use triad_data::PointCloud;

use crate::camera::{Camera, CameraJson};
use crate::checkpoint::{
    CAMERAS_FILE, INPUT_SNAPSHOT_FILE, clipped_part_artifact, merged_artifact, part_artifact,
    point_cloud_dir, search_for_max_iteration,
};
use crate::config::{LoadIteration, ModelParams, SceneOptions};
use crate::dataset::{SceneInfo, load_scene_info};
use crate::error::SceneError;
use crate::merge::PointCloudMerger;
use crate::model::{GaussianModel, OptimizableModel};
use crate::partition::{PartDescriptor, PartitionLoader};
use crate::registry::{CameraRegistry, REFERENCE_SCALE, shuffle_cameras};

pub struct Scene<M: OptimizableModel = GaussianModel> {
    params: ModelParams,
    loaded_iter: Option<u32>,
    cameras: CameraRegistry,
    point_cloud: PointCloud,
    cameras_extent: f32,
    parts: Vec<PartDescriptor>,
    model: Option<M>,
}

impl<M: OptimizableModel> Scene<M> {
    /// Load the dataset, cameras and partition manifest for a session.
    ///
    /// On a fresh run (no checkpoint requested) the dataset point cloud and
    /// the camera poses are snapshotted into `params.model_path` first.
    #[tracing::instrument(skip_all, fields(source = %params.source_path.display()))]
    pub fn new<R: Rng + ?Sized>(
        params: ModelParams,
        options: &SceneOptions,
        rng: &mut R,
    ) -> Result<Self, SceneError> {
        let loaded_iter = resolve_iteration(&params.model_path, options.load_iteration)?;
        if let Some(iteration) = loaded_iter {
            info!("Loading trained model at iteration {}", iteration);
        }

        let mut scene_info = load_scene_info(&params, rng)?;

        if loaded_iter.is_none() {
            write_snapshots(&params.model_path, &scene_info)?;
        }

        if options.shuffle {
            shuffle_cameras(
                &mut scene_info.train_cameras,
                &mut scene_info.test_cameras,
                rng,
            );
        }

        let cameras_extent = params
            .cameras_extent
            .unwrap_or(scene_info.nerf_normalization.radius);
        debug!("Cameras extent {}", cameras_extent);

        let cameras = CameraRegistry::load(
            &scene_info.train_cameras,
            &scene_info.test_cameras,
            &options.resolution_scales,
            &params,
        )?;

        let reference = cameras
            .train(REFERENCE_SCALE)
            .ok_or(SceneError::UnknownScale(REFERENCE_SCALE))?;
        let parts = PartitionLoader::load_all(&params.parts_manifest_path(), reference)?;

        Ok(Self {
            params,
            loaded_iter,
            cameras,
            point_cloud: scene_info.point_cloud,
            cameras_extent,
            parts,
            model: None,
        })
    }

    /// Training cameras visible from `part` at `scale`, in registry order.
    pub fn train_cameras_for_part(
        &self,
        part: &PartDescriptor,
        scale: f32,
    ) -> Result<Vec<&Camera>, SceneError> {
        let cameras = self
            .cameras
            .train(scale)
            .ok_or(SceneError::UnknownScale(scale))?;
        Ok(part.select(cameras))
    }

    pub fn test_cameras(&self, scale: f32) -> Result<&[Camera], SceneError> {
        self.cameras
            .test(scale)
            .ok_or(SceneError::UnknownScale(scale))
    }

    /// Build a fresh model into the slot, dropping the previous one.
    ///
    /// The model is read from the resolved checkpoint when there is one and
    /// seeded from the dataset point cloud otherwise. On error the slot is
    /// left untouched.
    pub fn replace_model(&mut self) -> Result<&mut M, SceneError> {
        let mut model = M::new(self.params.sh_degree);
        match self.loaded_iter {
            Some(iteration) => {
                let path = merged_artifact(&self.params.model_path, iteration);
                model.load_ply(&path)?;
            }
            None => model.create_from_point_cloud(&self.point_cloud, self.cameras_extent),
        }
        Ok(self.model.insert(model))
    }

    pub fn model(&self) -> Option<&M> {
        self.model.as_ref()
    }

    pub fn model_mut(&mut self) -> Option<&mut M> {
        self.model.as_mut()
    }

    /// Persist the current model as `part`'s artifacts at `iteration`: one
    /// clipped to the part bounds and one unclipped.
    pub fn save_part(&self, part: &PartDescriptor, iteration: u32) -> Result<(), SceneError> {
        let model = self.model.as_ref().ok_or(SceneError::NoModel)?;
        let model_path = &self.params.model_path;

        let clipped = clipped_part_artifact(model_path, iteration, &part.name);
        model.save_ply(&clipped, part.bounds.as_ref())?;
        let full = part_artifact(model_path, iteration, &part.name);
        model.save_ply(&full, None)?;

        info!("Saved part '{}' at iteration {}", part.name, iteration);
        Ok(())
    }

    /// Merge the clipped artifacts of every part at `iteration`.
    pub fn merge_parts(&self, iteration: u32) -> Result<usize, SceneError> {
        let merger = PointCloudMerger::new(&self.params.model_path);
        Ok(merger.merge_parts(&self.parts, iteration)?)
    }

    /// Release the decoded images of the reference-scale training cameras.
    pub fn clear_image_cache(&mut self) {
        self.cameras.clear_image_cache();
    }

    pub fn parts(&self) -> &[PartDescriptor] {
        &self.parts
    }

    pub fn loaded_iter(&self) -> Option<u32> {
        self.loaded_iter
    }

    pub fn cameras_extent(&self) -> f32 {
        self.cameras_extent
    }

    pub fn point_cloud(&self) -> &PointCloud {
        &self.point_cloud
    }

    pub fn cameras(&self) -> &CameraRegistry {
        &self.cameras
    }

    pub fn params(&self) -> &ModelParams {
        &self.params
    }

    pub fn model_path(&self) -> &Path {
        &self.params.model_path
    }
}

fn resolve_iteration(
    model_path: &Path,
    requested: Option<LoadIteration>,
) -> Result<Option<u32>, SceneError> {
    match requested {
        // Iteration 0 has no checkpoint; it is the start of a fresh run
        None | Some(LoadIteration::At(0)) => Ok(None),
        Some(LoadIteration::At(iteration)) => Ok(Some(iteration)),
        Some(LoadIteration::Latest) => {
            let dir = point_cloud_dir(model_path);
            if !dir.is_dir() {
                return Err(SceneError::NoCheckpoint(dir));
            }
            match search_for_max_iteration(&dir).map_err(SceneError::io(&dir))? {
                Some(iteration) => Ok(Some(iteration)),
                None => Err(SceneError::NoCheckpoint(dir)),
            }
        }
    }
}

/// Copy the input point cloud and dump camera poses (test then train).
fn write_snapshots(model_path: &Path, scene_info: &SceneInfo) -> Result<(), SceneError> {
    std::fs::create_dir_all(model_path).map_err(SceneError::io(model_path))?;

    let input = model_path.join(INPUT_SNAPSHOT_FILE);
    std::fs::copy(&scene_info.ply_path, &input).map_err(SceneError::io(&input))?;

    let cameras: Vec<CameraJson> = scene_info
        .test_cameras
        .iter()
        .chain(&scene_info.train_cameras)
        .enumerate()
        .map(|(id, info)| CameraJson::from_info(id, info))
        .collect();
    let path = model_path.join(CAMERAS_FILE);
    let json = serde_json::to_string(&cameras).map_err(|source| SceneError::Json {
        path: path.clone(),
        source,
    })?;
    std::fs::write(&path, json).map_err(SceneError::io(&path))?;

    debug!("Wrote {} and {}", input.display(), path.display());
    Ok(())
}
