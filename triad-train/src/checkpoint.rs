//! Output directory layout
//!
//! ```text
//! <model_path>/input.ply
//! <model_path>/cameras.json
//! <model_path>/point_cloud/iteration_<N>/point_cloud.ply
//! <model_path>/point_cloud/iteration_<N>/point_cloud.ply.<part>
//! <model_path>/point_cloud/iteration_<N>/point_cloud.ply.<part>.clip
//! ```

use std::io;
use std::path::{Path, PathBuf};

pub const POINT_CLOUD_DIR: &str = "point_cloud";
pub const POINT_CLOUD_FILE: &str = "point_cloud.ply";
pub const INPUT_SNAPSHOT_FILE: &str = "input.ply";
pub const CAMERAS_FILE: &str = "cameras.json";
const ITERATION_PREFIX: &str = "iteration_";
const CLIP_SUFFIX: &str = "clip";

pub fn point_cloud_dir(model_path: &Path) -> PathBuf {
    model_path.join(POINT_CLOUD_DIR)
}

pub fn iteration_dir(model_path: &Path, iteration: u32) -> PathBuf {
    point_cloud_dir(model_path).join(format!("{}{}", ITERATION_PREFIX, iteration))
}

/// The merged (or whole-scene) artifact of an iteration.
pub fn merged_artifact(model_path: &Path, iteration: u32) -> PathBuf {
    iteration_dir(model_path, iteration).join(POINT_CLOUD_FILE)
}

/// Full, unclipped model saved while training `part`.
pub fn part_artifact(model_path: &Path, iteration: u32, part: &str) -> PathBuf {
    iteration_dir(model_path, iteration).join(format!("{}.{}", POINT_CLOUD_FILE, part))
}

/// Model saved while training `part`, clipped to the part's bounds.
pub fn clipped_part_artifact(model_path: &Path, iteration: u32, part: &str) -> PathBuf {
    iteration_dir(model_path, iteration).join(format!(
        "{}.{}.{}",
        POINT_CLOUD_FILE, part, CLIP_SUFFIX
    ))
}

fn parse_iteration(name: &str) -> Option<u32> {
    name.strip_prefix(ITERATION_PREFIX)?.parse().ok()
}

/// Highest `N` among `iteration_<N>` entries of `dir`; other entries are ignored.
pub fn search_for_max_iteration(dir: &Path) -> io::Result<Option<u32>> {
    let mut max = None;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if let Some(n) = entry.file_name().to_str().and_then(parse_iteration) {
            max = max.max(Some(n));
        }
    }
    Ok(max)
}
