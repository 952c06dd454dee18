//! Reassembly of per-part artifacts into one point cloud

use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info};
use triad_data::{PlyError, VertexTable};

use crate::checkpoint::{clipped_part_artifact, merged_artifact};
use crate::partition::PartDescriptor;

/// Errors raised while merging part artifacts. Inputs already on disk are
/// never modified, so a failed merge can simply be retried.
#[derive(Debug, Error)]
pub enum MergeError {
    #[error("No parts to merge")]
    NoParts,

    #[error("Missing artifact for part '{part}': {path}")]
    MissingInput { part: String, path: PathBuf },

    #[error("Failed to read part artifact {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: PlyError,
    },

    #[error("Part artifact {path} does not share the vertex layout of earlier parts: {source}")]
    SchemaMismatch {
        path: PathBuf,
        #[source]
        source: PlyError,
    },

    #[error("Failed to write merged artifact {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: PlyError,
    },
}

/// Concatenates the clipped artifacts of every part, in part order.
#[derive(Debug, Clone)]
pub struct PointCloudMerger {
    model_path: PathBuf,
}

impl PointCloudMerger {
    pub fn new(model_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
        }
    }

    /// Merge the clipped artifacts of `parts` at `iteration` into the
    /// iteration's `point_cloud.ply`. Returns the merged record count.
    ///
    /// Records are copied byte for byte: no deduplication, no transform.
    #[tracing::instrument(skip_all, fields(iteration, parts = parts.len()))]
    pub fn merge_parts(&self, parts: &[PartDescriptor], iteration: u32) -> Result<usize, MergeError> {
        // Check every input up front so a missing part fails before any read
        let inputs = parts
            .iter()
            .map(|part| {
                let path = clipped_part_artifact(&self.model_path, iteration, &part.name);
                if path.exists() {
                    Ok(path)
                } else {
                    Err(MergeError::MissingInput {
                        part: part.name.clone(),
                        path,
                    })
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut merged: Option<VertexTable> = None;
        for path in inputs {
            let table = VertexTable::read(&path).map_err(|source| MergeError::Read {
                path: path.clone(),
                source,
            })?;
            debug!("{}: {} records", path.display(), table.len());
            match merged.as_mut() {
                None => merged = Some(table),
                Some(acc) => acc
                    .append(&table)
                    .map_err(|source| MergeError::SchemaMismatch {
                        path: path.clone(),
                        source,
                    })?,
            }
        }

        let merged = merged.ok_or(MergeError::NoParts)?;
        let output = merged_artifact(&self.model_path, iteration);
        merged.write(&output).map_err(|source| MergeError::Write {
            path: output.clone(),
            source,
        })?;

        info!(
            "Merged {} parts into {} ({} points)",
            parts.len(),
            output.display(),
            merged.len()
        );
        Ok(merged.len())
    }
}
