//! Spatial parts and the manifest they are loaded from
//!
//! A manifest is a JSON array of records:
//!
//! ```json
//! [{ "name": "part_00", "min": [0, 0, 0], "max": [10, 5, 10],
//!    "cameras_name_who_can_see_the_tile": ["0001.png", "0002.png"] }]
//! ```
//!
//! Camera references are resolved by comparing the first
//! [`NAME_PREFIX_LEN`] characters of both names, since manifest names carry
//! extensions or suffixes the registry names lack.

use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};
use triad_data::Bounds;

use crate::camera::Camera;

/// Characters compared when matching manifest names to cameras.
pub const NAME_PREFIX_LEN: usize = 4;

/// First [`NAME_PREFIX_LEN`] characters of `name`, or all of it when shorter.
pub fn name_prefix(name: &str) -> &str {
    match name.char_indices().nth(NAME_PREFIX_LEN) {
        Some((end, _)) => &name[..end],
        None => name,
    }
}

/// One record of the partition manifest.
#[derive(Debug, Clone, Deserialize)]
pub struct PartManifestEntry {
    pub name: String,
    #[serde(default)]
    pub min: Option<[f32; 3]>,
    #[serde(default)]
    pub max: Option<[f32; 3]>,
    pub cameras_name_who_can_see_the_tile: Vec<String>,
}

/// A named spatial part with its camera membership mask.
#[derive(Debug, Clone, PartialEq)]
pub struct PartDescriptor {
    pub name: String,
    /// Clip region; `None` covers the whole scene.
    pub bounds: Option<Bounds>,
    /// `selected[i]` marks reference-scale training camera `i` as visible.
    pub selected: Vec<bool>,
}

impl PartDescriptor {
    /// Resolve `entry` against camera names in registry order.
    pub fn from_entry(entry: &PartManifestEntry, camera_names: &[&str]) -> Result<Self, String> {
        // Part names become artifact file name suffixes
        let name = entry.name.as_str();
        if name.is_empty()
            || name == "."
            || name == ".."
            || name.contains(['/', '\\', '\0'])
        {
            return Err(format!("part name '{}' is not a plain file name suffix", name));
        }

        let bounds = match (entry.min, entry.max) {
            (Some(min), Some(max)) => {
                if !min.iter().zip(&max).all(|(lo, hi)| lo <= hi) {
                    return Err(format!(
                        "part '{}' has min {:?} above max {:?}",
                        name, min, max
                    ));
                }
                Some(Bounds::from_arrays(min, max))
            }
            (None, None) => None,
            _ => return Err(format!("part '{}' has only one of 'min' and 'max'", entry.name)),
        };

        let visible: HashSet<&str> = entry
            .cameras_name_who_can_see_the_tile
            .iter()
            .map(|name| name_prefix(name))
            .collect();
        let selected = camera_names
            .iter()
            .map(|name| visible.contains(name_prefix(name)))
            .collect();

        Ok(Self {
            name: entry.name.clone(),
            bounds,
            selected,
        })
    }

    pub fn selected_count(&self) -> usize {
        self.selected.iter().filter(|&&s| s).count()
    }

    /// Keep the entries of `items` whose index is selected, in order.
    pub fn select<'a, T>(&self, items: &'a [T]) -> Vec<&'a T> {
        items
            .iter()
            .zip(&self.selected)
            .filter_map(|(item, &keep)| keep.then_some(item))
            .collect()
    }
}

/// Errors raised while loading the partition manifest.
#[derive(Debug, Error)]
pub enum PartitionError {
    #[error("Partition manifest not found: {0}")]
    Missing(PathBuf),

    #[error("Failed to read partition manifest {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed partition manifest {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid part in {path}: {message}")]
    InvalidPart { path: PathBuf, message: String },

    #[error("Duplicate part name '{name}' in {path}")]
    DuplicateName { path: PathBuf, name: String },

    #[error("Partition manifest {0} lists no parts")]
    Empty(PathBuf),
}

/// Reads partition manifests into [`PartDescriptor`]s.
pub struct PartitionLoader;

impl PartitionLoader {
    /// Load every part of the manifest at `path` against `cameras`, the
    /// reference-scale training list.
    #[tracing::instrument(skip_all, fields(path = %path.display()))]
    pub fn load_all(path: &Path, cameras: &[Camera]) -> Result<Vec<PartDescriptor>, PartitionError> {
        if !path.exists() {
            return Err(PartitionError::Missing(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path).map_err(|source| PartitionError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let names: Vec<&str> = cameras.iter().map(|c| c.image_name.as_str()).collect();
        Self::parse(&text, &names, path)
    }

    /// Parse manifest `text`; `path` is only used in error messages.
    pub fn parse(
        text: &str,
        camera_names: &[&str],
        path: &Path,
    ) -> Result<Vec<PartDescriptor>, PartitionError> {
        let entries: Vec<PartManifestEntry> =
            serde_json::from_str(text).map_err(|source| PartitionError::Malformed {
                path: path.to_path_buf(),
                source,
            })?;
        if entries.is_empty() {
            return Err(PartitionError::Empty(path.to_path_buf()));
        }

        let mut seen = HashSet::new();
        let mut parts = Vec::with_capacity(entries.len());
        for entry in &entries {
            if !seen.insert(entry.name.as_str()) {
                return Err(PartitionError::DuplicateName {
                    path: path.to_path_buf(),
                    name: entry.name.clone(),
                });
            }
            let part = PartDescriptor::from_entry(entry, camera_names).map_err(|message| {
                PartitionError::InvalidPart {
                    path: path.to_path_buf(),
                    message,
                }
            })?;
            debug!(
                "Part '{}' sees {} of {} cameras",
                part.name,
                part.selected_count(),
                camera_names.len()
            );
            parts.push(part);
        }

        info!("Loaded {} parts", parts.len());
        Ok(parts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NAMES: [&str; 3] = ["A001", "B002", "C003"];

    fn parse(text: &str) -> Result<Vec<PartDescriptor>, PartitionError> {
        PartitionLoader::parse(text, &NAMES, Path::new("parts.json"))
    }

    #[test]
    fn test_name_prefix() {
        assert_eq!(name_prefix("A001.png"), "A001");
        assert_eq!(name_prefix("A0"), "A0");
        assert_eq!(name_prefix("ÅÄÖÜx"), "ÅÄÖÜ");
    }

    #[test]
    fn test_prefix_match_selects_camera() {
        let parts = parse(
            r#"[{"name": "p0", "min": [0, 0, 0], "max": [1, 1, 1],
                 "cameras_name_who_can_see_the_tile": ["A001.jpg"]}]"#,
        )
        .unwrap();
        assert_eq!(parts[0].selected, vec![true, false, false]);
        assert_eq!(parts[0].select(&NAMES), vec![&"A001"]);
        assert_eq!(
            parts[0].bounds,
            Some(Bounds::from_arrays([0.0, 0.0, 0.0], [1.0, 1.0, 1.0]))
        );
    }

    #[test]
    fn test_no_matches_selects_nothing() {
        let parts = parse(
            r#"[{"name": "p0", "min": [0, 0, 0], "max": [1, 1, 1],
                 "cameras_name_who_can_see_the_tile": ["Z999", "A00"]}]"#,
        )
        .unwrap();
        assert_eq!(parts[0].selected, vec![false, false, false]);
        assert_eq!(parts[0].selected_count(), 0);
    }

    #[test]
    fn test_overlapping_parts_and_unbounded_part() {
        let parts = parse(
            r#"[{"name": "p0", "min": [0, 0, 0], "max": [1, 1, 1],
                 "cameras_name_who_can_see_the_tile": ["A001_left", "C003_x"]},
                {"name": "all", "cameras_name_who_can_see_the_tile": ["C003", "B002"]}]"#,
        )
        .unwrap();
        assert_eq!(parts[0].selected, vec![true, false, true]);
        assert_eq!(parts[1].selected, vec![false, true, true]);
        assert!(parts[1].bounds.is_none());
        assert_eq!(parts[1].select(&NAMES), vec![&"B002", &"C003"]);
    }

    #[test]
    fn test_half_bounds_rejected() {
        let err = parse(r#"[{"name": "p0", "min": [0, 0, 0], "cameras_name_who_can_see_the_tile": []}]"#)
            .unwrap_err();
        assert!(matches!(err, PartitionError::InvalidPart { .. }));
    }

    #[test]
    fn test_inverted_bounds_rejected() {
        let err = parse(
            r#"[{"name": "p0", "min": [0, 2, 0], "max": [1, 1, 1],
                 "cameras_name_who_can_see_the_tile": []}]"#,
        )
        .unwrap_err();
        assert!(matches!(err, PartitionError::InvalidPart { message, .. } if message.contains("above max")));

        let flat = parse(
            r#"[{"name": "p0", "min": [0, 1, 0], "max": [1, 1, 1],
                 "cameras_name_who_can_see_the_tile": []}]"#,
        )
        .unwrap();
        assert!(flat[0].bounds.is_some());
    }

    #[test]
    fn test_path_like_names_rejected() {
        for name in ["", ".", "..", "../escape", "a/b", "a\\\\b"] {
            let text = format!(
                r#"[{{"name": "{}", "cameras_name_who_can_see_the_tile": []}}]"#,
                name
            );
            assert!(
                matches!(parse(&text), Err(PartitionError::InvalidPart { .. })),
                "{:?}",
                name
            );
        }
        assert!(parse(r#"[{"name": "part_01.a", "cameras_name_who_can_see_the_tile": []}]"#).is_ok());
    }

    #[test]
    fn test_malformed_and_empty_manifests() {
        assert!(matches!(parse("{"), Err(PartitionError::Malformed { .. })));
        assert!(matches!(
            parse(r#"[{"name": "p0"}]"#),
            Err(PartitionError::Malformed { .. })
        ));
        assert!(matches!(parse("[]"), Err(PartitionError::Empty(_))));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let err = parse(
            r#"[{"name": "p0", "cameras_name_who_can_see_the_tile": []},
                {"name": "p0", "cameras_name_who_can_see_the_tile": []}]"#,
        )
        .unwrap_err();
        assert!(matches!(err, PartitionError::DuplicateName { name, .. } if name == "p0"));
    }

    #[test]
    fn test_missing_manifest() {
        let err = PartitionLoader::load_all(Path::new("/nonexistent/parts.json"), &[]).unwrap_err();
        assert!(matches!(err, PartitionError::Missing(_)));
        assert!(err.to_string().contains("/nonexistent/parts.json"));
    }
}
