//! CPU-side 3D Gaussian model in the standard splatting PLY layout

use glam::Vec3;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_ply::SerializeOptions;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use tracing::{debug, info};
use triad_data::{Bounds, PlyError, PointCloud};

use super::sh::{inverse_sigmoid, rest_coefficients, rgb_to_sh, sigmoid};
use super::{ModelError, OptimizableModel};

/// Opacity assigned to freshly initialized Gaussians.
const INITIAL_OPACITY: f32 = 0.1;

/// Neighbors averaged when sizing initial Gaussians.
const SCALE_NEIGHBORS: usize = 3;

/// Lower bound on the mean squared neighbor distance.
const MIN_DIST2: f32 = 1e-7;

#[derive(Deserialize)]
struct GaussianRows {
    vertex: Vec<HashMap<String, f32>>,
}

/// One vertex written as float properties in `names` order.
struct GaussianRow<'a> {
    names: &'a [String],
    values: Vec<f32>,
}

impl Serialize for GaussianRow<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (name, value) in self.names.iter().zip(&self.values) {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

#[derive(Serialize)]
struct GaussianPly<'a> {
    vertex: Vec<GaussianRow<'a>>,
}

/// An anisotropic Gaussian set with spherical-harmonic colors.
///
/// Stored in pre-activation form: opacity as a logit, scale as a natural log.
/// Rotations are quaternions ordered (w, x, y, z).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GaussianModel {
    max_sh_degree: u32,
    positions: Vec<Vec3>,
    features_dc: Vec<Vec3>,
    /// Per point `3 * rest_coefficients(max_sh_degree)` values, channel major.
    features_rest: Vec<f32>,
    opacities: Vec<f32>,
    scales: Vec<Vec3>,
    rotations: Vec<[f32; 4]>,
    spatial_lr_scale: f32,
}

impl GaussianModel {
    pub fn max_sh_degree(&self) -> u32 {
        self.max_sh_degree
    }

    pub fn positions(&self) -> &[Vec3] {
        &self.positions
    }

    pub fn spatial_lr_scale(&self) -> f32 {
        self.spatial_lr_scale
    }

    /// Activated opacities in 0-1.
    pub fn opacities(&self) -> impl Iterator<Item = f32> + '_ {
        self.opacities.iter().map(|&o| sigmoid(o))
    }

    /// Activated per-axis scales.
    pub fn scales(&self) -> impl Iterator<Item = Vec3> + '_ {
        self.scales.iter().map(|s| s.exp())
    }

    fn rest_len(&self) -> usize {
        3 * rest_coefficients(self.max_sh_degree)
    }

    /// Property names in file order: position, normal, DC color, rest
    /// coefficients, opacity, scale, rotation.
    fn property_names(&self) -> Vec<String> {
        let mut names: Vec<String> = ["x", "y", "z", "nx", "ny", "nz"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        names.extend((0..3).map(|i| format!("f_dc_{}", i)));
        names.extend((0..self.rest_len()).map(|i| format!("f_rest_{}", i)));
        names.push("opacity".to_string());
        names.extend((0..3).map(|i| format!("scale_{}", i)));
        names.extend((0..4).map(|i| format!("rot_{}", i)));
        names
    }

    /// Values of Gaussian `i` in `property_names` order. Normals are zero.
    fn row_values(&self, i: usize) -> Vec<f32> {
        let rest_len = self.rest_len();
        let mut row = Vec::with_capacity(17 + rest_len);
        row.extend(self.positions[i].to_array());
        row.extend([0.0; 3]);
        row.extend(self.features_dc[i].to_array());
        row.extend_from_slice(&self.features_rest[i * rest_len..(i + 1) * rest_len]);
        row.push(self.opacities[i]);
        row.extend(self.scales[i].to_array());
        row.extend(self.rotations[i]);
        row
    }

    fn push_row_values(&mut self, row: &[f32]) {
        let rest_end = 9 + self.rest_len();
        self.positions.push(Vec3::from_slice(&row[0..3]));
        self.features_dc.push(Vec3::from_slice(&row[6..9]));
        self.features_rest.extend_from_slice(&row[9..rest_end]);
        self.opacities.push(row[rest_end]);
        self.scales.push(Vec3::from_slice(&row[rest_end + 1..rest_end + 4]));
        self.rotations.push([
            row[rest_end + 4],
            row[rest_end + 5],
            row[rest_end + 6],
            row[rest_end + 7],
        ]);
    }
}

impl OptimizableModel for GaussianModel {
    fn new(sh_degree: u32) -> Self {
        Self {
            max_sh_degree: sh_degree,
            ..Self::default()
        }
    }

    fn create_from_point_cloud(&mut self, cloud: &PointCloud, spatial_lr_scale: f32) {
        self.spatial_lr_scale = spatial_lr_scale;
        self.positions = cloud.points.iter().map(|p| p.position).collect();
        self.features_dc = cloud.points.iter().map(|p| rgb_to_sh(p.color)).collect();
        self.features_rest = vec![0.0; self.positions.len() * self.rest_len()];
        self.opacities = vec![inverse_sigmoid(INITIAL_OPACITY); self.positions.len()];
        self.scales = mean_neighbor_dist2(&self.positions, SCALE_NEIGHBORS)
            .into_iter()
            .map(|d2| Vec3::splat(d2.max(MIN_DIST2).sqrt().ln()))
            .collect();
        self.rotations = vec![[1.0, 0.0, 0.0, 0.0]; self.positions.len()];
        info!("Number of points at initialisation: {}", self.positions.len());
    }

    #[tracing::instrument(skip_all, fields(path = %path.display()))]
    fn load_ply(&mut self, path: &Path) -> Result<(), ModelError> {
        let file = File::open(path).map_err(|source| ModelError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let ply: GaussianRows =
            serde_ply::from_reader(BufReader::new(file)).map_err(PlyError::from)?;

        if let Some(first) = ply.vertex.first() {
            let found = first.keys().filter(|k| k.starts_with("f_rest_")).count();
            if found != self.rest_len() {
                return Err(ModelError::ShDegreeMismatch {
                    sh_degree: self.max_sh_degree,
                    expected: self.rest_len(),
                    found,
                });
            }
        }

        // Fill a fresh model so a failed load leaves this one untouched
        let mut loaded = Self {
            max_sh_degree: self.max_sh_degree,
            spatial_lr_scale: self.spatial_lr_scale,
            ..Self::default()
        };
        let names = self.property_names();
        let mut row = Vec::with_capacity(names.len());
        for vertex in &ply.vertex {
            row.clear();
            for name in &names {
                let value = vertex
                    .get(name)
                    .copied()
                    .ok_or_else(|| PlyError::MissingProperty(name.clone()))?;
                row.push(value);
            }
            loaded.push_row_values(&row);
        }

        *self = loaded;
        debug!("Loaded {} Gaussians", self.positions.len());
        Ok(())
    }

    fn save_ply(&self, path: &Path, bounds: Option<&Bounds>) -> Result<(), ModelError> {
        let io_error = |source: std::io::Error| ModelError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ModelError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let names = self.property_names();
        let vertex: Vec<GaussianRow> = self
            .positions
            .iter()
            .enumerate()
            .filter(|(_, position)| bounds.is_none_or(|b| b.contains(**position)))
            .map(|(i, _)| GaussianRow {
                names: &names,
                values: self.row_values(i),
            })
            .collect();
        let saved = vertex.len();

        let mut writer = BufWriter::new(File::create(path).map_err(io_error)?);
        serde_ply::to_writer(
            &GaussianPly { vertex },
            SerializeOptions::binary_le(),
            &mut writer,
        )
        .map_err(PlyError::from)?;
        writer.flush().map_err(io_error)?;

        debug!(
            "Saved {} of {} Gaussians to {}",
            saved,
            self.positions.len(),
            path.display()
        );
        Ok(())
    }

    fn point_count(&self) -> usize {
        self.positions.len()
    }
}

/// Mean squared distance from each point to its `k` nearest neighbors.
///
/// Points are swept in x order; a scan stops once the x gap alone exceeds the
/// current k-th best distance.
fn mean_neighbor_dist2(positions: &[Vec3], k: usize) -> Vec<f32> {
    let mut order: Vec<usize> = (0..positions.len()).collect();
    order.sort_by(|&a, &b| positions[a].x.total_cmp(&positions[b].x));

    let mut result = vec![0.0; positions.len()];
    let mut best: Vec<f32> = Vec::with_capacity(k + 1);

    for (rank, &i) in order.iter().enumerate() {
        let p = positions[i];
        best.clear();
        let visit = |j: usize, best: &mut Vec<f32>| -> bool {
            let q = positions[j];
            let bound = if best.len() < k { f32::INFINITY } else { best[k - 1] };
            let dx = q.x - p.x;
            if dx * dx > bound {
                return false;
            }
            let d2 = p.distance_squared(q);
            let at = best.partition_point(|&b| b <= d2);
            best.insert(at, d2);
            best.truncate(k);
            true
        };
        for &j in order[..rank].iter().rev() {
            if !visit(j, &mut best) {
                break;
            }
        }
        for &j in &order[rank + 1..] {
            if !visit(j, &mut best) {
                break;
            }
        }
        if !best.is_empty() {
            result[i] = best.iter().sum::<f32>() / best.len() as f32;
        }
    }
    result
}
