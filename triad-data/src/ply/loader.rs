//! Point cloud loading and storing

use crate::ply::PlyError;
use crate::types::{Point, PointCloud};
use glam::Vec3;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use serde_ply::SerializeOptions;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use tracing::{debug, info, warn};

// PLY file structure; rows are maps so any vertex layout deserializes
#[derive(Deserialize, Debug)]
struct PlyFile {
    #[serde(rename = "vertex")]
    vertex: Vec<HashMap<String, JsonValue>>,
}

#[derive(Serialize)]
struct StoredPoint {
    x: f32,
    y: f32,
    z: f32,
    nx: f32,
    ny: f32,
    nz: f32,
    red: u8,
    green: u8,
    blue: u8,
}

#[derive(Serialize)]
struct StoredCloud {
    vertex: Vec<StoredPoint>,
}

/// Load a colored point cloud from a PLY file.
///
/// Positions are required. Colors fall back to a neutral gray and normals to
/// zero when the file does not carry them.
#[tracing::instrument(skip_all, fields(path = %path.display()))]
pub fn load_point_cloud(path: &Path) -> Result<PointCloud, PlyError> {
    debug!("Loading point cloud from: {}", path.display());
    let file = File::open(path)?;
    let reader = BufReader::new(file);

    let ply_data: PlyFile = serde_ply::from_reader(reader).map_err(|e| {
        warn!("Failed to parse PLY file: {}", e);
        PlyError::from(e)
    })?;

    fn get_f32(prop: Option<&JsonValue>) -> Option<f32> {
        prop.and_then(|v| match v {
            JsonValue::Number(n) => n.as_f64().map(|f| f as f32),
            _ => None,
        })
    }

    fn get_u8(prop: Option<&JsonValue>) -> Option<u8> {
        prop.and_then(|v| match v {
            JsonValue::Number(n) => n
                .as_u64()
                .map(|u| u as u8)
                .or_else(|| n.as_i64().map(|i| i as u8)),
            _ => None,
        })
    }

    let mut points = Vec::with_capacity(ply_data.vertex.len());

    for (i, vertex) in ply_data.vertex.iter().enumerate() {
        let coord = |name: &str| {
            get_f32(vertex.get(name))
                .ok_or_else(|| PlyError::InvalidRecord(format!("missing '{}' at vertex {}", name, i)))
        };
        let position = Vec3::new(coord("x")?, coord("y")?, coord("z")?);

        let color = if let (Some(r), Some(g), Some(b)) = (
            get_u8(vertex.get("red")),
            get_u8(vertex.get("green")),
            get_u8(vertex.get("blue")),
        ) {
            Vec3::new(r as f32, g as f32, b as f32) / 255.0
        } else {
            Vec3::splat(0.8)
        };

        let normal = match (
            get_f32(vertex.get("nx")),
            get_f32(vertex.get("ny")),
            get_f32(vertex.get("nz")),
        ) {
            (Some(x), Some(y), Some(z)) => Vec3::new(x, y, z),
            _ => Vec3::ZERO,
        };

        points.push(Point::with_normal(position, color, normal));
    }

    info!("Loaded {} points", points.len());
    Ok(PointCloud::new(points))
}

/// Store a point cloud as binary PLY with float position/normal and uchar color.
#[tracing::instrument(skip_all, fields(path = %path.display(), points = cloud.len()))]
pub fn store_point_cloud(path: &Path, cloud: &PointCloud) -> Result<(), PlyError> {
    let vertex = cloud
        .points
        .iter()
        .map(|point| {
            let color = (point.color.clamp(Vec3::ZERO, Vec3::ONE) * 255.0).round();
            StoredPoint {
                x: point.position.x,
                y: point.position.y,
                z: point.position.z,
                nx: point.normal.x,
                ny: point.normal.y,
                nz: point.normal.z,
                red: color.x as u8,
                green: color.y as u8,
                blue: color.z as u8,
            }
        })
        .collect();

    let mut writer = BufWriter::new(File::create(path)?);
    serde_ply::to_writer(
        &StoredCloud { vertex },
        SerializeOptions::binary_le(),
        &mut writer,
    )?;
    writer.flush()?;
    debug!("Stored {} points", cloud.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_writes_expected_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("points3D.ply");
        let cloud = PointCloud::new(vec![
            Point::new(Vec3::new(1.0, 2.0, 3.0), Vec3::new(1.0, 0.0, 0.5)),
            Point::new(Vec3::new(-4.0, 0.5, 0.0), Vec3::ZERO),
        ]);

        store_point_cloud(&path, &cloud).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes.starts_with(b"ply\nformat binary_little_endian 1.0\nelement vertex 2\n"));

        let ply: PlyFile = serde_ply::from_bytes(&bytes).unwrap();
        assert_eq!(ply.vertex.len(), 2);
        assert_eq!(ply.vertex[1]["x"], -4.0);
        assert_eq!(ply.vertex[0]["red"], 255);
        assert_eq!(ply.vertex[0]["blue"], 128);

        let loaded = load_point_cloud(&path).unwrap();
        assert_eq!(loaded.points[0].position, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(loaded.points[1].color, Vec3::ZERO);
    }

    #[test]
    fn test_load_ascii_point_cloud() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cloud.ply");
        std::fs::write(
            &path,
            "ply\nformat ascii 1.0\nelement vertex 2\n\
             property float x\nproperty float y\nproperty float z\n\
             property uchar red\nproperty uchar green\nproperty uchar blue\n\
             end_header\n\
             0 1 2 255 0 0\n\
             3 4 5 0 255 0\n",
        )
        .unwrap();

        let cloud = load_point_cloud(&path).unwrap();
        assert_eq!(cloud.len(), 2);
        assert_eq!(cloud.points[1].position, Vec3::new(3.0, 4.0, 5.0));
        assert_eq!(cloud.points[0].color, Vec3::new(1.0, 0.0, 0.0));
        assert_eq!(cloud.points[0].normal, Vec3::ZERO);
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_point_cloud(Path::new("/nonexistent/cloud.ply")).unwrap_err();
        assert!(matches!(err, PlyError::Io(_)));
    }
}
