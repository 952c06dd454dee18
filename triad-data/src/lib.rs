//! Triad Data Crate
//!
//! Data loading and storage utilities for point clouds and PLY files.
//! This crate is GPU-agnostic and focuses on data parsing and record handling.

pub mod ply;
pub mod types;

pub use ply::{PlyError, VertexTable, load_point_cloud, store_point_cloud};
pub use types::{Bounds, Point, PointCloud};
