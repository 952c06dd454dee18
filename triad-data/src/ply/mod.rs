//! PLY file loading, writing and record-level access

mod loader;
mod table;

pub use loader::{load_point_cloud, store_point_cloud};
pub use table::VertexTable;

use thiserror::Error;

/// Errors raised while reading or writing PLY files.
#[derive(Debug, Error)]
pub enum PlyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Deserialize(#[from] serde_ply::DeserializeError),

    #[error(transparent)]
    Serialize(#[from] serde_ply::SerializeError),

    #[error("Invalid PLY header: {0}")]
    InvalidHeader(String),

    #[error("PLY file has no '{0}' element")]
    MissingElement(String),

    #[error("PLY vertex element has no '{0}' property")]
    MissingProperty(String),

    #[error("PLY body ended inside element '{0}'")]
    UnexpectedEof(String),

    #[error("Invalid PLY record: {0}")]
    InvalidRecord(String),

    #[error("PLY layout mismatch: {0}")]
    SchemaMismatch(String),
}
