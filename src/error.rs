//! Error types for the column file format

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SegmentError>;

#[derive(Error, Debug)]
pub enum SegmentError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Data corruption: {0}")]
    Corruption(String),

    #[error("Checksum mismatch: expected {expected:#010x}, computed {computed:#010x}")]
    ChecksumMismatch { expected: u32, computed: u32 },

    /// Ran out of input while decoding. Distinct from `Corruption`: the
    /// bytes seen so far were well formed.
    #[error("Unexpected end of data: {0}")]
    UnexpectedEof(String),

    #[error("Allocation error: {0}")]
    Allocation(String),

    #[error("Segment file already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid writer state: expected {expected}, found {found}")]
    InvalidState {
        expected: &'static str,
        found: &'static str,
    },

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Compression error: {0}")]
    Compression(String),
}

impl SegmentError {
    /// Whether this error means the input ran out (as opposed to being wrong).
    pub fn is_eof(&self) -> bool {
        matches!(self, SegmentError::UnexpectedEof(_))
    }

    /// Short machine-readable code, used by the CLI exit report.
    pub fn code(&self) -> &'static str {
        match self {
            SegmentError::Io(_) => "IO_ERROR",
            SegmentError::Corruption(_) | SegmentError::ChecksumMismatch { .. } => "CORRUPTION",
            SegmentError::UnexpectedEof(_) => "DATA_EOF",
            SegmentError::AlreadyExists(_) => "FILE_EXISTS",
            SegmentError::Allocation(_) => "ALLOCATION_ERROR",
            SegmentError::InvalidState { .. } => "INVALID_STATE",
            _ => "INTERNAL_ERROR",
        }
    }
}
