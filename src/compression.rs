//! Per-chunk stream compression.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SegmentError};

/// Compression applied uniformly to every stream of a segment (stored as u8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum CompressKind {
    #[default]
    None = 0,
    Snappy = 1,
    Lz4 = 2,
}

impl CompressKind {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::None),
            1 => Some(Self::Snappy),
            2 => Some(Self::Lz4),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Snappy => "snappy",
            Self::Lz4 => "lz4",
        }
    }
}

/// Compress one chunk. `None` returns a copy of the input.
pub fn compress(kind: CompressKind, data: &[u8]) -> Result<Vec<u8>> {
    match kind {
        CompressKind::None => Ok(data.to_vec()),
        CompressKind::Snappy => snap::raw::Encoder::new()
            .compress_vec(data)
            .map_err(|e| SegmentError::Compression(format!("snappy compression failed: {}", e))),
        CompressKind::Lz4 => Ok(lz4_flex::compress_prepend_size(data)),
    }
}

/// Decompress one chunk produced by [`compress`].
pub fn decompress(kind: CompressKind, data: &[u8]) -> Result<Vec<u8>> {
    match kind {
        CompressKind::None => Ok(data.to_vec()),
        CompressKind::Snappy => snap::raw::Decoder::new()
            .decompress_vec(data)
            .map_err(|e| SegmentError::Corruption(format!("snappy decompression failed: {}", e))),
        CompressKind::Lz4 => lz4_flex::decompress_size_prepended(data)
            .map_err(|e| SegmentError::Corruption(format!("lz4 decompression failed: {}", e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_u8() {
        assert_eq!(CompressKind::from_u8(0), Some(CompressKind::None));
        assert_eq!(CompressKind::from_u8(1), Some(CompressKind::Snappy));
        assert_eq!(CompressKind::from_u8(2), Some(CompressKind::Lz4));
        assert_eq!(CompressKind::from_u8(3), None);
    }

    #[test]
    fn test_roundtrip_all_kinds() {
        let data: Vec<u8> = b"column data column data column data".repeat(50);
        for kind in [CompressKind::None, CompressKind::Snappy, CompressKind::Lz4] {
            let packed = compress(kind, &data).unwrap();
            assert_eq!(decompress(kind, &packed).unwrap(), data, "kind {:?}", kind);
        }
    }

    #[test]
    fn test_repetitive_data_shrinks() {
        let data = vec![42u8; 4096];
        assert!(compress(CompressKind::Lz4, &data).unwrap().len() < data.len());
        assert!(compress(CompressKind::Snappy, &data).unwrap().len() < data.len());
    }

    #[test]
    fn test_garbage_is_corruption() {
        let err = decompress(CompressKind::Lz4, &[10, 0, 0, 0, 0xF0]).unwrap_err();
        assert!(matches!(err, SegmentError::Corruption(_)));
    }

    #[test]
    fn test_serde_names() {
        let kind: CompressKind = serde_json::from_str("\"lz4\"").unwrap();
        assert_eq!(kind, CompressKind::Lz4);
        assert_eq!(CompressKind::Snappy.name(), "snappy");
    }
}
