//! Segment metadata types and constants.
//!
//! `ColumnDataHeader` is the message carried by the file header. It is
//! bincode-encoded, so its size only depends on the values it holds; the
//! writer builds it completely before the first header write.

use serde::{Deserialize, Serialize};

use crate::compression::CompressKind;
use crate::error::{Result, SegmentError};
use crate::format::statistics::ColumnStatistics;
use crate::format::stream_name::{StreamKind, StreamName};
use crate::schema::{ColumnDef, ColumnType};

// ── Constants ──────────────────────────────────────────────────────

/// Magic string at the start of every header message.
pub const MAGIC_STRING: &str = "COLUMN DATA";

/// Format version
pub const FORMAT_VERSION: u32 = 1;

// ── Column Encoding ────────────────────────────────────────────────

/// Physical encoding of one column (stored as u8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ColumnEncoding {
    /// One byte per value through the run-length byte codec.
    Byte = 0,
    /// Zig-zag varints.
    Integer = 1,
    /// 8-byte little-endian IEEE 754.
    Double = 2,
    /// LENGTH varints plus raw DATA bytes.
    DirectString = 3,
    /// DATA holds dictionary ids; LENGTH and DICTIONARY_DATA hold the
    /// dictionary in first-seen order.
    DictionaryString = 4,
}

impl ColumnEncoding {
    pub fn for_column(column: &ColumnDef) -> Self {
        match column.column_type {
            ColumnType::Boolean | ColumnType::TinyInt => Self::Byte,
            ColumnType::Int | ColumnType::BigInt => Self::Integer,
            ColumnType::Double => Self::Double,
            ColumnType::Varchar if column.dictionary => Self::DictionaryString,
            ColumnType::Varchar => Self::DirectString,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Byte => "BYTE",
            Self::Integer => "INTEGER",
            Self::Double => "DOUBLE",
            Self::DirectString => "DIRECT",
            Self::DictionaryString => "DICTIONARY",
        }
    }
}

// ── Header Message ─────────────────────────────────────────────────

/// One non-suppressed stream, in payload order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub length: u64,
    pub column_id: u32,
    pub kind: StreamKind,
}

impl StreamInfo {
    pub fn name(&self) -> StreamName {
        StreamName::new(self.column_id, self.kind)
    }
}

/// Per-column metadata written at column finalize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMessage {
    pub column_id: u32,
    pub name: String,
    pub column_type: ColumnType,
    pub encoding: ColumnEncoding,
    pub nullable: bool,
    pub has_bloom_filter: bool,
    /// Entries in the dictionary; 0 unless dictionary encoded.
    pub dictionary_size: u32,
    pub statistics: ColumnStatistics,
}

/// Segment metadata message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDataHeader {
    pub magic: String,
    pub version: u32,
    pub number_of_rows: u64,
    pub compress_kind: CompressKind,
    pub stream_buffer_size: u32,
    pub num_rows_per_block: u32,
    /// Shared by every bloom filter in the segment.
    pub bf_hash_function_num: Option<u32>,
    pub bf_bit_num: Option<u32>,
    pub stream_info: Vec<StreamInfo>,
    pub columns: Vec<ColumnMessage>,
    pub index_length: u64,
    pub data_length: u64,
}

impl ColumnDataHeader {
    pub fn new(compress_kind: CompressKind, stream_buffer_size: u32, num_rows_per_block: u32) -> Self {
        Self {
            magic: MAGIC_STRING.to_string(),
            version: FORMAT_VERSION,
            number_of_rows: 0,
            compress_kind,
            stream_buffer_size,
            num_rows_per_block,
            bf_hash_function_num: None,
            bf_bit_num: None,
            stream_info: Vec::new(),
            columns: Vec::new(),
            index_length: 0,
            data_length: 0,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.magic != MAGIC_STRING {
            return Err(SegmentError::InvalidFormat(format!(
                "Not a column data segment: expected {:?}, got {:?}",
                MAGIC_STRING, self.magic
            )));
        }
        if self.version != FORMAT_VERSION {
            return Err(SegmentError::InvalidFormat(format!(
                "Unsupported segment version: {}",
                self.version
            )));
        }
        if self.num_rows_per_block == 0 {
            return Err(SegmentError::InvalidFormat("num_rows_per_block is zero".into()));
        }
        for pair in self.stream_info.windows(2) {
            if pair[0].name() >= pair[1].name() {
                return Err(SegmentError::InvalidFormat(format!(
                    "stream info out of order: {} before {}",
                    pair[0].name(),
                    pair[1].name()
                )));
            }
        }
        let payload = self
            .stream_info
            .iter()
            .try_fold(0u64, |total, s| total.checked_add(s.length))
            .ok_or_else(|| SegmentError::Corruption("stream lengths overflow u64".into()))?;
        let declared = self.index_length.checked_add(self.data_length).ok_or_else(|| {
            SegmentError::Corruption(format!(
                "index length {} + data length {} overflows u64",
                self.index_length, self.data_length
            ))
        })?;
        if payload != declared {
            return Err(SegmentError::InvalidFormat(format!(
                "stream lengths sum to {}, header says {} index + {} data",
                payload, self.index_length, self.data_length
            )));
        }
        Ok(())
    }

    /// Total payload bytes following the header. Saturates on a header
    /// that has not passed [`validate`](Self::validate).
    pub fn payload_length(&self) -> u64 {
        self.index_length.saturating_add(self.data_length)
    }

    /// Bloom filter `(num_bits, num_hashes)` if the segment has any.
    pub fn bloom_filter_parameters(&self) -> Option<(usize, usize)> {
        match (self.bf_bit_num, self.bf_hash_function_num) {
            (Some(bits), Some(hashes)) => Some((bits as usize, hashes as usize)),
            _ => None,
        }
    }
}

// ── Row Index ──────────────────────────────────────────────────────

/// Checkpoint for one block of one column.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RowIndexEntry {
    pub positions: Vec<u64>,
    pub statistics: ColumnStatistics,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_with_streams(streams: Vec<StreamInfo>) -> ColumnDataHeader {
        let mut header = ColumnDataHeader::new(CompressKind::None, 1024, 16);
        for s in &streams {
            if s.kind.is_index() {
                header.index_length += s.length;
            } else {
                header.data_length += s.length;
            }
        }
        header.stream_info = streams;
        header
    }

    #[test]
    fn test_validate_accepts_ordered_streams() {
        let header = header_with_streams(vec![
            StreamInfo { length: 10, column_id: 0, kind: StreamKind::RowIndex },
            StreamInfo { length: 20, column_id: 0, kind: StreamKind::Data },
            StreamInfo { length: 5, column_id: 0, kind: StreamKind::BloomFilter },
        ]);
        header.validate().unwrap();
        assert_eq!(header.index_length, 15);
        assert_eq!(header.payload_length(), 35);
    }

    #[test]
    fn test_validate_rejects_unordered_streams() {
        let header = header_with_streams(vec![
            StreamInfo { length: 1, column_id: 1, kind: StreamKind::Data },
            StreamInfo { length: 1, column_id: 0, kind: StreamKind::RowIndex },
        ]);
        assert!(header.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_overflowing_lengths() {
        let mut header = ColumnDataHeader::new(CompressKind::None, 1024, 16);
        header.stream_info = vec![
            StreamInfo { length: u64::MAX, column_id: 0, kind: StreamKind::RowIndex },
            StreamInfo { length: 2, column_id: 0, kind: StreamKind::Data },
        ];
        header.index_length = u64::MAX;
        header.data_length = 2;
        let err = header.validate().unwrap_err();
        assert!(matches!(err, SegmentError::Corruption(_)), "unexpected error: {}", err);
        assert_eq!(header.payload_length(), u64::MAX);
    }

    #[test]
    fn test_validate_rejects_bad_magic() {
        let mut header = header_with_streams(Vec::new());
        header.magic = "ROW DATA".into();
        let err = header.validate().unwrap_err();
        assert!(err.to_string().contains("Not a column data segment"));
    }

    #[test]
    fn test_encoding_for_column() {
        let col = ColumnDef::new(0, "s", ColumnType::Varchar);
        assert_eq!(ColumnEncoding::for_column(&col), ColumnEncoding::DirectString);
        assert_eq!(
            ColumnEncoding::for_column(&col.with_dictionary()),
            ColumnEncoding::DictionaryString
        );
        assert_eq!(
            ColumnEncoding::for_column(&ColumnDef::new(1, "b", ColumnType::Boolean)),
            ColumnEncoding::Byte
        );
    }
}
