//! Segment reader (memory-mapped or from bytes).
//!
//! Streams are located by walking the header's stream-info list from the
//! payload offset; the list is in on-disk order, so offsets are a running
//! sum of lengths. A stream with no entry was suppressed at write time and
//! readers fall back to its default (no PRESENT stream = no nulls).

use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use memmap2::Mmap;
use tracing::debug;

use crate::checksum::{fletcher32_update, FLETCHER32_INIT};
use crate::error::{Result, SegmentError};
use crate::format::bloom::BloomFilter;
use crate::format::column_reader::ColumnReader;
use crate::format::file_header::FileHeader;
use crate::format::in_stream::InStream;
use crate::format::statistics::ColumnStatistics;
use crate::format::stream_name::{StreamKind, StreamName};
use crate::format::types::{ColumnDataHeader, ColumnMessage, RowIndexEntry};
use crate::schema::{Row, Value};

/// Upper bound on rows reserved up front; the row count comes from the
/// header and is not trusted for allocation.
const PREALLOCATED_ROWS: u64 = 1 << 16;

#[derive(Debug)]
pub struct SegmentReader {
    data: Arc<[u8]>,
    header: FileHeader<ColumnDataHeader>,
    payload_offset: usize,
    /// `(start, length)` of every stream present in the file.
    streams: HashMap<StreamName, (usize, usize)>,
    /// Decoded on first use, one slot per column.
    row_indexes: Vec<OnceLock<Vec<RowIndexEntry>>>,
    bloom_filters: Vec<OnceLock<Option<Vec<BloomFilter>>>>,
}

impl SegmentReader {
    /// Open and verify a segment file (memory-mapped).
    pub fn open(path: &Path) -> Result<Self> {
        let reader = Self::open_unchecked(path)?;
        reader.verify_checksum()?;
        Ok(reader)
    }

    /// Open without verifying the payload checksum. The header is still
    /// validated.
    pub fn open_unchecked(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file) }?;
        Self::from_bytes_unchecked(&mmap)
    }

    /// Parse and verify a segment held in memory.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let reader = Self::from_bytes_unchecked(bytes)?;
        reader.verify_checksum()?;
        Ok(reader)
    }

    pub fn from_bytes_unchecked(bytes: &[u8]) -> Result<Self> {
        // 1. Header
        let header: FileHeader<ColumnDataHeader> = FileHeader::from_bytes(bytes)?;
        header.message().validate()?;

        // 2. Length checks
        if header.file_length() == 0 {
            return Err(SegmentError::InvalidFormat(
                "segment header was never finalized".into(),
            ));
        }
        if header.file_length() != bytes.len() as u64 {
            return Err(SegmentError::Corruption(format!(
                "header says {} bytes, file has {}",
                header.file_length(),
                bytes.len()
            )));
        }
        let payload_offset = header.size()?;
        let payload_end = payload_offset
            .checked_add(header.message().payload_length())
            .ok_or_else(|| SegmentError::Corruption("payload end overflows u64".into()))?;
        if payload_end != header.file_length() {
            return Err(SegmentError::Corruption(format!(
                "payload at {} of {} bytes does not end at file length {}",
                payload_offset,
                header.message().payload_length(),
                header.file_length()
            )));
        }

        // 3. Stream offset table
        let mut streams = HashMap::with_capacity(header.message().stream_info.len());
        let mut offset = payload_offset as usize;
        for info in &header.message().stream_info {
            let end = usize::try_from(info.length)
                .ok()
                .and_then(|length| offset.checked_add(length))
                .filter(|&end| end <= bytes.len())
                .ok_or_else(|| {
                    SegmentError::Corruption(format!(
                        "stream {} of {} bytes runs past the end of the file",
                        info.name(),
                        info.length
                    ))
                })?;
            if streams.insert(info.name(), (offset, end - offset)).is_some() {
                return Err(SegmentError::InvalidFormat(format!(
                    "stream {} listed twice",
                    info.name()
                )));
            }
            offset = end;
        }

        debug!(
            rows = header.message().number_of_rows,
            streams = streams.len(),
            "segment opened"
        );

        let column_count = header.message().columns.len();
        Ok(Self {
            data: Arc::from(bytes),
            header,
            payload_offset: payload_offset as usize,
            streams,
            row_indexes: (0..column_count).map(|_| OnceLock::new()).collect(),
            bloom_filters: (0..column_count).map(|_| OnceLock::new()).collect(),
        })
    }

    // ── Header ─────────────────────────────────────────────────────

    pub fn header(&self) -> &ColumnDataHeader {
        self.header.message()
    }

    pub fn file_length(&self) -> u64 {
        self.header.file_length()
    }

    pub fn checksum(&self) -> u32 {
        self.header.checksum()
    }

    pub fn payload_offset(&self) -> u64 {
        self.payload_offset as u64
    }

    pub fn number_of_rows(&self) -> u64 {
        self.header().number_of_rows
    }

    pub fn columns(&self) -> &[ColumnMessage] {
        &self.header().columns
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns().iter().position(|c| c.name == name)
    }

    pub fn block_count(&self) -> usize {
        let rows = self.number_of_rows();
        let per_block = u64::from(self.header().num_rows_per_block);
        (rows / per_block + u64::from(rows % per_block != 0)) as usize
    }

    // ── Streams ────────────────────────────────────────────────────

    pub fn has_stream(&self, column_id: u32, kind: StreamKind) -> bool {
        self.streams.contains_key(&StreamName::new(column_id, kind))
    }

    pub fn stream(&self, column_id: u32, kind: StreamKind) -> Option<InStream> {
        self.streams
            .get(&StreamName::new(column_id, kind))
            .map(|&(start, len)| InStream::new(self.data.clone(), start, len, self.header().compress_kind))
    }

    /// Recompute the payload checksum and compare it with the header's.
    pub fn verify_checksum(&self) -> Result<()> {
        let mut computed = FLETCHER32_INIT;
        let mut offset = self.payload_offset;
        for info in &self.header().stream_info {
            let end = offset + info.length as usize;
            computed = fletcher32_update(computed, &self.data[offset..end]);
            offset = end;
        }
        if computed != self.checksum() {
            return Err(SegmentError::ChecksumMismatch {
                expected: self.checksum(),
                computed,
            });
        }
        Ok(())
    }

    // ── Columns ────────────────────────────────────────────────────

    fn column_message(&self, column: usize) -> Result<&ColumnMessage> {
        self.columns().get(column).ok_or_else(|| {
            SegmentError::Schema(format!(
                "column index {} out of range (segment has {})",
                column,
                self.columns().len()
            ))
        })
    }

    pub fn column_reader(&self, column: usize) -> Result<ColumnReader> {
        let message = self.column_message(column)?;
        ColumnReader::new(message, |kind| self.stream(message.column_id, kind))
    }

    /// Block checkpoints of one column, decoded once and then cached.
    pub fn row_index(&self, column: usize) -> Result<&[RowIndexEntry]> {
        let message = self.column_message(column)?;
        if let Some(index) = self.row_indexes[column].get() {
            return Ok(index.as_slice());
        }
        let mut stream = self
            .stream(message.column_id, StreamKind::RowIndex)
            .ok_or_else(|| {
                SegmentError::Corruption(format!("column {} has no row index", message.column_id))
            })?;
        let index: Vec<RowIndexEntry> = bincode::deserialize(&stream.read_to_end()?)?;
        if index.len() != self.block_count() {
            return Err(SegmentError::Corruption(format!(
                "column {} has {} row index entries, expected {}",
                message.column_id,
                index.len(),
                self.block_count()
            )));
        }
        Ok(self.row_indexes[column].get_or_init(|| index).as_slice())
    }

    pub fn block_statistics(&self, column: usize, block: usize) -> Result<&ColumnStatistics> {
        self.row_index(column)?
            .get(block)
            .map(|entry| &entry.statistics)
            .ok_or_else(|| SegmentError::Schema(format!("block {} out of range", block)))
    }

    /// Per-block bloom filters of a column, or `None` if it has none.
    /// Decoded once and then cached.
    pub fn bloom_filters(&self, column: usize) -> Result<Option<&[BloomFilter]>> {
        let message = self.column_message(column)?;
        if let Some(filters) = self.bloom_filters[column].get() {
            return Ok(filters.as_deref());
        }
        if !message.has_bloom_filter {
            return Ok(self.bloom_filters[column].get_or_init(|| None).as_deref());
        }
        let mut stream = self
            .stream(message.column_id, StreamKind::BloomFilter)
            .ok_or_else(|| {
                SegmentError::Corruption(format!("column {} has no bloom filter stream", message.column_id))
            })?;
        let bytes = stream.read_to_end()?;

        let mut filters = Vec::new();
        let mut rest = &bytes[..];
        while !rest.is_empty() {
            let filter = BloomFilter::from_bytes(rest)?;
            rest = &rest[filter.serialized_size()..];
            filters.push(filter);
        }
        if filters.len() != self.block_count() {
            return Err(SegmentError::Corruption(format!(
                "column {} has {} bloom filters, expected {}",
                message.column_id,
                filters.len(),
                self.block_count()
            )));
        }
        Ok(self.bloom_filters[column].get_or_init(|| Some(filters)).as_deref())
    }

    /// `false` only when `value` is definitely absent from the block. Uses
    /// the bloom filter when the column has one, block min/max otherwise.
    pub fn block_may_contain(&self, column: usize, block: usize, value: &Value) -> Result<bool> {
        let statistics = self.block_statistics(column, block)?;
        if !statistics.may_contain(value) {
            return Ok(false);
        }
        match (self.bloom_filters(column)?, value.key_bytes()) {
            (Some(filters), Some(key)) => Ok(filters
                .get(block)
                .map_or(true, |filter| filter.maybe_contains_bytes(&key))),
            _ => Ok(true),
        }
    }

    // ── Rows ───────────────────────────────────────────────────────

    pub fn read_all_rows(&self) -> Result<Vec<Row>> {
        self.rows_from(0)
    }

    /// Rows `start..`, reached by seeking to the enclosing block and
    /// skipping inside it.
    pub fn rows_from(&self, start: u64) -> Result<Vec<Row>> {
        let total = self.number_of_rows();
        if start >= total {
            return Ok(Vec::new());
        }
        let per_block = u64::from(self.header().num_rows_per_block);
        let block = (start / per_block) as usize;
        let within = start % per_block;

        let mut readers = Vec::with_capacity(self.columns().len());
        for column in 0..self.columns().len() {
            let mut reader = self.column_reader(column)?;
            if block > 0 {
                let index = self.row_index(column)?;
                reader.seek(&index[block])?;
            }
            reader.skip(within)?;
            readers.push(reader);
        }

        let mut rows = Vec::with_capacity((total - start).min(PREALLOCATED_ROWS) as usize);
        for _ in start..total {
            let row = readers
                .iter_mut()
                .map(ColumnReader::next)
                .collect::<Result<Row>>()?;
            rows.push(row);
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::CompressKind;
    use crate::format::types::StreamInfo;
    use std::io::Cursor;

    /// Header listing one DATA stream per length, followed by 8 payload bytes.
    fn crafted_segment(stream_lengths: &[u64]) -> Vec<u8> {
        let mut message = ColumnDataHeader::new(CompressKind::None, 1024, 16);
        message.stream_info = stream_lengths
            .iter()
            .enumerate()
            .map(|(i, &length)| StreamInfo {
                length,
                column_id: i as u32,
                kind: StreamKind::Data,
            })
            .collect();
        message.data_length = stream_lengths.iter().fold(0u64, |a, &l| a.wrapping_add(l));

        let mut header = FileHeader::new(message);
        let mut file = Cursor::new(Vec::new());
        let offset = header.prepare(&mut file).unwrap();
        header.set_file_length(offset + 8);
        header.serialize(&mut file).unwrap();

        let mut bytes = file.into_inner();
        bytes.resize(offset as usize + 8, 0);
        bytes
    }

    #[test]
    fn test_well_formed_lengths_open() {
        let reader = SegmentReader::from_bytes_unchecked(&crafted_segment(&[3, 5])).unwrap();
        assert_eq!(reader.stream(1, StreamKind::Data).map(|_| ()), Some(()));
        assert!(!reader.has_stream(2, StreamKind::Data));
    }

    #[test]
    fn test_stream_lengths_overflow_is_corruption() {
        let err = SegmentReader::from_bytes_unchecked(&crafted_segment(&[u64::MAX, 2])).unwrap_err();
        assert!(matches!(err, SegmentError::Corruption(_)), "unexpected error: {}", err);
    }

    #[test]
    fn test_payload_end_overflow_is_corruption() {
        let err = SegmentReader::from_bytes_unchecked(&crafted_segment(&[u64::MAX - 4])).unwrap_err();
        assert!(matches!(err, SegmentError::Corruption(_)), "unexpected error: {}", err);
    }
}
