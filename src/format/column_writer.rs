//! Per-column encoders.
//!
//! A `ColumnWriter` owns the parts every column has (row index, optional
//! PRESENT stream, optional bloom filters, statistics) plus one
//! [`ColumnEncoder`] variant for the value encoding. The streams themselves
//! live in the segment's [`OutStreamFactory`]; writers hold `StreamId`s.

use std::collections::HashMap;

use tracing::debug;

use crate::error::{Result, SegmentError};
use crate::format::bloom::{optimal_parameters, BloomFilter};
use crate::format::out_stream::{OutStreamFactory, StreamId};
use crate::format::run_length::RunLengthByteWriter;
use crate::format::statistics::ColumnStatistics;
use crate::format::stream_name::StreamKind;
use crate::format::types::{ColumnDataHeader, ColumnEncoding, ColumnMessage, RowIndexEntry};
use crate::format::varint::{write_uvarint, write_varint};
use crate::schema::{ColumnDef, Value};

// ── Encoders ───────────────────────────────────────────────────────

/// Value encoding state, one variant per [`ColumnEncoding`].
#[derive(Debug)]
pub enum ColumnEncoder {
    Byte {
        data: StreamId,
        encoder: RunLengthByteWriter,
    },
    Integer {
        data: StreamId,
    },
    Double {
        data: StreamId,
    },
    DirectString {
        data: StreamId,
        length: StreamId,
    },
    DictionaryString {
        data: StreamId,
        length: StreamId,
        dictionary_data: StreamId,
        ids: HashMap<String, u32>,
        /// Entries in id order.
        entries: Vec<String>,
        dictionary_bytes: u64,
    },
}

impl ColumnEncoder {
    fn create(encoding: ColumnEncoding, column_id: u32, factory: &mut OutStreamFactory) -> Result<Self> {
        Ok(match encoding {
            ColumnEncoding::Byte => Self::Byte {
                data: factory.create_stream(column_id, StreamKind::Data)?,
                encoder: RunLengthByteWriter::new(),
            },
            ColumnEncoding::Integer => Self::Integer {
                data: factory.create_stream(column_id, StreamKind::Data)?,
            },
            ColumnEncoding::Double => Self::Double {
                data: factory.create_stream(column_id, StreamKind::Data)?,
            },
            ColumnEncoding::DirectString => Self::DirectString {
                data: factory.create_stream(column_id, StreamKind::Data)?,
                length: factory.create_stream(column_id, StreamKind::Length)?,
            },
            ColumnEncoding::DictionaryString => Self::DictionaryString {
                data: factory.create_stream(column_id, StreamKind::Data)?,
                length: factory.create_stream(column_id, StreamKind::Length)?,
                dictionary_data: factory.create_stream(column_id, StreamKind::DictionaryData)?,
                ids: HashMap::new(),
                entries: Vec::new(),
                dictionary_bytes: 0,
            },
        })
    }

    /// Encode one non-null value. The caller has checked the type.
    fn write(&mut self, factory: &mut OutStreamFactory, value: &Value) -> Result<()> {
        match (self, value) {
            (Self::Byte { data, encoder }, Value::Boolean(b)) => {
                encoder.write(factory.get_mut(*data), *b as u8)
            }
            (Self::Byte { data, encoder }, Value::TinyInt(v)) => {
                encoder.write(factory.get_mut(*data), *v as u8)
            }
            (Self::Integer { data }, Value::Int(v)) => write_varint(factory.get_mut(*data), i64::from(*v)),
            (Self::Integer { data }, Value::BigInt(v)) => write_varint(factory.get_mut(*data), *v),
            (Self::Double { data }, Value::Double(v)) => {
                factory.get_mut(*data).write(&v.to_bits().to_le_bytes())
            }
            (Self::DirectString { data, length }, Value::Varchar(s)) => {
                write_uvarint(factory.get_mut(*length), s.len() as u64)?;
                factory.get_mut(*data).write(s.as_bytes())
            }
            (
                Self::DictionaryString {
                    data,
                    ids,
                    entries,
                    dictionary_bytes,
                    ..
                },
                Value::Varchar(s),
            ) => {
                let id = match ids.get(s.as_str()) {
                    Some(&id) => id,
                    None => {
                        let id = u32::try_from(entries.len()).map_err(|_| {
                            SegmentError::Allocation("dictionary exceeds u32 entries".into())
                        })?;
                        ids.insert(s.clone(), id);
                        entries.push(s.clone());
                        *dictionary_bytes += s.len() as u64;
                        id
                    }
                };
                write_uvarint(factory.get_mut(*data), u64::from(id))
            }
            (encoder, value) => Err(SegmentError::Schema(format!(
                "{} encoder cannot store {}",
                encoder.encoding().name(),
                value
            ))),
        }
    }

    fn record_positions(&self, factory: &OutStreamFactory, positions: &mut Vec<u64>) {
        match self {
            Self::Byte { data, encoder } => encoder.record_position(factory.get(*data), positions),
            Self::Integer { data } | Self::Double { data } | Self::DictionaryString { data, .. } => {
                factory.get(*data).record_position(positions)
            }
            Self::DirectString { data, length } => {
                factory.get(*data).record_position(positions);
                factory.get(*length).record_position(positions);
            }
        }
    }

    fn flush(&mut self, factory: &mut OutStreamFactory) -> Result<()> {
        match self {
            Self::Byte { data, encoder } => encoder.flush(factory.get_mut(*data)),
            Self::DictionaryString {
                length,
                dictionary_data,
                entries,
                ..
            } => {
                for entry in entries.iter() {
                    write_uvarint(factory.get_mut(*length), entry.len() as u64)?;
                    factory.get_mut(*dictionary_data).write(entry.as_bytes())?;
                }
                Ok(())
            }
            Self::Integer { .. } | Self::Double { .. } | Self::DirectString { .. } => Ok(()),
        }
    }

    fn estimate_buffered_memory(&self) -> u64 {
        match self {
            Self::Byte { encoder, .. } => encoder.estimate_buffered_memory(),
            Self::DictionaryString {
                entries,
                dictionary_bytes,
                ..
            } => 2 * (dictionary_bytes + (entries.len() * std::mem::size_of::<String>()) as u64),
            Self::Integer { .. } | Self::Double { .. } | Self::DirectString { .. } => 0,
        }
    }

    fn dictionary_size(&self) -> u32 {
        match self {
            Self::DictionaryString { entries, .. } => entries.len() as u32,
            _ => 0,
        }
    }

    pub fn encoding(&self) -> ColumnEncoding {
        match self {
            Self::Byte { .. } => ColumnEncoding::Byte,
            Self::Integer { .. } => ColumnEncoding::Integer,
            Self::Double { .. } => ColumnEncoding::Double,
            Self::DirectString { .. } => ColumnEncoding::DirectString,
            Self::DictionaryString { .. } => ColumnEncoding::DictionaryString,
        }
    }
}

// ── Present / Bloom ────────────────────────────────────────────────

/// One byte per row (1 = value present) through the run-length codec.
#[derive(Debug)]
struct PresentWriter {
    stream: StreamId,
    encoder: RunLengthByteWriter,
    has_null: bool,
}

#[derive(Debug)]
struct BloomWriter {
    stream: StreamId,
    num_bits: usize,
    num_hashes: usize,
    current: BloomFilter,
    finished: Vec<BloomFilter>,
}

impl BloomWriter {
    fn rotate(&mut self) {
        let next = BloomFilter::with_parameters(self.num_bits, self.num_hashes);
        self.finished.push(std::mem::replace(&mut self.current, next));
    }

    fn memory(&self) -> u64 {
        (self.finished.len() as u64 + 1) * self.current.serialized_size() as u64
    }
}

// ── ColumnWriter ───────────────────────────────────────────────────

#[derive(Debug)]
pub struct ColumnWriter {
    column: ColumnDef,
    row_index: StreamId,
    present: Option<PresentWriter>,
    bloom: Option<BloomWriter>,
    encoder: ColumnEncoder,
    index: Vec<RowIndexEntry>,
    /// Start positions of the block being written.
    block_positions: Vec<u64>,
    block_statistics: ColumnStatistics,
    segment_statistics: ColumnStatistics,
}

impl ColumnWriter {
    /// Allocate this column's streams and record the first block's start.
    pub fn init(
        column: &ColumnDef,
        factory: &mut OutStreamFactory,
        rows_per_block: u32,
        bloom_filter_fpp: f64,
    ) -> Result<Self> {
        let row_index = factory.create_stream(column.id, StreamKind::RowIndex)?;

        let present = if column.nullable {
            Some(PresentWriter {
                stream: factory.create_stream(column.id, StreamKind::Present)?,
                encoder: RunLengthByteWriter::new(),
                has_null: false,
            })
        } else {
            None
        };

        let encoder = ColumnEncoder::create(ColumnEncoding::for_column(column), column.id, factory)?;

        let bloom = if column.bloom_filter {
            let (num_bits, num_hashes) = optimal_parameters(rows_per_block as usize, bloom_filter_fpp);
            Some(BloomWriter {
                stream: factory.create_stream(column.id, StreamKind::BloomFilter)?,
                num_bits,
                num_hashes,
                current: BloomFilter::with_parameters(num_bits, num_hashes),
                finished: Vec::new(),
            })
        } else {
            None
        };

        let mut writer = Self {
            column: column.clone(),
            row_index,
            present,
            bloom,
            encoder,
            index: Vec::new(),
            block_positions: Vec::new(),
            block_statistics: ColumnStatistics::new(),
            segment_statistics: ColumnStatistics::new(),
        };
        writer.block_positions = writer.record_positions(factory);
        Ok(writer)
    }

    pub fn column(&self) -> &ColumnDef {
        &self.column
    }

    /// Reject a value this column cannot store, without touching any stream.
    pub fn check(&self, value: &Value) -> Result<()> {
        if value.is_null() && !self.column.nullable {
            return Err(SegmentError::Schema(format!(
                "column '{}' is NOT NULL",
                self.column.name
            )));
        }
        if !value.matches(self.column.column_type) {
            return Err(SegmentError::Schema(format!(
                "column '{}' is {}, got {}",
                self.column.name,
                self.column.column_type.name(),
                value
            )));
        }
        Ok(())
    }

    pub fn write(&mut self, factory: &mut OutStreamFactory, value: &Value) -> Result<()> {
        self.check(value)?;

        if let Some(present) = &mut self.present {
            present
                .encoder
                .write(factory.get_mut(present.stream), !value.is_null() as u8)?;
            present.has_null |= value.is_null();
        }

        self.block_statistics.update(value);
        if value.is_null() {
            return Ok(());
        }

        self.encoder.write(factory, value)?;
        if let (Some(bloom), Some(key)) = (&mut self.bloom, value.key_bytes()) {
            bloom.current.insert_bytes(&key);
        }
        Ok(())
    }

    /// Close the current block and start the next one at the current
    /// stream positions.
    pub fn create_row_index_entry(&mut self, factory: &OutStreamFactory) {
        let statistics = std::mem::take(&mut self.block_statistics);
        self.segment_statistics.merge(&statistics);
        let next = self.record_positions(factory);
        let positions = std::mem::replace(&mut self.block_positions, next);
        debug!(
            column = self.column.id,
            block = self.index.len(),
            rows = statistics.row_count(),
            "row index entry"
        );
        self.index.push(RowIndexEntry {
            positions,
            statistics,
        });
        if let Some(bloom) = &mut self.bloom {
            bloom.rotate();
        }
    }

    /// PRESENT positions (nullable columns) come first, then the encoder's.
    fn record_positions(&self, factory: &OutStreamFactory) -> Vec<u64> {
        let mut positions = Vec::new();
        if let Some(present) = &self.present {
            present
                .encoder
                .record_position(factory.get(present.stream), &mut positions);
        }
        self.encoder.record_positions(factory, &mut positions);
        positions
    }

    /// Bytes held by encoders and filters outside the streams.
    pub fn estimate_buffered_memory(&self) -> u64 {
        let present = self
            .present
            .as_ref()
            .map_or(0, |p| p.encoder.estimate_buffered_memory());
        let bloom = self.bloom.as_ref().map_or(0, BloomWriter::memory);
        present + bloom + self.encoder.estimate_buffered_memory()
    }

    /// `(hash_function_num, bit_num)` when this column has bloom filters.
    pub fn bloom_filter_info(&self) -> Option<(u32, u32)> {
        self.bloom
            .as_ref()
            .map(|b| (b.num_hashes as u32, b.num_bits as u32))
    }

    /// Number of closed blocks.
    pub fn block_count(&self) -> usize {
        self.index.len()
    }

    /// Flush encoders, write the row index and bloom filters, and append
    /// this column's message to `header`.
    pub fn finalize(&mut self, factory: &mut OutStreamFactory, header: &mut ColumnDataHeader) -> Result<()> {
        if let Some(present) = &mut self.present {
            if present.has_null {
                present.encoder.flush(factory.get_mut(present.stream))?;
            } else {
                factory.get_mut(present.stream).suppress();
            }
        }

        self.encoder.flush(factory)?;

        let index_bytes = bincode::serialize(&self.index)?;
        factory.get_mut(self.row_index).write(&index_bytes)?;

        if let Some(bloom) = &self.bloom {
            let mut buf = Vec::with_capacity(bloom.finished.len() * bloom.current.serialized_size());
            for filter in &bloom.finished {
                filter.write_to(&mut buf)?;
            }
            factory.get_mut(bloom.stream).write(&buf)?;
        }

        header.columns.push(ColumnMessage {
            column_id: self.column.id,
            name: self.column.name.clone(),
            column_type: self.column.column_type,
            encoding: self.encoder.encoding(),
            nullable: self.column.nullable,
            has_bloom_filter: self.bloom.is_some(),
            dictionary_size: self.encoder.dictionary_size(),
            statistics: self.segment_statistics.clone(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::CompressKind;
    use crate::format::stream_name::StreamName;
    use crate::schema::ColumnType;

    fn factory() -> OutStreamFactory {
        OutStreamFactory::new(CompressKind::None, 1024).unwrap()
    }

    fn header() -> ColumnDataHeader {
        ColumnDataHeader::new(CompressKind::None, 1024, 4)
    }

    #[test]
    fn test_init_allocates_streams() {
        let mut f = factory();
        let col = ColumnDef::new(7, "s", ColumnType::Varchar).with_dictionary().with_bloom_filter();
        ColumnWriter::init(&col, &mut f, 4, 0.05).unwrap();
        for kind in [
            StreamKind::RowIndex,
            StreamKind::Present,
            StreamKind::Data,
            StreamKind::Length,
            StreamKind::DictionaryData,
            StreamKind::BloomFilter,
        ] {
            assert!(f.find(&StreamName::new(7, kind)).is_some(), "missing {:?}", kind);
        }
    }

    #[test]
    fn test_not_null_column_has_no_present_stream() {
        let mut f = factory();
        let col = ColumnDef::new(0, "k", ColumnType::BigInt).not_null();
        let w = ColumnWriter::init(&col, &mut f, 4, 0.05).unwrap();
        assert!(f.find(&StreamName::new(0, StreamKind::Present)).is_none());
        assert_eq!(w.block_positions, vec![0, 0]);
    }

    #[test]
    fn test_rejects_null_and_wrong_type() {
        let mut f = factory();
        let col = ColumnDef::new(0, "k", ColumnType::Int).not_null();
        let mut w = ColumnWriter::init(&col, &mut f, 4, 0.05).unwrap();
        assert!(matches!(w.write(&mut f, &Value::Null), Err(SegmentError::Schema(_))));
        assert!(matches!(
            w.write(&mut f, &Value::Varchar("x".into())),
            Err(SegmentError::Schema(_))
        ));
        assert_eq!(f.total_buffer_size(), 0);
    }

    #[test]
    fn test_present_suppressed_without_nulls() {
        let mut f = factory();
        let col = ColumnDef::new(0, "v", ColumnType::Int);
        let mut w = ColumnWriter::init(&col, &mut f, 4, 0.05).unwrap();
        for i in 0..6 {
            w.write(&mut f, &Value::Int(i)).unwrap();
        }
        w.create_row_index_entry(&f);
        let mut h = header();
        w.finalize(&mut f, &mut h).unwrap();
        assert!(f.find(&StreamName::new(0, StreamKind::Present)).unwrap().is_suppressed());
        assert_eq!(h.columns[0].statistics.value_count, 6);
    }

    #[test]
    fn test_present_kept_with_nulls() {
        let mut f = factory();
        let col = ColumnDef::new(0, "v", ColumnType::Double);
        let mut w = ColumnWriter::init(&col, &mut f, 4, 0.05).unwrap();
        w.write(&mut f, &Value::Double(1.0)).unwrap();
        w.write(&mut f, &Value::Null).unwrap();
        w.create_row_index_entry(&f);
        let mut h = header();
        w.finalize(&mut f, &mut h).unwrap();
        let present = f.find(&StreamName::new(0, StreamKind::Present)).unwrap();
        assert!(!present.is_suppressed());
        assert!(present.total_buffer_size() > 0);
        assert_eq!(h.columns[0].statistics.null_count, 1);
    }

    #[test]
    fn test_row_index_entries_per_block() {
        let mut f = factory();
        let col = ColumnDef::new(0, "v", ColumnType::BigInt);
        let mut w = ColumnWriter::init(&col, &mut f, 2, 0.05).unwrap();
        for i in 0..5i64 {
            if i > 0 && i % 2 == 0 {
                w.create_row_index_entry(&f);
            }
            w.write(&mut f, &Value::BigInt(i * 1000)).unwrap();
        }
        w.create_row_index_entry(&f);
        assert_eq!(w.block_count(), 3);
        // present (stream pos, run skip) then data stream pos
        assert_eq!(w.index[0].positions.len(), 5);
        assert_eq!(w.index[0].positions, vec![0, 0, 0, 0, 0]);
        assert_eq!(w.index[1].positions[2], 2, "two present bytes buffered");
        assert_eq!(w.index[2].statistics.row_count(), 1);
        assert_eq!(w.segment_statistics.max, Some(Value::BigInt(4000)));
    }

    #[test]
    fn test_dictionary_deduplicates() {
        let mut f = factory();
        let col = ColumnDef::new(0, "s", ColumnType::Varchar).with_dictionary().not_null();
        let mut w = ColumnWriter::init(&col, &mut f, 8, 0.05).unwrap();
        for s in ["a", "bb", "a", "a", "bb", "ccc"] {
            w.write(&mut f, &Value::Varchar(s.into())).unwrap();
        }
        w.create_row_index_entry(&f);
        let mut h = header();
        w.finalize(&mut f, &mut h).unwrap();
        assert_eq!(h.columns[0].dictionary_size, 3);
        let dict = f.find(&StreamName::new(0, StreamKind::DictionaryData)).unwrap();
        assert_eq!(dict.total_buffer_size(), 6); // "abbccc", not yet framed
    }

    #[test]
    fn test_bloom_info_and_filters() {
        let mut f = factory();
        let col = ColumnDef::new(0, "k", ColumnType::Int).with_bloom_filter();
        let mut w = ColumnWriter::init(&col, &mut f, 16, 0.05).unwrap();
        let (hashes, bits) = w.bloom_filter_info().unwrap();
        let (exp_bits, exp_hashes) = optimal_parameters(16, 0.05);
        assert_eq!((bits as usize, hashes as usize), (exp_bits, exp_hashes));

        for i in 0..16 {
            w.write(&mut f, &Value::Int(i)).unwrap();
        }
        w.create_row_index_entry(&f);
        let filter = &w.bloom.as_ref().unwrap().finished[0];
        for i in 0..16 {
            assert!(filter.maybe_contains_bytes(&Value::Int(i).key_bytes().unwrap()));
        }
    }
}
