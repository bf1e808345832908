//! Segment writer.
//!
//! Rows go in one at a time and are split into per-column streams in
//! memory. `finalize` lays the segment out on disk:
//!
//! ```text
//! [FileHeader: fixed 24 bytes + ColumnDataHeader]
//! [ROW_INDEX streams, by column]
//! [every other stream, by (column, kind)]
//! ```
//!
//! The header is written twice. The placeholder fixes the payload offset,
//! and the rewrite after the payload fills in the file length and checksum.

use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::checksum::FLETCHER32_INIT;
use crate::error::{Result, SegmentError};
use crate::format::column_writer::ColumnWriter;
use crate::format::file_header::FileHeader;
use crate::format::out_stream::OutStreamFactory;
use crate::format::types::{ColumnDataHeader, StreamInfo};
use crate::schema::{TableSchema, Value, WriterOptions};
use crate::throttle::{Clock, SystemClock, Throttle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    Created,
    Initialized,
    Writing,
    Finalized,
}

impl WriterState {
    pub fn name(self) -> &'static str {
        match self {
            Self::Created => "Created",
            Self::Initialized => "Initialized",
            Self::Writing => "Writing",
            Self::Finalized => "Finalized",
        }
    }
}

/// Builds one immutable segment file. Single-threaded; one instance per
/// output path.
#[derive(Debug)]
pub struct SegmentWriter {
    path: PathBuf,
    schema: Arc<TableSchema>,
    options: WriterOptions,
    clock: Arc<dyn Clock>,
    state: WriterState,
    factory: Option<OutStreamFactory>,
    columns: Vec<ColumnWriter>,
    write_mbytes_per_sec: u32,
    row_count: u64,
    row_in_block: u32,
}

impl SegmentWriter {
    pub fn new(path: impl Into<PathBuf>, schema: Arc<TableSchema>, options: WriterOptions) -> Self {
        Self {
            path: path.into(),
            schema,
            options,
            clock: Arc::new(SystemClock::new()),
            state: WriterState::Created,
            factory: None,
            columns: Vec::new(),
            write_mbytes_per_sec: 0,
            row_count: 0,
            row_in_block: 0,
        }
    }

    /// Replace the clock the write throttle sleeps on.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> WriterState {
        self.state
    }

    pub fn row_count(&self) -> u64 {
        self.row_count
    }

    fn expect_state(&self, allowed: &[WriterState], expected: &'static str) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(SegmentError::InvalidState {
                expected,
                found: self.state.name(),
            })
        }
    }

    /// Allocate streams and one column writer per root column. No file is
    /// created until `finalize`.
    pub fn init(&mut self, write_mbytes_per_sec: u32) -> Result<()> {
        self.expect_state(&[WriterState::Created], "Created")?;
        self.schema.validate()?;

        let mut factory = OutStreamFactory::new(
            self.schema.compress_kind,
            self.options.stream_buffer_size as usize,
        )?;
        let mut columns = Vec::new();
        for column in self.schema.columns.iter().filter(|c| c.is_root_column) {
            columns.push(ColumnWriter::init(
                column,
                &mut factory,
                self.schema.num_rows_per_block,
                self.schema.bloom_filter_fpp,
            )?);
        }

        debug!(
            path = %self.path.display(),
            columns = columns.len(),
            streams = factory.len(),
            "segment writer initialized"
        );
        self.factory = Some(factory);
        self.columns = columns;
        self.write_mbytes_per_sec = write_mbytes_per_sec;
        self.state = WriterState::Initialized;
        Ok(())
    }

    /// Append one row: one value per root column, in schema order.
    pub fn write(&mut self, row: &[Value]) -> Result<()> {
        self.expect_state(&[WriterState::Initialized, WriterState::Writing], "Initialized or Writing")?;

        if row.len() != self.columns.len() {
            return Err(SegmentError::Schema(format!(
                "row has {} values, segment has {} root columns",
                row.len(),
                self.columns.len()
            )));
        }
        // Validate the whole row first so a bad value never leaves a
        // partially written row behind.
        for (column, value) in self.columns.iter().zip(row) {
            column.check(value)?;
        }

        let rows_per_block = self.schema.num_rows_per_block;
        let factory = self.factory.as_mut().ok_or_else(not_initialized)?;

        if self.row_in_block == rows_per_block {
            for column in &mut self.columns {
                column.create_row_index_entry(factory);
            }
            self.row_in_block = 0;
        }

        for (column, value) in self.columns.iter_mut().zip(row) {
            if let Err(e) = column.write(factory, value) {
                warn!(column = column.column().id, row = self.row_count, error = %e, "column write failed");
                return Err(e);
            }
        }

        self.row_count += 1;
        self.row_in_block += 1;
        self.state = WriterState::Writing;
        Ok(())
    }

    /// Bytes this segment would take if finalized now, roughly.
    pub fn estimate_segment_size(&self) -> u64 {
        let streams = self.factory.as_ref().map_or(0, OutStreamFactory::total_buffer_size);
        let columns: u64 = self.columns.iter().map(ColumnWriter::estimate_buffered_memory).sum();
        streams + columns
    }

    /// Write the segment file and return its length.
    ///
    /// On failure the writer is finished and whatever part of the file was
    /// written stays on disk; removing it is up to the caller.
    pub fn finalize(&mut self) -> Result<u64> {
        self.expect_state(&[WriterState::Initialized, WriterState::Writing], "Initialized or Writing")?;
        self.state = WriterState::Finalized;

        match self.finalize_inner() {
            Ok(file_length) => Ok(file_length),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "segment finalize failed");
                Err(e)
            }
        }
    }

    fn finalize_inner(&mut self) -> Result<u64> {
        let header = self.build_header()?;
        let path = self.path.clone();
        let clock = self.clock.clone();
        let write_mbytes_per_sec = self.write_mbytes_per_sec;
        let factory = self.factory.as_ref().ok_or_else(not_initialized)?;

        // Step 1: Exclusive create. Segments are never overwritten.
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::AlreadyExists => SegmentError::AlreadyExists(path.display().to_string()),
                _ => SegmentError::Io(e),
            })?;

        // Step 2: Placeholder header, then seek to the payload offset.
        let mut file_header = FileHeader::new(header);
        file_header.prepare(&mut file)?;
        let payload_offset = file_header.size()?;
        file.seek(SeekFrom::Start(payload_offset))?;

        // Step 3: Payload in stream order, checksummed and throttled.
        let mut throttle = Throttle::new(clock, write_mbytes_per_sec);
        let mut checksum = FLETCHER32_INIT;
        for (name, stream) in factory.sorted() {
            if stream.is_suppressed() {
                continue;
            }
            checksum = stream.checksum(checksum);
            stream.write_to_file(&mut file, &mut throttle)?;
            debug!(stream = %name, bytes = stream.stream_length(), "stream written");
        }

        // Step 4: Rewrite the header with final length and checksum.
        let file_length = file.stream_position()?;
        file_header.set_file_length(file_length);
        file_header.set_checksum(checksum);
        file_header.serialize(&mut file)?;

        // Step 5: Durable before reporting success.
        file.sync_all()?;
        drop(file);

        let message = file_header.message();
        info!(
            path = %path.display(),
            rows = message.number_of_rows,
            streams = message.stream_info.len(),
            index_length = message.index_length,
            data_length = message.data_length,
            file_length,
            checksum = %format!("{:#010x}", checksum),
            "segment finalized"
        );
        Ok(file_length)
    }

    /// Close the last block, finalize every column and flush all streams,
    /// then describe the resulting stream set.
    fn build_header(&mut self) -> Result<ColumnDataHeader> {
        let compress_kind = self.schema.compress_kind;
        let rows_per_block = self.schema.num_rows_per_block;
        let stream_buffer_size = self.options.stream_buffer_size;
        let row_count = self.row_count;
        let partial_block = self.row_in_block > 0;

        let factory = self.factory.as_mut().ok_or_else(not_initialized)?;

        if partial_block {
            for column in &mut self.columns {
                column.create_row_index_entry(factory);
            }
        }

        let mut header = ColumnDataHeader::new(compress_kind, stream_buffer_size, rows_per_block);
        header.number_of_rows = row_count;

        for column in &mut self.columns {
            column.finalize(factory, &mut header)?;
            // One parameter set per segment: the first bloom column's.
            if header.bf_hash_function_num.is_none() {
                if let Some((hashes, bits)) = column.bloom_filter_info() {
                    header.bf_hash_function_num = Some(hashes);
                    header.bf_bit_num = Some(bits);
                }
            }
        }

        factory.flush_all()?;

        for (name, stream) in factory.sorted() {
            if stream.is_suppressed() {
                continue;
            }
            let length = stream.stream_length();
            if name.kind.is_index() {
                header.index_length += length;
            } else {
                header.data_length += length;
            }
            header.stream_info.push(StreamInfo {
                length,
                column_id: name.column_id,
                kind: name.kind,
            });
        }
        Ok(header)
    }
}

fn not_initialized() -> SegmentError {
    SegmentError::InvalidState {
        expected: "Initialized",
        found: "Created",
    }
}
