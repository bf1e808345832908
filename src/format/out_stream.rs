//! Buffered, chunk-compressed output streams and the per-segment stream set.
//!
//! ## Chunk framing
//!
//! ```text
//! [header: u32 LE = (chunk_len << 1) | is_original]
//! [chunk bytes: chunk_len]
//! ```
//!
//! `is_original = 1` marks bytes stored as written. Otherwise the chunk is
//! compressed with the segment's `CompressKind`. Uncompressed chunks never
//! exceed the stream buffer size.

use std::collections::HashMap;
use std::io::Write;

use rayon::prelude::*;

use crate::checksum::fletcher32_update;
use crate::compression::{compress, CompressKind};
use crate::error::{Result, SegmentError};
use crate::format::stream_name::{StreamKind, StreamName};
use crate::throttle::Throttle;

/// Size of the per-chunk framing header.
pub const CHUNK_HEADER_SIZE: usize = 4;

/// Largest chunk length representable in the 31-bit length field.
pub const MAX_CHUNK_SIZE: usize = (u32::MAX >> 1) as usize;

/// Bytes handed to the file per `write_all` call when streaming the payload.
pub const WRITE_CHUNK_SIZE: usize = 64 * 1024;

// ── ByteSink ───────────────────────────────────────────────────────

/// Destination the encoders write into.
pub trait ByteSink {
    fn put(&mut self, bytes: &[u8]) -> Result<()>;

    /// Append this sink's current position to a row index entry.
    fn record_position(&self, positions: &mut Vec<u64>);
}

impl ByteSink for Vec<u8> {
    fn put(&mut self, bytes: &[u8]) -> Result<()> {
        self.extend_from_slice(bytes);
        Ok(())
    }

    fn record_position(&self, positions: &mut Vec<u64>) {
        positions.push(self.len() as u64);
    }
}

// ── OutStream ──────────────────────────────────────────────────────

/// In-memory output for one logical stream.
#[derive(Debug)]
pub struct OutStream {
    compress_kind: CompressKind,
    buffer_size: usize,
    /// Bytes not yet framed into a chunk.
    current: Vec<u8>,
    /// Framed chunks, exactly as they will appear on disk.
    output: Vec<u8>,
    suppressed: bool,
}

impl OutStream {
    pub fn new(compress_kind: CompressKind, buffer_size: usize) -> Self {
        debug_assert!(buffer_size > 0 && buffer_size <= MAX_CHUNK_SIZE);
        Self {
            compress_kind,
            buffer_size,
            current: Vec::new(),
            output: Vec::new(),
            suppressed: false,
        }
    }

    /// Append bytes, spilling a chunk each time the buffer fills.
    pub fn write(&mut self, mut data: &[u8]) -> Result<()> {
        while !data.is_empty() {
            let room = self.buffer_size - self.current.len();
            let take = room.min(data.len());
            self.current.extend_from_slice(&data[..take]);
            data = &data[take..];
            if self.current.len() == self.buffer_size {
                self.spill()?;
            }
        }
        Ok(())
    }

    pub fn write_byte(&mut self, byte: u8) -> Result<()> {
        self.write(&[byte])
    }

    /// Record the position the next written byte will land at:
    /// `(chunk_offset, offset_in_chunk)`.
    pub fn record_position(&self, positions: &mut Vec<u64>) {
        positions.push(self.output.len() as u64);
        positions.push(self.current.len() as u64);
    }

    fn spill(&mut self) -> Result<()> {
        if self.current.is_empty() {
            return Ok(());
        }

        let compressed = match self.compress_kind {
            CompressKind::None => None,
            kind => {
                let packed = compress(kind, &self.current)?;
                (packed.len() < self.current.len()).then_some(packed)
            }
        };

        match compressed {
            Some(packed) => {
                let header = (packed.len() as u32) << 1;
                self.output.extend_from_slice(&header.to_le_bytes());
                self.output.extend_from_slice(&packed);
            }
            None => {
                let header = ((self.current.len() as u32) << 1) | 1;
                self.output.extend_from_slice(&header.to_le_bytes());
                self.output.extend_from_slice(&self.current);
            }
        }
        self.current.clear();
        Ok(())
    }

    /// Frame whatever is still buffered. Safe to call more than once.
    pub fn flush(&mut self) -> Result<()> {
        self.spill()
    }

    /// Drop everything written and exclude this stream from the file.
    pub fn suppress(&mut self) {
        self.current = Vec::new();
        self.output = Vec::new();
        self.suppressed = true;
    }

    pub fn is_suppressed(&self) -> bool {
        self.suppressed
    }

    /// On-disk length. Only final after `flush`.
    pub fn stream_length(&self) -> u64 {
        self.output.len() as u64
    }

    /// Framed plus still-buffered bytes.
    pub fn total_buffer_size(&self) -> u64 {
        (self.output.len() + self.current.len()) as u64
    }

    /// Fold this stream's on-disk bytes into a running checksum.
    pub fn checksum(&self, running: u32) -> u32 {
        fletcher32_update(running, &self.output)
    }

    /// Framed bytes, as written to the file.
    pub fn bytes(&self) -> &[u8] {
        &self.output
    }

    /// Stream the framed bytes to `writer` in fixed-size pieces, charging
    /// each piece to `throttle`.
    pub fn write_to_file<W: Write>(&self, writer: &mut W, throttle: &mut Throttle) -> Result<()> {
        for piece in self.output.chunks(WRITE_CHUNK_SIZE) {
            writer.write_all(piece)?;
            throttle.consume(piece.len() as u64);
        }
        Ok(())
    }
}

impl ByteSink for OutStream {
    fn put(&mut self, bytes: &[u8]) -> Result<()> {
        self.write(bytes)
    }

    fn record_position(&self, positions: &mut Vec<u64>) {
        OutStream::record_position(self, positions)
    }
}

// ── OutStreamFactory ───────────────────────────────────────────────

/// Handle to a stream owned by an [`OutStreamFactory`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamId(usize);

/// Owns every output stream of one segment write.
///
/// Streams are kept in creation order; [`sorted`](Self::sorted) produces the
/// on-disk order with an explicit sort.
#[derive(Debug)]
pub struct OutStreamFactory {
    compress_kind: CompressKind,
    buffer_size: usize,
    streams: Vec<(StreamName, OutStream)>,
    lookup: HashMap<StreamName, usize>,
}

impl OutStreamFactory {
    pub fn new(compress_kind: CompressKind, buffer_size: usize) -> Result<Self> {
        if buffer_size == 0 || buffer_size > MAX_CHUNK_SIZE {
            return Err(SegmentError::Allocation(format!(
                "stream buffer size {} out of range 1..={}",
                buffer_size, MAX_CHUNK_SIZE
            )));
        }
        Ok(Self {
            compress_kind,
            buffer_size,
            streams: Vec::new(),
            lookup: HashMap::new(),
        })
    }

    /// Allocate the stream `(column_id, kind)`. Each name may be created once.
    pub fn create_stream(&mut self, column_id: u32, kind: StreamKind) -> Result<StreamId> {
        let name = StreamName::new(column_id, kind);
        if self.lookup.contains_key(&name) {
            return Err(SegmentError::Allocation(format!(
                "stream {} already allocated",
                name
            )));
        }
        let idx = self.streams.len();
        self.streams
            .push((name, OutStream::new(self.compress_kind, self.buffer_size)));
        self.lookup.insert(name, idx);
        Ok(StreamId(idx))
    }

    pub fn get(&self, id: StreamId) -> &OutStream {
        &self.streams[id.0].1
    }

    pub fn get_mut(&mut self, id: StreamId) -> &mut OutStream {
        &mut self.streams[id.0].1
    }

    pub fn find(&self, name: &StreamName) -> Option<&OutStream> {
        self.lookup.get(name).map(|&idx| &self.streams[idx].1)
    }

    pub fn compress_kind(&self) -> CompressKind {
        self.compress_kind
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Flush every non-suppressed stream. Compression is CPU-bound and the
    /// streams are independent, so this fans out over rayon.
    pub fn flush_all(&mut self) -> Result<()> {
        self.streams
            .par_iter_mut()
            .filter(|(_, stream)| !stream.is_suppressed())
            .try_for_each(|(_, stream)| stream.flush())
    }

    /// All streams in on-disk order.
    pub fn sorted(&self) -> Vec<(StreamName, &OutStream)> {
        let mut out: Vec<(StreamName, &OutStream)> =
            self.streams.iter().map(|(name, s)| (*name, s)).collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Sum of every stream's framed and buffered bytes.
    pub fn total_buffer_size(&self) -> u64 {
        self.streams.iter().map(|(_, s)| s.total_buffer_size()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk_headers(bytes: &[u8]) -> Vec<(usize, bool)> {
        let mut out = Vec::new();
        let mut pos = 0;
        while pos < bytes.len() {
            let header = u32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap());
            let len = (header >> 1) as usize;
            out.push((len, header & 1 == 1));
            pos += CHUNK_HEADER_SIZE + len;
        }
        out
    }

    #[test]
    fn test_uncompressed_chunks_split_at_buffer_size() {
        let mut s = OutStream::new(CompressKind::None, 10);
        s.write(&[1u8; 25]).unwrap();
        s.flush().unwrap();
        assert_eq!(chunk_headers(s.bytes()), vec![(10, true), (10, true), (5, true)]);
        assert_eq!(s.stream_length(), 25 + 3 * CHUNK_HEADER_SIZE as u64);
    }

    #[test]
    fn test_flush_is_idempotent() {
        let mut s = OutStream::new(CompressKind::Lz4, 64);
        s.write(b"hello").unwrap();
        s.flush().unwrap();
        let len = s.stream_length();
        s.flush().unwrap();
        assert_eq!(s.stream_length(), len);
    }

    #[test]
    fn test_compressible_chunk_is_compressed() {
        let mut s = OutStream::new(CompressKind::Snappy, 4096);
        s.write(&[0u8; 4096]).unwrap();
        s.flush().unwrap();
        let headers = chunk_headers(s.bytes());
        assert_eq!(headers.len(), 1);
        assert!(!headers[0].1, "chunk should be stored compressed");
        assert!(headers[0].0 < 4096);
    }

    #[test]
    fn test_incompressible_chunk_kept_original() {
        let mut s = OutStream::new(CompressKind::Lz4, 16);
        s.write(&[1, 2, 3]).unwrap();
        s.flush().unwrap();
        assert_eq!(chunk_headers(s.bytes()), vec![(3, true)]);
    }

    #[test]
    fn test_record_position() {
        let mut s = OutStream::new(CompressKind::None, 4);
        let mut positions = Vec::new();
        s.record_position(&mut positions);
        s.write(&[9; 6]).unwrap();
        s.record_position(&mut positions);
        assert_eq!(positions, vec![0, 0, 8, 2]);
    }

    #[test]
    fn test_suppress_clears_and_flags() {
        let mut s = OutStream::new(CompressKind::None, 8);
        s.write(&[1, 2, 3]).unwrap();
        s.suppress();
        assert!(s.is_suppressed());
        assert_eq!(s.total_buffer_size(), 0);
    }

    #[test]
    fn test_factory_rejects_duplicate_stream() {
        let mut f = OutStreamFactory::new(CompressKind::None, 1024).unwrap();
        f.create_stream(0, StreamKind::Data).unwrap();
        let err = f.create_stream(0, StreamKind::Data).unwrap_err();
        assert!(matches!(err, SegmentError::Allocation(_)));
    }

    #[test]
    fn test_factory_rejects_zero_buffer() {
        assert!(OutStreamFactory::new(CompressKind::None, 0).is_err());
    }

    #[test]
    fn test_factory_sorted_order() {
        let mut f = OutStreamFactory::new(CompressKind::None, 1024).unwrap();
        f.create_stream(1, StreamKind::Data).unwrap();
        f.create_stream(1, StreamKind::RowIndex).unwrap();
        f.create_stream(0, StreamKind::Present).unwrap();
        f.create_stream(0, StreamKind::RowIndex).unwrap();
        let names: Vec<StreamName> = f.sorted().into_iter().map(|(n, _)| n).collect();
        assert_eq!(
            names,
            vec![
                StreamName::new(0, StreamKind::RowIndex),
                StreamName::new(1, StreamKind::RowIndex),
                StreamName::new(0, StreamKind::Present),
                StreamName::new(1, StreamKind::Data),
            ]
        );
    }

    #[test]
    fn test_flush_all_skips_suppressed() {
        let mut f = OutStreamFactory::new(CompressKind::None, 1024).unwrap();
        let a = f.create_stream(0, StreamKind::Data).unwrap();
        let b = f.create_stream(0, StreamKind::Present).unwrap();
        f.get_mut(a).write(b"abc").unwrap();
        f.get_mut(b).write(b"xyz").unwrap();
        f.get_mut(b).suppress();
        f.flush_all().unwrap();
        assert_eq!(f.get(a).stream_length(), 3 + CHUNK_HEADER_SIZE as u64);
        assert_eq!(f.get(b).stream_length(), 0);
        assert_eq!(f.total_buffer_size(), 3 + CHUNK_HEADER_SIZE as u64);
    }
}
