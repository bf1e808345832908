//! Read side of a framed stream.
//!
//! An `InStream` walks the chunks of one stream inside a segment buffer,
//! decompressing them one at a time. Positions recorded by `OutStream`
//! (`chunk_offset`, `offset_in_chunk`) are replayed through a
//! [`PositionProvider`].

use std::sync::Arc;

use crate::compression::{decompress, CompressKind};
use crate::error::{Result, SegmentError};
use crate::format::out_stream::CHUNK_HEADER_SIZE;

// ── PositionProvider ───────────────────────────────────────────────

/// Cursor over the positions stored in one row index entry.
#[derive(Debug)]
pub struct PositionProvider<'a> {
    positions: &'a [u64],
    index: usize,
}

impl<'a> PositionProvider<'a> {
    pub fn new(positions: &'a [u64]) -> Self {
        Self { positions, index: 0 }
    }

    pub fn next(&mut self) -> Result<u64> {
        let value = self.positions.get(self.index).copied().ok_or_else(|| {
            SegmentError::Corruption(format!(
                "row index entry has {} positions, reader needs more",
                self.positions.len()
            ))
        })?;
        self.index += 1;
        Ok(value)
    }
}

// ── ByteSource ─────────────────────────────────────────────────────

/// Input the decoders read from.
pub trait ByteSource {
    fn read_byte(&mut self) -> Result<u8>;
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()>;
    /// Whether any byte remains.
    fn available(&self) -> bool;
    /// Reposition using the positions a matching `ByteSink` recorded.
    fn seek(&mut self, provider: &mut PositionProvider<'_>) -> Result<()>;
}

/// Unframed byte slice. Positions are plain offsets.
#[derive(Debug)]
pub struct SliceSource<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> SliceSource<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }
}

impl ByteSource for SliceSource<'_> {
    fn read_byte(&mut self) -> Result<u8> {
        let byte = *self
            .data
            .get(self.pos)
            .ok_or_else(|| SegmentError::UnexpectedEof("slice exhausted".into()))?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let end = self.pos + buf.len();
        if end > self.data.len() {
            return Err(SegmentError::UnexpectedEof(format!(
                "needed {} bytes, {} left",
                buf.len(),
                self.data.len() - self.pos
            )));
        }
        buf.copy_from_slice(&self.data[self.pos..end]);
        self.pos = end;
        Ok(())
    }

    fn available(&self) -> bool {
        self.pos < self.data.len()
    }

    fn seek(&mut self, provider: &mut PositionProvider<'_>) -> Result<()> {
        let pos = provider.next()? as usize;
        if pos > self.data.len() {
            return Err(SegmentError::Corruption(format!(
                "position {} past end {}",
                pos,
                self.data.len()
            )));
        }
        self.pos = pos;
        Ok(())
    }
}

// ── InStream ───────────────────────────────────────────────────────

#[derive(Debug)]
pub struct InStream {
    data: Arc<[u8]>,
    start: usize,
    length: usize,
    compress_kind: CompressKind,
    /// Relative offset of the next chunk header to load.
    next_chunk: usize,
    chunk: Vec<u8>,
    pos: usize,
}

impl InStream {
    /// Stream occupying `data[start..start + length]`.
    pub fn new(data: Arc<[u8]>, start: usize, length: usize, compress_kind: CompressKind) -> Self {
        debug_assert!(start + length <= data.len());
        Self {
            data,
            start,
            length,
            compress_kind,
            next_chunk: 0,
            chunk: Vec::new(),
            pos: 0,
        }
    }

    /// Framed length of the stream.
    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Whether any decoded byte remains.
    pub fn available(&self) -> bool {
        self.pos < self.chunk.len() || self.next_chunk < self.length
    }

    fn load_chunk_at(&mut self, offset: usize) -> Result<()> {
        if offset + CHUNK_HEADER_SIZE > self.length {
            return Err(SegmentError::UnexpectedEof(format!(
                "chunk header at {} past stream end {}",
                offset, self.length
            )));
        }
        let at = self.start + offset;
        let header = u32::from_le_bytes(
            self.data[at..at + CHUNK_HEADER_SIZE]
                .try_into()
                .expect("slice is exactly 4 bytes"),
        );
        let chunk_len = (header >> 1) as usize;
        let is_original = header & 1 == 1;

        let body_start = offset + CHUNK_HEADER_SIZE;
        if body_start + chunk_len > self.length {
            return Err(SegmentError::UnexpectedEof(format!(
                "chunk at {} claims {} bytes, stream has {}",
                offset,
                chunk_len,
                self.length - body_start
            )));
        }
        let raw = &self.data[self.start + body_start..self.start + body_start + chunk_len];
        self.chunk = if is_original {
            raw.to_vec()
        } else {
            decompress(self.compress_kind, raw)?
        };
        self.pos = 0;
        self.next_chunk = body_start + chunk_len;
        Ok(())
    }

    pub fn read_byte(&mut self) -> Result<u8> {
        while self.pos == self.chunk.len() {
            if self.next_chunk >= self.length {
                return Err(SegmentError::UnexpectedEof("stream exhausted".into()));
            }
            self.load_chunk_at(self.next_chunk)?;
        }
        let byte = self.chunk[self.pos];
        self.pos += 1;
        Ok(byte)
    }

    /// Fill `buf` completely, crossing chunk boundaries as needed.
    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            if self.pos == self.chunk.len() {
                if self.next_chunk >= self.length {
                    return Err(SegmentError::UnexpectedEof(format!(
                        "needed {} more bytes",
                        buf.len() - filled
                    )));
                }
                self.load_chunk_at(self.next_chunk)?;
                continue;
            }
            let take = (self.chunk.len() - self.pos).min(buf.len() - filled);
            buf[filled..filled + take].copy_from_slice(&self.chunk[self.pos..self.pos + take]);
            self.pos += take;
            filled += take;
        }
        Ok(())
    }

    /// Advance `n` decoded bytes without copying them out.
    pub fn skip(&mut self, mut n: u64) -> Result<()> {
        while n > 0 {
            if self.pos == self.chunk.len() {
                if self.next_chunk >= self.length {
                    return Err(SegmentError::UnexpectedEof(format!("cannot skip {} more bytes", n)));
                }
                self.load_chunk_at(self.next_chunk)?;
                continue;
            }
            let step = ((self.chunk.len() - self.pos) as u64).min(n);
            self.pos += step as usize;
            n -= step;
        }
        Ok(())
    }

    /// Everything from the current position to the end of the stream.
    pub fn read_to_end(&mut self) -> Result<Vec<u8>> {
        let mut out = self.chunk[self.pos..].to_vec();
        self.pos = self.chunk.len();
        while self.next_chunk < self.length {
            self.load_chunk_at(self.next_chunk)?;
            out.extend_from_slice(&self.chunk);
            self.pos = self.chunk.len();
        }
        Ok(out)
    }

    /// Reposition to a recorded `(chunk_offset, offset_in_chunk)`.
    pub fn seek(&mut self, provider: &mut PositionProvider<'_>) -> Result<()> {
        let chunk_offset = provider.next()? as usize;
        let in_chunk = provider.next()? as usize;

        if chunk_offset == self.length {
            // Recorded after the last spill: nothing left to read from here.
            if in_chunk != 0 {
                return Err(SegmentError::Corruption(format!(
                    "position {}+{} past stream end",
                    chunk_offset, in_chunk
                )));
            }
            self.chunk.clear();
            self.pos = 0;
            self.next_chunk = self.length;
            return Ok(());
        }

        self.load_chunk_at(chunk_offset)?;
        if in_chunk > self.chunk.len() {
            return Err(SegmentError::Corruption(format!(
                "offset {} past chunk of {} bytes",
                in_chunk,
                self.chunk.len()
            )));
        }
        self.pos = in_chunk;
        Ok(())
    }
}

impl ByteSource for InStream {
    fn read_byte(&mut self) -> Result<u8> {
        InStream::read_byte(self)
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        InStream::read_exact(self, buf)
    }

    fn available(&self) -> bool {
        InStream::available(self)
    }

    fn seek(&mut self, provider: &mut PositionProvider<'_>) -> Result<()> {
        InStream::seek(self, provider)
    }
}
