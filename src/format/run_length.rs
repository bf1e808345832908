//! Run-length byte codec.
//!
//! A control byte precedes every record:
//!
//! ```text
//! control in [0, 127]     run:     next byte repeated control + 3 times (3..=130)
//! control in [-128, -1]   literal: next -control bytes taken verbatim (1..=128)
//! ```
//!
//! Runs shorter than three cost more than storing the bytes literally, so
//! the writer only switches to a run once it has seen three equal bytes.

use crate::error::{Result, SegmentError};
use crate::format::in_stream::{ByteSource, PositionProvider, SliceSource};
use crate::format::out_stream::ByteSink;

pub const MIN_REPEAT_SIZE: usize = 3;
pub const MAX_REPEAT_SIZE: usize = 127 + MIN_REPEAT_SIZE;
pub const MAX_LITERAL_SIZE: usize = 128;

// ── Writer ─────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct RunLengthByteWriter {
    literals: [u8; MAX_LITERAL_SIZE],
    num_literals: usize,
    repeat: bool,
    tail_run_length: usize,
}

impl RunLengthByteWriter {
    pub fn new() -> Self {
        Self {
            literals: [0; MAX_LITERAL_SIZE],
            num_literals: 0,
            repeat: false,
            tail_run_length: 0,
        }
    }

    fn write_values<S: ByteSink>(&mut self, sink: &mut S) -> Result<()> {
        if self.num_literals != 0 {
            if self.repeat {
                let control = (self.num_literals - MIN_REPEAT_SIZE) as u8;
                sink.put(&[control, self.literals[0]])?;
            } else {
                let control = (-(self.num_literals as i32)) as i8 as u8;
                sink.put(&[control])?;
                sink.put(&self.literals[..self.num_literals])?;
            }
            self.repeat = false;
            self.tail_run_length = 0;
            self.num_literals = 0;
        }
        Ok(())
    }

    pub fn write<S: ByteSink>(&mut self, sink: &mut S, value: u8) -> Result<()> {
        if self.num_literals == 0 {
            self.literals[0] = value;
            self.num_literals = 1;
            self.tail_run_length = 1;
        } else if self.repeat {
            if value == self.literals[0] {
                self.num_literals += 1;
                if self.num_literals == MAX_REPEAT_SIZE {
                    self.write_values(sink)?;
                }
            } else {
                self.write_values(sink)?;
                self.literals[0] = value;
                self.num_literals = 1;
                self.tail_run_length = 1;
            }
        } else {
            if value == self.literals[self.num_literals - 1] {
                self.tail_run_length += 1;
            } else {
                self.tail_run_length = 1;
            }

            if self.tail_run_length == MIN_REPEAT_SIZE {
                if self.num_literals + 1 == MIN_REPEAT_SIZE {
                    self.repeat = true;
                    self.num_literals += 1;
                } else {
                    // Emit the literals that precede the run, then start it.
                    self.num_literals -= MIN_REPEAT_SIZE - 1;
                    self.write_values(sink)?;
                    self.literals[0] = value;
                    self.repeat = true;
                    self.num_literals = MIN_REPEAT_SIZE;
                }
            } else {
                self.literals[self.num_literals] = value;
                self.num_literals += 1;
                if self.num_literals == MAX_LITERAL_SIZE {
                    self.write_values(sink)?;
                }
            }
        }
        Ok(())
    }

    /// Emit any pending run or literal block.
    pub fn flush<S: ByteSink>(&mut self, sink: &mut S) -> Result<()> {
        self.write_values(sink)
    }

    /// Sink position followed by the count of values still buffered here.
    pub fn record_position<S: ByteSink>(&self, sink: &S, positions: &mut Vec<u64>) {
        sink.record_position(positions);
        positions.push(self.num_literals as u64);
    }

    /// Bytes held outside the sink.
    pub fn estimate_buffered_memory(&self) -> u64 {
        self.num_literals as u64
    }
}

impl Default for RunLengthByteWriter {
    fn default() -> Self {
        Self::new()
    }
}

// ── Reader ─────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct RunLengthByteReader<S> {
    input: S,
    literals: [u8; MAX_LITERAL_SIZE],
    num_literals: usize,
    used: usize,
    repeat: bool,
}

impl<S: ByteSource> RunLengthByteReader<S> {
    pub fn new(input: S) -> Self {
        Self {
            input,
            literals: [0; MAX_LITERAL_SIZE],
            num_literals: 0,
            used: 0,
            repeat: false,
        }
    }

    fn read_values(&mut self) -> Result<()> {
        let control = self.input.read_byte()?;
        self.used = 0;
        if control < 0x80 {
            self.repeat = true;
            self.num_literals = control as usize + MIN_REPEAT_SIZE;
            self.literals[0] = self.input.read_byte().map_err(|e| match e {
                SegmentError::UnexpectedEof(_) => {
                    SegmentError::UnexpectedEof("run value missing after control byte".into())
                }
                other => other,
            })?;
        } else {
            self.repeat = false;
            self.num_literals = (-(control as i8 as i32)) as usize;
            let n = self.num_literals;
            self.input.read_exact(&mut self.literals[..n]).map_err(|e| match e {
                SegmentError::UnexpectedEof(msg) => {
                    SegmentError::UnexpectedEof(format!("literal block of {} bytes: {}", n, msg))
                }
                other => other,
            })?;
        }
        Ok(())
    }

    pub fn has_next(&self) -> bool {
        self.used != self.num_literals || self.input.available()
    }

    pub fn next(&mut self) -> Result<u8> {
        if self.used == self.num_literals {
            self.read_values()?;
        }
        let value = if self.repeat {
            self.literals[0]
        } else {
            self.literals[self.used]
        };
        self.used += 1;
        Ok(value)
    }

    /// Resume at a position recorded by [`RunLengthByteWriter::record_position`].
    pub fn seek(&mut self, provider: &mut PositionProvider<'_>) -> Result<()> {
        self.input.seek(provider)?;
        let consumed = provider.next()?;
        self.used = 0;
        self.num_literals = 0;
        self.skip(consumed)
    }

    pub fn skip(&mut self, mut num_values: u64) -> Result<()> {
        while num_values > 0 {
            if self.used == self.num_literals {
                self.read_values()?;
            }
            let step = ((self.num_literals - self.used) as u64).min(num_values);
            self.used += step as usize;
            num_values -= step;
        }
        Ok(())
    }

    pub fn into_inner(self) -> S {
        self.input
    }
}

// ── Convenience ────────────────────────────────────────────────────

/// Encode a whole byte sequence.
pub fn encode(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + data.len() / MAX_LITERAL_SIZE + 2);
    let mut writer = RunLengthByteWriter::new();
    for &b in data {
        writer
            .write(&mut out, b)
            .expect("writing to a Vec cannot fail");
    }
    writer.flush(&mut out).expect("writing to a Vec cannot fail");
    out
}

/// Decode a whole encoded sequence.
pub fn decode(data: &[u8]) -> Result<Vec<u8>> {
    let mut reader = RunLengthByteReader::new(SliceSource::new(data));
    let mut out = Vec::new();
    while reader.has_next() {
        out.push(reader.next()?);
    }
    Ok(out)
}
