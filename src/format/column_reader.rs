//! Per-column decoders, mirroring `column_writer`.

use crate::error::{Result, SegmentError};
use crate::format::in_stream::{InStream, PositionProvider};
use crate::format::run_length::RunLengthByteReader;
use crate::format::stream_name::StreamKind;
use crate::format::types::{ColumnEncoding, ColumnMessage, RowIndexEntry};
use crate::format::varint::{read_uvarint, read_varint};
use crate::schema::{ColumnType, Value};

/// Values per present-stream positions entry: stream (2) + run skip (1).
const PRESENT_POSITIONS: usize = 3;

// ── Decoders ───────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ColumnDecoder {
    Byte {
        data: RunLengthByteReader<InStream>,
        column_type: ColumnType,
    },
    Integer {
        data: InStream,
        column_type: ColumnType,
    },
    Double {
        data: InStream,
    },
    DirectString {
        data: InStream,
        length: InStream,
    },
    DictionaryString {
        data: InStream,
        dictionary: Vec<String>,
    },
}

fn utf8(bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes).map_err(|e| SegmentError::Corruption(format!("string is not UTF-8: {}", e)))
}

fn read_string(data: &mut InStream, len: u64) -> Result<String> {
    if len > u64::from(u32::MAX) {
        return Err(SegmentError::Corruption(format!("string length {} out of range", len)));
    }
    let mut buf = vec![0u8; len as usize];
    data.read_exact(&mut buf)?;
    utf8(buf)
}

impl ColumnDecoder {
    fn open(message: &ColumnMessage, open: &mut dyn FnMut(StreamKind) -> Option<InStream>) -> Result<Self> {
        let mut required = |kind: StreamKind| {
            open(kind).ok_or_else(|| {
                SegmentError::Corruption(format!(
                    "column {} ({}) has no {:?} stream",
                    message.column_id,
                    message.encoding.name(),
                    kind
                ))
            })
        };

        Ok(match message.encoding {
            ColumnEncoding::Byte => Self::Byte {
                data: RunLengthByteReader::new(required(StreamKind::Data)?),
                column_type: message.column_type,
            },
            ColumnEncoding::Integer => Self::Integer {
                data: required(StreamKind::Data)?,
                column_type: message.column_type,
            },
            ColumnEncoding::Double => Self::Double {
                data: required(StreamKind::Data)?,
            },
            ColumnEncoding::DirectString => Self::DirectString {
                data: required(StreamKind::Data)?,
                length: required(StreamKind::Length)?,
            },
            ColumnEncoding::DictionaryString => {
                let data = required(StreamKind::Data)?;
                let mut lengths = required(StreamKind::Length)?;
                let mut bytes = required(StreamKind::DictionaryData)?;
                let mut dictionary = Vec::with_capacity(message.dictionary_size.min(1 << 16) as usize);
                for _ in 0..message.dictionary_size {
                    let len = read_uvarint(&mut lengths)?;
                    dictionary.push(read_string(&mut bytes, len)?);
                }
                Self::DictionaryString { data, dictionary }
            }
        })
    }

    fn next(&mut self) -> Result<Value> {
        match self {
            Self::Byte { data, column_type } => {
                let byte = data.next()?;
                match column_type {
                    ColumnType::Boolean => match byte {
                        0 => Ok(Value::Boolean(false)),
                        1 => Ok(Value::Boolean(true)),
                        other => Err(SegmentError::Corruption(format!("boolean byte {}", other))),
                    },
                    _ => Ok(Value::TinyInt(byte as i8)),
                }
            }
            Self::Integer { data, column_type } => {
                let v = read_varint(data)?;
                match column_type {
                    ColumnType::Int => i32::try_from(v)
                        .map(Value::Int)
                        .map_err(|_| SegmentError::Corruption(format!("INT value {} out of range", v))),
                    _ => Ok(Value::BigInt(v)),
                }
            }
            Self::Double { data } => {
                let mut buf = [0u8; 8];
                data.read_exact(&mut buf)?;
                Ok(Value::Double(f64::from_bits(u64::from_le_bytes(buf))))
            }
            Self::DirectString { data, length } => {
                let len = read_uvarint(length)?;
                read_string(data, len).map(Value::Varchar)
            }
            Self::DictionaryString { data, dictionary } => {
                let id = read_uvarint(data)?;
                dictionary
                    .get(id as usize)
                    .cloned()
                    .map(Value::Varchar)
                    .ok_or_else(|| {
                        SegmentError::Corruption(format!(
                            "dictionary id {} past {} entries",
                            id,
                            dictionary.len()
                        ))
                    })
            }
        }
    }

    fn skip(&mut self, count: u64) -> Result<()> {
        match self {
            Self::Byte { data, .. } => data.skip(count),
            Self::Double { data } => data.skip(count * 8),
            Self::Integer { data, .. } | Self::DictionaryString { data, .. } => {
                for _ in 0..count {
                    read_uvarint(data)?;
                }
                Ok(())
            }
            Self::DirectString { data, length } => {
                let mut total = 0u64;
                for _ in 0..count {
                    total += read_uvarint(length)?;
                }
                data.skip(total)
            }
        }
    }

    fn seek(&mut self, provider: &mut PositionProvider<'_>) -> Result<()> {
        match self {
            Self::Byte { data, .. } => data.seek(provider),
            Self::Integer { data, .. } | Self::Double { data } | Self::DictionaryString { data, .. } => {
                data.seek(provider)
            }
            Self::DirectString { data, length } => {
                data.seek(provider)?;
                length.seek(provider)
            }
        }
    }
}

// ── ColumnReader ───────────────────────────────────────────────────

/// Sequential reader for one column of a segment.
#[derive(Debug)]
pub struct ColumnReader {
    message: ColumnMessage,
    /// `None` when the column is not nullable or its PRESENT stream was
    /// suppressed; either way every value is present.
    present: Option<RunLengthByteReader<InStream>>,
    decoder: ColumnDecoder,
}

impl ColumnReader {
    /// `open` returns the column's stream of a given kind, or `None` when
    /// the segment has no such stream.
    pub fn new(message: &ColumnMessage, mut open: impl FnMut(StreamKind) -> Option<InStream>) -> Result<Self> {
        let present = if message.nullable {
            open(StreamKind::Present).map(RunLengthByteReader::new)
        } else {
            None
        };
        let decoder = ColumnDecoder::open(message, &mut open)?;
        Ok(Self {
            message: message.clone(),
            present,
            decoder,
        })
    }

    pub fn message(&self) -> &ColumnMessage {
        &self.message
    }

    pub fn next(&mut self) -> Result<Value> {
        if let Some(present) = &mut self.present {
            if present.next()? == 0 {
                return Ok(Value::Null);
            }
        }
        self.decoder.next()
    }

    /// Skip `rows` rows, nulls included.
    pub fn skip(&mut self, rows: u64) -> Result<()> {
        let values = match &mut self.present {
            Some(present) => {
                let mut values = 0;
                for _ in 0..rows {
                    values += u64::from(present.next()? != 0);
                }
                values
            }
            None => rows,
        };
        self.decoder.skip(values)
    }

    /// Position at the first row of the block `entry` describes.
    pub fn seek(&mut self, entry: &RowIndexEntry) -> Result<()> {
        let mut provider = PositionProvider::new(&entry.positions);
        if self.message.nullable {
            match &mut self.present {
                Some(present) => present.seek(&mut provider)?,
                None => {
                    for _ in 0..PRESENT_POSITIONS {
                        provider.next()?;
                    }
                }
            }
        }
        self.decoder.seek(&mut provider)
    }
}
