//! Two-phase file header.
//!
//! The header is written twice: once as a placeholder before the payload
//! (which fixes the payload offset) and once more after the payload, with
//! the final file length and payload checksum filled in. Both writes carry
//! the same message, so the header never changes size between them.
//!
//! ## Binary layout
//!
//! ```text
//! Offset  Size  Field
//! 0       8     file_length: u64 LE       (0 in the placeholder)
//! 8       4     checksum: u32 LE          (0 in the placeholder)
//! 12      4     message_length: u32 LE
//! 16      4     message_checksum: u32 LE  (fletcher32 of the message)
//! 20      4     reserved: 0
//! 24      N     message (bincode)
//! ```

use std::io::{Seek, SeekFrom, Write};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::checksum::fletcher32;
use crate::error::{Result, SegmentError};

/// Bytes before the message.
pub const FIXED_HEADER_SIZE: usize = 24;

#[derive(Debug, Clone, PartialEq)]
pub struct FileHeader<M> {
    file_length: u64,
    checksum: u32,
    message: M,
    /// Message length fixed by `prepare`.
    message_length: Option<u32>,
}

impl<M: Serialize + DeserializeOwned> FileHeader<M> {
    pub fn new(message: M) -> Self {
        Self {
            file_length: 0,
            checksum: 0,
            message,
            message_length: None,
        }
    }

    pub fn message(&self) -> &M {
        &self.message
    }

    pub fn message_mut(&mut self) -> &mut M {
        &mut self.message
    }

    pub fn file_length(&self) -> u64 {
        self.file_length
    }

    pub fn set_file_length(&mut self, file_length: u64) {
        self.file_length = file_length;
    }

    /// Payload checksum.
    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    pub fn set_checksum(&mut self, checksum: u32) {
        self.checksum = checksum;
    }

    fn encode(&self, file_length: u64, checksum: u32) -> Result<Vec<u8>> {
        let message = bincode::serialize(&self.message)?;
        let message_length = u32::try_from(message.len()).map_err(|_| {
            SegmentError::InvalidFormat(format!("header message too large: {} bytes", message.len()))
        })?;

        let mut buf = Vec::with_capacity(FIXED_HEADER_SIZE + message.len());
        buf.extend_from_slice(&file_length.to_le_bytes());
        buf.extend_from_slice(&checksum.to_le_bytes());
        buf.extend_from_slice(&message_length.to_le_bytes());
        buf.extend_from_slice(&fletcher32(&message).to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes()); // reserved
        buf.extend_from_slice(&message);
        Ok(buf)
    }

    /// Phase one: write the placeholder at the start of `writer` and fix the
    /// payload offset. Returns that offset.
    pub fn prepare<W: Write + Seek>(&mut self, writer: &mut W) -> Result<u64> {
        let bytes = self.encode(0, 0)?;
        writer.seek(SeekFrom::Start(0))?;
        writer.write_all(&bytes)?;
        let message_length = (bytes.len() - FIXED_HEADER_SIZE) as u32;
        self.message_length = Some(message_length);
        Ok(bytes.len() as u64)
    }

    /// Payload offset. Only known once `prepare` has run.
    pub fn size(&self) -> Result<u64> {
        self.message_length
            .map(|len| FIXED_HEADER_SIZE as u64 + u64::from(len))
            .ok_or(SegmentError::InvalidState {
                expected: "prepared header",
                found: "unprepared header",
            })
    }

    /// Phase two: rewrite the header at offset 0 with the final file length
    /// and checksum. Fails if the message no longer encodes to the size
    /// `prepare` reserved.
    pub fn serialize<W: Write + Seek>(&self, writer: &mut W) -> Result<()> {
        let reserved = self.size()?;
        let bytes = self.encode(self.file_length, self.checksum)?;
        if bytes.len() as u64 != reserved {
            return Err(SegmentError::InvalidFormat(format!(
                "header grew from {} to {} bytes after prepare",
                reserved,
                bytes.len()
            )));
        }
        writer.seek(SeekFrom::Start(0))?;
        writer.write_all(&bytes)?;
        Ok(())
    }

    /// Parse a header from the start of a segment.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < FIXED_HEADER_SIZE {
            return Err(SegmentError::InvalidFormat(format!(
                "File too small for header: {} bytes",
                bytes.len()
            )));
        }

        let file_length = u64::from_le_bytes(bytes[0..8].try_into().unwrap());
        let checksum = u32::from_le_bytes(bytes[8..12].try_into().unwrap());
        let message_length = u32::from_le_bytes(bytes[12..16].try_into().unwrap());
        let message_checksum = u32::from_le_bytes(bytes[16..20].try_into().unwrap());
        let reserved = u32::from_le_bytes(bytes[20..24].try_into().unwrap());

        if reserved != 0 {
            return Err(SegmentError::InvalidFormat(format!(
                "reserved header field is {:#x}",
                reserved
            )));
        }

        let end = FIXED_HEADER_SIZE + message_length as usize;
        if bytes.len() < end {
            return Err(SegmentError::InvalidFormat(format!(
                "header message of {} bytes truncated at {}",
                message_length,
                bytes.len()
            )));
        }

        let message_bytes = &bytes[FIXED_HEADER_SIZE..end];
        let computed = fletcher32(message_bytes);
        if computed != message_checksum {
            return Err(SegmentError::ChecksumMismatch {
                expected: message_checksum,
                computed,
            });
        }
        let message = bincode::deserialize(message_bytes)?;

        Ok(Self {
            file_length,
            checksum,
            message,
            message_length: Some(message_length),
        })
    }
}
