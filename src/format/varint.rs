//! LEB128 varints with zig-zag for signed values.

use crate::error::{Result, SegmentError};
use crate::format::in_stream::ByteSource;
use crate::format::out_stream::ByteSink;

const MAX_VARINT_LEN: usize = 10;

#[inline]
pub fn zigzag_encode(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

#[inline]
pub fn zigzag_decode(v: u64) -> i64 {
    ((v >> 1) as i64) ^ -((v & 1) as i64)
}

pub fn write_uvarint<S: ByteSink>(sink: &mut S, mut value: u64) -> Result<()> {
    let mut buf = [0u8; MAX_VARINT_LEN];
    let mut len = 0;
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            buf[len] = byte;
            len += 1;
            break;
        }
        buf[len] = byte | 0x80;
        len += 1;
    }
    sink.put(&buf[..len])
}

pub fn read_uvarint<S: ByteSource>(source: &mut S) -> Result<u64> {
    let mut result = 0u64;
    for i in 0..MAX_VARINT_LEN {
        let byte = source.read_byte()?;
        result |= u64::from(byte & 0x7F) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(result);
        }
    }
    Err(SegmentError::Corruption("varint longer than 10 bytes".into()))
}

pub fn write_varint<S: ByteSink>(sink: &mut S, value: i64) -> Result<()> {
    write_uvarint(sink, zigzag_encode(value))
}

pub fn read_varint<S: ByteSource>(source: &mut S) -> Result<i64> {
    read_uvarint(source).map(zigzag_decode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::in_stream::SliceSource;

    #[test]
    fn test_zigzag() {
        assert_eq!(zigzag_encode(0), 0);
        assert_eq!(zigzag_encode(-1), 1);
        assert_eq!(zigzag_encode(1), 2);
        assert_eq!(zigzag_encode(-2), 3);
        for v in [i64::MIN, -300, -1, 0, 1, 300, i64::MAX] {
            assert_eq!(zigzag_decode(zigzag_encode(v)), v);
        }
    }

    #[test]
    fn test_varint_sizes() {
        let mut buf = Vec::new();
        write_uvarint(&mut buf, 127).unwrap();
        assert_eq!(buf, vec![0x7F]);
        buf.clear();
        write_uvarint(&mut buf, 300).unwrap();
        assert_eq!(buf, vec![0xAC, 0x02]);
        buf.clear();
        write_uvarint(&mut buf, u64::MAX).unwrap();
        assert_eq!(buf.len(), MAX_VARINT_LEN);
    }

    #[test]
    fn test_signed_sequence() {
        let values = [0i64, -5, 5, i64::MIN, i64::MAX, 1 << 40];
        let mut buf = Vec::new();
        for &v in &values {
            write_varint(&mut buf, v).unwrap();
        }
        let mut src = SliceSource::new(&buf);
        for &v in &values {
            assert_eq!(read_varint(&mut src).unwrap(), v);
        }
        assert!(read_varint(&mut src).unwrap_err().is_eof());
    }

    #[test]
    fn test_overlong_is_corruption() {
        let buf = [0xFFu8; 11];
        let err = read_uvarint(&mut SliceSource::new(&buf)).unwrap_err();
        assert!(matches!(err, SegmentError::Corruption(_)));
    }
}
