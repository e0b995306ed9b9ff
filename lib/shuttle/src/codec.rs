use crate::support::ProtocolError;
use byteorder::{BigEndian, ByteOrder};
use mordant::{FRAME_MAGIC, MAX_PAYLOAD};
use std::str;

/// Bytes of frame header preceding every payload: two magic bytes and a
/// big-endian payload length.
pub const FRAME_HEADER_SIZE: usize = 4;

/// Parses a frame header, returning the payload length.
///
/// `BadMagic` and `BadLength` are distinguished so the connection can count
/// magic violations against its budget while treating a hostile length as
/// immediately fatal.
#[inline]
pub fn parse_frame_header(header: &[u8]) -> Result<usize, ProtocolError> {
    debug_assert!(header.len() >= FRAME_HEADER_SIZE);

    if header[..2] != FRAME_MAGIC {
        return Err(ProtocolError::BadMagic);
    }

    let len = BigEndian::read_u16(&header[2..4]) as usize;

    if len == 0 || len > MAX_PAYLOAD {
        return Err(ProtocolError::BadLength);
    }

    Ok(len)
}

/// Bounds-checked cursor over a frame payload. Every read compares the
/// remaining byte count against the requested width; offsets are never added
/// to lengths, so the checks cannot wrap.
pub struct PayloadReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> PayloadReader<'a> {
    #[inline]
    pub fn new(data: &'a [u8]) -> PayloadReader<'a> {
        PayloadReader { data, offset: 0 }
    }

    /// Bytes not yet consumed.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    #[inline]
    fn take(&mut self, count: usize) -> Result<&'a [u8], ProtocolError> {
        if self.remaining() < count {
            return Err(ProtocolError::Truncated);
        }

        let slice = &self.data[self.offset..self.offset + count];
        self.offset += count;
        Ok(slice)
    }

    #[inline]
    pub fn read_u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.take(1)?[0])
    }

    #[inline]
    pub fn read_u16(&mut self) -> Result<u16, ProtocolError> {
        Ok(BigEndian::read_u16(self.take(2)?))
    }

    #[inline]
    pub fn read_u32(&mut self) -> Result<u32, ProtocolError> {
        Ok(BigEndian::read_u32(self.take(4)?))
    }

    #[inline]
    pub fn read_u64(&mut self) -> Result<u64, ProtocolError> {
        Ok(BigEndian::read_u64(self.take(8)?))
    }

    #[inline]
    pub fn read_i16(&mut self) -> Result<i16, ProtocolError> {
        Ok(BigEndian::read_i16(self.take(2)?))
    }

    #[inline]
    pub fn read_i32(&mut self) -> Result<i32, ProtocolError> {
        Ok(BigEndian::read_i32(self.take(4)?))
    }

    #[inline]
    pub fn read_i64(&mut self) -> Result<i64, ProtocolError> {
        Ok(BigEndian::read_i64(self.take(8)?))
    }

    /// Length-prefixed UTF-8 string: a `u8` byte count followed by the bytes.
    pub fn read_string(&mut self) -> Result<&'a str, ProtocolError> {
        let len = self.read_u8()? as usize;
        let bytes = self.take(len)?;

        str::from_utf8(bytes).map_err(|_| ProtocolError::BadString)
    }
}

/// Builder for a single outgoing payload. `frame` seals it into a complete
/// wire frame, enforcing the length envelope.
pub struct PayloadWriter {
    data: Vec<u8>,
}

impl PayloadWriter {
    #[inline]
    pub fn new(opcode: u8) -> PayloadWriter {
        let mut data = Vec::with_capacity(16);
        data.push(opcode);
        PayloadWriter { data }
    }

    #[inline]
    pub fn with_capacity(opcode: u8, capacity: usize) -> PayloadWriter {
        let mut data = Vec::with_capacity(capacity);
        data.push(opcode);
        PayloadWriter { data }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn write_u8(&mut self, value: u8) -> &mut Self {
        self.data.push(value);
        self
    }

    #[inline]
    pub fn write_u16(&mut self, value: u16) -> &mut Self {
        let mut buf = [0u8; 2];
        BigEndian::write_u16(&mut buf, value);
        self.data.extend_from_slice(&buf);
        self
    }

    #[inline]
    pub fn write_u32(&mut self, value: u32) -> &mut Self {
        let mut buf = [0u8; 4];
        BigEndian::write_u32(&mut buf, value);
        self.data.extend_from_slice(&buf);
        self
    }

    #[inline]
    pub fn write_u64(&mut self, value: u64) -> &mut Self {
        let mut buf = [0u8; 8];
        BigEndian::write_u64(&mut buf, value);
        self.data.extend_from_slice(&buf);
        self
    }

    #[inline]
    pub fn write_i16(&mut self, value: i16) -> &mut Self {
        let mut buf = [0u8; 2];
        BigEndian::write_i16(&mut buf, value);
        self.data.extend_from_slice(&buf);
        self
    }

    #[inline]
    pub fn write_i32(&mut self, value: i32) -> &mut Self {
        let mut buf = [0u8; 4];
        BigEndian::write_i32(&mut buf, value);
        self.data.extend_from_slice(&buf);
        self
    }

    #[inline]
    pub fn write_i64(&mut self, value: i64) -> &mut Self {
        let mut buf = [0u8; 8];
        BigEndian::write_i64(&mut buf, value);
        self.data.extend_from_slice(&buf);
        self
    }

    /// Length-prefixed UTF-8 string. Truncation is the caller's problem;
    /// strings longer than 255 bytes are a logic error.
    pub fn write_string(&mut self, value: &str) -> &mut Self {
        debug_assert!(value.len() <= u8::max_value() as usize);
        self.data.push(value.len() as u8);
        self.data.extend_from_slice(value.as_bytes());
        self
    }

    /// Seals the payload into a framed buffer: magic, big-endian length,
    /// payload bytes.
    pub fn frame(self) -> Result<Vec<u8>, ProtocolError> {
        let len = self.data.len();

        if len == 0 || len > MAX_PAYLOAD {
            return Err(ProtocolError::BadLength);
        }

        let mut framed = Vec::with_capacity(FRAME_HEADER_SIZE + len);
        framed.extend_from_slice(&FRAME_MAGIC);

        let mut len_bytes = [0u8; 2];
        BigEndian::write_u16(&mut len_bytes, len as u16);
        framed.extend_from_slice(&len_bytes);
        framed.extend_from_slice(&self.data);

        Ok(framed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_frame_header() {
        assert_eq!(parse_frame_header(&[0x11, 0x68, 0x00, 0x07]), Ok(7));
        assert_eq!(parse_frame_header(&[0x11, 0x68, 0x10, 0x00]), Ok(4096));
    }

    #[test]
    fn test_parse_frame_header_bad_magic() {
        assert_eq!(
            parse_frame_header(&[0x12, 0x68, 0x00, 0x07]),
            Err(ProtocolError::BadMagic)
        );
        assert_eq!(
            parse_frame_header(&[0x11, 0x69, 0x00, 0x07]),
            Err(ProtocolError::BadMagic)
        );
    }

    #[test]
    fn test_parse_frame_header_bad_length() {
        // Zero length
        assert_eq!(
            parse_frame_header(&[0x11, 0x68, 0x00, 0x00]),
            Err(ProtocolError::BadLength)
        );
        // 4097 exceeds the envelope
        assert_eq!(
            parse_frame_header(&[0x11, 0x68, 0x10, 0x01]),
            Err(ProtocolError::BadLength)
        );
    }

    #[test]
    fn test_reader_scalars() {
        let data = [
            0x2A, // u8
            0x12, 0x34, // u16
            0xDE, 0xAD, 0xBE, 0xEF, // u32
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x1F, 0x68, // u64
            0xFF, 0xFE, // i16 = -2
        ];
        let mut reader = PayloadReader::new(&data);

        assert_eq!(reader.read_u8().unwrap(), 0x2A);
        assert_eq!(reader.read_u16().unwrap(), 0x1234);
        assert_eq!(reader.read_u32().unwrap(), 0xDEAD_BEEF);
        assert_eq!(reader.read_u64().unwrap(), 8040);
        assert_eq!(reader.read_i16().unwrap(), -2);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_reader_truncated() {
        let mut reader = PayloadReader::new(&[0x01, 0x02]);

        assert_eq!(reader.read_u32().unwrap_err(), ProtocolError::Truncated);
        // A failed read consumes nothing.
        assert_eq!(reader.remaining(), 2);
        assert_eq!(reader.read_u16().unwrap(), 0x0102);
    }

    #[test]
    fn test_reader_string() {
        let data = [0x05, b'i', b'n', b'd', b'i', b'g', 0x07];
        let mut reader = PayloadReader::new(&data);

        assert_eq!(reader.read_string().unwrap(), "indig");
        assert_eq!(reader.read_u8().unwrap(), 0x07);
    }

    #[test]
    fn test_reader_string_bad_utf8() {
        let data = [0x02, 0xC3, 0x28];
        let mut reader = PayloadReader::new(&data);

        assert_eq!(reader.read_string().unwrap_err(), ProtocolError::BadString);
    }

    #[test]
    fn test_reader_string_truncated() {
        let data = [0x09, b'x'];
        let mut reader = PayloadReader::new(&data);

        assert_eq!(reader.read_string().unwrap_err(), ProtocolError::Truncated);
    }

    #[test]
    fn test_writer_frame_roundtrip() {
        let mut writer = PayloadWriter::new(0x10);
        writer.write_u64(42).write_i16(-5).write_i16(9).write_u8(1);

        let framed = writer.frame().unwrap();

        assert_eq!(&framed[..2], &FRAME_MAGIC);
        let len = parse_frame_header(&framed[..4]).unwrap();
        assert_eq!(len, framed.len() - FRAME_HEADER_SIZE);

        let mut reader = PayloadReader::new(&framed[FRAME_HEADER_SIZE..]);
        assert_eq!(reader.read_u8().unwrap(), 0x10);
        assert_eq!(reader.read_u64().unwrap(), 42);
        assert_eq!(reader.read_i16().unwrap(), -5);
        assert_eq!(reader.read_i16().unwrap(), 9);
        assert_eq!(reader.read_u8().unwrap(), 1);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_writer_rejects_oversized_payload() {
        let mut writer = PayloadWriter::with_capacity(0x25, MAX_PAYLOAD + 8);
        for _ in 0..MAX_PAYLOAD {
            writer.write_u8(0);
        }

        assert_eq!(writer.frame().unwrap_err(), ProtocolError::BadLength);
    }
}
