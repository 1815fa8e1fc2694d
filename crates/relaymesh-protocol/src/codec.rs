//! Fixed-layout binary codec with an explicit cursor.
//!
//! Every relay message is a flat sequence of primitives: `u8`, `bool`
//! (one byte, nonzero = true), `i32` (four bytes, little-endian), strings
//! (4-byte code-unit count, then each char as a 2-byte UTF-16 code unit)
//! and byte blobs (4-byte length, then the raw bytes). The per-character
//! fixed width is deliberate — it keeps offsets computable without scanning.
//!
//! A zero-length string is the shared sentinel for "absent" and "empty";
//! both decode to the empty string. Callers that need to distinguish the
//! two must carry that bit themselves.

use crate::ProtocolError;

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// Writes primitives into a byte buffer, advancing a cursor.
///
/// The buffer grows as needed; growth preserves already-written bytes and
/// the cursor. Pair with a pooled buffer to avoid per-message allocation.
pub struct ByteWriter<'a> {
    buf: &'a mut Vec<u8>,
    pos: usize,
}

impl<'a> ByteWriter<'a> {
    /// Starts writing at the beginning of `buf`.
    pub fn new(buf: &'a mut Vec<u8>) -> Self {
        Self { buf, pos: 0 }
    }

    /// Current cursor position.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// The bytes written so far.
    pub fn written(&self) -> &[u8] {
        &self.buf[..self.pos]
    }

    fn put(&mut self, bytes: &[u8]) {
        let end = self.pos + bytes.len();
        if end > self.buf.len() {
            self.buf.resize(end, 0);
        }
        self.buf[self.pos..end].copy_from_slice(bytes);
        self.pos = end;
    }

    pub fn write_u8(&mut self, value: u8) {
        self.put(&[value]);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.put(&[value as u8]);
    }

    pub fn write_i32(&mut self, value: i32) {
        self.put(&value.to_le_bytes());
    }

    /// Writes a length-prefixed UTF-16 string. The empty string writes the
    /// zero sentinel only.
    pub fn write_string(&mut self, value: &str) {
        let units: Vec<u16> = value.encode_utf16().collect();
        self.write_i32(units.len() as i32);
        for unit in units {
            self.put(&unit.to_le_bytes());
        }
    }

    /// Writes a length-prefixed byte blob.
    pub fn write_bytes(&mut self, value: &[u8]) {
        self.write_i32(value.len() as i32);
        self.put(value);
    }
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

/// Reads primitives from a byte slice, advancing a cursor.
///
/// Reading past the end of the input is [`ProtocolError::Truncated`]; the
/// cursor is only advanced by exactly the width of a successful read.
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Current cursor position.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ProtocolError> {
        if self.remaining() < n {
            return Err(ProtocolError::Truncated {
                offset: self.pos,
                needed: n - self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool, ProtocolError> {
        Ok(self.take(1)?[0] != 0)
    }

    pub fn read_i32(&mut self) -> Result<i32, ProtocolError> {
        let bytes = self.take(4)?;
        Ok(i32::from_le_bytes(bytes.try_into().expect("4-byte slice")))
    }

    /// Reads a length-prefixed count used by strings and blobs.
    fn read_len(&mut self) -> Result<usize, ProtocolError> {
        let len = self.read_i32()?;
        if len < 0 {
            return Err(ProtocolError::InvalidMessage(format!(
                "negative length prefix {len}"
            )));
        }
        Ok(len as usize)
    }

    /// Reads a length-prefixed UTF-16 string. A zero length decodes to the
    /// empty string (the shared absent/empty sentinel).
    pub fn read_string(&mut self) -> Result<String, ProtocolError> {
        let count = self.read_len()?;
        let mut units = Vec::with_capacity(count);
        for _ in 0..count {
            let bytes = self.take(2)?;
            units.push(u16::from_le_bytes(bytes.try_into().expect("2-byte slice")));
        }
        Ok(String::from_utf16_lossy(&units))
    }

    /// Reads a length-prefixed byte blob, borrowing from the input.
    pub fn read_bytes(&mut self) -> Result<&'a [u8], ProtocolError> {
        let len = self.read_len()?;
        self.take(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(write: impl FnOnce(&mut ByteWriter<'_>)) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut writer = ByteWriter::new(&mut buf);
        write(&mut writer);
        let len = writer.position();
        buf.truncate(len);
        buf
    }

    #[test]
    fn test_u8_round_trip() {
        let buf = round_trip(|w| w.write_u8(0xAB));
        let mut reader = ByteReader::new(&buf);
        assert_eq!(reader.read_u8().unwrap(), 0xAB);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_bool_round_trip_and_nonzero_is_true() {
        let buf = round_trip(|w| {
            w.write_bool(true);
            w.write_bool(false);
        });
        let mut reader = ByteReader::new(&buf);
        assert!(reader.read_bool().unwrap());
        assert!(!reader.read_bool().unwrap());

        // Any nonzero byte decodes as true.
        let mut reader = ByteReader::new(&[7]);
        assert!(reader.read_bool().unwrap());
    }

    #[test]
    fn test_i32_round_trip_negative() {
        let buf = round_trip(|w| w.write_i32(-123456));
        let mut reader = ByteReader::new(&buf);
        assert_eq!(reader.read_i32().unwrap(), -123456);
    }

    #[test]
    fn test_i32_is_little_endian_and_fixed_width() {
        let buf = round_trip(|w| w.write_i32(0x0403_0201));
        assert_eq!(buf, vec![0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn test_string_round_trip() {
        let buf = round_trip(|w| w.write_string("Hello, relay!"));
        let mut reader = ByteReader::new(&buf);
        assert_eq!(reader.read_string().unwrap(), "Hello, relay!");
    }

    #[test]
    fn test_string_non_ascii_round_trip() {
        let buf = round_trip(|w| w.write_string("héllo ∆"));
        let mut reader = ByteReader::new(&buf);
        assert_eq!(reader.read_string().unwrap(), "héllo ∆");
    }

    #[test]
    fn test_string_encodes_two_bytes_per_code_unit() {
        let buf = round_trip(|w| w.write_string("AB"));
        // 4-byte count + 2 code units of 2 bytes each.
        assert_eq!(buf, vec![2, 0, 0, 0, b'A', 0, b'B', 0]);
    }

    #[test]
    fn test_empty_string_is_zero_sentinel() {
        // The documented lossy case: absent and empty both write a bare
        // zero count and both read back as "".
        let buf = round_trip(|w| w.write_string(""));
        assert_eq!(buf, vec![0, 0, 0, 0]);
        let mut reader = ByteReader::new(&buf);
        assert_eq!(reader.read_string().unwrap(), "");
    }

    #[test]
    fn test_bytes_round_trip() {
        let buf = round_trip(|w| w.write_bytes(&[1, 2, 3, 4, 5]));
        let mut reader = ByteReader::new(&buf);
        assert_eq!(reader.read_bytes().unwrap(), &[1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_cursor_advances_by_exact_width() {
        let buf = round_trip(|w| {
            w.write_u8(1);
            w.write_bool(true);
            w.write_i32(2);
            w.write_string("a");
            w.write_bytes(&[9]);
        });
        // 1 + 1 + 4 + (4 + 2) + (4 + 1)
        assert_eq!(buf.len(), 17);

        let mut reader = ByteReader::new(&buf);
        reader.read_u8().unwrap();
        assert_eq!(reader.position(), 1);
        reader.read_bool().unwrap();
        assert_eq!(reader.position(), 2);
        reader.read_i32().unwrap();
        assert_eq!(reader.position(), 6);
        reader.read_string().unwrap();
        assert_eq!(reader.position(), 12);
        reader.read_bytes().unwrap();
        assert_eq!(reader.position(), 17);
    }

    #[test]
    fn test_read_past_end_is_truncated() {
        let mut reader = ByteReader::new(&[1, 2]);
        assert!(matches!(
            reader.read_i32(),
            Err(ProtocolError::Truncated { offset: 0, needed: 2 })
        ));
        // A failed read does not advance the cursor.
        assert_eq!(reader.position(), 0);
    }

    #[test]
    fn test_truncated_string_body_is_error() {
        // Count says 4 code units, but only one follows.
        let mut buf = Vec::new();
        let mut writer = ByteWriter::new(&mut buf);
        writer.write_i32(4);
        writer.write_u8(b'x');
        writer.write_u8(0);
        let len = writer.position();
        buf.truncate(len);

        let mut reader = ByteReader::new(&buf);
        assert!(matches!(
            reader.read_string(),
            Err(ProtocolError::Truncated { .. })
        ));
    }

    #[test]
    fn test_negative_length_prefix_is_invalid() {
        let buf = round_trip(|w| w.write_i32(-1));
        let mut reader = ByteReader::new(&buf);
        assert!(matches!(
            reader.read_bytes(),
            Err(ProtocolError::InvalidMessage(_))
        ));
    }

    #[test]
    fn test_writer_growth_preserves_written_bytes() {
        let mut buf = Vec::with_capacity(2);
        let mut writer = ByteWriter::new(&mut buf);
        writer.write_i32(0x11223344);
        writer.write_bytes(&[0xAA; 64]);
        assert_eq!(writer.position(), 4 + 4 + 64);
        assert_eq!(&writer.written()[..4], &0x11223344i32.to_le_bytes());
    }

    #[test]
    fn test_writer_overwrites_stale_buffer_content() {
        // Reused pool buffers may carry old bytes; the writer must not
        // let them leak into the written region.
        let mut buf = vec![0xFF; 8];
        let mut writer = ByteWriter::new(&mut buf);
        writer.write_i32(0);
        assert_eq!(writer.written(), &[0, 0, 0, 0]);
    }
}
