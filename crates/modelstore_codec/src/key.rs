//! Order-preserving composite keys.
//!
//! A key is a one-byte record tag followed by a sequence of parts:
//!
//! ```text
//! | tag u8 | len u32 BE | bytes | ... | position u32 BE | node u64 BE |
//! ```
//!
//! Byte segments carry a length prefix so that no segment is ever a prefix
//! of another key's segment. Integers are big-endian so byte order equals
//! numeric order, which keeps `scan_prefix` results sorted by position.

use crate::error::{CodecError, CodecResult};

/// Builds a composite key.
#[derive(Debug, Clone)]
pub struct KeyBuilder {
    buf: Vec<u8>,
}

impl KeyBuilder {
    /// Starts a key with the given record tag.
    #[must_use]
    pub fn new(tag: u8) -> Self {
        let mut buf = Vec::with_capacity(48);
        buf.push(tag);
        Self { buf }
    }

    /// Appends a length-prefixed byte segment.
    #[must_use]
    pub fn segment(mut self, bytes: &[u8]) -> Self {
        // Feature names and ids are far below 4 GiB
        #[allow(clippy::cast_possible_truncation)]
        let len = bytes.len() as u32;
        self.buf.extend_from_slice(&len.to_be_bytes());
        self.buf.extend_from_slice(bytes);
        self
    }

    /// Appends a UTF-8 string segment.
    #[must_use]
    pub fn text(self, s: &str) -> Self {
        self.segment(s.as_bytes())
    }

    /// Appends a big-endian `u32`.
    #[must_use]
    pub fn u32(mut self, n: u32) -> Self {
        self.buf.extend_from_slice(&n.to_be_bytes());
        self
    }

    /// Appends a big-endian `u64`.
    #[must_use]
    pub fn u64(mut self, n: u64) -> Self {
        self.buf.extend_from_slice(&n.to_be_bytes());
        self
    }

    /// Finishes the key.
    #[must_use]
    pub fn build(self) -> Vec<u8> {
        self.buf
    }
}

/// Reads the parts of a composite key in the order they were written.
#[derive(Debug)]
pub struct KeyReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> KeyReader<'a> {
    /// Starts reading `data`, checking the record tag.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidKey`] if the tag does not match.
    pub fn new(data: &'a [u8], tag: u8) -> CodecResult<Self> {
        match data.first() {
            Some(&t) if t == tag => Ok(Self { data, pos: 1 }),
            Some(&t) => Err(CodecError::invalid_key(format!(
                "expected tag {tag:#04x}, found {t:#04x}"
            ))),
            None => Err(CodecError::UnexpectedEof),
        }
    }

    /// Returns the tag byte of a key without consuming it.
    #[must_use]
    pub fn tag_of(data: &[u8]) -> Option<u8> {
        data.first().copied()
    }

    fn take(&mut self, n: usize) -> CodecResult<&'a [u8]> {
        let end = self.pos.checked_add(n).ok_or(CodecError::UnexpectedEof)?;
        let bytes = self.data.get(self.pos..end).ok_or(CodecError::UnexpectedEof)?;
        self.pos = end;
        Ok(bytes)
    }

    /// Reads a length-prefixed byte segment.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::UnexpectedEof`] if the key is truncated.
    pub fn segment(&mut self) -> CodecResult<&'a [u8]> {
        let len = self.u32()? as usize;
        self.take(len)
    }

    /// Reads a UTF-8 string segment.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is truncated or the segment is not UTF-8.
    pub fn text(&mut self) -> CodecResult<&'a str> {
        std::str::from_utf8(self.segment()?).map_err(|_| CodecError::InvalidUtf8)
    }

    /// Reads a big-endian `u32`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::UnexpectedEof`] if the key is truncated.
    pub fn u32(&mut self) -> CodecResult<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Reads a big-endian `u64`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::UnexpectedEof`] if the key is truncated.
    pub fn u64(&mut self) -> CodecResult<u64> {
        let bytes = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(bytes);
        Ok(u64::from_be_bytes(arr))
    }

    /// Returns `true` if every byte has been read.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.pos == self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn key_parts_read_back() {
        let key = KeyBuilder::new(b'M').segment(&[1, 2]).text("items").u32(7).build();
        let mut reader = KeyReader::new(&key, b'M').unwrap();
        assert_eq!(reader.segment().unwrap(), &[1, 2]);
        assert_eq!(reader.text().unwrap(), "items");
        assert_eq!(reader.u32().unwrap(), 7);
        assert!(reader.is_exhausted());
    }

    #[test]
    fn key_wrong_tag() {
        let key = KeyBuilder::new(b'A').build();
        assert!(matches!(
            KeyReader::new(&key, b'B'),
            Err(CodecError::InvalidKey { .. })
        ));
        assert!(matches!(KeyReader::new(&[], b'B'), Err(CodecError::UnexpectedEof)));
    }

    #[test]
    fn key_truncated() {
        let mut key = KeyBuilder::new(b'A').text("name").build();
        key.pop();
        let mut reader = KeyReader::new(&key, b'A').unwrap();
        assert_eq!(reader.text(), Err(CodecError::UnexpectedEof));
    }

    #[test]
    fn key_feature_prefix_is_not_shared() {
        // "ab" must not be a prefix of "abc" once encoded
        let short = KeyBuilder::new(b'M').text("ab").build();
        let long = KeyBuilder::new(b'M').text("abc").u32(0).build();
        assert!(!long.starts_with(&short));
    }

    proptest! {
        #[test]
        fn key_positions_sort_numerically(a in any::<u32>(), b in any::<u32>()) {
            let ka = KeyBuilder::new(b'M').text("f").u32(a).build();
            let kb = KeyBuilder::new(b'M').text("f").u32(b).build();
            prop_assert_eq!(ka.cmp(&kb), a.cmp(&b));
        }
    }
}
