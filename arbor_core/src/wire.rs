//! Big-endian length-prefixed encoding shared by all metadata payloads.

use crate::error::{Error, Result};

/// Appends canonical fields to a byte buffer.
#[derive(Debug, Default)]
pub(crate) struct WireWriter {
    buf: Vec<u8>,
}

impl WireWriter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn put_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub(crate) fn put_u64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    /// Length-prefixed byte string.
    pub(crate) fn put_bytes(&mut self, bytes: &[u8]) {
        self.put_len(bytes.len());
        self.buf.extend_from_slice(bytes);
    }

    pub(crate) fn put_str(&mut self, s: &str) {
        self.put_bytes(s.as_bytes());
    }

    pub(crate) fn put_len(&mut self, len: usize) {
        // Payloads are far below 4 GiB; a larger length is a caller bug.
        let len = u32::try_from(len).unwrap_or(u32::MAX);
        self.put_u32(len);
    }

    pub(crate) fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Reads canonical fields back, failing with a schema error on truncation.
#[derive(Debug)]
pub(crate) struct WireReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, len: usize, what: &str) -> Result<&'a [u8]> {
        let remaining = self.data.len() - self.pos;
        if len > remaining {
            return Err(Error::schema(format!(
                "Truncated {}: need {} bytes, {} left",
                what, len, remaining
            )));
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub(crate) fn u32(&mut self, what: &str) -> Result<u32> {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(self.take(4, what)?);
        Ok(u32::from_be_bytes(bytes))
    }

    pub(crate) fn u64(&mut self, what: &str) -> Result<u64> {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(self.take(8, what)?);
        Ok(u64::from_be_bytes(bytes))
    }

    pub(crate) fn bytes(&mut self, what: &str) -> Result<&'a [u8]> {
        let len = self.u32(what)? as usize;
        self.take(len, what)
    }

    pub(crate) fn string(&mut self, what: &str) -> Result<String> {
        let bytes = self.bytes(what)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| Error::schema(format!("Invalid UTF-8 in {}: {}", what, e)))
    }

    /// Reads an element count, rejecting counts that cannot fit in the remaining input.
    pub(crate) fn count(&mut self, what: &str, min_element_size: usize) -> Result<usize> {
        let count = self.u32(what)? as usize;
        let remaining = self.data.len() - self.pos;
        if count.saturating_mul(min_element_size) > remaining {
            return Err(Error::schema(format!(
                "Implausible {} count {} for {} remaining bytes",
                what, count, remaining
            )));
        }
        Ok(count)
    }

    /// Fails if any input is left over.
    pub(crate) fn finish(self, what: &str) -> Result<()> {
        if self.pos != self.data.len() {
            return Err(Error::schema(format!(
                "{} trailing bytes after {}",
                self.data.len() - self.pos,
                what
            )));
        }
        Ok(())
    }
}
