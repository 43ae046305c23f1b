#![forbid(unsafe_code)]

//! Owned wire-format buffer.
//!
//! The encoded bytes of a bitmap are readable by anyone but writable only
//! through two checked crate-private edits: [`WireBuffer::overwrite`]
//! (same length, used by base64 alpha edits) and [`WireBuffer::splice`]
//! (length-changing, used by band re-encoding). The sprixel applies an edit
//! and only then commits the matching TAM transition.

use std::ops::Range;

use crate::error::{AllocError, EncodeError, Result};

/// Encoded bitmap bytes as last produced by a codec.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WireBuffer {
    bytes: Vec<u8>,
}

impl WireBuffer {
    pub(crate) fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// The encoded bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True if nothing is encoded.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Replace `data.len()` bytes at `offset`.
    pub(crate) fn overwrite(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        let end = offset.checked_add(data.len());
        match end {
            Some(end) if end <= self.bytes.len() => {
                self.bytes[offset..end].copy_from_slice(data);
                Ok(())
            }
            _ => Err(EncodeError::WireRange {
                offset,
                len: data.len(),
            }
            .into()),
        }
    }

    /// Replace `range` with `data`, shifting everything after it.
    pub(crate) fn splice(&mut self, range: Range<usize>, data: &[u8]) -> Result<()> {
        if range.start > range.end || range.end > self.bytes.len() {
            return Err(EncodeError::WireRange {
                offset: range.start,
                len: range.end.saturating_sub(range.start),
            }
            .into());
        }
        let removed = range.end - range.start;
        if data.len() > removed {
            let extra = data.len() - removed;
            self.bytes
                .try_reserve(extra)
                .map_err(|_| AllocError::OutOfMemory { requested: extra })?;
        }
        self.bytes.splice(range, data.iter().copied());
        Ok(())
    }
}
