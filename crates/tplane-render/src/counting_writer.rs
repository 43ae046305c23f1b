#![forbid(unsafe_code)]

//! Byte accounting for the render sink, and per-pass statistics.
//!
//! The count covers bytes the sink actually accepted, so after a failed
//! pass it tells how much of the frame reached the terminal.
//!
//! ```
//! use std::io::Write;
//! use tplane_render::counting_writer::CountingWriter;
//!
//! let mut sink = CountingWriter::new(Vec::new());
//! sink.write_all(b"\x1b[1;1Hok").unwrap();
//! assert_eq!(sink.bytes_written(), 8);
//! assert_eq!(sink.into_inner(), b"\x1b[1;1Hok");
//! ```

use std::io::{self, Write};
use std::time::Duration;

/// Sink wrapper tallying accepted bytes.
#[derive(Debug)]
pub struct CountingWriter<W> {
    inner: W,
    accepted: u64,
}

impl<W> CountingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, accepted: 0 }
    }

    /// Bytes the wrapped sink has accepted.
    #[inline]
    pub fn bytes_written(&self) -> u64 {
        self.accepted
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

// `write_all` stays the provided loop over `write`, so partial writes
// before an error are still counted.
impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.accepted += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Statistics from one render pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderStats {
    /// Bytes written to the sink.
    pub bytes_emitted: u64,
    /// Coordinates recomposited.
    pub cells_composited: usize,
    /// Text cells emitted after diffing.
    pub cells_changed: usize,
    /// Runs of consecutive emitted cells (one cursor move each).
    pub run_count: usize,
    /// Bitmaps transmitted in full.
    pub sprixels_drawn: usize,
    /// Bitmaps re-placed without retransmission.
    pub sprixels_moved: usize,
    /// Bitmaps deleted.
    pub sprixels_hidden: usize,
    /// Delta frames sent for animated bitmaps.
    pub sprixel_deltas: usize,
    /// Time spent in the pass.
    pub duration: Duration,
}

impl RenderStats {
    /// Bytes per emitted text cell; 0.0 for a pass that emitted none.
    pub fn bytes_per_cell(&self) -> f64 {
        match self.cells_changed {
            0 => 0.0,
            n => self.bytes_emitted as f64 / n as f64,
        }
    }

    /// True if the pass produced no output.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes_emitted == 0
    }
}
