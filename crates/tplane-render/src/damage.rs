#![forbid(unsafe_code)]

//! Screen-space damage.
//!
//! One byte per terminal cell. A damaged coordinate is recomposited on the
//! next pass and emitted if it differs from the last frame; a forced one is
//! emitted even when it compares equal, for when the terminal's picture is
//! known to be stale (a sixel was drawn over it, the screen was resized).

use tplane_core::geometry::{Origin, Rect, Size};

const CLEAN: u8 = 0;
const DAMAGED: u8 = 1;
const FORCED: u8 = 2;

/// Per-cell damage for the visible screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DamageMap {
    size: Size,
    cells: Vec<u8>,
}

impl DamageMap {
    /// A fully damaged map, so the first pass paints everything.
    pub fn new(size: Size) -> Self {
        Self {
            size,
            cells: vec![DAMAGED; size.area()],
        }
    }

    /// Screen dimensions.
    #[inline]
    pub fn size(&self) -> Size {
        self.size
    }

    #[inline]
    fn index(&self, y: u16, x: u16) -> Option<usize> {
        (y < self.size.rows && x < self.size.cols)
            .then(|| y as usize * self.size.cols as usize + x as usize)
    }

    /// Damage one coordinate. Out-of-screen coordinates are ignored.
    #[inline]
    pub fn mark_cell(&mut self, y: u16, x: u16) {
        if let Some(i) = self.index(y, x) {
            self.cells[i] = self.cells[i].max(DAMAGED);
        }
    }

    /// Force one coordinate.
    #[inline]
    pub fn force_cell(&mut self, y: u16, x: u16) {
        if let Some(i) = self.index(y, x) {
            self.cells[i] = FORCED;
        }
    }

    /// Damage the on-screen part of a rectangle given by signed origin.
    pub fn mark(&mut self, origin: Origin, rows: u16, cols: u16) {
        self.apply(origin, rows, cols, DAMAGED);
    }

    /// Force the on-screen part of a rectangle given by signed origin.
    pub fn force(&mut self, origin: Origin, rows: u16, cols: u16) {
        self.apply(origin, rows, cols, FORCED);
    }

    fn apply(&mut self, origin: Origin, rows: u16, cols: u16, level: u8) {
        let Some(rect) = self.clip(origin, rows, cols) else {
            return;
        };
        let width = self.size.cols as usize;
        for y in rect.y..rect.bottom() {
            let start = y as usize * width + rect.x as usize;
            for d in &mut self.cells[start..start + rect.width as usize] {
                *d = (*d).max(level);
            }
        }
    }

    /// Intersection of a signed rectangle with the screen.
    pub fn clip(&self, origin: Origin, rows: u16, cols: u16) -> Option<Rect> {
        let rect = Rect::from_signed(origin, cols, rows)?;
        Rect::new(0, 0, self.size.cols, self.size.rows).intersect(&rect)
    }

    /// Damage everything.
    pub fn mark_all(&mut self) {
        for d in &mut self.cells {
            *d = (*d).max(DAMAGED);
        }
    }

    /// Force everything.
    pub fn force_all(&mut self) {
        self.cells.fill(FORCED);
    }

    /// True if `(y, x)` needs recompositing.
    #[inline]
    pub fn is_damaged(&self, y: u16, x: u16) -> bool {
        self.index(y, x).is_some_and(|i| self.cells[i] != CLEAN)
    }

    /// True if `(y, x)` must be emitted regardless of the diff.
    #[inline]
    pub fn is_forced(&self, y: u16, x: u16) -> bool {
        self.index(y, x).is_some_and(|i| self.cells[i] == FORCED)
    }

    /// True if any coordinate is damaged.
    pub fn any(&self) -> bool {
        self.cells.iter().any(|&d| d != CLEAN)
    }

    /// Number of damaged coordinates.
    pub fn count(&self) -> usize {
        self.cells.iter().filter(|&&d| d != CLEAN).count()
    }

    /// Damaged coordinates `(y, x)`, row-major.
    pub fn iter(&self) -> impl Iterator<Item = (u16, u16)> + '_ {
        let cols = self.size.cols.max(1) as usize;
        self.cells
            .iter()
            .enumerate()
            .filter(|(_, d)| **d != CLEAN)
            .map(move |(i, _)| ((i / cols) as u16, (i % cols) as u16))
    }

    /// Clear all damage.
    pub fn clear(&mut self) {
        self.cells.fill(CLEAN);
    }

    /// Adopt new screen dimensions; everything is forced.
    pub fn resize(&mut self, size: Size) {
        self.size = size;
        self.cells = vec![FORCED; size.area()];
    }
}
