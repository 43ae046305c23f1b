#![forbid(unsafe_code)]

//! Geometric primitives.
//!
//! Terminal coordinates are 0-indexed with the origin at the top-left.
//! Plane origins may be negative or lie beyond the screen, so they are
//! carried as a signed [`Origin`]; everything that addresses actual
//! terminal cells is a [`Rect`] in unsigned space.

/// Cells `x..x + width` by `y..y + height` on the screen.
///
/// Edges saturate at `u16::MAX`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Rect {
    pub x: u16,
    pub y: u16,
    pub width: u16,
    pub height: u16,
}

impl Rect {
    #[inline]
    pub const fn new(x: u16, y: u16, width: u16, height: u16) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// The part of a plane footprint that lands at non-negative coordinates.
    ///
    /// `None` when the footprint is empty or entirely above or left of the
    /// screen.
    pub fn from_signed(origin: Origin, width: u16, height: u16) -> Option<Rect> {
        let (top, left) = (i64::from(origin.y), i64::from(origin.x));
        let limit = i64::from(u16::MAX);
        let x0 = left.max(0);
        let y0 = top.max(0);
        let x1 = (left + i64::from(width)).min(limit);
        let y1 = (top + i64::from(height)).min(limit);
        (x0 < x1 && y0 < y1).then(|| {
            Rect::new(x0 as u16, y0 as u16, (x1 - x0) as u16, (y1 - y0) as u16)
        })
    }

    /// One past the last column.
    #[inline]
    pub const fn right(&self) -> u16 {
        self.x.saturating_add(self.width)
    }

    /// One past the last row.
    #[inline]
    pub const fn bottom(&self) -> u16 {
        self.y.saturating_add(self.height)
    }

    #[inline]
    pub const fn area(&self) -> u32 {
        self.width as u32 * self.height as u32
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    #[inline]
    pub const fn contains(&self, x: u16, y: u16) -> bool {
        (x >= self.x && x < self.right()) && (y >= self.y && y < self.bottom())
    }

    /// Overlap of two rectangles, `None` when they share no cell.
    pub fn intersect(&self, other: &Rect) -> Option<Rect> {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = self.right().min(other.right());
        let y1 = self.bottom().min(other.bottom());
        (x0 < x1 && y0 < y1).then(|| Rect::new(x0, y0, x1 - x0, y1 - y0))
    }

    /// Every `(x, y)` inside, row by row.
    pub fn cells(&self) -> impl Iterator<Item = (u16, u16)> + '_ {
        (self.y..self.bottom()).flat_map(move |y| (self.x..self.right()).map(move |x| (x, y)))
    }
}

/// Absolute position of a plane's top-left cell.
///
/// Signed so planes can hang off the top or left edge of the screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Origin {
    /// Row of the top edge.
    pub y: i32,
    /// Column of the left edge.
    pub x: i32,
}

impl Origin {
    /// Create a new origin.
    #[inline]
    pub const fn new(y: i32, x: i32) -> Self {
        Self { y, x }
    }

    /// Offset by a signed delta.
    #[inline]
    pub const fn offset(self, dy: i32, dx: i32) -> Self {
        Self::new(self.y.saturating_add(dy), self.x.saturating_add(dx))
    }
}

/// Dimensions in cells, `rows × cols`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Size {
    /// Number of rows.
    pub rows: u16,
    /// Number of columns.
    pub cols: u16,
}

impl Size {
    /// Create a new size.
    #[inline]
    pub const fn new(rows: u16, cols: u16) -> Self {
        Self { rows, cols }
    }

    /// Total number of cells.
    #[inline]
    pub const fn area(&self) -> usize {
        self.rows as usize * self.cols as usize
    }

    /// True if either dimension is zero.
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.rows == 0 || self.cols == 0
    }
}
