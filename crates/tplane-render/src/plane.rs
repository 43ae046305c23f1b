#![forbid(unsafe_code)]

//! Planes: independently positioned cell grids.
//!
//! A plane owns its cells, the [`GraphemePool`] backing their multi-byte
//! glyphs, a base cell shown wherever no glyph was written, and one damage
//! bit per row. All cell writes go through plane methods so pooled glyphs
//! are released exactly once.
//!
//! Planes are created, moved, and destroyed through the
//! [`Pile`](crate::pile::Pile), which also owns z-order and screen-space
//! damage.

use tplane_core::geometry::{Origin, Rect, Size};
use tplane_core::style::StyleFlags;
use unicode_segmentation::UnicodeSegmentation;

use crate::cell::{Cell, Channels, GlyphRef};
use crate::error::{GeometryError, Result};
use crate::grapheme_pool::GraphemePool;
use crate::sprixel::Sprixel;

/// Creation parameters for a plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaneOptions {
    /// Absolute origin.
    pub origin: Origin,
    /// Dimensions.
    pub size: Size,
    /// Optional debugging name.
    pub name: Option<String>,
}

impl PlaneOptions {
    /// Plane of `rows × cols` at absolute `(y, x)`.
    pub fn new(y: i32, x: i32, rows: u16, cols: u16) -> Self {
        Self {
            origin: Origin::new(y, x),
            size: Size::new(rows, cols),
            name: None,
        }
    }

    /// Builder: attach a name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// A rectangular grid of cells at an absolute origin.
#[derive(Debug)]
pub struct Plane {
    size: Size,
    origin: Origin,
    cells: Vec<Cell>,
    pool: GraphemePool,
    base: Cell,
    row_damage: Vec<bool>,
    cursor: (u16, u16),
    pen_channels: Channels,
    pen_styles: StyleFlags,
    name: Option<String>,
    pub(crate) sprixel: Option<Sprixel>,
}

impl Plane {
    pub(crate) fn new(opts: PlaneOptions, pool_bytes: usize) -> Result<Self> {
        if opts.size.is_empty() {
            return Err(GeometryError::EmptyPlane.into());
        }
        let area = opts.size.area();
        Ok(Self {
            size: opts.size,
            origin: opts.origin,
            cells: vec![Cell::EMPTY; area],
            pool: GraphemePool::with_initial_size(pool_bytes),
            base: Cell::EMPTY,
            row_damage: vec![true; opts.size.rows as usize],
            cursor: (0, 0),
            pen_channels: Channels::DEFAULT,
            pen_styles: StyleFlags::empty(),
            name: opts.name,
            sprixel: None,
        })
    }

    /// Number of rows.
    #[inline]
    pub fn rows(&self) -> u16 {
        self.size.rows
    }

    /// Number of columns.
    #[inline]
    pub fn cols(&self) -> u16 {
        self.size.cols
    }

    /// Dimensions.
    #[inline]
    pub fn size(&self) -> Size {
        self.size
    }

    /// Absolute origin.
    #[inline]
    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// Debugging name.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The part of this plane on the non-negative screen quadrant.
    pub fn screen_rect(&self) -> Option<Rect> {
        Rect::from_signed(self.origin, self.size.cols, self.size.rows)
    }

    /// Bound bitmap, if any.
    pub fn sprixel(&self) -> Option<&Sprixel> {
        self.sprixel.as_ref()
    }

    /// Cell at plane-relative `(y, x)`.
    #[inline]
    pub fn cell(&self, y: u16, x: u16) -> Option<&Cell> {
        self.index(y, x).map(|i| &self.cells[i])
    }

    /// Glyph text for a cell of this plane.
    pub fn glyph_str<'a>(&'a self, cell: &Cell) -> GlyphText<'a> {
        if let Some(b) = cell.glyph.as_inline() {
            GlyphText::Ascii(b)
        } else if let Some(off) = cell.glyph.pool_offset() {
            GlyphText::Pooled(self.pool.get(off))
        } else {
            GlyphText::Empty
        }
    }

    /// Cell after substituting the base cell for unwritten positions.
    #[inline]
    pub(crate) fn effective(&self, y: u16, x: u16) -> Option<&Cell> {
        let cell = self.cell(y, x)?;
        if cell.glyph.is_empty() && !cell.is_continuation() {
            Some(&self.base)
        } else {
            Some(cell)
        }
    }

    /// The base cell.
    pub fn base(&self) -> &Cell {
        &self.base
    }

    /// Replace the base cell. `glyph` may be empty.
    pub fn set_base(&mut self, glyph: &str, styles: StyleFlags, channels: Channels) -> Result<()> {
        let new_glyph = self.store_glyph(glyph)?;
        if let Some(off) = self.base.glyph.pool_offset() {
            self.pool.release(off);
        }
        self.base = Cell::with_glyph(new_glyph, 1)
            .with_styles(styles)
            .with_channels(channels);
        self.damage_all();
        Ok(())
    }

    /// Pen colors used by [`put_str`](Self::put_str) and [`putc`](Self::putc).
    pub fn set_channels(&mut self, channels: Channels) {
        self.pen_channels = channels;
    }

    /// Current pen colors.
    pub fn channels(&self) -> Channels {
        self.pen_channels
    }

    /// Pen styles used by [`put_str`](Self::put_str) and [`putc`](Self::putc).
    pub fn set_styles(&mut self, styles: StyleFlags) {
        self.pen_styles = styles;
    }

    /// Current pen styles.
    pub fn styles(&self) -> StyleFlags {
        self.pen_styles
    }

    /// Cursor position `(y, x)`.
    pub fn cursor(&self) -> (u16, u16) {
        self.cursor
    }

    /// Move the cursor.
    pub fn cursor_move_yx(&mut self, y: u16, x: u16) -> Result<()> {
        if y >= self.size.rows || x >= self.size.cols {
            return Err(GeometryError::OutOfBounds { y, x }.into());
        }
        self.cursor = (y, x);
        Ok(())
    }

    /// Write one grapheme cluster at the cursor and advance it.
    ///
    /// Returns the columns consumed; 0 when the cluster has no width or does
    /// not fit before the right edge.
    pub fn putc(&mut self, egc: &str) -> Result<usize> {
        let (y, x) = self.cursor;
        let width = crate::grapheme_width(egc);
        if width == 0 || x as usize + width > self.size.cols as usize {
            return Ok(0);
        }
        self.write_glyph(y, x, egc, width as u8)?;
        let next = x as usize + width;
        self.cursor = if next >= self.size.cols as usize {
            ((y + 1).min(self.size.rows - 1), 0)
        } else {
            (y, next as u16)
        };
        Ok(width)
    }

    /// Write `text` starting at `(y, x)` with the pen.
    ///
    /// Text is segmented into extended grapheme clusters. Zero-width
    /// clusters are skipped; writing stops at the right edge. Returns the
    /// columns consumed.
    pub fn put_str(&mut self, y: u16, x: u16, text: &str) -> Result<usize> {
        if y >= self.size.rows || x >= self.size.cols {
            return Err(GeometryError::OutOfBounds { y, x }.into());
        }
        let mut col = x as usize;
        for egc in text.graphemes(true) {
            let width = crate::grapheme_width(egc);
            if width == 0 {
                continue;
            }
            if col + width > self.size.cols as usize {
                break;
            }
            self.write_glyph(y, col as u16, egc, width as u8)?;
            col += width;
        }
        self.cursor = (y, col.min(self.size.cols as usize - 1) as u16);
        Ok(col - x as usize)
    }

    /// Set the colors and styles of an existing cell without touching its glyph.
    pub fn set_cell_attrs(
        &mut self,
        y: u16,
        x: u16,
        styles: StyleFlags,
        channels: Channels,
    ) -> Result<()> {
        let i = self.index(y, x).ok_or(GeometryError::OutOfBounds { y, x })?;
        self.cells[i].styles = styles;
        self.cells[i].channels = channels;
        self.row_damage[y as usize] = true;
        Ok(())
    }

    /// Reset `(y, x)` to unwritten, releasing its glyph.
    pub fn clear_cell(&mut self, y: u16, x: u16) -> Result<()> {
        if self.index(y, x).is_none() {
            return Err(GeometryError::OutOfBounds { y, x }.into());
        }
        self.clear_wide_neighbors(y, x, 1);
        self.release_at(y, x);
        self.row_damage[y as usize] = true;
        Ok(())
    }

    /// Reset every cell to unwritten and home the cursor.
    pub fn erase(&mut self) {
        for cell in &mut self.cells {
            if let Some(off) = cell.glyph.pool_offset() {
                self.pool.release(off);
            }
            *cell = Cell::EMPTY;
        }
        self.cursor = (0, 0);
        self.damage_all();
    }

    /// True if row `y` changed since the last render.
    #[inline]
    pub fn is_row_damaged(&self, y: u16) -> bool {
        self.row_damage.get(y as usize).copied().unwrap_or(false)
    }

    /// Mark every row damaged.
    pub fn damage_all(&mut self) {
        self.row_damage.fill(true);
    }

    pub(crate) fn clear_damage(&mut self) {
        self.row_damage.fill(false);
    }

    pub(crate) fn set_origin(&mut self, origin: Origin) {
        self.origin = origin;
    }

    /// Bytes held by pooled glyphs.
    pub fn pool_used(&self) -> usize {
        self.pool.used()
    }

    /// Rebuild the grid: `keep` (plane-relative, may be empty) lands at
    /// `(yoff, xoff)` of a `new_size` grid, everything else is unwritten.
    ///
    /// The origin moves so kept cells stay put on screen.
    pub(crate) fn resize(
        &mut self,
        keep: Rect,
        yoff: u16,
        xoff: u16,
        new_size: Size,
    ) -> Result<()> {
        if new_size.is_empty() {
            return Err(GeometryError::EmptyPlane.into());
        }
        if self.sprixel.is_some() {
            return Err(GeometryError::SprixelBound.into());
        }
        let keep = if keep.is_empty() {
            Rect::default()
        } else {
            keep
        };
        let fits_old = keep.right() <= self.size.cols && keep.bottom() <= self.size.rows;
        let fits_new = u32::from(yoff) + u32::from(keep.height) <= u32::from(new_size.rows)
            && u32::from(xoff) + u32::from(keep.width) <= u32::from(new_size.cols);
        if !fits_old || !fits_new {
            return Err(GeometryError::KeepOutOfBounds {
                rows: new_size.rows,
                cols: new_size.cols,
            }
            .into());
        }

        let mut cells = vec![Cell::EMPTY; new_size.area()];
        let old_cols = self.size.cols as usize;
        let new_cols = new_size.cols as usize;
        for (i, cell) in self.cells.iter().enumerate() {
            let (y, x) = ((i / old_cols) as u16, (i % old_cols) as u16);
            if keep.contains(x, y) {
                let ny = (y - keep.y + yoff) as usize;
                let nx = (x - keep.x + xoff) as usize;
                cells[ny * new_cols + nx] = *cell;
            } else if let Some(off) = cell.glyph.pool_offset() {
                self.pool.release(off);
            }
        }
        // A wide glyph split by the kept edge loses its other half.
        for row in cells.chunks_mut(new_cols) {
            for x in 0..row.len() {
                let lead_broken = row[x].width == 2
                    && row.get(x + 1).is_none_or(|next| !next.is_continuation());
                let cont_broken = row[x].is_continuation()
                    && (x == 0 || row[x - 1].width != 2);
                if lead_broken || cont_broken {
                    if let Some(off) = row[x].glyph.pool_offset() {
                        self.pool.release(off);
                    }
                    row[x] = Cell::EMPTY;
                }
            }
        }

        self.origin = self
            .origin
            .offset(i32::from(keep.y) - i32::from(yoff), i32::from(keep.x) - i32::from(xoff));
        self.cells = cells;
        self.size = new_size;
        self.row_damage = vec![true; new_size.rows as usize];
        self.cursor = (0, 0);
        Ok(())
    }

    #[inline]
    fn index(&self, y: u16, x: u16) -> Option<usize> {
        if y < self.size.rows && x < self.size.cols {
            Some(y as usize * self.size.cols as usize + x as usize)
        } else {
            None
        }
    }

    fn store_glyph(&mut self, egc: &str) -> Result<GlyphRef> {
        let bytes = egc.as_bytes();
        if bytes.is_empty() {
            return Ok(GlyphRef::EMPTY);
        }
        if bytes.len() == 1 {
            return Ok(GlyphRef::inline(bytes[0]).unwrap_or(GlyphRef::EMPTY));
        }
        Ok(GlyphRef::pooled(self.pool.stash(bytes)?))
    }

    fn release_at(&mut self, y: u16, x: u16) {
        if let Some(i) = self.index(y, x) {
            if let Some(off) = self.cells[i].glyph.pool_offset() {
                self.pool.release(off);
            }
            self.cells[i] = Cell::EMPTY;
        }
    }

    /// Clear halves of wide glyphs that a write of `width` at `x` would split.
    fn clear_wide_neighbors(&mut self, y: u16, x: u16, width: u16) {
        if x > 0 && self.cell(y, x).is_some_and(Cell::is_continuation) {
            self.release_at(y, x - 1);
        }
        for c in x..x.saturating_add(width) {
            if self.cell(y, c).is_some_and(|cell| cell.width == 2) {
                self.release_at(y, c + 1);
            }
        }
    }

    fn write_glyph(&mut self, y: u16, x: u16, egc: &str, width: u8) -> Result<()> {
        // Stash first so a failed allocation leaves the cell untouched.
        let glyph = self.store_glyph(egc)?;
        self.clear_wide_neighbors(y, x, u16::from(width));
        self.release_at(y, x);
        let (channels, styles) = (self.pen_channels, self.pen_styles);
        if let Some(i) = self.index(y, x) {
            self.cells[i] = Cell::with_glyph(glyph, width)
                .with_channels(channels)
                .with_styles(styles);
        }
        if width == 2 {
            self.release_at(y, x + 1);
            if let Some(i) = self.index(y, x + 1) {
                self.cells[i] = Cell::continuation(channels, styles);
            }
        }
        self.row_damage[y as usize] = true;
        Ok(())
    }
}

/// Resolved glyph text of a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlyphText<'a> {
    /// No glyph.
    Empty,
    /// Inline ASCII byte.
    Ascii(u8),
    /// Pooled cluster.
    Pooled(&'a str),
}

impl GlyphText<'_> {
    /// Glyph bytes, empty for [`GlyphText::Empty`].
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Empty => &[],
            Self::Ascii(b) => std::slice::from_ref(b),
            Self::Pooled(s) => s.as_bytes(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::{AlphaLevel, Rgb};

    fn plane(rows: u16, cols: u16) -> Plane {
        Plane::new(PlaneOptions::new(0, 0, rows, cols), 0).unwrap()
    }

    fn text(p: &Plane, y: u16, x: u16) -> Vec<u8> {
        let cell = p.cell(y, x).unwrap();
        p.glyph_str(cell).as_bytes().to_vec()
    }

    #[test]
    fn zero_sized_plane_is_rejected() {
        let err = Plane::new(PlaneOptions::new(0, 0, 0, 4), 0).unwrap_err();
        assert!(matches!(err, crate::Error::Geometry(GeometryError::EmptyPlane)));
    }

    #[test]
    fn put_str_stores_inline_and_pooled() {
        let mut p = plane(1, 8);
        let used = p.put_str(0, 0, "aé").unwrap();
        assert_eq!(used, 2);
        assert_eq!(text(&p, 0, 0), b"a");
        assert_eq!(text(&p, 0, 1), "é".as_bytes());
        assert!(p.cell(0, 0).unwrap().glyph.as_inline().is_some());
        assert!(p.cell(0, 1).unwrap().glyph.is_pooled());
        assert_eq!(p.pool_used(), "é".len() + 1);
    }

    #[test]
    fn overwrite_releases_pooled_glyph() {
        let mut p = plane(1, 4);
        p.put_str(0, 0, "é").unwrap();
        p.put_str(0, 0, "x").unwrap();
        assert_eq!(p.pool_used(), 0);
    }

    #[test]
    fn wide_glyph_marks_continuation_and_clips() {
        let mut p = plane(1, 3);
        let used = p.put_str(0, 0, "中中").unwrap();
        assert_eq!(used, 2);
        assert_eq!(p.cell(0, 0).unwrap().width, 2);
        assert!(p.cell(0, 1).unwrap().is_continuation());
        assert!(p.cell(0, 2).unwrap().glyph.is_empty());
    }

    #[test]
    fn overwriting_half_of_wide_glyph_clears_both() {
        let mut p = plane(1, 4);
        p.put_str(0, 0, "中").unwrap();
        p.put_str(0, 1, "x").unwrap();
        assert!(p.cell(0, 0).unwrap().glyph.is_empty());
        assert_eq!(text(&p, 0, 1), b"x");
        assert_eq!(p.pool_used(), 0);
    }

    #[test]
    fn putc_advances_cursor() {
        let mut p = plane(2, 2);
        p.putc("a").unwrap();
        assert_eq!(p.cursor(), (0, 1));
        p.putc("b").unwrap();
        assert_eq!(p.cursor(), (1, 0));
        assert_eq!(p.putc("中").unwrap(), 2);
        assert_eq!(p.putc("\u{0301}").unwrap(), 0);
    }

    #[test]
    fn base_cell_fills_unwritten_positions() {
        let mut p = plane(1, 2);
        let ch = Channels::DEFAULT.set_bg_rgb(Rgb::new(9, 9, 9));
        p.set_base("·", StyleFlags::empty(), ch).unwrap();
        p.put_str(0, 0, "a").unwrap();
        let base = p.effective(0, 1).unwrap();
        assert_eq!(p.glyph_str(base).as_bytes(), "·".as_bytes());
        assert_eq!(base.channels.bg(), Some(Rgb::new(9, 9, 9)));
        assert_eq!(p.glyph_str(p.effective(0, 0).unwrap()).as_bytes(), b"a");
    }

    #[test]
    fn pen_channels_apply_to_writes() {
        let mut p = plane(1, 2);
        p.set_channels(Channels::DEFAULT.set_fg_alpha(AlphaLevel::Blend));
        p.set_styles(StyleFlags::BOLD);
        p.put_str(0, 0, "a").unwrap();
        let cell = p.cell(0, 0).unwrap();
        assert_eq!(cell.channels.fg_alpha(), AlphaLevel::Blend);
        assert_eq!(cell.styles, StyleFlags::BOLD);
    }

    #[test]
    fn resize_keeps_subrect_and_moves_origin() {
        let mut p = Plane::new(PlaneOptions::new(5, 5, 3, 3), 0).unwrap();
        p.put_str(1, 1, "é").unwrap();
        p.put_str(0, 0, "z").unwrap();
        p.clear_damage();
        p.resize(Rect::new(1, 1, 2, 2), 0, 0, Size::new(2, 2)).unwrap();
        assert_eq!(p.origin(), Origin::new(6, 6));
        assert_eq!(text(&p, 0, 0), "é".as_bytes());
        assert_eq!(p.pool_used(), "é".len() + 1);
        assert!(p.is_row_damaged(0) && p.is_row_damaged(1));
    }

    #[test]
    fn resize_releases_dropped_glyphs() {
        let mut p = plane(2, 2);
        p.put_str(1, 1, "é").unwrap();
        p.resize(Rect::new(0, 0, 1, 1), 0, 0, Size::new(4, 4)).unwrap();
        assert_eq!(p.pool_used(), 0);
        assert_eq!(p.size(), Size::new(4, 4));
    }

    #[test]
    fn resize_rejects_keep_that_does_not_fit() {
        let mut p = plane(3, 3);
        p.put_str(0, 0, "a").unwrap();
        let err = p.resize(Rect::new(0, 0, 3, 3), 1, 0, Size::new(3, 3)).unwrap_err();
        assert!(matches!(err, crate::Error::Geometry(GeometryError::KeepOutOfBounds { .. })));
        assert_eq!(text(&p, 0, 0), b"a");
        assert_eq!(p.size(), Size::new(3, 3));
    }

    #[test]
    fn erase_releases_everything() {
        let mut p = plane(2, 3);
        p.put_str(0, 0, "éé").unwrap();
        p.clear_damage();
        p.erase();
        assert_eq!(p.pool_used(), 0);
        assert!((0..2).all(|y| p.is_row_damaged(y)));
    }
}
