#![forbid(unsafe_code)]

//! Bitmap graphics bound to planes.
//!
//! A [`Sprixel`] pairs a source [`Bitmap`] with its encoded [`WireBuffer`]
//! and a [`Tam`] holding one occlusion state per cell of the owning plane.
//! Every mutation edits the wire bytes first and commits the TAM transition
//! second, so a failed edit leaves both untouched.
//!
//! # Lifecycle
//!
//! | State | Meaning | Next render emits |
//! |-------|---------|-------------------|
//! | `Invalidated` | New or re-encoded | Full transmission |
//! | `Loaded` | Frame deltas queued | The deltas |
//! | `Moved` | Plane moved | Placement (or transmission where unsupported) |
//! | `Quiescent` | On screen, unchanged | Nothing |
//! | `PendingHide` | Plane destroyed or bitmap replaced | Deletion |

pub mod tam;
pub mod wire;

use std::fmt;

use tplane_core::geometry::Origin;
use tplane_core::terminal_capabilities::CellPixels;

use crate::cell::Rgb;
use crate::codec::{GraphicsCodec, WireLayout};
use crate::error::{GeometryError, Result};

pub use tam::{Tam, TamCounts, TamEntry, TamState};
pub use wire::WireBuffer;

/// Stable bitmap identifier, never zero.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SprixelId(std::num::NonZeroU32);

impl SprixelId {
    pub(crate) const fn new(raw: std::num::NonZeroU32) -> Self {
        Self(raw)
    }

    /// Numeric id as sent on the wire.
    #[inline]
    pub const fn get(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Debug for SprixelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SprixelId({})", self.0)
    }
}

/// Invalidation state driving what the renderer emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SprixelState {
    /// Displayed and unchanged.
    Quiescent,
    /// Displayed; delta frames are queued.
    Loaded,
    /// Needs a full transmission.
    Invalidated,
    /// Waiting for a render to delete it.
    PendingHide,
    /// Displayed at a stale position.
    Moved,
}

/// An RGBA8 image, row-major, after transparent-color keying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    width: u32,
    height: u32,
    rgba: Vec<u8>,
}

impl Bitmap {
    /// Validate and copy `rgba`; pixels matching `transparent` get alpha 0.
    pub fn new(rgba: &[u8], width: u32, height: u32, transparent: Option<Rgb>) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|n| n.checked_mul(4))
            .unwrap_or(usize::MAX);
        if width == 0 || height == 0 || rgba.len() != expected {
            return Err(GeometryError::BufferSize {
                expected,
                actual: rgba.len(),
            }
            .into());
        }
        let mut rgba = rgba.to_vec();
        if let Some(key) = transparent {
            for px in rgba.chunks_exact_mut(4) {
                if px[0] == key.r && px[1] == key.g && px[2] == key.b {
                    px[3] = 0;
                }
            }
        }
        Ok(Self {
            width,
            height,
            rgba,
        })
    }

    /// Width in pixels.
    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Raw RGBA bytes.
    #[inline]
    pub fn as_rgba(&self) -> &[u8] {
        &self.rgba
    }

    /// Pixel at `(x, y)` as `[r, g, b, a]`.
    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = (y as usize * self.width as usize + x as usize) * 4;
        [self.rgba[i], self.rgba[i + 1], self.rgba[i + 2], self.rgba[i + 3]]
    }

    /// Alpha samples of a rectangle, row-major.
    pub(crate) fn alphas(&self, rect: PixelRect) -> impl Iterator<Item = u8> + '_ {
        rect.pixels().map(move |(x, y)| self.pixel(x, y)[3])
    }

    /// RGBA bytes of a rectangle, optionally with every alpha zeroed.
    pub(crate) fn region(&self, rect: PixelRect, zero_alpha: bool) -> Vec<u8> {
        let mut out = Vec::with_capacity(rect.area() * 4);
        for (x, y) in rect.pixels() {
            let mut px = self.pixel(x, y);
            if zero_alpha {
                px[3] = 0;
            }
            out.extend_from_slice(&px);
        }
        out
    }

    /// Cells needed at the given cell size, `(rows, cols)`.
    pub fn cell_extent(&self, cell: CellPixels) -> (u32, u32) {
        (
            self.height.div_ceil(u32::from(cell.height.max(1))),
            self.width.div_ceil(u32::from(cell.width.max(1))),
        )
    }
}

/// Pixel-space rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub(crate) const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub(crate) fn area(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Smallest rectangle containing both.
    pub(crate) fn union(self, other: Self) -> Self {
        if self.is_empty() {
            return other;
        }
        if other.is_empty() {
            return self;
        }
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let right = (self.x + self.width).max(other.x + other.width);
        let bottom = (self.y + self.height).max(other.y + other.height);
        Self::new(x, y, right - x, bottom - y)
    }

    pub(crate) fn pixels(self) -> impl Iterator<Item = (u32, u32)> {
        (self.y..self.y + self.height).flat_map(move |y| (self.x..self.x + self.width).map(move |x| (x, y)))
    }
}

/// Pixels of cell `(y, x)` clipped to the image, `None` when it has none.
pub(crate) fn cell_rect(bitmap: &Bitmap, cell: CellPixels, y: u16, x: u16) -> Option<PixelRect> {
    let cw = u32::from(cell.width.max(1));
    let ch = u32::from(cell.height.max(1));
    let px = u32::from(x) * cw;
    let py = u32::from(y) * ch;
    if px >= bitmap.width || py >= bitmap.height {
        return None;
    }
    Some(PixelRect::new(
        px,
        py,
        cw.min(bitmap.width - px),
        ch.min(bitmap.height - py),
    ))
}

fn classify_all(bitmap: &Bitmap, cell: CellPixels, rows: u16, cols: u16) -> Tam {
    let mut states = Vec::with_capacity(rows as usize * cols as usize);
    for y in 0..rows {
        for x in 0..cols {
            let state = match cell_rect(bitmap, cell, y, x) {
                Some(rect) => TamState::classify(bitmap.alphas(rect)),
                None => TamState::Transparent,
            };
            states.push(state);
        }
    }
    Tam::from_states(rows, cols, states)
}

/// A bitmap bound to one plane.
#[derive(Debug, Clone)]
pub struct Sprixel {
    id: SprixelId,
    pub(crate) state: SprixelState,
    bitmap: Bitmap,
    cell: CellPixels,
    tam: Tam,
    wire: WireBuffer,
    layout: WireLayout,
    pub(crate) drawn_at: Option<Origin>,
    pub(crate) pending: Vec<Vec<u8>>,
}

impl Sprixel {
    /// Encode `bitmap` and classify every cell of a `rows × cols` plane.
    pub(crate) fn create(
        codec: &GraphicsCodec,
        id: SprixelId,
        bitmap: Bitmap,
        cell: CellPixels,
        rows: u16,
        cols: u16,
    ) -> Result<Self> {
        let (wire, layout) = codec.encode(&bitmap, id)?;
        let tam = classify_all(&bitmap, cell, rows, cols);
        Ok(Self {
            id,
            state: SprixelState::Invalidated,
            bitmap,
            cell,
            tam,
            wire,
            layout,
            drawn_at: None,
            pending: Vec::new(),
        })
    }

    /// Identifier.
    #[inline]
    pub fn id(&self) -> SprixelId {
        self.id
    }

    /// Invalidation state.
    #[inline]
    pub fn state(&self) -> SprixelState {
        self.state
    }

    /// Occlusion matrix.
    #[inline]
    pub fn tam(&self) -> &Tam {
        &self.tam
    }

    /// Encoded bytes.
    #[inline]
    pub fn wire(&self) -> &WireBuffer {
        &self.wire
    }

    /// Source image.
    #[inline]
    pub fn bitmap(&self) -> &Bitmap {
        &self.bitmap
    }

    /// Pixels per cell.
    #[inline]
    pub fn cell_pixels(&self) -> CellPixels {
        self.cell
    }

    /// Queued delta frames.
    pub fn pending_deltas(&self) -> &[Vec<u8>] {
        &self.pending
    }

    /// Where the last successful render placed it.
    pub fn drawn_at(&self) -> Option<Origin> {
        self.drawn_at
    }

    /// Delta frames are only useful for an image already on screen that no
    /// full transmission will replace.
    fn wants_delta(&self) -> bool {
        self.drawn_at.is_some()
            && !matches!(
                self.state,
                SprixelState::Invalidated | SprixelState::PendingHide
            )
    }

    fn mark_changed(&mut self, delta: Option<Vec<u8>>) {
        match (self.state, delta) {
            (SprixelState::PendingHide | SprixelState::Invalidated, _) => {}
            (state, Some(frame)) => {
                self.pending.push(frame);
                if state == SprixelState::Quiescent {
                    self.state = SprixelState::Loaded;
                }
            }
            (_, None) => {
                self.pending.clear();
                self.state = SprixelState::Invalidated;
            }
        }
    }

    /// Cut cell `(y, x)` out of the bitmap. Returns whether the TAM changed.
    pub(crate) fn wipe(&mut self, codec: &GraphicsCodec, y: u16, x: u16) -> Result<bool> {
        let state = self
            .tam
            .state(y, x)
            .ok_or(GeometryError::OutOfBounds { y, x })?;
        match state {
            TamState::Annihilated | TamState::AnnihilatedTransparent => Ok(false),
            TamState::Transparent => {
                if let Some(entry) = self.tam.get_mut(y, x) {
                    entry.state = TamState::AnnihilatedTransparent;
                }
                Ok(true)
            }
            TamState::Opaque | TamState::Mixed => {
                #[cfg(feature = "tracing")]
                let _span = tracing::trace_span!("wipe", id = self.id.get(), y, x).entered();
                let Some(rect) = cell_rect(&self.bitmap, self.cell, y, x) else {
                    return Ok(false);
                };
                let delta = if self.wants_delta() {
                    codec.frame_delta(self.id, &self.bitmap, rect, true)?
                } else {
                    None
                };
                let aux = codec.wipe(&mut self.wire, &mut self.layout, &self.bitmap, rect)?;
                if let Some(entry) = self.tam.get_mut(y, x) {
                    entry.state = TamState::Annihilated;
                    entry.auxvec = Some(aux);
                }
                self.mark_changed(delta);
                Ok(true)
            }
        }
    }

    /// Restore a wiped cell. Returns whether the TAM changed.
    pub(crate) fn rebuild(&mut self, codec: &GraphicsCodec, y: u16, x: u16) -> Result<bool> {
        let entry = self
            .tam
            .get(y, x)
            .ok_or(GeometryError::OutOfBounds { y, x })?;
        match entry.state {
            TamState::AnnihilatedTransparent => {
                if let Some(entry) = self.tam.get_mut(y, x) {
                    entry.state = TamState::Transparent;
                }
                Ok(true)
            }
            TamState::Annihilated => {
                #[cfg(feature = "tracing")]
                let _span = tracing::trace_span!("rebuild", id = self.id.get(), y, x).entered();
                let Some(rect) = cell_rect(&self.bitmap, self.cell, y, x) else {
                    return Ok(false);
                };
                let delta = if self.wants_delta() {
                    codec.frame_delta(self.id, &self.bitmap, rect, false)?
                } else {
                    None
                };
                let aux = entry.auxvec.as_deref().unwrap_or(&[]);
                let restored =
                    codec.rebuild(&mut self.wire, &mut self.layout, &self.bitmap, rect, aux)?;
                if let Some(entry) = self.tam.get_mut(y, x) {
                    entry.state = restored;
                    entry.auxvec = None;
                }
                self.mark_changed(delta);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Rebuild every annihilated cell, returning the coordinates touched.
    pub(crate) fn rebuild_all(&mut self, codec: &GraphicsCodec) -> Result<Vec<(u16, u16)>> {
        let wiped: Vec<(u16, u16)> = self
            .tam
            .iter()
            .filter(|(_, _, e)| e.state.is_annihilated())
            .map(|(y, x, _)| (y, x))
            .collect();
        for &(y, x) in &wiped {
            self.rebuild(codec, y, x)?;
        }
        Ok(wiped)
    }

    /// Mark the plane as moved after its annihilated cells were rebuilt.
    pub(crate) fn mark_moved(&mut self) {
        if matches!(self.state, SprixelState::Quiescent | SprixelState::Loaded) {
            self.state = SprixelState::Moved;
        }
    }

    /// Replace the image, keeping the id.
    ///
    /// Auxiliary vectors are dropped and every cell reclassified. Returns
    /// the cells that were `Opaque` and no longer are.
    pub(crate) fn reblit(&mut self, codec: &GraphicsCodec, bitmap: Bitmap) -> Result<Vec<(u16, u16)>> {
        let same_size =
            bitmap.width() == self.bitmap.width() && bitmap.height() == self.bitmap.height();
        let delta = if same_size && self.wants_delta() {
            let changed = self.changed_region(&bitmap);
            if changed.is_empty() {
                // Same pixels, and only transparent cells are wiped: the wire
                // already matches a fresh encode.
                self.tam = classify_all(&bitmap, self.cell, self.tam.rows(), self.tam.cols());
                return Ok(Vec::new());
            }
            codec.frame_delta(self.id, &bitmap, changed, false)?
        } else {
            None
        };
        let (wire, layout) = codec.encode(&bitmap, self.id)?;
        let tam = classify_all(&bitmap, self.cell, self.tam.rows(), self.tam.cols());
        let left_opaque = self
            .tam
            .iter()
            .filter(|&(y, x, e)| {
                e.state == TamState::Opaque && tam.state(y, x) != Some(TamState::Opaque)
            })
            .map(|(y, x, _)| (y, x))
            .collect();
        self.wire = wire;
        self.layout = layout;
        self.tam = tam;
        self.bitmap = bitmap;
        self.mark_changed(delta);
        Ok(left_opaque)
    }

    /// Bounding box of pixels differing from `next`, plus every wiped cell.
    fn changed_region(&self, next: &Bitmap) -> PixelRect {
        let mut bbox = PixelRect::default();
        let width = self.bitmap.width() as usize;
        for (i, (old, new)) in self
            .bitmap
            .as_rgba()
            .chunks_exact(4)
            .zip(next.as_rgba().chunks_exact(4))
            .enumerate()
        {
            if old != new {
                let px = PixelRect::new((i % width) as u32, (i / width) as u32, 1, 1);
                bbox = bbox.union(px);
            }
        }
        for (y, x, e) in self.tam.iter() {
            if e.state == TamState::Annihilated
                && let Some(rect) = cell_rect(&self.bitmap, self.cell, y, x)
            {
                bbox = bbox.union(rect);
            }
        }
        bbox
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::kitty::KittyCodec;
    use crate::config::AnimationLevel;

    fn solid(w: u32, h: u32, alpha: u8) -> Bitmap {
        let rgba: Vec<u8> = (0..w * h).flat_map(|_| [10, 20, 30, alpha]).collect();
        Bitmap::new(&rgba, w, h, None).unwrap()
    }

    fn kitty() -> GraphicsCodec {
        GraphicsCodec::Kitty(KittyCodec::new(4096, AnimationLevel::Full))
    }

    fn id(n: u32) -> SprixelId {
        SprixelId::new(std::num::NonZeroU32::new(n).unwrap())
    }

    #[test]
    fn bitmap_rejects_wrong_length() {
        let err = Bitmap::new(&[0; 7], 1, 2, None).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Geometry(GeometryError::BufferSize { expected: 8, actual: 7 })
        ));
    }

    #[test]
    fn transparent_key_zeroes_alpha() {
        let bmp = Bitmap::new(&[1, 2, 3, 255, 4, 5, 6, 255], 2, 1, Some(Rgb::new(1, 2, 3))).unwrap();
        assert_eq!(bmp.pixel(0, 0)[3], 0);
        assert_eq!(bmp.pixel(1, 0)[3], 255);
    }

    #[test]
    fn cells_outside_image_are_transparent() {
        let cell = CellPixels::new(2, 2);
        let s = Sprixel::create(&kitty(), id(1), solid(3, 2, 255), cell, 2, 3).unwrap();
        assert_eq!(s.tam().state(0, 0), Some(TamState::Opaque));
        assert_eq!(s.tam().state(0, 1), Some(TamState::Opaque));
        assert_eq!(s.tam().state(0, 2), Some(TamState::Transparent));
        assert_eq!(s.tam().state(1, 0), Some(TamState::Transparent));
        assert_eq!(s.state(), SprixelState::Invalidated);
    }

    #[test]
    fn wipe_then_rebuild_restores_wire_and_state() {
        let cell = CellPixels::new(2, 2);
        let codec = kitty();
        let mut s = Sprixel::create(&codec, id(1), solid(4, 4, 255), cell, 2, 2).unwrap();
        let original = s.wire().clone();
        assert!(s.wipe(&codec, 1, 1).unwrap());
        assert_eq!(s.tam().state(1, 1), Some(TamState::Annihilated));
        assert_eq!(s.tam().get(1, 1).unwrap().auxvec(), Some(&[255u8; 4][..]));
        assert_ne!(s.wire(), &original);
        assert!(!s.wipe(&codec, 1, 1).unwrap());
        assert!(s.rebuild(&codec, 1, 1).unwrap());
        assert_eq!(s.wire(), &original);
        assert_eq!(s.tam().state(1, 1), Some(TamState::Opaque));
        assert!(s.tam().get(1, 1).unwrap().auxvec().is_none());
    }

    #[test]
    fn transparent_cells_annihilate_without_wire_edits() {
        let cell = CellPixels::new(2, 2);
        let codec = kitty();
        let mut s = Sprixel::create(&codec, id(1), solid(2, 2, 0), cell, 1, 1).unwrap();
        let before = s.wire().clone();
        assert!(s.wipe(&codec, 0, 0).unwrap());
        assert_eq!(s.tam().state(0, 0), Some(TamState::AnnihilatedTransparent));
        assert!(s.rebuild(&codec, 0, 0).unwrap());
        assert_eq!(s.tam().state(0, 0), Some(TamState::Transparent));
        assert_eq!(s.wire(), &before);
    }

    #[test]
    fn reblit_reports_cells_that_left_opaque() {
        let cell = CellPixels::new(1, 1);
        let codec = kitty();
        let mut s = Sprixel::create(&codec, id(7), solid(2, 1, 255), cell, 1, 2).unwrap();
        s.wipe(&codec, 0, 0).unwrap();
        let next = Bitmap::new(&[0, 0, 0, 255, 0, 0, 0, 0], 2, 1, None).unwrap();
        let left = s.reblit(&codec, next).unwrap();
        assert_eq!(left, vec![(0, 1)]);
        assert_eq!(s.id(), id(7));
        assert_eq!(s.tam().state(0, 0), Some(TamState::Opaque));
        assert!(s.tam().get(0, 0).unwrap().auxvec().is_none());
    }

    #[test]
    fn identical_delta_reblit_still_reclassifies() {
        let cell = CellPixels::new(2, 2);
        let codec = GraphicsCodec::Kitty(KittyCodec::new(4096, AnimationLevel::Delta));
        let mut s = Sprixel::create(&codec, id(2), solid(2, 2, 0), cell, 1, 1).unwrap();
        s.drawn_at = Some(tplane_core::geometry::Origin::new(0, 0));
        s.state = SprixelState::Quiescent;
        let before = s.wire().clone();
        assert!(s.wipe(&codec, 0, 0).unwrap());
        assert_eq!(s.tam().state(0, 0), Some(TamState::AnnihilatedTransparent));

        let left = s.reblit(&codec, solid(2, 2, 0)).unwrap();
        assert!(left.is_empty());
        assert_eq!(s.tam().state(0, 0), Some(TamState::Transparent));
        assert!(s.tam().get(0, 0).unwrap().auxvec().is_none());
        assert_eq!(s.wire(), &before);
        assert!(s.pending_deltas().is_empty());
    }

    #[test]
    fn moved_state_only_from_displayed() {
        let cell = CellPixels::new(1, 1);
        let codec = kitty();
        let mut s = Sprixel::create(&codec, id(1), solid(1, 1, 255), cell, 1, 1).unwrap();
        s.mark_moved();
        assert_eq!(s.state(), SprixelState::Invalidated);
        s.state = SprixelState::Quiescent;
        s.mark_moved();
        assert_eq!(s.state(), SprixelState::Moved);
    }
}
