#![forbid(unsafe_code)]

//! The pile: an arena of planes in z-order, the screen damage map, and the
//! bitmap engine's bookkeeping.
//!
//! Planes live in slots addressed by generational [`PlaneId`]s. Z-order is a
//! doubly linked list threaded through the slots by index, so every splice is
//! O(1) and a destroyed plane's handle can never reach its slot's next
//! occupant.
//!
//! # Invariants
//!
//! 1. Slot 0 holds the standard plane for the pile's whole life. It matches
//!    the terminal size and is never destroyed, moved, or resized by callers.
//! 2. Every live slot is on the z-list exactly once.
//! 3. A sprixel removed from its plane is queued for deletion until a
//!    render succeeds.
//!
//! ```
//! use tplane_core::terminal_capabilities::TerminalCapabilities;
//! use tplane_render::config::RenderConfig;
//! use tplane_render::pile::{Pile, ZOp};
//! use tplane_render::plane::PlaneOptions;
//!
//! let caps = TerminalCapabilities::modern();
//! let mut pile = Pile::new(24, 80, &caps, &RenderConfig::default()).unwrap();
//! let popup = pile.create(PlaneOptions::new(2, 4, 3, 10)).unwrap();
//! pile.plane_mut(popup).unwrap().put_str(0, 0, "hello").unwrap();
//! pile.move_z(popup, ZOp::ToBottom).unwrap();
//! assert_eq!(pile.bottom(), popup);
//! ```

use std::num::NonZeroU32;

use tplane_core::geometry::{Origin, Rect, Size};
use tplane_core::terminal_capabilities::{CellPixels, TerminalCapabilities};

use crate::cell::Rgb;
use crate::codec::GraphicsCodec;
use crate::config::RenderConfig;
use crate::damage::DamageMap;
use crate::error::{EncodeError, GeometryError, Result};
use crate::plane::{Plane, PlaneOptions};
use crate::sprixel::{Bitmap, Sprixel, SprixelId, SprixelState, TamState};

/// Handle to a plane in a [`Pile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlaneId {
    index: u32,
    generation: u32,
}

/// Z-order operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZOp {
    /// Above every other plane.
    ToTop,
    /// Below every other plane.
    ToBottom,
    /// Immediately above the given plane.
    AboveOf(PlaneId),
    /// Immediately below the given plane.
    BelowOf(PlaneId),
}

#[derive(Debug)]
struct Node {
    plane: Plane,
    above: Option<u32>,
    below: Option<u32>,
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// A sprixel waiting for its deletion to be emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct HiddenSprixel {
    pub id: SprixelId,
    /// Whether the terminal ever received it.
    pub drawn: bool,
}

/// The plane stack of one terminal.
#[derive(Debug)]
pub struct Pile {
    slots: Vec<Slot>,
    free: Vec<u32>,
    top: Option<u32>,
    bottom: Option<u32>,
    size: Size,
    damage: DamageMap,
    hidden: Vec<HiddenSprixel>,
    codec: GraphicsCodec,
    cell_pixels: CellPixels,
    pool_bytes: usize,
    next_sprixel: u32,
}

const STANDARD: u32 = 0;

impl Pile {
    /// Pile for a `rows × cols` terminal, with a standard plane at `(0, 0)`.
    pub fn new(
        rows: u16,
        cols: u16,
        caps: &TerminalCapabilities,
        config: &RenderConfig,
    ) -> Result<Self> {
        let size = Size::new(rows, cols);
        let standard = Plane::new(
            PlaneOptions::new(0, 0, rows, cols).name("std"),
            config.initial_pool_bytes,
        )?;
        let codec = GraphicsCodec::from_capabilities(caps, config.animation);
        tplane_core::debug!(rows, cols, codec = codec.name(), "pile created");
        Ok(Self {
            slots: vec![Slot {
                generation: 0,
                node: Some(Node {
                    plane: standard,
                    above: None,
                    below: None,
                }),
            }],
            free: Vec::new(),
            top: Some(STANDARD),
            bottom: Some(STANDARD),
            size,
            damage: DamageMap::new(size),
            hidden: Vec::new(),
            codec,
            cell_pixels: caps.cell_pixels,
            pool_bytes: config.initial_pool_bytes,
            next_sprixel: 1,
        })
    }

    /// The standard plane.
    #[inline]
    pub fn standard(&self) -> PlaneId {
        self.id_of(STANDARD)
    }

    /// Terminal dimensions.
    #[inline]
    pub fn size(&self) -> Size {
        self.size
    }

    /// The bitmap codec chosen from the descriptor.
    #[inline]
    pub fn codec(&self) -> &GraphicsCodec {
        &self.codec
    }

    /// Screen damage awaiting the next render.
    #[inline]
    pub fn damage(&self) -> &DamageMap {
        &self.damage
    }

    /// Pixel geometry of one cell.
    #[inline]
    pub fn cell_pixels(&self) -> CellPixels {
        self.cell_pixels
    }

    /// Number of live planes, the standard plane included.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.node.is_some()).count()
    }

    /// Always false: the standard plane exists for the pile's whole life.
    pub fn is_empty(&self) -> bool {
        false
    }

    // ------------------------------------------------------------------
    // Slot access
    // ------------------------------------------------------------------

    fn id_of(&self, index: u32) -> PlaneId {
        PlaneId {
            index,
            generation: self.slots.get(index as usize).map_or(0, |s| s.generation),
        }
    }

    fn node_at(&self, index: u32) -> Option<&Node> {
        self.slots.get(index as usize)?.node.as_ref()
    }

    fn node_at_mut(&mut self, index: u32) -> Option<&mut Node> {
        self.slots.get_mut(index as usize)?.node.as_mut()
    }

    fn resolve(&self, id: PlaneId) -> Result<u32> {
        match self.slots.get(id.index as usize) {
            Some(slot) if slot.generation == id.generation && slot.node.is_some() => Ok(id.index),
            _ => Err(GeometryError::UnknownPlane(id).into()),
        }
    }

    fn resolve_movable(&self, id: PlaneId) -> Result<u32> {
        let index = self.resolve(id)?;
        if index == STANDARD {
            return Err(GeometryError::StandardPlane.into());
        }
        Ok(index)
    }

    /// Plane by handle.
    pub fn plane(&self, id: PlaneId) -> Result<&Plane> {
        let index = self.resolve(id)?;
        self.node_at(index)
            .map(|n| &n.plane)
            .ok_or_else(|| GeometryError::UnknownPlane(id).into())
    }

    /// Mutable plane by handle, for drawing.
    pub fn plane_mut(&mut self, id: PlaneId) -> Result<&mut Plane> {
        let index = self.resolve(id)?;
        self.node_at_mut(index)
            .map(|n| &mut n.plane)
            .ok_or_else(|| GeometryError::UnknownPlane(id).into())
    }

    // ------------------------------------------------------------------
    // Z-order
    // ------------------------------------------------------------------

    /// Topmost plane.
    pub fn top(&self) -> PlaneId {
        self.id_of(self.top.unwrap_or(STANDARD))
    }

    /// Bottommost plane.
    pub fn bottom(&self) -> PlaneId {
        self.id_of(self.bottom.unwrap_or(STANDARD))
    }

    /// Plane immediately above `id`.
    pub fn above(&self, id: PlaneId) -> Result<Option<PlaneId>> {
        let index = self.resolve(id)?;
        Ok(self
            .node_at(index)
            .and_then(|n| n.above)
            .map(|i| self.id_of(i)))
    }

    /// Plane immediately below `id`.
    pub fn below(&self, id: PlaneId) -> Result<Option<PlaneId>> {
        let index = self.resolve(id)?;
        Ok(self
            .node_at(index)
            .and_then(|n| n.below)
            .map(|i| self.id_of(i)))
    }

    /// Planes from top to bottom.
    pub fn iter_top_down(&self) -> impl Iterator<Item = (PlaneId, &Plane)> + '_ {
        let mut cursor = self.top;
        std::iter::from_fn(move || {
            let index = cursor?;
            let node = self.node_at(index)?;
            cursor = node.below;
            Some((self.id_of(index), &node.plane))
        })
    }

    /// Planes from bottom to top.
    pub fn iter_bottom_up(&self) -> impl Iterator<Item = (PlaneId, &Plane)> + '_ {
        let mut cursor = self.bottom;
        std::iter::from_fn(move || {
            let index = cursor?;
            let node = self.node_at(index)?;
            cursor = node.above;
            Some((self.id_of(index), &node.plane))
        })
    }

    fn unlink(&mut self, index: u32) {
        let Some((above, below)) = self.node_at(index).map(|n| (n.above, n.below)) else {
            return;
        };
        match above.and_then(|a| self.node_at_mut(a)) {
            Some(a) => a.below = below,
            None => self.top = below,
        }
        match below.and_then(|b| self.node_at_mut(b)) {
            Some(b) => b.above = above,
            None => self.bottom = above,
        }
        if let Some(n) = self.node_at_mut(index) {
            n.above = None;
            n.below = None;
        }
    }

    /// Link `index` directly above `anchor`, or at the top.
    fn link_above(&mut self, index: u32, anchor: Option<u32>) {
        let (above, below) = match anchor {
            Some(a) => (self.node_at(a).and_then(|n| n.above), Some(a)),
            None => (None, self.top),
        };
        self.link_between(index, above, below);
    }

    /// Link `index` directly below `anchor`, or at the bottom.
    fn link_below(&mut self, index: u32, anchor: Option<u32>) {
        let (above, below) = match anchor {
            Some(b) => (Some(b), self.node_at(b).and_then(|n| n.below)),
            None => (self.bottom, None),
        };
        self.link_between(index, above, below);
    }

    fn link_between(&mut self, index: u32, above: Option<u32>, below: Option<u32>) {
        if let Some(n) = self.node_at_mut(index) {
            n.above = above;
            n.below = below;
        }
        match above.and_then(|a| self.node_at_mut(a)) {
            Some(a) => a.below = Some(index),
            None => self.top = Some(index),
        }
        match below.and_then(|b| self.node_at_mut(b)) {
            Some(b) => b.above = Some(index),
            None => self.bottom = Some(index),
        }
    }

    /// Splice a plane to a new z position.
    ///
    /// The plane's whole footprint is damaged: whether the move changes what
    /// is visible is only known after compositing.
    pub fn move_z(&mut self, id: PlaneId, op: ZOp) -> Result<()> {
        let index = self.resolve_movable(id)?;
        let anchor = match op {
            ZOp::AboveOf(other) | ZOp::BelowOf(other) => {
                let a = self.resolve(other)?;
                if a == index {
                    return Err(GeometryError::SelfReference.into());
                }
                Some(a)
            }
            ZOp::ToTop | ZOp::ToBottom => None,
        };
        self.unlink(index);
        match op {
            ZOp::ToTop | ZOp::AboveOf(_) => self.link_above(index, anchor),
            ZOp::ToBottom | ZOp::BelowOf(_) => self.link_below(index, anchor),
        }
        self.damage_plane(index, false);
        tplane_core::trace!(index, ?op, "plane z-moved");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Create a plane at the top of the pile.
    pub fn create(&mut self, opts: PlaneOptions) -> Result<PlaneId> {
        let plane = Plane::new(opts, self.pool_bytes)?;
        let node = Node {
            plane,
            above: None,
            below: None,
        };
        let index = match self.free.pop() {
            Some(i) => {
                if let Some(slot) = self.slots.get_mut(i as usize) {
                    slot.node = Some(node);
                }
                i
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    node: Some(node),
                });
                (self.slots.len() - 1) as u32
            }
        };
        self.link_above(index, None);
        Ok(self.id_of(index))
    }

    /// Destroy a plane, revealing what lies beneath and scrubbing its bitmap.
    pub fn destroy(&mut self, id: PlaneId) -> Result<()> {
        let index = self.resolve_movable(id)?;
        self.damage_plane(index, false);
        self.unlink(index);
        let node = self
            .slots
            .get_mut(index as usize)
            .and_then(|slot| {
                slot.generation = slot.generation.wrapping_add(1);
                slot.node.take()
            });
        if let Some(mut node) = node
            && let Some(sprixel) = node.plane.sprixel.take()
        {
            self.scrub(node.plane.origin(), node.plane.size(), sprixel);
        }
        self.free.push(index);
        Ok(())
    }

    /// Move a plane to absolute `(y, x)`; either may be negative.
    ///
    /// A bound bitmap has its cut cells restored first: occlusion is
    /// positional and gets recomputed at the new place.
    pub fn move_to(&mut self, id: PlaneId, y: i32, x: i32) -> Result<()> {
        let index = self.resolve_movable(id)?;
        let codec = &self.codec;
        let Some(node) = self.slots.get_mut(index as usize).and_then(|s| s.node.as_mut()) else {
            return Err(GeometryError::UnknownPlane(id).into());
        };
        let old = node.plane.origin();
        let new = Origin::new(y, x);
        if old == new {
            return Ok(());
        }
        if let Some(sprixel) = node.plane.sprixel.as_mut() {
            sprixel.rebuild_all(codec)?;
            sprixel.mark_moved();
        }
        let size = node.plane.size();
        let bound = node.plane.sprixel.is_some();
        node.plane.set_origin(new);
        node.plane.damage_all();
        let forced = bound && self.forces_bitmap_damage();
        self.damage_rect(old, size, forced);
        tplane_core::trace!(index, y, x, "plane moved");
        Ok(())
    }

    /// Resize a plane, keeping `keep` (plane-relative) at `(yoff, xoff)` of
    /// the new grid.
    pub fn resize(
        &mut self,
        id: PlaneId,
        keep: Rect,
        yoff: u16,
        xoff: u16,
        rows: u16,
        cols: u16,
    ) -> Result<()> {
        let index = self.resolve_movable(id)?;
        let Some(node) = self.node_at_mut(index) else {
            return Err(GeometryError::UnknownPlane(id).into());
        };
        let (origin, size) = (node.plane.origin(), node.plane.size());
        node.plane.resize(keep, yoff, xoff, Size::new(rows, cols))?;
        self.damage_rect(origin, size, false);
        Ok(())
    }

    /// Adopt new terminal dimensions.
    ///
    /// The standard plane keeps the top-left part that still fits and loses
    /// any bitmap; the whole screen is repainted.
    pub fn resize_terminal(&mut self, rows: u16, cols: u16) -> Result<()> {
        let size = Size::new(rows, cols);
        if size.is_empty() {
            return Err(GeometryError::EmptyPlane.into());
        }
        let Some(node) = self.node_at_mut(STANDARD) else {
            return Err(GeometryError::StandardPlane.into());
        };
        let old = node.plane.size();
        let sprixel = node.plane.sprixel.take();
        let keep = Rect::new(0, 0, old.cols.min(cols), old.rows.min(rows));
        if let Err(err) = node.plane.resize(keep, 0, 0, size) {
            node.plane.sprixel = sprixel;
            return Err(err);
        }
        if let Some(sprixel) = sprixel {
            self.scrub(Origin::default(), old, sprixel);
        }
        self.size = size;
        self.damage.resize(size);
        tplane_core::debug!(rows, cols, "terminal resized");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Bitmaps
    // ------------------------------------------------------------------

    /// Bind an RGBA image to a plane.
    ///
    /// The image is anchored at the plane's origin and may not need more
    /// cells than the plane has. Pixels whose color equals `transparent`
    /// become fully transparent. Blitting to a plane that already has a
    /// bitmap replaces the image and keeps its id.
    pub fn blit(
        &mut self,
        id: PlaneId,
        rgba: &[u8],
        width: u32,
        height: u32,
        transparent: Option<Rgb>,
    ) -> Result<SprixelId> {
        #[cfg(feature = "tracing")]
        let _span = tracing::debug_span!("blit", width, height).entered();
        let index = self.resolve(id)?;
        if !self.codec.is_bitmap() {
            return Err(EncodeError::Unsupported.into());
        }
        let bitmap = Bitmap::new(rgba, width, height, transparent)?;
        let cell = self.cell_pixels;
        let forced = self.forces_bitmap_damage();
        let next = self.next_sprixel;
        let codec = &self.codec;
        let Some(node) = self.slots.get_mut(index as usize).and_then(|s| s.node.as_mut()) else {
            return Err(GeometryError::UnknownPlane(id).into());
        };
        let plane = &mut node.plane;
        let (need_rows, need_cols) = bitmap.cell_extent(cell);
        if need_rows > u32::from(plane.rows()) || need_cols > u32::from(plane.cols()) {
            return Err(GeometryError::BitmapTooLarge {
                rows: need_rows.min(u32::from(u16::MAX)) as u16,
                cols: need_cols.min(u32::from(u16::MAX)) as u16,
            }
            .into());
        }
        let origin = plane.origin();
        let size = plane.size();

        if let Some(sprixel) = plane.sprixel.as_mut() {
            let left = sprixel.reblit(codec, bitmap)?;
            let sid = sprixel.id();
            if forced {
                self.damage_rect(origin, size, true);
            } else {
                for (y, x) in left {
                    self.damage_cell(origin, y, x);
                }
            }
            tplane_core::trace!(id = sid.get(), "bitmap replaced");
            return Ok(sid);
        }

        let sid = SprixelId::new(NonZeroU32::new(next).ok_or(EncodeError::Unsupported)?);
        let sprixel = Sprixel::create(codec, sid, bitmap, cell, size.rows, size.cols)?;
        plane.sprixel = Some(sprixel);
        self.next_sprixel = next.wrapping_add(1).max(1);
        self.damage_rect(origin, size, forced);
        tplane_core::debug!(id = sid.get(), width, height, "bitmap bound");
        Ok(sid)
    }

    /// Remove a plane's bitmap, queueing its deletion.
    pub fn unbind(&mut self, id: PlaneId) -> Result<()> {
        let index = self.resolve(id)?;
        let Some(node) = self.node_at_mut(index) else {
            return Err(GeometryError::UnknownPlane(id).into());
        };
        let sprixel = node.plane.sprixel.take().ok_or(GeometryError::NoSprixel)?;
        let (origin, size) = (node.plane.origin(), node.plane.size());
        self.scrub(origin, size, sprixel);
        Ok(())
    }

    /// A glyph now covers cell `(y, x)` of `id`'s bitmap: cut it out.
    ///
    /// Returns whether the occlusion state changed.
    pub fn notify_covered(&mut self, id: PlaneId, y: u16, x: u16) -> Result<bool> {
        let (origin, changed) = self.with_sprixel(id, |sprixel, codec| sprixel.wipe(codec, y, x))?;
        if changed {
            self.damage_cell(origin, y, x);
        }
        Ok(changed)
    }

    /// No glyph covers cell `(y, x)` of `id`'s bitmap anymore: restore it.
    ///
    /// Returns whether the occlusion state changed.
    pub fn notify_uncovered(&mut self, id: PlaneId, y: u16, x: u16) -> Result<bool> {
        let (origin, changed) =
            self.with_sprixel(id, |sprixel, codec| sprixel.rebuild(codec, y, x))?;
        if changed {
            self.damage_cell(origin, y, x);
        }
        Ok(changed)
    }

    fn with_sprixel<T>(
        &mut self,
        id: PlaneId,
        f: impl FnOnce(&mut Sprixel, &GraphicsCodec) -> Result<T>,
    ) -> Result<(Origin, T)> {
        let index = self.resolve(id)?;
        let codec = &self.codec;
        let Some(node) = self.slots.get_mut(index as usize).and_then(|s| s.node.as_mut()) else {
            return Err(GeometryError::UnknownPlane(id).into());
        };
        let origin = node.plane.origin();
        let sprixel = node.plane.sprixel.as_mut().ok_or(GeometryError::NoSprixel)?;
        Ok((origin, f(sprixel, codec)?))
    }

    fn scrub(&mut self, origin: Origin, size: Size, sprixel: Sprixel) {
        #[cfg(feature = "tracing")]
        let _span = tracing::debug_span!("scrub", id = sprixel.id().get()).entered();
        let forced = self.forces_bitmap_damage();
        self.damage_rect(origin, size, forced);
        if let Some(drawn) = sprixel.drawn_at()
            && drawn != origin
        {
            self.damage_rect(drawn, size, forced);
        }
        self.hidden.push(HiddenSprixel {
            id: sprixel.id(),
            drawn: sprixel.drawn_at().is_some(),
        });
    }

    /// Cut or restore every on-screen bitmap cell according to what is now
    /// drawn above it.
    ///
    /// A cell is covered when some text plane above the bitmap's plane has a
    /// glyph there. Planes holding bitmaps never cover: their cells are not
    /// drawn as text.
    pub fn update_occlusion(&mut self) -> Result<()> {
        #[cfg(feature = "tracing")]
        let _span = tracing::debug_span!("occlusion").entered();
        let order: Vec<(PlaneId, &Plane)> = self.iter_top_down().collect();
        let mut actions: Vec<(PlaneId, u16, u16, bool)> = Vec::new();
        for (depth, &(id, plane)) in order.iter().enumerate() {
            let Some(sprixel) = plane.sprixel() else {
                continue;
            };
            let origin = plane.origin();
            for (y, x, entry) in sprixel.tam().iter() {
                let sy = i64::from(origin.y) + i64::from(y);
                let sx = i64::from(origin.x) + i64::from(x);
                if sy < 0
                    || sx < 0
                    || sy >= i64::from(self.size.rows)
                    || sx >= i64::from(self.size.cols)
                {
                    continue;
                }
                let covered = order[..depth]
                    .iter()
                    .any(|(_, above)| covers(above, sy, sx));
                match entry.state() {
                    TamState::Opaque | TamState::Mixed | TamState::Transparent if covered => {
                        actions.push((id, y, x, true));
                    }
                    TamState::Annihilated | TamState::AnnihilatedTransparent if !covered => {
                        actions.push((id, y, x, false));
                    }
                    _ => {}
                }
            }
        }
        for (id, y, x, covered) in actions {
            if covered {
                self.notify_covered(id, y, x)?;
            } else {
                self.notify_uncovered(id, y, x)?;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Damage
    // ------------------------------------------------------------------

    /// Sixel pixels stay on screen until text overwrites them, so the
    /// coordinates a sixel left must be re-emitted even if unchanged.
    fn forces_bitmap_damage(&self) -> bool {
        matches!(self.codec, GraphicsCodec::Sixel(_))
    }

    fn damage_rect(&mut self, origin: Origin, size: Size, forced: bool) {
        if forced {
            self.damage.force(origin, size.rows, size.cols);
        } else {
            self.damage.mark(origin, size.rows, size.cols);
        }
    }

    fn damage_cell(&mut self, origin: Origin, y: u16, x: u16) {
        self.damage.mark(origin.offset(i32::from(y), i32::from(x)), 1, 1);
    }

    fn damage_plane(&mut self, index: u32, forced: bool) {
        if let Some((origin, size)) = self.node_at(index).map(|n| (n.plane.origin(), n.plane.size())) {
            self.damage_rect(origin, size, forced);
        }
    }

    /// Fold every plane's row damage into screen damage.
    pub(crate) fn collect_plane_damage(&mut self) {
        let mut spans = Vec::new();
        for (_, plane) in self.iter_top_down() {
            let origin = plane.origin();
            for y in (0..plane.rows()).filter(|&y| plane.is_row_damaged(y)) {
                spans.push((origin.offset(i32::from(y), 0), plane.cols()));
            }
        }
        for (origin, cols) in spans {
            self.damage.mark(origin, 1, cols);
        }
    }

    /// Force a full repaint on the next render.
    pub fn damage_all(&mut self) {
        self.damage.force_all();
    }

    pub(crate) fn hidden(&self) -> &[HiddenSprixel] {
        &self.hidden
    }

    /// Record a successful render: damage is clear, every on-screen bitmap
    /// is displayed where it now sits, off-screen ones are gone.
    pub(crate) fn commit(&mut self) {
        self.damage.clear();
        self.hidden.clear();
        let size = self.size;
        for slot in &mut self.slots {
            let Some(node) = slot.node.as_mut() else {
                continue;
            };
            node.plane.clear_damage();
            let origin = node.plane.origin();
            if let Some(sprixel) = node.plane.sprixel.as_mut() {
                sprixel.pending.clear();
                if is_drawable(origin, size) {
                    sprixel.state = SprixelState::Quiescent;
                    sprixel.drawn_at = Some(origin);
                } else {
                    sprixel.drawn_at = None;
                }
            }
        }
    }

    /// Bitmaps bottom to top with their planes' origins.
    pub(crate) fn sprixels_bottom_up(&self) -> Vec<(Origin, &Sprixel)> {
        self.iter_bottom_up()
            .filter_map(|(_, p)| p.sprixel().map(|s| (p.origin(), s)))
            .collect()
    }
}

/// A bitmap is only sent when its origin is on screen.
pub(crate) fn is_drawable(origin: Origin, size: Size) -> bool {
    origin.y >= 0
        && origin.x >= 0
        && origin.y < i32::from(size.rows)
        && origin.x < i32::from(size.cols)
}

/// True when a text plane has a glyph at screen `(sy, sx)`.
fn covers(plane: &Plane, sy: i64, sx: i64) -> bool {
    if plane.sprixel().is_some() {
        return false;
    }
    let origin = plane.origin();
    let (y, x) = (sy - i64::from(origin.y), sx - i64::from(origin.x));
    if y < 0 || x < 0 || y >= i64::from(plane.rows()) || x >= i64::from(plane.cols()) {
        return false;
    }
    plane
        .effective(y as u16, x as u16)
        .is_some_and(|c| !c.glyph.is_empty() || c.is_continuation())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pile(rows: u16, cols: u16) -> Pile {
        Pile::new(rows, cols, &TerminalCapabilities::modern(), &RenderConfig::default()).unwrap()
    }

    fn kitty_pile(rows: u16, cols: u16) -> Pile {
        let caps = TerminalCapabilities::builder()
            .graphics(tplane_core::terminal_capabilities::GraphicsProtocol::KITTY)
            .cell_pixels(2, 2)
            .build();
        Pile::new(rows, cols, &caps, &RenderConfig::default()).unwrap()
    }

    fn order(p: &Pile) -> Vec<PlaneId> {
        p.iter_top_down().map(|(id, _)| id).collect()
    }

    #[test]
    fn create_stacks_on_top() {
        let mut p = pile(5, 5);
        let a = p.create(PlaneOptions::new(0, 0, 1, 1)).unwrap();
        let b = p.create(PlaneOptions::new(0, 0, 1, 1)).unwrap();
        assert_eq!(order(&p), vec![b, a, p.standard()]);
        assert_eq!(p.above(a).unwrap(), Some(b));
        assert_eq!(p.below(a).unwrap(), Some(p.standard()));
        let up: Vec<_> = p.iter_bottom_up().map(|(id, _)| id).collect();
        assert_eq!(up, vec![p.standard(), a, b]);
    }

    #[test]
    fn z_splices() {
        let mut p = pile(5, 5);
        let s = p.standard();
        let a = p.create(PlaneOptions::new(0, 0, 1, 1)).unwrap();
        let b = p.create(PlaneOptions::new(0, 0, 1, 1)).unwrap();
        let c = p.create(PlaneOptions::new(0, 0, 1, 1)).unwrap();
        p.move_z(c, ZOp::ToBottom).unwrap();
        assert_eq!(order(&p), vec![b, a, s, c]);
        p.move_z(c, ZOp::AboveOf(a)).unwrap();
        assert_eq!(order(&p), vec![b, c, a, s]);
        p.move_z(b, ZOp::BelowOf(a)).unwrap();
        assert_eq!(order(&p), vec![c, a, b, s]);
        p.move_z(b, ZOp::ToTop).unwrap();
        assert_eq!(order(&p), vec![b, c, a, s]);
        assert_eq!(p.top(), b);
        assert_eq!(p.bottom(), s);
    }

    #[test]
    fn standard_plane_is_pinned() {
        let mut p = pile(3, 3);
        let s = p.standard();
        assert!(matches!(
            p.destroy(s),
            Err(crate::Error::Geometry(GeometryError::StandardPlane))
        ));
        assert!(p.move_to(s, 1, 1).is_err());
        assert!(p.move_z(s, ZOp::ToTop).is_err());
    }

    #[test]
    fn self_reference_rejected() {
        let mut p = pile(3, 3);
        let a = p.create(PlaneOptions::new(0, 0, 1, 1)).unwrap();
        assert!(matches!(
            p.move_z(a, ZOp::AboveOf(a)),
            Err(crate::Error::Geometry(GeometryError::SelfReference))
        ));
    }

    #[test]
    fn stale_handles_rejected_after_slot_reuse() {
        let mut p = pile(3, 3);
        let a = p.create(PlaneOptions::new(0, 0, 1, 1)).unwrap();
        p.destroy(a).unwrap();
        let b = p.create(PlaneOptions::new(0, 0, 1, 1)).unwrap();
        assert_ne!(a, b);
        assert!(matches!(
            p.plane(a),
            Err(crate::Error::Geometry(GeometryError::UnknownPlane(_)))
        ));
        assert!(p.plane(b).is_ok());
        assert_eq!(p.len(), 2);
    }

    #[test]
    fn destroy_damages_footprint() {
        let mut p = pile(4, 4);
        let a = p.create(PlaneOptions::new(1, 1, 2, 2)).unwrap();
        p.commit();
        p.destroy(a).unwrap();
        let hit: Vec<_> = p.damage().iter().collect();
        assert_eq!(hit, vec![(1, 1), (1, 2), (2, 1), (2, 2)]);
    }

    #[test]
    fn resize_terminal_keeps_top_left() {
        let mut p = pile(2, 4);
        let s = p.standard();
        p.plane_mut(s).unwrap().put_str(0, 0, "abcd").unwrap();
        p.resize_terminal(3, 2).unwrap();
        let std = p.plane(s).unwrap();
        assert_eq!(std.size(), Size::new(3, 2));
        assert_eq!(std.cell(0, 1).unwrap().glyph.as_inline(), Some(b'b'));
        assert!(p.damage().is_forced(2, 1));
    }

    #[test]
    fn blit_requires_bitmap_protocol() {
        let mut p = pile(2, 2);
        let s = p.standard();
        let err = p.blit(s, &[0, 0, 0, 255], 1, 1, None).unwrap_err();
        assert!(matches!(err, crate::Error::Encode(EncodeError::Unsupported)));
    }

    #[test]
    fn blit_rejects_oversized_image() {
        let mut p = kitty_pile(4, 4);
        let a = p.create(PlaneOptions::new(0, 0, 1, 1)).unwrap();
        let rgba = vec![255u8; 3 * 2 * 4];
        let err = p.blit(a, &rgba, 3, 2, None).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Geometry(GeometryError::BitmapTooLarge { rows: 1, cols: 2 })
        ));
    }

    #[test]
    fn failed_reblit_keeps_previous_image() {
        let caps = TerminalCapabilities::builder()
            .graphics(tplane_core::terminal_capabilities::GraphicsProtocol::Sixel {
                color_registers: 256,
                max_width: 4,
                max_height: 4,
            })
            .cell_pixels(2, 2)
            .build();
        let mut p = Pile::new(4, 4, &caps, &RenderConfig::default()).unwrap();
        let a = p.create(PlaneOptions::new(0, 0, 3, 3)).unwrap();
        let sid = p.blit(a, &[200u8; 4 * 4 * 4], 4, 4, None).unwrap();
        p.notify_covered(a, 0, 0).unwrap();
        let sprixel = p.plane(a).unwrap().sprixel().unwrap();
        let wire = sprixel.wire().clone();
        let states: Vec<_> = sprixel.tam().iter().map(|(_, _, e)| e.state()).collect();

        let err = p.blit(a, &[9u8; 6 * 2 * 4], 6, 2, None).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Encode(EncodeError::TooLarge { width: 6, height: 2 })
        ));
        let sprixel = p.plane(a).unwrap().sprixel().unwrap();
        assert_eq!(sprixel.id(), sid);
        assert_eq!(sprixel.wire(), &wire);
        let after: Vec<_> = sprixel.tam().iter().map(|(_, _, e)| e.state()).collect();
        assert_eq!(after, states);
        assert_eq!(sprixel.tam().state(0, 0), Some(TamState::Annihilated));
    }

    #[test]
    fn reblit_keeps_id_and_ids_are_monotonic() {
        let mut p = kitty_pile(4, 4);
        let a = p.create(PlaneOptions::new(0, 0, 1, 1)).unwrap();
        let b = p.create(PlaneOptions::new(1, 0, 1, 1)).unwrap();
        let rgba = vec![255u8; 16];
        let first = p.blit(a, &rgba, 2, 2, None).unwrap();
        let again = p.blit(a, &rgba, 2, 2, None).unwrap();
        let other = p.blit(b, &rgba, 2, 2, None).unwrap();
        assert_eq!(first, again);
        assert_eq!(first.get(), 1);
        assert_eq!(other.get(), 2);
    }

    #[test]
    fn covering_text_wipes_and_removal_rebuilds() {
        let mut p = kitty_pile(4, 4);
        let img = p.create(PlaneOptions::new(0, 0, 2, 2)).unwrap();
        p.blit(img, &vec![255u8; 4 * 4 * 4], 4, 4, None).unwrap();
        let text = p.create(PlaneOptions::new(1, 1, 1, 1)).unwrap();
        p.plane_mut(text).unwrap().put_str(0, 0, "x").unwrap();
        p.update_occlusion().unwrap();
        let tam = p.plane(img).unwrap().sprixel().unwrap().tam();
        assert_eq!(tam.state(1, 1), Some(TamState::Annihilated));
        assert_eq!(tam.state(0, 0), Some(TamState::Opaque));

        p.destroy(text).unwrap();
        p.update_occlusion().unwrap();
        let tam = p.plane(img).unwrap().sprixel().unwrap().tam();
        assert_eq!(tam.state(1, 1), Some(TamState::Opaque));
    }

    #[test]
    fn destroying_bitmap_plane_queues_deletion() {
        let mut p = kitty_pile(4, 4);
        let img = p.create(PlaneOptions::new(0, 0, 1, 1)).unwrap();
        let sid = p.blit(img, &[1, 2, 3, 255], 1, 1, None).unwrap();
        p.destroy(img).unwrap();
        assert_eq!(
            p.hidden(),
            &[HiddenSprixel {
                id: sid,
                drawn: false
            }]
        );
    }

    #[test]
    fn sprixel_planes_cannot_be_resized() {
        let mut p = kitty_pile(4, 4);
        let img = p.create(PlaneOptions::new(0, 0, 2, 2)).unwrap();
        p.blit(img, &[1, 2, 3, 255], 1, 1, None).unwrap();
        let err = p.resize(img, Rect::new(0, 0, 1, 1), 0, 0, 3, 3).unwrap_err();
        assert!(matches!(err, crate::Error::Geometry(GeometryError::SprixelBound)));
    }
}
