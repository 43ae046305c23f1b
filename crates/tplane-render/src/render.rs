#![forbid(unsafe_code)]

//! Compositing renderer.
//!
//! One pass per call to [`Renderer::render`]:
//!
//! 1. **Occlusion**: bitmap cells under new text are cut out, cells no
//!    longer under text are restored.
//! 2. **Composite**: every damaged screen coordinate walks the pile top
//!    down and resolves to a glyph, styles, and two colors, or to a bitmap.
//! 3. **Diff**: resolved coordinates equal to the last frame are elided
//!    unless forced.
//! 4. **Emit**: bitmap deletions, then text runs, then bitmap
//!    transmissions, placements, and delta frames, all into one buffer.
//! 5. **Write and commit**: the buffer goes to the sink in a single write.
//!    Only after it succeeds is damage cleared and the frame adopted, so a
//!    failed pass can simply be retried.
//!
//! # Compositing
//!
//! Foreground and background resolve independently. Walking down:
//!
//! | Alpha | Effect |
//! |-------|--------|
//! | Opaque | Takes the remaining weight; walk stops |
//! | Blend | Takes half the remaining weight |
//! | Transparent | Skipped |
//! | HighContrast | Foreground becomes black or white against the resolved background |
//!
//! The terminal default color has no known RGB, so default-colored layers
//! add no weight. Explicit colors are averaged over the weight they
//! accumulated: a `Blend` layer over a default background resolves to the
//! blend color itself, and a channel with no explicit color anywhere
//! resolves to the terminal default.

use std::io::Write;
use std::time::Instant;

use smallvec::SmallVec;
use tplane_core::geometry::Size;
use tplane_core::style::StyleFlags;
use tplane_core::terminal_capabilities::{ColorDepth, TerminalCapabilities};

use crate::ansi;
use crate::cell::{AlphaLevel, Rgb};
use crate::codec::GraphicsCodec;
use crate::config::RenderConfig;
use crate::counting_writer::{CountingWriter, RenderStats};
use crate::error::Result;
use crate::pile::{Pile, is_drawable};
use crate::plane::Plane;
use crate::sprixel::{SprixelId, SprixelState, TamState};

/// What the terminal shows at one coordinate.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Shown {
    /// Never emitted, or emitted before a reset.
    Unknown,
    /// Covered by an opaque bitmap cell.
    Bitmap(SprixelId),
    /// Right half of a wide glyph.
    Continuation,
    /// A text cell.
    Text(Resolved),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Resolved {
    glyph: SmallVec<[u8; 8]>,
    width: u8,
    styles: StyleFlags,
    fg: Option<Rgb>,
    bg: Option<Rgb>,
}

impl Resolved {
    fn blank() -> Self {
        Self {
            glyph: SmallVec::new(),
            width: 1,
            styles: StyleFlags::empty(),
            fg: None,
            bg: None,
        }
    }
}

/// Weighted color accumulator for one channel.
#[derive(Debug, Clone, Copy)]
struct Mix {
    sum: [f32; 3],
    weight: f32,
    remaining: f32,
    done: bool,
    high_contrast: bool,
}

impl Mix {
    const fn new() -> Self {
        Self {
            sum: [0.0; 3],
            weight: 0.0,
            remaining: 1.0,
            done: false,
            high_contrast: false,
        }
    }

    fn add(&mut self, c: Rgb, w: f32) {
        self.sum[0] += f32::from(c.r) * w;
        self.sum[1] += f32::from(c.g) * w;
        self.sum[2] += f32::from(c.b) * w;
        self.weight += w;
    }

    fn layer(&mut self, alpha: AlphaLevel, color: Option<Rgb>) {
        if self.done {
            return;
        }
        match alpha {
            AlphaLevel::Transparent => {}
            AlphaLevel::Blend => {
                if let Some(c) = color {
                    let w = self.remaining / 2.0;
                    self.add(c, w);
                    self.remaining -= w;
                }
            }
            AlphaLevel::Opaque => {
                if let Some(c) = color {
                    self.add(c, self.remaining);
                    self.remaining = 0.0;
                }
                self.done = true;
            }
            AlphaLevel::HighContrast => {
                self.high_contrast = true;
                self.done = true;
            }
        }
    }

    fn resolve(&self) -> Option<Rgb> {
        if self.weight <= 0.0 {
            return None;
        }
        let c = self.sum.map(|s| (s / self.weight).round().clamp(0.0, 255.0) as u8);
        Some(Rgb::new(c[0], c[1], c[2]))
    }
}

/// Resolve screen `(sy, sx)` against planes ordered top down.
///
/// Bitmaps whose origin lies off a `screen`-sized terminal are never
/// transmitted, so they count as absent.
fn composite(planes: &[&Plane], screen: Size, sy: u16, sx: u16, depth: ColorDepth) -> Shown {
    let mut glyph: Option<(&Plane, crate::cell::Cell)> = None;
    let mut fg = Mix::new();
    let mut bg = Mix::new();
    for &plane in planes {
        let origin = plane.origin();
        let y = i64::from(sy) - i64::from(origin.y);
        let x = i64::from(sx) - i64::from(origin.x);
        if y < 0 || x < 0 || y >= i64::from(plane.rows()) || x >= i64::from(plane.cols()) {
            continue;
        }
        let (y, x) = (y as u16, x as u16);
        if let Some(sprixel) = plane.sprixel() {
            if glyph.is_none()
                && is_drawable(origin, screen)
                && sprixel.tam().state(y, x) == Some(TamState::Opaque)
            {
                return Shown::Bitmap(sprixel.id());
            }
            continue;
        }
        let Some(cell) = plane.effective(y, x) else {
            continue;
        };
        if glyph.is_none() && (!cell.glyph.is_empty() || cell.is_continuation()) {
            glyph = Some((plane, *cell));
        }
        fg.layer(cell.channels.fg_alpha(), cell.channels.fg());
        bg.layer(cell.channels.bg_alpha(), cell.channels.bg());
        if glyph.is_some() && fg.done && bg.done {
            break;
        }
    }

    let mut resolved = Resolved::blank();
    if let Some((plane, cell)) = glyph {
        if cell.is_continuation() {
            return Shown::Continuation;
        }
        resolved.glyph = SmallVec::from_slice(plane.glyph_str(&cell).as_bytes());
        resolved.width = cell.width.max(1);
        resolved.styles = cell.styles;
    }
    if depth != ColorDepth::Mono {
        resolved.bg = bg.resolve();
        resolved.fg = if fg.high_contrast {
            let dark_bg = resolved.bg.is_none_or(|c| c.luma() < 128);
            Some(if dark_bg { Rgb::WHITE } else { Rgb::BLACK })
        } else {
            fg.resolve()
        };
    }
    Shown::Text(resolved)
}

/// Style state of the terminal during emission.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Pen {
    styles: StyleFlags,
    fg: Option<Rgb>,
    bg: Option<Rgb>,
}

/// Text emission with cursor and pen tracking.
struct TextEmitter<'a> {
    out: &'a mut Vec<u8>,
    cursor: Option<(u16, u16)>,
    pen: Option<Pen>,
    depth: ColorDepth,
    supported: StyleFlags,
    runs: usize,
    cells: usize,
}

impl TextEmitter<'_> {
    fn move_cursor_to(&mut self, y: u16, x: u16) -> std::io::Result<()> {
        if self.cursor == Some((y, x)) {
            return Ok(());
        }
        ansi::cup(self.out, y, x)?;
        self.cursor = Some((y, x));
        self.runs += 1;
        Ok(())
    }

    fn emit_style_changes(&mut self, r: &Resolved) -> std::io::Result<()> {
        let pen = Pen {
            styles: r.styles & self.supported,
            fg: r.fg,
            bg: r.bg,
        };
        if self.pen.as_ref() == Some(&pen) {
            return Ok(());
        }
        // Reset then apply: no per-attribute off codes to track.
        ansi::sgr_reset(self.out)?;
        if pen.fg.is_some() {
            ansi::sgr_fg(self.out, pen.fg, self.depth)?;
        }
        if pen.bg.is_some() {
            ansi::sgr_bg(self.out, pen.bg, self.depth)?;
        }
        if !pen.styles.is_empty() {
            ansi::sgr_flags(self.out, pen.styles)?;
        }
        self.pen = Some(pen);
        Ok(())
    }

    /// Emit one resolved cell. `wide_ok` tells whether its continuation is
    /// in place; a wide glyph without one is drawn as a blank.
    fn emit(&mut self, y: u16, x: u16, r: &Resolved, wide_ok: bool) -> std::io::Result<()> {
        self.move_cursor_to(y, x)?;
        self.emit_style_changes(r)?;
        let advance = if r.width == 2 && !wide_ok {
            self.out.push(b' ');
            1
        } else if r.glyph.is_empty() {
            self.out.push(b' ');
            1
        } else {
            self.out.extend_from_slice(&r.glyph);
            u16::from(r.width)
        };
        self.cursor = Some((y, x.saturating_add(advance)));
        self.cells += 1;
        Ok(())
    }
}

/// Turns a [`Pile`] into terminal output, one pass at a time.
#[derive(Debug)]
pub struct Renderer {
    caps: TerminalCapabilities,
    config: RenderConfig,
    size: Size,
    frame: Vec<Shown>,
    force_next: bool,
    stats: RenderStats,
}

impl Renderer {
    /// Renderer for a terminal described by `caps`.
    pub fn new(caps: TerminalCapabilities, config: RenderConfig) -> Self {
        Self {
            caps,
            config,
            size: Size::default(),
            frame: Vec::new(),
            force_next: true,
            stats: RenderStats::default(),
        }
    }

    /// Capability descriptor in use.
    pub fn capabilities(&self) -> &TerminalCapabilities {
        &self.caps
    }

    /// Configuration in use.
    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Statistics of the last successful pass.
    pub fn last_stats(&self) -> &RenderStats {
        &self.stats
    }

    /// Forget what the terminal shows: the next pass repaints every
    /// coordinate and retransmits every bitmap.
    pub fn invalidate(&mut self) {
        self.force_next = true;
    }

    fn sync_enabled(&self) -> bool {
        self.config
            .sync_output
            .unwrap_or_else(|| self.caps.use_sync_output())
    }

    /// Render `pile` into `out`, returning the bytes written.
    ///
    /// On error nothing is committed: damage, the remembered frame, and
    /// bitmap states are as before the call.
    pub fn render<W: Write>(&mut self, pile: &mut Pile, out: &mut W) -> Result<usize> {
        #[cfg(feature = "tracing")]
        let _span = tracing::info_span!("render", rows = pile.size().rows, cols = pile.size().cols);
        #[cfg(feature = "tracing")]
        let _guard = _span.enter();
        let start = Instant::now();

        let size = pile.size();
        let mut force_all = self.force_next;
        let mut frame = if size == self.size && !force_all {
            self.frame.clone()
        } else {
            force_all = true;
            vec![Shown::Unknown; size.area()]
        };

        pile.update_occlusion()?;
        pile.collect_plane_damage();

        let mut stats = RenderStats::default();
        let planes: Vec<&Plane> = pile.iter_top_down().map(|(_, p)| p).collect();
        let cols = size.cols as usize;

        // Composite and diff.
        let mut changed = vec![false; size.area()];
        {
            #[cfg(feature = "tracing")]
            let _span = tracing::debug_span!("composite");
            #[cfg(feature = "tracing")]
            let _guard = _span.enter();
            let damage = pile.damage();
            for y in 0..size.rows {
                for x in 0..size.cols {
                    if !force_all && !damage.is_damaged(y, x) {
                        continue;
                    }
                    stats.cells_composited += 1;
                    let i = y as usize * cols + x as usize;
                    let shown = composite(&planes, size, y, x, self.caps.color_depth);
                    if force_all || damage.is_forced(y, x) || frame[i] != shown {
                        changed[i] = true;
                    }
                    frame[i] = shown;
                }
            }
        }

        let mut buf = Vec::new();
        let codec = pile.codec();

        // Deletions first so nothing stale lingers under new output.
        for hidden in pile.hidden() {
            if hidden.drawn && codec.supports_placement() {
                codec.write_delete(hidden.id, &mut buf)?;
                stats.sprixels_hidden += 1;
            }
        }
        let sprixels = pile.sprixels_bottom_up();
        for (origin, sprixel) in &sprixels {
            if sprixel.drawn_at().is_some()
                && !is_drawable(*origin, size)
                && codec.supports_placement()
            {
                codec.write_delete(sprixel.id(), &mut buf)?;
                stats.sprixels_hidden += 1;
            }
        }

        // Text.
        {
            #[cfg(feature = "tracing")]
            let _span = tracing::debug_span!("emit");
            #[cfg(feature = "tracing")]
            let _guard = _span.enter();
            let mut text = TextEmitter {
                out: &mut buf,
                cursor: None,
                pen: None,
                depth: self.caps.color_depth,
                supported: self.caps.supported_styles,
                runs: 0,
                cells: 0,
            };
            for (i, shown) in frame.iter().enumerate() {
                if !changed[i] {
                    continue;
                }
                let (y, x) = ((i / cols) as u16, (i % cols) as u16);
                match shown {
                    Shown::Text(r) => {
                        let wide_ok = frame.get(i + 1).is_some_and(|n| *n == Shown::Continuation)
                            && (i + 1) % cols != 0;
                        text.emit(y, x, r, wide_ok)?;
                    }
                    Shown::Continuation => {
                        let orphan = x == 0
                            || !matches!(&frame[i - 1], Shown::Text(r) if r.width == 2);
                        if orphan {
                            text.emit(y, x, &Resolved::blank(), false)?;
                        }
                    }
                    Shown::Bitmap(_) | Shown::Unknown => {}
                }
            }
            if text.cells > 0 {
                ansi::sgr_reset(text.out)?;
            }
            stats.cells_changed = text.cells;
            stats.run_count = text.runs;
        }

        // Bitmaps, bottom to top.
        for (origin, sprixel) in &sprixels {
            if !is_drawable(*origin, size) {
                continue;
            }
            let (oy, ox) = (origin.y as u16, origin.x as u16);
            let text_over = matches!(codec, GraphicsCodec::Sixel(_))
                && sprixel.tam().iter().any(|(y, x, _)| {
                    let (sy, sx) = (usize::from(oy) + usize::from(y), usize::from(ox) + usize::from(x));
                    sy < size.rows as usize && sx < cols && changed[sy * cols + sx]
                });
            let full = force_all
                || text_over
                || sprixel.drawn_at().is_none()
                || sprixel.state() == SprixelState::Invalidated
                || (sprixel.state() == SprixelState::Moved && !codec.supports_placement());
            if full {
                ansi::cup(&mut buf, oy, ox)?;
                buf.extend_from_slice(sprixel.wire().as_bytes());
                stats.sprixels_drawn += 1;
                continue;
            }
            for delta in sprixel.pending_deltas() {
                buf.extend_from_slice(delta);
                stats.sprixel_deltas += 1;
            }
            if sprixel.state() == SprixelState::Moved {
                ansi::cup(&mut buf, oy, ox)?;
                codec.write_move(sprixel.id(), &mut buf)?;
                stats.sprixels_moved += 1;
            }
        }
        drop(sprixels);
        drop(planes);

        let mut frame_bytes = Vec::with_capacity(buf.len() + 16);
        let sync = !buf.is_empty() && self.sync_enabled();
        if sync {
            frame_bytes.extend_from_slice(ansi::SYNC_BEGIN);
        }
        frame_bytes.extend_from_slice(&buf);
        if sync {
            frame_bytes.extend_from_slice(ansi::SYNC_END);
        }

        let mut writer = CountingWriter::new(&mut *out);
        if !frame_bytes.is_empty() {
            writer.write_all(&frame_bytes)?;
            writer.flush()?;
        }
        let written = writer.bytes_written();

        pile.commit();
        self.frame = frame;
        self.size = size;
        self.force_next = false;
        stats.bytes_emitted = written;
        stats.duration = start.elapsed();
        tplane_core::debug!(
            bytes = written,
            cells = stats.cells_changed,
            runs = stats.run_count,
            sprixels = stats.sprixels_drawn,
            "render pass committed"
        );
        self.stats = stats;
        Ok(written as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::Channels;
    use crate::plane::PlaneOptions;

    fn caps() -> TerminalCapabilities {
        TerminalCapabilities::builder()
            .color_depth(ColorDepth::TrueColor)
            .supported_styles(StyleFlags::all())
            .build()
    }

    fn setup(rows: u16, cols: u16) -> (Pile, Renderer) {
        let caps = caps();
        let pile = Pile::new(rows, cols, &caps, &RenderConfig::default()).unwrap();
        (pile, Renderer::new(caps, RenderConfig::default()))
    }

    fn render(r: &mut Renderer, p: &mut Pile) -> String {
        let mut out = Vec::new();
        r.render(p, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn first_pass_paints_everything_then_nothing() {
        let (mut pile, mut r) = setup(2, 3);
        let s = pile.standard();
        pile.plane_mut(s).unwrap().put_str(0, 0, "ab").unwrap();
        let first = render(&mut r, &mut pile);
        assert!(first.starts_with("\x1b[1;1H\x1b[0mab "));
        assert_eq!(r.last_stats().cells_changed, 6);
        assert_eq!(render(&mut r, &mut pile), "");
        assert!(r.last_stats().is_empty());
    }

    #[test]
    fn only_changed_cells_are_emitted() {
        let (mut pile, mut r) = setup(2, 3);
        let s = pile.standard();
        render(&mut r, &mut pile);
        pile.plane_mut(s).unwrap().put_str(1, 1, "z").unwrap();
        let out = render(&mut r, &mut pile);
        assert_eq!(out, "\x1b[2;2H\x1b[0mz\x1b[0m");
        assert_eq!(r.last_stats().run_count, 1);
    }

    #[test]
    fn upper_glyph_wins_and_blends_background() {
        let (mut pile, mut r) = setup(1, 1);
        let s = pile.standard();
        let base = Channels::DEFAULT.set_bg_rgb(Rgb::new(0, 0, 200));
        pile.plane_mut(s).unwrap().set_base("", StyleFlags::empty(), base).unwrap();
        let top = pile.create(PlaneOptions::new(0, 0, 1, 1)).unwrap();
        let pen = Channels::DEFAULT
            .set_fg_rgb(Rgb::new(255, 0, 0))
            .set_bg_rgb(Rgb::new(200, 0, 0))
            .set_bg_alpha(AlphaLevel::Blend);
        let plane = pile.plane_mut(top).unwrap();
        plane.set_channels(pen);
        plane.put_str(0, 0, "x").unwrap();
        let out = render(&mut r, &mut pile);
        assert!(out.contains("\x1b[38;2;255;0;0m"), "{out:?}");
        assert!(out.contains("\x1b[48;2;100;0;100m"), "{out:?}");
        assert!(out.contains('x'));
    }

    #[test]
    fn blend_over_default_background_keeps_blend_color() {
        let (mut pile, mut r) = setup(1, 1);
        let top = pile.create(PlaneOptions::new(0, 0, 1, 1)).unwrap();
        let pen = Channels::DEFAULT
            .set_bg_rgb(Rgb::new(200, 0, 0))
            .set_bg_alpha(AlphaLevel::Blend);
        let plane = pile.plane_mut(top).unwrap();
        plane.set_channels(pen);
        plane.put_str(0, 0, "x").unwrap();
        let out = render(&mut r, &mut pile);
        assert!(out.contains("\x1b[48;2;200;0;0m"), "{out:?}");
    }

    #[test]
    fn transparent_plane_shows_what_is_below() {
        let (mut pile, mut r) = setup(1, 2);
        let s = pile.standard();
        pile.plane_mut(s).unwrap().put_str(0, 0, "lo").unwrap();
        let top = pile.create(PlaneOptions::new(0, 0, 1, 2)).unwrap();
        let clear = Channels::DEFAULT
            .set_fg_alpha(AlphaLevel::Transparent)
            .set_bg_alpha(AlphaLevel::Transparent);
        pile.plane_mut(top)
            .unwrap()
            .set_base("", StyleFlags::empty(), clear)
            .unwrap();
        let out = render(&mut r, &mut pile);
        assert!(out.contains("lo"), "{out:?}");
    }

    #[test]
    fn high_contrast_foreground_follows_background() {
        let (mut pile, mut r) = setup(1, 1);
        let s = pile.standard();
        let plane = pile.plane_mut(s).unwrap();
        plane.set_channels(
            Channels::DEFAULT
                .set_fg_rgb(Rgb::new(128, 128, 128))
                .set_fg_alpha(AlphaLevel::HighContrast)
                .set_bg_rgb(Rgb::new(250, 250, 250)),
        );
        plane.put_str(0, 0, "k").unwrap();
        let out = render(&mut r, &mut pile);
        assert!(out.contains("\x1b[38;2;0;0;0m"), "{out:?}");
    }

    #[test]
    fn mono_terminal_emits_no_color() {
        let caps = TerminalCapabilities::dumb();
        let mut pile = Pile::new(1, 1, &caps, &RenderConfig::default()).unwrap();
        let mut r = Renderer::new(caps, RenderConfig::default());
        let s = pile.standard();
        let plane = pile.plane_mut(s).unwrap();
        plane.set_channels(Channels::rgb(Rgb::WHITE, Rgb::BLACK));
        plane.put_str(0, 0, "m").unwrap();
        let out = render(&mut r, &mut pile);
        assert!(!out.contains("38;"));
        assert!(!out.contains("48;"));
    }

    #[test]
    fn unsupported_styles_are_dropped() {
        let caps = TerminalCapabilities::builder()
            .color_depth(ColorDepth::TrueColor)
            .supported_styles(StyleFlags::BOLD)
            .build();
        let mut pile = Pile::new(1, 1, &caps, &RenderConfig::default()).unwrap();
        let mut r = Renderer::new(caps, RenderConfig::default());
        let s = pile.standard();
        let plane = pile.plane_mut(s).unwrap();
        plane.set_styles(StyleFlags::BOLD | StyleFlags::ITALIC);
        plane.put_str(0, 0, "b").unwrap();
        let out = render(&mut r, &mut pile);
        assert!(out.contains("\x1b[1m"), "{out:?}");
        assert!(!out.contains(";3m") && !out.contains("[3m"), "{out:?}");
    }

    #[test]
    fn sync_wraps_non_empty_frames_only() {
        let caps = caps();
        let mut pile = Pile::new(1, 1, &caps, &RenderConfig::default()).unwrap();
        let mut r = Renderer::new(caps, RenderConfig::default().sync_output(true));
        let out = render(&mut r, &mut pile);
        assert!(out.starts_with("\x1b[?2026h"));
        assert!(out.ends_with("\x1b[?2026l"));
        assert_eq!(render(&mut r, &mut pile), "");
    }

    #[test]
    fn invalidate_repaints() {
        let (mut pile, mut r) = setup(1, 2);
        render(&mut r, &mut pile);
        r.invalidate();
        let out = render(&mut r, &mut pile);
        assert_eq!(r.last_stats().cells_changed, 2);
        assert!(out.starts_with("\x1b[1;1H"));
    }

    #[test]
    fn wide_glyph_occupies_two_columns() {
        let (mut pile, mut r) = setup(1, 3);
        let s = pile.standard();
        pile.plane_mut(s).unwrap().put_str(0, 0, "世a").unwrap();
        let out = render(&mut r, &mut pile);
        assert!(out.contains("世a"), "{out:?}");
        assert_eq!(r.last_stats().cells_changed, 2);
    }
}
