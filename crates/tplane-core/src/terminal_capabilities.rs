#![forbid(unsafe_code)]

//! What the output terminal can display.
//!
//! Rendering never queries the terminal itself. A [`TerminalCapabilities`]
//! value is handed in once and decides color degradation, which text
//! attributes survive, whether frames are wrapped in synchronized output,
//! and which bitmap codec is used.
//!
//! Descriptors come from a named profile ([`TerminalCapabilities::kitty`],
//! [`TerminalCapabilities::foot`], ...), from [`CapabilityProfileBuilder`],
//! or from [`TerminalCapabilities::detect`]. Detection reads the usual
//! terminal variables and then lets these overrides replace what it found:
//!
//! - `TPLANE_GRAPHICS=kitty|sixel|none`
//! - `TPLANE_CELL_PIXELS=<w>x<h>`
//! - `TPLANE_KITTY_CHUNK=<bytes>`
//! - `TPLANE_SIXEL_REGISTERS=<n>`
//!
//! Inside tmux or screen, detection turns bitmap graphics off and
//! [`use_sync_output`](TerminalCapabilities::use_sync_output) reports
//! `false`. Cell pixel geometry is never zero.

use std::env;

use crate::style::StyleFlags;

/// Default maximum base64 payload per kitty control sequence.
pub const KITTY_DEFAULT_CHUNK: u32 = 4096;

/// Default number of sixel color registers.
pub const SIXEL_DEFAULT_REGISTERS: u16 = 256;

/// How many colors escape sequences may address, shallowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ColorDepth {
    Mono,
    Ansi16,
    Palette256,
    TrueColor,
}

impl ColorDepth {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mono => "mono",
            Self::Ansi16 => "16",
            Self::Palette256 => "256",
            Self::TrueColor => "truecolor",
        }
    }
}

/// Bitmap protocol spoken by the terminal, with its limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GraphicsProtocol {
    None,
    Kitty {
        /// Largest base64 payload in one control sequence.
        chunk_size: u32,
        /// Frame composition (`a=f`) is understood.
        animation: bool,
    },
    Sixel {
        color_registers: u16,
        max_width: u32,
        max_height: u32,
    },
}

impl GraphicsProtocol {
    pub const KITTY: Self = Self::Kitty {
        chunk_size: KITTY_DEFAULT_CHUNK,
        animation: true,
    };

    /// Kitty without frame composition, as WezTerm implements it.
    pub const KITTY_STATIC: Self = Self::Kitty {
        chunk_size: KITTY_DEFAULT_CHUNK,
        animation: false,
    };

    pub const SIXEL: Self = Self::Sixel {
        color_registers: SIXEL_DEFAULT_REGISTERS,
        max_width: 4096,
        max_height: 4096,
    };

    #[must_use]
    pub const fn is_bitmap(&self) -> bool {
        !matches!(self, Self::None)
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Kitty { .. } => "kitty",
            Self::Sixel { .. } => "sixel",
        }
    }

    fn parse(text: &str) -> Option<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "kitty" => Some(Self::KITTY),
            "sixel" => Some(Self::SIXEL),
            "none" | "off" => Some(Self::None),
            _ => None,
        }
    }
}

/// Size of one cell in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellPixels {
    pub width: u16,
    pub height: u16,
}

impl CellPixels {
    /// Used whenever the terminal does not tell us.
    pub const FALLBACK: Self = Self {
        width: 10,
        height: 20,
    };

    /// A zero on either side yields [`FALLBACK`](Self::FALLBACK).
    #[must_use]
    pub const fn new(width: u16, height: u16) -> Self {
        if width == 0 || height == 0 {
            Self::FALLBACK
        } else {
            Self { width, height }
        }
    }

    /// Parses `<w>x<h>`; anything else, zeros included, is `None`.
    fn parse(text: &str) -> Option<Self> {
        let (w, h) = text.trim().split_once(['x', 'X'])?;
        match (w.parse::<u16>().ok()?, h.parse::<u16>().ok()?) {
            (0, _) | (_, 0) => None,
            (width, height) => Some(Self { width, height }),
        }
    }
}

impl Default for CellPixels {
    fn default() -> Self {
        Self::FALLBACK
    }
}

/// Read-only descriptor consumed by the pile and the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminalCapabilities {
    name: &'static str,
    pub color_depth: ColorDepth,
    /// Attributes outside this mask are dropped on output.
    pub supported_styles: StyleFlags,
    /// DEC mode 2026.
    pub sync_output: bool,
    pub in_tmux: bool,
    pub in_screen: bool,
    pub graphics: GraphicsProtocol,
    pub cell_pixels: CellPixels,
}

impl Default for TerminalCapabilities {
    fn default() -> Self {
        Self::dumb()
    }
}

/// Profiles reachable through [`TerminalCapabilities::by_name`].
const PROFILES: &[(&str, fn() -> TerminalCapabilities)] = &[
    ("dumb", TerminalCapabilities::dumb),
    ("xterm", TerminalCapabilities::xterm),
    ("xterm-256color", TerminalCapabilities::xterm_256color),
    ("modern", TerminalCapabilities::modern),
    ("tmux", TerminalCapabilities::tmux),
    ("kitty", TerminalCapabilities::kitty),
    ("wezterm", TerminalCapabilities::wezterm),
    ("foot", TerminalCapabilities::foot),
];

impl TerminalCapabilities {
    /// Profile name, `"detected"` or `"custom"` for the other sources.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Look up a predefined profile, ignoring ASCII case.
    #[must_use]
    pub fn by_name(name: &str) -> Option<Self> {
        PROFILES
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name.trim()))
            .map(|(_, make)| make())
    }

    #[must_use]
    pub fn builder() -> CapabilityProfileBuilder {
        CapabilityProfileBuilder::new()
    }

    /// No color, no attributes, no graphics.
    #[must_use]
    pub const fn dumb() -> Self {
        Self {
            name: "dumb",
            color_depth: ColorDepth::Mono,
            supported_styles: StyleFlags::empty(),
            sync_output: false,
            in_tmux: false,
            in_screen: false,
            graphics: GraphicsProtocol::None,
            cell_pixels: CellPixels::FALLBACK,
        }
    }

    #[must_use]
    pub const fn xterm() -> Self {
        Self {
            name: "xterm",
            color_depth: ColorDepth::Ansi16,
            supported_styles: StyleFlags::BASIC,
            ..Self::dumb()
        }
    }

    #[must_use]
    pub const fn xterm_256color() -> Self {
        Self {
            name: "xterm-256color",
            color_depth: ColorDepth::Palette256,
            supported_styles: StyleFlags::BASIC.union(StyleFlags::ITALIC),
            ..Self::dumb()
        }
    }

    /// Truecolor, every attribute, synchronized output, no bitmaps.
    #[must_use]
    pub const fn modern() -> Self {
        Self {
            name: "modern",
            color_depth: ColorDepth::TrueColor,
            supported_styles: StyleFlags::all(),
            sync_output: true,
            ..Self::dumb()
        }
    }

    #[must_use]
    pub const fn tmux() -> Self {
        Self {
            name: "tmux",
            sync_output: false,
            in_tmux: true,
            ..Self::modern()
        }
    }

    #[must_use]
    pub const fn kitty() -> Self {
        Self {
            name: "kitty",
            graphics: GraphicsProtocol::KITTY,
            ..Self::modern()
        }
    }

    #[must_use]
    pub const fn wezterm() -> Self {
        Self {
            name: "wezterm",
            graphics: GraphicsProtocol::KITTY_STATIC,
            ..Self::modern()
        }
    }

    #[must_use]
    pub const fn foot() -> Self {
        Self {
            name: "foot",
            graphics: GraphicsProtocol::SIXEL,
            ..Self::modern()
        }
    }

    #[must_use]
    #[inline]
    pub const fn in_any_mux(&self) -> bool {
        self.in_tmux || self.in_screen
    }

    /// Synchronized output is advertised and no multiplexer sits between us.
    #[must_use]
    #[inline]
    pub const fn use_sync_output(&self) -> bool {
        self.sync_output && !self.in_any_mux()
    }

    #[must_use]
    #[inline]
    pub const fn has_color(&self) -> bool {
        !matches!(self.color_depth, ColorDepth::Mono)
    }

    /// Build a descriptor from the process environment.
    ///
    /// Unrecognized terminals get the conservative answer for every field.
    #[must_use]
    pub fn detect() -> Self {
        Self::from_probe(&Probe::from_env())
    }

    fn from_probe(probe: &Probe) -> Self {
        let kind = probe.kind();
        let mut caps = Self {
            name: "detected",
            color_depth: probe.color_depth(kind),
            supported_styles: match kind {
                Kind::Dumb => StyleFlags::empty(),
                Kind::Legacy => StyleFlags::BASIC.union(StyleFlags::ITALIC),
                _ => StyleFlags::all(),
            },
            sync_output: match kind {
                Kind::Dumb => false,
                Kind::Kitty => true,
                _ => SYNC_PROGRAMS.iter().any(|p| probe.term_program.contains(p)),
            },
            in_tmux: probe.in_tmux,
            in_screen: probe.in_screen,
            graphics: GraphicsProtocol::None,
            cell_pixels: probe.cell_pixels.unwrap_or_default(),
        };
        if !caps.in_any_mux() {
            caps.graphics = match kind {
                Kind::Kitty => GraphicsProtocol::KITTY,
                Kind::WezTerm => GraphicsProtocol::KITTY_STATIC,
                Kind::Sixel => GraphicsProtocol::SIXEL,
                Kind::Dumb | Kind::Modern | Kind::Legacy => GraphicsProtocol::None,
            };
        }
        probe.overrides.apply(&mut caps);

        crate::debug!(
            color_depth = caps.color_depth.as_str(),
            graphics = caps.graphics.as_str(),
            cell_w = caps.cell_pixels.width,
            cell_h = caps.cell_pixels.height,
            "terminal capabilities detected"
        );
        caps
    }
}

/// `TERM_PROGRAM` values of terminals with truecolor and full attributes.
const MODERN_PROGRAMS: &[&str] = &[
    "iTerm.app",
    "WezTerm",
    "Alacritty",
    "Ghostty",
    "kitty",
    "Contour",
    "vscode",
];

/// `TERM_PROGRAM` values of terminals honoring DEC mode 2026.
const SYNC_PROGRAMS: &[&str] = &["WezTerm", "Alacritty", "Ghostty", "kitty", "Contour"];

/// `TERM` fragments of terminals with sixel enabled out of the box.
const SIXEL_TERMS: &[&str] = &["foot", "mlterm", "yaft", "contour"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Dumb,
    Kitty,
    WezTerm,
    Sixel,
    Modern,
    Legacy,
}

#[derive(Debug, Clone, Default)]
struct Overrides {
    graphics: Option<GraphicsProtocol>,
    cell_pixels: Option<CellPixels>,
    kitty_chunk: Option<u32>,
    sixel_registers: Option<u16>,
}

impl Overrides {
    fn from_env() -> Self {
        fn var<T: std::str::FromStr>(key: &str) -> Option<T> {
            env::var(key).ok()?.trim().parse().ok()
        }
        Self {
            graphics: env::var("TPLANE_GRAPHICS")
                .ok()
                .and_then(|v| GraphicsProtocol::parse(&v)),
            cell_pixels: env::var("TPLANE_CELL_PIXELS")
                .ok()
                .and_then(|v| CellPixels::parse(&v)),
            kitty_chunk: var("TPLANE_KITTY_CHUNK"),
            sixel_registers: var("TPLANE_SIXEL_REGISTERS"),
        }
    }

    fn apply(&self, caps: &mut TerminalCapabilities) {
        if let Some(graphics) = self.graphics {
            caps.graphics = graphics;
        }
        if let Some(cell) = self.cell_pixels {
            caps.cell_pixels = cell;
        }
        match &mut caps.graphics {
            GraphicsProtocol::Kitty { chunk_size, .. } => {
                if let Some(n) = self.kitty_chunk {
                    *chunk_size = n;
                }
            }
            GraphicsProtocol::Sixel {
                color_registers, ..
            } => {
                if let Some(n) = self.sixel_registers {
                    *color_registers = n;
                }
            }
            GraphicsProtocol::None => {}
        }
    }
}

/// Everything detection looks at, gathered up front so tests can fake it.
#[derive(Debug, Clone, Default)]
struct Probe {
    no_color: bool,
    term: String,
    term_program: String,
    colorterm: String,
    in_tmux: bool,
    in_screen: bool,
    kitty_window: bool,
    cell_pixels: Option<CellPixels>,
    overrides: Overrides,
}

impl Probe {
    fn from_env() -> Self {
        let text = |key: &str| env::var(key).unwrap_or_default();
        let set = |key: &str| env::var_os(key).is_some();
        Self {
            no_color: set("NO_COLOR"),
            term: text("TERM"),
            term_program: text("TERM_PROGRAM"),
            colorterm: text("COLORTERM"),
            in_tmux: set("TMUX"),
            in_screen: set("STY"),
            kitty_window: set("KITTY_WINDOW_ID"),
            cell_pixels: query_cell_pixels(),
            overrides: Overrides::from_env(),
        }
    }

    fn kind(&self) -> Kind {
        let term = self.term.as_str();
        let program = self.term_program.as_str();
        if term.is_empty() || term == "dumb" {
            Kind::Dumb
        } else if self.kitty_window || term.contains("kitty") {
            Kind::Kitty
        } else if program.contains("WezTerm") || term.contains("wezterm") {
            Kind::WezTerm
        } else if SIXEL_TERMS.iter().any(|t| term.contains(t)) {
            Kind::Sixel
        } else if MODERN_PROGRAMS.iter().any(|p| program.contains(p)) {
            Kind::Modern
        } else {
            Kind::Legacy
        }
    }

    fn color_depth(&self, kind: Kind) -> ColorDepth {
        let colorterm = self.colorterm.as_str();
        if self.no_color || kind == Kind::Dumb {
            ColorDepth::Mono
        } else if kind != Kind::Legacy
            || colorterm.contains("truecolor")
            || colorterm.contains("24bit")
        {
            ColorDepth::TrueColor
        } else if self.term.contains("256") {
            ColorDepth::Palette256
        } else {
            ColorDepth::Ansi16
        }
    }
}

/// Divide the tty's pixel size by its cell grid.
#[cfg(not(target_arch = "wasm32"))]
fn query_cell_pixels() -> Option<CellPixels> {
    let size = crossterm::terminal::window_size().ok()?;
    if size.columns == 0 || size.rows == 0 || size.width == 0 || size.height == 0 {
        return None;
    }
    Some(CellPixels::new(
        size.width / size.columns,
        size.height / size.rows,
    ))
}

#[cfg(target_arch = "wasm32")]
fn query_cell_pixels() -> Option<CellPixels> {
    None
}

/// Hand-assembled descriptor, starting from [`TerminalCapabilities::dumb`].
///
/// ```
/// use tplane_core::terminal_capabilities::{CapabilityProfileBuilder, ColorDepth, GraphicsProtocol};
///
/// let caps = CapabilityProfileBuilder::new()
///     .color_depth(ColorDepth::TrueColor)
///     .graphics(GraphicsProtocol::KITTY)
///     .cell_pixels(8, 16)
///     .build();
///
/// assert!(caps.graphics.is_bitmap());
/// assert_eq!(caps.cell_pixels.height, 16);
/// assert_eq!(caps.name(), "custom");
/// ```
#[derive(Debug, Clone)]
pub struct CapabilityProfileBuilder {
    caps: TerminalCapabilities,
}

impl Default for CapabilityProfileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CapabilityProfileBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::starting_from(TerminalCapabilities::dumb())
    }

    /// Tweak a predefined profile instead of starting from nothing.
    #[must_use]
    pub fn starting_from(caps: TerminalCapabilities) -> Self {
        Self {
            caps: TerminalCapabilities {
                name: "custom",
                ..caps
            },
        }
    }

    #[must_use]
    pub fn build(self) -> TerminalCapabilities {
        self.caps
    }

    #[must_use]
    pub const fn color_depth(mut self, depth: ColorDepth) -> Self {
        self.caps.color_depth = depth;
        self
    }

    #[must_use]
    pub const fn supported_styles(mut self, styles: StyleFlags) -> Self {
        self.caps.supported_styles = styles;
        self
    }

    #[must_use]
    pub const fn sync_output(mut self, enabled: bool) -> Self {
        self.caps.sync_output = enabled;
        self
    }

    #[must_use]
    pub const fn in_tmux(mut self, enabled: bool) -> Self {
        self.caps.in_tmux = enabled;
        self
    }

    #[must_use]
    pub const fn graphics(mut self, graphics: GraphicsProtocol) -> Self {
        self.caps.graphics = graphics;
        self
    }

    /// Zero on either side falls back to [`CellPixels::FALLBACK`].
    #[must_use]
    pub const fn cell_pixels(mut self, width: u16, height: u16) -> Self {
        self.caps.cell_pixels = CellPixels::new(width, height);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe(term: &str) -> Probe {
        Probe {
            term: term.to_string(),
            ..Probe::default()
        }
    }

    fn detect(probe: &Probe) -> TerminalCapabilities {
        TerminalCapabilities::from_probe(probe)
    }

    #[test]
    fn dumb_or_unset_term_gets_nothing() {
        for term in ["dumb", ""] {
            let caps = detect(&probe(term));
            assert_eq!(caps.color_depth, ColorDepth::Mono);
            assert_eq!(caps.graphics, GraphicsProtocol::None);
            assert!(caps.supported_styles.is_empty());
        }
    }

    #[test]
    fn kitty_window_id_means_kitty_graphics() {
        let mut p = probe("xterm-256color");
        p.kitty_window = true;
        let caps = detect(&p);
        assert_eq!(caps.graphics, GraphicsProtocol::KITTY);
        assert_eq!(caps.color_depth, ColorDepth::TrueColor);
        assert!(caps.sync_output);
    }

    #[test]
    fn wezterm_has_no_frame_composition() {
        let mut p = probe("xterm-256color");
        p.term_program = "WezTerm".into();
        assert_eq!(detect(&p).graphics, GraphicsProtocol::KITTY_STATIC);
    }

    #[test]
    fn foot_gets_sixel() {
        assert!(matches!(detect(&probe("foot")).graphics, GraphicsProtocol::Sixel { .. }));
        assert!(matches!(detect(&probe("foot-extra")).graphics, GraphicsProtocol::Sixel { .. }));
    }

    #[test]
    fn multiplexers_suppress_graphics_and_sync() {
        let mut p = probe("xterm-kitty");
        p.in_tmux = true;
        let caps = detect(&p);
        assert_eq!(caps.graphics, GraphicsProtocol::None);
        assert!(!caps.use_sync_output());

        let mut p = probe("foot");
        p.in_screen = true;
        assert_eq!(detect(&p).graphics, GraphicsProtocol::None);
    }

    #[test]
    fn graphics_override_beats_the_multiplexer() {
        let mut p = probe("xterm-256color");
        p.in_tmux = true;
        p.overrides.graphics = Some(GraphicsProtocol::SIXEL);
        p.overrides.sixel_registers = Some(16);
        assert_eq!(
            detect(&p).graphics,
            GraphicsProtocol::Sixel {
                color_registers: 16,
                max_width: 4096,
                max_height: 4096,
            }
        );
    }

    #[test]
    fn kitty_chunk_override_applies() {
        let mut p = probe("xterm-kitty");
        p.overrides.kitty_chunk = Some(1024);
        assert_eq!(
            detect(&p).graphics,
            GraphicsProtocol::Kitty {
                chunk_size: 1024,
                animation: true,
            }
        );
    }

    #[test]
    fn chunk_override_ignored_without_kitty() {
        let mut p = probe("xterm");
        p.overrides.kitty_chunk = Some(1024);
        assert_eq!(detect(&p).graphics, GraphicsProtocol::None);
    }

    #[test]
    fn cell_pixels_parse() {
        assert_eq!(CellPixels::parse("9x18"), Some(CellPixels::new(9, 18)));
        assert_eq!(CellPixels::parse(" 8X16 "), Some(CellPixels::new(8, 16)));
        assert_eq!(CellPixels::parse("0x18"), None);
        assert_eq!(CellPixels::parse("wide"), None);
        assert_eq!(CellPixels::new(0, 5), CellPixels::FALLBACK);
    }

    #[test]
    fn override_protocol_names() {
        assert_eq!(GraphicsProtocol::parse("Kitty"), Some(GraphicsProtocol::KITTY));
        assert_eq!(GraphicsProtocol::parse("off"), Some(GraphicsProtocol::None));
        assert_eq!(GraphicsProtocol::parse("iterm"), None);
    }

    #[test]
    fn color_depth_from_term_and_colorterm() {
        assert_eq!(detect(&probe("xterm-256color")).color_depth, ColorDepth::Palette256);
        assert_eq!(detect(&probe("xterm")).color_depth, ColorDepth::Ansi16);
        let mut p = probe("xterm");
        p.colorterm = "truecolor".into();
        assert_eq!(detect(&p).color_depth, ColorDepth::TrueColor);
        p.no_color = true;
        assert_eq!(detect(&p).color_depth, ColorDepth::Mono);
    }

    #[test]
    fn profiles_found_by_name() {
        for (name, _) in PROFILES {
            let caps = TerminalCapabilities::by_name(name).unwrap();
            assert_eq!(caps.name(), *name);
        }
        assert_eq!(
            TerminalCapabilities::by_name("KITTY"),
            Some(TerminalCapabilities::kitty())
        );
        assert_eq!(TerminalCapabilities::by_name("vt52"), None);
    }

    #[test]
    fn builder_starting_from_profile_keeps_its_fields() {
        let caps = CapabilityProfileBuilder::starting_from(TerminalCapabilities::foot())
            .sync_output(false)
            .build();
        assert_eq!(caps.graphics, GraphicsProtocol::SIXEL);
        assert!(!caps.sync_output);
        assert_eq!(caps.name(), "custom");
    }
}
