#![forbid(unsafe_code)]

//! Escape sequences the renderer emits.
//!
//! Only byte generation lives here. Which sequences are needed for a given
//! cell is decided by the renderer's pen tracking.

use std::io::{self, Write};

use tplane_core::style::StyleFlags;
use tplane_core::terminal_capabilities::ColorDepth;

use crate::cell::Rgb;

/// Select graphic rendition, with every attribute cleared.
pub const SGR_RESET: &[u8] = b"\x1b[0m";

/// DEC private mode 2026: the terminal holds the frame until the end marker.
pub const SYNC_BEGIN: &[u8] = b"\x1b[?2026h";
pub const SYNC_END: &[u8] = b"\x1b[?2026l";

#[inline]
pub fn sgr_reset<W: Write>(w: &mut W) -> io::Result<()> {
    w.write_all(SGR_RESET)
}

/// Attribute on-codes in emission order.
const ATTRIBUTES: [(StyleFlags, &str); 9] = [
    (StyleFlags::BOLD, "1"),
    (StyleFlags::DIM, "2"),
    (StyleFlags::ITALIC, "3"),
    (StyleFlags::UNDERLINE, "4"),
    (StyleFlags::UNDERCURL, "4:3"),
    (StyleFlags::BLINK, "5"),
    (StyleFlags::REVERSE, "7"),
    (StyleFlags::HIDDEN, "8"),
    (StyleFlags::STRIKETHROUGH, "9"),
];

/// Turn on every attribute in `flags` with one sequence.
///
/// Nothing is cleared first, and an empty set writes nothing.
pub fn sgr_flags<W: Write>(w: &mut W, flags: StyleFlags) -> io::Result<()> {
    let mut codes = ATTRIBUTES
        .iter()
        .filter(|(flag, _)| flags.contains(*flag))
        .map(|(_, code)| *code);
    let Some(head) = codes.next() else {
        return Ok(());
    };
    write!(w, "\x1b[{head}")?;
    for code in codes {
        write!(w, ";{code}")?;
    }
    w.write_all(b"m")
}

#[derive(Clone, Copy)]
enum Layer {
    Fg,
    Bg,
}

impl Layer {
    /// Base of the 8-color range; extended color is `base + 8`, default `base + 9`.
    const fn base(self) -> u8 {
        match self {
            Layer::Fg => 30,
            Layer::Bg => 40,
        }
    }
}

fn sgr_color<W: Write>(
    w: &mut W,
    layer: Layer,
    color: Option<Rgb>,
    depth: ColorDepth,
) -> io::Result<()> {
    let base = layer.base();
    match (color, depth) {
        (_, ColorDepth::Mono) => Ok(()),
        (None, _) => write!(w, "\x1b[{}m", base + 9),
        (Some(c), ColorDepth::TrueColor) => {
            write!(w, "\x1b[{};2;{};{};{}m", base + 8, c.r, c.g, c.b)
        }
        (Some(c), ColorDepth::Palette256) => write!(w, "\x1b[{};5;{}m", base + 8, rgb_to_256(c)),
        (Some(c), ColorDepth::Ansi16) => {
            let idx = rgb_to_ansi16(c);
            // Bright colors live 60 above the normal range.
            let code = if idx < 8 { base + idx } else { base + 60 + idx - 8 };
            write!(w, "\x1b[{code}m")
        }
    }
}

/// Foreground color degraded to `depth`. `None` selects the terminal default.
pub fn sgr_fg<W: Write>(w: &mut W, color: Option<Rgb>, depth: ColorDepth) -> io::Result<()> {
    sgr_color(w, Layer::Fg, color, depth)
}

/// Background color degraded to `depth`. `None` selects the terminal default.
pub fn sgr_bg<W: Write>(w: &mut W, color: Option<Rgb>, depth: ColorDepth) -> io::Result<()> {
    sgr_color(w, Layer::Bg, color, depth)
}

/// Move the cursor to 0-indexed `(row, col)`.
pub fn cup<W: Write>(w: &mut W, row: u16, col: u16) -> io::Result<()> {
    let (row, col) = (u32::from(row) + 1, u32::from(col) + 1);
    write!(w, "\x1b[{row};{col}H")
}

/// xterm defaults for the 16 base colors.
const ANSI16: [(u8, u8, u8); 16] = [
    (0, 0, 0),
    (205, 0, 0),
    (0, 205, 0),
    (205, 205, 0),
    (0, 0, 238),
    (205, 0, 205),
    (0, 205, 205),
    (229, 229, 229),
    (127, 127, 127),
    (255, 0, 0),
    (0, 255, 0),
    (255, 255, 0),
    (92, 92, 255),
    (255, 0, 255),
    (0, 255, 255),
    (255, 255, 255),
];

/// Nearest xterm 256-color index.
///
/// Exact grays use the 24-step ramp (with the cube corners for the ends);
/// anything else goes to the 6x6x6 cube.
#[must_use]
pub fn rgb_to_256(c: Rgb) -> u8 {
    if c.r == c.g && c.g == c.b {
        return match c.r {
            0..8 => 16,
            249.. => 231,
            v => 232 + ((v - 8) / 10).min(23),
        };
    }
    // Cube levels are 0, 95, 135, 175, 215, 255.
    let level = |v: u8| match v {
        0..48 => 0,
        48..115 => 1,
        v => (v - 35) / 40,
    };
    16 + 36 * level(c.r) + 6 * level(c.g) + level(c.b)
}

/// Nearest of the 16 base colors, weighting channels by luminance.
#[must_use]
pub fn rgb_to_ansi16(c: Rgb) -> u8 {
    let distance = |&(r, g, b): &(u8, u8, u8)| {
        let d = |x: u8, y: u8| (i64::from(x) - i64::from(y)).pow(2);
        2126 * d(c.r, r) + 7152 * d(c.g, g) + 722 * d(c.b, b)
    };
    ANSI16
        .iter()
        .enumerate()
        .min_by_key(|(_, entry)| distance(*entry))
        .map_or(0, |(idx, _)| idx as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emit(f: impl FnOnce(&mut Vec<u8>) -> io::Result<()>) -> Vec<u8> {
        let mut out = Vec::new();
        f(&mut out).unwrap();
        out
    }

    #[test]
    fn flags_share_one_sequence() {
        let out = emit(|w| sgr_flags(w, StyleFlags::BOLD | StyleFlags::ITALIC));
        assert_eq!(out, b"\x1b[1;3m");
        assert!(emit(|w| sgr_flags(w, StyleFlags::empty())).is_empty());
        assert_eq!(emit(|w| sgr_flags(w, StyleFlags::UNDERCURL)), b"\x1b[4:3m");
    }

    #[test]
    fn cursor_position_is_one_based() {
        assert_eq!(emit(|w| cup(w, 0, 0)), b"\x1b[1;1H");
        assert_eq!(emit(|w| cup(w, 4, 9)), b"\x1b[5;10H");
        assert_eq!(emit(|w| cup(w, u16::MAX, 0)), b"\x1b[65536;1H");
    }

    #[test]
    fn foreground_follows_color_depth() {
        let red = Some(Rgb::new(255, 0, 0));
        assert_eq!(emit(|w| sgr_fg(w, red, ColorDepth::TrueColor)), b"\x1b[38;2;255;0;0m");
        assert_eq!(emit(|w| sgr_fg(w, red, ColorDepth::Palette256)), b"\x1b[38;5;196m");
        assert_eq!(emit(|w| sgr_fg(w, red, ColorDepth::Ansi16)), b"\x1b[91m");
        assert!(emit(|w| sgr_fg(w, red, ColorDepth::Mono)).is_empty());
        assert_eq!(emit(|w| sgr_fg(w, None, ColorDepth::TrueColor)), b"\x1b[39m");
    }

    #[test]
    fn background_uses_its_own_ranges() {
        let red = Some(Rgb::new(255, 0, 0));
        let dark_red = Some(Rgb::new(200, 0, 0));
        assert_eq!(emit(|w| sgr_bg(w, red, ColorDepth::Ansi16)), b"\x1b[101m");
        assert_eq!(emit(|w| sgr_bg(w, dark_red, ColorDepth::Ansi16)), b"\x1b[41m");
        assert_eq!(emit(|w| sgr_bg(w, None, ColorDepth::Ansi16)), b"\x1b[49m");
    }

    #[test]
    fn grays_map_to_ramp() {
        assert_eq!(rgb_to_256(Rgb::new(0, 0, 0)), 16);
        assert_eq!(rgb_to_256(Rgb::new(255, 255, 255)), 231);
        assert_eq!(rgb_to_256(Rgb::new(128, 128, 128)), 244);
    }

    #[test]
    fn exact_palette_entries_round_trip() {
        assert_eq!(rgb_to_ansi16(Rgb::new(0, 0, 0)), 0);
        assert_eq!(rgb_to_ansi16(Rgb::new(92, 92, 255)), 12);
        assert_eq!(rgb_to_ansi16(Rgb::new(255, 255, 255)), 15);
    }
}
