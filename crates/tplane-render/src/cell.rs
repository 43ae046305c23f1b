#![forbid(unsafe_code)]

//! Cell types and invariants.
//!
//! A [`Cell`] is one terminal character position. Every cell is exactly
//! **16 bytes** so a row of cells is a flat, cache-friendly slice.
//!
//! # Layout (16 bytes)
//!
//! ```text
//! Cell {
//!     glyph: GlyphRef,       // 4 bytes - inline byte or biased pool offset
//!     styles: StyleFlags,    // 2 bytes
//!     width: u8,             // 1 byte  - 0 marks a wide-glyph continuation
//!     _pad: u8,
//!     channels: Channels,    // 8 bytes - fg (high 32) / bg (low 32)
//! }
//! ```
//!
//! Cells never own their pooled glyph: the owning [`Plane`](crate::plane::Plane)
//! is the only writer and releases the pool slot before overwriting.

use tplane_core::style::StyleFlags;

/// Glyph reference: empty, a single inline ASCII byte, or a pool offset.
///
/// # Encoding
///
/// ```text
/// 0x0000_0000            empty (transparent for glyph resolution)
/// 0x0000_00XX            inline 7-bit character XX (XX != 0)
/// 0x01XX_XXXX            pooled cluster at offset XX_XXXX
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct GlyphRef(u32);

impl GlyphRef {
    /// No glyph.
    pub const EMPTY: Self = Self(0);

    /// Bias bit distinguishing pool offsets from inline bytes.
    const POOL_BIAS: u32 = 0x0100_0000;

    /// Largest offset a biased reference can address.
    pub const MAX_OFFSET: u32 = 0x00FF_FFFF;

    /// Inline reference for a 7-bit character. Returns `None` for NUL or
    /// non-ASCII bytes.
    #[inline]
    pub const fn inline(byte: u8) -> Option<Self> {
        if byte == 0 || byte > 0x7F {
            None
        } else {
            Some(Self(byte as u32))
        }
    }

    /// Reference to a pooled cluster.
    #[inline]
    pub const fn pooled(offset: u32) -> Self {
        debug_assert!(offset <= Self::MAX_OFFSET, "pool offset overflow");
        Self(Self::POOL_BIAS | (offset & Self::MAX_OFFSET))
    }

    /// True for the empty reference.
    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True when the glyph lives in the plane's pool.
    #[inline]
    pub const fn is_pooled(self) -> bool {
        self.0 & Self::POOL_BIAS != 0
    }

    /// The inline byte, if this is an inline glyph.
    #[inline]
    pub const fn as_inline(self) -> Option<u8> {
        if self.0 != 0 && !self.is_pooled() {
            Some(self.0 as u8)
        } else {
            None
        }
    }

    /// The pool offset, if pooled.
    #[inline]
    pub const fn pool_offset(self) -> Option<u32> {
        if self.is_pooled() {
            Some(self.0 & Self::MAX_OFFSET)
        } else {
            None
        }
    }

    /// Raw 32-bit value.
    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl core::fmt::Debug for GlyphRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if self.is_empty() {
            f.write_str("GlyphRef::EMPTY")
        } else if let Some(off) = self.pool_offset() {
            write!(f, "GlyphRef::Pooled({off})")
        } else {
            write!(f, "GlyphRef::Inline({:?})", self.0 as u8 as char)
        }
    }
}

/// Per-channel alpha level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum AlphaLevel {
    /// Color wins outright; compositing stops here.
    #[default]
    Opaque = 0,
    /// Color is averaged with whatever lies beneath.
    Blend = 1,
    /// Color is ignored; compositing continues downward.
    Transparent = 2,
    /// Foreground only: resolved to black or white against the final background.
    HighContrast = 3,
}

impl AlphaLevel {
    #[inline]
    const fn from_bits(bits: u32) -> Self {
        match bits & 0b11 {
            0 => Self::Opaque,
            1 => Self::Blend,
            2 => Self::Transparent,
            _ => Self::HighContrast,
        }
    }
}

/// 24-bit color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rgb {
    /// Red.
    pub r: u8,
    /// Green.
    pub g: u8,
    /// Blue.
    pub b: u8,
}

impl Rgb {
    /// Black.
    pub const BLACK: Self = Self::new(0, 0, 0);
    /// White.
    pub const WHITE: Self = Self::new(0xff, 0xff, 0xff);

    /// Create a color.
    #[inline]
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Pack into `0xRRGGBB`.
    #[inline]
    pub const fn to_u32(self) -> u32 {
        ((self.r as u32) << 16) | ((self.g as u32) << 8) | self.b as u32
    }

    /// Unpack from `0xRRGGBB`.
    #[inline]
    pub const fn from_u32(v: u32) -> Self {
        Self::new((v >> 16) as u8, (v >> 8) as u8, v as u8)
    }

    /// Perceived luminance in 0..=255 (Rec. 601 weights).
    #[inline]
    pub const fn luma(self) -> u8 {
        ((self.r as u32 * 299 + self.g as u32 * 587 + self.b as u32 * 114) / 1000) as u8
    }
}

/// Packed foreground/background color and alpha.
///
/// Each 32-bit half carries:
///
/// ```text
/// bit 30     : color is not the terminal default
/// bits 28-29 : alpha level
/// bits 0-23  : RGB
/// ```
///
/// The foreground occupies the high half, the background the low half.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct Channels(u64);

const NOT_DEFAULT: u32 = 1 << 30;
const ALPHA_SHIFT: u32 = 28;
const ALPHA_MASK: u32 = 0b11 << ALPHA_SHIFT;
const RGB_MASK: u32 = 0x00FF_FFFF;

impl Channels {
    /// Default colors, both opaque.
    pub const DEFAULT: Self = Self(0);

    /// Build from the two 32-bit halves.
    #[inline]
    pub const fn from_halves(fg: u32, bg: u32) -> Self {
        Self(((fg as u64) << 32) | bg as u64)
    }

    /// Opaque fg/bg colors.
    #[inline]
    pub const fn rgb(fg: Rgb, bg: Rgb) -> Self {
        Self::from_halves(NOT_DEFAULT | fg.to_u32(), NOT_DEFAULT | bg.to_u32())
    }

    /// Raw 64-bit word.
    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }

    #[inline]
    const fn fg_half(self) -> u32 {
        (self.0 >> 32) as u32
    }

    #[inline]
    const fn bg_half(self) -> u32 {
        self.0 as u32
    }

    /// Foreground color, `None` when the terminal default is used.
    #[inline]
    pub const fn fg(self) -> Option<Rgb> {
        half_rgb(self.fg_half())
    }

    /// Background color, `None` when the terminal default is used.
    #[inline]
    pub const fn bg(self) -> Option<Rgb> {
        half_rgb(self.bg_half())
    }

    /// Foreground alpha.
    #[inline]
    pub const fn fg_alpha(self) -> AlphaLevel {
        AlphaLevel::from_bits(self.fg_half() >> ALPHA_SHIFT)
    }

    /// Background alpha.
    #[inline]
    pub const fn bg_alpha(self) -> AlphaLevel {
        AlphaLevel::from_bits(self.bg_half() >> ALPHA_SHIFT)
    }

    /// Set the foreground color (clears the default flag).
    #[inline]
    #[must_use]
    pub const fn set_fg_rgb(self, rgb: Rgb) -> Self {
        Self::from_halves(with_rgb(self.fg_half(), rgb), self.bg_half())
    }

    /// Set the background color (clears the default flag).
    #[inline]
    #[must_use]
    pub const fn set_bg_rgb(self, rgb: Rgb) -> Self {
        Self::from_halves(self.fg_half(), with_rgb(self.bg_half(), rgb))
    }

    /// Set the foreground alpha level.
    #[inline]
    #[must_use]
    pub const fn set_fg_alpha(self, alpha: AlphaLevel) -> Self {
        Self::from_halves(with_alpha(self.fg_half(), alpha), self.bg_half())
    }

    /// Set the background alpha level.
    ///
    /// High contrast only applies to foregrounds; a background requested as
    /// high contrast is stored as opaque.
    #[inline]
    #[must_use]
    pub const fn set_bg_alpha(self, alpha: AlphaLevel) -> Self {
        let alpha = match alpha {
            AlphaLevel::HighContrast => AlphaLevel::Opaque,
            other => other,
        };
        Self::from_halves(self.fg_half(), with_alpha(self.bg_half(), alpha))
    }

    /// Revert the foreground to the terminal default color.
    #[inline]
    #[must_use]
    pub const fn fg_default(self) -> Self {
        Self::from_halves(self.fg_half() & !(NOT_DEFAULT | RGB_MASK), self.bg_half())
    }

    /// Revert the background to the terminal default color.
    #[inline]
    #[must_use]
    pub const fn bg_default(self) -> Self {
        Self::from_halves(self.fg_half(), self.bg_half() & !(NOT_DEFAULT | RGB_MASK))
    }

    /// Swap foreground and background halves.
    #[inline]
    #[must_use]
    pub const fn reverse(self) -> Self {
        Self::from_halves(self.bg_half(), self.fg_half())
    }
}

#[inline]
const fn half_rgb(half: u32) -> Option<Rgb> {
    if half & NOT_DEFAULT == 0 {
        None
    } else {
        Some(Rgb::from_u32(half & RGB_MASK))
    }
}

#[inline]
const fn with_rgb(half: u32, rgb: Rgb) -> u32 {
    (half & ALPHA_MASK) | NOT_DEFAULT | rgb.to_u32()
}

#[inline]
const fn with_alpha(half: u32, alpha: AlphaLevel) -> u32 {
    (half & !ALPHA_MASK) | ((alpha as u32) << ALPHA_SHIFT)
}

impl core::fmt::Debug for Channels {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Channels")
            .field("fg", &self.fg())
            .field("fg_alpha", &self.fg_alpha())
            .field("bg", &self.bg())
            .field("bg_alpha", &self.bg_alpha())
            .finish()
    }
}

/// One terminal character position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(C)]
pub struct Cell {
    /// Glyph reference; pooled references are only meaningful with the owning plane.
    pub glyph: GlyphRef,
    /// Style mask.
    pub styles: StyleFlags,
    /// Display width: 1 or 2 for a leading cell, 0 for a wide-glyph continuation.
    pub width: u8,
    _pad: u8,
    /// Colors and alpha.
    pub channels: Channels,
}

const _: () = assert!(core::mem::size_of::<Cell>() == 16);

impl Default for Cell {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl Cell {
    /// Empty glyph, default colors, opaque.
    pub const EMPTY: Self = Self {
        glyph: GlyphRef::EMPTY,
        styles: StyleFlags::empty(),
        width: 1,
        _pad: 0,
        channels: Channels::DEFAULT,
    };

    /// Cell with an inline ASCII glyph. Non-ASCII bytes yield an empty glyph.
    #[inline]
    pub const fn from_ascii(byte: u8) -> Self {
        let glyph = match GlyphRef::inline(byte) {
            Some(g) => g,
            None => GlyphRef::EMPTY,
        };
        Self {
            glyph,
            ..Self::EMPTY
        }
    }

    /// Builder: set channels.
    #[inline]
    #[must_use]
    pub const fn with_channels(mut self, channels: Channels) -> Self {
        self.channels = channels;
        self
    }

    /// Builder: set styles.
    #[inline]
    #[must_use]
    pub const fn with_styles(mut self, styles: StyleFlags) -> Self {
        self.styles = styles;
        self
    }

    /// Second half of a wide glyph.
    #[inline]
    pub const fn is_continuation(&self) -> bool {
        self.width == 0
    }

    /// Leading cell holding `glyph`, `width` columns wide, default colors.
    pub(crate) const fn with_glyph(glyph: GlyphRef, width: u8) -> Self {
        Self {
            glyph,
            width,
            ..Self::EMPTY
        }
    }

    pub(crate) const fn continuation(channels: Channels, styles: StyleFlags) -> Self {
        Self {
            glyph: GlyphRef::EMPTY,
            styles,
            width: 0,
            _pad: 0,
            channels,
        }
    }
}
