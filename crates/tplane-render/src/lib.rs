#![forbid(unsafe_code)]

//! Render kernel: planes, compositing, damage, and bitmap graphics.
//!
//! A [`Pile`](pile::Pile) owns a z-ordered stack of [`Plane`](plane::Plane)s.
//! A [`Renderer`](render::Renderer) composites the pile into terminal output,
//! emitting only what changed since the last pass. Planes may carry a
//! bitmap ([`Sprixel`](sprixel::Sprixel)) encoded for the kitty graphics
//! protocol or sixel; text drawn over a bitmap cuts the covered cells out of
//! it and restores them once uncovered.
//!
//! ```
//! use tplane_core::terminal_capabilities::TerminalCapabilities;
//! use tplane_render::config::RenderConfig;
//! use tplane_render::pile::Pile;
//! use tplane_render::render::Renderer;
//!
//! let caps = TerminalCapabilities::xterm_256color();
//! let config = RenderConfig::default();
//! let mut pile = Pile::new(2, 10, &caps, &config).unwrap();
//! let std = pile.standard();
//! pile.plane_mut(std).unwrap().put_str(0, 0, "hello").unwrap();
//!
//! let mut renderer = Renderer::new(caps, config);
//! let mut out = Vec::new();
//! renderer.render(&mut pile, &mut out).unwrap();
//! assert!(String::from_utf8_lossy(&out).contains("hello"));
//! ```

pub mod ansi;
pub mod cell;
pub mod codec;
pub mod config;
pub mod counting_writer;
pub mod damage;
pub mod error;
pub mod grapheme_pool;
pub mod pile;
pub mod plane;
pub mod render;
pub mod sprixel;

pub use error::{Error, Result};

mod text_width {
    use unicode_display_width::width as unicode_display_width;

    #[inline]
    fn is_zero_width_codepoint(c: char) -> bool {
        let u = c as u32;
        matches!(u, 0x0000..=0x001F | 0x007F..=0x009F)
            || matches!(u, 0x0300..=0x036F | 0x1AB0..=0x1AFF | 0x1DC0..=0x1DFF | 0x20D0..=0x20FF)
            || matches!(u, 0xFE00..=0xFE0F | 0xFE20..=0xFE2F | 0xE0100..=0xE01EF)
            || matches!(
                u,
                0x00AD | 0x034F | 0x180E | 0x200B..=0x200F | 0x2060 | 0xFEFF
            )
            || matches!(u, 0x202A..=0x202E | 0x2066..=0x206F)
    }

    #[inline]
    fn is_probable_emoji(c: char) -> bool {
        let u = c as u32;
        matches!(
            u,
            0x1F000..=0x1FAFF | 0x2300..=0x23FF | 0x2600..=0x27BF | 0x2B00..=0x2BFF
        ) && u != 0x2764
    }

    /// Columns an extended grapheme cluster occupies: 0, 1, or 2.
    ///
    /// Control characters have no width, so they are never placed.
    #[inline]
    pub(crate) fn grapheme_width(grapheme: &str) -> usize {
        if grapheme.is_ascii() {
            return grapheme.bytes().filter(|b| (0x20..=0x7E).contains(b)).count().min(2);
        }
        if grapheme.chars().all(is_zero_width_codepoint) {
            return 0;
        }
        if grapheme.chars().any(|c| c as u32 == 0xFE0F || is_probable_emoji(c)) {
            return 2;
        }
        (unicode_display_width(grapheme) as usize).clamp(1, 2)
    }

    #[cfg(test)]
    mod tests {
        use super::grapheme_width;

        #[test]
        fn widths() {
            assert_eq!(grapheme_width("a"), 1);
            assert_eq!(grapheme_width("\t"), 0);
            assert_eq!(grapheme_width("\u{200B}"), 0);
            assert_eq!(grapheme_width("世"), 2);
            assert_eq!(grapheme_width("é"), 1);
            assert_eq!(grapheme_width("e\u{301}"), 1);
            assert_eq!(grapheme_width("👍🏽"), 2);
        }
    }
}

pub(crate) use text_width::grapheme_width;
