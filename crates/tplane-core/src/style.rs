#![forbid(unsafe_code)]

//! Text attributes carried by every cell.

bitflags::bitflags! {
    /// 16-bit cell style mask.
    ///
    /// The low eight bits follow SGR attribute order; the descriptor's
    /// `supported_styles` uses the same mask to filter output.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct StyleFlags: u16 {
        const BOLD          = 0b0000_0000_0000_0001;
        const DIM           = 0b0000_0000_0000_0010;
        const ITALIC        = 0b0000_0000_0000_0100;
        const UNDERLINE     = 0b0000_0000_0000_1000;
        const BLINK         = 0b0000_0000_0001_0000;
        /// Swaps foreground and background.
        const REVERSE       = 0b0000_0000_0010_0000;
        const STRIKETHROUGH = 0b0000_0000_0100_0000;
        const HIDDEN        = 0b0000_0000_1000_0000;
        /// `SGR 4:3`, which older terminals read as a plain underline.
        const UNDERCURL     = 0b0000_0001_0000_0000;
    }
}

impl StyleFlags {
    /// Styles every ECMA-48 terminal understands.
    pub const BASIC: Self = Self::BOLD
        .union(Self::UNDERLINE)
        .union(Self::REVERSE)
        .union(Self::BLINK);
}
