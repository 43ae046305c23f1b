#![forbid(unsafe_code)]

//! Bitmap protocol codecs.
//!
//! [`GraphicsCodec`] is a closed set, chosen once per pile from the
//! capability descriptor. Each variant encodes a [`Bitmap`] into a
//! [`WireBuffer`] plus a protocol-specific [`WireLayout`] that lets wipe and
//! rebuild locate a cell's bytes without re-encoding the image.

pub mod kitty;
pub mod sixel;

use std::io::Write;

use tplane_core::terminal_capabilities::{GraphicsProtocol, TerminalCapabilities};

use crate::config::AnimationLevel;
use crate::error::{EncodeError, Result};
use crate::sprixel::{Bitmap, PixelRect, SprixelId, TamState, WireBuffer};

use kitty::{KittyCodec, KittyLayout};
use sixel::{SixelCodec, SixelLayout};

/// Protocol-specific index into a wire buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum WireLayout {
    Kitty(KittyLayout),
    Sixel(SixelLayout),
}

/// The bitmap protocol in use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphicsCodec {
    /// No bitmap support; blits fail.
    None,
    /// Kitty graphics protocol.
    Kitty(KittyCodec),
    /// DEC sixel.
    Sixel(SixelCodec),
}

impl GraphicsCodec {
    /// Pick the codec the descriptor advertises.
    pub fn from_capabilities(caps: &TerminalCapabilities, animation: AnimationLevel) -> Self {
        match caps.graphics {
            GraphicsProtocol::None => Self::None,
            GraphicsProtocol::Kitty {
                chunk_size,
                animation: supported,
            } => {
                let level = if supported {
                    animation
                } else {
                    AnimationLevel::Full
                };
                Self::Kitty(KittyCodec::new(chunk_size, level))
            }
            GraphicsProtocol::Sixel {
                color_registers,
                max_width,
                max_height,
            } => Self::Sixel(SixelCodec::new(color_registers, max_width, max_height)),
        }
    }

    /// Protocol name for logs.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Kitty(_) => "kitty",
            Self::Sixel(_) => "sixel",
        }
    }

    /// True when bitmaps can be drawn at all.
    pub const fn is_bitmap(&self) -> bool {
        !matches!(self, Self::None)
    }

    /// True when a displayed bitmap can be re-placed and deleted by id.
    pub const fn supports_placement(&self) -> bool {
        matches!(self, Self::Kitty(_))
    }

    pub(crate) fn encode(
        &self,
        bitmap: &Bitmap,
        id: SprixelId,
    ) -> Result<(WireBuffer, WireLayout), EncodeError> {
        match self {
            Self::None => Err(EncodeError::Unsupported),
            Self::Kitty(k) => {
                let (wire, layout) = k.encode_bitmap(bitmap, id)?;
                Ok((wire, WireLayout::Kitty(layout)))
            }
            Self::Sixel(s) => {
                let (wire, layout) = s.encode_bitmap(bitmap)?;
                Ok((wire, WireLayout::Sixel(layout)))
            }
        }
    }

    /// Make `rect` fully transparent in place; returns the restore data.
    pub(crate) fn wipe(
        &self,
        wire: &mut WireBuffer,
        layout: &mut WireLayout,
        bitmap: &Bitmap,
        rect: PixelRect,
    ) -> Result<Box<[u8]>> {
        match (self, layout) {
            (Self::Kitty(k), WireLayout::Kitty(l)) => k.wipe(wire, l, bitmap, rect),
            (Self::Sixel(s), WireLayout::Sixel(l)) => s.wipe(wire, l, bitmap, rect),
            _ => Err(EncodeError::Unsupported.into()),
        }
    }

    /// Undo [`wipe`](Self::wipe) from its restore data; returns the cell's
    /// recomputed classification.
    pub(crate) fn rebuild(
        &self,
        wire: &mut WireBuffer,
        layout: &mut WireLayout,
        bitmap: &Bitmap,
        rect: PixelRect,
        aux: &[u8],
    ) -> Result<TamState> {
        match (self, layout) {
            (Self::Kitty(k), WireLayout::Kitty(l)) => k.rebuild(wire, l, bitmap, rect, aux),
            (Self::Sixel(s), WireLayout::Sixel(l)) => s.rebuild(wire, l, bitmap, rect, aux),
            _ => Err(EncodeError::Unsupported.into()),
        }
    }

    /// A frame edit replacing `rect` of a displayed image, when the codec
    /// runs in delta mode.
    pub(crate) fn frame_delta(
        &self,
        id: SprixelId,
        bitmap: &Bitmap,
        rect: PixelRect,
        zero_alpha: bool,
    ) -> Result<Option<Vec<u8>>, EncodeError> {
        match self {
            Self::Kitty(k) if k.animation() == AnimationLevel::Delta => {
                k.frame_edit(id, bitmap, rect, zero_alpha).map(Some)
            }
            _ => Ok(None),
        }
    }

    /// Re-place a displayed bitmap at the cursor. No-op without placement support.
    pub(crate) fn write_move<W: Write>(&self, id: SprixelId, out: &mut W) -> std::io::Result<()> {
        match self {
            Self::Kitty(_) => kitty::write_move(out, id.get()),
            _ => Ok(()),
        }
    }

    /// Delete a displayed bitmap. No-op without placement support.
    pub(crate) fn write_delete<W: Write>(&self, id: SprixelId, out: &mut W) -> std::io::Result<()> {
        match self {
            Self::Kitty(_) => kitty::write_delete(out, id.get()),
            _ => Ok(()),
        }
    }
}
