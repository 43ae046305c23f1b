#![forbid(unsafe_code)]

//! Terminal rendering with stacked planes.
//!
//! Re-exports the types most programs need from the internal crates and
//! offers a prelude. Everything else stays reachable through [`core`] and
//! [`render`].
//!
//! ```
//! use tplane::prelude::*;
//!
//! let caps = TerminalCapabilities::xterm_256color();
//! let config = RenderConfig::default();
//! let mut pile = Pile::new(3, 20, &caps, &config)?;
//! let label = pile.create(PlaneOptions::new(1, 2, 1, 8))?;
//! pile.plane_mut(label)?.put_str(0, 0, "ready")?;
//!
//! let mut renderer = Renderer::new(caps, config);
//! let mut out = Vec::new();
//! renderer.render(&mut pile, &mut out)?;
//! assert_eq!(renderer.render(&mut pile, &mut out)?, 0);
//! # Ok::<(), tplane::Error>(())
//! ```

// --- Core re-exports -------------------------------------------------------

pub use tplane_core::geometry::{Origin, Rect, Size};
pub use tplane_core::style::StyleFlags;
pub use tplane_core::terminal_capabilities::{
    CellPixels, ColorDepth, GraphicsProtocol, TerminalCapabilities,
};

// --- Render re-exports -----------------------------------------------------

pub use tplane_render::cell::{AlphaLevel, Cell, Channels, Rgb};
pub use tplane_render::config::{AnimationLevel, RenderConfig};
pub use tplane_render::counting_writer::RenderStats;
pub use tplane_render::error::{AllocError, EncodeError, GeometryError};
pub use tplane_render::grapheme_pool::GraphemePool;
pub use tplane_render::pile::{Pile, PlaneId, ZOp};
pub use tplane_render::plane::{Plane, PlaneOptions};
pub use tplane_render::render::Renderer;
pub use tplane_render::sprixel::{Sprixel, SprixelId, SprixelState, TamState};
pub use tplane_render::{Error, Result};

// --- Prelude --------------------------------------------------------------

pub mod prelude {
    pub use crate::{
        AlphaLevel, Channels, Error, Pile, PlaneId, PlaneOptions, RenderConfig, Renderer, Result,
        Rgb, StyleFlags, TerminalCapabilities, ZOp,
    };
}

pub use tplane_core as core;
pub use tplane_render as render;
