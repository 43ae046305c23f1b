#![forbid(unsafe_code)]

//! Renderer and pile configuration.
//!
//! | Variable | Values | Effect |
//! |----------|--------|--------|
//! | `TPLANE_ANIMATION` | `full`, `delta` | Bitmap update policy |
//! | `TPLANE_SYNC` | `0`, `1` | Force synchronized output off/on |

use std::str::FromStr;

/// How changes to a displayed bitmap reach the terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AnimationLevel {
    /// Retransmit the whole image after any change.
    #[default]
    Full,
    /// Send compressed frame edits for changed regions where the protocol
    /// supports them.
    Delta,
}

impl AnimationLevel {
    /// Lowercase name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Delta => "delta",
        }
    }
}

impl FromStr for AnimationLevel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" => Ok(Self::Full),
            "delta" => Ok(Self::Delta),
            _ => Err(()),
        }
    }
}

/// Caller-supplied policy for a pile and its renderer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderConfig {
    /// Bitmap update policy.
    pub animation: AnimationLevel,
    /// Override for synchronized output; `None` follows the descriptor.
    pub sync_output: Option<bool>,
    /// First allocation of each plane's grapheme pool.
    pub initial_pool_bytes: usize,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            animation: AnimationLevel::Full,
            sync_output: None,
            initial_pool_bytes: 64,
        }
    }
}

impl RenderConfig {
    /// Defaults with `TPLANE_*` environment overrides applied.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(level) = get("TPLANE_ANIMATION").and_then(|v| v.parse().ok()) {
            config.animation = level;
        }
        config.sync_output = match get("TPLANE_SYNC").as_deref().map(str::trim) {
            Some("1") | Some("true") => Some(true),
            Some("0") | Some("false") => Some(false),
            _ => None,
        };
        tplane_core::debug!(
            animation = config.animation.as_str(),
            sync = ?config.sync_output,
            "render config loaded"
        );
        config
    }

    /// Builder: set the animation level.
    #[must_use]
    pub fn animation(mut self, level: AnimationLevel) -> Self {
        self.animation = level;
        self
    }

    /// Builder: force synchronized output on or off.
    #[must_use]
    pub fn sync_output(mut self, enabled: bool) -> Self {
        self.sync_output = Some(enabled);
        self
    }
}
