#![forbid(unsafe_code)]

//! Error taxonomy for the render kernel.
//!
//! | Variant | Cause | Recovery |
//! |---------|-------|----------|
//! | [`Error::Allocation`] | Pool or wire-buffer growth failed | Free resources, retry |
//! | [`Error::Geometry`] | Dimensions inconsistent with retained state | Caller error; nothing was mutated |
//! | [`Error::Encode`] | Payload exceeds protocol limits, or no protocol | Fall back to text for that region |
//! | [`Error::Io`] | Writing to the terminal failed | Pass aborted, damage preserved; retry |

use std::fmt;
use std::io;

use crate::pile::PlaneId;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Top-level render kernel error.
#[derive(Debug)]
pub enum Error {
    /// Memory could not be reserved.
    Allocation(AllocError),
    /// Geometry rejected before any mutation.
    Geometry(GeometryError),
    /// Bitmap could not be encoded for the terminal.
    Encode(EncodeError),
    /// Terminal write failed.
    Io(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allocation(err) => write!(f, "allocation failure: {err}"),
            Self::Geometry(err) => write!(f, "geometry error: {err}"),
            Self::Encode(err) => write!(f, "encode failure: {err}"),
            Self::Io(err) => write!(f, "terminal write failed: {err}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<AllocError> for Error {
    fn from(err: AllocError) -> Self {
        Self::Allocation(err)
    }
}

impl From<GeometryError> for Error {
    fn from(err: GeometryError) -> Self {
        Self::Geometry(err)
    }
}

impl From<EncodeError> for Error {
    fn from(err: EncodeError) -> Self {
        Self::Encode(err)
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

/// Memory reservation failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllocError {
    /// Cluster is shorter than two bytes and belongs inline.
    ClusterTooShort,
    /// Cluster contains a NUL byte and cannot be terminated.
    ClusterContainsNul,
    /// Pool would exceed its 24-bit biased offset space.
    PoolExhausted {
        /// Bytes the pool would need.
        requested: usize,
        /// Hard ceiling of the offset space.
        limit: usize,
    },
    /// A growable buffer could not reserve more memory.
    OutOfMemory {
        /// Bytes that were being reserved.
        requested: usize,
    },
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClusterTooShort => write!(f, "cluster shorter than 2 bytes must be stored inline"),
            Self::ClusterContainsNul => write!(f, "cluster contains a NUL byte"),
            Self::PoolExhausted { requested, limit } => {
                write!(f, "grapheme pool needs {requested} bytes, limit is {limit}")
            }
            Self::OutOfMemory { requested } => write!(f, "could not reserve {requested} bytes"),
        }
    }
}

impl std::error::Error for AllocError {}

/// Geometry rejected before mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeometryError {
    /// Plane handle is stale or never existed.
    UnknownPlane(PlaneId),
    /// The standard plane may not be destroyed, moved, or resized by callers.
    StandardPlane,
    /// Zero rows or columns.
    EmptyPlane,
    /// Kept rectangle does not fit the requested dimensions.
    KeepOutOfBounds {
        /// Rows requested for the plane.
        rows: u16,
        /// Columns requested for the plane.
        cols: u16,
    },
    /// Coordinate outside the plane.
    OutOfBounds {
        /// Row.
        y: u16,
        /// Column.
        x: u16,
    },
    /// RGBA buffer length disagrees with its stated dimensions.
    BufferSize {
        /// Bytes expected.
        expected: usize,
        /// Bytes supplied.
        actual: usize,
    },
    /// Bitmap needs more cells than the plane has.
    BitmapTooLarge {
        /// Rows the bitmap covers.
        rows: u16,
        /// Columns the bitmap covers.
        cols: u16,
    },
    /// A plane with a bound bitmap cannot be resized; blit again instead.
    SprixelBound,
    /// Plane has no bound bitmap.
    NoSprixel,
    /// Relative z-order move against the plane itself.
    SelfReference,
}

impl fmt::Display for GeometryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownPlane(id) => write!(f, "unknown plane {id:?}"),
            Self::StandardPlane => write!(f, "operation not permitted on the standard plane"),
            Self::EmptyPlane => write!(f, "planes need at least one row and one column"),
            Self::KeepOutOfBounds { rows, cols } => {
                write!(f, "kept rectangle does not fit in {rows}x{cols}")
            }
            Self::OutOfBounds { y, x } => write!(f, "coordinate ({y}, {x}) outside plane"),
            Self::BufferSize { expected, actual } => {
                write!(f, "rgba buffer has {actual} bytes, expected {expected}")
            }
            Self::BitmapTooLarge { rows, cols } => {
                write!(f, "bitmap covers {rows}x{cols} cells, larger than its plane")
            }
            Self::SprixelBound => write!(f, "plane has a bound bitmap"),
            Self::NoSprixel => write!(f, "plane has no bound bitmap"),
            Self::SelfReference => write!(f, "plane cannot be moved relative to itself"),
        }
    }
}

impl std::error::Error for GeometryError {}

/// Bitmap encoding failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// The descriptor names no bitmap protocol.
    Unsupported,
    /// Image exceeds what the protocol accepts.
    TooLarge {
        /// Image width in pixels.
        width: u32,
        /// Image height in pixels.
        height: u32,
    },
    /// Compression stream failed.
    Compress(String),
    /// An in-place edit fell outside the encoded buffer.
    WireRange {
        /// First byte of the edit.
        offset: usize,
        /// Bytes the edit spans.
        len: usize,
    },
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsupported => write!(f, "terminal has no bitmap graphics protocol"),
            Self::TooLarge { width, height } => {
                write!(f, "{width}x{height} image exceeds protocol limits")
            }
            Self::Compress(msg) => write!(f, "compression failed: {msg}"),
            Self::WireRange { offset, len } => {
                write!(f, "edit of {len} bytes at {offset} outside wire buffer")
            }
        }
    }
}

impl std::error::Error for EncodeError {}
