#![forbid(unsafe_code)]

//! Byte arena for multi-byte grapheme clusters.
//!
//! Clusters are stored NUL-terminated. Free space is all-zero, so a
//! position `i` can start a new cluster when `i == 0 || pool[i - 1] == 0`
//! (it is not a terminator of the previous cluster) and the following
//! `len + 1` bytes are zero. A wrap-around cursor keeps recent writes
//! together; the pool grows geometrically once utilization would pass 90%
//! and never shrinks on its own.
//!
//! Offsets are plain `u32` and carry no ownership. Releasing an offset that
//! is not live corrupts the pool; [`Plane`](crate::plane::Plane) is the only
//! caller and tracks ownership through its cells.

use crate::error::AllocError;
use crate::cell::GlyphRef;

/// Hard ceiling imposed by the 24-bit biased offset.
pub const POOL_LIMIT: usize = GlyphRef::MAX_OFFSET as usize + 1;

/// Smallest allocation made on first use.
const MIN_POOL: usize = 64;

/// Byte arena owned by exactly one plane.
#[derive(Debug, Clone, Default)]
pub struct GraphemePool {
    pool: Vec<u8>,
    used: usize,
    next: usize,
    min_size: usize,
}

impl GraphemePool {
    /// Empty pool; no memory is allocated until the first stash.
    pub const fn new() -> Self {
        Self {
            pool: Vec::new(),
            used: 0,
            next: 0,
            min_size: MIN_POOL,
        }
    }

    /// Empty pool whose first allocation will be at least `bytes`.
    pub fn with_initial_size(bytes: usize) -> Self {
        Self {
            min_size: bytes.clamp(MIN_POOL, POOL_LIMIT),
            ..Self::new()
        }
    }

    /// Bytes currently held by live clusters, terminators included.
    #[inline]
    pub fn used(&self) -> usize {
        self.used
    }

    /// Current arena size.
    #[inline]
    pub fn size(&self) -> usize {
        self.pool.len()
    }

    /// Copy `cluster` into the arena and return its offset.
    ///
    /// # Errors
    ///
    /// [`AllocError::ClusterTooShort`] for clusters under two bytes,
    /// [`AllocError::ClusterContainsNul`] if a NUL is embedded, and
    /// [`AllocError::PoolExhausted`] if the 24-bit offset space is full.
    pub fn stash(&mut self, cluster: &[u8]) -> Result<u32, AllocError> {
        if cluster.len() < 2 {
            return Err(AllocError::ClusterTooShort);
        }
        if memchr::memchr(0, cluster).is_some() {
            return Err(AllocError::ClusterContainsNul);
        }
        let needed = cluster.len() + 1;
        if (self.used + needed) * 10 > self.pool.len() * 9 {
            self.grow(self.used + needed)?;
        }

        let pos = match self.find_free(needed) {
            Some(pos) => pos,
            None => {
                // Fragmented: append past the current end.
                let start = self.pool.len();
                self.grow_to(start + needed)?;
                start
            }
        };

        self.pool[pos..pos + cluster.len()].copy_from_slice(cluster);
        self.used += needed;
        self.next = pos + needed;
        if self.next >= self.pool.len() {
            self.next = 0;
        }
        Ok(pos as u32)
    }

    /// Zero the cluster at `offset` and its terminator.
    pub fn release(&mut self, offset: u32) {
        let start = offset as usize;
        let Some(tail) = self.pool.get(start..) else {
            return;
        };
        let len = memchr::memchr(0, tail).unwrap_or(tail.len());
        self.pool[start..start + len].fill(0);
        self.used = self.used.saturating_sub(len + 1);
    }

    /// The cluster stored at `offset`.
    pub fn get(&self, offset: u32) -> &str {
        let Some(tail) = self.pool.get(offset as usize..) else {
            return "";
        };
        let len = memchr::memchr(0, tail).unwrap_or(tail.len());
        std::str::from_utf8(&tail[..len]).unwrap_or("")
    }

    /// Drop every cluster. The arena keeps its size.
    pub fn clear(&mut self) {
        self.pool.fill(0);
        self.used = 0;
        self.next = 0;
    }

    fn find_free(&self, needed: usize) -> Option<usize> {
        let size = self.pool.len();
        if needed > size {
            return None;
        }
        let start = self.next.min(size);
        self.scan(start, size, needed)
            .or_else(|| self.scan(0, (start + needed).min(size), needed))
    }

    /// First valid position `p` in `from..` with `p + needed <= to`.
    fn scan(&self, from: usize, to: usize, needed: usize) -> Option<usize> {
        let mut i = from;
        while i + needed <= to {
            if i > 0 && self.pool[i - 1] != 0 {
                i += 1;
                continue;
            }
            match self.pool[i..i + needed].iter().rposition(|&b| b != 0) {
                None => return Some(i),
                // Skip past the occupied byte; its successor may be a terminator,
                // which the predecessor check rejects.
                Some(k) => i += k + 1,
            }
        }
        None
    }

    fn grow(&mut self, required: usize) -> Result<(), AllocError> {
        let mut size = self.pool.len().max(self.min_size);
        while required * 10 > size * 9 {
            size = size.saturating_mul(2);
            if size >= POOL_LIMIT {
                size = POOL_LIMIT;
                break;
            }
        }
        if required > size {
            return Err(AllocError::PoolExhausted {
                requested: required,
                limit: POOL_LIMIT,
            });
        }
        self.grow_to(size)
    }

    fn grow_to(&mut self, size: usize) -> Result<(), AllocError> {
        if size > POOL_LIMIT {
            return Err(AllocError::PoolExhausted {
                requested: size,
                limit: POOL_LIMIT,
            });
        }
        if size <= self.pool.len() {
            return Ok(());
        }
        let extra = size - self.pool.len();
        self.pool
            .try_reserve_exact(extra)
            .map_err(|_| AllocError::OutOfMemory { requested: extra })?;
        self.pool.resize(size, 0);
        tplane_core::trace!(size, "grapheme pool grew");
        Ok(())
    }
}
