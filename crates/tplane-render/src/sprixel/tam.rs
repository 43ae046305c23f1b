#![forbid(unsafe_code)]

//! Transparency-Annihilation Matrix.
//!
//! One entry per cell of the owning plane. An entry reaches an
//! `Annihilated*` state only through a wipe and leaves it only through a
//! rebuild or a reclassifying blit:
//!
//! ```text
//! Opaque/Mixed --wipe--> Annihilated --rebuild--> Opaque/Mixed (recomputed)
//! Transparent  --wipe--> AnnihilatedTransparent --rebuild--> Transparent
//! (any)        --blit--> Opaque/Mixed/Transparent, auxvecs dropped
//! ```

/// Occlusion state of one cell under a bitmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TamState {
    /// Every pixel fully opaque.
    Opaque,
    /// Both opaque and transparent pixels.
    Mixed,
    /// Every pixel transparent, or no pixels at all.
    Transparent,
    /// Cut out of the bitmap so a glyph shows through.
    Annihilated,
    /// A transparent cell marked cut.
    AnnihilatedTransparent,
}

impl TamState {
    /// True for either annihilated state.
    #[inline]
    pub const fn is_annihilated(self) -> bool {
        matches!(self, Self::Annihilated | Self::AnnihilatedTransparent)
    }

    /// Classify from alpha samples.
    ///
    /// 255 is opaque, 0 transparent; anything in between makes the cell
    /// `Mixed`. No samples means `Transparent`.
    pub fn classify<I: IntoIterator<Item = u8>>(alphas: I) -> Self {
        let mut opaque = true;
        let mut transparent = true;
        for a in alphas {
            if a != 255 {
                opaque = false;
            }
            if a != 0 {
                transparent = false;
            }
            if !opaque && !transparent {
                return Self::Mixed;
            }
        }
        if transparent {
            Self::Transparent
        } else {
            Self::Opaque
        }
    }
}

/// One TAM entry with its restore data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TamEntry {
    pub(crate) state: TamState,
    pub(crate) auxvec: Option<Box<[u8]>>,
}

impl TamEntry {
    pub(crate) const fn new(state: TamState) -> Self {
        Self {
            state,
            auxvec: None,
        }
    }

    /// Current state.
    #[inline]
    pub fn state(&self) -> TamState {
        self.state
    }

    /// Saved pixel data of an annihilated cell.
    #[inline]
    pub fn auxvec(&self) -> Option<&[u8]> {
        self.auxvec.as_deref()
    }
}

/// Counts of each state, for diagnostics and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TamCounts {
    /// Opaque cells.
    pub opaque: usize,
    /// Mixed cells.
    pub mixed: usize,
    /// Transparent cells.
    pub transparent: usize,
    /// Annihilated cells.
    pub annihilated: usize,
    /// Annihilated transparent cells.
    pub annihilated_transparent: usize,
}

impl TamCounts {
    /// Sum of all states.
    pub fn total(&self) -> usize {
        self.opaque + self.mixed + self.transparent + self.annihilated + self.annihilated_transparent
    }
}

/// Row-major matrix sized to the owning plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tam {
    rows: u16,
    cols: u16,
    entries: Vec<TamEntry>,
}

impl Tam {
    pub(crate) fn from_states(rows: u16, cols: u16, states: Vec<TamState>) -> Self {
        debug_assert_eq!(states.len(), rows as usize * cols as usize);
        Self {
            rows,
            cols,
            entries: states.into_iter().map(TamEntry::new).collect(),
        }
    }

    /// Rows.
    pub fn rows(&self) -> u16 {
        self.rows
    }

    /// Columns.
    pub fn cols(&self) -> u16 {
        self.cols
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True for a zero-sized matrix.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry at `(y, x)`.
    #[inline]
    pub fn get(&self, y: u16, x: u16) -> Option<&TamEntry> {
        self.index(y, x).map(|i| &self.entries[i])
    }

    /// State at `(y, x)`.
    #[inline]
    pub fn state(&self, y: u16, x: u16) -> Option<TamState> {
        self.get(y, x).map(TamEntry::state)
    }

    #[inline]
    pub(crate) fn get_mut(&mut self, y: u16, x: u16) -> Option<&mut TamEntry> {
        self.index(y, x).map(|i| &mut self.entries[i])
    }

    /// Iterate `(y, x, entry)` row-major.
    pub fn iter(&self) -> impl Iterator<Item = (u16, u16, &TamEntry)> + '_ {
        let cols = self.cols as usize;
        self.entries
            .iter()
            .enumerate()
            .map(move |(i, e)| ((i / cols) as u16, (i % cols) as u16, e))
    }

    /// Tally of states.
    pub fn counts(&self) -> TamCounts {
        let mut counts = TamCounts::default();
        for e in &self.entries {
            match e.state {
                TamState::Opaque => counts.opaque += 1,
                TamState::Mixed => counts.mixed += 1,
                TamState::Transparent => counts.transparent += 1,
                TamState::Annihilated => counts.annihilated += 1,
                TamState::AnnihilatedTransparent => counts.annihilated_transparent += 1,
            }
        }
        counts
    }

    #[inline]
    fn index(&self, y: u16, x: u16) -> Option<usize> {
        if y < self.rows && x < self.cols {
            Some(y as usize * self.cols as usize + x as usize)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_extremes() {
        assert_eq!(TamState::classify([255, 255]), TamState::Opaque);
        assert_eq!(TamState::classify([0, 0]), TamState::Transparent);
        assert_eq!(TamState::classify([0, 255]), TamState::Mixed);
        assert_eq!(TamState::classify([128]), TamState::Mixed);
        assert_eq!(TamState::classify(std::iter::empty::<u8>()), TamState::Transparent);
    }

    #[test]
    fn counts_and_iteration() {
        let tam = Tam::from_states(
            2,
            2,
            vec![
                TamState::Opaque,
                TamState::Mixed,
                TamState::Transparent,
                TamState::Opaque,
            ],
        );
        let counts = tam.counts();
        assert_eq!(counts.opaque, 2);
        assert_eq!(counts.total(), 4);
        let coords: Vec<_> = tam.iter().map(|(y, x, _)| (y, x)).collect();
        assert_eq!(coords, vec![(0, 0), (0, 1), (1, 0), (1, 1)]);
        assert_eq!(tam.state(1, 0), Some(TamState::Transparent));
        assert_eq!(tam.state(2, 0), None);
    }
}
