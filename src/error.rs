// Error types shared by every layer of the source.
//
// Three kinds of failure exist: running out of entropy, calling the API
// wrongly, and failing to find enough distinct values for a unique
// collection. They are kept apart so callers can react to each one
// differently.

use crate::buffer::SegmentId;
use crate::intervals::IntervalId;

use std::fmt;

/// Result alias used by all draws.
pub type Draw<T> = Result<T, DrawError>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DrawError {
    /// The buffer has no more bytes and none could be supplied.
    #[error("overran available entropy: {needed} more byte(s) required")]
    Overrun { needed: usize },

    #[error(transparent)]
    Usage(#[from] UsageError),

    #[error(transparent)]
    Exhausted(#[from] UniqueValuesExhausted),
}

impl DrawError {
    pub fn is_overrun(&self) -> bool {
        matches!(self, DrawError::Overrun { .. })
    }
}

/// A contract violation in the code calling the source.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UsageError {
    #[error("invalid range: min {min} is greater than max {max}")]
    InvalidRange { min: String, max: String },

    #[error("invalid range: {0}")]
    UnsupportedBound(String),

    #[error("invalid size bounds: min {min} is greater than max {max}")]
    InvalidSize { min: usize, max: usize },

    #[error("cannot pop interval {found}: innermost open interval is {expected:?}")]
    IntervalMismatch {
        expected: Option<IntervalId>,
        found: IntervalId,
    },

    #[error("{count} interval(s) still open")]
    OpenIntervals { count: usize },

    #[error("reset called without a prior mark")]
    NoMark,

    #[error("a segment is already stashed")]
    StashPending,

    #[error("no segment is stashed")]
    NothingStashed,

    #[error("segment {0:?} is not part of this buffer")]
    UnknownSegment(SegmentId),

    #[error("segment {0:?} has already been read from and cannot be stashed")]
    StashAlreadyRead(SegmentId),

    #[error("the mark points into segment {0:?}, which cannot be stashed")]
    StashUnderMark(SegmentId),

    #[error("segment is full (capacity {capacity})")]
    SegmentFull { capacity: usize },

    #[error("cannot pick from an empty set of choices")]
    EmptyChoice,

    #[error("no generator registered for {0}")]
    UnregisteredGenerator(&'static str),
}

impl UsageError {
    pub(crate) fn invalid_range<T: fmt::Display>(min: T, max: T) -> UsageError {
        UsageError::InvalidRange {
            min: min.to_string(),
            max: max.to_string(),
        }
    }
}

/// A unique collection ran out of attempts before reaching its minimum size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniqueValuesExhausted {
    pub label: String,
    pub min: usize,
    pub accepted: usize,
    pub attempts: usize,
}

impl fmt::Display for UniqueValuesExhausted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "ran out of unique values while generating {}: needed at least {} but only {} \
             distinct value(s) were produced before {} consecutive duplicate(s).",
            self.label, self.min, self.accepted, self.attempts
        )?;
        writeln!(
            f,
            "The element generator does not produce enough distinct values for this collection."
        )?;
        write!(
            f,
            "Decrease the minimum size (currently {}) or widen the element generator's range.",
            self.min
        )
    }
}

impl std::error::Error for UniqueValuesExhausted {}

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),
}
