//! # Conjecture Source
//!
//! The value source at the core of a property-based testing engine.
//!
//! Every value a test receives is drawn from a replayable stream of bytes.
//! Generators pull bytes through a [`Source`], which maps fixed-width samples
//! onto the ranges they ask for and records, in a tree of intervals, exactly
//! which bytes produced which value. Replaying the same bytes through the same
//! generator yields the same values, and the interval tree tells a shrinker
//! which byte ranges are worth perturbing.

pub mod buffer;
pub mod config;
pub mod distributions;
pub mod engine;
pub mod entropy;
pub mod error;
pub mod generators;
pub mod intervals;
pub mod ranges;
pub mod source;

pub use buffer::{Cursor, Segment, SegmentId, SegmentedBuffer};
pub use config::{RunnerConfig, SourceConfig};
pub use distributions::Repeat;
pub use engine::{Trial, TrialRunner};
pub use entropy::{EntropyProvider, NoEntropy, QueuedEntropy, SeededEntropy};
pub use error::{ConfigError, Draw, DrawError, UniqueValuesExhausted, UsageError};
pub use generators::{Generator, GeneratorRegistry, SharedGenerator};
pub use intervals::{Interval, IntervalId, IntervalTracker, IntervalTree, Malformed};
pub use ranges::{map_to_range, FloatSample, RangeSample};
pub use source::{Source, TrialRecord};
