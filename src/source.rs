//! The object generator functions draw from.
//!
//! A `Source` owns one trial's byte buffer, its interval tracker and the
//! entropy provider that extends the buffer on demand. Generators never see
//! the buffer directly: every byte they consume goes through a draw method
//! here, and every value those methods build is recorded in an interval so
//! the trial can later be shrunk.
//!
//! ```ignore
//! let mut source = Source::from_bytes(bytes);
//! let x = source.get_i32(0..=100)?;
//! let name = source.get_alpha_string(1..=8)?;
//! let scores = source.get_list(|s| s.get_u8(..), ..)?;
//! ```

use crate::buffer::SegmentedBuffer;
use crate::config::SourceConfig;
use crate::distributions::{repeat, unique_repeat};
use crate::entropy::{EntropyProvider, NoEntropy};
use crate::error::{Draw, DrawError, UsageError};
use crate::generators::{Generator, GeneratorRegistry};
use crate::intervals::{IntervalId, IntervalTracker, IntervalTree};
use crate::ranges::{
    float_bounds, force_finite, inclusive_bounds, map_raw_float, map_real, map_to_range,
    map_to_ranges, scale_index, FloatSample, RangeSample,
};

use std::any::{type_name, Any};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::io::{self, Write};
use std::ops::{Bound, RangeBounds, RangeInclusive};
use std::sync::Arc;

const MAX_SAMPLE_WIDTH: usize = 8;

const SURROGATE_START: u32 = 0xD800;
const SURROGATE_END: u32 = 0xDFFF;

const ASCII: &[RangeInclusive<char>] = &['\u{0}'..='\u{7f}'];
const ALPHA: &[RangeInclusive<char>] = &['a'..='z', 'A'..='Z'];
const ALPHANUMERIC: &[RangeInclusive<char>] = &['a'..='z', 'A'..='Z', '0'..='9'];
const ANY_CHAR: &[RangeInclusive<char>] = &['\u{0}'..=char::MAX];

/// What a finished trial leaves behind for replay and shrinking.
#[derive(Debug, Clone)]
pub struct TrialRecord {
    /// Every byte the buffer held, in the persisted form.
    pub bytes: Vec<u8>,
    /// How many of `bytes` the trial actually read.
    pub consumed: u64,
    pub intervals: IntervalTree,
}

impl TrialRecord {
    /// The prefix of `bytes` the trial read. Replaying it reproduces the trial.
    pub fn consumed_bytes(&self) -> &[u8] {
        let end = (self.consumed as usize).min(self.bytes.len());
        &self.bytes[..end]
    }

    pub fn write_to<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_all(&self.bytes)?;
        writer.flush()
    }
}

pub struct Source {
    buffer: SegmentedBuffer,
    intervals: IntervalTracker,
    entropy: Box<dyn EntropyProvider>,
    config: SourceConfig,
    registry: Arc<GeneratorRegistry>,
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Source")
            .field("position", &self.buffer.position())
            .field("len", &self.buffer.len())
            .field("open_intervals", &self.intervals.depth())
            .field("config", &self.config)
            .finish()
    }
}

impl Source {
    /// A source reading `buffer` with no further entropy, the default
    /// configuration and the default generators.
    pub fn new(buffer: SegmentedBuffer) -> Source {
        Source {
            buffer,
            intervals: IntervalTracker::new(),
            entropy: Box::new(NoEntropy),
            config: SourceConfig::default(),
            registry: Arc::new(GeneratorRegistry::with_defaults()),
        }
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Source {
        Source::new(SegmentedBuffer::from_bytes(bytes))
    }

    /// Uses `entropy` to extend the buffer whenever a draw runs out of bytes.
    pub fn with_entropy(mut self, entropy: impl EntropyProvider + 'static) -> Source {
        self.entropy = Box::new(entropy);
        self
    }

    pub fn with_config(mut self, config: SourceConfig) -> Source {
        self.config = config;
        self
    }

    pub fn with_registry(mut self, registry: Arc<GeneratorRegistry>) -> Source {
        self.registry = registry;
        self
    }

    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    pub fn registry(&self) -> &GeneratorRegistry {
        &self.registry
    }

    /// Global offset of the next byte to be read.
    pub fn position(&self) -> u64 {
        self.buffer.position()
    }

    /// The buffer in its persisted form.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.buffer.to_bytes()
    }

    /// Ends the trial. Intervals a failed draw left open are closed without
    /// a value so the tree is always complete.
    pub fn finish(self) -> TrialRecord {
        let consumed = self.buffer.position();
        TrialRecord {
            bytes: self.buffer.to_bytes(),
            consumed,
            intervals: self.intervals.into_tree(consumed),
        }
    }

    fn fill(&mut self, out: &mut [u8]) -> Draw<()> {
        loop {
            match self.buffer.read_exact(out) {
                Err(DrawError::Overrun { needed }) => match self.entropy.next_segment(needed) {
                    Some(segment) if !segment.is_empty() => {
                        self.buffer.append(segment);
                    }
                    _ => return Err(DrawError::Overrun { needed }),
                },
                result => return result,
            }
        }
    }

    pub(crate) fn raw<T: RangeSample>(&mut self) -> Draw<T> {
        let mut bytes = [0u8; MAX_SAMPLE_WIDTH];
        let bytes = &mut bytes[..T::WIDTH];
        self.fill(bytes)?;
        Ok(T::from_raw(bytes))
    }

    fn raw_float<F: FloatSample>(&mut self) -> Draw<F> {
        let mut bytes = [0u8; MAX_SAMPLE_WIDTH];
        let bytes = &mut bytes[..F::WIDTH];
        self.fill(bytes)?;
        Ok(F::from_raw(bytes))
    }

    /// One full-width sample mapped onto `[min, max]`, outside any interval.
    pub(crate) fn sample_range<T: RangeSample>(&mut self, min: T, max: T) -> Draw<T> {
        if max < min {
            return Err(UsageError::invalid_range(min, max).into());
        }
        let raw = self.raw::<T>()?;
        Ok(map_to_range(raw, min, max)?)
    }

    // Intervals

    /// Opens an interval as a child of the innermost open one.
    pub fn push_interval<'a>(&mut self, name: impl Into<Option<&'a str>>) -> IntervalId {
        let position = self.position();
        self.intervals.push(name.into(), position)
    }

    /// Closes `id`, which must be the innermost open interval, recording
    /// `value` as what its bytes produced.
    pub fn pop_interval<T: Any>(&mut self, id: IntervalId, value: T) -> Draw<()> {
        let position = self.position();
        Ok(self.intervals.pop(id, position, value)?)
    }

    /// Runs `f` inside a fresh interval named `name`. On success the interval
    /// records the value; on failure it is closed empty along with anything
    /// `f` left open.
    pub fn in_interval<T, F>(&mut self, name: &str, f: F) -> Draw<T>
    where
        T: Clone + 'static,
        F: FnOnce(&mut Source) -> Draw<T>,
    {
        let id = self.push_interval(name);
        match f(self) {
            Ok(value) => {
                self.pop_interval(id, value.clone())?;
                Ok(value)
            }
            Err(err) => {
                let position = self.position();
                self.intervals.abandon_through(id, position);
                Err(err)
            }
        }
    }

    /// The interval tree so far. Fails while any interval is open.
    pub fn snapshot_tree(&self) -> Draw<IntervalTree> {
        Ok(self.intervals.snapshot()?)
    }

    pub fn abandon_open_intervals(&mut self) {
        let position = self.position();
        self.intervals.abandon_all(position);
    }

    // Integers

    /// Draws an integer from `range`: `..` is the whole domain, `..=max`
    /// starts at the type's minimum.
    pub fn draw<T: RangeSample>(&mut self, range: impl RangeBounds<T>) -> Draw<T> {
        let (min, max) = inclusive_bounds(range)?;
        self.in_interval(type_name::<T>(), |s| s.sample_range(min, max))
    }

    pub fn get_i8(&mut self, range: impl RangeBounds<i8>) -> Draw<i8> {
        self.draw(range)
    }

    pub fn get_i16(&mut self, range: impl RangeBounds<i16>) -> Draw<i16> {
        self.draw(range)
    }

    pub fn get_i32(&mut self, range: impl RangeBounds<i32>) -> Draw<i32> {
        self.draw(range)
    }

    pub fn get_i64(&mut self, range: impl RangeBounds<i64>) -> Draw<i64> {
        self.draw(range)
    }

    pub fn get_u8(&mut self, range: impl RangeBounds<u8>) -> Draw<u8> {
        self.draw(range)
    }

    pub fn get_u16(&mut self, range: impl RangeBounds<u16>) -> Draw<u16> {
        self.draw(range)
    }

    pub fn get_u32(&mut self, range: impl RangeBounds<u32>) -> Draw<u32> {
        self.draw(range)
    }

    pub fn get_u64(&mut self, range: impl RangeBounds<u64>) -> Draw<u64> {
        self.draw(range)
    }

    /// Draws from the concatenation of `ranges`, each value equally likely.
    pub fn draw_in_ranges<T: RangeSample>(&mut self, ranges: &[RangeInclusive<T>]) -> Draw<T> {
        self.in_interval(type_name::<T>(), |s| {
            let raw = s.raw::<T>()?;
            Ok(map_to_ranges(raw, ranges)?)
        })
    }

    pub fn get_i32_in_ranges(&mut self, ranges: &[RangeInclusive<i32>]) -> Draw<i32> {
        self.draw_in_ranges(ranges)
    }

    pub fn get_bool(&mut self) -> Draw<bool> {
        self.in_interval("bool", |s| Ok(s.sample_range::<i8>(0, 1)? == 1))
    }

    pub fn get_bytes(&mut self, len: usize) -> Draw<Vec<u8>> {
        self.in_interval("bytes", |s| {
            let mut bytes = vec![0; len];
            s.fill(&mut bytes)?;
            Ok(bytes)
        })
    }

    // Floats

    /// Any f32 bit pattern, NaN and infinities included.
    pub fn get_f32(&mut self) -> Draw<f32> {
        self.in_interval("f32", |s| s.raw_float())
    }

    pub fn get_f64(&mut self) -> Draw<f64> {
        self.in_interval("f64", |s| s.raw_float())
    }

    /// A raw f32 mapped into `range`. NaN is still possible.
    pub fn get_f32_in(&mut self, range: impl RangeBounds<f32>) -> Draw<f32> {
        self.draw_raw_float(range)
    }

    pub fn get_f64_in(&mut self, range: impl RangeBounds<f64>) -> Draw<f64> {
        self.draw_raw_float(range)
    }

    /// A finite f32 in `range`.
    pub fn get_real_f32(&mut self, range: impl RangeBounds<f32>) -> Draw<f32> {
        self.draw_real(range)
    }

    /// A finite f64 in `range`. Never NaN or infinite.
    pub fn get_real_f64(&mut self, range: impl RangeBounds<f64>) -> Draw<f64> {
        self.draw_real(range)
    }

    fn draw_raw_float<F: FloatSample>(&mut self, range: impl RangeBounds<F>) -> Draw<F> {
        let (min, max) = float_bounds(range)?;
        self.in_interval(type_name::<F>(), |s| {
            let raw = s.raw_float::<F>()?;
            Ok(map_raw_float(raw, min, max)?)
        })
    }

    fn draw_real<F: FloatSample>(&mut self, range: impl RangeBounds<F>) -> Draw<F> {
        let (min, max) = float_bounds(range)?;
        let attempts = self.config.real_float_attempts.max(1);
        self.in_interval(type_name::<F>(), |s| {
            let mut raw = s.raw_float::<F>()?;
            for _ in 1..attempts {
                if raw.is_finite() {
                    break;
                }
                raw = s.raw_float::<F>()?;
            }
            Ok(map_real(force_finite(raw), min, max)?)
        })
    }

    // Characters and strings

    /// Any Unicode scalar value.
    pub fn get_char(&mut self) -> Draw<char> {
        self.get_char_in(ANY_CHAR)
    }

    pub fn get_ascii_char(&mut self) -> Draw<char> {
        self.get_char_in(ASCII)
    }

    /// `a-z` or `A-Z`.
    pub fn get_alpha_char(&mut self) -> Draw<char> {
        self.get_char_in(ALPHA)
    }

    pub fn get_alphanumeric_char(&mut self) -> Draw<char> {
        self.get_char_in(ALPHANUMERIC)
    }

    /// A character from the union of `ranges`, each code point equally likely.
    pub fn get_char_in(&mut self, ranges: &[RangeInclusive<char>]) -> Draw<char> {
        let code_points = code_point_ranges(ranges)?;
        self.in_interval("char", |s| {
            let raw = s.raw::<u32>()?;
            let code = map_to_ranges(raw, &code_points)?;
            char::from_u32(code).ok_or_else(|| {
                UsageError::UnsupportedBound(format!("{:#x} is not a character", code)).into()
            })
        })
    }

    pub fn get_string(&mut self, size: impl RangeBounds<usize>) -> Draw<String> {
        self.get_string_with(|s| s.get_char(), size)
    }

    pub fn get_ascii_string(&mut self, size: impl RangeBounds<usize>) -> Draw<String> {
        self.get_string_with(|s| s.get_ascii_char(), size)
    }

    pub fn get_alpha_string(&mut self, size: impl RangeBounds<usize>) -> Draw<String> {
        self.get_string_with(|s| s.get_alpha_char(), size)
    }

    pub fn get_alphanumeric_string(&mut self, size: impl RangeBounds<usize>) -> Draw<String> {
        self.get_string_with(|s| s.get_alphanumeric_char(), size)
    }

    /// A string of `size` characters, each drawn by `character`.
    pub fn get_string_with<G>(&mut self, character: G, size: impl RangeBounds<usize>) -> Draw<String>
    where
        G: FnMut(&mut Source) -> Draw<char>,
    {
        let (min, max) = self.size_bounds(size)?;
        self.in_interval("string", |s| {
            Ok(repeat(s, min, max, character)?.into_iter().collect())
        })
    }

    // Collections

    /// Resolves a size range. A missing upper bound becomes the lower bound
    /// plus `default-max-size`.
    pub fn size_bounds(&self, size: impl RangeBounds<usize>) -> Draw<(usize, usize)> {
        let min = match size.start_bound() {
            Bound::Included(&min) => min,
            Bound::Excluded(&min) => min.checked_add(1).ok_or_else(|| {
                UsageError::UnsupportedBound(format!("exclusive lower size bound {}", min))
            })?,
            Bound::Unbounded => 0,
        };
        let max = match size.end_bound() {
            Bound::Included(&max) => max,
            Bound::Excluded(&max) => max
                .checked_sub(1)
                .ok_or(UsageError::InvalidSize { min, max })?,
            Bound::Unbounded => min.saturating_add(self.config.default_max_size),
        };
        if min > max {
            return Err(UsageError::InvalidSize { min, max }.into());
        }
        Ok((min, max))
    }

    pub fn get_list<T, G>(&mut self, element: G, size: impl RangeBounds<usize>) -> Draw<Vec<T>>
    where
        T: Clone + 'static,
        G: FnMut(&mut Source) -> Draw<T>,
    {
        let (min, max) = self.size_bounds(size)?;
        self.in_interval("list", |s| repeat(s, min, max, element))
    }

    /// Exactly `N` elements.
    pub fn get_array<T, G, const N: usize>(&mut self, element: G) -> Draw<[T; N]>
    where
        T: Clone + 'static,
        G: FnMut(&mut Source) -> Draw<T>,
    {
        self.in_interval("array", |s| {
            let elements = repeat(s, N, N, element)?;
            let len = elements.len();
            <[T; N]>::try_from(elements)
                .map_err(|_| UsageError::InvalidSize { min: N, max: len }.into())
        })
    }

    /// A list whose elements are pairwise distinct under `same`.
    pub fn get_unique_list<T, G, E>(
        &mut self,
        element: G,
        size: impl RangeBounds<usize>,
        same: E,
    ) -> Draw<Vec<T>>
    where
        T: Clone + 'static,
        G: FnMut(&mut Source) -> Draw<T>,
        E: Fn(&T, &T) -> bool,
    {
        let (min, max) = self.size_bounds(size)?;
        self.in_interval("unique list", |s| {
            unique_repeat(s, "unique list", min, max, element, same)
        })
    }

    /// Distinct elements, iterated in ascending order so that replaying the
    /// same bytes always yields the same sequence.
    pub fn get_set<T, G>(&mut self, element: G, size: impl RangeBounds<usize>) -> Draw<BTreeSet<T>>
    where
        T: Clone + Ord + 'static,
        G: FnMut(&mut Source) -> Draw<T>,
    {
        let (min, max) = self.size_bounds(size)?;
        self.in_interval("set", |s| {
            let elements = unique_repeat(s, "set", min, max, element, |a, b| a == b)?;
            Ok(elements.into_iter().collect())
        })
    }

    pub fn get_map<K, V, GK, GV>(
        &mut self,
        key: GK,
        mut value: GV,
        size: impl RangeBounds<usize>,
    ) -> Draw<BTreeMap<K, V>>
    where
        K: Clone + Ord + 'static,
        V: Clone + 'static,
        GK: FnMut(&mut Source) -> Draw<K>,
        GV: FnMut(&mut Source) -> Draw<V>,
    {
        self.get_map_with(key, move |s: &mut Source, _: &K| value(s), size)
    }

    /// A map with distinct keys whose values are drawn knowing their key.
    /// Each entry's key and value share one element interval.
    pub fn get_map_with<K, V, GK, GV>(
        &mut self,
        mut key: GK,
        mut value: GV,
        size: impl RangeBounds<usize>,
    ) -> Draw<BTreeMap<K, V>>
    where
        K: Clone + Ord + 'static,
        V: Clone + 'static,
        GK: FnMut(&mut Source) -> Draw<K>,
        GV: FnMut(&mut Source, &K) -> Draw<V>,
    {
        let (min, max) = self.size_bounds(size)?;
        self.in_interval("map", |s| {
            let entries = unique_repeat(
                s,
                "map",
                min,
                max,
                |s| {
                    let k = s.in_interval("key", |s| key(s))?;
                    let v = s.in_interval("value", |s| value(s, &k))?;
                    Ok((k, v))
                },
                |a: &(K, V), b: &(K, V)| a.0 == b.0,
            )?;
            Ok(entries.into_iter().collect())
        })
    }

    /// Calls `f` a drawn number of times and returns how many.
    pub fn repeatedly<F>(&mut self, size: impl RangeBounds<usize>, f: F) -> Draw<usize>
    where
        F: FnMut(&mut Source) -> Draw<()>,
    {
        let (min, max) = self.size_bounds(size)?;
        self.in_interval("repeatedly", |s| Ok(repeat(s, min, max, f)?.len()))
    }

    // Choices and generators

    /// A uniformly chosen index into a collection of `len` items.
    pub fn pick_index(&mut self, len: usize) -> Draw<usize> {
        if len == 0 {
            return Err(UsageError::EmptyChoice.into());
        }
        self.in_interval("index", |s| {
            let raw = s.raw::<u32>()?;
            Ok(scale_index(raw, len as u128) as usize)
        })
    }

    pub fn pick<'a, T>(&mut self, choices: &'a [T]) -> Draw<&'a T> {
        let index = self.pick_index(choices.len())?;
        Ok(&choices[index])
    }

    /// Runs `generator` inside an interval named after `T`.
    pub fn generate<T, G>(&mut self, generator: &G) -> Draw<T>
    where
        T: Clone + 'static,
        G: Generator<T> + ?Sized,
    {
        self.in_interval(type_name::<T>(), |s| generator.generate(s))
    }

    /// Draws a `T` with the generator registered for it.
    pub fn generate_registered<T: Clone + 'static>(&mut self) -> Draw<T> {
        let generator = self
            .registry
            .get::<T>()
            .ok_or(UsageError::UnregisteredGenerator(type_name::<T>()))?;
        self.in_interval(type_name::<T>(), |s| generator(s))
    }
}

/// Code point ranges for `ranges`, split around the surrogate block.
fn code_point_ranges(ranges: &[RangeInclusive<char>]) -> Draw<Vec<RangeInclusive<u32>>> {
    if ranges.is_empty() {
        return Err(UsageError::EmptyChoice.into());
    }
    let mut out = Vec::with_capacity(ranges.len() + 1);
    for range in ranges {
        let (start, end) = (*range.start() as u32, *range.end() as u32);
        if end < start {
            let (start, end) = (range.start().escape_debug(), range.end().escape_debug());
            return Err(UsageError::invalid_range(start, end).into());
        }
        if start < SURROGATE_START && end > SURROGATE_END {
            out.push(start..=SURROGATE_START - 1);
            out.push(SURROGATE_END + 1..=end);
        } else {
            out.push(start..=end);
        }
    }
    Ok(out)
}
