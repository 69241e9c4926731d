// Mapping raw fixed-width samples into caller-specified ranges.
//
// Every integer draw reads one full-width raw value, whatever the requested
// range, and rescales it linearly from the type's whole domain onto
// `[min, max]`. The scaling is done in u128 so that no width overflows, and
// is rounded to nearest. The domain size `MAX - MIN` is always odd, so no
// scaled value ever falls exactly halfway between two results. Floating
// point draws come in two flavours: raw ones that reinterpret the bit
// pattern (so NaN and infinities are possible) and real ones that only
// ever produce finite values.

use crate::error::UsageError;

use byteorder::{BigEndian, ByteOrder};
use std::fmt::{Debug, Display};
use std::ops::{Bound, RangeBounds, RangeInclusive};

/// A fixed-width integer that can be decoded from raw bytes and mapped
/// into a range.
pub trait RangeSample: Copy + Ord + Debug + Display + 'static {
    /// Number of raw bytes one sample consumes.
    const WIDTH: usize;
    const MIN: Self;
    const MAX: Self;

    /// Decodes a big-endian sample. `bytes` is exactly `WIDTH` long.
    fn from_raw(bytes: &[u8]) -> Self;

    fn to_i128(self) -> i128;

    /// Inverse of `to_i128` for values known to be in the domain.
    fn from_i128(value: i128) -> Self;

    /// Previous value, if any. Used to turn exclusive upper bounds inclusive.
    fn predecessor(self) -> Option<Self>;

    /// Next value, if any. Used to turn exclusive lower bounds inclusive.
    fn successor(self) -> Option<Self>;
}

macro_rules! range_sample {
    ($t:ty, $width:expr, $decode:expr) => {
        impl RangeSample for $t {
            const WIDTH: usize = $width;
            const MIN: $t = <$t>::MIN;
            const MAX: $t = <$t>::MAX;

            fn from_raw(bytes: &[u8]) -> $t {
                let decode: fn(&[u8]) -> $t = $decode;
                decode(bytes)
            }

            fn to_i128(self) -> i128 {
                self as i128
            }

            fn from_i128(value: i128) -> $t {
                value as $t
            }

            fn predecessor(self) -> Option<$t> {
                self.checked_sub(1)
            }

            fn successor(self) -> Option<$t> {
                self.checked_add(1)
            }
        }
    };
}

range_sample!(i8, 1, |bytes| bytes[0] as i8);
range_sample!(i16, 2, BigEndian::read_i16);
range_sample!(i32, 4, BigEndian::read_i32);
range_sample!(i64, 8, BigEndian::read_i64);
range_sample!(u8, 1, |bytes| bytes[0]);
range_sample!(u16, 2, BigEndian::read_u16);
range_sample!(u32, 4, BigEndian::read_u32);
range_sample!(u64, 8, BigEndian::read_u64);

/// Maps `raw` from the full domain of `T` onto `[min, max]`.
///
/// The full domain passes `raw` through untouched and a single-value range
/// returns `min` without further work. Otherwise the offset of `raw` from
/// `T::MIN` is scaled by `(max - min) / (T::MAX - T::MIN)`, rounded to
/// nearest and clamped into the range.
pub fn map_to_range<T: RangeSample>(raw: T, min: T, max: T) -> Result<T, UsageError> {
    if min == T::MIN && max == T::MAX {
        return Ok(raw);
    }
    if min == max {
        return Ok(min);
    }
    if max < min {
        return Err(UsageError::invalid_range(min, max));
    }

    let domain = (T::MAX.to_i128() - T::MIN.to_i128()) as u128;
    let span = (max.to_i128() - min.to_i128()) as u128;
    let offset = (raw.to_i128() - T::MIN.to_i128()) as u128;

    let quotient = scale_rounded(offset, span, domain).min(span);

    let value = min.to_i128() + quotient as i128;
    Ok(T::from_i128(value.clamp(min.to_i128(), max.to_i128())))
}

/// Maps `raw` onto the concatenation of `ranges`, as if they were laid end
/// to end and a single index drawn over the total.
pub fn map_to_ranges<T: RangeSample>(raw: T, ranges: &[RangeInclusive<T>]) -> Result<T, UsageError> {
    if ranges.is_empty() {
        return Err(UsageError::EmptyChoice);
    }
    let mut total: i128 = 0;
    for range in ranges {
        if range.end() < range.start() {
            return Err(UsageError::invalid_range(*range.start(), *range.end()));
        }
        total += range.end().to_i128() - range.start().to_i128() + 1;
    }

    let index = scale_index(raw, total as u128);
    let mut remaining = index as i128;
    for range in ranges {
        let size = range.end().to_i128() - range.start().to_i128() + 1;
        if remaining < size {
            return Ok(T::from_i128(range.start().to_i128() + remaining));
        }
        remaining -= size;
    }
    // scale_index never exceeds total - 1
    Ok(*ranges[ranges.len() - 1].end())
}

/// Maps a raw sample onto `[0, count - 1]` with the same rounding as
/// `map_to_range`. `count` must be non-zero.
pub(crate) fn scale_index<T: RangeSample>(raw: T, count: u128) -> u128 {
    let domain = (T::MAX.to_i128() - T::MIN.to_i128()) as u128;
    let offset = (raw.to_i128() - T::MIN.to_i128()) as u128;
    let last = count - 1;
    if last == 0 {
        return 0;
    }
    if last == domain {
        return offset;
    }
    // u128 only overflows here for 64-bit samples with more than 2^64 choices,
    // which a slice cannot hold.
    scale_rounded(offset, last, domain).min(last)
}

/// `offset * span / domain` rounded to nearest. `domain` is `2^W - 1`, which
/// is odd, so twice the remainder never equals it and there are no ties.
fn scale_rounded(offset: u128, span: u128, domain: u128) -> u128 {
    let scaled = offset * span;
    let quotient = scaled / domain;
    if 2 * (scaled % domain) > domain {
        quotient + 1
    } else {
        quotient
    }
}

/// Resolves any `RangeBounds` into an inclusive `(min, max)` pair.
/// Unbounded ends default to the type's limits.
pub fn inclusive_bounds<T: RangeSample>(range: impl RangeBounds<T>) -> Result<(T, T), UsageError> {
    let min = match range.start_bound() {
        Bound::Included(&min) => min,
        Bound::Excluded(&min) => min.successor().ok_or_else(|| {
            UsageError::UnsupportedBound(format!("exclusive lower bound {} is empty", min))
        })?,
        Bound::Unbounded => T::MIN,
    };
    let max = match range.end_bound() {
        Bound::Included(&max) => max,
        Bound::Excluded(&max) => max.predecessor().ok_or_else(|| {
            UsageError::UnsupportedBound(format!("exclusive upper bound {} is empty", max))
        })?,
        Bound::Unbounded => T::MAX,
    };
    if max < min {
        return Err(UsageError::invalid_range(min, max));
    }
    Ok((min, max))
}

/// IEEE-754 binary floating point of a fixed width.
pub trait FloatSample: Copy + PartialOrd + Debug + Display + 'static {
    const WIDTH: usize;
    const MAX: Self;
    const LOWEST: Self;
    /// The most significant exponent bit. Clearing it makes any value finite.
    const EXPONENT_TOP_BIT: u64;

    fn from_bits_u64(bits: u64) -> Self;
    fn to_bits_u64(self) -> u64;
    fn from_raw(bytes: &[u8]) -> Self;
    fn is_finite(self) -> bool;
    fn is_nan(self) -> bool;
    fn to_f64(self) -> f64;
    fn from_f64(value: f64) -> Self;
}

impl FloatSample for f32 {
    const WIDTH: usize = 4;
    const MAX: f32 = f32::MAX;
    const LOWEST: f32 = f32::MIN;
    const EXPONENT_TOP_BIT: u64 = 1 << 30;

    fn from_bits_u64(bits: u64) -> f32 {
        f32::from_bits(bits as u32)
    }

    fn to_bits_u64(self) -> u64 {
        u64::from(self.to_bits())
    }

    fn from_raw(bytes: &[u8]) -> f32 {
        BigEndian::read_f32(bytes)
    }

    fn is_finite(self) -> bool {
        f32::is_finite(self)
    }

    fn is_nan(self) -> bool {
        f32::is_nan(self)
    }

    fn to_f64(self) -> f64 {
        f64::from(self)
    }

    fn from_f64(value: f64) -> f32 {
        value as f32
    }
}

impl FloatSample for f64 {
    const WIDTH: usize = 8;
    const MAX: f64 = f64::MAX;
    const LOWEST: f64 = f64::MIN;
    const EXPONENT_TOP_BIT: u64 = 1 << 62;

    fn from_bits_u64(bits: u64) -> f64 {
        f64::from_bits(bits)
    }

    fn to_bits_u64(self) -> u64 {
        self.to_bits()
    }

    fn from_raw(bytes: &[u8]) -> f64 {
        BigEndian::read_f64(bytes)
    }

    fn is_finite(self) -> bool {
        f64::is_finite(self)
    }

    fn is_nan(self) -> bool {
        f64::is_nan(self)
    }

    fn to_f64(self) -> f64 {
        self
    }

    fn from_f64(value: f64) -> f64 {
        value
    }
}

/// Turns a non-finite sample into a finite one by clearing its top exponent bit.
pub fn force_finite<F: FloatSample>(raw: F) -> F {
    if raw.is_finite() {
        raw
    } else {
        F::from_bits_u64(raw.to_bits_u64() & !F::EXPONENT_TOP_BIT)
    }
}

/// Maps `raw` onto `[min, max]` by its fraction of the finite domain
/// `[LOWEST, MAX]`. Bounds must be finite with `min <= max`; a non-finite
/// `raw` is first made finite with `force_finite`.
pub fn map_real<F: FloatSample>(raw: F, min: F, max: F) -> Result<F, UsageError> {
    check_float_bounds(min, max)?;
    let raw = force_finite(raw);
    if min.to_bits_u64() == F::LOWEST.to_bits_u64() && max.to_bits_u64() == F::MAX.to_bits_u64() {
        return Ok(raw);
    }
    if min == max {
        return Ok(min);
    }

    let fraction = raw.to_f64() * 0.5 / F::MAX.to_f64() + 0.5;
    let fraction = fraction.clamp(0.0, 1.0);
    let (lo, hi) = (min.to_f64(), max.to_f64());
    let value = lo * (1.0 - fraction) + hi * fraction;
    let value = F::from_f64(value.clamp(lo, hi));
    // narrowing to f32 can round past a bound
    Ok(if value < min {
        min
    } else if value > max {
        max
    } else {
        value
    })
}

/// Maps any raw sample onto `[min, max]`. NaN stays NaN and infinities
/// pin to the bound on their side.
pub fn map_raw_float<F: FloatSample>(raw: F, min: F, max: F) -> Result<F, UsageError> {
    check_float_bounds(min, max)?;
    if raw.is_nan() {
        return Ok(raw);
    }
    if !raw.is_finite() {
        return Ok(if raw > F::MAX { max } else { min });
    }
    map_real(raw, min, max)
}

fn check_float_bounds<F: FloatSample>(min: F, max: F) -> Result<(), UsageError> {
    if !min.is_finite() || !max.is_finite() {
        return Err(UsageError::UnsupportedBound(format!(
            "float bounds must be finite, got [{}, {}]",
            min, max
        )));
    }
    if max < min {
        return Err(UsageError::invalid_range(min, max));
    }
    Ok(())
}

/// Resolves float `RangeBounds` into finite inclusive bounds. Unbounded ends
/// default to the finite extremes; exclusive bounds are rejected.
pub fn float_bounds<F: FloatSample>(range: impl RangeBounds<F>) -> Result<(F, F), UsageError> {
    let min = match range.start_bound() {
        Bound::Included(&min) => min,
        Bound::Unbounded => F::LOWEST,
        Bound::Excluded(&min) => {
            return Err(UsageError::UnsupportedBound(format!(
                "exclusive float bound {}",
                min
            )))
        }
    };
    let max = match range.end_bound() {
        Bound::Included(&max) => max,
        Bound::Unbounded => F::MAX,
        Bound::Excluded(&max) => {
            return Err(UsageError::UnsupportedBound(format!(
                "exclusive float bound {}",
                max
            )))
        }
    };
    check_float_bounds(min, max)?;
    Ok((min, max))
}
