// Repetition control used by every collection draw.
//
// A `Repeat` decides, one step at a time, whether to produce another
// element. Each decision is its own small range draw so that a shrinker can
// delete an element by removing its decision byte and the element's bytes.

use crate::error::{Draw, UniqueValuesExhausted, UsageError};
use crate::source::Source;

/// Range every continue decision is mapped onto.
const DECISION_SCALE: i8 = 100;

#[derive(Debug, Clone)]
pub struct Repeat {
    min_count: usize,
    max_count: usize,
    continue_below: i8,

    current_count: usize,
}

impl Repeat {
    /// `average_extra` is the expected number of elements past `min_count`
    /// when there is room for them; it is capped at half the free space.
    pub fn new(min_count: usize, max_count: usize, average_extra: f64) -> Repeat {
        let room = max_count.saturating_sub(min_count) as f64 / 2.0;
        let extra = average_extra.max(0.0).min(room);
        let p_continue = 1.0 - 1.0 / (1.0 + extra);
        Repeat {
            min_count,
            max_count,
            continue_below: (p_continue * f64::from(DECISION_SCALE)).round() as i8,
            current_count: 0,
        }
    }

    pub fn count(&self) -> usize {
        self.current_count
    }

    /// Takes back the most recently accepted element.
    pub fn reject(&mut self) {
        assert!(self.current_count > 0);
        self.current_count -= 1;
    }

    pub fn should_continue(&mut self, source: &mut Source) -> Draw<bool> {
        if self.min_count == self.max_count {
            if self.current_count < self.max_count {
                self.current_count += 1;
                return Ok(true);
            } else {
                return Ok(false);
            }
        }

        // forced steps still consume their decision so the byte layout does
        // not depend on how close the count is to the bounds
        let roll = source.sample_range::<i8>(0, DECISION_SCALE - 1)?;
        if self.current_count < self.min_count {
            self.current_count += 1;
            return Ok(true);
        } else if self.current_count >= self.max_count {
            return Ok(false);
        }

        let result = roll < self.continue_below;
        if result {
            self.current_count += 1;
        }
        Ok(result)
    }
}

fn check_size(min: usize, max: usize) -> Draw<()> {
    if min > max {
        return Err(UsageError::InvalidSize { min, max }.into());
    }
    Ok(())
}

/// Draws between `min` and `max` elements, each inside its own interval.
pub fn repeat<T, F>(source: &mut Source, min: usize, max: usize, mut element: F) -> Draw<Vec<T>>
where
    T: Clone + 'static,
    F: FnMut(&mut Source) -> Draw<T>,
{
    check_size(min, max)?;
    let mut repeat = Repeat::new(min, max, source.config().average_extra_elements);
    let mut out = Vec::with_capacity(min);
    while repeat.should_continue(source)? {
        out.push(source.in_interval("element", |s| element(s))?);
    }
    Ok(out)
}

/// Like `repeat`, but a candidate equal (by `same`) to an accepted element is
/// discarded and retried. After `unique-attempts` consecutive duplicates the
/// draw stops, failing with `Exhausted` if fewer than `min` were accepted.
pub fn unique_repeat<T, F, E>(
    source: &mut Source,
    label: &str,
    min: usize,
    max: usize,
    mut element: F,
    same: E,
) -> Draw<Vec<T>>
where
    T: Clone + 'static,
    F: FnMut(&mut Source) -> Draw<T>,
    E: Fn(&T, &T) -> bool,
{
    check_size(min, max)?;
    let budget = source.config().unique_attempts.max(1);
    let mut repeat = Repeat::new(min, max, source.config().average_extra_elements);
    let mut out: Vec<T> = Vec::with_capacity(min);
    let mut failures = 0;

    while repeat.should_continue(source)? {
        let candidate = source.in_interval("element", |s| element(s))?;
        if out.iter().any(|accepted| same(accepted, &candidate)) {
            repeat.reject();
            failures += 1;
            if failures >= budget {
                if out.len() < min {
                    return Err(UniqueValuesExhausted {
                        label: label.to_owned(),
                        min,
                        accepted: out.len(),
                        attempts: failures,
                    }
                    .into());
                }
                break;
            }
        } else {
            failures = 0;
            out.push(candidate);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DrawError;

    fn test_source() -> Source {
        let data: Vec<u8> = (0..10000u32).map(|i| ((i * 17 + 42) % 256) as u8).collect();
        Source::from_bytes(data)
    }

    #[test]
    fn test_repeat_fixed_count_draws_no_decisions() {
        let mut source = test_source();
        let mut repeat = Repeat::new(5, 5, 0.0);
        let mut count = 0;
        while repeat.should_continue(&mut source).unwrap() {
            count += 1;
            assert!(count <= 5, "Fixed repeat exceeded maximum");
        }
        assert_eq!(count, 5);
        assert_eq!(source.position(), 0);
    }

    #[test]
    fn test_repeat_min_max_constraints() {
        let mut source = test_source();
        for (min_count, max_count, expected) in [(0, 0, 1.0), (1, 1, 5.0), (3, 3, 10.0), (2, 8, 3.0), (0, 64, 4.0)] {
            let mut repeat = Repeat::new(min_count, max_count, expected);
            let mut count = 0;
            while repeat.should_continue(&mut source).unwrap() {
                count += 1;
                assert!(count <= max_count + 5, "Repeat exceeded safety limit");
            }
            assert!(count >= min_count, "Count {} below minimum {}", count, min_count);
            assert!(count <= max_count, "Count {} above maximum {}", count, max_count);
        }
    }

    #[test]
    fn test_forced_steps_consume_a_decision() {
        let mut source = test_source();
        let mut repeat = Repeat::new(2, 4, 4.0);
        assert!(repeat.should_continue(&mut source).unwrap());
        assert!(repeat.should_continue(&mut source).unwrap());
        assert_eq!(source.position(), 2);
    }

    #[test]
    fn test_zero_average_always_stops_at_min() {
        let mut source = test_source();
        let mut repeat = Repeat::new(1, 10, 0.0);
        assert!(repeat.should_continue(&mut source).unwrap());
        assert!(!repeat.should_continue(&mut source).unwrap());
        assert_eq!(repeat.count(), 1);
    }

    #[test]
    fn test_decision_zero_continues_and_top_stops() {
        // i8::MIN maps to 0 (continue), i8::MAX maps to 99 (stop)
        let mut source = Source::from_bytes(vec![0x80, 0x80, 0x7f]);
        let mut repeat = Repeat::new(0, 10, 4.0);
        assert!(repeat.should_continue(&mut source).unwrap());
        assert!(repeat.should_continue(&mut source).unwrap());
        assert!(!repeat.should_continue(&mut source).unwrap());
    }

    #[test]
    fn test_reject_takes_back_a_count() {
        let mut source = test_source();
        let mut repeat = Repeat::new(3, 3, 0.0);
        assert!(repeat.should_continue(&mut source).unwrap());
        repeat.reject();
        assert_eq!(repeat.count(), 0);
    }

    #[test]
    fn test_repeat_rejects_inverted_sizes() {
        let mut source = test_source();
        assert_eq!(
            repeat(&mut source, 3, 2, |s| s.get_bool()),
            Err(DrawError::Usage(UsageError::InvalidSize { min: 3, max: 2 }))
        );
    }

    #[test]
    fn test_unique_repeat_of_a_constant_is_exhausted() {
        let mut source = test_source();
        let err = unique_repeat(&mut source, "set", 5, 5, |_| Ok(7u8), |a, b| a == b).unwrap_err();
        match err {
            DrawError::Exhausted(exhausted) => {
                assert_eq!(exhausted.label, "set");
                assert_eq!(exhausted.min, 5);
                assert_eq!(exhausted.accepted, 1);
                assert_eq!(exhausted.attempts, source.config().unique_attempts);
                assert!(exhausted.to_string().contains("Decrease the minimum size"));
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
        // the failed draw leaves no open intervals behind
        source.snapshot_tree().unwrap().validate().unwrap();
    }

    #[test]
    fn test_unique_repeat_stops_quietly_above_min() {
        let mut source = test_source();
        let values = unique_repeat(&mut source, "set", 0, 5, |s| s.get_u8(0..=1), |a, b| a == b).unwrap();
        assert!(values.len() <= 2);
        let mut distinct = values.clone();
        distinct.sort();
        distinct.dedup();
        assert_eq!(distinct.len(), values.len());
    }
}
