//! Provenance tracking: which bytes produced which value.
//!
//! Generators open an interval before drawing and close it with the value
//! they built. Intervals opened while another one is open become its
//! children, so a run leaves behind a tree whose nodes each cover the exact
//! byte range consumed to build one value. A shrinker uses that tree to
//! decide which bytes to zero, truncate or delete.

use crate::error::UsageError;

use serde::{Serialize, Serializer};
use std::any::{type_name, Any};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

pub type IntervalId = u64;

/// One recorded byte range `[start, end)` and the value it produced.
#[derive(Clone, Serialize)]
pub struct Interval {
    id: IntervalId,
    parent: Option<IntervalId>,
    name: Option<String>,
    start: u64,
    end: Option<u64>,
    #[serde(skip)]
    value: Option<Rc<dyn Any>>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    value_type: Option<&'static str>,
}

impl Interval {
    pub fn id(&self) -> IntervalId {
        self.id
    }

    pub fn parent(&self) -> Option<IntervalId> {
        self.parent
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn end(&self) -> Option<u64> {
        self.end
    }

    /// Number of bytes covered, once closed.
    pub fn len(&self) -> Option<u64> {
        self.end.map(|end| end - self.start)
    }

    pub fn is_closed(&self) -> bool {
        self.end.is_some()
    }

    /// The recorded value, if one was attached and it is a `T`.
    pub fn value<T: Any>(&self) -> Option<&T> {
        self.value.as_ref().and_then(|value| value.downcast_ref::<T>())
    }

    pub fn has_value(&self) -> bool {
        self.value.is_some()
    }

    pub fn value_type(&self) -> Option<&'static str> {
        self.value_type
    }
}

impl fmt::Debug for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interval")
            .field("id", &self.id)
            .field("parent", &self.parent)
            .field("name", &self.name)
            .field("start", &self.start)
            .field("end", &self.end)
            .field("value_type", &self.value_type)
            .finish()
    }
}

/// The push/pop stack over a trial's intervals.
#[derive(Debug, Default)]
pub struct IntervalTracker {
    intervals: Vec<Interval>,
    open: Vec<IntervalId>,
}

impl IntervalTracker {
    pub fn new() -> IntervalTracker {
        IntervalTracker::default()
    }

    /// Opens an interval starting at `position`, as a child of the innermost
    /// open interval.
    pub fn push(&mut self, name: Option<&str>, position: u64) -> IntervalId {
        let id = self.intervals.len() as IntervalId;
        self.intervals.push(Interval {
            id,
            parent: self.open.last().copied(),
            name: name.map(str::to_owned),
            start: position,
            end: None,
            value: None,
            value_type: None,
        });
        self.open.push(id);
        id
    }

    /// Closes the innermost open interval, which must be `id`, and attaches
    /// `value` to it.
    pub fn pop<T: Any>(&mut self, id: IntervalId, position: u64, value: T) -> Result<(), UsageError> {
        self.close(id, position, Some((Rc::new(value), type_name::<T>())))
    }

    /// Closes the innermost open interval without a value.
    pub fn abandon(&mut self, id: IntervalId, position: u64) -> Result<(), UsageError> {
        self.close(id, position, None)
    }

    /// Closes every open interval without a value, innermost first.
    pub fn abandon_all(&mut self, position: u64) {
        while let Some(id) = self.open.pop() {
            let interval = &mut self.intervals[id as usize];
            interval.end = Some(position.max(interval.start));
        }
    }

    /// Closes open intervals without values until `id` itself is closed.
    /// Does nothing if `id` is not open.
    pub fn abandon_through(&mut self, id: IntervalId, position: u64) {
        if !self.open.contains(&id) {
            return;
        }
        while let Some(open) = self.open.pop() {
            let interval = &mut self.intervals[open as usize];
            interval.end = Some(position.max(interval.start));
            if open == id {
                break;
            }
        }
    }

    fn close(
        &mut self,
        id: IntervalId,
        position: u64,
        value: Option<(Rc<dyn Any>, &'static str)>,
    ) -> Result<(), UsageError> {
        let innermost = self.open.last().copied();
        if innermost != Some(id) {
            return Err(UsageError::IntervalMismatch {
                expected: innermost,
                found: id,
            });
        }
        self.open.pop();

        let interval = &mut self.intervals[id as usize];
        interval.end = Some(position.max(interval.start));
        if let Some((value, value_type)) = value {
            interval.value = Some(value);
            interval.value_type = Some(value_type);
        }
        Ok(())
    }

    pub fn innermost(&self) -> Option<IntervalId> {
        self.open.last().copied()
    }

    pub fn depth(&self) -> usize {
        self.open.len()
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// Read-only copy of the tree. Fails while any interval is still open.
    pub fn snapshot(&self) -> Result<IntervalTree, UsageError> {
        if !self.open.is_empty() {
            return Err(UsageError::OpenIntervals {
                count: self.open.len(),
            });
        }
        Ok(IntervalTree {
            intervals: self.intervals.clone(),
        })
    }

    pub fn into_tree(mut self, position: u64) -> IntervalTree {
        self.abandon_all(position);
        IntervalTree {
            intervals: self.intervals,
        }
    }
}

/// A well-formedness violation found by `IntervalTree::validate`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Malformed {
    Open(IntervalId),
    Inverted(IntervalId),
    OutsideParent { child: IntervalId, parent: IntervalId },
    Overlapping { first: IntervalId, second: IntervalId },
}

/// Closed intervals of one trial, indexed by id.
#[derive(Clone, Debug, Default)]
pub struct IntervalTree {
    intervals: Vec<Interval>,
}

impl Serialize for IntervalTree {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.intervals.serialize(serializer)
    }
}

impl IntervalTree {
    pub fn get(&self, id: IntervalId) -> Option<&Interval> {
        self.intervals.get(id as usize)
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// All intervals in the order they were opened.
    pub fn iter(&self) -> impl Iterator<Item = &Interval> + '_ {
        self.intervals.iter()
    }

    pub fn roots(&self) -> impl Iterator<Item = &Interval> + '_ {
        self.intervals.iter().filter(|i| i.parent.is_none())
    }

    pub fn children(&self, id: IntervalId) -> impl Iterator<Item = &Interval> + '_ {
        self.intervals.iter().filter(move |i| i.parent == Some(id))
    }

    /// The shape of the tree without values: `(parent, name, start, end)`
    /// for each interval in opening order.
    pub fn shape(&self) -> Vec<(Option<IntervalId>, Option<String>, u64, Option<u64>)> {
        self.intervals
            .iter()
            .map(|i| (i.parent, i.name.clone(), i.start, i.end))
            .collect()
    }

    /// Checks that every interval is closed with `end >= start`, that
    /// children sit inside their parents, and that siblings do not overlap.
    pub fn validate(&self) -> Result<(), Malformed> {
        for interval in &self.intervals {
            let end = interval.end.ok_or(Malformed::Open(interval.id))?;
            if end < interval.start {
                return Err(Malformed::Inverted(interval.id));
            }
            if let Some(parent_id) = interval.parent {
                let parent = &self.intervals[parent_id as usize];
                let parent_end = parent.end.ok_or(Malformed::Open(parent_id))?;
                if interval.start < parent.start || end > parent_end {
                    return Err(Malformed::OutsideParent {
                        child: interval.id,
                        parent: parent_id,
                    });
                }
            }
        }

        // intervals are stored in opening order, so siblings appear in order
        let mut last_sibling: HashMap<Option<IntervalId>, &Interval> = HashMap::new();
        for interval in &self.intervals {
            if let Some(previous) = last_sibling.insert(interval.parent, interval) {
                if interval.start < previous.end.unwrap_or(previous.start) {
                    return Err(Malformed::Overlapping {
                        first: previous.id,
                        second: interval.id,
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_pushes_build_a_tree() {
        let mut tracker = IntervalTracker::new();
        let outer = tracker.push(Some("list"), 0);
        let first = tracker.push(Some("element"), 1);
        tracker.pop(first, 5, 7i32).unwrap();
        let second = tracker.push(None, 5);
        tracker.pop(second, 9, 8i32).unwrap();
        tracker.pop(outer, 10, vec![7i32, 8]).unwrap();

        let tree = tracker.snapshot().unwrap();
        assert_eq!(tree.len(), 3);
        assert_eq!(tree.roots().count(), 1);
        let children: Vec<_> = tree.children(outer).map(|i| i.id()).collect();
        assert_eq!(children, vec![first, second]);
        assert_eq!(tree.get(first).unwrap().value::<i32>(), Some(&7));
        assert_eq!(tree.get(first).unwrap().value::<u8>(), None);
        assert_eq!(tree.get(outer).unwrap().value::<Vec<i32>>(), Some(&vec![7, 8]));
        assert_eq!(tree.get(second).unwrap().name(), None);
        assert_eq!(tree.get(outer).unwrap().len(), Some(10));
        tree.validate().unwrap();
    }

    #[test]
    fn popping_out_of_order_is_rejected() {
        let mut tracker = IntervalTracker::new();
        let outer = tracker.push(Some("outer"), 0);
        let inner = tracker.push(Some("inner"), 0);
        assert_eq!(
            tracker.pop(outer, 1, ()),
            Err(UsageError::IntervalMismatch {
                expected: Some(inner),
                found: outer
            })
        );
        tracker.pop(inner, 1, ()).unwrap();
        tracker.pop(outer, 1, ()).unwrap();
        assert_eq!(
            tracker.pop(outer, 1, ()),
            Err(UsageError::IntervalMismatch {
                expected: None,
                found: outer
            })
        );
    }

    #[test]
    fn snapshot_requires_everything_closed() {
        let mut tracker = IntervalTracker::new();
        let id = tracker.push(Some("x"), 0);
        assert_eq!(
            tracker.snapshot().unwrap_err(),
            UsageError::OpenIntervals { count: 1 }
        );
        tracker.abandon(id, 3).unwrap();
        let tree = tracker.snapshot().unwrap();
        assert!(!tree.get(id).unwrap().has_value());
        assert_eq!(tree.get(id).unwrap().end(), Some(3));
    }

    #[test]
    fn abandon_all_closes_innermost_first() {
        let mut tracker = IntervalTracker::new();
        tracker.push(Some("a"), 0);
        tracker.push(Some("b"), 2);
        tracker.abandon_all(4);
        assert_eq!(tracker.depth(), 0);
        let tree = tracker.snapshot().unwrap();
        tree.validate().unwrap();
        assert!(tree.iter().all(|i| i.end() == Some(4)));
    }

    #[test]
    fn abandon_through_leaves_outer_intervals_open() {
        let mut tracker = IntervalTracker::new();
        let outer = tracker.push(Some("outer"), 0);
        let middle = tracker.push(Some("middle"), 1);
        tracker.push(Some("inner"), 2);
        tracker.abandon_through(middle, 3);
        assert_eq!(tracker.innermost(), Some(outer));
        tracker.abandon_through(middle, 5);
        assert_eq!(tracker.depth(), 1);
        tracker.pop(outer, 4, ()).unwrap();
        tracker.snapshot().unwrap().validate().unwrap();
    }

    #[test]
    fn validate_detects_overlapping_siblings() {
        let mut tracker = IntervalTracker::new();
        let a = tracker.push(None, 0);
        tracker.pop(a, 4, ()).unwrap();
        let b = tracker.push(None, 2);
        tracker.pop(b, 6, ()).unwrap();
        let tree = tracker.snapshot().unwrap();
        assert_eq!(
            tree.validate(),
            Err(Malformed::Overlapping { first: a, second: b })
        );
    }

    #[test]
    fn serializes_without_values() {
        let mut tracker = IntervalTracker::new();
        let id = tracker.push(Some("i32"), 0);
        tracker.pop(id, 4, 5i32).unwrap();
        let json = serde_json::to_value(tracker.snapshot().unwrap()).unwrap();
        assert_eq!(
            json,
            serde_json::json!([
                {"id": 0, "parent": null, "name": "i32", "start": 0, "end": 4, "type": "i32"}
            ])
        );
    }
}
