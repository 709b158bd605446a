//! Generic, tag-addressable undo stack.
//!
//! Every reversible feature owns one `SnapshotStack` and pushes a copy of its state
//! before mutating it. The stack is bounded: once it holds `max_size` snapshots the
//! oldest ones are evicted first. Consecutive pushes that compare equal under the
//! configured predicate are dropped, so two adjacent snapshots are never identical.

pub mod editors;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

pub use editors::{DescriptionFields, DescriptionParser, DimensionEditor, Dimensions, PromptRegenerator};

/// Default number of snapshots retained by a stack.
pub const DEFAULT_MAX_SIZE: usize = 10;

/// An immutable captured copy of state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot<T> {
    /// The captured state
    pub state: T,
    /// Optional tag used by `undo_by_tag`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    /// When the snapshot was pushed
    pub timestamp: DateTime<Utc>,
    /// Human-readable description of the change that followed the snapshot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl<T> StateSnapshot<T> {
    fn new(state: T, tag: Option<&str>, description: Option<&str>) -> Self {
        Self {
            state,
            tag: tag.map(str::to_string),
            timestamp: Utc::now(),
            description: description.map(str::to_string),
        }
    }

    /// Check whether this snapshot carries `tag`.
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tag.as_deref() == Some(tag)
    }
}

type EqualityFn<T> = Box<dyn Fn(&T, &T) -> bool + Send + Sync>;

/// Bounded memento stack.
pub struct SnapshotStack<T> {
    entries: VecDeque<StateSnapshot<T>>,
    max_size: usize,
    equals: EqualityFn<T>,
}

impl<T: PartialEq + 'static> SnapshotStack<T> {
    /// Create a stack with the default size bound and structural equality.
    pub fn new() -> Self {
        Self::with_max_size(DEFAULT_MAX_SIZE)
    }

    /// Create a stack holding at most `max_size` snapshots, deduplicated by `PartialEq`.
    pub fn with_max_size(max_size: usize) -> Self {
        Self::with_equality(max_size, |a: &T, b: &T| a == b)
    }
}

impl<T: PartialEq + 'static> Default for SnapshotStack<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SnapshotStack<T> {
    /// Create a stack with a custom equality predicate used for deduplication.
    ///
    /// A `max_size` of zero is treated as one; a stack that can hold nothing would
    /// silently discard every push.
    pub fn with_equality<F>(max_size: usize, equals: F) -> Self
    where
        F: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        Self {
            entries: VecDeque::new(),
            max_size: max_size.max(1),
            equals: Box::new(equals),
        }
    }

    /// Push a snapshot of `state`.
    ///
    /// Returns `false` when the push was dropped because `state` equals the most
    /// recent snapshot.
    pub fn push_snapshot(&mut self, state: T, tag: Option<&str>, description: Option<&str>) -> bool {
        if let Some(top) = self.entries.back()
            && (self.equals)(&top.state, &state)
        {
            return false;
        }

        self.entries
            .push_back(StateSnapshot::new(state, tag, description));
        while self.entries.len() > self.max_size {
            self.entries.pop_front();
        }
        true
    }

    /// Remove and return the most recent snapshot.
    pub fn undo(&mut self) -> Option<StateSnapshot<T>> {
        self.entries.pop_back()
    }

    /// Read the most recent snapshot without removing it.
    pub fn peek(&self) -> Option<&StateSnapshot<T>> {
        self.entries.back()
    }

    /// Remove the most recent snapshot tagged `tag` together with everything pushed
    /// after it, returning the tagged snapshot.
    ///
    /// The stack is left untouched when no snapshot carries the tag.
    pub fn undo_by_tag(&mut self, tag: &str) -> Option<StateSnapshot<T>> {
        let index = self.entries.iter().rposition(|s| s.has_tag(tag))?;
        let mut removed = self.entries.split_off(index);
        removed.pop_front()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn can_undo(&self) -> bool {
        !self.entries.is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Iterate over snapshots from oldest to most recent.
    pub fn iter(&self) -> impl Iterator<Item = &StateSnapshot<T>> {
        self.entries.iter()
    }
}

impl<T: fmt::Debug> fmt::Debug for SnapshotStack<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnapshotStack")
            .field("entries", &self.entries)
            .field("max_size", &self.max_size)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_undo_on_empty_stack_returns_none() {
        let mut stack: SnapshotStack<u32> = SnapshotStack::new();
        assert!(stack.undo().is_none());
        assert!(stack.peek().is_none());
        assert!(!stack.can_undo());
    }

    #[test]
    fn test_push_and_undo_is_lifo() {
        let mut stack = SnapshotStack::new();
        stack.push_snapshot(1, None, None);
        stack.push_snapshot(2, None, Some("second"));

        let top = stack.undo().unwrap();
        assert_eq!(top.state, 2);
        assert_eq!(top.description.as_deref(), Some("second"));
        assert_eq!(stack.undo().unwrap().state, 1);
        assert!(stack.is_empty());
    }

    #[test]
    fn test_peek_does_not_remove() {
        let mut stack = SnapshotStack::new();
        stack.push_snapshot("a".to_string(), Some("t"), None);
        assert_eq!(stack.peek().unwrap().state, "a");
        assert_eq!(stack.len(), 1);
    }

    #[test]
    fn test_bound_keeps_most_recent() {
        let mut stack = SnapshotStack::with_max_size(10);
        for i in 0..13 {
            stack.push_snapshot(i, None, None);
        }
        assert_eq!(stack.len(), 10);
        let states: Vec<i32> = stack.iter().map(|s| s.state).collect();
        assert_eq!(states, (3..13).collect::<Vec<_>>());
    }

    #[test]
    fn test_default_bound_is_ten() {
        let stack: SnapshotStack<u8> = SnapshotStack::default();
        assert_eq!(stack.max_size(), DEFAULT_MAX_SIZE);
    }

    #[test]
    fn test_consecutive_duplicates_are_dropped() {
        let mut stack = SnapshotStack::new();
        assert!(stack.push_snapshot(vec![1, 2], None, None));
        assert!(!stack.push_snapshot(vec![1, 2], Some("again"), None));
        assert_eq!(stack.len(), 1);

        // Non-adjacent duplicates are kept
        stack.push_snapshot(vec![3], None, None);
        assert!(stack.push_snapshot(vec![1, 2], None, None));
        assert_eq!(stack.len(), 3);
    }

    #[test]
    fn test_custom_equality_predicate() {
        let mut stack =
            SnapshotStack::with_equality(5, |a: &String, b: &String| a.eq_ignore_ascii_case(b));
        stack.push_snapshot("Hero".to_string(), None, None);
        assert!(!stack.push_snapshot("HERO".to_string(), None, None));
        assert_eq!(stack.len(), 1);
    }

    #[test]
    fn test_undo_by_tag_removes_newer_entries() {
        let mut stack = SnapshotStack::new();
        stack.push_snapshot(1, Some("A"), None);
        stack.push_snapshot(2, Some("B"), None);
        stack.push_snapshot(3, Some("A"), None);
        stack.push_snapshot(4, Some("C"), None);

        let found = stack.undo_by_tag("A").unwrap();
        assert_eq!(found.state, 3);
        assert_eq!(stack.len(), 2);
        let remaining: Vec<i32> = stack.iter().map(|s| s.state).collect();
        assert_eq!(remaining, vec![1, 2]);
        assert!(stack.peek().unwrap().has_tag("B"));
    }

    #[test]
    fn test_undo_by_tag_missing_leaves_stack_untouched() {
        let mut stack = SnapshotStack::new();
        stack.push_snapshot(1, Some("A"), None);
        assert!(stack.undo_by_tag("Z").is_none());
        assert_eq!(stack.len(), 1);
    }

    #[test]
    fn test_clear() {
        let mut stack = SnapshotStack::new();
        stack.push_snapshot(1, None, None);
        stack.push_snapshot(2, None, None);
        stack.clear();
        assert!(stack.is_empty());
    }

    #[test]
    fn test_zero_max_size_holds_one() {
        let mut stack = SnapshotStack::with_max_size(0);
        stack.push_snapshot(1, None, None);
        stack.push_snapshot(2, None, None);
        assert_eq!(stack.len(), 1);
        assert_eq!(stack.peek().unwrap().state, 2);
    }
}
