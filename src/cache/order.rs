//! Insertion Order Module
//!
//! Tracks the order in which keys were written to a store, so trimming can
//! drop the oldest entries first.

use std::collections::VecDeque;

// == Insertion Order ==
/// Tracks write order for size-bounded trimming.
///
/// Keys are stored in a VecDeque where:
/// - Front = Most recently written
/// - Back = Oldest write
#[derive(Debug, Default)]
pub struct InsertionOrder {
    order: VecDeque<String>,
}

impl InsertionOrder {
    // == Constructor ==
    /// Creates a new empty tracker.
    pub fn new() -> Self {
        Self {
            order: VecDeque::new(),
        }
    }

    // == Touch ==
    /// Records a write (moves the key to the front).
    ///
    /// Overwriting a key counts as a fresh insertion.
    pub fn touch(&mut self, key: &str) {
        self.remove(key);
        self.order.push_front(key.to_string());
    }

    // == Remove ==
    /// Removes a key from the tracker.
    pub fn remove(&mut self, key: &str) {
        self.order.retain(|k| k != key);
    }

    // == Oldest ==
    /// Returns the keys from oldest to newest write.
    pub fn oldest_first(&self) -> impl Iterator<Item = &String> {
        self.order.iter().rev()
    }

    // == Length ==
    /// Returns the number of tracked keys.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    // == Is Empty ==
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
