use std::collections::VecDeque;

/// Items that carry an identity used to keep the queue free of duplicates.
pub trait Keyed {
    type Key: PartialEq;

    fn key(&self) -> &Self::Key;
}

/// FIFO of pending human confirmations.
///
/// Entries are processed from the front only; the queue is never
/// reordered, and an entry whose key is already pending is not queued
/// twice.
#[derive(Debug, Clone)]
pub struct ApprovalQueue<T> {
    items: VecDeque<T>,
}

impl<T> Default for ApprovalQueue<T> {
    fn default() -> Self {
        Self {
            items: VecDeque::new(),
        }
    }
}

impl<T: Keyed> ApprovalQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `item` unless an entry with the same key is pending.
    /// Returns whether it was queued.
    pub fn push_unique(&mut self, item: T) -> bool {
        if self.contains(item.key()) {
            return false;
        }
        self.items.push_back(item);
        true
    }

    pub fn contains(&self, key: &T::Key) -> bool {
        self.items.iter().any(|i| i.key() == key)
    }

    /// The entry awaiting a decision.
    pub fn front(&self) -> Option<&T> {
        self.items.front()
    }

    pub fn pop_front(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    /// Removes the entry with `key`, wherever it sits.
    pub fn remove(&mut self, key: &T::Key) -> Option<T> {
        let index = self.items.iter().position(|i| i.key() == key)?;
        self.items.remove(index)
    }

    /// Keeps only the entries matching `keep`, preserving order.
    pub fn retain(&mut self, keep: impl FnMut(&T) -> bool) {
        self.items.retain(keep);
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Iterates oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }
}
