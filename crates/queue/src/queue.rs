//! Blocking FIFO with a distinguished "no more input" sentinel.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// Either an input item or the tombstone sentinel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueElement<T> {
    Item(T),
    Tombstone,
}

impl<T> QueueElement<T> {
    pub fn is_tombstone(&self) -> bool {
        matches!(self, QueueElement::Tombstone)
    }
}

struct State<T> {
    elements: VecDeque<QueueElement<T>>,
    /// Closed queues refuse items but still accept tombstones.
    closed: bool,
}

/// Unbounded blocking queue shared between a producer and its workers.
pub struct BlockingQueue<T> {
    state: Mutex<State<T>>,
    available: Condvar,
}

impl<T> BlockingQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                elements: VecDeque::new(),
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Enqueue an item. Hands it back if the queue has been closed.
    pub fn push(&self, item: T) -> Result<(), T> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(item);
        }
        state.elements.push_back(QueueElement::Item(item));
        drop(state);
        self.available.notify_one();
        Ok(())
    }

    pub fn push_tombstone(&self) {
        self.state.lock().elements.push_back(QueueElement::Tombstone);
        self.available.notify_one();
    }

    /// Refuse further items.
    pub fn close(&self) {
        self.state.lock().closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Block until an element is available.
    pub fn take(&self) -> QueueElement<T> {
        let mut state = self.state.lock();
        loop {
            if let Some(element) = state.elements.pop_front() {
                return element;
            }
            self.available.wait(&mut state);
        }
    }

    /// Wait at most `timeout` for an element.
    pub fn take_timeout(&self, timeout: Duration) -> Option<QueueElement<T>> {
        let mut state = self.state.lock();
        if state.elements.is_empty() {
            self.available.wait_for(&mut state, timeout);
        }
        state.elements.pop_front()
    }

    /// Remove and return every queued item, leaving tombstones in place.
    pub fn drain_items(&self) -> Vec<T> {
        let mut state = self.state.lock();
        let mut items = Vec::new();
        let elements = std::mem::take(&mut state.elements);
        for element in elements {
            match element {
                QueueElement::Item(item) => items.push(item),
                QueueElement::Tombstone => state.elements.push_back(QueueElement::Tombstone),
            }
        }
        items
    }

    /// Remove every queued item unless a tombstone is already visible, in
    /// which case nothing is touched and `None` is returned.
    pub fn clear_unless_tombstone(&self) -> Option<Vec<T>> {
        let mut state = self.state.lock();
        if state.elements.iter().any(QueueElement::is_tombstone) {
            return None;
        }
        let items = state
            .elements
            .drain(..)
            .filter_map(|element| match element {
                QueueElement::Item(item) => Some(item),
                QueueElement::Tombstone => None,
            })
            .collect();
        Some(items)
    }

    pub fn has_tombstone(&self) -> bool {
        self.state.lock().elements.iter().any(QueueElement::is_tombstone)
    }

    pub fn len(&self) -> usize {
        self.state.lock().elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for BlockingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> FromIterator<T> for BlockingQueue<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let queue = Self::new();
        queue
            .state
            .lock()
            .elements
            .extend(iter.into_iter().map(QueueElement::Item));
        queue
    }
}
