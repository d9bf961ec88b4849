//! # RuntimeQueue - Blocking FIFO
//!
//! The hand-off point between pipeline stages. Producers add until the queue
//! is completed; consumers block on take (or peek with [`first_with`]) until
//! an item arrives or completion drains the queue. Completion is the
//! cooperative shutdown signal: it wakes every blocked consumer and turns
//! further takes on an empty queue into errors instead of hangs.
//!
//! [`first_with`]: RuntimeQueue::first_with

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

use crate::error::QueueError;

struct QueueState<T> {
    items: VecDeque<T>,
    completed: bool,
}

/// Thread-safe FIFO with blocking take, blocking peek, and completion.
pub struct RuntimeQueue<T> {
    state: Mutex<QueueState<T>>,
    available: Condvar,
}

impl<T> RuntimeQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                completed: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Append an item. Fails once the queue is completed.
    pub fn add(&self, item: T) -> Result<(), QueueError> {
        let mut state = self.state.lock();
        if state.completed {
            return Err(QueueError::AddingCompleted);
        }
        state.items.push_back(item);
        self.available.notify_one();
        Ok(())
    }

    /// Remove and return the front item, blocking until one is available.
    /// Fails once the queue is completed and drained.
    pub fn take(&self) -> Result<T, QueueError> {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                return Ok(item);
            }
            if state.completed {
                return Err(QueueError::Drained);
            }
            self.available.wait(&mut state);
        }
    }

    /// Remove and return the front item if one is immediately available.
    pub fn try_take(&self) -> Option<T> {
        self.state.lock().items.pop_front()
    }

    /// Apply a closure to the front item without removing it, blocking until
    /// one is available. Fails once the queue is completed and drained.
    pub fn first_with<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R, QueueError> {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.items.front() {
                return Ok(f(item));
            }
            if state.completed {
                return Err(QueueError::Drained);
            }
            self.available.wait(&mut state);
        }
    }

    /// Reject further additions and wake every blocked consumer. Items
    /// already queued remain takeable.
    pub fn complete_adding(&self) {
        let mut state = self.state.lock();
        state.completed = true;
        self.available.notify_all();
    }

    pub fn is_completed(&self) -> bool {
        self.state.lock().completed
    }

    pub fn count(&self) -> usize {
        self.state.lock().items.len()
    }
}

impl<T> Default for RuntimeQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_fifo_order() {
        let queue = RuntimeQueue::new();
        queue.add(1).unwrap();
        queue.add(2).unwrap();
        queue.add(3).unwrap();
        assert_eq!(queue.count(), 3);
        assert_eq!(queue.take().unwrap(), 1);
        assert_eq!(queue.take().unwrap(), 2);
        assert_eq!(queue.take().unwrap(), 3);
    }

    #[test]
    fn test_try_take_does_not_block() {
        let queue: RuntimeQueue<u32> = RuntimeQueue::new();
        assert_eq!(queue.try_take(), None);
        queue.add(5).unwrap();
        assert_eq!(queue.try_take(), Some(5));
    }

    #[test]
    fn test_first_with_peeks_without_removing() {
        let queue = RuntimeQueue::new();
        queue.add("front".to_string()).unwrap();
        let len = queue.first_with(|s| s.len()).unwrap();
        assert_eq!(len, 5);
        assert_eq!(queue.count(), 1);
    }

    #[test]
    fn test_blocking_take_woken_by_add() {
        let queue = Arc::new(RuntimeQueue::new());
        let consumer = {
            let queue = queue.clone();
            std::thread::spawn(move || queue.take())
        };
        std::thread::sleep(Duration::from_millis(20));
        queue.add(42).unwrap();
        assert_eq!(consumer.join().unwrap().unwrap(), 42);
    }

    #[test]
    fn test_complete_adding_wakes_blocked_take() {
        let queue: Arc<RuntimeQueue<u32>> = Arc::new(RuntimeQueue::new());
        let consumer = {
            let queue = queue.clone();
            std::thread::spawn(move || queue.take())
        };
        std::thread::sleep(Duration::from_millis(20));
        queue.complete_adding();
        assert_eq!(consumer.join().unwrap(), Err(QueueError::Drained));
    }

    #[test]
    fn test_completed_queue_rejects_adds_but_drains() {
        let queue = RuntimeQueue::new();
        queue.add(1).unwrap();
        queue.complete_adding();
        assert_eq!(queue.add(2), Err(QueueError::AddingCompleted));
        assert_eq!(queue.take().unwrap(), 1);
        assert_eq!(queue.take(), Err(QueueError::Drained));
    }
}
