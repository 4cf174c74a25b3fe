//! Unbounded MPSC queue for control commands drained at block boundaries.

use crossbeam::queue::SegQueue;
use std::sync::Arc;

/// A lock-free queue carrying commands from any control thread to the render
/// thread. Pushes never block and never fail; the single consumer drains the
/// queue in FIFO order at the start of each block.
pub struct CommandQueue<T> {
    queue: Arc<SegQueue<T>>,
}

impl<T> CommandQueue<T> {
    pub fn new() -> Self {
        Self {
            queue: Arc::new(SegQueue::new()),
        }
    }

    /// Appends a command. Two pushes from the same thread are popped in the
    /// order they were made.
    pub fn push(&self, value: T) {
        self.queue.push(value);
    }

    /// Removes the oldest command, if any.
    pub fn try_pop(&self) -> Option<T> {
        self.queue.pop()
    }

    /// Number of commands currently waiting to be drained.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl<T> Clone for CommandQueue<T> {
    fn clone(&self) -> Self {
        Self {
            queue: Arc::clone(&self.queue),
        }
    }
}

impl<T> Default for CommandQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn drains_in_fifo_order() {
        let queue = CommandQueue::new();
        queue.push(1usize);
        queue.push(2);
        queue.push(3);
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.try_pop(), Some(1));
        assert_eq!(queue.try_pop(), Some(2));
        assert_eq!(queue.try_pop(), Some(3));
        assert_eq!(queue.try_pop(), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn preserves_per_producer_order_across_threads() {
        let queue = CommandQueue::new();
        let producer = queue.clone();
        let handle = thread::spawn(move || {
            for value in 0..1_000u32 {
                producer.push(value);
            }
        });
        handle.join().unwrap();

        let mut last = None;
        while let Some(value) = queue.try_pop() {
            if let Some(previous) = last {
                assert!(value > previous);
            }
            last = Some(value);
        }
        assert_eq!(last, Some(999));
    }
}
