//! Bounded outbound buffering for periods without a live connection.

use crate::error::SessionError;
use ringbuf::HeapRb;
use ringbuf::traits::{Consumer, Observer, RingBuffer};

/// Fixed-capacity FIFO that drops its oldest item on overflow.
///
/// `push` keeps the newest item in every case. Once the bound is exceeded it
/// reports `NotConnected` so the caller can observe the loss.
pub struct OutboundBuffer<T> {
    ring: HeapRb<T>,
    capacity: usize,
    dropped: u64,
}

impl<T> OutboundBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            ring: HeapRb::new(capacity),
            capacity,
            dropped: 0,
        }
    }

    pub fn push(&mut self, item: T) -> Result<(), SessionError> {
        match self.ring.push_overwrite(item) {
            None => Ok(()),
            Some(_oldest) => {
                self.dropped += 1;
                Err(SessionError::NotConnected)
            }
        }
    }

    /// Removes and returns every buffered item, oldest first.
    pub fn drain(&mut self) -> Vec<T> {
        let mut items = Vec::with_capacity(self.ring.occupied_len());
        while let Some(item) = self.ring.try_pop() {
            items.push(item);
        }
        items
    }

    /// Discards everything buffered. Returns how many items were discarded.
    pub fn clear(&mut self) -> usize {
        let mut n = 0;
        while self.ring.try_pop().is_some() {
            n += 1;
        }
        n
    }

    pub fn len(&self) -> usize {
        self.ring.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Items lost to overflow since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_exactly_the_newest_items() {
        let mut buffer = OutboundBuffer::new(4);
        let mut failures = Vec::new();
        for i in 0..10 {
            if buffer.push(i).is_err() {
                failures.push(i);
            }
        }
        assert_eq!(buffer.len(), 4);
        assert_eq!(buffer.dropped(), 6);
        assert_eq!(failures, vec![4, 5, 6, 7, 8, 9]);
        assert_eq!(buffer.drain(), vec![6, 7, 8, 9]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn no_failure_until_bound_is_exceeded() {
        let mut buffer = OutboundBuffer::new(3);
        for i in 0..3 {
            assert!(buffer.push(i).is_ok());
        }
        assert_eq!(buffer.push(3), Err(SessionError::NotConnected));
    }

    #[test]
    fn clear_reports_discarded_count() {
        let mut buffer = OutboundBuffer::new(8);
        buffer.push("a").unwrap();
        buffer.push("b").unwrap();
        assert_eq!(buffer.clear(), 2);
        assert_eq!(buffer.dropped(), 0);
        assert!(buffer.is_empty());
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let buffer = OutboundBuffer::<u8>::new(0);
        assert_eq!(buffer.capacity(), 1);
    }
}
