//! Bounded outbound queue used while the socket is down.

use std::collections::VecDeque;

/// FIFO of serialized frames. When full, the oldest frame is evicted.
#[derive(Debug)]
pub(crate) struct OutboundQueue {
    frames: VecDeque<String>,
    capacity: usize,
}

impl OutboundQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            frames: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
        }
    }

    /// Append a frame, returning the evicted one if the queue was full.
    pub(crate) fn push(&mut self, frame: String) -> Option<String> {
        let evicted = if self.frames.len() >= self.capacity {
            self.frames.pop_front()
        } else {
            None
        };
        self.frames.push_back(frame);
        evicted
    }

    /// Put a frame back at the head after a failed write.
    ///
    /// Never grows past capacity: if full, the newest frame is dropped.
    pub(crate) fn requeue(&mut self, frame: String) -> Option<String> {
        let evicted = if self.frames.len() >= self.capacity {
            self.frames.pop_back()
        } else {
            None
        };
        self.frames.push_front(frame);
        evicted
    }

    pub(crate) fn pop(&mut self) -> Option<String> {
        self.frames.pop_front()
    }

    pub(crate) fn len(&self) -> usize {
        self.frames.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_oldest_when_full() {
        let mut queue = OutboundQueue::new(2);
        assert!(queue.push("a".into()).is_none());
        assert!(queue.push("b".into()).is_none());
        assert_eq!(queue.push("c".into()).as_deref(), Some("a"));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop().as_deref(), Some("b"));
        assert_eq!(queue.pop().as_deref(), Some("c"));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_requeue_goes_to_front() {
        let mut queue = OutboundQueue::new(3);
        queue.push("b".into());
        queue.push("c".into());
        assert!(queue.requeue("a".into()).is_none());
        assert_eq!(queue.pop().as_deref(), Some("a"));
        assert_eq!(queue.pop().as_deref(), Some("b"));
    }

    #[test]
    fn test_requeue_respects_capacity() {
        let mut queue = OutboundQueue::new(2);
        queue.push("b".into());
        queue.push("c".into());
        assert_eq!(queue.requeue("a".into()).as_deref(), Some("c"));
        assert_eq!(queue.len(), 2);
    }
}
