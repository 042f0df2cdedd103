//! Unbounded queue with last-in access
//!
//! `poll` and `peek` operate on the most recently added element. Schedulers
//! that need FIFO ordering inside one priority level should use
//! [`BoundedQueue`](crate::BoundedQueue) instead.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::{InternalQueue, Rejected, UNLIMITED};

pub struct UnboundedQueue<T> {
    elements: Mutex<Vec<T>>,
    priority: AtomicI32,
    not_full: Mutex<Option<Arc<Notify>>>,
}

impl<T> UnboundedQueue<T> {
    pub fn new(priority: i32) -> Self {
        Self {
            elements: Mutex::new(Vec::new()),
            priority: AtomicI32::new(priority),
            not_full: Mutex::new(None),
        }
    }
}

impl<T: Send> InternalQueue<T> for UnboundedQueue<T> {
    fn priority(&self) -> i32 {
        self.priority.load(Ordering::SeqCst)
    }

    fn set_priority(&self, priority: i32) {
        self.priority.store(priority, Ordering::SeqCst);
    }

    fn size(&self) -> usize {
        self.elements.lock().len()
    }

    fn offer(&self, item: T) -> Result<(), Rejected<T>> {
        self.elements.lock().push(item);
        Ok(())
    }

    fn poll(&self) -> Option<T> {
        self.elements.lock().pop()
    }

    fn peek(&self) -> Option<T>
    where
        T: Clone,
    {
        self.elements.lock().last().cloned()
    }

    /// Drains the `max` most recently added elements, appended in insertion order
    fn drain_to(&self, sink: &mut Vec<T>, max: usize) -> usize {
        let mut elements = self.elements.lock();
        let count = max.min(elements.len());
        let split_at = elements.len() - count;
        sink.extend(elements.drain(split_at..));
        count
    }

    fn remaining_capacity(&self) -> usize {
        UNLIMITED
    }

    fn capacity(&self) -> usize {
        UNLIMITED
    }

    fn not_full(&self) -> Option<Arc<Notify>> {
        self.not_full.lock().clone()
    }

    fn set_not_full(&self, condition: Arc<Notify>) {
        *self.not_full.lock() = Some(condition);
    }

    fn remove_first(&self, pred: &dyn Fn(&T) -> bool) -> Option<T> {
        let mut elements = self.elements.lock();
        let index = elements.iter().position(|item| pred(item))?;
        Some(elements.remove(index))
    }

    fn snapshot(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.elements.lock().clone()
    }

    fn is_lifo(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_returns_last_added() {
        let queue = UnboundedQueue::new(1);
        queue.offer("a").unwrap();
        queue.offer("b").unwrap();
        queue.offer("c").unwrap();

        assert_eq!(queue.peek(), Some("c"));
        assert_eq!(queue.poll(), Some("c"));
        assert_eq!(queue.poll(), Some("b"));
        assert_eq!(queue.size(), 1);
    }

    #[test]
    fn test_poll_on_empty_queue() {
        let queue: UnboundedQueue<u32> = UnboundedQueue::new(1);
        assert_eq!(queue.poll(), None);
        assert_eq!(queue.peek(), None);
    }

    #[test]
    fn test_drain_to_partial() {
        let queue = UnboundedQueue::new(1);
        for i in 0..5 {
            queue.offer(i).unwrap();
        }

        let mut sink = Vec::new();
        let drained = queue.drain_to(&mut sink, 2);

        assert_eq!(drained, 2);
        assert_eq!(sink, vec![3, 4]);
        assert_eq!(queue.size(), 3);
        assert_eq!(queue.snapshot(), vec![0, 1, 2]);
    }

    #[test]
    fn test_drain_to_more_than_size() {
        let queue = UnboundedQueue::new(1);
        for i in 0..3 {
            queue.offer(i).unwrap();
        }

        let mut sink = vec![99];
        let drained = queue.drain_to(&mut sink, 10);

        assert_eq!(drained, 3);
        assert_eq!(sink, vec![99, 0, 1, 2]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_unlimited_capacity() {
        let queue: UnboundedQueue<u8> = UnboundedQueue::new(3);
        assert_eq!(queue.remaining_capacity(), UNLIMITED);
        assert_eq!(queue.capacity(), UNLIMITED);

        queue.set_priority(7);
        assert_eq!(queue.priority(), 7);
    }

    #[test]
    fn test_remove_first_matching() {
        let queue = UnboundedQueue::new(1);
        queue.offer(10).unwrap();
        queue.offer(20).unwrap();
        queue.offer(30).unwrap();

        assert_eq!(queue.remove_first(&|v| *v == 20), Some(20));
        assert_eq!(queue.remove_first(&|v| *v == 20), None);
        assert_eq!(queue.snapshot(), vec![10, 30]);
    }

    #[test]
    fn test_concurrent_offer_and_drain() {
        let queue = Arc::new(UnboundedQueue::new(1));
        let producers: Vec<_> = (0..4)
            .map(|p| {
                let queue = queue.clone();
                std::thread::spawn(move || {
                    for i in 0..250 {
                        queue.offer(p * 1000 + i).unwrap();
                    }
                })
            })
            .collect();

        let mut drained = Vec::new();
        let mut total = 0;
        while total < 1000 {
            total += queue.drain_to(&mut drained, 64);
        }
        for producer in producers {
            producer.join().unwrap();
        }

        assert_eq!(drained.len(), 1000);
        assert_eq!(queue.size(), 0);
    }
}
