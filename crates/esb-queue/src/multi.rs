//! Dispatcher over several priority-tagged queues
//!
//! Consumers always service the highest-priority non-empty queue. Priorities
//! are read at poll time so a queue re-prioritised with
//! [`InternalQueue::set_priority`] takes effect on the next poll.

use std::sync::Arc;
use tokio::sync::Notify;
use tracing::debug;

use crate::{InternalQueue, Rejected};

pub struct MultiPriorityQueue<T> {
    queues: Vec<Arc<dyn InternalQueue<T>>>,
    items_available: Arc<Notify>,
}

impl<T: Send + 'static> MultiPriorityQueue<T> {
    pub fn new(queues: Vec<Arc<dyn InternalQueue<T>>>) -> Self {
        Self {
            queues,
            items_available: Arc::new(Notify::new()),
        }
    }

    pub fn queues(&self) -> &[Arc<dyn InternalQueue<T>>] {
        &self.queues
    }

    /// Queue registered for `priority`, if any
    pub fn queue_for(&self, priority: i32) -> Option<&Arc<dyn InternalQueue<T>>> {
        self.queues.iter().find(|q| q.priority() == priority)
    }

    /// Offer to the queue tagged with `priority`
    ///
    /// Items whose priority has no queue are rejected.
    pub fn offer(&self, priority: i32, item: T) -> Result<(), Rejected<T>> {
        let Some(queue) = self.queue_for(priority) else {
            debug!(priority, "No queue registered for priority");
            return Err(Rejected(item));
        };
        queue.offer(item)?;
        self.items_available.notify_one();
        Ok(())
    }

    /// Remove the next item from the highest-priority non-empty queue
    pub fn poll(&self) -> Option<T> {
        self.ranked()
            .into_iter()
            .find_map(|queue| queue.poll())
    }

    pub fn peek(&self) -> Option<T>
    where
        T: Clone,
    {
        self.ranked()
            .into_iter()
            .find_map(|queue| queue.peek())
    }

    /// Wait until an item is available and take it
    pub async fn take(&self) -> T {
        loop {
            let notified = self.items_available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(item) = self.poll() {
                return item;
            }
            notified.await;
        }
    }

    pub fn size(&self) -> usize {
        self.queues.iter().map(|q| q.size()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.iter().all(|q| q.is_empty())
    }

    /// Drain up to `max` items, servicing queues in priority order
    pub fn drain_to(&self, sink: &mut Vec<T>, max: usize) -> usize {
        let mut drained = 0;
        for queue in self.ranked() {
            if drained >= max {
                break;
            }
            drained += queue.drain_to(sink, max - drained);
        }
        drained
    }

    /// Remove the first item matching `pred`, searching queues in priority order
    pub fn remove_first(&self, pred: &dyn Fn(&T) -> bool) -> Option<T> {
        self.ranked()
            .into_iter()
            .find_map(|queue| queue.remove_first(pred))
    }

    /// Items in the order consumers would see them
    pub fn snapshot(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.ranked()
            .into_iter()
            .flat_map(|queue| {
                let mut items = queue.snapshot();
                if queue.is_lifo() {
                    items.reverse();
                }
                items
            })
            .collect()
    }

    pub fn clear(&self) -> usize {
        let mut discarded = Vec::new();
        self.drain_to(&mut discarded, usize::MAX)
    }

    /// Queues sorted by descending priority
    fn ranked(&self) -> Vec<&Arc<dyn InternalQueue<T>>> {
        let mut ranked: Vec<_> = self.queues.iter().collect();
        ranked.sort_by_key(|q| std::cmp::Reverse(q.priority()));
        ranked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BoundedQueue, UnboundedQueue};
    use std::time::Duration;

    fn two_level() -> MultiPriorityQueue<&'static str> {
        MultiPriorityQueue::new(vec![
            Arc::new(UnboundedQueue::new(1)),
            Arc::new(UnboundedQueue::new(10)),
        ])
    }

    #[test]
    fn test_higher_priority_served_first() {
        let queue = two_level();
        queue.offer(1, "low").unwrap();
        queue.offer(10, "high").unwrap();

        assert_eq!(queue.poll(), Some("high"));
        assert_eq!(queue.poll(), Some("low"));
        assert_eq!(queue.poll(), None);
    }

    #[test]
    fn test_unknown_priority_rejected() {
        let queue = two_level();
        let rejected = queue.offer(5, "lost").unwrap_err();
        assert_eq!(rejected.into_inner(), "lost");
        assert!(queue.is_empty());
    }

    #[test]
    fn test_reprioritise_changes_service_order() {
        let queue = two_level();
        queue.offer(1, "a").unwrap();
        queue.offer(10, "b").unwrap();

        queue.queue_for(1).unwrap().set_priority(20);

        assert_eq!(queue.poll(), Some("a"));
    }

    #[test]
    fn test_drain_across_queues() {
        let queue = two_level();
        queue.offer(1, "l1").unwrap();
        queue.offer(1, "l2").unwrap();
        queue.offer(10, "h1").unwrap();

        let mut sink = Vec::new();
        assert_eq!(queue.drain_to(&mut sink, 2), 2);
        assert_eq!(sink, vec!["h1", "l2"]);
        assert_eq!(queue.size(), 1);
    }

    #[test]
    fn test_snapshot_in_service_order() {
        let queue = two_level();
        queue.offer(1, "l1").unwrap();
        queue.offer(1, "l2").unwrap();
        queue.offer(10, "h1").unwrap();

        assert_eq!(queue.snapshot(), vec!["h1", "l2", "l1"]);
    }

    #[test]
    fn test_snapshot_keeps_fifo_order_of_unlimited_bounded_queue() {
        let queue: MultiPriorityQueue<&str> = MultiPriorityQueue::new(vec![
            Arc::new(BoundedQueue::new(1, crate::UNLIMITED)),
            Arc::new(UnboundedQueue::new(10)),
        ]);
        queue.offer(1, "f1").unwrap();
        queue.offer(1, "f2").unwrap();
        queue.offer(10, "h1").unwrap();
        queue.offer(10, "h2").unwrap();

        assert_eq!(queue.snapshot(), vec!["h2", "h1", "f1", "f2"]);
        assert_eq!(queue.poll(), Some("h2"));
        assert_eq!(queue.poll(), Some("h1"));
        assert_eq!(queue.poll(), Some("f1"));
    }

    #[test]
    fn test_bounded_member_rejects_when_full() {
        let queue: MultiPriorityQueue<u32> = MultiPriorityQueue::new(vec![
            Arc::new(BoundedQueue::new(1, 1)),
        ]);
        queue.offer(1, 1).unwrap();
        assert!(queue.offer(1, 2).is_err());
    }

    #[tokio::test]
    async fn test_take_waits_for_offer() {
        let queue = Arc::new(two_level());

        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.take().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.offer(1, "late").unwrap();

        let item = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .expect("consumer should wake")
            .unwrap();
        assert_eq!(item, "late");
    }
}
