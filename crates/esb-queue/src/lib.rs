//! Priority-tagged work queues
//!
//! Queues hold units of work (messages or tasks) waiting for a worker pool.
//! Each queue carries a priority; [`MultiPriorityQueue`] uses it to decide
//! which queue a consumer services first.
//!
//! - [`UnboundedQueue`]: always accepts; `poll`/`peek` return the most recently
//!   added element
//! - [`BoundedQueue`]: FIFO with a fixed capacity and a "not full" condition
//!   producers can park on

use std::fmt;
use std::sync::Arc;
use tokio::sync::Notify;

pub mod bounded;
pub mod multi;
pub mod unbounded;

pub use bounded::BoundedQueue;
pub use multi::MultiPriorityQueue;
pub use unbounded::UnboundedQueue;

/// Capacity reported by queues without an upper bound
pub const UNLIMITED: usize = usize::MAX;

/// An element a queue refused to accept, handed back to the producer
pub struct Rejected<T>(pub T);

impl<T> Rejected<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for Rejected<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Rejected(..)")
    }
}

impl<T> fmt::Display for Rejected<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("queue is full")
    }
}

impl<T> std::error::Error for Rejected<T> {}

/// A named, priority-ranked holding area for queued items
pub trait InternalQueue<T>: Send + Sync {
    fn priority(&self) -> i32;

    fn set_priority(&self, priority: i32);

    /// Number of items not yet drained
    fn size(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.size() == 0
    }

    fn offer(&self, item: T) -> Result<(), Rejected<T>>;

    fn poll(&self) -> Option<T>;

    fn peek(&self) -> Option<T>
    where
        T: Clone;

    /// Move up to `max` items into `sink`, returning how many were moved
    fn drain_to(&self, sink: &mut Vec<T>, max: usize) -> usize;

    fn remaining_capacity(&self) -> usize;

    fn capacity(&self) -> usize;

    /// Condition producers wait on while the queue is full
    fn not_full(&self) -> Option<Arc<Notify>>;

    fn set_not_full(&self, condition: Arc<Notify>);

    /// Remove the first item (in queue order) matching `pred`
    fn remove_first(&self, pred: &dyn Fn(&T) -> bool) -> Option<T>;

    /// Copy of the current contents in insertion order
    fn snapshot(&self) -> Vec<T>
    where
        T: Clone;

    /// Whether `poll` hands out the most recently added item first
    fn is_lifo(&self) -> bool {
        false
    }
}
