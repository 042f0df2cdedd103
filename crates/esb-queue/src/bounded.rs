//! Fixed-capacity FIFO queue with a "not full" condition

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::trace;

use crate::{InternalQueue, Rejected};

pub struct BoundedQueue<T> {
    elements: Mutex<VecDeque<T>>,
    capacity: usize,
    priority: AtomicI32,
    not_full: Mutex<Arc<Notify>>,
}

impl<T: Send> BoundedQueue<T> {
    pub fn new(priority: i32, capacity: usize) -> Self {
        Self {
            elements: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
            priority: AtomicI32::new(priority),
            not_full: Mutex::new(Arc::new(Notify::new())),
        }
    }

    /// Offer an item, parking on the not-full condition until space frees up
    pub async fn offer_wait(&self, item: T) {
        let mut item = item;
        loop {
            let condition = self.not_full.lock().clone();
            let notified = condition.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.offer(item) {
                Ok(()) => return,
                Err(rejected) => {
                    trace!(capacity = self.capacity, "Queue full, producer parked");
                    item = rejected.into_inner();
                    notified.await;
                }
            }
        }
    }

    fn signal_not_full(&self) {
        self.not_full.lock().notify_waiters();
    }
}

impl<T: Send> InternalQueue<T> for BoundedQueue<T> {
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
        let mut elements = self.elements.lock();
        if elements.len() >= self.capacity {
            return Err(Rejected(item));
        }
        elements.push_back(item);
        Ok(())
    }

    fn poll(&self) -> Option<T> {
        let item = self.elements.lock().pop_front();
        if item.is_some() {
            self.signal_not_full();
        }
        item
    }

    fn peek(&self) -> Option<T>
    where
        T: Clone,
    {
        self.elements.lock().front().cloned()
    }

    fn drain_to(&self, sink: &mut Vec<T>, max: usize) -> usize {
        let count = {
            let mut elements = self.elements.lock();
            let count = max.min(elements.len());
            sink.extend(elements.drain(..count));
            count
        };
        if count > 0 {
            self.signal_not_full();
        }
        count
    }

    fn remaining_capacity(&self) -> usize {
        self.capacity.saturating_sub(self.size())
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn not_full(&self) -> Option<Arc<Notify>> {
        Some(self.not_full.lock().clone())
    }

    fn set_not_full(&self, condition: Arc<Notify>) {
        *self.not_full.lock() = condition;
    }

    fn remove_first(&self, pred: &dyn Fn(&T) -> bool) -> Option<T> {
        let removed = {
            let mut elements = self.elements.lock();
            let index = elements.iter().position(|item| pred(item))?;
            elements.remove(index)
        };
        if removed.is_some() {
            self.signal_not_full();
        }
        removed
    }

    fn snapshot(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.elements.lock().iter().cloned().collect()
    }
}
