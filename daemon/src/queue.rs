//! Bounded in-memory FIFO (§4.4 memory queue).

use std::collections::VecDeque;

use serde_json::Value;

/// FIFO of pending records with a hard capacity. Admission never blocks:
/// callers that hit capacity are expected to spill the current contents to
/// disk (via [`crate::spill`]) before calling [`MemoryQueue::push`] again.
pub struct MemoryQueue {
    capacity: usize,
    items: VecDeque<Value>,
}

impl MemoryQueue {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            items: VecDeque::with_capacity(capacity),
        }
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn push(&mut self, record: Value) {
        self.items.push_back(record);
    }

    /// Drain up to `n` oldest records, preserving arrival order.
    pub fn drain_up_to(&mut self, n: usize) -> Vec<Value> {
        let n = n.min(self.items.len());
        self.items.drain(..n).collect()
    }

    /// Return un-forwarded records to the front of the queue, preserving
    /// their original relative order.
    pub fn requeue_front(&mut self, records: Vec<Value>) {
        for record in records.into_iter().rev() {
            self.items.push_front(record);
        }
    }

    /// Drain everything, e.g. for a full spill-to-disk or shutdown flush.
    pub fn drain_all(&mut self) -> Vec<Value> {
        self.items.drain(..).collect()
    }

    /// Re-admit replayed records, oldest first, respecting capacity —
    /// excess beyond capacity is returned to the caller to re-spill.
    pub fn admit_replayed(&mut self, records: Vec<Value>) -> Vec<Value> {
        let mut overflow = Vec::new();
        for record in records {
            if self.is_full() {
                overflow.push(record);
            } else {
                self.items.push_back(record);
            }
        }
        overflow
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn admission_at_capacity_minus_one_does_not_report_full() {
        let mut queue = MemoryQueue::new(2);
        queue.push(json!(1));
        assert!(!queue.is_full());
    }

    #[test]
    fn admission_at_capacity_reports_full() {
        let mut queue = MemoryQueue::new(2);
        queue.push(json!(1));
        queue.push(json!(2));
        assert!(queue.is_full());
    }

    #[test]
    fn drain_preserves_arrival_order() {
        let mut queue = MemoryQueue::new(10);
        for i in 0..5 {
            queue.push(json!(i));
        }
        let drained = queue.drain_up_to(3);
        assert_eq!(drained, vec![json!(0), json!(1), json!(2)]);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn requeue_front_preserves_order_ahead_of_newer_items() {
        let mut queue = MemoryQueue::new(10);
        queue.push(json!("new"));
        queue.requeue_front(vec![json!("old1"), json!("old2")]);
        assert_eq!(
            queue.drain_up_to(3),
            vec![json!("old1"), json!("old2"), json!("new")]
        );
    }
}
