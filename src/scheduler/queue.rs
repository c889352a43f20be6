//! Priority queue for pending work.
//!
//! Lower priority numbers are served first; within a priority tier items come
//! out in insertion order. Retries are pushed to the front of their tier.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

struct Entry<T> {
    priority: u32,
    seq: i64,
    value: T,
}

impl<T> Eq for Entry<T> {}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl<T> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: the smallest (priority, seq) must compare greatest
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Stable min-priority queue.
pub struct PriorityQueue<T> {
    heap: BinaryHeap<Entry<T>>,
    /// Sequence for ordinary inserts, counts up from 0
    back_seq: i64,
    /// Sequence for front-of-tier inserts, counts down from -1
    front_seq: i64,
}

impl<T> PriorityQueue<T> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            back_seq: 0,
            front_seq: -1,
        }
    }

    /// Insert behind everything already queued at the same priority.
    pub fn push(&mut self, priority: u32, value: T) {
        let seq = self.back_seq;
        self.back_seq += 1;
        self.heap.push(Entry { priority, seq, value });
    }

    /// Insert ahead of everything already queued at the same priority.
    pub fn push_front(&mut self, priority: u32, value: T) {
        let seq = self.front_seq;
        self.front_seq -= 1;
        self.heap.push(Entry { priority, seq, value });
    }

    /// Remove and return the head of the queue.
    pub fn pop(&mut self) -> Option<T> {
        self.heap.pop().map(|e| e.value)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Remove every queued value, in no particular order.
    pub fn drain(&mut self) -> Vec<T> {
        self.heap.drain().map(|e| e.value).collect()
    }
}

impl<T> Default for PriorityQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
