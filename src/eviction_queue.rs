//! Max-heap of nodes ordered by fragmentation priority.
//!
//! The FragMultiPod policy pops the most fragmented node, evicts one pod and
//! pushes the node back with its freshly computed fragmentation amount. The
//! priority changes only on the popped item, so re-prioritization is a plain
//! pop-then-push; no in-place heap fix-up is needed.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::fragmentation::FragAmount;

pub struct EvictionItem {
    pub frag: FragAmount,
    pub priority: f64,
    seq: u64,
}

impl PartialEq for EvictionItem {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for EvictionItem {}

impl Ord for EvictionItem {
    fn cmp(&self, other: &Self) -> Ordering {
        // highest priority first; equal priorities pop in insertion order
        self.priority
            .total_cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for EvictionItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
pub struct EvictionPriorityQueue {
    heap: BinaryHeap<EvictionItem>,
    next_seq: u64,
}

impl EvictionPriorityQueue {
    pub fn new() -> Self {
        Default::default()
    }

    /// Inserts a node keyed by its current `frag_amount_sum_except_q3`.
    /// Callers must keep at most one live entry per node: an item is pushed
    /// once at seeding and again only after having been popped.
    pub fn push(&mut self, frag: FragAmount) {
        let priority = frag.frag_amount_sum_except_q3();
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(EvictionItem { frag, priority, seq });
    }

    pub fn pop(&mut self) -> Option<EvictionItem> {
        self.heap.pop()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Dumps the queue content at debug level.
    pub fn show(&self) {
        for item in self.heap.iter() {
            log::debug!("  [pri:{:.2}] {}", item.priority, item.frag);
        }
    }
}
