//! Causal time for one node over many peers (spec §3.1, §4.5).

use std::collections::BTreeMap;
use std::sync::RwLock;

/// A point-in-time copy of a clock's counters, safe to send across the wire
/// or hold while reasoning about another clock without risking a deadlock.
pub type ClockSnapshot = BTreeMap<String, u64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CausalOrder {
    Before,
    After,
    Equal,
    Concurrent,
}

/// Compares two clock snapshots. Total over `{Before, After, Equal,
/// Concurrent}`; `compare_maps(a, b) == Before` iff `compare_maps(b, a) ==
/// After` (spec §8 invariant 4).
pub fn compare_maps(a: &ClockSnapshot, b: &ClockSnapshot) -> CausalOrder {
    let mut a_less = false;
    let mut a_greater = false;
    for node in a.keys().chain(b.keys()) {
        let av = a.get(node).copied().unwrap_or(0);
        let bv = b.get(node).copied().unwrap_or(0);
        if av < bv {
            a_less = true;
        }
        if av > bv {
            a_greater = true;
        }
    }
    match (a_less, a_greater) {
        (false, false) => CausalOrder::Equal,
        (true, false) => CausalOrder::Before,
        (false, true) => CausalOrder::After,
        (true, true) => CausalOrder::Concurrent,
    }
}

fn merge_into(target: &mut ClockSnapshot, other: &ClockSnapshot) {
    for (node, count) in other {
        let entry = target.entry(node.clone()).or_insert(0);
        if *count > *entry {
            *entry = *count;
        }
    }
}

/// A node's own vector clock. `increment`/`merge` are the only mutators;
/// `compare` and `merge` snapshot the other side under its own lock before
/// reasoning, so two clocks can never deadlock against each other (spec
/// §9 design note).
#[derive(Debug, Default)]
pub struct VectorClock {
    counters: RwLock<ClockSnapshot>,
}

impl VectorClock {
    pub fn new() -> Self {
        VectorClock::default()
    }

    pub fn increment(&self, node: &str) {
        let mut counters = self.counters.write().unwrap();
        let entry = counters.entry(node.to_string()).or_insert(0);
        *entry += 1;
    }

    /// Takes a snapshot of the current counters under one lock acquisition.
    pub fn snapshot(&self) -> ClockSnapshot {
        self.counters.read().unwrap().clone()
    }

    /// Merges another live clock's snapshot into this one (component-wise
    /// max). Never holds both clocks' locks at once.
    pub fn merge(&self, other: &VectorClock) {
        let incoming = other.snapshot();
        self.merge_snapshot(&incoming);
    }

    pub fn merge_snapshot(&self, incoming: &ClockSnapshot) {
        let mut counters = self.counters.write().unwrap();
        merge_into(&mut counters, incoming);
    }

    pub fn compare(&self, other: &VectorClock) -> CausalOrder {
        let mine = self.snapshot();
        let theirs = other.snapshot();
        compare_maps(&mine, &theirs)
    }

    pub fn compare_snapshot(&self, other: &ClockSnapshot) -> CausalOrder {
        let mine = self.snapshot();
        compare_maps(&mine, other)
    }
}
