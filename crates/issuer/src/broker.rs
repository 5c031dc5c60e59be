// Copyright The posim Authors
// SPDX-License-Identifier: Apache-2.0

//! Per-service priority queues for the work-broker front.
//!
//! Order is `(is_vip desc, arrival asc)`. Popping and dispatch happen under
//! the per-service lock, so a given ticket is only ever handed to one
//! worker.

use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as MemOrdering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Entry {
    is_vip: bool,
    arrival: u64,
    ticket: u32,
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        // VIPs first; within a class, earlier arrivals first (max-heap, so
        // smaller arrival must compare greater).
        self.is_vip
            .cmp(&other.is_vip)
            .then_with(|| other.arrival.cmp(&self.arrival))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The broker's in-memory queue state.
pub struct Broker {
    services: Vec<Mutex<BinaryHeap<Entry>>>,
    arrival_seq: AtomicU64,
}

impl Broker {
    /// Creates empty queues for `n_services` service types.
    #[must_use]
    pub fn new(n_services: u32) -> Self {
        Self {
            services: (0..n_services).map(|_| Mutex::new(BinaryHeap::new())).collect(),
            arrival_seq: AtomicU64::new(0),
        }
    }

    /// Enqueues a ticket; returns the queue depth including the new entry.
    pub fn join(&self, service: u32, ticket: u32, is_vip: bool) -> usize {
        let arrival = self.arrival_seq.fetch_add(1, MemOrdering::AcqRel);
        let mut heap = self.services[service as usize].lock();
        heap.push(Entry {
            is_vip,
            arrival,
            ticket,
        });
        heap.len()
    }

    /// Dispatches the highest-priority ticket of a service, if any.
    pub fn take(&self, service: u32) -> Option<(u32, bool)> {
        let mut heap = self.services[service as usize].lock();
        heap.pop().map(|entry| (entry.ticket, entry.is_vip))
    }

    /// Current depth of one service queue.
    pub fn depth(&self, service: u32) -> usize {
        self.services[service as usize].lock().len()
    }

    /// Whether `service` indexes a configured queue.
    pub fn has_service(&self, service: u32) -> bool {
        (service as usize) < self.services.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn fifo_within_a_priority_class() {
        let broker = Broker::new(1);
        let _ = broker.join(0, 1, false);
        let _ = broker.join(0, 2, false);
        let _ = broker.join(0, 3, false);
        assert_eq!(broker.take(0), Some((1, false)));
        assert_eq!(broker.take(0), Some((2, false)));
        assert_eq!(broker.take(0), Some((3, false)));
        assert_eq!(broker.take(0), None);
    }

    #[test]
    fn vips_overtake_earlier_regulars() {
        let broker = Broker::new(1);
        let _ = broker.join(0, 1, false);
        let _ = broker.join(0, 2, true);
        let _ = broker.join(0, 3, false);
        let _ = broker.join(0, 4, true);
        assert_eq!(broker.take(0), Some((2, true)));
        assert_eq!(broker.take(0), Some((4, true)));
        assert_eq!(broker.take(0), Some((1, false)));
        assert_eq!(broker.take(0), Some((3, false)));
    }

    #[test]
    fn services_are_independent() {
        let broker = Broker::new(2);
        let _ = broker.join(0, 10, false);
        let _ = broker.join(1, 20, false);
        assert_eq!(broker.take(1), Some((20, false)));
        assert_eq!(broker.take(1), None);
        assert_eq!(broker.take(0), Some((10, false)));
    }

    #[test]
    fn join_reports_depth_including_new_entry() {
        let broker = Broker::new(1);
        assert_eq!(broker.join(0, 1, false), 1);
        assert_eq!(broker.join(0, 2, false), 2);
        assert_eq!(broker.join(0, 3, false), 3);
        let _ = broker.take(0);
        assert_eq!(broker.join(0, 4, false), 3);
    }

    #[test]
    fn each_ticket_dispatched_once_under_contention() {
        let broker = std::sync::Arc::new(Broker::new(1));
        for ticket in 1..=100u32 {
            let _ = broker.join(0, ticket, ticket % 3 == 0);
        }
        let mut handles = Vec::new();
        for _ in 0..4 {
            let broker = std::sync::Arc::clone(&broker);
            handles.push(std::thread::spawn(move || {
                let mut taken = Vec::new();
                while let Some((ticket, _)) = broker.take(0) {
                    taken.push(ticket);
                }
                taken
            }));
        }
        let mut all: Vec<u32> = handles
            .into_iter()
            .flat_map(|h| h.join().expect("taker thread"))
            .collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 100, "no ticket dispatched twice");
    }
}
