// Copyright The posim Authors
// SPDX-License-Identifier: Apache-2.0

//! Point-in-time views of the region for monitoring and diagnostics.
//!
//! A snapshot is a plain copy of the atomically readable state; it is
//! internally consistent per field but not across fields (no lock is
//! taken). That is good enough for depth monitoring, operator logs, and
//! test assertions at quiescent points.

use crate::clock::SimTime;
use crate::layout::WorkerState;
use crate::region::Region;
use std::fmt;

/// One service queue's observable state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSnapshot {
    /// Tickets pushed but not yet claimed.
    pub waiting: u32,
    /// Deepest waiting count observed so far.
    pub max_waiting: u32,
    /// Tickets fully served.
    pub served: u64,
    /// Measured mean service time, once history exists.
    pub mean_service_ms: Option<u64>,
    /// The most recently completed ticket.
    pub last_finished_ticket: u32,
}

/// One worker's observable state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSnapshot {
    /// Lifecycle state.
    pub state: WorkerState,
    /// The advertised ticket (`0` idle, `u32::MAX` just completed).
    pub current_ticket: u32,
    /// Assigned service type.
    pub service_type: u32,
    /// Whether a reassignment is staged.
    pub reassignment_pending: bool,
}

/// A full region snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionSnapshot {
    /// The simulated instant at capture time.
    pub time: SimTime,
    /// Whether the simulation was active.
    pub active: bool,
    /// Current day-barrier sequence.
    pub day_seq: u32,
    /// Tickets issued so far.
    pub tickets_issued: u64,
    /// Services completed so far.
    pub services_completed: u64,
    /// Users spawned so far.
    pub users_spawned: u64,
    /// Users currently participating.
    pub users_connected: u64,
    /// Protocol errors counted on the endpoint.
    pub protocol_errors: u64,
    /// Per-service queue state, `n_services` entries.
    pub queues: Vec<QueueSnapshot>,
    /// Per-worker state, `n_workers` entries.
    pub workers: Vec<WorkerSnapshot>,
}

impl RegionSnapshot {
    /// Total users waiting across all queues.
    #[must_use]
    pub fn total_waiting(&self) -> u64 {
        self.queues.iter().map(|q| u64::from(q.waiting)).sum()
    }

    /// Workers currently serving a ticket.
    #[must_use]
    pub fn busy_workers(&self) -> usize {
        self.workers
            .iter()
            .filter(|w| w.state == WorkerState::Busy)
            .count()
    }

    /// Workers registered and idle.
    #[must_use]
    pub fn free_workers(&self) -> usize {
        self.workers
            .iter()
            .filter(|w| w.state == WorkerState::Free)
            .count()
    }
}

impl fmt::Display for RegionSnapshot {
    /// Compact one-line summary for periodic monitor logs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} waiting=[",
            self.time
        )?;
        for (index, queue) in self.queues.iter().enumerate() {
            if index > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}", queue.waiting)?;
        }
        write!(
            f,
            "] busy={}/{} served={} issued={} users={}",
            self.busy_workers(),
            self.workers.len(),
            self.services_completed,
            self.tickets_issued,
            self.users_connected
        )
    }
}

impl Region {
    /// Captures the observable state of the region.
    pub fn snapshot(&self) -> RegionSnapshot {
        let shared = self.shared();
        let n_services = shared.params.n_services as usize;
        RegionSnapshot {
            time: shared.clock.now(),
            active: shared.clock.is_active(),
            day_seq: shared.barrier.day_seq(),
            tickets_issued: shared.stats.tickets_issued(),
            services_completed: shared.stats.services_completed(),
            users_spawned: shared.stats.users_spawned(),
            users_connected: shared.stats.users_connected(),
            protocol_errors: shared.stats.protocol_errors(),
            queues: shared.queues[..n_services]
                .iter()
                .map(|q| QueueSnapshot {
                    waiting: q.waiting_count(),
                    max_waiting: q.max_waiting(),
                    served: q.total_served(),
                    mean_service_ms: q.mean_service_ms(),
                    last_finished_ticket: q.last_finished_ticket(),
                })
                .collect(),
            workers: self
                .workers()
                .iter()
                .map(|w| WorkerSnapshot {
                    state: w.state(),
                    current_ticket: w.current_ticket(),
                    service_type: w.service_type(),
                    reassignment_pending: w.reassignment_pending(),
                })
                .collect(),
        }
    }
}
