// Copyright The posim Authors
// SPDX-License-Identifier: Apache-2.0

//! The dynamic load balancer.
//!
//! Invoked by the clock loop once per configured interval of simulated
//! minutes. Moves at most one idle worker per check, from the idlest
//! service to the busiest, and never touches a BUSY or PAUSED worker.

use posim_config::LoadBalanceSection;
use posim_shm::{Region, WorkerState};
use tracing::{debug, info};

/// A reassignment performed by one balance check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reassignment {
    /// Index of the moved worker.
    pub worker: usize,
    /// The service the worker was taken from.
    pub from: u32,
    /// The service the worker now serves.
    pub to: u32,
}

/// The balancer and its policy.
pub struct LoadBalancer {
    config: LoadBalanceSection,
}

impl LoadBalancer {
    /// Creates a balancer with the given policy.
    #[must_use]
    pub const fn new(config: LoadBalanceSection) -> Self {
        Self { config }
    }

    /// Simulated minutes between checks.
    #[must_use]
    pub const fn check_interval(&self) -> u32 {
        self.config.check_interval
    }

    /// Runs one balance check; returns the reassignment if one happened.
    pub fn check(&self, region: &Region) -> Option<Reassignment> {
        let shared = region.shared();
        shared.balance.inc_checks_performed();

        let n_services = shared.params.n_services as usize;
        let depths: Vec<u32> = shared.queues[..n_services]
            .iter()
            .map(|q| q.waiting_count())
            .collect();

        let (overloaded, &max_depth) = depths
            .iter()
            .enumerate()
            .max_by_key(|&(_, &depth)| depth)?;
        let (underloaded, &min_depth) = depths
            .iter()
            .enumerate()
            .min_by_key(|&(_, &depth)| depth)?;

        if overloaded == underloaded || max_depth == min_depth {
            return None;
        }
        if max_depth < self.config.min_queue_depth {
            return None;
        }

        // Percentage ratio max/min; an empty idlest queue counts as
        // maximally imbalanced once the depth gate passed.
        let ratio = if min_depth == 0 {
            u32::MAX
        } else {
            max_depth.saturating_mul(100) / min_depth
        };
        if ratio < self.config.imbalance_threshold {
            debug!(ratio, threshold = self.config.imbalance_threshold, "imbalance below threshold");
            return None;
        }

        shared.balance.inc_rebalances_triggered();

        let worker = region.workers().iter().position(|w| {
            w.state() == WorkerState::Free
                && w.service_type() == underloaded as u32
                && !w.reassignment_pending()
        })?;

        region.workers()[worker].reassign(overloaded as u32);
        shared.balance.inc_workers_reassigned();
        // The moved worker may be parked on its old queue's condvar; the
        // overloaded queue's broadcast reaches it after the timed wait.
        shared.queues[overloaded].notify_added_all();

        let reassignment = Reassignment {
            worker,
            from: underloaded as u32,
            to: overloaded as u32,
        };
        info!(
            worker,
            from = reassignment.from,
            to = reassignment.to,
            max_depth,
            min_depth,
            "worker reassigned to busier service"
        );
        Some(reassignment)
    }
}
