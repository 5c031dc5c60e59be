// Copyright The posim Authors
// SPDX-License-Identifier: Apache-2.0

//! In-process fan-out of the day-barrier handshake.
//!
//! Only the coordinator thread writes `synced_day`; worker threads hold
//! service work whenever the shared barrier is raised, or announces a day
//! the coordinator has not yet acknowledged.

use posim_shm::SimRegion;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// The day the host has acknowledged toward the Director.
pub(crate) struct DayGate {
    synced_day: AtomicU32,
}

impl DayGate {
    pub(crate) fn new() -> Self {
        Self {
            synced_day: AtomicU32::new(0),
        }
    }

    pub(crate) fn publish(&self, day: u32) {
        self.synced_day.store(day, Ordering::Release);
    }

    pub(crate) fn synced_day(&self) -> u32 {
        self.synced_day.load(Ordering::Acquire)
    }

    /// Whether a worker thread may perform service work right now.
    pub(crate) fn open(&self, shared: &SimRegion) -> bool {
        !shared.barrier.is_active() && shared.barrier.day_seq() <= self.synced_day()
    }

    /// Parks the calling worker thread until the gate opens.
    ///
    /// Bounded slices keep the thread responsive to `keep_running`.
    pub(crate) fn wait_open(&self, shared: &SimRegion, keep_running: impl Fn() -> bool) -> bool {
        while !self.open(shared) {
            if !keep_running() {
                return false;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        true
    }
}
