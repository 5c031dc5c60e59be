// Copyright The posim Authors
// SPDX-License-Identifier: Apache-2.0

//! The user slot pool and its wait group.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// One user slot.
///
/// `active` is the ownership flag (claimed by compare-and-set); `should_run`
/// is the cooperative cancellation flag the running user polls.
pub struct UserSlot {
    active: AtomicBool,
    should_run: AtomicBool,
}

impl UserSlot {
    /// Whether the slot currently hosts a user.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Whether the hosted user should keep running.
    pub fn should_run(&self) -> bool {
        self.should_run.load(Ordering::Acquire)
    }

    /// Requests cooperative cancellation of the hosted user.
    pub fn request_stop(&self) {
        self.should_run.store(false, Ordering::Release);
    }
}

/// Fixed-capacity pool of user slots.
pub struct SlotPool {
    slots: Vec<UserSlot>,
}

impl SlotPool {
    /// Creates an empty pool of `capacity` slots.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity)
                .map(|_| UserSlot {
                    active: AtomicBool::new(false),
                    should_run: AtomicBool::new(false),
                })
                .collect(),
        }
    }

    /// Claims the first free slot, arming its run flag.
    pub fn claim(&self) -> Option<usize> {
        for (index, slot) in self.slots.iter().enumerate() {
            if slot
                .active
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                slot.should_run.store(true, Ordering::Release);
                return Some(index);
            }
        }
        None
    }

    /// Releases a slot when its user retires.
    pub fn release(&self, index: usize) {
        let slot = &self.slots[index];
        slot.should_run.store(false, Ordering::Release);
        slot.active.store(false, Ordering::Release);
    }

    /// Scans in reverse and cancels the first running user found.
    ///
    /// Returns the cancelled slot, or `None` when nothing was running.
    pub fn stop_random(&self) -> Option<usize> {
        for (index, slot) in self.slots.iter().enumerate().rev() {
            if slot.is_active() && slot.should_run() {
                slot.request_stop();
                return Some(index);
            }
        }
        None
    }

    /// Cancels every running user.
    pub fn stop_all(&self) {
        for slot in &self.slots {
            if slot.is_active() {
                slot.request_stop();
            }
        }
    }

    /// Number of slots currently hosting users.
    pub fn active_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_active()).count()
    }

    /// Number of active users that have not been asked to stop.
    pub fn running_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.is_active() && s.should_run())
            .count()
    }

    /// A slot by index.
    pub fn slot(&self, index: usize) -> &UserSlot {
        &self.slots[index]
    }

    /// Pool capacity.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

/// Counts in-flight users so shutdown can join them all.
pub struct WaitGroup {
    count: Mutex<usize>,
    cond: Condvar,
}

impl WaitGroup {
    /// An empty wait group.
    #[must_use]
    pub fn new() -> Self {
        Self {
            count: Mutex::new(0),
            cond: Condvar::new(),
        }
    }

    /// Registers one in-flight user.
    pub fn add(&self) {
        *self.count.lock() += 1;
    }

    /// Retires one in-flight user.
    pub fn done(&self) {
        let mut count = self.count.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.cond.notify_all();
        }
    }

    /// Current in-flight count.
    pub fn count(&self) -> usize {
        *self.count.lock()
    }

    /// Waits until the count reaches zero or `timeout` elapses.
    ///
    /// Returns `true` when the group fully drained.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut count = self.count.lock();
        while *count > 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let _ = self.cond.wait_for(&mut count, deadline - now);
        }
        true
    }
}

impl Default for WaitGroup {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn claim_takes_first_free_slot() {
        let pool = SlotPool::new(3);
        assert_eq!(pool.claim(), Some(0));
        assert_eq!(pool.claim(), Some(1));
        pool.release(0);
        assert_eq!(pool.claim(), Some(0), "released slot is reused first");
        assert_eq!(pool.claim(), Some(2));
        assert_eq!(pool.claim(), None, "pool exhausted");
    }

    #[test]
    fn stop_random_cancels_newest_first() {
        let pool = SlotPool::new(4);
        let _ = pool.claim();
        let _ = pool.claim();
        let _ = pool.claim();
        assert_eq!(pool.stop_random(), Some(2));
        assert_eq!(pool.stop_random(), Some(1));
        assert_eq!(pool.running_count(), 1);
        // Cancelled slots stay active until their user releases them.
        assert_eq!(pool.active_count(), 3);
    }

    #[test]
    fn stop_all_clears_every_run_flag() {
        let pool = SlotPool::new(8);
        for _ in 0..5 {
            let _ = pool.claim();
        }
        pool.stop_all();
        assert_eq!(pool.running_count(), 0);
        assert_eq!(pool.active_count(), 5);
    }

    #[test]
    fn wait_group_drains() {
        let wg = std::sync::Arc::new(WaitGroup::new());
        for _ in 0..4 {
            wg.add();
            let wg = std::sync::Arc::clone(&wg);
            let _ = std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                wg.done();
            });
        }
        assert!(wg.wait_timeout(Duration::from_secs(2)));
        assert_eq!(wg.count(), 0);
    }

    #[test]
    fn wait_group_times_out_when_not_drained() {
        let wg = WaitGroup::new();
        wg.add();
        assert!(!wg.wait_timeout(Duration::from_millis(50)));
    }
}
