// Copyright The posim Authors
// SPDX-License-Identifier: Apache-2.0

//! The day-start barrier.
//!
//! Every registered participant must acknowledge a new simulated day before
//! service work resumes. The participant set is configuration, not
//! discovery: the Director decides `required_count` at init and
//! participants must be whatever is counted. The multi-threaded worker host
//! registers as a single participant regardless of thread count.
//!
//! Ordering: `day_seq` is published before `barrier_active` is raised;
//! `barrier_active` is lowered only after every required participant's
//! `ready_count` increment.

use crate::layout::DayBarrier;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

/// How long a participant waits for the barrier to rise before warning.
const RAISE_WARN_AFTER: Duration = Duration::from_secs(5);

/// Granularity of all timed barrier waits; bounds cancellation latency.
const WAIT_SLICE: Duration = Duration::from_millis(200);

/// Result of a participant's attempt to join the current barrier episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// No new day to acknowledge; the participant did not block.
    AlreadySynced,
    /// The participant acknowledged the new day and the barrier lowered.
    Joined,
    /// Cancellation was requested while joining.
    Cancelled,
    /// The barrier never rose for the observed `day_seq`.
    ///
    /// Surfaced after a bounded wait so the caller can log a diagnostic;
    /// the participant stays on its previous day.
    RaiseTimeout,
}

impl DayBarrier {
    /// Configures the number of required participants. Director init only.
    pub fn set_required_count(&self, count: u32) {
        self.required_count.store(count, Ordering::Release);
    }

    /// The configured participant count.
    pub fn required_count(&self) -> u32 {
        self.required_count.load(Ordering::Acquire)
    }

    /// Participants that have acknowledged the current episode.
    pub fn ready_count(&self) -> u32 {
        self.ready_count.load(Ordering::Acquire)
    }

    /// Whether a barrier episode is currently raised.
    pub fn is_active(&self) -> bool {
        self.barrier_active.load(Ordering::Acquire) != 0
    }

    /// The day sequence of the most recent episode.
    pub fn day_seq(&self) -> u32 {
        self.day_seq.load(Ordering::Acquire)
    }

    /// Director side: opens a new barrier episode for `new_day`.
    ///
    /// Resets readiness, publishes the new day sequence, then raises the
    /// barrier; the publication order is what participants rely on.
    pub fn director_open(&self, new_day: u32) {
        let _guard = self.mutex.lock();
        self.ready_count.store(0, Ordering::Release);
        self.day_seq.store(new_day, Ordering::Release);
        self.barrier_active.store(1, Ordering::Release);
    }

    /// Director side: waits until every required participant has joined.
    ///
    /// `keep_waiting` is polled between wait slices; returning `false`
    /// abandons the episode (the caller still must call
    /// [`DayBarrier::director_release`] so no participant deadlocks).
    /// Returns `true` when readiness was reached.
    pub fn director_wait_ready(&self, keep_waiting: impl Fn() -> bool) -> bool {
        let required = self.required_count();
        let mut guard = self.mutex.lock();
        while self.ready_count.load(Ordering::Acquire) < required {
            if !keep_waiting() {
                return false;
            }
            let _ = self.cond_workers_ready.wait_timeout(&mut guard, WAIT_SLICE);
        }
        true
    }

    /// Director side: lowers the barrier and releases every participant.
    pub fn director_release(&self) {
        let _guard = self.mutex.lock();
        self.barrier_active.store(0, Ordering::Release);
        self.cond_day_start.broadcast();
    }

    /// Participant side: acknowledges a new day if one is pending.
    ///
    /// `last_synced_day` is the participant's locally tracked day; it is
    /// updated when the episode is acknowledged. `keep_waiting` bounds
    /// every internal wait.
    pub fn participant_join(
        &self,
        last_synced_day: &mut u32,
        keep_waiting: impl Fn() -> bool,
    ) -> JoinOutcome {
        let day = self.day_seq();
        if day <= *last_synced_day {
            return JoinOutcome::AlreadySynced;
        }

        // The Director publishes day_seq before raising the barrier, so a
        // bounded wait for the raise closes the tiny publication window.
        let started = Instant::now();
        let mut warned = false;
        while !self.is_active() {
            if !keep_waiting() {
                return JoinOutcome::Cancelled;
            }
            if self.day_seq() != day {
                // The episode moved on (e.g. the Director released without
                // us during shutdown); re-evaluate from the top next call.
                return JoinOutcome::RaiseTimeout;
            }
            if !warned && started.elapsed() >= RAISE_WARN_AFTER {
                warned = true;
                tracing::warn!(day, "barrier not yet raised for observed day_seq");
            }
            if started.elapsed() >= 2 * RAISE_WARN_AFTER {
                return JoinOutcome::RaiseTimeout;
            }
            std::thread::sleep(Duration::from_millis(1));
        }

        let mut guard = self.mutex.lock();
        let _ = self.ready_count.fetch_add(1, Ordering::AcqRel);
        self.cond_workers_ready.signal();
        *last_synced_day = day;

        while self.barrier_active.load(Ordering::Acquire) != 0 {
            if !keep_waiting() {
                return JoinOutcome::Cancelled;
            }
            let _ = self.cond_day_start.wait_timeout(&mut guard, WAIT_SLICE);
        }
        JoinOutcome::Joined
    }

    /// Wakes everything parked on barrier condvars; shutdown path.
    pub fn notify_all(&self) {
        let _guard = self.mutex.lock();
        self.cond_workers_ready.broadcast();
        self.cond_day_start.broadcast();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::SimRegion;
    use std::mem::MaybeUninit;
    use std::sync::Arc;
    use std::sync::atomic::AtomicU32;

    fn test_region() -> Arc<SimRegion> {
        let region: SimRegion = unsafe { MaybeUninit::zeroed().assume_init() };
        region.init_primitives().expect("primitive init");
        Arc::new(region)
    }

    #[test]
    fn three_participants_reach_readiness_exactly_once() {
        let region = test_region();
        let barrier = &region.barrier;
        barrier.set_required_count(3);

        let max_ready_seen = Arc::new(AtomicU32::new(0));
        let mut handles = Vec::new();
        for _ in 0..3 {
            let region = Arc::clone(&region);
            let max_ready_seen = Arc::clone(&max_ready_seen);
            handles.push(std::thread::spawn(move || {
                let mut last_synced = 0u32;
                let outcome = region.barrier.participant_join(&mut last_synced, || true);
                let _ = max_ready_seen
                    .fetch_max(region.barrier.ready_count(), Ordering::AcqRel);
                (outcome, last_synced)
            }));
        }

        barrier.director_open(1);
        assert!(barrier.is_active());
        assert!(barrier.director_wait_ready(|| true));
        assert_eq!(barrier.ready_count(), 3);
        barrier.director_release();

        for handle in handles {
            let (outcome, last_synced) = handle.join().expect("participant");
            assert_eq!(outcome, JoinOutcome::Joined);
            assert_eq!(last_synced, 1);
        }
        assert!(!barrier.is_active());
        assert_eq!(barrier.day_seq(), 1);
        assert!(max_ready_seen.load(Ordering::Acquire) <= 3);
    }

    #[test]
    fn synced_participant_does_not_block() {
        let region = test_region();
        let mut last_synced = 5u32;
        region.barrier.day_seq.store(5, Ordering::Release);
        assert_eq!(
            region.barrier.participant_join(&mut last_synced, || true),
            JoinOutcome::AlreadySynced
        );
    }

    #[test]
    fn participant_cancellation_is_honored() {
        let region = test_region();
        region.barrier.director_open(2);
        // required_count is zero-initialized, so the director considers the
        // barrier ready; a cancelled participant must still exit cleanly.
        let mut last_synced = 0u32;
        let outcome = region.barrier.participant_join(&mut last_synced, || false);
        assert_eq!(outcome, JoinOutcome::Cancelled);
    }

    #[test]
    fn zero_required_is_a_noop_episode() {
        let region = test_region();
        let barrier = &region.barrier;
        barrier.set_required_count(0);
        barrier.director_open(1);
        assert!(barrier.director_wait_ready(|| true));
        barrier.director_release();
        assert!(!barrier.is_active());
    }

    #[test]
    fn day_seq_increments_by_one_per_episode() {
        let region = test_region();
        let barrier = &region.barrier;
        barrier.set_required_count(1);

        for day in 1..=3u32 {
            let region = Arc::clone(&region);
            let participant = std::thread::spawn(move || {
                let mut last_synced = day - 1;
                region.barrier.participant_join(&mut last_synced, || true)
            });
            barrier.director_open(day);
            assert!(barrier.director_wait_ready(|| true));
            barrier.director_release();
            assert_eq!(participant.join().expect("join"), JoinOutcome::Joined);
            assert_eq!(barrier.day_seq(), day);
        }
    }
}
