// Copyright The posim Authors
// SPDX-License-Identifier: Apache-2.0

//! The clock loop.
//!
//! Single authoritative writer for simulated time, broadcaster of ticks,
//! and enforcer of the termination predicates, evaluated in order:
//! duration reached, overflow, operator signal (and, as supervision input,
//! child crash).

use crate::balance::LoadBalancer;
use posim_shm::clock::{CLOSE_HOUR, OPEN_HOUR};
use posim_shm::{Region, SimTime};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Why the simulation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// The configured number of simulated days elapsed.
    DurationReached,
    /// Total queued users exceeded the explode threshold.
    Overflow,
    /// An operator signal (or the control bridge) requested shutdown.
    Signal,
    /// A child process exited before the simulation ended.
    ChildCrash,
}

/// Clock loop tuning.
#[derive(Debug, Clone)]
pub struct ClockLoopSettings {
    /// The first published instant.
    pub initial_time: SimTime,
    /// Wall-clock bound on waiting for barrier participants.
    pub barrier_wall_timeout: Duration,
}

/// The Director's tick driver.
pub struct ClockLoop<'a> {
    region: &'a Region,
    settings: ClockLoopSettings,
    balancer: Option<LoadBalancer>,
}

impl<'a> ClockLoop<'a> {
    /// Creates the loop; `balancer` is `None` when load balancing is off.
    #[must_use]
    pub fn new(
        region: &'a Region,
        settings: ClockLoopSettings,
        balancer: Option<LoadBalancer>,
    ) -> Self {
        Self {
            region,
            settings,
            balancer,
        }
    }

    /// Drives the clock until a termination predicate fires.
    ///
    /// `terminate_requested` reflects operator/bridge shutdown;
    /// `child_crashed` reflects supervision (polled once per tick).
    pub fn run(
        &self,
        terminate_requested: impl Fn() -> bool,
        mut child_crashed: impl FnMut() -> bool,
    ) -> TerminationReason {
        let shared = self.region.shared();
        let tick = Duration::from_nanos(shared.params.tick_nanos);
        let duration_days = shared.params.sim_duration_days;
        let explode_threshold = shared.params.explode_threshold;
        let check_interval = self.balancer.as_ref().map(LoadBalancer::check_interval);

        // The opening barrier: all participants acknowledge day 1 before
        // the first minute elapses.
        self.run_day_barrier(self.settings.initial_time.day.into(), &terminate_requested);

        let mut now = self.settings.initial_time;
        let mut minutes_to_check = check_interval.unwrap_or(0);
        let mut services_at_day_start = shared.stats.services_completed();
        loop {
            shared.clock.publish(now);

            if tick.is_zero() {
                // Free-running mode: no sleep, but never starve other
                // threads of the queue/clock mutexes.
                std::thread::yield_now();
            } else {
                std::thread::sleep(tick);
            }

            let next = now.next_minute();
            if next.day > now.day {
                let completed_today =
                    shared.stats.services_completed() - services_at_day_start;
                info!(
                    day = now.day,
                    completed_today,
                    waiting = shared.total_waiting(),
                    "day over"
                );
                services_at_day_start = shared.stats.services_completed();
                if duration_days > 0 && u32::from(next.day) > duration_days {
                    shared.clock.publish(next);
                    return TerminationReason::DurationReached;
                }
                self.run_day_barrier(next.day.into(), &terminate_requested);
            }
            if next.minute == 0 {
                // Hourly depth monitoring; the balancer acts on it, the
                // operator reads it.
                debug!(monitor = %self.region.snapshot(), "hourly snapshot");
            }
            if next.hour == OPEN_HOUR && next.minute == 0 {
                info!(at = %next, "office opened");
            }
            if next.hour == CLOSE_HOUR && next.minute == 0 {
                info!(at = %next, "office closed");
                // Users waiting to be served observe the closure and abandon.
                for queue in &shared.queues {
                    queue.notify_served_all();
                }
            }
            now = next;

            if let Some(interval) = check_interval {
                minutes_to_check = minutes_to_check.saturating_sub(1);
                if minutes_to_check == 0 {
                    minutes_to_check = interval;
                    if let Some(balancer) = &self.balancer {
                        balancer.check(self.region);
                    }
                }
            }

            // Termination predicates, in order: duration is handled at the
            // rollover above, then overflow, then the operator signal.
            if explode_threshold > 0 {
                let waiting = shared.total_waiting();
                if waiting > u64::from(explode_threshold) {
                    warn!(waiting, explode_threshold, "queue overflow");
                    return TerminationReason::Overflow;
                }
            }
            if terminate_requested() {
                return TerminationReason::Signal;
            }
            if child_crashed() {
                return TerminationReason::ChildCrash;
            }
        }
    }

    /// One barrier episode; always releases, even when participants are
    /// missing or termination interrupts the wait.
    fn run_day_barrier(&self, day: u32, terminate_requested: &impl Fn() -> bool) {
        let shared = self.region.shared();
        debug!(day, "raising day-start barrier");
        shared.barrier.director_open(day);

        // Wake workers that are parked waiting for tickets so they can
        // observe the raised barrier.
        for queue in &shared.queues {
            queue.notify_added_all();
        }

        let deadline = Instant::now() + self.settings.barrier_wall_timeout;
        let ready = shared.barrier.director_wait_ready(|| {
            !terminate_requested() && Instant::now() < deadline
        });
        if !ready {
            warn!(
                day,
                ready = shared.barrier.ready_count(),
                required = shared.barrier.required_count(),
                "day barrier incomplete; releasing anyway"
            );
        }
        shared.barrier.director_release();
        debug!(day, "day-start barrier released");
    }
}
