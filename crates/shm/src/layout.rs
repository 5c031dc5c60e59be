// Copyright The posim Authors
// SPDX-License-Identifier: Apache-2.0

//! The shared region schema.
//!
//! Every block is `#[repr(C, align(64))]` so no field straddles a cache
//! line written by a different producer. The blocks contain only atomics,
//! immutable-after-init plain words, and process-shared primitives; nothing
//! here owns heap memory.

use crate::psync::{SharedCondvar, SharedMutex};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Number of service types compiled into the region.
pub const SIM_MAX_SERVICE_TYPES: usize = 4;

/// Fixed capacity of each service queue's ticket ring.
pub const QUEUE_RING_CAPACITY: usize = 128;

/// `current_ticket` sentinel: the worker just completed a service.
pub const TICKET_DONE: u32 = u32::MAX;

/// `front_mode` value selecting the FIFO ticket issuer.
pub const FRONT_MODE_FIFO: u32 = 0;
/// `front_mode` value selecting the priority work broker.
pub const FRONT_MODE_BROKER: u32 = 1;

/// Magic word marking a fully initialized region ("POSIM" + pad).
pub const REGION_MAGIC: u64 = 0x504f_5349_4d00_0001;
/// Region schema version; attach rejects a mismatch.
pub const REGION_VERSION: u32 = 1;

/// Immutable simulation parameters, written once by the Director.
///
/// `magic` is stored with release ordering as the very last step of region
/// initialization; attachers load it with acquire ordering, which makes
/// every plain field here safely readable afterwards.
#[repr(C, align(64))]
pub struct SimParams {
    pub(crate) magic: AtomicU64,
    pub(crate) version: AtomicU32,
    /// Number of trailing worker records.
    pub n_workers: u32,
    /// Number of active service types (`1..=SIM_MAX_SERVICE_TYPES`).
    pub n_services: u32,
    /// Simulated duration in days; `0` = run until external termination.
    pub sim_duration_days: u32,
    /// Wall-clock nanoseconds per simulated minute; `0` = free-running.
    pub tick_nanos: u64,
    /// Overflow termination threshold; `0` disables the predicate.
    pub explode_threshold: u32,
    /// Front-end selection: [`FRONT_MODE_FIFO`] or [`FRONT_MODE_BROKER`].
    pub front_mode: u32,
    /// Minimum simulated service time in milliseconds.
    pub serv_min_ms: u64,
    /// Maximum simulated service time in milliseconds.
    pub serv_max_ms: u64,
    /// Whether the run was started headless (no control bridge).
    pub is_headless: u32,
    /// Day-start barrier participant count configured for this run.
    pub barrier_participants: u32,
}

impl SimParams {
    /// Whether the magic/version words mark a compatible, initialized region.
    pub fn is_compatible(&self) -> bool {
        self.magic.load(Ordering::Acquire) == REGION_MAGIC
            && self.version.load(Ordering::Acquire) == REGION_VERSION
    }

    pub(crate) fn seal(&self) {
        self.version.store(REGION_VERSION, Ordering::Release);
        self.magic.store(REGION_MAGIC, Ordering::Release);
    }

    /// Raw magic word, for diagnostics.
    pub fn magic(&self) -> u64 {
        self.magic.load(Ordering::Acquire)
    }

    /// Raw version word, for diagnostics.
    pub fn version(&self) -> u32 {
        self.version.load(Ordering::Acquire)
    }
}

/// The simulated clock: packed time, active flag, tick broadcast.
#[repr(C, align(64))]
pub struct SimClock {
    pub(crate) packed: AtomicU64,
    pub(crate) active: AtomicU32,
    _pad: u32,
    /// Serializes tick publication with tick waits.
    pub mutex: SharedMutex,
    /// Broadcast on every published tick.
    pub cond_tick: SharedCondvar,
}

/// Global monotonic counters.
///
/// Cumulative counters only ever `fetch_add`; the `*_connected` gauges are
/// strictly paired (increment on successful attach/entry, decrement on the
/// matching exit) so they can never underflow.
#[repr(C, align(64))]
pub struct GlobalStats {
    tickets_issued: AtomicU64,
    services_completed: AtomicU64,
    users_spawned: AtomicU64,
    users_connected: AtomicU64,
    connected_threads: AtomicU64,
    protocol_errors: AtomicU64,
}

macro_rules! counter_accessors {
    ($($(#[$doc:meta])* $field:ident => $inc:ident, $get:ident;)*) => {
        $(
            $(#[$doc])*
            pub fn $inc(&self) {
                let _ = self.$field.fetch_add(1, Ordering::AcqRel);
            }

            /// Current value of the counter.
            pub fn $get(&self) -> u64 {
                self.$field.load(Ordering::Acquire)
            }
        )*
    };
}

impl GlobalStats {
    counter_accessors! {
        /// Counts one issued ticket.
        tickets_issued => inc_tickets_issued, tickets_issued;
        /// Counts one completed service.
        services_completed => inc_services_completed, services_completed;
        /// Counts one spawned user agent.
        users_spawned => inc_users_spawned, users_spawned;
        /// Counts one protocol error on the ticket endpoint.
        protocol_errors => inc_protocol_errors, protocol_errors;
    }

    /// Marks one user as currently participating.
    pub fn inc_users_connected(&self) {
        let _ = self.users_connected.fetch_add(1, Ordering::AcqRel);
    }

    /// Unmarks one participating user; pairs with [`Self::inc_users_connected`].
    pub fn dec_users_connected(&self) {
        let _ = self.users_connected.fetch_sub(1, Ordering::AcqRel);
    }

    /// Currently participating users.
    pub fn users_connected(&self) -> u64 {
        self.users_connected.load(Ordering::Acquire)
    }

    /// Marks one attached thread of control; pairs with detach.
    pub fn inc_connected_threads(&self) {
        let _ = self.connected_threads.fetch_add(1, Ordering::AcqRel);
    }

    /// Unmarks one attached thread of control.
    pub fn dec_connected_threads(&self) {
        let _ = self.connected_threads.fetch_sub(1, Ordering::AcqRel);
    }

    /// Currently attached threads of control.
    pub fn connected_threads(&self) -> u64 {
        self.connected_threads.load(Ordering::Acquire)
    }
}

/// Day-start barrier state; protocol in [`crate::barrier`].
#[repr(C, align(64))]
pub struct DayBarrier {
    pub(crate) required_count: AtomicU32,
    pub(crate) ready_count: AtomicU32,
    pub(crate) barrier_active: AtomicU32,
    pub(crate) day_seq: AtomicU32,
    /// Serializes barrier state transitions with readiness waits.
    pub mutex: SharedMutex,
    /// Signaled by participants as they acknowledge the new day.
    pub cond_workers_ready: SharedCondvar,
    /// Broadcast by the Director when the barrier lowers.
    pub cond_day_start: SharedCondvar,
}

/// Load-balancer counters.
#[repr(C, align(64))]
pub struct BalanceStats {
    checks_performed: AtomicU64,
    rebalances_triggered: AtomicU64,
    workers_reassigned: AtomicU64,
}

impl BalanceStats {
    counter_accessors! {
        /// Counts one balance check.
        checks_performed => inc_checks_performed, checks_performed;
        /// Counts one check that found an actionable imbalance.
        rebalances_triggered => inc_rebalances_triggered, rebalances_triggered;
        /// Counts one worker reassignment.
        workers_reassigned => inc_workers_reassigned, workers_reassigned;
    }
}

/// The global ticket sequence.
#[repr(C, align(64))]
pub struct TicketCounter {
    seq: AtomicU32,
}

impl TicketCounter {
    /// Draws the next ticket number (first ticket is `1`).
    ///
    /// The sequence may wrap; acceptable for the simulation lengths in
    /// scope, and `0` is reserved as "no ticket".
    pub fn next(&self) -> u32 {
        self.seq.fetch_add(1, Ordering::AcqRel).wrapping_add(1)
    }

    /// Number of tickets drawn so far.
    pub fn issued(&self) -> u32 {
        self.seq.load(Ordering::Acquire)
    }
}

/// One bounded service queue; ring protocol in [`crate::queue`].
#[repr(C, align(64))]
#[derive(Debug)]
pub struct ServiceQueue {
    pub(crate) waiting_count: AtomicU32,
    pub(crate) max_waiting: AtomicU32,
    pub(crate) total_served: AtomicU64,
    pub(crate) busy_ms_total: AtomicU64,
    pub(crate) head: AtomicU64,
    pub(crate) tail: AtomicU64,
    pub(crate) last_finished_ticket: AtomicU32,
    /// Serializes condvar wake-ups for this queue.
    pub mutex: SharedMutex,
    /// Workers wake here when a ticket arrives.
    pub cond_added: SharedCondvar,
    /// Users wake here when a worker picks up or completes a ticket.
    pub cond_served: SharedCondvar,
    pub(crate) ring: [AtomicU32; QUEUE_RING_CAPACITY],
}

/// Lifecycle states of a worker record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum WorkerState {
    /// Not registered, or shut down.
    Offline = 0,
    /// Registered and ready to claim a ticket.
    Free = 1,
    /// Currently serving a ticket.
    Busy = 2,
    /// Administratively paused; skipped by the balancer.
    Paused = 3,
}

impl From<u32> for WorkerState {
    fn from(v: u32) -> Self {
        match v {
            1 => WorkerState::Free,
            2 => WorkerState::Busy,
            3 => WorkerState::Paused,
            _ => WorkerState::Offline,
        }
    }
}

/// One worker's shared record; a single cache line written by that worker
/// (and, for reassignment fields, the Director).
#[repr(C, align(64))]
pub struct WorkerRecord {
    state: AtomicU32,
    current_ticket: AtomicU32,
    service_type: AtomicU32,
    reassignment_pending: AtomicU32,
    pid: AtomicU32,
}

impl WorkerRecord {
    /// Registers the worker: `OFFLINE → FREE` with its initial assignment.
    pub fn register(&self, pid: u32, service_type: u32) {
        self.pid.store(pid, Ordering::Release);
        self.service_type.store(service_type, Ordering::Release);
        self.current_ticket.store(0, Ordering::Release);
        self.reassignment_pending.store(0, Ordering::Release);
        self.state.store(WorkerState::Free as u32, Ordering::Release);
    }

    /// Current lifecycle state.
    pub fn state(&self) -> WorkerState {
        WorkerState::from(self.state.load(Ordering::Acquire))
    }

    /// Transitions the lifecycle state.
    pub fn set_state(&self, state: WorkerState) {
        self.state.store(state as u32, Ordering::Release);
    }

    /// The ticket this worker advertises: `0` idle, [`TICKET_DONE`] just
    /// completed, anything else is being served right now.
    pub fn current_ticket(&self) -> u32 {
        self.current_ticket.load(Ordering::Acquire)
    }

    /// Publishes the start of a service: `FREE → BUSY`, advertise `ticket`.
    pub fn begin_service(&self, ticket: u32) {
        self.current_ticket.store(ticket, Ordering::Release);
        self.state.store(WorkerState::Busy as u32, Ordering::Release);
    }

    /// Publishes the end of a service: completion sentinel, `BUSY → FREE`.
    pub fn finish_service(&self) {
        self.current_ticket.store(TICKET_DONE, Ordering::Release);
        self.state.store(WorkerState::Free as u32, Ordering::Release);
    }

    /// Clears the completion sentinel when the worker goes back to waiting.
    pub fn clear_ticket(&self) {
        self.current_ticket.store(0, Ordering::Release);
    }

    /// The service type this worker is assigned to.
    pub fn service_type(&self) -> u32 {
        self.service_type.load(Ordering::Acquire)
    }

    /// Director-side reassignment: new service type plus the pending flag.
    pub fn reassign(&self, service_type: u32) {
        self.service_type.store(service_type, Ordering::Release);
        self.reassignment_pending.store(1, Ordering::Release);
    }

    /// Whether a reassignment is staged but not yet taken by the worker.
    pub fn reassignment_pending(&self) -> bool {
        self.reassignment_pending.load(Ordering::Acquire) != 0
    }

    /// Worker-side: consumes a staged reassignment, returning the new
    /// service type if one was pending.
    pub fn take_reassignment(&self) -> Option<u32> {
        if self.reassignment_pending.swap(0, Ordering::AcqRel) != 0 {
            Some(self.service_type.load(Ordering::Acquire))
        } else {
            None
        }
    }

    /// PID of the hosting process, for introspection.
    pub fn pid(&self) -> u32 {
        self.pid.load(Ordering::Acquire)
    }

    /// Marks the record offline on shutdown.
    pub fn go_offline(&self) {
        self.state
            .store(WorkerState::Offline as u32, Ordering::Release);
        self.current_ticket.store(0, Ordering::Release);
    }
}

/// The fixed-size header of the shared region.
///
/// The `n_workers` [`WorkerRecord`]s follow immediately after this struct
/// in the mapping; [`crate::region::Region`] exposes them as a slice.
#[repr(C)]
pub struct SimRegion {
    /// Immutable parameters.
    pub params: SimParams,
    /// The simulated clock.
    pub clock: SimClock,
    /// Global counters.
    pub stats: GlobalStats,
    /// Day-start barrier.
    pub barrier: DayBarrier,
    /// Balancer counters.
    pub balance: BalanceStats,
    /// Ticket sequence.
    pub tickets: TicketCounter,
    /// Per-service bounded queues.
    pub queues: [ServiceQueue; SIM_MAX_SERVICE_TYPES],
}

impl SimRegion {
    /// Byte size of the region for a given worker count.
    #[must_use]
    pub const fn byte_size(n_workers: u32) -> usize {
        size_of::<SimRegion>()
            + n_workers as usize * size_of::<WorkerRecord>()
    }

    pub(crate) fn init_primitives(&self) -> Result<(), crate::error::Error> {
        self.clock.mutex.init()?;
        self.clock.cond_tick.init()?;
        self.barrier.mutex.init()?;
        self.barrier.cond_workers_ready.init()?;
        self.barrier.cond_day_start.init()?;
        for queue in &self.queues {
            queue.mutex.init()?;
            queue.cond_added.init()?;
            queue.cond_served.init()?;
        }
        Ok(())
    }

    /// Total users waiting across every queue (the overflow predicate input).
    pub fn total_waiting(&self) -> u64 {
        self.queues
            .iter()
            .map(|q| u64::from(q.waiting_count()))
            .sum()
    }
}
