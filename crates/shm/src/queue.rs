// Copyright The posim Authors
// SPDX-License-Identifier: Apache-2.0

//! The bounded ticket ring protocol.
//!
//! Each service queue carries a fixed ring of 128 slots. A slot holds `0`
//! when empty, otherwise `ticket + 1`. Users reserve a tail index with
//! `fetch_add` and store into their slot once it is empty; workers claim
//! work by a conditional decrement of `waiting_count` and only then reserve
//! a head index, so a worker blocked on an empty queue never strands a
//! reserved slot when it is reassigned or shut down.
//!
//! Push order equals pop order per queue; completion order is not required
//! to match (users observe completion through the worker records).

use crate::error::Error;
use crate::layout::{QUEUE_RING_CAPACITY, ServiceQueue};
use crate::psync::WaitOutcome;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

/// Upper bound on the transient wait for a reserved slot to change state.
///
/// Both sides of the ring only wait here while a peer is between its index
/// reservation and the matching slot store; exceeding this bound means the
/// protocol was violated.
const SLOT_STALL_BOUND: Duration = Duration::from_secs(2);

impl ServiceQueue {
    /// Tickets pushed but not yet claimed by a worker.
    pub fn waiting_count(&self) -> u32 {
        self.waiting_count.load(Ordering::Acquire)
    }

    /// Broker front only: counts a ticket that joined this service's
    /// broker-owned queue, keeping the shared depth (overflow predicate,
    /// balancer input) accurate while the ring is bypassed.
    pub fn inc_waiting(&self) {
        let depth = self.waiting_count.fetch_add(1, Ordering::AcqRel) + 1;
        self.raise_watermark(depth);
    }

    /// Broker front only: counts a ticket dispatched to a worker; pairs
    /// with [`ServiceQueue::inc_waiting`].
    pub fn dec_waiting(&self) {
        let _ = self.waiting_count.fetch_sub(1, Ordering::AcqRel);
    }

    /// Tickets fully served on this queue.
    pub fn total_served(&self) -> u64 {
        self.total_served.load(Ordering::Acquire)
    }

    /// Counts one completed service on this queue.
    pub fn inc_total_served(&self) {
        let _ = self.total_served.fetch_add(1, Ordering::AcqRel);
    }

    /// Deepest `waiting_count` observed since region creation.
    pub fn max_waiting(&self) -> u32 {
        self.max_waiting.load(Ordering::Acquire)
    }

    /// Accounts the wall time a worker actually spent on one service.
    pub fn record_service_ms(&self, ms: u64) {
        let _ = self.busy_ms_total.fetch_add(ms, Ordering::AcqRel);
    }

    /// Cumulative worker busy time on this queue, in milliseconds.
    pub fn busy_ms_total(&self) -> u64 {
        self.busy_ms_total.load(Ordering::Acquire)
    }

    /// Measured mean service time; `None` before the first completion.
    pub fn mean_service_ms(&self) -> Option<u64> {
        let served = self.total_served();
        (served > 0).then(|| self.busy_ms_total() / served)
    }

    fn raise_watermark(&self, depth: u32) {
        let _ = self.max_waiting.fetch_max(depth, Ordering::AcqRel);
    }

    /// The most recently completed ticket on this queue.
    pub fn last_finished_ticket(&self) -> u32 {
        self.last_finished_ticket.load(Ordering::Acquire)
    }

    /// Records the most recently completed ticket.
    pub fn set_last_finished_ticket(&self, ticket: u32) {
        self.last_finished_ticket.store(ticket, Ordering::Release);
    }

    /// Enqueues a ticket, blocking while the ring is full.
    ///
    /// `keep_waiting` is polled while blocked; returning `false` abandons
    /// the push with [`Error::Cancelled`] before any slot is reserved.
    /// After the reservation the store always completes (bounded by
    /// [`Error::RingStall`] if the protocol is violated).
    pub fn push(
        &self,
        service: u32,
        ticket: u32,
        keep_waiting: impl Fn() -> bool,
    ) -> Result<(), Error> {
        // Stay cancellable while the ring is saturated; a reservation is
        // a commitment the consumer side counts on.
        while self.waiting_count.load(Ordering::Acquire) >= QUEUE_RING_CAPACITY as u32 {
            if !keep_waiting() {
                return Err(Error::Cancelled);
            }
            std::thread::yield_now();
        }

        let slot_index = self.tail.fetch_add(1, Ordering::AcqRel);
        let slot = &self.ring[(slot_index % QUEUE_RING_CAPACITY as u64) as usize];
        let started = Instant::now();
        loop {
            match slot.compare_exchange(
                0,
                ticket.wrapping_add(1),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(_) => {
                    if started.elapsed() > SLOT_STALL_BOUND {
                        return Err(Error::RingStall {
                            service,
                            slot: slot_index,
                        });
                    }
                    std::thread::yield_now();
                }
            }
        }

        let depth = self.waiting_count.fetch_add(1, Ordering::AcqRel) + 1;
        self.raise_watermark(depth);
        let _guard = self.mutex.lock();
        self.cond_added.signal();
        Ok(())
    }

    /// Claims the next ticket if one is waiting.
    ///
    /// Returns `None` when the queue is empty. The conditional decrement of
    /// `waiting_count` is the claim; the head index is only reserved after
    /// it succeeds, so the subsequent slot take is bounded-transient.
    pub fn try_claim(&self, service: u32) -> Result<Option<u32>, Error> {
        if self
            .waiting_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |w| w.checked_sub(1))
            .is_err()
        {
            return Ok(None);
        }

        let slot_index = self.head.fetch_add(1, Ordering::AcqRel);
        let slot = &self.ring[(slot_index % QUEUE_RING_CAPACITY as u64) as usize];
        let started = Instant::now();
        loop {
            let stored = slot.swap(0, Ordering::AcqRel);
            if stored != 0 {
                return Ok(Some(stored.wrapping_sub(1)));
            }
            if started.elapsed() > SLOT_STALL_BOUND {
                return Err(Error::RingStall {
                    service,
                    slot: slot_index,
                });
            }
            std::thread::yield_now();
        }
    }

    /// Blocks until a ticket-arrival signal or `timeout`.
    ///
    /// Wake-ups are advisory; callers re-run [`ServiceQueue::try_claim`].
    pub fn wait_added(&self, timeout: Duration) -> WaitOutcome {
        let mut guard = self.mutex.lock();
        self.cond_added.wait_timeout(&mut guard, timeout)
    }

    /// Blocks until a service-progress signal or `timeout`.
    ///
    /// Users re-scan the worker records after every wake-up.
    pub fn wait_served(&self, timeout: Duration) -> WaitOutcome {
        let mut guard = self.mutex.lock();
        self.cond_served.wait_timeout(&mut guard, timeout)
    }

    /// Wakes every worker waiting for tickets on this queue.
    pub fn notify_added_all(&self) {
        let _guard = self.mutex.lock();
        self.cond_added.broadcast();
    }

    /// Wakes every user waiting for service progress on this queue.
    pub fn notify_served_all(&self) {
        let _guard = self.mutex.lock();
        self.cond_served.broadcast();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::SimRegion;
    use std::mem::MaybeUninit;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;

    // A queue is only ever used in place inside the mapped region; for unit
    // tests a zeroed, primitive-initialized header behaves identically
    // within one process.
    fn test_region() -> Arc<SimRegion> {
        let region: SimRegion = unsafe { MaybeUninit::zeroed().assume_init() };
        region.init_primitives().expect("primitive init");
        Arc::new(region)
    }

    #[test]
    fn push_then_claim_fifo_order() {
        let region = test_region();
        let queue = &region.queues[0];
        for ticket in [7u32, 8, 9] {
            queue.push(0, ticket, || true).expect("push");
        }
        assert_eq!(queue.waiting_count(), 3);
        assert_eq!(queue.try_claim(0).expect("claim"), Some(7));
        assert_eq!(queue.try_claim(0).expect("claim"), Some(8));
        assert_eq!(queue.try_claim(0).expect("claim"), Some(9));
        assert_eq!(queue.try_claim(0).expect("claim"), None);
        assert_eq!(queue.waiting_count(), 0);
    }

    #[test]
    fn ticket_zero_survives_the_plus_one_encoding() {
        let region = test_region();
        let queue = &region.queues[1];
        queue.push(1, 0, || true).expect("push");
        assert_eq!(queue.try_claim(1).expect("claim"), Some(0));
    }

    #[test]
    fn claim_on_empty_queue_is_none() {
        let region = test_region();
        assert_eq!(region.queues[2].try_claim(2).expect("claim"), None);
    }

    #[test]
    fn full_ring_push_is_cancellable() {
        let region = test_region();
        let queue = &region.queues[0];
        for ticket in 0..QUEUE_RING_CAPACITY as u32 {
            queue.push(0, ticket, || true).expect("push");
        }
        assert_eq!(queue.waiting_count(), QUEUE_RING_CAPACITY as u32);

        let cancel = AtomicBool::new(false);
        let result = queue.push(0, 999, || {
            // First poll observes the saturated ring and cancels.
            !cancel.swap(true, Ordering::AcqRel)
        });
        assert!(matches!(result, Err(Error::Cancelled)));
        // The cancelled push reserved nothing: draining still yields exactly
        // the first QUEUE_RING_CAPACITY tickets.
        for expected in 0..QUEUE_RING_CAPACITY as u32 {
            assert_eq!(queue.try_claim(0).expect("claim"), Some(expected));
        }
        assert_eq!(queue.try_claim(0).expect("claim"), None);
    }

    #[test]
    fn watermark_and_service_accounting() {
        let region = test_region();
        let queue = &region.queues[3];
        assert_eq!(queue.mean_service_ms(), None);

        for ticket in [1u32, 2, 3] {
            queue.push(3, ticket, || true).expect("push");
        }
        assert_eq!(queue.max_waiting(), 3);
        while queue.try_claim(3).expect("claim").is_some() {}
        // Draining does not lower the watermark.
        assert_eq!(queue.waiting_count(), 0);
        assert_eq!(queue.max_waiting(), 3);

        queue.record_service_ms(30);
        queue.inc_total_served();
        assert_eq!(queue.mean_service_ms(), Some(30));
        queue.record_service_ms(10);
        queue.inc_total_served();
        assert_eq!(queue.mean_service_ms(), Some(20));
    }

    #[test]
    fn concurrent_pushers_and_claimers_conserve_tickets() {
        let region = test_region();
        let n_pushers = 4u32;
        let per_pusher = 200u32;

        let mut handles = Vec::new();
        for p in 0..n_pushers {
            let region = Arc::clone(&region);
            handles.push(std::thread::spawn(move || {
                for i in 0..per_pusher {
                    let ticket = p * per_pusher + i + 1;
                    region.queues[0].push(0, ticket, || true).expect("push");
                }
            }));
        }

        let total = n_pushers * per_pusher;
        let mut claimed = Vec::with_capacity(total as usize);
        while claimed.len() < total as usize {
            match region.queues[0].try_claim(0).expect("claim") {
                Some(ticket) => claimed.push(ticket),
                None => {
                    let _ = region.queues[0].wait_added(Duration::from_millis(10));
                }
            }
        }
        for handle in handles {
            handle.join().expect("pusher");
        }

        claimed.sort_unstable();
        claimed.dedup();
        assert_eq!(claimed.len(), total as usize, "every ticket claimed exactly once");
        assert_eq!(region.queues[0].waiting_count(), 0);
    }
}
