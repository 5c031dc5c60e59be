// Copyright The posim Authors
// SPDX-License-Identifier: Apache-2.0

//! The per-worker service loop.

use crate::gate::DayGate;
use posim_issuer::client::EndpointClient;
use posim_shm::clock::CLOSE_HOUR;
use posim_shm::{FRONT_MODE_BROKER, Region, WorkerRecord, WorkerState};
use posim_wire::GetWork;
use rand::{Rng, RngExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Timed-wait slice for ticket arrival; bounds cancellation latency.
const CLAIM_WAIT: Duration = Duration::from_millis(200);

/// Service sleep chunk; the clock is rechecked between chunks.
const SERVICE_CHUNK: Duration = Duration::from_millis(10);

pub(crate) struct ServiceLoop {
    pub(crate) region: Arc<Region>,
    pub(crate) gate: Arc<DayGate>,
    pub(crate) keep_running: Arc<AtomicBool>,
    pub(crate) index: usize,
    pub(crate) broker_client: Option<EndpointClient>,
}

impl ServiceLoop {
    /// Runs until shutdown; the record is taken offline on the way out.
    pub(crate) fn run(&self) {
        let shared = self.region.shared();
        let record = &self.region.workers()[self.index];
        let mut service = record.service_type();
        let mut rng = rand::rng();

        while self.keep_running() {
            if !self
                .gate
                .wait_open(shared, || self.keep_running())
            {
                break;
            }

            if let Some(new_service) = record.take_reassignment() {
                info!(
                    worker = self.index,
                    from = service,
                    to = new_service,
                    "worker reassigned"
                );
                service = new_service;
            }

            let Some(ticket) = self.next_ticket(service) else {
                // Back to idle: the completion sentinel only lives until the
                // next claim attempt.
                record.clear_ticket();
                continue;
            };
            self.serve(record, service, ticket, &mut rng);
        }

        record.go_offline();
        debug!(worker = self.index, "worker offline");
    }

    fn keep_running(&self) -> bool {
        self.keep_running.load(Ordering::Acquire)
            && self.region.shared().clock.is_active()
    }

    /// Claims the next ticket for `service`, or parks briefly.
    fn next_ticket(&self, service: u32) -> Option<u32> {
        let shared = self.region.shared();
        let queue = match self.region.queue(service) {
            Ok(queue) => queue,
            Err(e) => {
                warn!(worker = self.index, error = %e, "invalid service assignment");
                return None;
            }
        };

        if shared.params.front_mode == FRONT_MODE_BROKER {
            if let Some(client) = &self.broker_client {
                match client.get_work(
                    GetWork {
                        worker_pid: std::process::id(),
                        service_type: service,
                    },
                    || self.keep_running(),
                ) {
                    Ok(Some(item)) => return Some(item.ticket_number),
                    Ok(None) => {
                        let _ = queue.wait_added(CLAIM_WAIT);
                        return None;
                    }
                    Err(e) => {
                        debug!(worker = self.index, error = %e, "get_work failed");
                        let _ = queue.wait_added(CLAIM_WAIT);
                        return None;
                    }
                }
            }
            return None;
        }

        match queue.try_claim(service) {
            Ok(Some(ticket)) => Some(ticket),
            Ok(None) => {
                let _ = queue.wait_added(CLAIM_WAIT);
                None
            }
            Err(e) => {
                // Ring stall is an invariant violation; bail out of serving
                // rather than spinning on corrupt state.
                warn!(worker = self.index, error = %e, "claim failed");
                self.keep_running.store(false, Ordering::Release);
                None
            }
        }
    }

    /// Simulates one service and publishes its completion.
    fn serve(&self, record: &WorkerRecord, service: u32, ticket: u32, rng: &mut impl Rng) {
        let shared = self.region.shared();
        record.begin_service(ticket);
        info!(
            worker = self.index,
            ticket,
            service,
            at = %shared.clock.now(),
            "now serving"
        );
        // The waiting user observes the pickup through this wake-up.
        if let Ok(queue) = self.region.queue(service) {
            queue.notify_served_all();
        }

        let min = shared.params.serv_min_ms;
        let max = shared.params.serv_max_ms.max(min);
        let duration = Duration::from_millis(rng.random_range(min..=max));

        let mut slept = Duration::ZERO;
        while slept < duration {
            if !self.keep_running() {
                break;
            }
            let now = shared.clock.now();
            if now.hour >= CLOSE_HOUR {
                // Closing time: wrap up instead of finishing the full
                // simulated duration.
                debug!(worker = self.index, ticket, at = %now, "service cut short at closing");
                break;
            }
            let chunk = SERVICE_CHUNK.min(duration - slept);
            std::thread::sleep(chunk);
            slept += chunk;
        }

        record.finish_service();
        shared.stats.inc_services_completed();
        if let Ok(queue) = self.region.queue(service) {
            queue.inc_total_served();
            queue.record_service_ms(slept.as_millis() as u64);
            queue.set_last_finished_ticket(ticket);
            queue.notify_served_all();
        }
        debug!(worker = self.index, ticket, "service complete");
        debug_assert_eq!(record.state(), WorkerState::Free);
    }
}
