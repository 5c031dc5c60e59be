// Copyright The posim Authors
// SPDX-License-Identifier: Apache-2.0

//! The per-user lifecycle.
//!
//! One agent performs `n_requests` service requests. Every blocking step is
//! a recheck → timed-wait → recheck loop bounded to about one second, so a
//! cleared run flag or a deactivated simulation is observed promptly.

use crate::slots::SlotPool;
use posim_issuer::client::EndpointClient;
use posim_shm::{FRONT_MODE_BROKER, Region, SimTime};
use posim_wire::{JoinQueue, TicketReq};
use rand::RngExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Bound on every timed wait in the lifecycle.
const WAIT_SLICE: Duration = Duration::from_secs(1);

/// Probability that a broker-mode user holds VIP priority.
const VIP_PROBABILITY: f64 = 0.1;

/// Everything one user agent needs to run.
pub struct UserContext {
    /// The shared region.
    pub region: Arc<Region>,
    /// The slot pool this user occupies.
    pub pool: Arc<SlotPool>,
    /// Index of the occupied slot.
    pub slot: usize,
    /// Stable id of this agent, used as the wire-level thread id.
    pub user_id: u32,
    /// Fixed service assignment; `None` picks a random service per request.
    pub assigned_service: Option<u32>,
    /// Number of service requests before retiring.
    pub n_requests: u32,
    /// Ticket endpoint client.
    pub client: EndpointClient,
    /// Role-level shutdown flag of the hosting process.
    pub keep_running: Arc<AtomicBool>,
}

impl UserContext {
    fn cancelled(&self) -> bool {
        !self.keep_running.load(Ordering::Acquire)
            || !self.region.shared().clock.is_active()
            || !self.pool.slot(self.slot).should_run()
    }
}

/// Runs the user to completion (all requests done, or cancelled).
pub fn user_loop(ctx: &UserContext) {
    let shared = ctx.region.shared();
    shared.stats.inc_users_spawned();
    shared.stats.inc_users_connected();
    debug!(user = ctx.user_id, "user joined the simulation");

    for request in 0..ctx.n_requests {
        if ctx.cancelled() {
            break;
        }
        run_one_request(ctx, request);
    }

    shared.stats.dec_users_connected();
    debug!(user = ctx.user_id, "user left the simulation");
}

fn run_one_request(ctx: &UserContext, request: u32) {
    let shared = ctx.region.shared();
    let n_services = shared.params.n_services.max(1);
    let mut rng = rand::rng();
    let service = ctx
        .assigned_service
        .unwrap_or_else(|| rng.random_range(0..n_services));

    if !wait_for_opening(ctx) {
        return;
    }

    let broker_mode = shared.params.front_mode == FRONT_MODE_BROKER;
    let ticket = if broker_mode {
        let is_vip = rng.random_bool(VIP_PROBABILITY);
        match ctx.client.join_queue(
            JoinQueue {
                requester_pid: std::process::id(),
                service_type: service,
                is_vip,
            },
            || !ctx.cancelled(),
        ) {
            Ok(ack) => {
                debug!(
                    user = ctx.user_id,
                    ticket = ack.ticket_number,
                    estimated_wait_ms = ack.estimated_wait_ms,
                    "joined broker queue"
                );
                ack.ticket_number
            }
            Err(e) => {
                // This request is lost; the user itself carries on.
                debug!(user = ctx.user_id, request, error = %e, "queue join failed");
                return;
            }
        }
    } else {
        let ticket = match ctx.client.request_ticket(
            TicketReq {
                requester_pid: std::process::id(),
                requester_tid: ctx.user_id,
                service_type: service,
            },
            || !ctx.cancelled(),
        ) {
            Ok(resp) => resp.ticket_number,
            Err(e) => {
                debug!(user = ctx.user_id, request, error = %e, "ticket request failed");
                return;
            }
        };

        let queue = match ctx.region.queue(service) {
            Ok(queue) => queue,
            Err(e) => {
                warn!(user = ctx.user_id, error = %e, "service disappeared");
                return;
            }
        };
        match queue.push(service, ticket, || !ctx.cancelled()) {
            Ok(()) => {}
            Err(posim_shm::Error::Cancelled) => return,
            Err(e) => {
                warn!(user = ctx.user_id, ticket, error = %e, "enqueue failed");
                return;
            }
        }
        ticket
    };

    info!(user = ctx.user_id, ticket, service, "waiting to be served");
    if !wait_until_serving(ctx, service, ticket) {
        return;
    }
    wait_until_completed(ctx, service, ticket);
    debug!(user = ctx.user_id, ticket, "request finished");
}

/// Gates the request on working hours, sleeping on the tick broadcast.
///
/// Never sleeps wall time directly; every wake re-reads the clock.
fn wait_for_opening(ctx: &UserContext) -> bool {
    let shared = ctx.region.shared();
    loop {
        if ctx.cancelled() {
            return false;
        }
        let now = shared.clock.now();
        if now.is_open() {
            return true;
        }
        debug!(
            user = ctx.user_id,
            at = %now,
            minutes_until_open = now.minutes_until_open(),
            "office closed; waiting for opening"
        );
        let _ = shared.clock.wait_tick(WAIT_SLICE);
    }
}

/// Waits until some worker advertises this ticket.
///
/// Abandons at closing time (the 17:00 `cond_served` broadcast wakes the
/// wait) or on cancellation.
fn wait_until_serving(ctx: &UserContext, service: u32, ticket: u32) -> bool {
    let shared = ctx.region.shared();
    let Ok(queue) = ctx.region.queue(service) else {
        return false;
    };
    loop {
        if ctx
            .region
            .workers()
            .iter()
            .any(|w| w.current_ticket() == ticket)
        {
            return true;
        }
        if ctx.cancelled() {
            return false;
        }
        let now: SimTime = shared.clock.now();
        if !now.is_open() {
            info!(user = ctx.user_id, ticket, at = %now, "office closed before service; abandoning");
            return false;
        }
        let _ = queue.wait_served(WAIT_SLICE);
    }
}

/// Waits until no worker advertises this ticket anymore.
fn wait_until_completed(ctx: &UserContext, service: u32, ticket: u32) {
    let Ok(queue) = ctx.region.queue(service) else {
        return;
    };
    loop {
        if !ctx
            .region
            .workers()
            .iter()
            .any(|w| w.current_ticket() == ticket)
        {
            return;
        }
        if ctx.cancelled() {
            return;
        }
        let _ = queue.wait_served(WAIT_SLICE);
    }
}
