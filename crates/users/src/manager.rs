// Copyright The posim Authors
// SPDX-License-Identifier: Apache-2.0

//! The reconcile loop.
//!
//! Population semantics: the manager owes the simulation a number of user
//! agents. The debt starts at `NOF_USERS`, every USR1 adds a batch, and a
//! spawn pays one unit off. A user that finishes its requests retires for
//! good (it is not replaced); USR2 additionally cancels a batch of running
//! users. This keeps cumulative counters predictable: a run with N
//! configured users and no signals issues exactly N × `N_REQUESTS` tickets.

use crate::error::Error;
use crate::lifecycle::{UserContext, user_loop};
use crate::signals;
use crate::slots::{SlotPool, WaitGroup};
use posim_issuer::client::EndpointClient;
use posim_shm::Region;
use posim_shm::barrier::JoinOutcome;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// How new users are assigned a service type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ServicePick {
    /// Each user keeps `user_id % n_services` for all its requests.
    RoundRobin,
    /// Each request draws a random service.
    #[default]
    Random,
}

/// Runtime settings for the users-manager process.
#[derive(Debug, Clone)]
pub struct UsersManagerSettings {
    /// Initial target population.
    pub initial_users: u32,
    /// Requests each user performs.
    pub n_requests: u32,
    /// Population delta applied per USR1/USR2 signal.
    pub batch: u32,
    /// Slot pool capacity.
    pub pool_size: u32,
    /// Service assignment policy for new users.
    pub service_pick: ServicePick,
    /// Socket path override; `None` uses the per-user default.
    pub socket_path: Option<PathBuf>,
    /// Whether to install the USR1/USR2 handlers (disabled in tests).
    pub install_signals: bool,
}

/// Cadence of the reconcile loop.
const RECONCILE_SLICE: Duration = Duration::from_millis(100);

/// Grace period for users to drain on shutdown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Runs the users manager until `keep_running` clears or the simulation
/// ends, then cancels and joins every user.
pub fn run(
    region: Arc<Region>,
    settings: UsersManagerSettings,
    keep_running: Arc<AtomicBool>,
) -> Result<(), Error> {
    if settings.install_signals {
        signals::install().map_err(|errno| Error::SignalSetup { errno })?;
    }

    let pool = Arc::new(SlotPool::new(settings.pool_size as usize));
    let wait_group = Arc::new(WaitGroup::new());
    let next_user_id = AtomicU32::new(1);
    let shared = region.shared();

    let mut to_spawn = settings.initial_users;
    let mut last_synced_day = 0u32;
    info!(
        initial = settings.initial_users,
        pool = pool.capacity(),
        "users manager started"
    );

    while keep_running.load(Ordering::Acquire) && shared.clock.is_active() {
        let outcome = shared
            .barrier
            .participant_join(&mut last_synced_day, || {
                keep_running.load(Ordering::Acquire)
            });
        if outcome == JoinOutcome::Joined {
            debug!(day = last_synced_day, "users manager acknowledged day start");
        }

        let add = signals::take_add_requests() * settings.batch;
        let mut to_stop = signals::take_remove_requests() * settings.batch;
        if add > 0 || to_stop > 0 {
            info!(add, remove = to_stop, "population adjustment requested");
        }
        to_spawn = to_spawn.saturating_add(add);

        while to_spawn > 0 {
            if !spawn_user(&region, &pool, &wait_group, &settings, &next_user_id, &keep_running)
            {
                // Pool exhausted (or spawn failed); retry on a later pass.
                break;
            }
            to_spawn -= 1;
        }
        while to_stop > 0 {
            if pool.stop_random().is_none() {
                break;
            }
            to_stop -= 1;
        }

        std::thread::sleep(RECONCILE_SLICE);
    }

    info!("users manager draining");
    pool.stop_all();
    if !wait_group.wait_timeout(DRAIN_TIMEOUT) {
        warn!(
            in_flight = wait_group.count(),
            "users still in flight after drain timeout"
        );
    }
    info!("users manager stopped");
    Ok(())
}

/// Claims a slot and starts one user thread; `false` when the pool is full
/// or the thread could not be spawned.
fn spawn_user(
    region: &Arc<Region>,
    pool: &Arc<SlotPool>,
    wait_group: &Arc<WaitGroup>,
    settings: &UsersManagerSettings,
    next_user_id: &AtomicU32,
    keep_running: &Arc<AtomicBool>,
) -> bool {
    let Some(slot) = pool.claim() else {
        warn!("slot pool exhausted; cannot grow population");
        return false;
    };

    let user_id = next_user_id.fetch_add(1, Ordering::AcqRel);
    let n_services = region.shared().params.n_services.max(1);
    let context = UserContext {
        region: Arc::clone(region),
        pool: Arc::clone(pool),
        slot,
        user_id,
        assigned_service: match settings.service_pick {
            ServicePick::RoundRobin => Some(user_id % n_services),
            ServicePick::Random => None,
        },
        n_requests: settings.n_requests,
        client: match &settings.socket_path {
            Some(path) => EndpointClient::with_path(path),
            None => EndpointClient::new(),
        },
        keep_running: Arc::clone(keep_running),
    };

    wait_group.add();
    let wait_group_thread = Arc::clone(wait_group);
    let pool_thread = Arc::clone(pool);
    let spawned = std::thread::Builder::new()
        .name(format!("posim-user-{user_id}"))
        .spawn(move || {
            user_loop(&context);
            pool_thread.release(slot);
            wait_group_thread.done();
        });

    match spawned {
        Ok(_handle) => true,
        Err(e) => {
            warn!(error = %e, "user thread spawn failed");
            pool.release(slot);
            wait_group.done();
            false
        }
    }
}
