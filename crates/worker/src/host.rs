// Copyright The posim Authors
// SPDX-License-Identifier: Apache-2.0

//! Worker host lifecycle: registration, barrier coordination, fan-out.

use crate::error::Error;
use crate::gate::DayGate;
use crate::service::ServiceLoop;
use posim_issuer::client::EndpointClient;
use posim_shm::barrier::JoinOutcome;
use posim_shm::{FRONT_MODE_BROKER, Region};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Runtime settings for the worker host process.
#[derive(Debug, Clone, Default)]
pub struct WorkerHostSettings {
    /// Socket path override for broker mode; `None` uses the default.
    pub broker_socket: Option<PathBuf>,
}

/// Cadence of the coordinator's barrier polling.
const COORDINATOR_SLICE: Duration = Duration::from_millis(50);

/// Runs the worker host until `keep_running` clears or the simulation ends.
///
/// Registers every worker record (`OFFLINE → FREE`, round-robin service
/// assignment), spawns one thread per worker plus the barrier coordinator,
/// and joins them all on the way out.
pub fn run(
    region: Arc<Region>,
    settings: WorkerHostSettings,
    keep_running: Arc<AtomicBool>,
) -> Result<(), Error> {
    let shared = region.shared();
    let n_workers = shared.params.n_workers;
    let n_services = shared.params.n_services.max(1);
    let pid = std::process::id();

    for (index, record) in region.workers().iter().enumerate() {
        record.register(pid, index as u32 % n_services);
    }
    info!(n_workers, n_services, "worker host registered");

    let gate = Arc::new(DayGate::new());

    // Director-facing barrier handshake; one participant for the whole host.
    let coordinator = {
        let region = Arc::clone(&region);
        let gate = Arc::clone(&gate);
        let keep_running = Arc::clone(&keep_running);
        std::thread::Builder::new()
            .name("posim-worker-coordinator".to_owned())
            .spawn(move || coordinator_loop(&region, &gate, &keep_running))
            .map_err(|source| Error::ThreadSpawn {
                thread_name: "posim-worker-coordinator".to_owned(),
                source,
            })?
    };

    let broker_mode = shared.params.front_mode == FRONT_MODE_BROKER;
    let mut threads = Vec::with_capacity(n_workers as usize);
    for index in 0..n_workers as usize {
        let name = format!("posim-worker-{index}");
        let service_loop = ServiceLoop {
            region: Arc::clone(&region),
            gate: Arc::clone(&gate),
            keep_running: Arc::clone(&keep_running),
            index,
            broker_client: broker_mode.then(|| match &settings.broker_socket {
                Some(path) => EndpointClient::with_path(path),
                None => EndpointClient::new(),
            }),
        };
        let handle = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || service_loop.run())
            .map_err(|source| Error::ThreadSpawn {
                thread_name: name,
                source,
            })?;
        threads.push(handle);
    }

    for handle in threads {
        let name = handle.thread().name().unwrap_or("posim-worker").to_owned();
        handle
            .join()
            .map_err(|_| Error::ThreadPanic { thread_name: name })?;
    }
    coordinator.join().map_err(|_| Error::ThreadPanic {
        thread_name: "posim-worker-coordinator".to_owned(),
    })?;

    info!("worker host stopped");
    Ok(())
}

fn coordinator_loop(region: &Region, gate: &DayGate, keep_running: &AtomicBool) {
    let shared = region.shared();
    let mut last_synced_day = 0u32;
    let keep = || keep_running.load(Ordering::Acquire) && shared.clock.is_active();

    while keep() {
        match shared.barrier.participant_join(&mut last_synced_day, keep) {
            JoinOutcome::Joined => {
                gate.publish(last_synced_day);
                debug!(day = last_synced_day, "worker host acknowledged day start");
            }
            JoinOutcome::AlreadySynced => {
                std::thread::sleep(COORDINATOR_SLICE);
            }
            JoinOutcome::Cancelled => break,
            JoinOutcome::RaiseTimeout => {
                warn!(
                    day_seq = shared.barrier.day_seq(),
                    "barrier raise timeout; staying on previous day"
                );
            }
        }
    }

    // Never leave peers parked behind the gate on shutdown.
    gate.publish(shared.barrier.day_seq());
}
