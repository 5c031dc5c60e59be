// Copyright The posim Authors
// SPDX-License-Identifier: Apache-2.0

//! The Director.
//!
//! Owns the shared region, drives simulated time, runs the day-start
//! barrier, optionally rebalances workers across service types, supervises
//! the child processes, and tears everything down in order:
//!
//! 1. lower the clock's active flag,
//! 2. wake every condition variable at least once (clock tick, barrier,
//!    both condvars of every queue) so no participant stays parked,
//! 3. wait for children with a bounded grace period, escalating to
//!    `SIGTERM` and finally `SIGKILL`,
//! 4. drop the owning region handle, which unlinks the object.

pub mod balance;
pub mod children;
pub mod clockloop;
pub mod error;
pub mod signals;

use balance::LoadBalancer;
use children::ChildSet;
use clockloop::{ClockLoop, ClockLoopSettings, TerminationReason};
use posim_config::{FrontMode, SimConfig};
use posim_shm::{CreateOptions, FRONT_MODE_BROKER, FRONT_MODE_FIFO, Region, SimTime};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{info, warn};

pub use error::Error;

/// Grace period before escalating child shutdown to `SIGTERM`.
const CHILD_GRACE: Duration = Duration::from_secs(5);

/// Additional grace before escalating to `SIGKILL`.
const CHILD_KILL_GRACE: Duration = Duration::from_secs(2);

/// Director-side runtime settings not covered by the config file.
#[derive(Debug, Clone)]
pub struct DirectorSettings {
    /// Region name override; `None` uses the per-user default.
    pub region_name: Option<String>,
    /// Run without the control bridge.
    pub headless: bool,
    /// CLI override for the worker count (`--workers`).
    pub workers_override: Option<u32>,
    /// Config file path forwarded to children.
    pub config_path: Option<PathBuf>,
    /// Log filter forwarded to children.
    pub loglevel: Option<String>,
    /// First published instant of the simulation.
    pub initial_time: SimTime,
    /// Whether to fork/exec the child roles (tests drive roles in-process).
    pub spawn_children: bool,
    /// Day-start barrier participant count.
    pub barrier_participants: u32,
}

impl Default for DirectorSettings {
    fn default() -> Self {
        Self {
            region_name: None,
            headless: false,
            workers_override: None,
            config_path: None,
            loglevel: None,
            initial_time: SimTime::opening(),
            spawn_children: true,
            barrier_participants: 3,
        }
    }
}

/// Final accounting of a completed run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Why the simulation ended.
    pub reason: TerminationReason,
    /// Total tickets issued.
    pub tickets_issued: u64,
    /// Total services completed.
    pub services_completed: u64,
    /// The last published instant.
    pub final_time: SimTime,
}

/// Builds the region parameters from config plus CLI overrides.
#[must_use]
pub fn create_options(config: &SimConfig, settings: &DirectorSettings) -> CreateOptions {
    CreateOptions {
        n_workers: settings
            .workers_override
            .unwrap_or(config.workers.nof_workers),
        n_services: posim_config::N_SERVICE_TYPES,
        sim_duration_days: config.simulation.sim_duration,
        tick_nanos: config.simulation.n_nano_secs,
        explode_threshold: config.simulation.explode_threshold,
        front_mode: match config.ticket_issuer.front {
            FrontMode::Fifo => FRONT_MODE_FIFO,
            FrontMode::Broker => FRONT_MODE_BROKER,
        },
        serv_min_ms: config.users.p_serv_min,
        serv_max_ms: config.users.p_serv_max,
        is_headless: settings.headless,
        barrier_participants: settings.barrier_participants,
    }
}

/// Runs a full simulation: create region, spawn children, drive the clock,
/// tear down. Blocks until the simulation ends.
pub fn run(config: &SimConfig, settings: &DirectorSettings) -> Result<RunSummary, Error> {
    signals::install_director().map_err(|errno| Error::SignalSetup { errno })?;

    let options = create_options(config, settings);
    let region = match &settings.region_name {
        Some(name) => Region::create_named(name, &options)?,
        None => Region::create(&options)?,
    };
    let shared = region.shared();
    info!(
        region = region.name(),
        n_workers = options.n_workers,
        duration_days = options.sim_duration_days,
        tick_nanos = options.tick_nanos,
        "shared region created"
    );

    shared.clock.set_active(true);
    shared.clock.publish(settings.initial_time);

    let mut children = if settings.spawn_children {
        children::spawn_all(settings, region.name())?
    } else {
        ChildSet::empty()
    };

    let balancer = config
        .load_balance
        .enabled
        .then(|| LoadBalancer::new(config.load_balance.clone()));

    let clock_loop = ClockLoop::new(
        &region,
        ClockLoopSettings {
            initial_time: settings.initial_time,
            barrier_wall_timeout: Duration::from_secs(30),
        },
        balancer,
    );

    let mut crashed = false;
    let reason = clock_loop.run(signals::terminate_requested, || {
        if crashed {
            return true;
        }
        if signals::take_child_event() {
            for exit in children.reap() {
                warn!(role = %exit.role, status = %exit.status, "child exited mid-run");
                crashed = true;
            }
        }
        crashed
    });

    info!(?reason, "simulation terminating");
    teardown(&region, &mut children);

    let summary = RunSummary {
        reason,
        tickets_issued: shared.stats.tickets_issued(),
        services_completed: shared.stats.services_completed(),
        final_time: shared.clock.now(),
    };
    info!(
        tickets = summary.tickets_issued,
        services = summary.services_completed,
        final_time = %summary.final_time,
        "simulation finished"
    );
    Ok(summary)
}

/// Releases every waiter and reaps the children.
fn teardown(region: &Region, children: &mut ChildSet) {
    let shared = region.shared();
    shared.clock.set_active(false);
    shared.clock.notify_all();

    // A participant may be parked inside an unfinished barrier episode.
    shared.barrier.director_release();
    shared.barrier.notify_all();

    for queue in &shared.queues {
        queue.notify_added_all();
        queue.notify_served_all();
    }

    if !children.is_empty() {
        let deadline = Instant::now() + CHILD_GRACE;
        while !children.is_empty() && Instant::now() < deadline {
            let _ = children.reap();
            std::thread::sleep(Duration::from_millis(50));
        }
        if !children.is_empty() {
            warn!("children outlived the grace period; sending SIGTERM");
            children.terminate();
            let deadline = Instant::now() + CHILD_KILL_GRACE;
            while !children.is_empty() && Instant::now() < deadline {
                let _ = children.reap();
                std::thread::sleep(Duration::from_millis(50));
            }
        }
        if !children.is_empty() {
            warn!("children ignored SIGTERM; sending SIGKILL");
            children.kill();
            let _ = children.reap();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use posim_config::FrontMode;

    #[test]
    fn cli_worker_override_takes_precedence() {
        let mut config = SimConfig::default();
        config.workers.nof_workers = 4;

        let mut settings = DirectorSettings {
            spawn_children: false,
            ..DirectorSettings::default()
        };
        assert_eq!(create_options(&config, &settings).n_workers, 4);

        settings.workers_override = Some(9);
        assert_eq!(create_options(&config, &settings).n_workers, 9);
    }

    #[test]
    fn front_mode_maps_into_region_params() {
        let mut config = SimConfig::default();
        let settings = DirectorSettings::default();
        assert_eq!(
            create_options(&config, &settings).front_mode,
            FRONT_MODE_FIFO
        );

        config.ticket_issuer.front = FrontMode::Broker;
        assert_eq!(
            create_options(&config, &settings).front_mode,
            FRONT_MODE_BROKER
        );
    }

    #[test]
    fn config_values_flow_through() {
        let mut config = SimConfig::default();
        config.simulation.sim_duration = 7;
        config.simulation.n_nano_secs = 123;
        config.simulation.explode_threshold = 55;
        config.users.p_serv_min = 10;
        config.users.p_serv_max = 20;

        let options = create_options(&config, &DirectorSettings::default());
        assert_eq!(options.sim_duration_days, 7);
        assert_eq!(options.tick_nanos, 123);
        assert_eq!(options.explode_threshold, 55);
        assert_eq!(options.serv_min_ms, 10);
        assert_eq!(options.serv_max_ms, 20);
        assert_eq!(options.barrier_participants, 3);
    }
}
