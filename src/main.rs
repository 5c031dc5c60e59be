// Copyright The posim Authors
// SPDX-License-Identifier: Apache-2.0

//! The `posim` binary.
//!
//! One executable hosts every role. `posim run` starts the Director, which
//! re-execs this same binary with a role subcommand per child process:
//! `issuer`, `workers`, and `users`. Children attach to the shared region
//! the Director created and terminate with it.

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use posim_config::SimConfig;
use posim_director::{DirectorSettings, signals};
use posim_issuer::server::IssuerSettings;
use posim_shm::Region;
use posim_users::manager::UsersManagerSettings;
use posim_worker::host::WorkerHostSettings;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "posim", version, about = "Post-office service-center simulation")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the Director (and with it, the whole simulation).
    Run(RunArgs),
    /// Child role: ticket issuer / work broker endpoint.
    Issuer(ChildArgs),
    /// Child role: worker host.
    Workers(ChildArgs),
    /// Child role: users manager.
    Users(ChildArgs),
    /// Print a snapshot of a running simulation's shared state.
    Stats(StatsArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Disable the control bridge.
    #[arg(long)]
    headless: bool,

    /// Configuration file path.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log filter (overrides RUST_LOG), e.g. `info` or `posim=debug`.
    #[arg(long)]
    loglevel: Option<String>,

    /// Worker count override (takes precedence over the config file).
    #[arg(long)]
    workers: Option<u32>,
}

#[derive(Args)]
struct ChildArgs {
    /// Configuration file path.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Shared-region name to attach to.
    #[arg(long)]
    region: Option<String>,

    /// Log filter (overrides RUST_LOG).
    #[arg(long)]
    loglevel: Option<String>,
}

#[derive(Args)]
struct StatsArgs {
    /// Shared-region name to inspect.
    #[arg(long)]
    region: Option<String>,
}

fn main() -> miette::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => run_director(args),
        Command::Issuer(args) => run_child(args, ChildRole::Issuer),
        Command::Workers(args) => run_child(args, ChildRole::Workers),
        Command::Users(args) => run_child(args, ChildRole::Users),
        Command::Stats(args) => print_stats(&args),
    }
}

fn init_tracing(loglevel: Option<&str>) {
    use tracing_subscriber::EnvFilter;
    let filter = match loglevel {
        Some(level) => EnvFilter::try_new(level).ok(),
        None => EnvFilter::try_from_default_env().ok(),
    }
    .unwrap_or_else(|| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_config(path: Option<&Path>) -> miette::Result<SimConfig> {
    match path {
        Some(path) => Ok(SimConfig::from_file(path)?),
        None => Ok(SimConfig::default()),
    }
}

fn run_director(args: RunArgs) -> miette::Result<()> {
    init_tracing(args.loglevel.as_deref());
    let config = load_config(args.config.as_deref())?;

    let settings = DirectorSettings {
        headless: args.headless,
        workers_override: args.workers,
        config_path: args.config.clone(),
        loglevel: args.loglevel.clone(),
        ..DirectorSettings::default()
    };
    let summary = posim_director::run(&config, &settings)?;
    info!(reason = ?summary.reason, "director exiting");
    Ok(())
}

enum ChildRole {
    Issuer,
    Workers,
    Users,
}

fn run_child(args: ChildArgs, role: ChildRole) -> miette::Result<()> {
    init_tracing(args.loglevel.as_deref());
    let config = load_config(args.config.as_deref())?;

    signals::install_child()
        .map_err(|errno| miette::miette!("cannot install child signal handlers: {errno}"))?;

    let region = Arc::new(attach_with_retry(args.region.as_deref())?);
    let keep_running = Arc::new(AtomicBool::new(true));
    let signal_mirror = {
        let keep_running = Arc::clone(&keep_running);
        std::thread::spawn(move || {
            while keep_running.load(Ordering::Acquire) {
                if signals::terminate_requested() {
                    keep_running.store(false, Ordering::Release);
                    break;
                }
                std::thread::sleep(Duration::from_millis(50));
            }
        })
    };

    let result = match role {
        ChildRole::Issuer => {
            let settings = IssuerSettings {
                pool_size: config.ticket_issuer.pool_size as usize,
                socket_path: None,
            };
            posim_issuer::server::run(region, settings, Arc::clone(&keep_running))
                .into_diagnostic()
        }
        ChildRole::Workers => posim_worker::host::run(
            region,
            WorkerHostSettings::default(),
            Arc::clone(&keep_running),
        )
        .into_diagnostic(),
        ChildRole::Users => {
            let settings = UsersManagerSettings {
                initial_users: config.users.nof_users,
                n_requests: config.users.n_requests,
                batch: config.users_manager.n_new_users,
                pool_size: config.users_manager.pool_size,
                service_pick: Default::default(),
                socket_path: None,
                install_signals: true,
            };
            posim_users::manager::run(region, settings, Arc::clone(&keep_running))
                .into_diagnostic()
        }
    };

    keep_running.store(false, Ordering::Release);
    let _ = signal_mirror.join();
    result
}

/// One-shot introspection: attach, render the snapshot, detach.
#[allow(clippy::print_stdout)]
fn print_stats(args: &StatsArgs) -> miette::Result<()> {
    let region = match args.region.as_deref() {
        Some(name) => Region::attach_named(name),
        None => Region::attach(),
    }
    .map_err(|e| miette::Report::from(e).wrap_err("is a simulation running?"))?;

    let snapshot = region.snapshot();
    println!(
        "simulation {} at {} (barrier day {})",
        if snapshot.active { "active" } else { "inactive" },
        snapshot.time,
        snapshot.day_seq
    );
    println!(
        "tickets issued {}  services completed {}  users {}/{} spawned  protocol errors {}",
        snapshot.tickets_issued,
        snapshot.services_completed,
        snapshot.users_connected,
        snapshot.users_spawned,
        snapshot.protocol_errors
    );
    for (index, queue) in snapshot.queues.iter().enumerate() {
        println!(
            "queue {index}: waiting {} (peak {})  served {}  mean service {}  last ticket {}",
            queue.waiting,
            queue.max_waiting,
            queue.served,
            queue
                .mean_service_ms
                .map_or_else(|| "-".to_owned(), |ms| format!("{ms}ms")),
            queue.last_finished_ticket
        );
    }
    for (index, worker) in snapshot.workers.iter().enumerate() {
        let ticket = match worker.current_ticket {
            0 => "idle".to_owned(),
            posim_shm::TICKET_DONE => "just finished".to_owned(),
            t => format!("serving {t}"),
        };
        println!(
            "worker {index}: {:?} service {} {}{}",
            worker.state,
            worker.service_type,
            ticket,
            if worker.reassignment_pending {
                " (reassignment pending)"
            } else {
                ""
            }
        );
    }
    Ok(())
}

/// Attaches to the shared region, tolerating a creator that is still
/// initializing (children can win the race right after spawn).
fn attach_with_retry(name: Option<&str>) -> miette::Result<Region> {
    const ATTEMPTS: u32 = 50;
    const BACKOFF: Duration = Duration::from_millis(100);

    let mut last_error = None;
    for _ in 0..ATTEMPTS {
        let attempt = match name {
            Some(name) => Region::attach_named(name),
            None => Region::attach(),
        };
        match attempt {
            Ok(region) => return Ok(region),
            Err(e) => last_error = Some(e),
        }
        std::thread::sleep(BACKOFF);
    }
    match last_error {
        Some(e) => Err(e.into()),
        None => Err(miette::miette!("shared region unavailable")),
    }
}
