// Copyright The posim Authors
// SPDX-License-Identifier: Apache-2.0

//! End-to-end simulation scenarios with every role running in-process.
//!
//! The clock loop runs on the test thread so its termination reason can be
//! asserted; issuer, worker host, and users manager run on threads exactly
//! as they would in their own processes.

use posim_director::clockloop::{ClockLoop, ClockLoopSettings, TerminationReason};
use posim_issuer::server::IssuerSettings;
use posim_shm::{CreateOptions, FRONT_MODE_BROKER, FRONT_MODE_FIFO, Region, SimTime, WorkerState};
use posim_users::manager::UsersManagerSettings;
use posim_worker::host::WorkerHostSettings;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

fn options(n_workers: u32, duration_days: u32, tick_nanos: u64, explode: u32) -> CreateOptions {
    CreateOptions {
        n_workers,
        n_services: 2,
        sim_duration_days: duration_days,
        tick_nanos,
        explode_threshold: explode,
        front_mode: FRONT_MODE_FIFO,
        serv_min_ms: 5,
        serv_max_ms: 15,
        is_headless: true,
        barrier_participants: 3,
    }
}

struct Sim {
    region: Arc<Region>,
    keep_running: Arc<AtomicBool>,
    threads: Vec<std::thread::JoinHandle<()>>,
    socket: PathBuf,
    _dir: tempfile::TempDir,
}

impl Sim {
    /// Starts issuer, worker host, and users manager threads.
    fn start(case: &str, opts: &CreateOptions, users: u32, n_requests: u32) -> Self {
        let name = format!("/posim-test-scenario-{}-{case}", std::process::id());
        let region = Arc::new(Region::create_named(&name, opts).expect("region"));
        region.shared().clock.set_active(true);

        let dir = tempfile::tempdir().expect("tempdir");
        let socket = dir.path().join("issuer.sock");
        let keep_running = Arc::new(AtomicBool::new(true));
        let mut threads = Vec::new();

        {
            let region = Arc::clone(&region);
            let keep_running = Arc::clone(&keep_running);
            let settings = IssuerSettings {
                pool_size: 2,
                socket_path: Some(socket.clone()),
            };
            threads.push(std::thread::spawn(move || {
                posim_issuer::server::run(region, settings, keep_running).expect("issuer");
            }));
        }
        {
            let region = Arc::clone(&region);
            let keep_running = Arc::clone(&keep_running);
            let settings = WorkerHostSettings {
                broker_socket: Some(socket.clone()),
            };
            threads.push(std::thread::spawn(move || {
                posim_worker::host::run(region, settings, keep_running).expect("workers");
            }));
        }
        {
            let region = Arc::clone(&region);
            let keep_running = Arc::clone(&keep_running);
            let settings = UsersManagerSettings {
                initial_users: users,
                n_requests,
                batch: 1,
                pool_size: 64,
                service_pick: Default::default(),
                socket_path: Some(socket.clone()),
                install_signals: false,
            };
            threads.push(std::thread::spawn(move || {
                posim_users::manager::run(region, settings, keep_running).expect("users");
            }));
        }

        Self {
            region,
            keep_running,
            threads,
            socket,
            _dir: dir,
        }
    }

    fn clock_settings(&self, initial_time: SimTime) -> ClockLoopSettings {
        ClockLoopSettings {
            initial_time,
            barrier_wall_timeout: Duration::from_secs(10),
        }
    }

    /// Director teardown: release every waiter, then join the roles.
    fn shutdown(mut self) -> Arc<Region> {
        let shared = self.region.shared();
        shared.clock.set_active(false);
        shared.clock.notify_all();
        shared.barrier.director_release();
        shared.barrier.notify_all();
        for queue in &shared.queues {
            queue.notify_added_all();
            queue.notify_served_all();
        }
        self.keep_running.store(false, Ordering::Release);
        for handle in self.threads.drain(..) {
            handle.join().expect("role thread");
        }
        let _ = std::fs::remove_file(&self.socket);
        self.region
    }
}

#[test]
fn director_run_owns_the_full_lifecycle() {
    // No children, no barrier participants: director::run alone must
    // create the region, drive the clock to the duration bound, and leave
    // the region name unallocated.
    let name = format!("/posim-test-director-run-{}", std::process::id());
    let mut config = posim_config::SimConfig::default();
    config.simulation.sim_duration = 1;
    config.simulation.n_nano_secs = 10_000;
    config.workers.nof_workers = 1;

    let settings = posim_director::DirectorSettings {
        region_name: Some(name.clone()),
        spawn_children: false,
        barrier_participants: 0,
        headless: true,
        ..posim_director::DirectorSettings::default()
    };
    let summary = posim_director::run(&config, &settings).expect("run");
    assert_eq!(summary.reason, TerminationReason::DurationReached);
    assert_eq!(summary.final_time.day, 2);
    assert_eq!(summary.tickets_issued, 0);
    assert!(Region::attach_named(&name).is_err(), "region unlinked");
}

#[test]
fn smoke_duration_termination() {
    let opts = options(2, 1, 1_000_000, 0);
    let sim = Sim::start("smoke", &opts, 3, 1);

    let clock_loop = ClockLoop::new(
        &sim.region,
        sim.clock_settings(SimTime::opening()),
        None,
    );
    let reason = clock_loop.run(|| false, || false);
    assert_eq!(reason, TerminationReason::DurationReached);

    let region = sim.shutdown();
    let shared = region.shared();
    assert_eq!(shared.clock.now().day, 2, "duration termination publishes day 2");
    assert_eq!(shared.stats.tickets_issued(), 3);
    assert_eq!(shared.stats.services_completed(), 3);
    assert_eq!(shared.stats.users_connected(), 0, "all users exited normally");
    let total_served: u64 = shared.queues.iter().map(|q| q.total_served()).sum();
    assert_eq!(total_served, 3);
}

#[test]
fn overflow_termination() {
    // One slow worker, 20 one-shot users, threshold 5.
    let mut opts = options(1, 0, 1_000_000, 5);
    opts.serv_min_ms = 40;
    opts.serv_max_ms = 60;
    let sim = Sim::start("overflow", &opts, 20, 1);

    let clock_loop = ClockLoop::new(
        &sim.region,
        sim.clock_settings(SimTime::opening()),
        None,
    );
    let reason = clock_loop.run(|| false, || false);
    assert_eq!(reason, TerminationReason::Overflow);
    assert!(
        sim.region.shared().total_waiting() > 5,
        "overflow fired with queues above the threshold"
    );

    let region = sim.shutdown();
    for record in region.workers() {
        assert_ne!(record.state(), WorkerState::Busy, "no worker left BUSY");
    }
}

#[test]
fn working_hours_gate() {
    let opts = options(1, 0, 10_000_000, 0);
    let sim = Sim::start("hours", &opts, 1, 1);

    let stop = Arc::new(AtomicBool::new(false));
    let monitor = {
        let region = Arc::clone(&sim.region);
        std::thread::spawn(move || {
            // Sample the whole closed period: any ticket issued before
            // 08:00 is a gate violation.
            let mut violations = 0u32;
            loop {
                let now = region.shared().clock.now();
                if now.hour >= 8 || !region.shared().clock.is_active() {
                    break;
                }
                if region.shared().stats.tickets_issued() > 0 {
                    violations += 1;
                }
                std::thread::sleep(Duration::from_millis(1));
            }
            violations
        })
    };

    let clock_thread = {
        let region = Arc::clone(&sim.region);
        let stop = Arc::clone(&stop);
        let settings = sim.clock_settings(SimTime {
            day: 1,
            hour: 7,
            minute: 0,
        });
        std::thread::spawn(move || {
            let clock_loop = ClockLoop::new(&region, settings, None);
            clock_loop.run(move || stop.load(Ordering::Acquire), || false)
        })
    };

    assert_eq!(monitor.join().expect("monitor"), 0, "no ticket before opening");

    // After opening the single user must get served.
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline && sim.region.shared().stats.services_completed() < 1 {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(sim.region.shared().stats.tickets_issued(), 1);
    assert_eq!(sim.region.shared().stats.services_completed(), 1);

    stop.store(true, Ordering::Release);
    let reason = clock_thread.join().expect("clock thread");
    assert_eq!(reason, TerminationReason::Signal);
    let _ = sim.shutdown();
}

#[test]
fn graceful_shutdown_drains_everything() {
    let opts = options(2, 0, 1_000_000, 0);
    let sim = Sim::start("graceful", &opts, 8, 50);

    let stop = Arc::new(AtomicBool::new(false));
    let clock_thread = {
        let region = Arc::clone(&sim.region);
        let stop = Arc::clone(&stop);
        let settings = sim.clock_settings(SimTime::opening());
        std::thread::spawn(move || {
            let clock_loop = ClockLoop::new(&region, settings, None);
            clock_loop.run(move || stop.load(Ordering::Acquire), || false)
        })
    };

    // Let the simulation do some work, then pull the plug mid-flight.
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline && sim.region.shared().stats.services_completed() < 3 {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(sim.region.shared().stats.services_completed() >= 3);

    stop.store(true, Ordering::Release);
    assert_eq!(
        clock_thread.join().expect("clock thread"),
        TerminationReason::Signal
    );

    let started = Instant::now();
    let region = sim.shutdown();
    assert!(
        started.elapsed() < Duration::from_secs(8),
        "teardown bounded by timed waits"
    );

    let shared = region.shared();
    assert_eq!(shared.stats.users_connected(), 0);
    for record in region.workers() {
        assert_eq!(record.state(), WorkerState::Offline);
    }

    // The owner handle is the last one; dropping it unlinks the name.
    let name = region.name().to_owned();
    drop(region);
    assert!(Region::attach_named(&name).is_err(), "region name unallocated");
}

#[test]
fn broker_front_serves_every_join() {
    let mut opts = options(2, 0, 1_000_000, 0);
    opts.front_mode = FRONT_MODE_BROKER;
    let sim = Sim::start("broker-e2e", &opts, 4, 1);

    let stop = Arc::new(AtomicBool::new(false));
    let clock_thread = {
        let region = Arc::clone(&sim.region);
        let stop = Arc::clone(&stop);
        let settings = sim.clock_settings(SimTime::opening());
        std::thread::spawn(move || {
            let clock_loop = ClockLoop::new(&region, settings, None);
            clock_loop.run(move || stop.load(Ordering::Acquire), || false)
        })
    };

    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline && sim.region.shared().stats.services_completed() < 4 {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(sim.region.shared().stats.services_completed(), 4);
    assert_eq!(sim.region.shared().stats.tickets_issued(), 4);
    assert_eq!(
        sim.region.shared().total_waiting(),
        0,
        "broker depth accounting drains to zero"
    );

    stop.store(true, Ordering::Release);
    let _ = clock_thread.join().expect("clock thread");
    let _ = sim.shutdown();
}

#[test]
fn free_running_clock_reaches_duration() {
    // tick_nanos = 0: the clock must advance without sleeping, yet yield.
    let opts = options(1, 1, 0, 0);
    let sim = Sim::start("freerun", &opts, 0, 0);

    let clock_loop = ClockLoop::new(
        &sim.region,
        sim.clock_settings(SimTime::opening()),
        None,
    );
    let started = Instant::now();
    let reason = clock_loop.run(|| false, || false);
    assert_eq!(reason, TerminationReason::DurationReached);
    assert!(
        started.elapsed() < Duration::from_secs(15),
        "free-running day completes without per-tick sleeps"
    );

    let region = sim.shutdown();
    assert_eq!(region.shared().clock.now().day, 2);
}

#[test]
fn day_rollover_runs_one_barrier_per_day() {
    let opts = options(1, 0, 1_000_000, 0);
    let sim = Sim::start("rollover", &opts, 0, 0);

    let stop = Arc::new(AtomicBool::new(false));
    let clock_thread = {
        let region = Arc::clone(&sim.region);
        let stop = Arc::clone(&stop);
        // Two minutes to midnight: the day-2 barrier runs almost at once.
        let settings = sim.clock_settings(SimTime {
            day: 1,
            hour: 23,
            minute: 58,
        });
        std::thread::spawn(move || {
            let clock_loop = ClockLoop::new(&region, settings, None);
            clock_loop.run(move || stop.load(Ordering::Acquire), || false)
        })
    };

    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline && sim.region.shared().barrier.day_seq() < 2 {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(sim.region.shared().barrier.day_seq(), 2, "one rollover, one episode");
    assert!(!sim.region.shared().barrier.is_active(), "barrier released");

    stop.store(true, Ordering::Release);
    let _ = clock_thread.join().expect("clock thread");
    let _ = sim.shutdown();
}
