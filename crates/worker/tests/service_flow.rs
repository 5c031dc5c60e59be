// Copyright The posim Authors
// SPDX-License-Identifier: Apache-2.0

//! Worker host behavior against a live region.

use posim_shm::{CreateOptions, FRONT_MODE_FIFO, Region, SimTime, WorkerState};
use posim_worker::host::{WorkerHostSettings, run};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

fn options(n_workers: u32) -> CreateOptions {
    CreateOptions {
        n_workers,
        n_services: 2,
        sim_duration_days: 1,
        tick_nanos: 1_000_000,
        explode_threshold: 0,
        front_mode: FRONT_MODE_FIFO,
        serv_min_ms: 5,
        serv_max_ms: 15,
        is_headless: true,
        barrier_participants: 0,
    }
}

struct Host {
    region: Arc<Region>,
    keep_running: Arc<AtomicBool>,
    host: Option<std::thread::JoinHandle<()>>,
}

impl Host {
    fn start(case: &str, n_workers: u32) -> Self {
        let name = format!("/posim-test-worker-{}-{case}", std::process::id());
        let region = Arc::new(Region::create_named(&name, &options(n_workers)).expect("region"));
        let shared = region.shared();
        shared.clock.set_active(true);
        shared.clock.publish(SimTime::opening());

        let keep_running = Arc::new(AtomicBool::new(true));
        let host = {
            let region = Arc::clone(&region);
            let keep_running = Arc::clone(&keep_running);
            std::thread::spawn(move || {
                run(region, WorkerHostSettings::default(), keep_running).expect("host run");
            })
        };
        Self {
            region,
            keep_running,
            host: Some(host),
        }
    }

    fn wait_completed(&self, expected: u64, deadline: Duration) -> bool {
        let until = Instant::now() + deadline;
        while Instant::now() < until {
            if self.region.shared().stats.services_completed() >= expected {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }
}

impl Drop for Host {
    fn drop(&mut self) {
        self.keep_running.store(false, Ordering::Release);
        self.region.shared().clock.set_active(false);
        if let Some(host) = self.host.take() {
            host.join().expect("host thread");
        }
    }
}

#[test]
fn workers_register_round_robin() {
    let host = Host::start("register", 4);
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline
        && host
            .region
            .workers()
            .iter()
            .any(|w| w.state() == WorkerState::Offline)
    {
        std::thread::sleep(Duration::from_millis(5));
    }
    let workers = host.region.workers();
    assert_eq!(workers.len(), 4);
    for (index, record) in workers.iter().enumerate() {
        assert_ne!(record.state(), WorkerState::Offline);
        assert_eq!(record.service_type(), index as u32 % 2);
        assert_eq!(record.pid(), std::process::id());
    }
}

#[test]
fn pushed_tickets_are_served() {
    let host = Host::start("serve", 2);
    let shared = host.region.shared();

    for ticket in [11u32, 12, 13] {
        shared.queues[0].push(0, ticket, || true).expect("push");
    }
    shared.queues[0].notify_added_all();
    shared.queues[1].push(1, 21, || true).expect("push");
    shared.queues[1].notify_added_all();

    assert!(host.wait_completed(4, Duration::from_secs(5)), "4 services complete");
    assert_eq!(shared.queues[0].total_served(), 3);
    assert_eq!(shared.queues[1].total_served(), 1);
    assert_eq!(shared.queues[0].waiting_count(), 0);
    assert_eq!(shared.stats.services_completed(), 4);
    // Completion order between the two workers is not deterministic.
    assert!((11..=13).contains(&shared.queues[0].last_finished_ticket()));
}

#[test]
fn reassigned_worker_switches_queues() {
    let host = Host::start("reassign", 1);
    let shared = host.region.shared();
    let record = &host.region.workers()[0];

    // Wait for registration; the single worker starts on service 0.
    let deadline = Instant::now() + Duration::from_secs(2);
    while record.state() == WorkerState::Offline && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(record.service_type(), 0);

    record.reassign(1);
    assert!(record.reassignment_pending());
    shared.queues[1].push(1, 42, || true).expect("push");
    shared.queues[1].notify_added_all();

    assert!(host.wait_completed(1, Duration::from_secs(5)), "service on new queue");
    assert_eq!(shared.queues[1].total_served(), 1);
    assert!(!record.reassignment_pending(), "pending flag consumed");
    assert_eq!(record.service_type(), 1);
}

#[test]
fn shutdown_takes_workers_offline() {
    let mut host = Host::start("offline", 2);
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline
        && host
            .region
            .workers()
            .iter()
            .any(|w| w.state() == WorkerState::Offline)
    {
        std::thread::sleep(Duration::from_millis(5));
    }

    host.keep_running.store(false, Ordering::Release);
    host.region.shared().clock.set_active(false);
    if let Some(handle) = host.host.take() {
        handle.join().expect("host thread");
    }
    for record in host.region.workers() {
        assert_eq!(record.state(), WorkerState::Offline);
    }
}
