// Copyright The posim Authors
// SPDX-License-Identifier: Apache-2.0

//! Users manager against a live issuer and worker host.

use posim_issuer::server::IssuerSettings;
use posim_shm::{CreateOptions, FRONT_MODE_FIFO, Region, SimTime};
use posim_users::manager::{UsersManagerSettings, run as run_users};
use posim_worker::host::{WorkerHostSettings, run as run_workers};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

#[test]
fn configured_users_complete_their_requests() {
    let name = format!("/posim-test-users-{}", std::process::id());
    let region = Arc::new(
        Region::create_named(
            &name,
            &CreateOptions {
                n_workers: 2,
                n_services: 2,
                sim_duration_days: 1,
                tick_nanos: 1_000_000,
                explode_threshold: 0,
                front_mode: FRONT_MODE_FIFO,
                serv_min_ms: 5,
                serv_max_ms: 10,
                is_headless: true,
                barrier_participants: 0,
            },
        )
        .expect("region"),
    );
    let shared = region.shared();
    shared.clock.set_active(true);
    shared.clock.publish(SimTime::opening());

    let dir = tempfile::tempdir().expect("tempdir");
    let socket = dir.path().join("issuer.sock");
    let keep_running = Arc::new(AtomicBool::new(true));

    let issuer = {
        let region = Arc::clone(&region);
        let keep_running = Arc::clone(&keep_running);
        let settings = IssuerSettings {
            pool_size: 2,
            socket_path: Some(socket.clone()),
        };
        std::thread::spawn(move || posim_issuer::server::run(region, settings, keep_running))
    };
    let workers = {
        let region = Arc::clone(&region);
        let keep_running = Arc::clone(&keep_running);
        std::thread::spawn(move || run_workers(region, WorkerHostSettings::default(), keep_running))
    };
    let users = {
        let region = Arc::clone(&region);
        let keep_running = Arc::clone(&keep_running);
        let settings = UsersManagerSettings {
            initial_users: 3,
            n_requests: 2,
            batch: 2,
            pool_size: 16,
            service_pick: Default::default(),
            socket_path: Some(socket),
            install_signals: false,
        };
        std::thread::spawn(move || run_users(region, settings, keep_running))
    };

    // 3 users × 2 requests each.
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline && shared.stats.services_completed() < 6 {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(shared.stats.services_completed(), 6);
    assert_eq!(shared.stats.tickets_issued(), 6);
    assert_eq!(shared.stats.users_spawned(), 3);

    // Users retire on their own; nobody is respawned.
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline && shared.stats.users_connected() > 0 {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(shared.stats.users_connected(), 0);
    assert_eq!(shared.stats.users_spawned(), 3, "retired users are not replaced");

    keep_running.store(false, Ordering::Release);
    shared.clock.set_active(false);
    users.join().expect("users thread").expect("users run");
    workers.join().expect("worker thread").expect("worker run");
    issuer.join().expect("issuer thread").expect("issuer run");

    let total_served: u64 = shared.queues.iter().map(|q| q.total_served()).sum();
    assert_eq!(total_served, shared.stats.services_completed());
}
