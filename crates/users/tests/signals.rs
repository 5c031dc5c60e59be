// Copyright The posim Authors
// SPDX-License-Identifier: Apache-2.0

//! Population-control signal plumbing.
//!
//! One test owns the whole flow: handlers are process-global state, so
//! splitting assertions across tests would race the shared counters.

use nix::sys::signal::{Signal, raise};
use posim_users::signals;

#[test]
fn usr1_and_usr2_requests_are_counted_and_consumed() {
    signals::install().expect("install handlers");

    raise(Signal::SIGUSR1).expect("raise USR1");
    raise(Signal::SIGUSR1).expect("raise USR1");
    raise(Signal::SIGUSR2).expect("raise USR2");

    assert_eq!(signals::take_add_requests(), 2);
    assert_eq!(signals::take_remove_requests(), 1);

    // Consumed: a second take sees nothing.
    assert_eq!(signals::take_add_requests(), 0);
    assert_eq!(signals::take_remove_requests(), 0);
}
