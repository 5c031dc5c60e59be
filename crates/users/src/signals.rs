// Copyright The posim Authors
// SPDX-License-Identifier: Apache-2.0

//! Signal-driven population control.
//!
//! `SIGUSR1` queues one "raise the target population" request, `SIGUSR2`
//! one "lower" request. Handlers only bump an atomic; the reconcile loop
//! consumes the pending counts on its next pass.

use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};
use std::sync::atomic::{AtomicU32, Ordering};

static ADD_REQUESTS: AtomicU32 = AtomicU32::new(0);
static REMOVE_REQUESTS: AtomicU32 = AtomicU32::new(0);

extern "C" fn on_usr1(_: nix::libc::c_int) {
    let _ = ADD_REQUESTS.fetch_add(1, Ordering::Relaxed);
}

extern "C" fn on_usr2(_: nix::libc::c_int) {
    let _ = REMOVE_REQUESTS.fetch_add(1, Ordering::Relaxed);
}

/// Installs the USR1/USR2 handlers for the manager process.
#[allow(unsafe_code)]
pub fn install() -> Result<(), nix::errno::Errno> {
    let usr1 = SigAction::new(
        SigHandler::Handler(on_usr1),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    let usr2 = SigAction::new(
        SigHandler::Handler(on_usr2),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    // SAFETY: the handlers are async-signal-safe (single atomic increment).
    unsafe {
        let _ = sigaction(Signal::SIGUSR1, &usr1)?;
        let _ = sigaction(Signal::SIGUSR2, &usr2)?;
    }
    Ok(())
}

/// Consumes all pending "raise" requests.
pub fn take_add_requests() -> u32 {
    ADD_REQUESTS.swap(0, Ordering::AcqRel)
}

/// Consumes all pending "lower" requests.
pub fn take_remove_requests() -> u32 {
    REMOVE_REQUESTS.swap(0, Ordering::AcqRel)
}
