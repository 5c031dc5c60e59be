// Copyright The posim Authors
// SPDX-License-Identifier: Apache-2.0

//! Process signal handling.
//!
//! Handlers only flip atomics; all real work happens on the main loops.
//! The same termination flag backs the operator signals (TERM/INT) and the
//! control bridge's shutdown request, so both funnel into one cooperative
//! path.

use nix::sys::prctl;
use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};
use std::sync::atomic::{AtomicBool, Ordering};

static TERMINATE: AtomicBool = AtomicBool::new(false);
static CHILD_EVENT: AtomicBool = AtomicBool::new(false);

extern "C" fn on_terminate(_: nix::libc::c_int) {
    TERMINATE.store(true, Ordering::Release);
}

extern "C" fn on_child(_: nix::libc::c_int) {
    CHILD_EVENT.store(true, Ordering::Release);
}

/// Installs the Director's handlers: TERM/INT terminate, CHLD marks a
/// reapable child, SIGPIPE is ignored.
#[allow(unsafe_code)]
pub fn install_director() -> Result<(), nix::errno::Errno> {
    let term = SigAction::new(
        SigHandler::Handler(on_terminate),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    let child = SigAction::new(
        SigHandler::Handler(on_child),
        SaFlags::SA_RESTART | SaFlags::SA_NOCLDSTOP,
        SigSet::empty(),
    );
    let ignore = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
    // SAFETY: handlers are async-signal-safe (single atomic store).
    unsafe {
        let _ = sigaction(Signal::SIGTERM, &term)?;
        let _ = sigaction(Signal::SIGINT, &term)?;
        let _ = sigaction(Signal::SIGCHLD, &child)?;
        let _ = sigaction(Signal::SIGPIPE, &ignore)?;
    }
    Ok(())
}

/// Installs a child role's handlers: TERM/INT terminate, SIGPIPE ignored,
/// and the parent-death signal so orphans exit with the Director.
#[allow(unsafe_code)]
pub fn install_child() -> Result<(), nix::errno::Errno> {
    let term = SigAction::new(
        SigHandler::Handler(on_terminate),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    let ignore = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
    // SAFETY: handlers are async-signal-safe (single atomic store).
    unsafe {
        let _ = sigaction(Signal::SIGTERM, &term)?;
        let _ = sigaction(Signal::SIGINT, &term)?;
        let _ = sigaction(Signal::SIGPIPE, &ignore)?;
    }
    prctl::set_pdeathsig(Signal::SIGTERM)?;
    Ok(())
}

/// Whether a cooperative termination was requested.
pub fn terminate_requested() -> bool {
    TERMINATE.load(Ordering::Acquire)
}

/// Requests a cooperative termination.
///
/// This is the entry point the control bridge calls when instructed to
/// shut the simulation down; it is equivalent to receiving SIGTERM.
pub fn request_shutdown() {
    TERMINATE.store(true, Ordering::Release);
}

/// Consumes a pending "child changed state" event.
pub fn take_child_event() -> bool {
    CHILD_EVENT.swap(false, Ordering::AcqRel)
}
