// Copyright The posim Authors
// SPDX-License-Identifier: Apache-2.0

//! Errors for the users crate.

use miette::Diagnostic;

/// Errors that can occur while running the users manager.
#[derive(thiserror::Error, Debug, Diagnostic)]
pub enum Error {
    /// The USR1/USR2 handlers could not be installed.
    #[error("Cannot install population-control signal handlers: errno {errno}")]
    #[diagnostic(code(posim::users::signal_setup))]
    SignalSetup {
        /// The underlying errno.
        errno: nix::errno::Errno,
    },
}
