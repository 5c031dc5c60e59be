// Copyright The posim Authors
// SPDX-License-Identifier: Apache-2.0

//! Errors for the director crate.

use miette::Diagnostic;

/// Errors that can occur while orchestrating a simulation run.
#[derive(thiserror::Error, Debug, Diagnostic)]
pub enum Error {
    /// A shared-region operation failed.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Region(#[from] posim_shm::Error),

    /// Signal handlers could not be installed.
    #[error("Cannot install signal handlers: errno {errno}")]
    #[diagnostic(code(posim::director::signal_setup))]
    SignalSetup {
        /// The underlying errno.
        errno: nix::errno::Errno,
    },

    /// The Director's own executable path could not be resolved.
    #[error("Cannot resolve current executable: {source}")]
    #[diagnostic(code(posim::director::current_exe))]
    CurrentExe {
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A child role failed to spawn.
    #[error("Cannot spawn child role `{role}`: {source}")]
    #[diagnostic(code(posim::director::spawn_child))]
    SpawnChild {
        /// The role that failed to start.
        role: &'static str,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },
}
