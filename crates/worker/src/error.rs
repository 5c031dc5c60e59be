// Copyright The posim Authors
// SPDX-License-Identifier: Apache-2.0

//! Errors for the worker crate.

use miette::Diagnostic;

/// Errors that can occur while running the worker host.
#[derive(thiserror::Error, Debug, Diagnostic)]
pub enum Error {
    /// A worker thread could not be spawned.
    #[error("Failed to spawn worker thread '{thread_name}': {source}")]
    #[diagnostic(code(posim::worker::spawn))]
    ThreadSpawn {
        /// Name of the thread we attempted to spawn.
        thread_name: String,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// A worker thread panicked.
    #[error("Worker thread '{thread_name}' panicked")]
    #[diagnostic(code(posim::worker::panic))]
    ThreadPanic {
        /// Name of the thread that panicked.
        thread_name: String,
    },
}
