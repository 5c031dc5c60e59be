// Copyright The posim Authors
// SPDX-License-Identifier: Apache-2.0

//! Errors for the issuer crate.

use miette::Diagnostic;
use std::path::PathBuf;

/// Errors that can occur while running or talking to a front-end.
#[derive(thiserror::Error, Debug, Diagnostic)]
pub enum Error {
    /// The listening socket could not be created.
    #[error("Cannot bind ticket endpoint at `{path}`: {source}")]
    #[diagnostic(code(posim::issuer::bind))]
    Bind {
        /// The attempted socket path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The endpoint directory could not be prepared.
    #[error("Cannot prepare endpoint directory: {source}")]
    #[diagnostic(code(posim::issuer::endpoint_dir))]
    EndpointDir {
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// An I/O operation on a connection failed past the retry bound.
    #[error("Connection {operation} failed: {source}")]
    #[diagnostic(code(posim::issuer::io))]
    Io {
        /// Which operation failed (`"read"`, `"write"`, `"connect"`).
        operation: &'static str,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The peer violated the wire protocol.
    #[error(transparent)]
    #[diagnostic(code(posim::issuer::protocol))]
    Protocol(#[from] posim_wire::Error),

    /// The peer sent a message type not expected in this exchange.
    #[error("Unexpected message type {got:?}")]
    #[diagnostic(code(posim::issuer::unexpected_message))]
    UnexpectedMessage {
        /// The received message type.
        got: posim_wire::MsgType,
    },

    /// Connecting to the endpoint failed after every allowed attempt.
    #[error("Endpoint at `{path}` unreachable after {attempts} attempts")]
    #[diagnostic(code(posim::issuer::unreachable))]
    Unreachable {
        /// The socket path that was dialed.
        path: PathBuf,
        /// Number of connect attempts performed.
        attempts: u32,
    },

    /// A shared-region operation failed.
    #[error(transparent)]
    Region(#[from] posim_shm::Error),

    /// A handler thread disappeared (panicked) while the server was running.
    #[error("Handler pool thread `{name}` terminated unexpectedly")]
    #[diagnostic(code(posim::issuer::pool_thread))]
    PoolThread {
        /// Name of the lost thread.
        name: String,
    },
}
