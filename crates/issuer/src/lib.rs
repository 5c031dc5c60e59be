// Copyright The posim Authors
// SPDX-License-Identifier: Apache-2.0

//! The ticket-service front-ends.
//!
//! Two interchangeable fronts serve the local endpoint:
//! - the FIFO **ticket issuer**: one request, one ticket, users enqueue on
//!   the shared ring buffers;
//! - the priority **work broker**: queue order is owned by per-service
//!   `(vip, arrival)` heaps and workers pull their next item over the
//!   socket instead of the rings.
//!
//! The accept loop runs on the caller's thread over a poll set; accepted
//! connections are handed to a fixed-size handler pool through a bounded
//! channel, so a saturated pool leaves new clients waiting in the accept
//! backlog instead of busy-looping. The accept thread also represents the
//! endpoint in the day-start barrier between poll cycles.

pub mod broker;
pub mod client;
pub mod error;
mod io;
pub mod server;

pub use broker::Broker;
pub use error::Error;
pub use server::{IssuerSettings, run};
