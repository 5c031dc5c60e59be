// Copyright The posim Authors
// SPDX-License-Identifier: Apache-2.0

//! The worker host.
//!
//! One process runs `n_workers` service threads. The host registers as a
//! **single** day-barrier participant: a coordinator thread performs the
//! Director-facing handshake and fans the acknowledged day out to its
//! peers through an in-process gate, so the barrier protocol stays
//! oblivious to thread counts.
//!
//! Each worker thread owns one shared [`posim_shm::WorkerRecord`] and runs
//! the claim → serve → complete loop until shutdown.

pub mod error;
mod gate;
pub mod host;
pub mod service;

pub use error::Error;
pub use host::{WorkerHostSettings, run};
