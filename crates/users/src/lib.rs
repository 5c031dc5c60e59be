// Copyright The posim Authors
// SPDX-License-Identifier: Apache-2.0

//! The users manager.
//!
//! Maintains a target population of user agents (threads) over a bounded
//! slot pool. The target is raised and lowered at runtime by a pair of
//! user signals; the reconcile loop converges the active population onto
//! the target by claiming slots for new users or cooperatively cancelling
//! running ones (reverse scan, newest first).
//!
//! The manager registers as one participant in the day-start barrier.

pub mod error;
pub mod lifecycle;
pub mod manager;
pub mod signals;
pub mod slots;

pub use error::Error;
pub use manager::{ServicePick, UsersManagerSettings, run};
pub use slots::SlotPool;
