// Copyright The posim Authors
// SPDX-License-Identifier: Apache-2.0

//! Simulation configuration.
//!
//! Data model:
//! - `[simulation]` — simulated duration, tick length, overflow threshold
//! - `[workers]` — worker pool sizing
//! - `[users]` — user population and per-request behavior
//! - `[users_manager]` — signal-driven batch sizing and slot pool capacity
//! - `[ticket_issuer]` — handler pool sizing and front-end selection
//! - `[load_balance]` — dynamic worker reassignment policy
//!
//! Every section and every key is optional; missing keys fall back to the
//! defaults documented on each field. Key names are kept in the upper-case
//! form used by the historical INI files so existing config files keep
//! working after the format moved to TOML sections.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

pub mod error;

use error::Error;

/// Upper bound on the configurable user slot pool.
pub const MAX_USER_POOL: u32 = 2048;

/// Number of service types compiled into the simulation.
///
/// Mirrors `posim_shm::SIM_MAX_SERVICE_TYPES`; duplicated here so the config
/// crate stays leaf-level (validation must not depend on the shm crate).
pub const N_SERVICE_TYPES: u32 = 4;

/// Front-end protocol selection for ticket distribution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrontMode {
    /// FIFO ticket issuer; users enqueue on the shared ring buffers.
    #[default]
    Fifo,
    /// Priority work broker; queue order is owned by the broker process.
    Broker,
}

/// `[simulation]` section.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct SimulationSection {
    /// Simulated duration in days; `0` runs until external termination.
    #[serde(rename = "SIM_DURATION")]
    pub sim_duration: u32,
    /// Wall-clock nanoseconds per simulated minute; `0` means "as fast as
    /// possible" (the clock loop yields instead of sleeping).
    #[serde(rename = "N_NANO_SECS")]
    pub n_nano_secs: u64,
    /// Total users waiting across all queues that triggers overflow
    /// termination; `0` disables the predicate.
    #[serde(rename = "EXPLODE_THRESHOLD")]
    pub explode_threshold: u32,
}

impl Default for SimulationSection {
    fn default() -> Self {
        Self {
            sim_duration: 5,
            n_nano_secs: 50_000_000,
            explode_threshold: 100,
        }
    }
}

/// `[workers]` section.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct WorkersSection {
    /// Number of worker threads hosted by the worker process.
    /// Overridden by the `--workers` CLI flag when present.
    #[serde(rename = "NOF_WORKERS")]
    pub nof_workers: u32,
}

impl Default for WorkersSection {
    fn default() -> Self {
        Self { nof_workers: 4 }
    }
}

/// `[users]` section.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct UsersSection {
    /// Initial target user population.
    #[serde(rename = "NOF_USERS")]
    pub nof_users: u32,
    /// Service requests each user performs before retiring.
    #[serde(rename = "N_REQUESTS")]
    pub n_requests: u32,
    /// Minimum simulated service time, in milliseconds.
    #[serde(rename = "P_SERV_MIN")]
    pub p_serv_min: u64,
    /// Maximum simulated service time, in milliseconds.
    #[serde(rename = "P_SERV_MAX")]
    pub p_serv_max: u64,
}

impl Default for UsersSection {
    fn default() -> Self {
        Self {
            nof_users: 20,
            n_requests: 1,
            p_serv_min: 30,
            p_serv_max: 120,
        }
    }
}

/// `[users_manager]` section.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct UsersManagerSection {
    /// Batch size applied when the population is raised (SIGUSR1) or
    /// lowered (SIGUSR2).
    #[serde(rename = "N_NEW_USERS")]
    pub n_new_users: u32,
    /// Capacity of the user slot pool.
    #[serde(rename = "POOL_SIZE")]
    pub pool_size: u32,
}

impl Default for UsersManagerSection {
    fn default() -> Self {
        Self {
            n_new_users: 5,
            pool_size: 1024,
        }
    }
}

/// `[ticket_issuer]` section.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct TicketIssuerSection {
    /// Number of connection handler threads.
    #[serde(rename = "POOL_SIZE")]
    pub pool_size: u32,
    /// Front-end protocol served on the endpoint.
    #[serde(rename = "FRONT")]
    pub front: FrontMode,
}

impl Default for TicketIssuerSection {
    fn default() -> Self {
        Self {
            pool_size: 4,
            front: FrontMode::Fifo,
        }
    }
}

/// `[load_balance]` section.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct LoadBalanceSection {
    /// Master switch for the balancer.
    #[serde(rename = "ENABLED")]
    pub enabled: bool,
    /// Simulated minutes between balance checks.
    #[serde(rename = "CHECK_INTERVAL")]
    pub check_interval: u32,
    /// Percentage ratio `max/min` that triggers a reassignment (e.g. `200`
    /// means the busiest queue must be twice as deep as the idlest).
    #[serde(rename = "IMBALANCE_THRESHOLD")]
    pub imbalance_threshold: u32,
    /// Depth below which the busiest queue is never considered overloaded.
    #[serde(rename = "MIN_QUEUE_DEPTH")]
    pub min_queue_depth: u32,
}

impl Default for LoadBalanceSection {
    fn default() -> Self {
        Self {
            enabled: false,
            check_interval: 30,
            imbalance_threshold: 200,
            min_queue_depth: 3,
        }
    }
}

/// Complete simulation configuration, one field per file section.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct SimConfig {
    /// `[simulation]` section.
    pub simulation: SimulationSection,
    /// `[workers]` section.
    pub workers: WorkersSection,
    /// `[users]` section.
    pub users: UsersSection,
    /// `[users_manager]` section.
    pub users_manager: UsersManagerSection,
    /// `[ticket_issuer]` section.
    pub ticket_issuer: TicketIssuerSection,
    /// `[load_balance]` section.
    pub load_balance: LoadBalanceSection,
}

impl SimConfig {
    /// Loads and validates a configuration file.
    ///
    /// The returned configuration is guaranteed to pass [`SimConfig::validate`].
    pub fn from_file(path: &Path) -> Result<Self, Error> {
        let raw = std::fs::read_to_string(path).map_err(|e| Error::FileReadError {
            path: path.display().to_string(),
            details: e.to_string(),
        })?;
        let config = Self::from_str_checked(&raw)?;
        Ok(config)
    }

    /// Parses and validates configuration text.
    pub fn from_str_checked(raw: &str) -> Result<Self, Error> {
        let config: Self = toml::from_str(raw).map_err(|e| Error::DeserializationError {
            details: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validates every section, collecting all violations before failing.
    pub fn validate(&self) -> Result<(), Error> {
        let mut errors = Vec::new();

        if self.workers.nof_workers == 0 {
            errors.push(Error::ValueOutOfRange {
                section: "workers",
                key: "NOF_WORKERS",
                details: "must be >= 1".into(),
            });
        }
        if self.users.p_serv_min > self.users.p_serv_max {
            errors.push(Error::ValueOutOfRange {
                section: "users",
                key: "P_SERV_MIN",
                details: format!(
                    "P_SERV_MIN ({}) must not exceed P_SERV_MAX ({})",
                    self.users.p_serv_min, self.users.p_serv_max
                ),
            });
        }
        if self.users.p_serv_max == 0 {
            errors.push(Error::ValueOutOfRange {
                section: "users",
                key: "P_SERV_MAX",
                details: "must be >= 1 millisecond".into(),
            });
        }
        if self.users_manager.pool_size == 0 || self.users_manager.pool_size > MAX_USER_POOL {
            errors.push(Error::ValueOutOfRange {
                section: "users_manager",
                key: "POOL_SIZE",
                details: format!("must be in 1..={MAX_USER_POOL}"),
            });
        }
        if self.users.nof_users > self.users_manager.pool_size {
            errors.push(Error::ValueOutOfRange {
                section: "users",
                key: "NOF_USERS",
                details: format!(
                    "initial population ({}) exceeds the slot pool ({})",
                    self.users.nof_users, self.users_manager.pool_size
                ),
            });
        }
        if self.users_manager.n_new_users == 0 {
            errors.push(Error::ValueOutOfRange {
                section: "users_manager",
                key: "N_NEW_USERS",
                details: "must be >= 1".into(),
            });
        }
        if self.ticket_issuer.pool_size == 0 {
            errors.push(Error::ValueOutOfRange {
                section: "ticket_issuer",
                key: "POOL_SIZE",
                details: "must be >= 1".into(),
            });
        }
        if self.load_balance.enabled {
            if self.load_balance.check_interval == 0 {
                errors.push(Error::ValueOutOfRange {
                    section: "load_balance",
                    key: "CHECK_INTERVAL",
                    details: "must be >= 1 simulated minute".into(),
                });
            }
            if self.load_balance.imbalance_threshold < 100 {
                errors.push(Error::ValueOutOfRange {
                    section: "load_balance",
                    key: "IMBALANCE_THRESHOLD",
                    details: "must be >= 100 (a percentage ratio)".into(),
                });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::InvalidConfiguration { errors })
        }
    }

    /// Wall-clock length of one simulated minute.
    #[must_use]
    pub const fn tick_len(&self) -> Duration {
        Duration::from_nanos(self.simulation.n_nano_secs)
    }
}
