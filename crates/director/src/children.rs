// Copyright The posim Authors
// SPDX-License-Identifier: Apache-2.0

//! Child process supervision.
//!
//! The Director re-execs its own binary with a role subcommand per child.
//! Children attach to the shared region on startup and arm the
//! parent-death signal themselves, so supervision here is only spawn,
//! non-blocking reap, and bounded-escalation shutdown.

use crate::DirectorSettings;
use crate::error::Error;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use std::fmt;
use std::process::{Child, Command, ExitStatus, Stdio};
use tracing::{debug, warn};

/// The child roles the Director launches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The ticket issuer / work broker process.
    Issuer,
    /// The worker host process.
    WorkerHost,
    /// The users manager process.
    UsersManager,
}

impl Role {
    /// The binary subcommand that starts this role.
    #[must_use]
    pub const fn subcommand(self) -> &'static str {
        match self {
            Role::Issuer => "issuer",
            Role::WorkerHost => "workers",
            Role::UsersManager => "users",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.subcommand())
    }
}

/// One reaped child.
#[derive(Debug)]
pub struct ChildExit {
    /// Which role exited.
    pub role: Role,
    /// Its exit status.
    pub status: ExitStatus,
}

struct ChildProc {
    role: Role,
    process: Child,
}

/// The set of live children.
pub struct ChildSet {
    children: Vec<ChildProc>,
}

impl ChildSet {
    /// A set with no children (in-process test runs).
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            children: Vec::new(),
        }
    }

    /// Whether every child has been reaped.
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Non-blocking reap of every exited child.
    pub fn reap(&mut self) -> Vec<ChildExit> {
        let mut exits = Vec::new();
        self.children.retain_mut(|child| {
            match child.process.try_wait() {
                Ok(Some(status)) => {
                    exits.push(ChildExit {
                        role: child.role,
                        status,
                    });
                    false
                }
                Ok(None) => true,
                Err(e) => {
                    warn!(role = %child.role, error = %e, "wait failed; dropping child record");
                    false
                }
            }
        });
        exits
    }

    /// Sends SIGTERM to every live child.
    pub fn terminate(&self) {
        for child in &self.children {
            let pid = Pid::from_raw(child.process.id() as i32);
            if let Err(e) = kill(pid, Signal::SIGTERM) {
                debug!(role = %child.role, error = %e, "SIGTERM failed");
            }
        }
    }

    /// Sends SIGKILL to every live child.
    pub fn kill(&mut self) {
        for child in &mut self.children {
            if let Err(e) = child.process.kill() {
                debug!(role = %child.role, error = %e, "SIGKILL failed");
            }
        }
    }
}

/// Spawns the three standard roles from the current executable.
pub fn spawn_all(settings: &DirectorSettings, region_name: &str) -> Result<ChildSet, Error> {
    let exe = std::env::current_exe().map_err(|source| Error::CurrentExe { source })?;
    let mut children = Vec::new();
    for role in [Role::Issuer, Role::WorkerHost, Role::UsersManager] {
        let mut command = Command::new(&exe);
        let _ = command
            .arg(role.subcommand())
            .arg("--region")
            .arg(region_name)
            .stdin(Stdio::null());
        if let Some(path) = &settings.config_path {
            let _ = command.arg("--config").arg(path);
        }
        if let Some(level) = &settings.loglevel {
            let _ = command.env("RUST_LOG", level);
        }
        let process = command.spawn().map_err(|source| Error::SpawnChild {
            role: role.subcommand(),
            source,
        })?;
        debug!(role = %role, pid = process.id(), "child spawned");
        children.push(ChildProc { role, process });
    }
    Ok(ChildSet { children })
}
