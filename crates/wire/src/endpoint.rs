// Copyright The posim Authors
// SPDX-License-Identifier: Apache-2.0

//! Endpoint path policy.
//!
//! The listening socket lives in a user-private directory: the runtime dir
//! when the session provides one, otherwise a per-uid directory under
//! `/tmp`. The directory is created with owner-only permissions.

use std::io;
use std::os::unix::fs::DirBuilderExt;
use std::path::PathBuf;

/// File name of the ticket-service socket.
pub const SOCKET_FILE: &str = "issuer.sock";

/// Resolves the per-user socket path.
///
/// `$XDG_RUNTIME_DIR/posim/issuer.sock` when the variable names an absolute
/// path, else `/tmp/posim-<uid>/issuer.sock`.
#[must_use]
pub fn socket_path() -> PathBuf {
    socket_dir().join(SOCKET_FILE)
}

/// Resolves the directory that holds the socket.
#[must_use]
pub fn socket_dir() -> PathBuf {
    match std::env::var_os("XDG_RUNTIME_DIR") {
        Some(dir) if PathBuf::from(&dir).is_absolute() => PathBuf::from(dir).join("posim"),
        _ => PathBuf::from(format!("/tmp/posim-{}", nix::unistd::Uid::current())),
    }
}

/// Creates the socket directory with `0700` permissions.
///
/// Succeeds if the directory already exists; permissions of an existing
/// directory are left untouched.
pub fn prepare_socket_dir() -> io::Result<PathBuf> {
    let dir = socket_dir();
    match std::fs::DirBuilder::new().mode(0o700).create(&dir) {
        Ok(()) => Ok(dir),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(dir),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_ends_with_socket_file() {
        assert!(socket_path().ends_with(SOCKET_FILE));
    }

    #[test]
    fn dir_is_absolute() {
        assert!(socket_dir().is_absolute());
    }
}
