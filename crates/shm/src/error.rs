// Copyright The posim Authors
// SPDX-License-Identifier: Apache-2.0

//! Errors for the shared-memory crate.

use miette::Diagnostic;

/// Errors that can occur while creating, attaching, or operating on the
/// shared region.
#[derive(thiserror::Error, Debug, Diagnostic)]
pub enum Error {
    /// The region could not be allocated.
    #[error("Out of memory while sizing the shared region to {requested} bytes")]
    #[diagnostic(code(posim::shm::out_of_memory))]
    OutOfMemory {
        /// The requested region size.
        requested: usize,
    },

    /// A same-named object kept reappearing across unlink retries.
    #[error("Shared-memory name `{name}` collides and could not be reclaimed after {attempts} attempts")]
    #[diagnostic(code(posim::shm::name_collision))]
    NameCollision {
        /// The contested object name.
        name: String,
        /// How many unlink-and-retry rounds were performed.
        attempts: u32,
    },

    /// A process-shared mutex or condition variable failed to initialize.
    #[error("Cannot initialize process-shared {what}: errno {errno}")]
    #[diagnostic(code(posim::shm::primitive_init))]
    PrimitiveInit {
        /// Which primitive failed (`"mutex"`, `"condvar"`).
        what: &'static str,
        /// The raw errno returned by the pthread call.
        errno: i32,
    },

    /// A system call failed during region creation or attach.
    #[error("Shared-memory {operation} failed: {source}")]
    #[diagnostic(code(posim::shm::os_error))]
    Os {
        /// Which operation failed (`"shm_open"`, `"ftruncate"`, `"mmap"`, ...).
        operation: &'static str,
        /// The underlying OS error.
        #[source]
        source: nix::errno::Errno,
    },

    /// The mapped object does not carry the expected magic/version words.
    ///
    /// Either a stale object from an incompatible build, or attach raced a
    /// creator that never finished initializing.
    #[error("Region `{name}` is not a compatible simulation region (magic {found_magic:#x}, version {found_version})")]
    #[diagnostic(code(posim::shm::incompatible_region))]
    IncompatibleRegion {
        /// The object name that was attached.
        name: String,
        /// Magic word found in the mapping.
        found_magic: u64,
        /// Version word found in the mapping.
        found_version: u32,
    },

    /// A service index outside `0..n_services` was used.
    #[error("Service type {got} out of range (configured services: {max})")]
    #[diagnostic(code(posim::shm::invalid_service))]
    InvalidServiceType {
        /// The offending index.
        got: u32,
        /// Number of configured services.
        max: u32,
    },

    /// A ring slot stayed in the wrong state past the protocol bound.
    ///
    /// This is an invariant violation: the simulation state is corrupt and
    /// the role is expected to bail out.
    #[error("Ring slot stall on service queue {service} (slot index {slot})")]
    #[diagnostic(code(posim::shm::ring_stall))]
    RingStall {
        /// The queue on which the stall was observed.
        service: u32,
        /// The absolute slot index that never changed state.
        slot: u64,
    },

    /// A blocking queue operation was abandoned by cooperative cancellation.
    #[error("Queue operation cancelled")]
    #[diagnostic(code(posim::shm::cancelled))]
    Cancelled,
}
