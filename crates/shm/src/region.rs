// Copyright The posim Authors
// SPDX-License-Identifier: Apache-2.0

//! Shared-region lifecycle.
//!
//! The Director creates, zero-initializes, and ultimately destroys the
//! region; every other participant only attaches and detaches. Creation
//! survives partial-failure previous runs by unlinking any stale object
//! with the same name before trying again, a bounded number of times.
//!
//! Attach maps the fixed-size header first, validates magic/version,
//! re-derives the full size from `params.n_workers`, and remaps when the
//! trailing worker records make the region larger than the header.

use crate::error::Error;
use crate::layout::{SimParams, SimRegion, WorkerRecord};
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::mman::{MapFlags, ProtFlags, mmap, munmap, shm_open, shm_unlink};
use nix::sys::stat::Mode;
use nix::unistd::ftruncate;
use std::num::NonZeroUsize;
use std::os::fd::OwnedFd;
use std::ptr::NonNull;

/// How many unlink-and-retry rounds creation performs on a name collision.
const CREATE_RETRIES: u32 = 3;

/// Values the Director seals into [`SimParams`] at creation.
#[derive(Debug, Clone)]
pub struct CreateOptions {
    /// Number of worker records to allocate.
    pub n_workers: u32,
    /// Number of active service types.
    pub n_services: u32,
    /// Simulated duration in days; `0` = unbounded.
    pub sim_duration_days: u32,
    /// Wall-clock nanoseconds per simulated minute.
    pub tick_nanos: u64,
    /// Overflow termination threshold; `0` disables it.
    pub explode_threshold: u32,
    /// Front-end selection word.
    pub front_mode: u32,
    /// Minimum simulated service time in milliseconds.
    pub serv_min_ms: u64,
    /// Maximum simulated service time in milliseconds.
    pub serv_max_ms: u64,
    /// Whether the run is headless.
    pub is_headless: bool,
    /// Day-start barrier participant count.
    pub barrier_participants: u32,
}

/// A mapped handle on the shared region.
///
/// Dropping the handle detaches (decrementing `connected_threads` when the
/// attach counted it); the creator's handle additionally unlinks the
/// object, leaving the name unallocated.
#[derive(Debug)]
pub struct Region {
    base: NonNull<SimRegion>,
    map_len: usize,
    name: String,
    owner: bool,
    counted: bool,
}

// The mapping is shared memory by construction; all access goes through
// atomics and process-shared primitives.
unsafe impl Send for Region {}
unsafe impl Sync for Region {}

impl Region {
    /// The per-user default region name.
    #[must_use]
    pub fn default_name() -> String {
        format!("/posim-{}", nix::unistd::Uid::current())
    }

    /// Creates and initializes the region under the default name.
    pub fn create(options: &CreateOptions) -> Result<Self, Error> {
        Self::create_named(&Self::default_name(), options)
    }

    /// Creates and initializes the region under an explicit name.
    pub fn create_named(name: &str, options: &CreateOptions) -> Result<Self, Error> {
        let size = SimRegion::byte_size(options.n_workers);
        let fd = open_exclusive(name)?;

        ftruncate(&fd, size as libc::off_t).map_err(|errno| match errno {
            Errno::ENOMEM | Errno::ENOSPC => Error::OutOfMemory { requested: size },
            other => Error::Os {
                operation: "ftruncate",
                source: other,
            },
        })?;

        let base = map(&fd, size)?;
        // ftruncate zero-fills, so every atomic starts at 0 and every
        // pthread object is in the expected pre-init state.
        let region = Self {
            base: base.cast(),
            map_len: size,
            name: name.to_owned(),
            owner: true,
            counted: false,
        };
        region.initialize(options)?;
        Ok(region)
    }

    /// Attaches to the region under the default name.
    pub fn attach() -> Result<Self, Error> {
        Self::attach_named(&Self::default_name())
    }

    /// Attaches to the region under an explicit name.
    pub fn attach_named(name: &str) -> Result<Self, Error> {
        let fd = shm_open(name, OFlag::O_RDWR, Mode::empty()).map_err(|errno| Error::Os {
            operation: "shm_open",
            source: errno,
        })?;

        // Map the fixed-size header first; the real size depends on
        // params.n_workers, which lives inside the mapping.
        let header_len = size_of::<SimRegion>();
        let base = map(&fd, header_len)?;
        let params: &SimParams = {
            // SAFETY: the mapping covers at least the header, and SimParams
            // is the first block of the repr(C) layout.
            unsafe { &base.cast::<SimRegion>().as_ref().params }
        };
        if !params.is_compatible() {
            let found_magic = params.magic();
            let found_version = params.version();
            // SAFETY: mapped above with header_len.
            unsafe { munmap(base, header_len) }.map_err(|errno| Error::Os {
                operation: "munmap",
                source: errno,
            })?;
            return Err(Error::IncompatibleRegion {
                name: name.to_owned(),
                found_magic,
                found_version,
            });
        }

        let full_len = SimRegion::byte_size(params.n_workers);
        let base = if full_len != header_len {
            // SAFETY: remap at the derived size; the old mapping is unused
            // past this point.
            unsafe { munmap(base, header_len) }.map_err(|errno| Error::Os {
                operation: "munmap",
                source: errno,
            })?;
            map(&fd, full_len)?
        } else {
            base
        };

        let region = Self {
            base: base.cast(),
            map_len: full_len,
            name: name.to_owned(),
            owner: false,
            counted: true,
        };
        region.shared().stats.inc_connected_threads();
        Ok(region)
    }

    /// The typed view of the region header.
    pub fn shared(&self) -> &SimRegion {
        // SAFETY: the mapping is at least byte_size(n_workers) long and the
        // creator initialized (or the attacher validated) the layout.
        unsafe { self.base.as_ref() }
    }

    /// The trailing worker records.
    pub fn workers(&self) -> &[WorkerRecord] {
        let n = self.shared().params.n_workers as usize;
        // SAFETY: byte_size reserves exactly n WorkerRecords after the
        // header, and WorkerRecord is a 64-byte POD of atomics.
        unsafe {
            let first = self
                .base
                .as_ptr()
                .cast::<u8>()
                .add(size_of::<SimRegion>())
                .cast::<WorkerRecord>();
            std::slice::from_raw_parts(first, n)
        }
    }

    /// A single worker record, bounds-checked.
    pub fn worker(&self, index: usize) -> Option<&WorkerRecord> {
        self.workers().get(index)
    }

    /// A service queue, validated against the configured service count.
    pub fn queue(&self, service: u32) -> Result<&crate::layout::ServiceQueue, Error> {
        let shared = self.shared();
        if service >= shared.params.n_services {
            return Err(Error::InvalidServiceType {
                got: service,
                max: shared.params.n_services,
            });
        }
        Ok(&shared.queues[service as usize])
    }

    /// The region's object name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this handle owns (created) the region.
    pub fn is_owner(&self) -> bool {
        self.owner
    }

    fn initialize(&self, options: &CreateOptions) -> Result<(), Error> {
        // Plain parameter words first; visible to attachers via the
        // release-store of the magic word in seal().
        //
        // SAFETY: the creator is the only process that can see the region
        // before seal(), so this exclusive rewrite of the params block
        // cannot race; no shared reference to the block exists yet.
        unsafe {
            let params = std::ptr::addr_of_mut!((*self.base.as_ptr()).params);
            (*params).n_workers = options.n_workers;
            (*params).n_services = options.n_services;
            (*params).sim_duration_days = options.sim_duration_days;
            (*params).tick_nanos = options.tick_nanos;
            (*params).explode_threshold = options.explode_threshold;
            (*params).front_mode = options.front_mode;
            (*params).serv_min_ms = options.serv_min_ms;
            (*params).serv_max_ms = options.serv_max_ms;
            (*params).is_headless = u32::from(options.is_headless);
            (*params).barrier_participants = options.barrier_participants;
        }

        let shared = self.shared();
        shared.init_primitives()?;
        shared
            .barrier
            .set_required_count(options.barrier_participants);
        shared.params.seal();
        Ok(())
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        if self.counted {
            self.shared().stats.dec_connected_threads();
        }
        // SAFETY: base/map_len describe the live mapping; nothing uses the
        // handle past drop.
        let _ = unsafe { munmap(self.base.cast(), self.map_len) };
        if self.owner {
            let _ = shm_unlink(self.name.as_str());
        }
    }
}

fn open_exclusive(name: &str) -> Result<OwnedFd, Error> {
    let mut attempts = 0;
    loop {
        match shm_open(
            name,
            OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_RDWR,
            Mode::S_IRUSR | Mode::S_IWUSR,
        ) {
            Ok(fd) => return Ok(fd),
            Err(Errno::EEXIST) => {
                attempts += 1;
                if attempts > CREATE_RETRIES {
                    return Err(Error::NameCollision {
                        name: name.to_owned(),
                        attempts,
                    });
                }
                // A previous run died without cleanup; reclaim the name.
                match shm_unlink(name) {
                    Ok(()) | Err(Errno::ENOENT) => {}
                    Err(errno) => {
                        return Err(Error::Os {
                            operation: "shm_unlink",
                            source: errno,
                        });
                    }
                }
            }
            Err(errno) => {
                return Err(Error::Os {
                    operation: "shm_open",
                    source: errno,
                });
            }
        }
    }
}

fn map(fd: &OwnedFd, len: usize) -> Result<NonNull<libc::c_void>, Error> {
    let len_nz = NonZeroUsize::new(len).ok_or(Error::OutOfMemory { requested: len })?;
    // SAFETY: mapping a shm fd we own, MAP_SHARED, offset 0.
    unsafe {
        mmap(
            None,
            len_nz,
            ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
            MapFlags::MAP_SHARED,
            fd,
            0,
        )
    }
    .map_err(|errno| match errno {
        Errno::ENOMEM => Error::OutOfMemory { requested: len },
        other => Error::Os {
            operation: "mmap",
            source: other,
        },
    })
}
