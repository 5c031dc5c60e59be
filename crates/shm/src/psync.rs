// Copyright The posim Authors
// SPDX-License-Identifier: Apache-2.0

//! Process-shared mutexes and condition variables.
//!
//! Thin typed wrappers over raw `pthread` objects living inside the shared
//! region. Both are initialized exactly once by the region creator with
//! `PTHREAD_PROCESS_SHARED`; condition variables additionally use
//! `CLOCK_MONOTONIC` so timed waits are immune to wall-clock steps.
//!
//! The wrappers are only meaningful in place: they are never constructed on
//! the Rust side, only reinterpreted from zeroed shared memory and then
//! initialized through [`SharedMutex::init`] / [`SharedCondvar::init`].

use crate::error::Error;
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::time::Duration;

/// Outcome of a timed condition wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The condition variable was signaled or broadcast.
    Notified,
    /// The timeout elapsed first.
    TimedOut,
}

/// A mutex shared across processes through the mapped region.
#[repr(C)]
pub struct SharedMutex {
    inner: UnsafeCell<libc::pthread_mutex_t>,
}

impl std::fmt::Debug for SharedMutex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedMutex").finish_non_exhaustive()
    }
}

// The raw pthread object is the cross-process synchronization primitive
// itself; sharing references across threads is the whole point.
unsafe impl Send for SharedMutex {}
unsafe impl Sync for SharedMutex {}

impl SharedMutex {
    /// Initializes the mutex in place with the process-shared attribute.
    ///
    /// Must be called exactly once, by the region creator, on zeroed memory.
    pub(crate) fn init(&self) -> Result<(), Error> {
        let mut attr = MaybeUninit::<libc::pthread_mutexattr_t>::uninit();
        // SAFETY: attr is a valid out-pointer; init/setpshared/destroy is the
        // canonical attribute lifecycle.
        unsafe {
            check("mutex", libc::pthread_mutexattr_init(attr.as_mut_ptr()))?;
            let rc = libc::pthread_mutexattr_setpshared(
                attr.as_mut_ptr(),
                libc::PTHREAD_PROCESS_SHARED,
            );
            if rc != 0 {
                let _ = libc::pthread_mutexattr_destroy(attr.as_mut_ptr());
                return Err(Error::PrimitiveInit {
                    what: "mutex",
                    errno: rc,
                });
            }
            let rc = libc::pthread_mutex_init(self.inner.get(), attr.as_ptr());
            let _ = libc::pthread_mutexattr_destroy(attr.as_mut_ptr());
            check("mutex", rc)?;
        }
        Ok(())
    }

    /// Locks the mutex, returning a guard that unlocks on drop.
    pub fn lock(&self) -> SharedMutexGuard<'_> {
        // SAFETY: the mutex was initialized by the region creator before any
        // participant could obtain a reference to it.
        let rc = unsafe { libc::pthread_mutex_lock(self.inner.get()) };
        // Lock failure on a correctly initialized, non-recursive mutex means
        // the region is corrupt; there is no meaningful recovery.
        debug_assert_eq!(rc, 0, "pthread_mutex_lock failed: {rc}");
        SharedMutexGuard { mutex: self }
    }

    fn raw(&self) -> *mut libc::pthread_mutex_t {
        self.inner.get()
    }
}

/// Scoped lock on a [`SharedMutex`]; releases on all exit paths.
pub struct SharedMutexGuard<'a> {
    mutex: &'a SharedMutex,
}

impl Drop for SharedMutexGuard<'_> {
    fn drop(&mut self) {
        // SAFETY: guard existence proves the calling thread holds the lock.
        let rc = unsafe { libc::pthread_mutex_unlock(self.mutex.raw()) };
        debug_assert_eq!(rc, 0, "pthread_mutex_unlock failed: {rc}");
    }
}

/// A condition variable shared across processes through the mapped region.
#[repr(C)]
pub struct SharedCondvar {
    inner: UnsafeCell<libc::pthread_cond_t>,
}

impl std::fmt::Debug for SharedCondvar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedCondvar").finish_non_exhaustive()
    }
}

unsafe impl Send for SharedCondvar {}
unsafe impl Sync for SharedCondvar {}

impl SharedCondvar {
    /// Initializes the condvar in place: process-shared, monotonic clock.
    ///
    /// Must be called exactly once, by the region creator, on zeroed memory.
    pub(crate) fn init(&self) -> Result<(), Error> {
        let mut attr = MaybeUninit::<libc::pthread_condattr_t>::uninit();
        // SAFETY: same attribute lifecycle as the mutex case.
        unsafe {
            check("condvar", libc::pthread_condattr_init(attr.as_mut_ptr()))?;
            let mut rc = libc::pthread_condattr_setpshared(
                attr.as_mut_ptr(),
                libc::PTHREAD_PROCESS_SHARED,
            );
            if rc == 0 {
                rc = libc::pthread_condattr_setclock(attr.as_mut_ptr(), libc::CLOCK_MONOTONIC);
            }
            if rc != 0 {
                let _ = libc::pthread_condattr_destroy(attr.as_mut_ptr());
                return Err(Error::PrimitiveInit {
                    what: "condvar",
                    errno: rc,
                });
            }
            let rc = libc::pthread_cond_init(self.inner.get(), attr.as_ptr());
            let _ = libc::pthread_condattr_destroy(attr.as_mut_ptr());
            check("condvar", rc)?;
        }
        Ok(())
    }

    /// Wakes one waiter. The caller should hold the associated mutex.
    pub fn signal(&self) {
        // SAFETY: initialized before publication, as for lock().
        let rc = unsafe { libc::pthread_cond_signal(self.inner.get()) };
        debug_assert_eq!(rc, 0, "pthread_cond_signal failed: {rc}");
    }

    /// Wakes every waiter. The caller should hold the associated mutex.
    pub fn broadcast(&self) {
        // SAFETY: initialized before publication, as for lock().
        let rc = unsafe { libc::pthread_cond_broadcast(self.inner.get()) };
        debug_assert_eq!(rc, 0, "pthread_cond_broadcast failed: {rc}");
    }

    /// Waits on the condvar with a timeout, releasing `guard`'s mutex while
    /// blocked and re-acquiring it before returning.
    ///
    /// Spurious wake-ups are reported as [`WaitOutcome::Notified`]; callers
    /// follow the recheck → timed-wait → recheck idiom so this is harmless.
    pub fn wait_timeout(&self, guard: &mut SharedMutexGuard<'_>, timeout: Duration) -> WaitOutcome {
        let deadline = monotonic_deadline(timeout);
        // SAFETY: guard proves the mutex is held by this thread; the condvar
        // and mutex both live in the shared region and were initialized with
        // matching process-shared attributes.
        let rc = unsafe {
            libc::pthread_cond_timedwait(self.inner.get(), guard.mutex.raw(), &deadline)
        };
        match rc {
            0 => WaitOutcome::Notified,
            libc::ETIMEDOUT => WaitOutcome::TimedOut,
            other => {
                debug_assert_eq!(other, 0, "pthread_cond_timedwait failed: {other}");
                WaitOutcome::TimedOut
            }
        }
    }
}

/// Computes a `CLOCK_MONOTONIC` absolute deadline `timeout` from now.
fn monotonic_deadline(timeout: Duration) -> libc::timespec {
    let mut now = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: plain out-pointer syscall.
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut now) };
    debug_assert_eq!(rc, 0, "clock_gettime failed");

    const NANOS_PER_SEC: i64 = 1_000_000_000;
    let mut sec = now.tv_sec.saturating_add(timeout.as_secs() as libc::time_t);
    let mut nsec = now.tv_nsec + i64::from(timeout.subsec_nanos());
    if nsec >= NANOS_PER_SEC {
        sec = sec.saturating_add(1);
        nsec -= NANOS_PER_SEC;
    }
    libc::timespec {
        tv_sec: sec,
        tv_nsec: nsec,
    }
}

fn check(what: &'static str, rc: i32) -> Result<(), Error> {
    if rc == 0 {
        Ok(())
    } else {
        Err(Error::PrimitiveInit { what, errno: rc })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::MaybeUninit;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    struct Pair {
        mutex: SharedMutex,
        cond: SharedCondvar,
        value: AtomicU32,
    }

    fn zeroed_pair() -> Arc<Pair> {
        // Within a single process, zeroed + init is the same lifecycle the
        // region creator performs on mapped memory.
        let pair: Pair = unsafe { MaybeUninit::zeroed().assume_init() };
        pair.mutex.init().expect("mutex init");
        pair.cond.init().expect("cond init");
        Arc::new(pair)
    }

    #[test]
    fn timed_wait_times_out() {
        let pair = zeroed_pair();
        let mut guard = pair.mutex.lock();
        let started = Instant::now();
        let outcome = pair
            .cond
            .wait_timeout(&mut guard, Duration::from_millis(50));
        assert_eq!(outcome, WaitOutcome::TimedOut);
        assert!(started.elapsed() >= Duration::from_millis(45));
    }

    #[test]
    fn broadcast_wakes_waiter() {
        let pair = zeroed_pair();
        let waiter = {
            let pair = Arc::clone(&pair);
            std::thread::spawn(move || {
                let mut guard = pair.mutex.lock();
                while pair.value.load(Ordering::Acquire) == 0 {
                    if pair.cond.wait_timeout(&mut guard, Duration::from_secs(2))
                        == WaitOutcome::TimedOut
                    {
                        return false;
                    }
                }
                true
            })
        };
        std::thread::sleep(Duration::from_millis(20));
        {
            let _guard = pair.mutex.lock();
            pair.value.store(1, Ordering::Release);
            pair.cond.broadcast();
        }
        assert!(waiter.join().expect("waiter thread"));
    }
}
