//! Process-shared pthread primitives embedded in mapped headers.
//!
//! Every cross-process region carries exactly one mutex/condition-variable
//! pair in its header. The primitives MUST be initialized with the
//! `PTHREAD_PROCESS_SHARED` attribute; a non-shared primitive in a shared
//! mapping is a defect, not a degraded mode.

use crate::error::{ShmError, ShmResult};
use std::mem;

/// Initialize a process-shared mutex in place.
///
/// # Safety
///
/// `mutex` must point into a live read-write mapping, and no other process
/// may be using the primitive while it is (re)initialized.
pub(crate) unsafe fn init_shared_mutex(mutex: *mut libc::pthread_mutex_t) -> ShmResult<()> {
    unsafe {
        let mut attr: libc::pthread_mutexattr_t = mem::zeroed();
        let mut eno = libc::pthread_mutexattr_init(&mut attr);
        if eno != 0 {
            return Err(lock_err("pthread_mutexattr_init", eno));
        }

        eno = libc::pthread_mutexattr_setpshared(&mut attr, libc::PTHREAD_PROCESS_SHARED);
        if eno != 0 {
            libc::pthread_mutexattr_destroy(&mut attr);
            return Err(lock_err("pthread_mutexattr_setpshared", eno));
        }

        eno = libc::pthread_mutex_init(mutex, &attr);
        libc::pthread_mutexattr_destroy(&mut attr);
        if eno != 0 {
            return Err(lock_err("pthread_mutex_init", eno));
        }
    }
    Ok(())
}

/// Initialize a process-shared condition variable in place.
///
/// # Safety
///
/// Same contract as [`init_shared_mutex`].
pub(crate) unsafe fn init_shared_cond(cond: *mut libc::pthread_cond_t) -> ShmResult<()> {
    unsafe {
        let mut attr: libc::pthread_condattr_t = mem::zeroed();
        let mut eno = libc::pthread_condattr_init(&mut attr);
        if eno != 0 {
            return Err(lock_err("pthread_condattr_init", eno));
        }

        eno = libc::pthread_condattr_setpshared(&mut attr, libc::PTHREAD_PROCESS_SHARED);
        if eno != 0 {
            libc::pthread_condattr_destroy(&mut attr);
            return Err(lock_err("pthread_condattr_setpshared", eno));
        }

        eno = libc::pthread_cond_init(cond, &attr);
        libc::pthread_condattr_destroy(&mut attr);
        if eno != 0 {
            return Err(lock_err("pthread_cond_init", eno));
        }
    }
    Ok(())
}

fn lock_err(op: &'static str, errno: i32) -> ShmError {
    ShmError::Lock { op, errno }
}

/// Non-owning handle to a mutex/cond pair living in a shared header.
///
/// The pointers stay valid for the lifetime of the mapping that the owning
/// channel or bus keeps alive alongside this handle.
#[derive(Clone, Copy)]
pub(crate) struct SharedLock {
    mutex: *mut libc::pthread_mutex_t,
    cond: *mut libc::pthread_cond_t,
}

unsafe impl Send for SharedLock {}
unsafe impl Sync for SharedLock {}

impl SharedLock {
    pub(crate) fn new(mutex: *mut libc::pthread_mutex_t, cond: *mut libc::pthread_cond_t) -> Self {
        Self { mutex, cond }
    }

    /// Acquire the mutex, blocking. A failure is fatal to the calling
    /// operation but does not poison the primitive.
    pub(crate) fn lock(&self) -> ShmResult<SharedLockGuard<'_>> {
        let eno = unsafe { libc::pthread_mutex_lock(self.mutex) };
        if eno != 0 {
            return Err(lock_err("pthread_mutex_lock", eno));
        }
        Ok(SharedLockGuard { lock: self })
    }

    /// Wait on the condition variable with an absolute deadline
    /// `timeout_ms` from now. Returns `true` on timeout. The guard proves
    /// the mutex is held; it is held again when this returns.
    pub(crate) fn wait_timeout(
        &self,
        _guard: &SharedLockGuard<'_>,
        timeout_ms: u64,
    ) -> ShmResult<bool> {
        let deadline = absolute_deadline(timeout_ms);
        let eno = unsafe { libc::pthread_cond_timedwait(self.cond, self.mutex, &deadline) };
        match eno {
            0 => Ok(false),
            libc::ETIMEDOUT => Ok(true),
            _ => Err(lock_err("pthread_cond_timedwait", eno)),
        }
    }

    /// Wake every waiter. Broadcast, not signal: several processes may be
    /// waiting on the same pair and each must get a chance to dispatch.
    pub(crate) fn broadcast(&self) -> ShmResult<()> {
        let eno = unsafe { libc::pthread_cond_broadcast(self.cond) };
        if eno != 0 {
            return Err(lock_err("pthread_cond_broadcast", eno));
        }
        Ok(())
    }
}

/// RAII guard releasing the shared mutex on drop.
pub(crate) struct SharedLockGuard<'a> {
    lock: &'a SharedLock,
}

impl Drop for SharedLockGuard<'_> {
    fn drop(&mut self) {
        // Unlock failure here means the primitive is gone; nothing to do.
        unsafe { libc::pthread_mutex_unlock(self.lock.mutex) };
    }
}

/// CLOCK_REALTIME deadline `timeout_ms` from now, nanosecond carry folded.
fn absolute_deadline(timeout_ms: u64) -> libc::timespec {
    let mut ts: libc::timespec = unsafe { mem::zeroed() };
    unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut ts) };
    let nsec = ts.tv_nsec as u64 + (timeout_ms % 1000) * 1_000_000;
    ts.tv_sec += (timeout_ms / 1000) as libc::time_t + (nsec / 1_000_000_000) as libc::time_t;
    ts.tv_nsec = (nsec % 1_000_000_000) as libc::c_long;
    ts
}
