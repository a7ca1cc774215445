use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU32, Ordering};

use nix::errno::Errno;

const UNLOCKED: u32 = 0;
const LOCKED: u32 = 1;

/// A mutual-exclusion lock for brief critical sections.
///
/// `acquire` spins with a `seq_cst` test-and-set; on contention it parks on the underlying atomic
/// via a futex wait rather than burning CPU indefinitely, and is woken by a futex wake from
/// whichever thread calls `release`. This mirrors the reference's `std::atomic_flag` + C++20
/// `wait`/`notify_one` pair, using the same raw-futex technique the teacher's scheduler crate
/// uses elsewhere for its own park/wake primitives.
///
/// Unlike a general-purpose mutex, `SpinLock` makes no attempt to be fair, does not support
/// recursive acquisition, and is intended only for the short, bounded critical sections documented
/// per-resource in `SPEC_FULL.md` §5.
pub struct SpinLock<T> {
    state: AtomicU32,
    value: UnsafeCell<T>,
}

// SAFETY: access to `value` is only ever granted through a `SpinLockGuard` obtained while holding
// `state` in the locked state, so `T: Send` is sufficient for `SpinLock<T>: Sync` exactly as for a
// standard mutex.
unsafe impl<T: Send> Send for SpinLock<T> {}
unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    pub fn new(value: T) -> Self {
        Self {
            state: AtomicU32::new(UNLOCKED),
            value: UnsafeCell::new(value),
        }
    }

    /// Acquire the lock, blocking until it is available.
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        while self
            .state
            .compare_exchange_weak(UNLOCKED, LOCKED, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            let rv = libc_futex(
                &self.state,
                libc::FUTEX_WAIT | libc::FUTEX_PRIVATE_FLAG,
                LOCKED,
                None,
                None,
                0,
            );
            debug_assert!(
                matches!(rv, Ok(_) | Err(Errno::EAGAIN | Errno::EINTR)),
                "FUTEX_WAIT failed with {rv:?}"
            );
        }
        SpinLockGuard { lock: self }
    }

    fn release(&self) {
        self.state.store(UNLOCKED, Ordering::Release);
        libc_futex(
            &self.state,
            libc::FUTEX_WAKE | libc::FUTEX_PRIVATE_FLAG,
            1,
            None,
            None,
            0,
        )
        .expect("FUTEX_WAKE failed");
    }
}

/// An RAII guard releasing a [`SpinLock`] when dropped, equivalent to the reference's
/// `ScopedSpinLock`.
pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        // SAFETY: holding the guard means we hold the lock.
        unsafe { &*self.lock.value.get() }
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: holding the guard means we hold the lock, and the guard is exclusive.
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<T> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.release();
    }
}

/// Perform a futex operation using libc directly, the same raw-syscall shape the teacher's
/// latch primitives use for their own park/wake.
fn libc_futex(
    uaddr: &AtomicU32,
    op: core::ffi::c_int,
    val: u32,
    utime: Option<&libc::timespec>,
    uaddr2: Option<&AtomicU32>,
    val3: u32,
) -> Result<core::ffi::c_int, Errno> {
    let uaddr: *mut u32 = uaddr.as_ptr();
    let utime: *const libc::timespec = utime
        .map(std::ptr::from_ref)
        .unwrap_or(core::ptr::null_mut());
    let uaddr2: *mut u32 = uaddr2
        .map(AtomicU32::as_ptr)
        .unwrap_or(core::ptr::null_mut());

    let rv = unsafe { libc::syscall(libc::SYS_futex, uaddr, op, val, utime, uaddr2, val3) };

    if rv >= 0 {
        Ok(rv.try_into().expect("futex() returned invalid int"))
    } else {
        let errno = unsafe { *libc::__errno_location() };
        debug_assert_eq!(rv, -1);
        Err(Errno::from_i32(errno))
    }
}
