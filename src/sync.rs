//! Thread synchronisation primitives.
//!
//! Mutual exclusion and condition signalling come from `std::sync`; the
//! counting semaphore wraps an unnamed POSIX `sem_t` so that its
//! initialisation failure is reported instead of being impossible to see.

use std::cell::UnsafeCell;
use std::io;

use crate::error::{Error, Result};

/// Counting semaphore.
pub struct Semaphore {
    // sem_t must not move after sem_init, hence the box.
    sem: Box<UnsafeCell<libc::sem_t>>,
}

// Safety: sem_wait/sem_post are thread-safe on an initialised sem_t.
unsafe impl Send for Semaphore {}
unsafe impl Sync for Semaphore {}

impl Semaphore {
    /// Creates a semaphore holding `value` permits.
    pub fn new(value: u32) -> Result<Self> {
        let sem = Box::new(UnsafeCell::new(unsafe { std::mem::zeroed::<libc::sem_t>() }));
        if unsafe { libc::sem_init(sem.get(), 0, value) } != 0 {
            return Err(Error::SyncInit(io::Error::last_os_error()));
        }
        Ok(Self { sem })
    }

    /// Takes one permit, blocking while none is available.
    ///
    /// Returns `false` only if the underlying call fails for a reason other
    /// than signal interruption.
    pub fn wait(&self) -> bool {
        loop {
            if unsafe { libc::sem_wait(self.sem.get()) } == 0 {
                return true;
            }
            if io::Error::last_os_error().kind() != io::ErrorKind::Interrupted {
                return false;
            }
        }
    }

    /// Takes one permit if one is available right now.
    #[cfg(test)]
    pub fn try_wait(&self) -> bool {
        unsafe { libc::sem_trywait(self.sem.get()) == 0 }
    }

    /// Releases one permit, waking one blocked waiter.
    pub fn post(&self) -> io::Result<()> {
        if unsafe { libc::sem_post(self.sem.get()) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            libc::sem_destroy(self.sem.get());
        }
    }
}
