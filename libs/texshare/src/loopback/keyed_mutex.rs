// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use crate::core::{KeyedMutex, Result, ShareError, Timeout};

#[derive(Debug)]
struct State {
    held: bool,
    /// Key the mutex was last released with. Acquire waits for its key.
    released_key: u64,
    abandoned: bool,
    /// Tickets of blocked acquirers, oldest first.
    waiters: VecDeque<u64>,
    next_ticket: u64,
}

/// Keyed mutex with FIFO hand-off: a release lets exactly the oldest waiter
/// for the released key through.
#[derive(Debug, Clone)]
pub struct LoopbackKeyedMutex {
    inner: Arc<(Mutex<State>, Condvar)>,
}

impl Default for LoopbackKeyedMutex {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackKeyedMutex {
    /// A fresh mutex starts released with key 0.
    pub fn new() -> Self {
        Self {
            inner: Arc::new((
                Mutex::new(State {
                    held: false,
                    released_key: 0,
                    abandoned: false,
                    waiters: VecDeque::new(),
                    next_ticket: 0,
                }),
                Condvar::new(),
            )),
        }
    }

    pub fn is_held(&self) -> bool {
        self.inner.0.lock().held
    }

    /// Number of acquirers currently blocked.
    pub fn waiters(&self) -> usize {
        self.inner.0.lock().waiters.len()
    }

    /// Simulates the holder dying with the lock held.
    pub fn abandon(&self) {
        let (lock, cvar) = &*self.inner;
        let mut state = lock.lock();
        state.held = false;
        state.abandoned = true;
        cvar.notify_all();
    }
}

impl KeyedMutex for LoopbackKeyedMutex {
    fn acquire(&self, key: u64, timeout: Timeout) -> Result<()> {
        let (lock, cvar) = &*self.inner;
        let mut state = lock.lock();

        let free = |s: &State| !s.held && s.released_key == key;

        if state.abandoned {
            state.abandoned = false;
            return Err(ShareError::LockAbandoned { key });
        }
        if free(&state) && state.waiters.is_empty() {
            state.held = true;
            return Ok(());
        }
        if timeout == Timeout::ZERO {
            return Err(ShareError::LockTimeout {
                key,
                timeout: timeout.reported(),
            });
        }

        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.waiters.push_back(ticket);

        let deadline = timeout
            .as_duration()
            .and_then(|d| Instant::now().checked_add(d));

        loop {
            if state.abandoned {
                state.abandoned = false;
                state.waiters.retain(|&t| t != ticket);
                cvar.notify_all();
                return Err(ShareError::LockAbandoned { key });
            }
            if free(&state) && state.waiters.front() == Some(&ticket) {
                state.waiters.pop_front();
                state.held = true;
                return Ok(());
            }
            match deadline {
                Some(deadline) => {
                    if cvar.wait_until(&mut state, deadline).timed_out() {
                        // Re-check once: the hand-off may have raced the timeout.
                        if free(&state) && state.waiters.front() == Some(&ticket) {
                            state.waiters.pop_front();
                            state.held = true;
                            return Ok(());
                        }
                        state.waiters.retain(|&t| t != ticket);
                        cvar.notify_all();
                        return Err(ShareError::LockTimeout {
                            key,
                            timeout: timeout.reported(),
                        });
                    }
                }
                None => cvar.wait(&mut state),
            }
        }
    }

    fn release(&self, key: u64) -> Result<()> {
        let (lock, cvar) = &*self.inner;
        let mut state = lock.lock();
        if !state.held {
            return Err(ShareError::Protocol(format!(
                "release of keyed mutex (key {key}) that is not held"
            )));
        }
        state.held = false;
        state.released_key = key;
        cvar.notify_all();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn probe_fails_on_held_lock() {
        let mutex = LoopbackKeyedMutex::new();
        mutex.acquire(0, Timeout::ZERO).unwrap();
        let err = mutex.acquire(0, Timeout::ZERO).unwrap_err();
        assert!(matches!(err, ShareError::LockTimeout { key: 0, .. }));
        mutex.release(0).unwrap();
        mutex.acquire(0, Timeout::ZERO).unwrap();
    }

    #[test]
    fn bounded_wait_expires() {
        let mutex = LoopbackKeyedMutex::new();
        mutex.acquire(0, Timeout::ZERO).unwrap();
        let started = Instant::now();
        let err = mutex.acquire(0, Timeout::from_millis(30)).unwrap_err();
        assert!(started.elapsed() >= Duration::from_millis(30));
        assert!(matches!(err, ShareError::LockTimeout { .. }));
        assert_eq!(mutex.waiters(), 0);
    }

    #[test]
    fn acquire_waits_for_its_key() {
        let mutex = LoopbackKeyedMutex::new();
        assert!(mutex.acquire(1, Timeout::ZERO).is_err());
        mutex.acquire(0, Timeout::ZERO).unwrap();
        mutex.release(1).unwrap();
        assert!(mutex.acquire(0, Timeout::ZERO).is_err());
        mutex.acquire(1, Timeout::ZERO).unwrap();
    }

    #[test]
    fn stray_release_is_rejected() {
        let mutex = LoopbackKeyedMutex::new();
        assert!(matches!(mutex.release(0), Err(ShareError::Protocol(_))));
    }

    #[test]
    fn abandonment_is_reported_once() {
        let mutex = LoopbackKeyedMutex::new();
        mutex.acquire(0, Timeout::ZERO).unwrap();
        mutex.abandon();
        assert!(matches!(
            mutex.acquire(0, Timeout::Infinite),
            Err(ShareError::LockAbandoned { key: 0 })
        ));
        mutex.acquire(0, Timeout::ZERO).unwrap();
    }
}
