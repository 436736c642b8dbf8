// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Inter-process synchronization contracts.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::handshake::EventName;
use crate::core::{DuplicatedHandle, Result};

/// How long an acquire or wait may block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timeout {
    Bounded(Duration),
    Infinite,
}

impl Timeout {
    /// Non-blocking probe.
    pub const ZERO: Timeout = Timeout::Bounded(Duration::ZERO);

    pub fn from_millis(ms: u64) -> Self {
        Timeout::Bounded(Duration::from_millis(ms))
    }

    /// Win32 wait value. `INFINITE` is `u32::MAX`; bounded values saturate just
    /// below it so a huge bound never turns into an infinite wait.
    pub fn as_win32_millis(self) -> u32 {
        match self {
            Timeout::Infinite => u32::MAX,
            // Rounded up so only a zero timeout becomes a probe.
            Timeout::Bounded(d) => u32::try_from(d.as_nanos().div_ceil(1_000_000))
                .unwrap_or(u32::MAX)
                .min(u32::MAX - 1),
        }
    }

    /// Vulkan wait value in nanoseconds.
    pub fn as_nanos(self) -> u64 {
        match self {
            Timeout::Infinite => u64::MAX,
            Timeout::Bounded(d) => u64::try_from(d.as_nanos())
                .unwrap_or(u64::MAX)
                .min(u64::MAX - 1),
        }
    }

    pub fn as_duration(self) -> Option<Duration> {
        match self {
            Timeout::Bounded(d) => Some(d),
            Timeout::Infinite => None,
        }
    }

    /// Duration reported in lock-timeout faults.
    pub fn reported(self) -> Duration {
        self.as_duration().unwrap_or(Duration::MAX)
    }
}

/// Result of a wait that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Signaled,
    TimedOut,
}

/// Mutual exclusion bound to a shared memory object.
///
/// `acquire` blocks up to `timeout`; expiry is a
/// [`ShareError::LockTimeout`](crate::core::ShareError::LockTimeout), never a
/// retryable condition. `Timeout::ZERO` probes without blocking.
pub trait KeyedMutex: Send + Sync {
    fn acquire(&self, key: u64, timeout: Timeout) -> Result<()>;

    fn release(&self, key: u64) -> Result<()>;

    /// Acquires and returns a guard that releases on drop.
    fn lock(&self, key: u64, timeout: Timeout) -> Result<KeyedMutexGuard<'_, Self>>
    where
        Self: Sized,
    {
        self.acquire(key, timeout)?;
        Ok(KeyedMutexGuard {
            mutex: self,
            key,
            released: false,
        })
    }
}

/// RAII guard for a held keyed mutex.
pub struct KeyedMutexGuard<'a, M: KeyedMutex> {
    mutex: &'a M,
    key: u64,
    released: bool,
}

impl<M: KeyedMutex> KeyedMutexGuard<'_, M> {
    pub fn key(&self) -> u64 {
        self.key
    }

    /// Releases now and surfaces the error instead of logging it.
    pub fn unlock(mut self) -> Result<()> {
        self.released = true;
        self.mutex.release(self.key)
    }
}

impl<M: KeyedMutex> Drop for KeyedMutexGuard<'_, M> {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = self.mutex.release(self.key) {
                tracing::error!("KeyedMutexGuard: release of key {} failed: {}", self.key, e);
            }
        }
    }
}

/// Auto-reset "frame ready" signal shared by name.
pub trait FrameEvent: Send + Sync {
    fn signal(&self) -> Result<()>;

    fn wait(&self, timeout: Timeout) -> Result<WaitOutcome>;
}

/// Creates and opens named frame events.
pub trait EventNamespace {
    type Event: FrameEvent;

    /// Producer side. Creates the event or attaches to an existing one.
    fn create(&self, name: &EventName) -> Result<Self::Event>;

    /// Consumer side. Fails when no event with that name exists.
    fn open(&self, name: &EventName) -> Result<Self::Event>;
}

/// Which primitive governs the shared image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncScheme {
    /// Keyed mutex on the memory object plus a named frame event. Governs
    /// every frame.
    #[default]
    KeyedMutex,
    /// Exportable binary semaphore waited once by the consumer's queue before
    /// first use. Steady-state frames still go through the keyed mutex.
    Semaphore,
}

/// Identifies the inter-process signal as it travels to the consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncToken {
    KeyedMutexEvent { event_name: EventName },
    Semaphore {
        event_name: EventName,
        handle: DuplicatedHandle,
    },
}

impl SyncToken {
    pub fn event_name(&self) -> &EventName {
        match self {
            SyncToken::KeyedMutexEvent { event_name } => event_name,
            SyncToken::Semaphore { event_name, .. } => event_name,
        }
    }

    pub fn scheme(&self) -> SyncScheme {
        match self {
            SyncToken::KeyedMutexEvent { .. } => SyncScheme::KeyedMutex,
            SyncToken::Semaphore { .. } => SyncScheme::Semaphore,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn win32_timeouts() {
        assert_eq!(Timeout::Infinite.as_win32_millis(), u32::MAX);
        assert_eq!(Timeout::ZERO.as_win32_millis(), 0);
        assert_eq!(Timeout::from_millis(250).as_win32_millis(), 250);
        let huge = Timeout::Bounded(Duration::from_secs(u64::from(u32::MAX)));
        assert_eq!(huge.as_win32_millis(), u32::MAX - 1);
    }

    #[test]
    fn sub_millisecond_waits_still_block() {
        assert_eq!(Timeout::Bounded(Duration::from_micros(1)).as_win32_millis(), 1);
        assert_eq!(Timeout::Bounded(Duration::from_micros(1_500)).as_win32_millis(), 2);
        assert_eq!(Timeout::Bounded(Duration::ZERO).as_win32_millis(), 0);
    }

    #[test]
    fn vulkan_timeouts() {
        assert_eq!(Timeout::Infinite.as_nanos(), u64::MAX);
        assert_eq!(Timeout::from_millis(2).as_nanos(), 2_000_000);
        assert_eq!(Timeout::Bounded(Duration::MAX).as_nanos(), u64::MAX - 1);
    }
}
