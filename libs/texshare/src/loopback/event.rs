// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use super::LoopbackKernel;
use crate::core::handshake::EventName;
use crate::core::{EventNamespace, FrameEvent, Result, ShareError, Timeout, WaitOutcome};

/// Boolean latch with condvar wake-up, the body of both events and binary
/// semaphores.
#[derive(Debug, Default)]
struct Latch {
    set: Mutex<bool>,
    cvar: Condvar,
}

impl Latch {
    fn set(&self) {
        *self.set.lock() = true;
        self.cvar.notify_one();
    }

    /// Waits for the latch and consumes it.
    fn take(&self, timeout: Timeout) -> WaitOutcome {
        let mut set = self.set.lock();
        let deadline = timeout
            .as_duration()
            .and_then(|d| Instant::now().checked_add(d));
        while !*set {
            match deadline {
                Some(deadline) => {
                    if self.cvar.wait_until(&mut set, deadline).timed_out() {
                        break;
                    }
                }
                None => self.cvar.wait(&mut set),
            }
        }
        if *set {
            *set = false;
            WaitOutcome::Signaled
        } else {
            WaitOutcome::TimedOut
        }
    }
}

/// Auto-reset event: one signal releases one wait.
#[derive(Debug, Clone, Default)]
pub struct LoopbackEvent {
    latch: Arc<Latch>,
}

impl LoopbackEvent {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FrameEvent for LoopbackEvent {
    fn signal(&self) -> Result<()> {
        self.latch.set();
        Ok(())
    }

    fn wait(&self, timeout: Timeout) -> Result<WaitOutcome> {
        Ok(self.latch.take(timeout))
    }
}

/// Named-event namespace backed by the kernel.
#[derive(Debug, Clone)]
pub struct LoopbackEvents {
    kernel: LoopbackKernel,
}

impl LoopbackEvents {
    pub fn new(kernel: &LoopbackKernel) -> Self {
        Self {
            kernel: kernel.clone(),
        }
    }
}

impl EventNamespace for LoopbackEvents {
    type Event = LoopbackEvent;

    fn create(&self, name: &EventName) -> Result<LoopbackEvent> {
        Ok(self.kernel.create_event(name.as_str()))
    }

    fn open(&self, name: &EventName) -> Result<LoopbackEvent> {
        self.kernel.open_event(name.as_str()).ok_or_else(|| {
            ShareError::Protocol(format!("no event named '{name}' exists"))
        })
    }
}

/// Binary semaphore. Signal once, wait once.
#[derive(Debug, Clone, Default)]
pub struct LoopbackSemaphore {
    latch: Arc<Latch>,
}

impl LoopbackSemaphore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal(&self) {
        self.latch.set();
    }

    pub fn wait(&self, timeout: Timeout) -> WaitOutcome {
        self.latch.take(timeout)
    }

    pub(crate) fn same_object(&self, other: &LoopbackSemaphore) -> bool {
        Arc::ptr_eq(&self.latch, &other.latch)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn event_is_auto_reset() {
        let event = LoopbackEvent::new();
        event.signal().unwrap();
        event.signal().unwrap();
        assert_eq!(event.wait(Timeout::ZERO).unwrap(), WaitOutcome::Signaled);
        assert_eq!(event.wait(Timeout::ZERO).unwrap(), WaitOutcome::TimedOut);
    }

    #[test]
    fn wait_wakes_on_signal_from_another_thread() {
        let event = LoopbackEvent::new();
        let signaller = event.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            signaller.signal().unwrap();
        });
        assert_eq!(
            event.wait(Timeout::from_millis(5000)).unwrap(),
            WaitOutcome::Signaled
        );
        handle.join().unwrap();
    }

    #[test]
    fn open_requires_an_existing_name() {
        let kernel = LoopbackKernel::new();
        let events = LoopbackEvents::new(&kernel);
        let name = EventName::new("Frame42").unwrap();
        assert!(matches!(events.open(&name), Err(ShareError::Protocol(_))));

        let created = events.create(&name).unwrap();
        let opened = events.open(&name).unwrap();
        created.signal().unwrap();
        assert_eq!(opened.wait(Timeout::ZERO).unwrap(), WaitOutcome::Signaled);
    }
}
