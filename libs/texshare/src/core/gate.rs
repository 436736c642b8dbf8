// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Per-frame exclusive access to the shared image.
//!
//! Each side cycles `Idle -> HoldingLock -> Idle` once per frame around key 0
//! of the image's keyed mutex. The producer also signals the frame event before
//! releasing. The event is advisory; exclusion comes from the mutex alone.

use crate::core::{FrameEvent, KeyedMutex, Result, ShareError, Timeout, WaitOutcome};

/// The only key either side ever uses.
pub const FRAME_KEY: u64 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Idle,
    HoldingLock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateRole {
    Producer,
    Consumer,
}

pub struct FrameGate<M: KeyedMutex, E: FrameEvent> {
    role: GateRole,
    mutex: M,
    event: E,
    timeout: Timeout,
    state: GateState,
    frames: u64,
}

impl<M: KeyedMutex, E: FrameEvent> FrameGate<M, E> {
    pub fn new(role: GateRole, mutex: M, event: E, timeout: Timeout) -> Self {
        Self {
            role,
            mutex,
            event,
            timeout,
            state: GateState::Idle,
            frames: 0,
        }
    }

    pub fn role(&self) -> GateRole {
        self.role
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    pub fn timeout(&self) -> Timeout {
        self.timeout
    }

    /// Frames completed through this gate.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn mutex(&self) -> &M {
        &self.mutex
    }

    pub fn event(&self) -> &E {
        &self.event
    }

    /// `Idle -> HoldingLock`. Blocks up to the configured timeout.
    pub fn acquire(&mut self) -> Result<()> {
        if self.state == GateState::HoldingLock {
            return Err(ShareError::GateState(format!(
                "{:?} acquire while already holding key {FRAME_KEY}",
                self.role
            )));
        }
        self.mutex.acquire(FRAME_KEY, self.timeout)?;
        self.state = GateState::HoldingLock;
        tracing::trace!("FrameGate: {:?} holding frame {}", self.role, self.frames);
        Ok(())
    }

    /// `HoldingLock -> Idle`. The producer signals the frame event first.
    pub fn release(&mut self) -> Result<()> {
        if self.state == GateState::Idle {
            return Err(ShareError::GateState(format!(
                "{:?} release without holding key {FRAME_KEY}",
                self.role
            )));
        }
        let signalled = match self.role {
            GateRole::Producer => self.event.signal(),
            GateRole::Consumer => Ok(()),
        };
        // The lock must not outlive a failed signal.
        self.mutex.release(FRAME_KEY)?;
        self.state = GateState::Idle;
        self.frames += 1;
        signalled
    }

    /// Acquires and returns a scoped frame access.
    pub fn begin_frame(&mut self) -> Result<FrameAccess<'_, M, E>> {
        self.acquire()?;
        Ok(FrameAccess {
            gate: self,
            finished: false,
        })
    }

    /// Waits for the producer's frame-ready signal.
    pub fn wait_for_frame(&self, timeout: Timeout) -> Result<WaitOutcome> {
        self.event.wait(timeout)
    }
}

/// A held frame. Call [`FrameAccess::finish`]; dropping it releases the lock
/// without signalling.
pub struct FrameAccess<'a, M: KeyedMutex, E: FrameEvent> {
    gate: &'a mut FrameGate<M, E>,
    finished: bool,
}

impl<M: KeyedMutex, E: FrameEvent> FrameAccess<'_, M, E> {
    pub fn frame_index(&self) -> u64 {
        self.gate.frames
    }

    pub fn finish(mut self) -> Result<()> {
        self.finished = true;
        self.gate.release()
    }
}

impl<M: KeyedMutex, E: FrameEvent> Drop for FrameAccess<'_, M, E> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        tracing::warn!(
            "FrameGate: {:?} frame {} dropped without finish, releasing key {}",
            self.gate.role,
            self.gate.frames,
            FRAME_KEY
        );
        if let Err(e) = self.gate.mutex.release(FRAME_KEY) {
            tracing::error!("FrameGate: release on drop failed: {}", e);
        }
        self.gate.state = GateState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::{LoopbackEvent, LoopbackKeyedMutex};

    fn gate(role: GateRole) -> (FrameGate<LoopbackKeyedMutex, LoopbackEvent>, LoopbackEvent) {
        let mutex = LoopbackKeyedMutex::new();
        let event = LoopbackEvent::new();
        let observer = event.clone();
        (FrameGate::new(role, mutex, event, Timeout::ZERO), observer)
    }

    #[test]
    fn producer_signals_once_per_frame() {
        let (mut gate, observer) = gate(GateRole::Producer);
        gate.begin_frame().unwrap().finish().unwrap();
        assert_eq!(gate.frames(), 1);
        assert_eq!(observer.wait(Timeout::ZERO).unwrap(), WaitOutcome::Signaled);
        // Auto-reset: consumed by the first wait.
        assert_eq!(observer.wait(Timeout::ZERO).unwrap(), WaitOutcome::TimedOut);
    }

    #[test]
    fn consumer_does_not_signal() {
        let (mut gate, observer) = gate(GateRole::Consumer);
        gate.begin_frame().unwrap().finish().unwrap();
        assert_eq!(observer.wait(Timeout::ZERO).unwrap(), WaitOutcome::TimedOut);
    }

    #[test]
    fn double_acquire_and_stray_release_are_misuse() {
        let (mut gate, _) = gate(GateRole::Producer);
        assert!(matches!(gate.release(), Err(ShareError::GateState(_))));
        gate.acquire().unwrap();
        assert!(matches!(gate.acquire(), Err(ShareError::GateState(_))));
        gate.release().unwrap();
        assert_eq!(gate.state(), GateState::Idle);
    }

    #[test]
    fn dropped_access_releases_the_lock() {
        let (mut gate, observer) = gate(GateRole::Producer);
        {
            let _access = gate.begin_frame().unwrap();
        }
        assert_eq!(gate.state(), GateState::Idle);
        assert_eq!(gate.frames(), 0);
        assert_eq!(observer.wait(Timeout::ZERO).unwrap(), WaitOutcome::TimedOut);
        gate.begin_frame().unwrap().finish().unwrap();
    }
}
