// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Win32 named auto-reset events.

use windows::Win32::Foundation::{CloseHandle, HANDLE, WAIT_FAILED, WAIT_OBJECT_0, WAIT_TIMEOUT};
use windows::Win32::System::Threading::{
    CreateEventW, EVENT_MODIFY_STATE, OpenEventW, SYNCHRONIZATION_SYNCHRONIZE, SetEvent,
    WaitForSingleObject,
};
use windows::core::HSTRING;

use crate::core::handshake::EventName;
use crate::core::{EventNamespace, FrameEvent, Result, ShareError, Timeout, WaitOutcome};

/// Session-local kernel namespace; no privilege needed to create objects.
const NAMESPACE_PREFIX: &str = "Local\\";

fn kernel_name(name: &EventName) -> HSTRING {
    HSTRING::from(format!("{NAMESPACE_PREFIX}{name}"))
}

/// Auto-reset event opened by name in the session namespace.
#[derive(Debug)]
pub struct Win32Event {
    handle: HANDLE,
    name: EventName,
}

impl Win32Event {
    pub fn name(&self) -> &EventName {
        &self.name
    }
}

impl FrameEvent for Win32Event {
    fn signal(&self) -> Result<()> {
        unsafe { SetEvent(self.handle) }
            .map_err(|e| ShareError::Gpu(format!("SetEvent('{}') failed: {e}", self.name)))
    }

    fn wait(&self, timeout: Timeout) -> Result<WaitOutcome> {
        let status = unsafe { WaitForSingleObject(self.handle, timeout.as_win32_millis()) };
        if status == WAIT_OBJECT_0 {
            Ok(WaitOutcome::Signaled)
        } else if status == WAIT_TIMEOUT {
            Ok(WaitOutcome::TimedOut)
        } else if status == WAIT_FAILED {
            Err(ShareError::Io(std::io::Error::last_os_error()))
        } else {
            Err(ShareError::Protocol(format!(
                "unexpected wait status {:#x} on event '{}'",
                status.0, self.name
            )))
        }
    }
}

impl Drop for Win32Event {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.handle);
        }
    }
}

// Win32Event is Send + Sync because kernel event handles are thread-safe
unsafe impl Send for Win32Event {}
unsafe impl Sync for Win32Event {}

/// The `Local\` event namespace of the current session.
#[derive(Debug, Clone, Copy, Default)]
pub struct Win32Events;

impl EventNamespace for Win32Events {
    type Event = Win32Event;

    fn create(&self, name: &EventName) -> Result<Win32Event> {
        // Auto-reset, initially unsignaled. An existing event of the same name
        // is attached to rather than replaced.
        let handle = unsafe { CreateEventW(None, false, false, &kernel_name(name)) }
            .map_err(|e| ShareError::Configuration(format!("CreateEventW('{name}') failed: {e}")))?;
        tracing::debug!("Win32Events: created '{}{}'", NAMESPACE_PREFIX, name);
        Ok(Win32Event {
            handle,
            name: name.clone(),
        })
    }

    fn open(&self, name: &EventName) -> Result<Win32Event> {
        let access = EVENT_MODIFY_STATE | SYNCHRONIZATION_SYNCHRONIZE;
        let handle = unsafe { OpenEventW(access, false, &kernel_name(name)) }.map_err(|e| {
            ShareError::Protocol(format!("no event named '{name}' to open: {e}"))
        })?;
        tracing::debug!("Win32Events: opened '{}{}'", NAMESPACE_PREFIX, name);
        Ok(Win32Event {
            handle,
            name: name.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique(tag: &str) -> EventName {
        EventName::new(format!("texshare_test_{tag}_{}", std::process::id())).unwrap()
    }

    #[test]
    fn signal_crosses_create_and_open() {
        let name = unique("cross");
        let created = Win32Events.create(&name).unwrap();
        let opened = Win32Events.open(&name).unwrap();

        assert_eq!(opened.wait(Timeout::ZERO).unwrap(), WaitOutcome::TimedOut);
        created.signal().unwrap();
        assert_eq!(
            opened.wait(Timeout::from_millis(100)).unwrap(),
            WaitOutcome::Signaled
        );
        // Auto-reset: the wait consumed the signal.
        assert_eq!(opened.wait(Timeout::ZERO).unwrap(), WaitOutcome::TimedOut);
    }

    #[test]
    fn opening_a_missing_event_is_a_protocol_fault() {
        let err = Win32Events.open(&unique("missing")).unwrap_err();
        assert!(matches!(err, ShareError::Protocol(_)));
    }
}
