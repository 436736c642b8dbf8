// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Duplication of a local handle into another process's handle table.

use crate::core::{DuplicatedHandle, OsHandle, Result};

/// Creates a new entry in `target`'s handle table referring to the same kernel
/// object as `handle`, with the same access rights.
///
/// The returned value is only valid inside `target`. Failure is a protocol
/// fault; there is no retry.
pub trait HandleTransfer {
    /// Target process, opened with duplicate rights when it was launched.
    type Process;

    fn duplicate(&self, handle: OsHandle, target: &Self::Process) -> Result<DuplicatedHandle>;
}

#[cfg(windows)]
pub use self::win32::{TargetProcess, Win32HandleTransfer};

#[cfg(windows)]
mod win32 {
    use windows::Win32::Foundation::{CloseHandle, DUPLICATE_SAME_ACCESS, DuplicateHandle, HANDLE};
    use windows::Win32::System::Threading::{GetCurrentProcess, OpenProcess, PROCESS_DUP_HANDLE};

    use super::HandleTransfer;
    use crate::core::{DuplicatedHandle, OsHandle, Result, ShareError};

    /// Process handle carrying `PROCESS_DUP_HANDLE`.
    #[derive(Debug)]
    pub struct TargetProcess {
        handle: HANDLE,
        pid: u32,
    }

    impl TargetProcess {
        pub fn open(pid: u32) -> Result<Self> {
            let handle = unsafe { OpenProcess(PROCESS_DUP_HANDLE, false, pid) }.map_err(|e| {
                ShareError::HandleDuplication(format!(
                    "OpenProcess({pid}) with PROCESS_DUP_HANDLE failed: {e}"
                ))
            })?;
            Ok(Self { handle, pid })
        }

        /// Opens a process this one just launched.
        pub fn from_child(child: &std::process::Child) -> Result<Self> {
            Self::open(child.id())
        }

        /// The current process, for self-duplication.
        pub fn current() -> Result<Self> {
            Self::open(std::process::id())
        }

        pub fn pid(&self) -> u32 {
            self.pid
        }
    }

    impl Drop for TargetProcess {
        fn drop(&mut self) {
            unsafe {
                let _ = CloseHandle(self.handle);
            }
        }
    }

    // TargetProcess is Send + Sync because process handles are thread-safe
    unsafe impl Send for TargetProcess {}
    unsafe impl Sync for TargetProcess {}

    #[derive(Debug, Clone, Copy, Default)]
    pub struct Win32HandleTransfer;

    impl HandleTransfer for Win32HandleTransfer {
        type Process = TargetProcess;

        fn duplicate(&self, handle: OsHandle, target: &TargetProcess) -> Result<DuplicatedHandle> {
            let mut duplicated = HANDLE::default();
            unsafe {
                DuplicateHandle(
                    GetCurrentProcess(),
                    handle.as_win32(),
                    target.handle,
                    &mut duplicated,
                    0,
                    false,
                    DUPLICATE_SAME_ACCESS,
                )
            }
            .map_err(|e| {
                ShareError::HandleDuplication(format!(
                    "DuplicateHandle({handle}) into pid {} failed: {e}",
                    target.pid
                ))
            })?;

            let value = OsHandle::from_win32(duplicated).raw();
            tracing::info!(
                "HandleTransfer: duplicated {} into pid {} as {:#x}",
                handle,
                target.pid,
                value
            );
            Ok(DuplicatedHandle::new(value, target.pid))
        }
    }

    #[cfg(test)]
    mod tests {
        use windows::Win32::System::Threading::CreateEventW;
        use windows::core::PCWSTR;

        use super::*;
        use crate::core::handle::close_native;

        #[test]
        fn self_duplication_yields_a_distinct_value() {
            let event = unsafe { CreateEventW(None, false, false, PCWSTR::null()) }.unwrap();
            let original = OsHandle::from_win32(event);
            let target = TargetProcess::current().unwrap();

            let dup = Win32HandleTransfer.duplicate(original, &target).unwrap();
            assert_eq!(dup.target_pid(), std::process::id());
            assert_ne!(dup.wire_value(), original.raw());

            close_native(dup.into_local());
            close_native(original);
        }

        #[test]
        fn duplicating_a_bogus_handle_fails() {
            let target = TargetProcess::current().unwrap();
            let err = Win32HandleTransfer
                .duplicate(OsHandle::from_raw(0xdead_0000), &target)
                .unwrap_err();
            assert!(matches!(err, ShareError::HandleDuplication(_)));
        }
    }
}
