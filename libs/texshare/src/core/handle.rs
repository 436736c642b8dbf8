// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Process-relative OS handle values.
//!
//! A raw handle value only means something inside the process whose handle
//! table holds it. [`OsHandle`] is a value valid in the *current* process;
//! [`DuplicatedHandle`] is a value valid in some *other* process. The two types
//! never compare equal and the only way from one to the other is a
//! [`crate::core::HandleTransfer`] (or, on the receiving side,
//! [`DuplicatedHandle::into_local`] once the value has arrived there).

use std::fmt;

use serde::{Deserialize, Serialize};

/// Handle value valid in the current process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OsHandle(u64);

impl OsHandle {
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    #[cfg(windows)]
    pub fn as_win32(self) -> windows::Win32::Foundation::HANDLE {
        windows::Win32::Foundation::HANDLE(self.0 as usize as *mut std::ffi::c_void)
    }

    #[cfg(windows)]
    pub fn from_win32(handle: windows::Win32::Foundation::HANDLE) -> Self {
        Self(handle.0 as usize as u64)
    }

    #[cfg(unix)]
    pub fn as_fd(self) -> std::os::fd::RawFd {
        self.0 as std::os::fd::RawFd
    }
}

impl fmt::Display for OsHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Handle value valid only in the process identified by `target_pid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DuplicatedHandle {
    value: u64,
    target_pid: u32,
}

impl DuplicatedHandle {
    pub const fn new(value: u64, target_pid: u32) -> Self {
        Self { value, target_pid }
    }

    /// Numeric value as it must appear on the handshake wire.
    pub fn wire_value(&self) -> u64 {
        self.value
    }

    pub fn target_pid(&self) -> u32 {
        self.target_pid
    }

    /// Reinterprets the value as local. Only meaningful inside the target
    /// process, which is where the handshake delivers it.
    pub fn into_local(self) -> OsHandle {
        OsHandle(self.value)
    }
}

/// OS handle type a memory object is exported as or imported from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandleKind {
    /// Win32 NT handle to an opaque memory allocation.
    OpaqueWin32,
    /// NT handle created by `IDXGIResource1::CreateSharedHandle`.
    #[default]
    D3D11Texture,
    /// POSIX file descriptor to an opaque memory allocation.
    OpaqueFd,
}

impl HandleKind {
    /// The kind a backend exports by default on this platform.
    pub fn platform_default() -> Self {
        if cfg!(windows) {
            HandleKind::D3D11Texture
        } else {
            HandleKind::OpaqueFd
        }
    }
}

type ReleaseFn = Box<dyn FnOnce(OsHandle) + Send>;

/// An exported OS handle owned by the current process.
///
/// The handle is released on drop with whatever routine the exporting backend
/// registered. Without one the value is left alone.
pub struct ExportedHandle {
    handle: OsHandle,
    kind: HandleKind,
    release: Option<ReleaseFn>,
}

impl ExportedHandle {
    pub fn new(handle: OsHandle, kind: HandleKind) -> Self {
        Self {
            handle,
            kind,
            release: None,
        }
    }

    /// Native handle closed with `CloseHandle` / `close` on drop.
    pub fn native(handle: OsHandle, kind: HandleKind) -> Self {
        Self::new(handle, kind).with_release(close_native)
    }

    pub fn with_release(mut self, release: impl FnOnce(OsHandle) + Send + 'static) -> Self {
        self.release = Some(Box::new(release));
        self
    }

    pub fn handle(&self) -> OsHandle {
        self.handle
    }

    pub fn kind(&self) -> HandleKind {
        self.kind
    }
}

impl fmt::Debug for ExportedHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportedHandle")
            .field("handle", &self.handle)
            .field("kind", &self.kind)
            .field("owned", &self.release.is_some())
            .finish()
    }
}

impl Drop for ExportedHandle {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            tracing::debug!("ExportedHandle: releasing {}", self.handle);
            release(self.handle);
        }
    }
}

/// Exported memory handle and the padded size advertised for it.
#[derive(Debug)]
pub struct ExportedMemory {
    handle: ExportedHandle,
    size: u64,
}

impl ExportedMemory {
    pub fn new(handle: ExportedHandle, size: u64) -> Self {
        Self { handle, size }
    }

    pub fn handle(&self) -> OsHandle {
        self.handle.handle()
    }

    pub fn kind(&self) -> HandleKind {
        self.handle.kind()
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

/// Closes a native handle owned by the current process.
pub fn close_native(handle: OsHandle) {
    #[cfg(windows)]
    unsafe {
        if let Err(e) = windows::Win32::Foundation::CloseHandle(handle.as_win32()) {
            tracing::warn!("CloseHandle({}) failed: {}", handle, e);
        }
    }
    #[cfg(unix)]
    unsafe {
        if libc::close(handle.as_fd()) != 0 {
            tracing::warn!(
                "close({}) failed: {}",
                handle.raw(),
                std::io::Error::last_os_error()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;

    #[test]
    fn duplicated_value_round_trips_through_wire() {
        let dup = DuplicatedHandle::new(12345, 77);
        assert_eq!(dup.wire_value(), 12345);
        assert_eq!(dup.target_pid(), 77);
        assert_eq!(dup.into_local(), OsHandle::from_raw(12345));
    }

    #[test]
    fn exported_memory_runs_release_once() {
        let released = Arc::new(AtomicU64::new(0));
        let seen = released.clone();
        let handle = ExportedHandle::new(OsHandle::from_raw(9), HandleKind::OpaqueFd).with_release(
            move |h| {
                seen.fetch_add(h.raw(), Ordering::SeqCst);
            },
        );
        let exported = ExportedMemory::new(handle, 64);
        assert_eq!(exported.size(), 64);
        assert_eq!(exported.kind(), HandleKind::OpaqueFd);
        drop(exported);
        assert_eq!(released.load(Ordering::SeqCst), 9);
    }
}
