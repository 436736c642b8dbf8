// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Vulkan synchronization primitives and cross-process sync objects.

use std::sync::Arc;

use ash::vk;

use crate::core::{HandleKind, KeyedMutex, OsHandle, Result, ShareError, Timeout};

use super::{VulkanCommands, VulkanDevice, semaphore_handle_type};

/// Vulkan binary semaphore wrapper.
///
/// Either created exportable (producer) or with a payload imported from
/// another process (consumer).
pub struct VulkanSemaphore {
    device: Arc<VulkanDevice>,
    semaphore: vk::Semaphore,
    kind: HandleKind,
    /// Whether the payload came from another process
    imported: bool,
}

impl VulkanSemaphore {
    /// Create a semaphore whose payload can later be exported as `kind`.
    pub fn new_exportable(device: &Arc<VulkanDevice>, kind: HandleKind) -> Result<Self> {
        let mut export_info =
            vk::ExportSemaphoreCreateInfo::default().handle_types(semaphore_handle_type(kind));
        let semaphore_info = vk::SemaphoreCreateInfo::default().push_next(&mut export_info);

        let semaphore = unsafe { device.device().create_semaphore(&semaphore_info, None) }
            .map_err(|e| ShareError::Gpu(format!("Failed to create semaphore: {e}")))?;

        Ok(Self {
            device: Arc::clone(device),
            semaphore,
            kind,
            imported: false,
        })
    }

    /// Create a semaphore and replace its payload with the one behind `handle`.
    ///
    /// An fd is consumed by a successful import; a Win32 handle never is and
    /// is closed here once the driver holds its own reference.
    pub fn import(device: &Arc<VulkanDevice>, handle: OsHandle, kind: HandleKind) -> Result<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::default();
        let semaphore = match unsafe { device.device().create_semaphore(&semaphore_info, None) } {
            Ok(semaphore) => semaphore,
            Err(e) => {
                crate::core::handle::close_native(handle);
                return Err(ShareError::Gpu(format!("Failed to create semaphore: {e}")));
            }
        };

        if let Err(e) = import_payload(device, semaphore, handle, kind) {
            unsafe { device.device().destroy_semaphore(semaphore, None) };
            return Err(e);
        }

        tracing::debug!("Imported {:?} semaphore payload from {}", kind, handle);

        Ok(Self {
            device: Arc::clone(device),
            semaphore,
            kind,
            imported: true,
        })
    }

    /// Export the payload as a new OS handle owned by the caller.
    pub fn export(&self) -> Result<OsHandle> {
        export_payload(&self.device, self.semaphore, self.kind)
    }

    /// Get the underlying Vulkan semaphore handle.
    pub fn semaphore(&self) -> vk::Semaphore {
        self.semaphore
    }

    pub fn kind(&self) -> HandleKind {
        self.kind
    }

    pub fn is_imported(&self) -> bool {
        self.imported
    }
}

#[cfg(unix)]
fn import_payload(
    device: &VulkanDevice,
    semaphore: vk::Semaphore,
    handle: OsHandle,
    kind: HandleKind,
) -> Result<()> {
    let import_info = vk::ImportSemaphoreFdInfoKHR::default()
        .semaphore(semaphore)
        .handle_type(semaphore_handle_type(kind))
        .fd(handle.as_fd());

    unsafe { device.semaphore_fd().import_semaphore_fd(&import_info) }.map_err(|e| {
        crate::core::handle::close_native(handle);
        ShareError::Gpu(format!("Failed to import semaphore fd: {e}"))
    })
}

#[cfg(windows)]
fn import_payload(
    device: &VulkanDevice,
    semaphore: vk::Semaphore,
    handle: OsHandle,
    kind: HandleKind,
) -> Result<()> {
    let import_info = vk::ImportSemaphoreWin32HandleInfoKHR::default()
        .semaphore(semaphore)
        .handle_type(semaphore_handle_type(kind))
        .handle(handle.raw() as usize as vk::HANDLE);

    let result = unsafe {
        device
            .semaphore_win32()
            .import_semaphore_win32_handle(&import_info)
    };
    crate::core::handle::close_native(handle);
    result.map_err(|e| ShareError::Gpu(format!("Failed to import semaphore handle: {e}")))
}

#[cfg(not(any(unix, windows)))]
fn import_payload(_: &VulkanDevice, _: vk::Semaphore, _: OsHandle, _: HandleKind) -> Result<()> {
    Err(ShareError::NotSupported(
        "semaphore import is not available on this platform".into(),
    ))
}

#[cfg(unix)]
fn export_payload(device: &VulkanDevice, semaphore: vk::Semaphore, kind: HandleKind) -> Result<OsHandle> {
    let get_info = vk::SemaphoreGetFdInfoKHR::default()
        .semaphore(semaphore)
        .handle_type(semaphore_handle_type(kind));

    let fd = unsafe { device.semaphore_fd().get_semaphore_fd(&get_info) }
        .map_err(|e| ShareError::Gpu(format!("Failed to export semaphore fd: {e}")))?;
    Ok(OsHandle::from_raw(fd as u64))
}

#[cfg(windows)]
fn export_payload(device: &VulkanDevice, semaphore: vk::Semaphore, kind: HandleKind) -> Result<OsHandle> {
    let get_info = vk::SemaphoreGetWin32HandleInfoKHR::default()
        .semaphore(semaphore)
        .handle_type(semaphore_handle_type(kind));

    let handle = unsafe {
        device
            .semaphore_win32()
            .get_semaphore_win32_handle(&get_info)
    }
    .map_err(|e| ShareError::Gpu(format!("Failed to export semaphore handle: {e}")))?;
    Ok(OsHandle::from_raw(handle as usize as u64))
}

#[cfg(not(any(unix, windows)))]
fn export_payload(_: &VulkanDevice, _: vk::Semaphore, _: HandleKind) -> Result<OsHandle> {
    Err(ShareError::NotSupported(
        "semaphore export is not available on this platform".into(),
    ))
}

impl Drop for VulkanSemaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.device().destroy_semaphore(self.semaphore, None);
        }
    }
}

// VulkanSemaphore is Send + Sync because Vulkan handles are thread-safe
unsafe impl Send for VulkanSemaphore {}
unsafe impl Sync for VulkanSemaphore {}

/// Vulkan fence wrapper for CPU-GPU synchronization.
pub struct VulkanFence {
    device: Arc<VulkanDevice>,
    fence: vk::Fence,
}

impl VulkanFence {
    /// Create a new Vulkan fence.
    ///
    /// # Arguments
    /// * `device` - The Vulkan device
    /// * `signaled` - Whether to create the fence in signaled state
    pub fn new(device: &Arc<VulkanDevice>, signaled: bool) -> Result<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };

        let fence_info = vk::FenceCreateInfo::default().flags(flags);

        let fence = unsafe { device.device().create_fence(&fence_info, None) }
            .map_err(|e| ShareError::Gpu(format!("Failed to create fence: {e}")))?;

        Ok(Self {
            device: Arc::clone(device),
            fence,
        })
    }

    /// Wait for the fence to be signaled.
    pub fn wait(&self, timeout: Timeout) -> Result<()> {
        unsafe {
            self.device
                .device()
                .wait_for_fences(&[self.fence], true, timeout.as_nanos())
        }
        .map_err(|e| ShareError::Gpu(format!("Failed to wait for fence: {e}")))
    }

    /// Reset the fence to unsignaled state.
    pub fn reset(&self) -> Result<()> {
        unsafe { self.device.device().reset_fences(&[self.fence]) }
            .map_err(|e| ShareError::Gpu(format!("Failed to reset fence: {e}")))
    }

    /// Get the underlying Vulkan fence handle.
    pub fn fence(&self) -> vk::Fence {
        self.fence
    }
}

impl Drop for VulkanFence {
    fn drop(&mut self) {
        unsafe {
            self.device.device().destroy_fence(self.fence, None);
        }
    }
}

// VulkanFence is Send + Sync because Vulkan handles are thread-safe
unsafe impl Send for VulkanFence {}
unsafe impl Sync for VulkanFence {}

/// Keyed mutex carried by an imported or exported memory object
/// (VK_KHR_win32_keyed_mutex).
///
/// Acquire and release ride on otherwise empty queue submissions. The driver
/// reports an expired acquire as `VK_TIMEOUT` from the submit.
pub struct VulkanKeyedMutex {
    memory: vk::DeviceMemory,
    commands: VulkanCommands,
}

impl VulkanKeyedMutex {
    /// `memory` must outlive the mutex; the owning texture guarantees it.
    pub fn new(device: &Arc<VulkanDevice>, memory: vk::DeviceMemory) -> Result<Self> {
        if !device.keyed_mutex_supported() {
            return Err(ShareError::NotSupported(format!(
                "{} does not support VK_KHR_win32_keyed_mutex",
                device.name()
            )));
        }
        Ok(Self {
            memory,
            commands: VulkanCommands::new(device)?,
        })
    }
}

impl KeyedMutex for VulkanKeyedMutex {
    fn acquire(&self, key: u64, timeout: Timeout) -> Result<()> {
        let syncs = [self.memory];
        let keys = [key];
        let timeouts = [timeout.as_win32_millis()];
        let mut info = vk::Win32KeyedMutexAcquireReleaseInfoKHR::default()
            .acquire_syncs(&syncs)
            .acquire_keys(&keys)
            .acquire_timeouts(&timeouts);

        if self.commands.submit_keyed_mutex(&mut info)? {
            tracing::trace!("VulkanKeyedMutex: acquired key {}", key);
            Ok(())
        } else {
            Err(ShareError::LockTimeout {
                key,
                timeout: timeout.reported(),
            })
        }
    }

    fn release(&self, key: u64) -> Result<()> {
        let syncs = [self.memory];
        let keys = [key];
        let mut info = vk::Win32KeyedMutexAcquireReleaseInfoKHR::default()
            .release_syncs(&syncs)
            .release_keys(&keys);

        if self.commands.submit_keyed_mutex(&mut info)? {
            tracing::trace!("VulkanKeyedMutex: released key {}", key);
            Ok(())
        } else {
            Err(ShareError::Gpu(format!(
                "keyed mutex release of key {key} reported a timeout"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> Option<Arc<VulkanDevice>> {
        VulkanDevice::new().ok().map(Arc::new)
    }

    #[test]
    fn test_fence_creation() {
        let Some(device) = device() else {
            return;
        };

        // Test unsignaled fence
        let fence = VulkanFence::new(&device, false);
        assert!(fence.is_ok(), "Fence creation should succeed");

        // Wait on signaled fence should return immediately
        let signaled = VulkanFence::new(&device, true).expect("signaled fence");
        assert!(signaled.wait(Timeout::ZERO).is_ok());
        assert!(signaled.reset().is_ok());
    }

    #[test]
    fn test_exportable_semaphore_round_trip() {
        let Some(device) = device() else {
            return;
        };
        let kind = crate::vulkan::VulkanInterop::native_kind();

        let semaphore = VulkanSemaphore::new_exportable(&device, kind).expect("semaphore");
        assert!(!semaphore.is_imported());
        let handle = semaphore.export().expect("export");

        let imported = VulkanSemaphore::import(&device, handle, kind).expect("import");
        assert!(imported.is_imported());
        assert_eq!(imported.kind(), kind);
    }

    #[test]
    fn test_keyed_mutex_requires_extension() {
        let Some(device) = device() else {
            return;
        };
        if device.keyed_mutex_supported() {
            return;
        }
        let err = VulkanKeyedMutex::new(&device, vk::DeviceMemory::null())
            .err()
            .expect("keyed mutex must be rejected");
        assert!(matches!(err, ShareError::NotSupported(_)));
    }
}
