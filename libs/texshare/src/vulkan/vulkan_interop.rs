// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! [`GpuInterop`] over Vulkan external memory.

use std::sync::Arc;

use ash::vk;

use super::rhi::{VulkanCommands, VulkanDevice, VulkanKeyedMutex, VulkanSemaphore, VulkanTexture};
use crate::core::{
    ExportableImage, ExportedHandle, GpuInterop, HandleKind, OsHandle, Result,
    SharedImageDescriptor,
};

/// Vulkan backend. Memory is flagged exportable at allocation time and
/// exported or imported with explicit calls.
pub struct VulkanInterop {
    device: Arc<VulkanDevice>,
    commands: VulkanCommands,
}

impl VulkanInterop {
    pub fn new() -> Result<Self> {
        Self::with_device(Arc::new(VulkanDevice::new()?))
    }

    pub fn with_device(device: Arc<VulkanDevice>) -> Result<Self> {
        let commands = VulkanCommands::new(&device)?;
        Ok(Self { device, commands })
    }

    pub fn device(&self) -> &Arc<VulkanDevice> {
        &self.device
    }

    /// Opaque handle kind Vulkan can both export and import on this platform.
    pub fn native_kind() -> HandleKind {
        if cfg!(windows) {
            HandleKind::OpaqueWin32
        } else {
            HandleKind::OpaqueFd
        }
    }
}

impl GpuInterop for VulkanInterop {
    type Image = VulkanTexture;
    type Mutex = VulkanKeyedMutex;
    type Semaphore = VulkanSemaphore;

    fn backend_name(&self) -> &'static str {
        "vulkan"
    }

    fn query_required_size(&self, desc: &SharedImageDescriptor) -> Result<u64> {
        VulkanTexture::required_size(&self.device, desc, Self::native_kind())
    }

    fn allocate_exportable(
        &self,
        desc: &SharedImageDescriptor,
        kind: HandleKind,
    ) -> Result<ExportableImage<VulkanTexture>> {
        let (image, required_size) = VulkanTexture::new_exportable(&self.device, desc, kind)?;
        Ok(ExportableImage {
            image,
            required_size,
        })
    }

    fn export_memory(&self, image: &VulkanTexture, kind: HandleKind) -> Result<ExportedHandle> {
        let handle = image.export(kind)?;
        tracing::debug!("[vulkan] exported {:?} memory as {}", kind, handle);
        Ok(ExportedHandle::native(handle, kind))
    }

    fn import_memory(
        &self,
        handle: OsHandle,
        kind: HandleKind,
        size: u64,
        desc: &SharedImageDescriptor,
    ) -> Result<VulkanTexture> {
        VulkanTexture::import(&self.device, handle, kind, size, desc)
    }

    fn keyed_mutex(&self, image: &VulkanTexture) -> Result<VulkanKeyedMutex> {
        VulkanKeyedMutex::new(&self.device, image.memory())
    }

    fn create_exportable_semaphore(&self, kind: HandleKind) -> Result<VulkanSemaphore> {
        VulkanSemaphore::new_exportable(&self.device, kind)
    }

    fn export_semaphore(
        &self,
        semaphore: &VulkanSemaphore,
        kind: HandleKind,
    ) -> Result<ExportedHandle> {
        Ok(ExportedHandle::native(semaphore.export()?, kind))
    }

    fn import_semaphore(&self, handle: OsHandle, kind: HandleKind) -> Result<VulkanSemaphore> {
        VulkanSemaphore::import(&self.device, handle, kind)
    }

    fn signal_initial_transition(
        &self,
        image: &VulkanTexture,
        semaphore: &VulkanSemaphore,
    ) -> Result<()> {
        self.commands.submit_one_shot(
            |device, cmd| image.record_initial_transition(device, cmd),
            &[],
            &[semaphore.semaphore()],
        )?;
        tracing::debug!("[vulkan] initial transition submitted, semaphore signalled");
        Ok(())
    }

    fn wait_initial_transition(
        &self,
        _image: &VulkanTexture,
        semaphore: &VulkanSemaphore,
    ) -> Result<()> {
        // The producer already moved the memory out of UNDEFINED; an empty
        // batch that waits orders every later submission after it.
        self.commands.submit_one_shot(
            |_, _| {},
            &[(semaphore.semaphore(), vk::PipelineStageFlags::ALL_COMMANDS)],
            &[],
        )?;
        tracing::debug!("[vulkan] waited on initial transition semaphore");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{PixelFormat, ShareError};

    fn interop() -> Option<VulkanInterop> {
        VulkanInterop::new().ok()
    }

    #[test]
    fn test_padded_size_covers_driver_requirement() {
        let Some(gpu) = interop() else {
            return;
        };
        let desc = SharedImageDescriptor::new(512, 512, PixelFormat::Bgra8Unorm).expect("desc");
        let required = gpu.query_required_size(&desc).expect("size");
        assert!(required >= desc.nominal_size());
        assert!(desc.verify_covers(required).is_ok());
    }

    #[test]
    fn test_export_import_same_device() {
        let Some(gpu) = interop() else {
            return;
        };
        let desc = SharedImageDescriptor::new(256, 256, PixelFormat::Bgra8Unorm).expect("desc");
        let kind = VulkanInterop::native_kind();

        let exportable = match gpu.allocate_exportable(&desc, kind) {
            Ok(exportable) => exportable,
            // Some drivers cannot export optimal-tiling images at all.
            Err(ShareError::Configuration(_)) => return,
            Err(e) => panic!("allocation failed: {e}"),
        };
        assert_eq!(exportable.image.size(), desc.byte_size());

        let exported = gpu.export_memory(&exportable.image, kind).expect("export");
        // Import consumes its handle; the exported one stays with `exported`.
        let duplicate = duplicate_for_import(exported.handle());
        let imported = gpu
            .import_memory(duplicate, kind, desc.byte_size(), &desc)
            .expect("import");
        assert!(imported.is_imported());
        assert_eq!(imported.width(), 256);
    }

    #[test]
    fn test_d3d11_kind_is_not_exportable() {
        let Some(gpu) = interop() else {
            return;
        };
        let desc = SharedImageDescriptor::new(64, 64, PixelFormat::Bgra8Unorm).expect("desc");
        let err = gpu
            .allocate_exportable(&desc, HandleKind::D3D11Texture)
            .err()
            .expect("D3D11 handles are import-only in Vulkan");
        assert!(matches!(err, ShareError::Configuration(_)));
    }

    #[cfg(unix)]
    fn duplicate_for_import(handle: OsHandle) -> OsHandle {
        let fd = unsafe { libc::dup(handle.as_fd()) };
        assert!(fd >= 0, "dup failed");
        OsHandle::from_raw(fd as u64)
    }

    #[cfg(windows)]
    fn duplicate_for_import(handle: OsHandle) -> OsHandle {
        use crate::core::HandleTransfer;
        use crate::core::transfer::{TargetProcess, Win32HandleTransfer};

        let current = TargetProcess::current().expect("current process");
        let dup = Win32HandleTransfer
            .duplicate(handle, &current)
            .expect("duplicate into self");
        dup.into_local()
    }
}
