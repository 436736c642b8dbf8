// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Vulkan images backed by exportable or imported memory.

use std::sync::Arc;

use ash::vk;

use crate::core::{HandleKind, OsHandle, PixelFormat, Result, ShareError, SharedImageDescriptor};

use super::{VulkanDevice, memory_handle_type, pixel_format_to_vk, shared_image_usage};

/// Vulkan texture wrapper.
///
/// Wraps a VkImage bound at offset 0 to a dedicated memory allocation that is
/// either exportable (producer) or imported from an OS handle (consumer).
pub struct VulkanTexture {
    device: Arc<VulkanDevice>,
    image: vk::Image,
    memory: vk::DeviceMemory,
    /// Allocation size; the padded size on both sides.
    size: u64,
    kind: HandleKind,
    /// Whether the memory came from another process
    imported: bool,
    width: u32,
    height: u32,
    format: PixelFormat,
}

impl VulkanTexture {
    /// Driver-reported size for an image of this shape, without allocating.
    pub fn required_size(
        device: &Arc<VulkanDevice>,
        desc: &SharedImageDescriptor,
        kind: HandleKind,
    ) -> Result<u64> {
        let image = create_image(device, desc, kind)?;
        let requirements = unsafe { device.device().get_image_memory_requirements(image) };
        unsafe { device.device().destroy_image(image, None) };
        Ok(requirements.size)
    }

    /// Create an image whose memory is flagged exportable as `kind` at
    /// allocation time.
    ///
    /// The allocation is sized to the descriptor's padded size so the
    /// importing side can use that size verbatim. Returns the texture and the
    /// driver-reported requirement.
    pub fn new_exportable(
        device: &Arc<VulkanDevice>,
        desc: &SharedImageDescriptor,
        kind: HandleKind,
    ) -> Result<(Self, u64)> {
        let features = device.external_memory_features(desc, kind)?;
        if !features.contains(vk::ExternalMemoryFeatureFlags::EXPORTABLE) {
            return Err(ShareError::Configuration(format!(
                "{} cannot export {kind:?} memory",
                device.name()
            )));
        }

        let image = create_image(device, desc, kind)?;
        let requirements = unsafe { device.device().get_image_memory_requirements(image) };

        let allocated = desc.verify_covers(requirements.size).and_then(|()| {
            let memory_type_index = device.find_memory_type_index(
                requirements.memory_type_bits,
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
            )?;

            let mut export_info =
                vk::ExportMemoryAllocateInfo::default().handle_types(memory_handle_type(kind));
            let mut dedicated = vk::MemoryDedicatedAllocateInfo::default().image(image);
            let alloc_info = vk::MemoryAllocateInfo::default()
                .allocation_size(desc.byte_size())
                .memory_type_index(memory_type_index)
                .push_next(&mut export_info)
                .push_next(&mut dedicated);

            let memory = unsafe { device.device().allocate_memory(&alloc_info, None) }
                .map_err(|e| ShareError::Gpu(format!("Failed to allocate memory: {e}")))?;

            bind(device, image, memory)
        });

        let memory = match allocated {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.device().destroy_image(image, None) };
                return Err(e);
            }
        };

        tracing::debug!(
            "Allocated exportable {}x{} {:?} image: required {} bytes, allocated {}",
            desc.width(),
            desc.height(),
            desc.format(),
            requirements.size,
            desc.byte_size()
        );

        Ok((
            Self::from_parts(device, image, memory, desc, desc.byte_size(), kind, false),
            requirements.size,
        ))
    }

    /// Import memory behind `handle` and bind a new image to it at offset 0.
    ///
    /// `size` is used as the allocation size verbatim. Ownership of `handle`
    /// passes to this call whether or not it succeeds.
    pub fn import(
        device: &Arc<VulkanDevice>,
        handle: OsHandle,
        kind: HandleKind,
        size: u64,
        desc: &SharedImageDescriptor,
    ) -> Result<Self> {
        let image = match create_image(device, desc, kind) {
            Ok(image) => image,
            Err(e) => {
                crate::core::handle::close_native(handle);
                return Err(e);
            }
        };
        let requirements = unsafe { device.device().get_image_memory_requirements(image) };

        if requirements.size > size {
            unsafe { device.device().destroy_image(image, None) };
            crate::core::handle::close_native(handle);
            return Err(ShareError::Gpu(format!(
                "imported size {size} is smaller than the {} bytes this driver requires",
                requirements.size
            )));
        }

        let memory = match import_memory(device, image, handle, kind, size, requirements) {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.device().destroy_image(image, None) };
                return Err(e);
            }
        };

        if let Err(e) = bind(device, image, memory) {
            unsafe {
                device.device().destroy_image(image, None);
                device.device().free_memory(memory, None);
            }
            return Err(e);
        }

        tracing::debug!(
            "Imported {:?} memory {} as {}x{} image ({} bytes)",
            kind,
            handle,
            desc.width(),
            desc.height(),
            size
        );

        Ok(Self::from_parts(device, image, memory, desc, size, kind, true))
    }

    fn from_parts(
        device: &Arc<VulkanDevice>,
        image: vk::Image,
        memory: vk::DeviceMemory,
        desc: &SharedImageDescriptor,
        size: u64,
        kind: HandleKind,
        imported: bool,
    ) -> Self {
        Self {
            device: Arc::clone(device),
            image,
            memory,
            size,
            kind,
            imported,
            width: desc.width(),
            height: desc.height(),
            format: desc.format(),
        }
    }

    /// Export the memory as a new OS handle owned by the caller.
    pub fn export(&self, kind: HandleKind) -> Result<OsHandle> {
        if kind != self.kind {
            return Err(ShareError::Configuration(format!(
                "memory was allocated exportable as {:?}, not {kind:?}",
                self.kind
            )));
        }
        export_memory(&self.device, self.memory, kind)
    }

    /// Records the one-time transition out of `UNDEFINED` into `GENERAL`, the
    /// layout both processes use for the shared image.
    pub fn record_initial_transition(&self, device: &ash::Device, cmd: vk::CommandBuffer) {
        let barrier = vk::ImageMemoryBarrier::default()
            .old_layout(vk::ImageLayout::UNDEFINED)
            .new_layout(vk::ImageLayout::GENERAL)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(self.image)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .base_mip_level(0)
                    .level_count(1)
                    .base_array_layer(0)
                    .layer_count(1),
            )
            .src_access_mask(vk::AccessFlags::empty())
            .dst_access_mask(vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE);

        unsafe {
            device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
    }

    /// Get the underlying Vulkan image handle.
    pub fn image(&self) -> vk::Image {
        self.image
    }

    pub fn memory(&self) -> vk::DeviceMemory {
        self.memory
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn is_imported(&self) -> bool {
        self.imported
    }

    /// Texture width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Texture height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Texture format.
    pub fn format(&self) -> PixelFormat {
        self.format
    }
}

impl Drop for VulkanTexture {
    fn drop(&mut self) {
        unsafe {
            self.device.device().destroy_image(self.image, None);
            self.device.device().free_memory(self.memory, None);
        }
    }
}

// VulkanTexture is Send + Sync because Vulkan handles are thread-safe
unsafe impl Send for VulkanTexture {}
unsafe impl Sync for VulkanTexture {}

fn create_image(
    device: &VulkanDevice,
    desc: &SharedImageDescriptor,
    kind: HandleKind,
) -> Result<vk::Image> {
    let mut external_info =
        vk::ExternalMemoryImageCreateInfo::default().handle_types(memory_handle_type(kind));

    let image_info = vk::ImageCreateInfo::default()
        .image_type(vk::ImageType::TYPE_2D)
        .format(pixel_format_to_vk(desc.format()))
        .extent(vk::Extent3D {
            width: desc.width(),
            height: desc.height(),
            depth: 1,
        })
        .mip_levels(1)
        .array_layers(1)
        .samples(vk::SampleCountFlags::TYPE_1)
        .tiling(vk::ImageTiling::OPTIMAL)
        .usage(shared_image_usage())
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .push_next(&mut external_info);

    unsafe { device.device().create_image(&image_info, None) }
        .map_err(|e| ShareError::Gpu(format!("Failed to create image: {e}")))
}

fn bind(device: &VulkanDevice, image: vk::Image, memory: vk::DeviceMemory) -> Result<vk::DeviceMemory> {
    match unsafe { device.device().bind_image_memory(image, memory, 0) } {
        Ok(()) => Ok(memory),
        Err(e) => {
            unsafe { device.device().free_memory(memory, None) };
            Err(ShareError::Gpu(format!("Failed to bind memory: {e}")))
        }
    }
}

/// Picks a memory type for an import, preferring device-local memory among
/// the types both the image and the handle allow.
fn import_memory_type(
    device: &VulkanDevice,
    type_bits: u32,
) -> Result<u32> {
    device
        .find_memory_type_index(type_bits, vk::MemoryPropertyFlags::DEVICE_LOCAL)
        .or_else(|_| device.find_memory_type_index(type_bits, vk::MemoryPropertyFlags::empty()))
}

#[cfg(unix)]
fn import_memory(
    device: &VulkanDevice,
    image: vk::Image,
    handle: OsHandle,
    kind: HandleKind,
    size: u64,
    requirements: vk::MemoryRequirements,
) -> Result<vk::DeviceMemory> {
    let handle_type = memory_handle_type(kind);
    let fd = handle.as_fd();

    let type_bits = if handle_type == vk::ExternalMemoryHandleTypeFlags::OPAQUE_FD {
        requirements.memory_type_bits
    } else {
        let mut fd_props = vk::MemoryFdPropertiesKHR::default();
        if let Err(e) = unsafe {
            device
                .memory_fd()
                .get_memory_fd_properties(handle_type, fd, &mut fd_props)
        } {
            crate::core::handle::close_native(handle);
            return Err(ShareError::Gpu(format!("Failed to query fd properties: {e}")));
        }
        requirements.memory_type_bits & fd_props.memory_type_bits
    };

    let memory_type_index = match import_memory_type(device, type_bits) {
        Ok(index) => index,
        Err(e) => {
            crate::core::handle::close_native(handle);
            return Err(e);
        }
    };

    let mut import_info = vk::ImportMemoryFdInfoKHR::default()
        .handle_type(handle_type)
        .fd(fd);
    let mut dedicated = vk::MemoryDedicatedAllocateInfo::default().image(image);
    let alloc_info = vk::MemoryAllocateInfo::default()
        .allocation_size(size)
        .memory_type_index(memory_type_index)
        .push_next(&mut import_info)
        .push_next(&mut dedicated);

    // A successful import consumes the fd.
    unsafe { device.device().allocate_memory(&alloc_info, None) }.map_err(|e| {
        crate::core::handle::close_native(handle);
        ShareError::Gpu(format!("Failed to import memory fd {fd}: {e}"))
    })
}

#[cfg(windows)]
fn import_memory(
    device: &VulkanDevice,
    image: vk::Image,
    handle: OsHandle,
    kind: HandleKind,
    size: u64,
    requirements: vk::MemoryRequirements,
) -> Result<vk::DeviceMemory> {
    let handle_type = memory_handle_type(kind);
    let raw = handle.raw() as usize as vk::HANDLE;

    let result = (|| {
        let type_bits = if handle_type == vk::ExternalMemoryHandleTypeFlags::OPAQUE_WIN32 {
            requirements.memory_type_bits
        } else {
            let mut handle_props = vk::MemoryWin32HandlePropertiesKHR::default();
            unsafe {
                device.memory_win32().get_memory_win32_handle_properties(
                    handle_type,
                    raw,
                    &mut handle_props,
                )
            }
            .map_err(|e| ShareError::Gpu(format!("Failed to query handle properties: {e}")))?;
            requirements.memory_type_bits & handle_props.memory_type_bits
        };

        let memory_type_index = import_memory_type(device, type_bits)?;

        let mut import_info = vk::ImportMemoryWin32HandleInfoKHR::default()
            .handle_type(handle_type)
            .handle(raw);
        let mut dedicated = vk::MemoryDedicatedAllocateInfo::default().image(image);
        let alloc_info = vk::MemoryAllocateInfo::default()
            .allocation_size(size)
            .memory_type_index(memory_type_index)
            .push_next(&mut import_info)
            .push_next(&mut dedicated);

        unsafe { device.device().allocate_memory(&alloc_info, None) }
            .map_err(|e| ShareError::Gpu(format!("Failed to import memory handle {handle}: {e}")))
    })();

    // Win32 imports never take ownership of the handle.
    crate::core::handle::close_native(handle);
    result
}

#[cfg(not(any(unix, windows)))]
fn import_memory(
    _: &VulkanDevice,
    _: vk::Image,
    _: OsHandle,
    _: HandleKind,
    _: u64,
    _: vk::MemoryRequirements,
) -> Result<vk::DeviceMemory> {
    Err(ShareError::NotSupported(
        "memory import is not available on this platform".into(),
    ))
}

#[cfg(unix)]
fn export_memory(device: &VulkanDevice, memory: vk::DeviceMemory, kind: HandleKind) -> Result<OsHandle> {
    let get_info = vk::MemoryGetFdInfoKHR::default()
        .memory(memory)
        .handle_type(memory_handle_type(kind));

    let fd = unsafe { device.memory_fd().get_memory_fd(&get_info) }
        .map_err(|e| ShareError::Gpu(format!("Failed to export memory fd: {e}")))?;
    Ok(OsHandle::from_raw(fd as u64))
}

#[cfg(windows)]
fn export_memory(device: &VulkanDevice, memory: vk::DeviceMemory, kind: HandleKind) -> Result<OsHandle> {
    let get_info = vk::MemoryGetWin32HandleInfoKHR::default()
        .memory(memory)
        .handle_type(memory_handle_type(kind));

    let handle = unsafe { device.memory_win32().get_memory_win32_handle(&get_info) }
        .map_err(|e| ShareError::Gpu(format!("Failed to export memory handle: {e}")))?;
    Ok(OsHandle::from_raw(handle as usize as u64))
}

#[cfg(not(any(unix, windows)))]
fn export_memory(_: &VulkanDevice, _: vk::DeviceMemory, _: HandleKind) -> Result<OsHandle> {
    Err(ShareError::NotSupported(
        "memory export is not available on this platform".into(),
    ))
}
