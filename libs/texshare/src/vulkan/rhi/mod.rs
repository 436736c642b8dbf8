// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Vulkan device, texture and synchronization wrappers.

mod vulkan_command_buffer;
mod vulkan_device;
mod vulkan_sync;
mod vulkan_texture;

pub use vulkan_command_buffer::VulkanCommands;
pub use vulkan_device::VulkanDevice;
pub use vulkan_sync::{VulkanFence, VulkanKeyedMutex, VulkanSemaphore};
pub use vulkan_texture::VulkanTexture;

use ash::vk;

use crate::core::{HandleKind, PixelFormat};

pub(crate) fn pixel_format_to_vk(format: PixelFormat) -> vk::Format {
    match format {
        PixelFormat::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
    }
}

pub(crate) fn memory_handle_type(kind: HandleKind) -> vk::ExternalMemoryHandleTypeFlags {
    match kind {
        HandleKind::OpaqueWin32 => vk::ExternalMemoryHandleTypeFlags::OPAQUE_WIN32,
        HandleKind::D3D11Texture => vk::ExternalMemoryHandleTypeFlags::D3D11_TEXTURE,
        HandleKind::OpaqueFd => vk::ExternalMemoryHandleTypeFlags::OPAQUE_FD,
    }
}

pub(crate) fn semaphore_handle_type(kind: HandleKind) -> vk::ExternalSemaphoreHandleTypeFlags {
    match kind {
        HandleKind::OpaqueWin32 | HandleKind::D3D11Texture => {
            vk::ExternalSemaphoreHandleTypeFlags::OPAQUE_WIN32
        }
        HandleKind::OpaqueFd => vk::ExternalSemaphoreHandleTypeFlags::OPAQUE_FD,
    }
}

/// Usage shared by the producer's and consumer's images. Both sides must
/// create the image identically for the memory to be compatible.
pub(crate) fn shared_image_usage() -> vk::ImageUsageFlags {
    vk::ImageUsageFlags::TRANSFER_SRC
        | vk::ImageUsageFlags::TRANSFER_DST
        | vk::ImageUsageFlags::SAMPLED
        | vk::ImageUsageFlags::COLOR_ATTACHMENT
}
