// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Vulkan GPU backend (explicit external-memory export/import).

pub mod rhi;
mod vulkan_interop;

pub use rhi::{VulkanDevice, VulkanFence, VulkanKeyedMutex, VulkanSemaphore, VulkanTexture};
pub use vulkan_interop::VulkanInterop;
