// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Vulkan device with external memory and semaphore interop enabled.

use std::ffi::{CStr, c_char};

use ash::vk;
use parking_lot::Mutex;

use crate::core::{HandleKind, Result, ShareError, SharedImageDescriptor};

use super::{memory_handle_type, pixel_format_to_vk, shared_image_usage};

/// Vulkan GPU device.
///
/// Wraps the Vulkan instance, physical device and logical device together with
/// the platform's external memory and semaphore extension loaders.
pub struct VulkanDevice {
    #[allow(dead_code)]
    entry: ash::Entry,
    instance: ash::Instance,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    queue: vk::Queue,
    /// Vulkan queues are externally synchronized.
    queue_lock: Mutex<()>,
    queue_family_index: u32,
    device_name: String,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    keyed_mutex_supported: bool,
    #[cfg(unix)]
    memory_fd: ash::khr::external_memory_fd::Device,
    #[cfg(unix)]
    semaphore_fd: ash::khr::external_semaphore_fd::Device,
    #[cfg(windows)]
    memory_win32: ash::khr::external_memory_win32::Device,
    #[cfg(windows)]
    semaphore_win32: ash::khr::external_semaphore_win32::Device,
}

impl VulkanDevice {
    /// Create a new Vulkan device.
    ///
    /// Fails with a configuration fault when the selected GPU lacks the
    /// external memory or external semaphore extensions for this platform.
    pub fn new() -> Result<Self> {
        // 1. Load Vulkan entry points
        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| ShareError::Gpu(format!("Failed to load Vulkan: {e}")))?;

        // 2. Create Vulkan instance. External memory capabilities are core in 1.1.
        let app_info = vk::ApplicationInfo::default()
            .application_name(c"texshare")
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(c"texshare")
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::make_api_version(0, 1, 2, 0));

        let instance_info = vk::InstanceCreateInfo::default().application_info(&app_info);

        let instance = unsafe { entry.create_instance(&instance_info, None) }
            .map_err(|e| ShareError::Gpu(format!("Failed to create Vulkan instance: {e}")))?;

        // 3. Select physical device
        let physical_devices = unsafe { instance.enumerate_physical_devices() }
            .map_err(|e| ShareError::Gpu(format!("Failed to enumerate devices: {e}")))?;

        let Some(&first) = physical_devices.first() else {
            unsafe { instance.destroy_instance(None) };
            return Err(ShareError::Configuration("No Vulkan devices found".into()));
        };

        // Prefer discrete GPU, fall back to first available
        let physical_device = physical_devices
            .iter()
            .find(|&&pd| {
                let props = unsafe { instance.get_physical_device_properties(pd) };
                props.device_type == vk::PhysicalDeviceType::DISCRETE_GPU
            })
            .copied()
            .unwrap_or(first);

        let device_props = unsafe { instance.get_physical_device_properties(physical_device) };
        let device_name = unsafe { CStr::from_ptr(device_props.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned();

        let device_type_str = match device_props.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => "Discrete GPU",
            vk::PhysicalDeviceType::INTEGRATED_GPU => "Integrated GPU",
            vk::PhysicalDeviceType::VIRTUAL_GPU => "Virtual GPU",
            vk::PhysicalDeviceType::CPU => "CPU",
            _ => "Other",
        };
        tracing::info!(
            "Selected Vulkan device: {} (type: {})",
            device_name,
            device_type_str
        );

        // 4. Find graphics queue family
        let queue_families =
            unsafe { instance.get_physical_device_queue_family_properties(physical_device) };

        let Some(queue_family_index) = queue_families
            .iter()
            .enumerate()
            .find(|(_, props)| props.queue_flags.contains(vk::QueueFlags::GRAPHICS))
            .map(|(idx, _)| idx as u32)
        else {
            unsafe { instance.destroy_instance(None) };
            return Err(ShareError::Configuration(
                "No graphics queue family found".into(),
            ));
        };

        // 5. Check interop extensions
        let available = match unsafe {
            instance.enumerate_device_extension_properties(physical_device)
        } {
            Ok(available) => available,
            Err(e) => {
                unsafe { instance.destroy_instance(None) };
                return Err(ShareError::Gpu(format!(
                    "Failed to enumerate device extensions: {e}"
                )));
            }
        };
        let available_names: Vec<&CStr> = available
            .iter()
            .map(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) })
            .collect();

        let required = required_device_extensions();
        if let Some(missing) = required.iter().find(|ext| !available_names.contains(ext)) {
            unsafe { instance.destroy_instance(None) };
            return Err(ShareError::Configuration(format!(
                "Vulkan device {device_name} lacks required extension {}",
                missing.to_string_lossy()
            )));
        }

        let mut device_extensions: Vec<*const c_char> =
            required.iter().map(|ext| ext.as_ptr()).collect();

        let keyed_mutex_supported = available_names.contains(&ash::khr::win32_keyed_mutex::NAME);
        if keyed_mutex_supported {
            device_extensions.push(ash::khr::win32_keyed_mutex::NAME.as_ptr());
            tracing::info!("VK_KHR_win32_keyed_mutex available - keyed mutex sync enabled");
        } else {
            tracing::warn!(
                "VK_KHR_win32_keyed_mutex not available - keyed mutex sync will be unsupported"
            );
        }

        // 6. Create logical device
        let queue_priorities = [1.0f32];
        let queue_create_info = vk::DeviceQueueCreateInfo::default()
            .queue_family_index(queue_family_index)
            .queue_priorities(&queue_priorities);

        let queue_create_infos = [queue_create_info];

        let device_create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&device_extensions);

        let device =
            match unsafe { instance.create_device(physical_device, &device_create_info, None) } {
                Ok(device) => device,
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(ShareError::Gpu(format!(
                        "Failed to create logical device: {e}"
                    )));
                }
            };

        // 7. Get the graphics queue
        let queue = unsafe { device.get_device_queue(queue_family_index, 0) };
        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical_device) };

        tracing::info!(
            "Vulkan device initialized: {} (queue family {})",
            device_name,
            queue_family_index
        );

        Ok(Self {
            #[cfg(unix)]
            memory_fd: ash::khr::external_memory_fd::Device::new(&instance, &device),
            #[cfg(unix)]
            semaphore_fd: ash::khr::external_semaphore_fd::Device::new(&instance, &device),
            #[cfg(windows)]
            memory_win32: ash::khr::external_memory_win32::Device::new(&instance, &device),
            #[cfg(windows)]
            semaphore_win32: ash::khr::external_semaphore_win32::Device::new(&instance, &device),
            entry,
            instance,
            physical_device,
            device,
            queue,
            queue_lock: Mutex::new(()),
            queue_family_index,
            device_name,
            memory_properties,
            keyed_mutex_supported,
        })
    }

    /// Picks a memory type allowed by `type_bits` that has every flag in
    /// `properties`. No match is a configuration fault.
    pub fn find_memory_type_index(
        &self,
        type_bits: u32,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<u32> {
        find_memory_type_index(&self.memory_properties, type_bits, properties).ok_or_else(|| {
            ShareError::Configuration(format!(
                "no memory type matches bits {type_bits:#b} with properties {properties:?}"
            ))
        })
    }

    /// External memory features the driver offers for a shared image of this
    /// shape exported or imported as `kind`.
    pub fn external_memory_features(
        &self,
        desc: &SharedImageDescriptor,
        kind: HandleKind,
    ) -> Result<vk::ExternalMemoryFeatureFlags> {
        let mut external_info = vk::PhysicalDeviceExternalImageFormatInfo::default()
            .handle_type(memory_handle_type(kind));
        let format_info = vk::PhysicalDeviceImageFormatInfo2::default()
            .format(pixel_format_to_vk(desc.format()))
            .ty(vk::ImageType::TYPE_2D)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(shared_image_usage())
            .push_next(&mut external_info);

        let mut external_props = vk::ExternalImageFormatProperties::default();
        let mut props = vk::ImageFormatProperties2::default().push_next(&mut external_props);

        match unsafe {
            self.instance.get_physical_device_image_format_properties2(
                self.physical_device,
                &format_info,
                &mut props,
            )
        } {
            Ok(()) => {}
            Err(vk::Result::ERROR_FORMAT_NOT_SUPPORTED) => {
                return Err(ShareError::Configuration(format!(
                    "{:?} images cannot be shared as {kind:?} on {}",
                    desc.format(),
                    self.device_name
                )));
            }
            Err(e) => {
                return Err(ShareError::Gpu(format!(
                    "Failed to query external image format support: {e}"
                )));
            }
        }

        Ok(external_props
            .external_memory_properties
            .external_memory_features)
    }

    /// Get the device name.
    pub fn name(&self) -> &str {
        &self.device_name
    }

    /// Get the Vulkan logical device.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// Get the graphics queue.
    pub fn queue(&self) -> vk::Queue {
        self.queue
    }

    /// Lock held around every submission to [`Self::queue`].
    pub fn queue_lock(&self) -> &Mutex<()> {
        &self.queue_lock
    }

    /// Get the graphics queue family index.
    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }

    pub fn keyed_mutex_supported(&self) -> bool {
        self.keyed_mutex_supported
    }

    #[cfg(unix)]
    pub fn memory_fd(&self) -> &ash::khr::external_memory_fd::Device {
        &self.memory_fd
    }

    #[cfg(unix)]
    pub fn semaphore_fd(&self) -> &ash::khr::external_semaphore_fd::Device {
        &self.semaphore_fd
    }

    #[cfg(windows)]
    pub fn memory_win32(&self) -> &ash::khr::external_memory_win32::Device {
        &self.memory_win32
    }

    #[cfg(windows)]
    pub fn semaphore_win32(&self) -> &ash::khr::external_semaphore_win32::Device {
        &self.semaphore_win32
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        unsafe {
            // Outstanding one-shot submissions are fenced, so idling is enough.
            let _ = self.device.device_wait_idle();
            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}

// VulkanDevice is Send + Sync because Vulkan handles are thread-safe and the
// queue is guarded by queue_lock
unsafe impl Send for VulkanDevice {}
unsafe impl Sync for VulkanDevice {}

#[cfg(unix)]
fn required_device_extensions() -> Vec<&'static CStr> {
    vec![
        ash::khr::external_memory_fd::NAME,
        ash::khr::external_semaphore_fd::NAME,
    ]
}

#[cfg(windows)]
fn required_device_extensions() -> Vec<&'static CStr> {
    vec![
        ash::khr::external_memory_win32::NAME,
        ash::khr::external_semaphore_win32::NAME,
    ]
}

#[cfg(not(any(unix, windows)))]
fn required_device_extensions() -> Vec<&'static CStr> {
    Vec::new()
}

/// A memory type qualifies only when its bit is set in `type_bits` *and* it
/// carries every requested property flag.
pub(crate) fn find_memory_type_index(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    properties: vk::MemoryPropertyFlags,
) -> Option<u32> {
    let count = (memory_properties.memory_type_count as usize).min(vk::MAX_MEMORY_TYPES);
    memory_properties.memory_types[..count]
        .iter()
        .enumerate()
        .find(|(i, ty)| type_bits & (1 << i) != 0 && ty.property_flags.contains(properties))
        .map(|(i, _)| i as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(flags: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: flags.len() as u32,
            ..Default::default()
        };
        for (slot, &f) in props.memory_types.iter_mut().zip(flags) {
            slot.property_flags = f;
        }
        props
    }

    #[test]
    fn test_memory_type_requires_both_bits_and_flags() {
        let p = props(&[
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::DEVICE_LOCAL | vk::MemoryPropertyFlags::HOST_VISIBLE,
        ]);

        // Type 1 is device local but excluded by the bits.
        assert_eq!(
            find_memory_type_index(&p, 0b101, vk::MemoryPropertyFlags::DEVICE_LOCAL),
            Some(2)
        );
        // Type 0 is allowed but lacks the flag.
        assert_eq!(
            find_memory_type_index(&p, 0b001, vk::MemoryPropertyFlags::DEVICE_LOCAL),
            None
        );
        assert_eq!(
            find_memory_type_index(&p, 0b111, vk::MemoryPropertyFlags::DEVICE_LOCAL),
            Some(1)
        );
    }

    #[test]
    fn test_memory_type_ignores_slots_past_count() {
        let mut p = props(&[vk::MemoryPropertyFlags::HOST_VISIBLE]);
        p.memory_types[3].property_flags = vk::MemoryPropertyFlags::DEVICE_LOCAL;
        assert_eq!(
            find_memory_type_index(&p, u32::MAX, vk::MemoryPropertyFlags::DEVICE_LOCAL),
            None
        );
    }

    #[test]
    fn test_vulkan_device_creation() {
        // Either outcome is acceptable; only a panic is a failure.
        match VulkanDevice::new() {
            Ok(device) => assert!(!device.name().is_empty()),
            Err(e) => tracing::info!("Vulkan device unavailable: {e}"),
        }
    }
}
