// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! One-shot command submission.

use std::sync::Arc;

use ash::vk;
use parking_lot::Mutex;

use crate::core::{Result, ShareError, Timeout};

use super::{VulkanDevice, VulkanFence};

/// Command pool plus fence for blocking one-shot submissions.
///
/// Every submission waits on its fence before returning, so a command buffer
/// is never in flight once a call completes.
pub struct VulkanCommands {
    device: Arc<VulkanDevice>,
    command_pool: vk::CommandPool,
    fence: VulkanFence,
    /// Serializes use of the pool and the fence.
    in_flight: Mutex<()>,
}

impl VulkanCommands {
    pub fn new(device: &Arc<VulkanDevice>) -> Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(device.queue_family_index())
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);

        let command_pool = unsafe { device.device().create_command_pool(&pool_info, None) }
            .map_err(|e| ShareError::Gpu(format!("Failed to create command pool: {e}")))?;

        let fence = match VulkanFence::new(device, false) {
            Ok(fence) => fence,
            Err(e) => {
                unsafe { device.device().destroy_command_pool(command_pool, None) };
                return Err(e);
            }
        };

        Ok(Self {
            device: Arc::clone(device),
            command_pool,
            fence,
            in_flight: Mutex::new(()),
        })
    }

    /// Records `record` into a fresh command buffer and submits it with the
    /// given semaphore waits and signals, then blocks until it completes.
    pub fn submit_one_shot(
        &self,
        record: impl FnOnce(&ash::Device, vk::CommandBuffer),
        wait: &[(vk::Semaphore, vk::PipelineStageFlags)],
        signal: &[vk::Semaphore],
    ) -> Result<()> {
        let _in_flight = self.in_flight.lock();
        let device = self.device.device();

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let command_buffers = unsafe { device.allocate_command_buffers(&alloc_info) }
            .map_err(|e| ShareError::Gpu(format!("Failed to allocate command buffer: {e}")))?;

        let result = self.record_and_submit(&command_buffers, record, wait, signal);

        unsafe { device.free_command_buffers(self.command_pool, &command_buffers) };
        result
    }

    fn record_and_submit(
        &self,
        command_buffers: &[vk::CommandBuffer],
        record: impl FnOnce(&ash::Device, vk::CommandBuffer),
        wait: &[(vk::Semaphore, vk::PipelineStageFlags)],
        signal: &[vk::Semaphore],
    ) -> Result<()> {
        let device = self.device.device();
        let command_buffer = command_buffers[0];

        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { device.begin_command_buffer(command_buffer, &begin_info) }
            .map_err(|e| ShareError::Gpu(format!("Failed to begin command buffer: {e}")))?;

        record(device, command_buffer);

        unsafe { device.end_command_buffer(command_buffer) }
            .map_err(|e| ShareError::Gpu(format!("Failed to end command buffer: {e}")))?;

        let wait_semaphores: Vec<vk::Semaphore> = wait.iter().map(|(s, _)| *s).collect();
        let wait_stages: Vec<vk::PipelineStageFlags> = wait.iter().map(|(_, st)| *st).collect();

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(command_buffers)
            .signal_semaphores(signal);

        self.submit_and_wait(submit_info)
    }

    /// Submits a batch with no command buffers whose only effect is the
    /// keyed mutex acquire or release in `keyed_mutex`.
    ///
    /// A driver-side acquire timeout surfaces as `vk::Result::TIMEOUT` from
    /// the submit itself and is returned as `Ok(false)`.
    pub fn submit_keyed_mutex(
        &self,
        keyed_mutex: &mut vk::Win32KeyedMutexAcquireReleaseInfoKHR<'_>,
    ) -> Result<bool> {
        let _in_flight = self.in_flight.lock();
        let submit_info = vk::SubmitInfo::default().push_next(keyed_mutex);

        let submitted = {
            let _queue = self.device.queue_lock().lock();
            unsafe {
                self.device.device().queue_submit(
                    self.device.queue(),
                    &[submit_info],
                    self.fence.fence(),
                )
            }
        };

        match submitted {
            Ok(()) => {}
            Err(vk::Result::TIMEOUT) => return Ok(false),
            Err(e) => {
                return Err(ShareError::Gpu(format!(
                    "Failed to submit keyed mutex batch: {e}"
                )));
            }
        }

        self.fence.wait(Timeout::Infinite)?;
        self.fence.reset()?;
        Ok(true)
    }

    fn submit_and_wait(&self, submit_info: vk::SubmitInfo<'_>) -> Result<()> {
        {
            let _queue = self.device.queue_lock().lock();
            unsafe {
                self.device.device().queue_submit(
                    self.device.queue(),
                    &[submit_info],
                    self.fence.fence(),
                )
            }
            .map_err(|e| ShareError::Gpu(format!("Failed to submit command buffer: {e}")))?;
        }

        self.fence.wait(Timeout::Infinite)?;
        self.fence.reset()
    }
}

impl Drop for VulkanCommands {
    fn drop(&mut self) {
        unsafe {
            self.device
                .device()
                .destroy_command_pool(self.command_pool, None);
        }
    }
}

// VulkanCommands is Send + Sync because the pool and fence are guarded by
// in_flight
unsafe impl Send for VulkanCommands {}
unsafe impl Sync for VulkanCommands {}
