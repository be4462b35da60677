//! Command pool and buffer management

use ash::{vk, Device};

use crate::render::vulkan::initialization::context::{VulkanError, VulkanResult};

/// Command pool with RAII cleanup
///
/// Created with the reset flag so per-image buffers can be re-recorded
/// individually each frame.
pub struct CommandPool {
    device: Device,
    handle: vk::CommandPool,
}

impl CommandPool {
    /// Create a command pool for the given queue family
    pub fn new(device: &Device, queue_family_index: u32) -> VulkanResult<Self> {
        let create_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(queue_family_index);

        let handle = unsafe {
            device
                .create_command_pool(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self {
            device: device.clone(),
            handle,
        })
    }

    /// Allocate primary command buffers from this pool
    ///
    /// Buffers are freed with the pool; one per swapchain image.
    pub fn allocate_command_buffers(&self, count: u32) -> VulkanResult<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.handle)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        unsafe {
            self.device
                .allocate_command_buffers(&alloc_info)
                .map_err(VulkanError::Api)
        }
    }

    /// Return previously allocated buffers to the pool
    pub fn free_command_buffers(&self, buffers: &[vk::CommandBuffer]) {
        if !buffers.is_empty() {
            unsafe {
                self.device.free_command_buffers(self.handle, buffers);
            }
        }
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_command_pool(self.handle, None);
        }
    }
}
