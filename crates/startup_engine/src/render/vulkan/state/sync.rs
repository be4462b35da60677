//! CPU/GPU synchronization primitives
//!
//! RAII wrappers over semaphores and fences, plus the fixed pair of
//! binary semaphores the frame driver reuses every tick. With a
//! single frame in flight the blocking fence wait in the frame driver
//! guarantees each semaphore's prior use has completed before it is
//! waited on or signaled again, so the pair never needs duplication.

use ash::{vk, Device};

use crate::render::vulkan::initialization::context::{VulkanError, VulkanResult};

/// Number of frames the CPU may record ahead of the GPU
///
/// Fixed at one: each tick blocks on the submission fence before the
/// next record begins. Raising this requires per-frame semaphore and
/// command-buffer sets.
pub const MAX_FRAMES_IN_FLIGHT: usize = 1;

/// Upper bound on any blocking fence wait, in nanoseconds
///
/// Ten seconds. A GPU that has not finished a clear-and-present by
/// then is hung; the timeout converts a silent deadlock into an error.
pub const SUBMIT_WAIT_TIMEOUT_NS: u64 = 10_000_000_000;

/// Binary semaphore with RAII cleanup
pub struct Semaphore {
    device: Device,
    handle: vk::Semaphore,
}

impl Semaphore {
    /// Create an unsignaled binary semaphore
    pub fn new(device: &Device) -> VulkanResult<Self> {
        let create_info = vk::SemaphoreCreateInfo::builder();
        let handle = unsafe {
            device
                .create_semaphore(&create_info, None)
                .map_err(VulkanError::Api)?
        };
        Ok(Self {
            device: device.clone(),
            handle,
        })
    }

    /// Raw semaphore handle
    pub fn handle(&self) -> vk::Semaphore {
        self.handle
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_semaphore(self.handle, None);
        }
    }
}

/// Fence with RAII cleanup
pub struct Fence {
    device: Device,
    handle: vk::Fence,
}

impl Fence {
    /// Create a fence, optionally in the signaled state
    pub fn new(device: &Device, signaled: bool) -> VulkanResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let create_info = vk::FenceCreateInfo::builder().flags(flags);
        let handle = unsafe {
            device
                .create_fence(&create_info, None)
                .map_err(VulkanError::Api)?
        };
        Ok(Self {
            device: device.clone(),
            handle,
        })
    }

    /// Raw fence handle
    pub fn handle(&self) -> vk::Fence {
        self.handle
    }

    /// Block until the fence signals or the timeout elapses
    pub fn wait(&self, timeout_ns: u64) -> VulkanResult<()> {
        unsafe {
            self.device
                .wait_for_fences(&[self.handle], true, timeout_ns)
                .map_err(VulkanError::Api)
        }
    }

    /// Return the fence to the unsignaled state
    pub fn reset(&self) -> VulkanResult<()> {
        unsafe {
            self.device
                .reset_fences(&[self.handle])
                .map_err(VulkanError::Api)
        }
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_fence(self.handle, None);
        }
    }
}

/// The two binary semaphores shared by every frame
pub struct FrameSync {
    /// Signaled by acquire, waited on by submit
    pub image_acquired: Semaphore,
    /// Signaled by submit, waited on by present
    pub render_complete: Semaphore,
}

impl FrameSync {
    /// Create the per-run semaphore pair
    pub fn new(device: &Device) -> VulkanResult<Self> {
        Ok(Self {
            image_acquired: Semaphore::new(device)?,
            render_complete: Semaphore::new(device)?,
        })
    }
}
