//! Vulkan surface management
//!
//! Wraps the presentation surface created from the window. The surface
//! outlives every swapchain built against it and is destroyed before
//! the instance.

use ash::extensions::khr::Surface as SurfaceLoader;
use ash::vk;

use crate::render::vulkan::initialization::context::{VulkanError, VulkanInstance, VulkanResult};
use crate::render::window::Window;

/// Presentation surface with RAII cleanup
pub struct Surface {
    loader: SurfaceLoader,
    handle: vk::SurfaceKHR,
}

impl Surface {
    /// Create a surface for the window
    ///
    /// GLFW performs the platform-specific surface creation; the
    /// loader is kept alongside the handle for capability queries.
    pub fn new(instance: &VulkanInstance, window: &mut Window) -> VulkanResult<Self> {
        let handle = window
            .create_vulkan_surface(instance.instance.handle())
            .map_err(|e| VulkanError::SurfaceCreation(e.to_string()))?;

        let loader = SurfaceLoader::new(&instance.entry, &instance.instance);

        log::debug!("Presentation surface created");

        Ok(Self { loader, handle })
    }

    /// Raw surface handle
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    /// Query current surface capabilities (re-queried on every
    /// swapchain build, never cached)
    pub fn capabilities(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> VulkanResult<vk::SurfaceCapabilitiesKHR> {
        unsafe {
            self.loader
                .get_physical_device_surface_capabilities(physical_device, self.handle)
                .map_err(VulkanError::Api)
        }
    }

    /// Query supported surface formats
    pub fn formats(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> VulkanResult<Vec<vk::SurfaceFormatKHR>> {
        unsafe {
            self.loader
                .get_physical_device_surface_formats(physical_device, self.handle)
                .map_err(VulkanError::Api)
        }
    }

    /// Query supported present modes
    pub fn present_modes(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> VulkanResult<Vec<vk::PresentModeKHR>> {
        unsafe {
            self.loader
                .get_physical_device_surface_present_modes(physical_device, self.handle)
                .map_err(VulkanError::Api)
        }
    }

    /// Whether the given queue family can present to this surface
    pub fn supports_present(
        &self,
        physical_device: vk::PhysicalDevice,
        queue_family_index: u32,
    ) -> VulkanResult<bool> {
        unsafe {
            self.loader
                .get_physical_device_surface_support(physical_device, queue_family_index, self.handle)
                .map_err(VulkanError::Api)
        }
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe {
            self.loader.destroy_surface(self.handle, None);
        }
    }
}
