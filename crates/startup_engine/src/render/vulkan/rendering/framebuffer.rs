//! Framebuffers tying swapchain image views to the render pass

use ash::{vk, Device};

use crate::render::vulkan::initialization::context::{VulkanError, VulkanResult};

/// Framebuffer with RAII cleanup
///
/// One per swapchain image, sharing the single depth attachment.
/// Recreated wholesale on every swapchain rebuild.
pub struct Framebuffer {
    device: Device,
    handle: vk::Framebuffer,
}

impl Framebuffer {
    /// Create a framebuffer for a color view + depth view pair
    pub fn new(
        device: &Device,
        render_pass: vk::RenderPass,
        color_view: vk::ImageView,
        depth_view: vk::ImageView,
        extent: vk::Extent2D,
    ) -> VulkanResult<Self> {
        let attachments = [color_view, depth_view];
        let create_info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass)
            .attachments(&attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        let handle = unsafe {
            device
                .create_framebuffer(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self {
            device: device.clone(),
            handle,
        })
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_framebuffer(self.handle, None);
        }
    }
}
