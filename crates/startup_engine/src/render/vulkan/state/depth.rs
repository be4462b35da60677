//! Depth attachment backing the render pass
//!
//! A single device-local image sized to the swapchain extent,
//! recreated on every rebuild. Only one frame is in flight, so one
//! depth image serves every swapchain image.

use ash::{vk, Device, Instance};

use crate::render::vulkan::initialization::context::{
    PhysicalDeviceInfo, VulkanError, VulkanResult,
};

/// Depth formats in preference order
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// Whether a format's optimal-tiling features allow use as a
/// depth/stencil attachment
pub fn supports_depth_attachment(properties: &vk::FormatProperties) -> bool {
    properties
        .optimal_tiling_features
        .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
}

/// Pick the first candidate format usable as a depth attachment
pub fn select_depth_format(
    instance: &Instance,
    physical_device: vk::PhysicalDevice,
) -> VulkanResult<vk::Format> {
    for format in DEPTH_FORMAT_CANDIDATES {
        let properties =
            unsafe { instance.get_physical_device_format_properties(physical_device, format) };
        if supports_depth_attachment(&properties) {
            return Ok(format);
        }
    }
    Err(VulkanError::UnsupportedFormat(DEPTH_FORMAT_CANDIDATES[0]))
}

/// Depth image, its device-local memory, and its attachment view
pub struct DepthTarget {
    device: Device,
    image: vk::Image,
    memory: vk::DeviceMemory,
    /// Attachment view bound into the framebuffers
    pub view: vk::ImageView,
    /// Format the image was created with
    pub format: vk::Format,
    /// Extent the image was created with
    pub extent: vk::Extent2D,
}

impl DepthTarget {
    /// Create a depth target sized to the given extent
    pub fn new(
        device: &Device,
        instance: &Instance,
        physical_device: &PhysicalDeviceInfo,
        extent: vk::Extent2D,
    ) -> VulkanResult<Self> {
        let format = select_depth_format(instance, physical_device.device)?;

        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe {
            device
                .create_image(&image_info, None)
                .map_err(VulkanError::Api)?
        };

        let requirements = unsafe { device.get_image_memory_requirements(image) };

        let memory_type_index = physical_device
            .find_memory_type_index(
                requirements.memory_type_bits,
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
            )
            .ok_or_else(|| {
                unsafe { device.destroy_image(image, None) };
                VulkanError::MemoryTypeNotFound {
                    type_bits: requirements.memory_type_bits,
                    flags: vk::MemoryPropertyFlags::DEVICE_LOCAL,
                }
            })?;

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);

        let memory = unsafe {
            device.allocate_memory(&alloc_info, None).map_err(|_| {
                device.destroy_image(image, None);
                VulkanError::Allocation {
                    requested: requirements.size,
                }
            })?
        };

        unsafe {
            device.bind_image_memory(image, memory, 0).map_err(|e| {
                device.free_memory(memory, None);
                device.destroy_image(image, None);
                VulkanError::Api(e)
            })?;
        }

        let mut aspect = vk::ImageAspectFlags::DEPTH;
        if format != vk::Format::D32_SFLOAT {
            aspect |= vk::ImageAspectFlags::STENCIL;
        }

        let view_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(
                vk::ImageSubresourceRange::builder()
                    .aspect_mask(aspect)
                    .base_mip_level(0)
                    .level_count(1)
                    .base_array_layer(0)
                    .layer_count(1)
                    .build(),
            );

        let view = unsafe {
            device.create_image_view(&view_info, None).map_err(|e| {
                device.free_memory(memory, None);
                device.destroy_image(image, None);
                VulkanError::Api(e)
            })?
        };

        log::debug!(
            "Depth target created: {:?}, {}x{}",
            format,
            extent.width,
            extent.height
        );

        Ok(Self {
            device: device.clone(),
            image,
            memory,
            view,
            format,
            extent,
        })
    }
}

impl Drop for DepthTarget {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_image_view(self.view, None);
            self.device.destroy_image(self.image, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_attachment_feature_gate() {
        let usable = vk::FormatProperties {
            optimal_tiling_features: vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT
                | vk::FormatFeatureFlags::SAMPLED_IMAGE,
            ..Default::default()
        };
        assert!(supports_depth_attachment(&usable));

        let linear_only = vk::FormatProperties {
            linear_tiling_features: vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            ..Default::default()
        };
        assert!(!supports_depth_attachment(&linear_only));
    }

    #[test]
    fn candidate_order_prefers_pure_depth() {
        assert_eq!(DEPTH_FORMAT_CANDIDATES[0], vk::Format::D32_SFLOAT);
    }
}
