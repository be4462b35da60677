//! Swapchain creation and rebuild
//!
//! Surface capabilities are re-queried from scratch on every build;
//! nothing from a previous generation is trusted. Rebuilds are
//! two-phase: the replacement chain is created (linked to the old one
//! through `old_swapchain`) before the old chain is retired, so a
//! failed rebuild leaves the previous chain intact.

use ash::extensions::khr::Swapchain as SwapchainLoader;
use ash::{vk, Device};

use crate::render::vulkan::initialization::context::{
    PhysicalDeviceInfo, VulkanError, VulkanResult,
};
use crate::render::vulkan::initialization::surface::Surface;

/// Resolve the number of swapchain images to request
///
/// Double buffering is the floor; the driver minimum wins when it is
/// higher. A `max_image_count` of zero means unbounded.
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let mut count = caps.min_image_count.max(2);
    if caps.max_image_count > 0 {
        count = count.min(caps.max_image_count);
    }
    count
}

/// Resolve the swapchain extent against surface capabilities
///
/// A current extent of `0xFFFFFFFF` is the sentinel for "window
/// manager defers to the application"; the requested size is used
/// then, clamped to the advertised bounds. Otherwise the surface
/// dictates the extent exactly.
pub fn choose_extent(
    caps: &vk::SurfaceCapabilitiesKHR,
    requested_width: u32,
    requested_height: u32,
) -> vk::Extent2D {
    if caps.current_extent.width == u32::MAX {
        vk::Extent2D {
            width: requested_width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: requested_height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    } else {
        caps.current_extent
    }
}

/// Pick the composite alpha mode from the supported set
///
/// Preference order: opaque, pre-multiplied, post-multiplied, inherit.
/// The surface always supports at least one mode.
pub fn choose_composite_alpha(
    supported: vk::CompositeAlphaFlagsKHR,
) -> vk::CompositeAlphaFlagsKHR {
    let preference = [
        vk::CompositeAlphaFlagsKHR::OPAQUE,
        vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::INHERIT,
    ];
    preference
        .into_iter()
        .find(|&mode| supported.contains(mode))
        .unwrap_or(vk::CompositeAlphaFlagsKHR::OPAQUE)
}

/// Pick the present mode from the modes the surface reports
///
/// FIFO is the only mode used; every conformant driver must report
/// it, so its absence means the mode query itself is untrustworthy.
pub fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> VulkanResult<vk::PresentModeKHR> {
    if modes.contains(&vk::PresentModeKHR::FIFO) {
        Ok(vk::PresentModeKHR::FIFO)
    } else {
        Err(VulkanError::SwapchainCreation(
            "surface does not report FIFO present mode".to_string(),
        ))
    }
}

/// Pick the surface format for swapchain images
///
/// A single `UNDEFINED` entry means the driver accepts anything, in
/// which case `B8G8R8A8_UNORM` is used. Otherwise that format is
/// preferred when present, falling back to the first entry.
pub fn choose_surface_format(
    formats: &[vk::SurfaceFormatKHR],
) -> VulkanResult<vk::SurfaceFormatKHR> {
    let first = formats
        .first()
        .ok_or_else(|| VulkanError::SwapchainCreation("surface reports no formats".to_string()))?;

    if formats.len() == 1 && first.format == vk::Format::UNDEFINED {
        return Ok(vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: first.color_space,
        });
    }

    Ok(formats
        .iter()
        .copied()
        .find(|f| f.format == vk::Format::B8G8R8A8_UNORM)
        .unwrap_or(*first))
}

/// Generation bookkeeping for two-phase swapchain rebuilds
///
/// `begin` reserves the next generation number for the replacement
/// chain; `commit` makes it current once the replacement exists;
/// `abort` discards the reservation and leaves the current generation
/// untouched. A second `begin` before resolution is rejected.
#[derive(Debug, Default)]
pub struct RebuildLedger {
    current: u64,
    pending: Option<u64>,
}

impl RebuildLedger {
    /// Current (committed) generation
    pub fn current(&self) -> u64 {
        self.current
    }

    /// Whether a rebuild is mid-flight
    pub fn in_progress(&self) -> bool {
        self.pending.is_some()
    }

    /// Reserve the next generation for a replacement chain
    pub fn begin(&mut self) -> Option<u64> {
        if self.pending.is_some() {
            return None;
        }
        let next = self.current + 1;
        self.pending = Some(next);
        Some(next)
    }

    /// Promote the pending generation to current
    pub fn commit(&mut self, generation: u64) -> bool {
        if self.pending == Some(generation) {
            self.current = generation;
            self.pending = None;
            true
        } else {
            false
        }
    }

    /// Discard the pending generation, keeping the current one
    pub fn abort(&mut self, generation: u64) -> bool {
        if self.pending == Some(generation) {
            self.pending = None;
            true
        } else {
            false
        }
    }
}

/// One generation of the swapchain with its image views
pub struct Swapchain {
    device: Device,
    loader: SwapchainLoader,
    /// Raw swapchain handle
    pub handle: vk::SwapchainKHR,
    /// Format of the swapchain images
    pub format: vk::Format,
    /// Extent the chain was built with
    pub extent: vk::Extent2D,
    /// Images owned by the presentation engine
    pub images: Vec<vk::Image>,
    /// One view per image, for framebuffer attachment
    pub image_views: Vec<vk::ImageView>,
    /// Generation this chain belongs to
    pub generation: u64,
}

impl Swapchain {
    /// Build a swapchain against the surface
    ///
    /// `old_swapchain` links the replacement to the chain it retires;
    /// pass null on the first build. The image count is re-read from
    /// the driver after creation since it may exceed the request.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        device: &Device,
        loader: &SwapchainLoader,
        surface: &Surface,
        physical_device: &PhysicalDeviceInfo,
        requested_width: u32,
        requested_height: u32,
        old_swapchain: vk::SwapchainKHR,
        generation: u64,
    ) -> VulkanResult<Self> {
        let caps = surface.capabilities(physical_device.device)?;
        let formats = surface.formats(physical_device.device)?;
        let present_modes = surface.present_modes(physical_device.device)?;

        let surface_format = choose_surface_format(&formats)?;
        let present_mode = choose_present_mode(&present_modes)?;
        let image_count = choose_image_count(&caps);
        let extent = choose_extent(&caps, requested_width, requested_height);
        let composite_alpha = choose_composite_alpha(caps.supported_composite_alpha);

        if extent.width == 0 || extent.height == 0 {
            return Err(VulkanError::SwapchainCreation(
                "surface extent is zero; window is minimized".to_string(),
            ));
        }

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface.handle())
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(caps.current_transform)
            .composite_alpha(composite_alpha)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let handle = unsafe {
            loader
                .create_swapchain(&create_info, None)
                .map_err(|e| VulkanError::SwapchainCreation(format!("{:?}", e)))?
        };

        let images = unsafe {
            loader.get_swapchain_images(handle).map_err(|e| {
                loader.destroy_swapchain(handle, None);
                VulkanError::SwapchainCreation(format!("{:?}", e))
            })?
        };

        let image_views =
            Self::create_image_views(device, &images, surface_format.format).map_err(|e| {
                unsafe { loader.destroy_swapchain(handle, None) };
                e
            })?;

        log::info!(
            "Swapchain generation {} created: {} images, {}x{}, {:?}",
            generation,
            images.len(),
            extent.width,
            extent.height,
            surface_format.format
        );

        Ok(Self {
            device: device.clone(),
            loader: loader.clone(),
            handle,
            format: surface_format.format,
            extent,
            images,
            image_views,
            generation,
        })
    }

    fn create_image_views(
        device: &Device,
        images: &[vk::Image],
        format: vk::Format,
    ) -> VulkanResult<Vec<vk::ImageView>> {
        let mut views = Vec::with_capacity(images.len());
        for &image in images {
            let create_info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(format)
                .components(vk::ComponentMapping::default())
                .subresource_range(
                    vk::ImageSubresourceRange::builder()
                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                        .base_mip_level(0)
                        .level_count(1)
                        .base_array_layer(0)
                        .layer_count(1)
                        .build(),
                );

            let view = unsafe {
                device.create_image_view(&create_info, None).map_err(|e| {
                    for &created in &views {
                        device.destroy_image_view(created, None);
                    }
                    VulkanError::Api(e)
                })?
            };
            views.push(view);
        }
        Ok(views)
    }

    /// Number of images in this chain
    pub fn image_count(&self) -> usize {
        self.images.len()
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for &view in &self.image_views {
                self.device.destroy_image_view(view, None);
            }
            self.loader.destroy_swapchain(self.handle, None);
        }
    }
}

/// Owns the live swapchain and performs two-phase rebuilds
pub struct SwapchainManager {
    ledger: RebuildLedger,
    /// The current committed swapchain generation
    pub swapchain: Swapchain,
}

impl SwapchainManager {
    /// Build the initial swapchain (generation 1)
    pub fn new(
        device: &Device,
        loader: &SwapchainLoader,
        surface: &Surface,
        physical_device: &PhysicalDeviceInfo,
        requested_width: u32,
        requested_height: u32,
    ) -> VulkanResult<Self> {
        let mut ledger = RebuildLedger::default();
        let generation = ledger.begin().unwrap_or(1);
        let swapchain = Swapchain::new(
            device,
            loader,
            surface,
            physical_device,
            requested_width,
            requested_height,
            vk::SwapchainKHR::null(),
            generation,
        );
        match swapchain {
            Ok(swapchain) => {
                ledger.commit(generation);
                Ok(Self { ledger, swapchain })
            }
            Err(e) => {
                ledger.abort(generation);
                Err(e)
            }
        }
    }

    /// Replace the swapchain after invalidation
    ///
    /// The caller must have drained the GPU first. On failure the old
    /// chain stays current and the error propagates.
    pub fn rebuild(
        &mut self,
        device: &Device,
        loader: &SwapchainLoader,
        surface: &Surface,
        physical_device: &PhysicalDeviceInfo,
        requested_width: u32,
        requested_height: u32,
    ) -> VulkanResult<()> {
        let generation = self.ledger.begin().ok_or_else(|| {
            VulkanError::SwapchainCreation("rebuild already in progress".to_string())
        })?;

        let replacement = Swapchain::new(
            device,
            loader,
            surface,
            physical_device,
            requested_width,
            requested_height,
            self.swapchain.handle,
            generation,
        );

        match replacement {
            Ok(replacement) => {
                self.ledger.commit(generation);
                // Retiring the old chain happens here, after the new
                // one exists
                self.swapchain = replacement;
                Ok(())
            }
            Err(e) => {
                self.ledger.abort(generation);
                log::warn!("swapchain rebuild failed, keeping generation {}", self.generation());
                Err(e)
            }
        }
    }

    /// Current committed generation number
    pub fn generation(&self) -> u64 {
        self.ledger.current()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(
        min_count: u32,
        max_count: u32,
        current: (u32, u32),
        min_extent: (u32, u32),
        max_extent: (u32, u32),
    ) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min_count,
            max_image_count: max_count,
            current_extent: vk::Extent2D {
                width: current.0,
                height: current.1,
            },
            min_image_extent: vk::Extent2D {
                width: min_extent.0,
                height: min_extent.1,
            },
            max_image_extent: vk::Extent2D {
                width: max_extent.0,
                height: max_extent.1,
            },
            ..Default::default()
        }
    }

    #[test]
    fn image_count_floors_at_double_buffering() {
        let caps = caps(1, 8, (640, 480), (1, 1), (4096, 4096));
        assert_eq!(choose_image_count(&caps), 2);
    }

    #[test]
    fn image_count_respects_driver_minimum() {
        let caps = caps(3, 0, (640, 480), (1, 1), (4096, 4096));
        assert_eq!(choose_image_count(&caps), 3);
    }

    #[test]
    fn image_count_clamps_to_nonzero_maximum() {
        let caps = caps(4, 3, (640, 480), (1, 1), (4096, 4096));
        assert_eq!(choose_image_count(&caps), 3);
    }

    #[test]
    fn zero_maximum_means_unbounded() {
        let caps = caps(5, 0, (640, 480), (1, 1), (4096, 4096));
        assert_eq!(choose_image_count(&caps), 5);
    }

    #[test]
    fn extent_follows_surface_when_fixed() {
        let caps = caps(2, 0, (800, 600), (1, 1), (4096, 4096));
        let extent = choose_extent(&caps, 640, 480);
        assert_eq!((extent.width, extent.height), (800, 600));
    }

    #[test]
    fn sentinel_extent_uses_requested_size() {
        let caps = caps(2, 0, (u32::MAX, u32::MAX), (1, 1), (4096, 4096));
        let extent = choose_extent(&caps, 640, 480);
        assert_eq!((extent.width, extent.height), (640, 480));
    }

    #[test]
    fn sentinel_extent_clamps_to_bounds() {
        let caps = caps(2, 0, (u32::MAX, u32::MAX), (320, 240), (1024, 768));
        let extent = choose_extent(&caps, 8192, 100);
        assert_eq!((extent.width, extent.height), (1024, 240));
    }

    #[test]
    fn composite_alpha_prefers_opaque() {
        let supported = vk::CompositeAlphaFlagsKHR::OPAQUE
            | vk::CompositeAlphaFlagsKHR::INHERIT
            | vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED;
        assert_eq!(
            choose_composite_alpha(supported),
            vk::CompositeAlphaFlagsKHR::OPAQUE
        );
    }

    #[test]
    fn composite_alpha_follows_preference_order() {
        let supported =
            vk::CompositeAlphaFlagsKHR::INHERIT | vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED;
        assert_eq!(
            choose_composite_alpha(supported),
            vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED
        );
    }

    #[test]
    fn undefined_only_format_becomes_bgra_unorm() {
        let formats = [vk::SurfaceFormatKHR {
            format: vk::Format::UNDEFINED,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }];
        let chosen = choose_surface_format(&formats).unwrap();
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_UNORM);
        assert_eq!(chosen.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);
    }

    #[test]
    fn preferred_format_wins_over_first_entry() {
        let formats = [
            vk::SurfaceFormatKHR {
                format: vk::Format::R8G8B8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ];
        let chosen = choose_surface_format(&formats).unwrap();
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_UNORM);
    }

    #[test]
    fn empty_format_list_is_an_error() {
        assert!(choose_surface_format(&[]).is_err());
    }

    #[test]
    fn present_mode_is_fifo_even_when_others_exist() {
        let modes = [
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::FIFO,
        ];
        assert_eq!(
            choose_present_mode(&modes).unwrap(),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn missing_fifo_is_an_error() {
        let modes = [vk::PresentModeKHR::MAILBOX];
        assert!(choose_present_mode(&modes).is_err());
        assert!(choose_present_mode(&[]).is_err());
    }

    #[test]
    fn ledger_commits_advance_the_generation() {
        let mut ledger = RebuildLedger::default();
        let gen1 = ledger.begin().unwrap();
        assert!(ledger.commit(gen1));
        assert_eq!(ledger.current(), 1);

        let gen2 = ledger.begin().unwrap();
        assert_eq!(gen2, 2);
        assert!(ledger.commit(gen2));
        assert_eq!(ledger.current(), 2);
    }

    #[test]
    fn ledger_abort_keeps_current_generation() {
        let mut ledger = RebuildLedger::default();
        let gen1 = ledger.begin().unwrap();
        ledger.commit(gen1);

        let gen2 = ledger.begin().unwrap();
        assert!(ledger.abort(gen2));
        assert_eq!(ledger.current(), 1);
        assert!(!ledger.in_progress());
    }

    #[test]
    fn ledger_supports_retry_after_failed_rebuild() {
        let mut ledger = RebuildLedger::default();
        let gen1 = ledger.begin().unwrap();
        ledger.commit(gen1);

        // A failed rebuild aborts; the chain it would have replaced
        // stays current and the next tick starts a fresh attempt
        let attempt = ledger.begin().unwrap();
        ledger.abort(attempt);
        assert_eq!(ledger.current(), gen1);

        let retry = ledger.begin().unwrap();
        assert_eq!(retry, attempt);
        assert!(ledger.commit(retry));
        assert_eq!(ledger.current(), retry);
    }

    #[test]
    fn ledger_rejects_nested_begin() {
        let mut ledger = RebuildLedger::default();
        let _gen = ledger.begin().unwrap();
        assert!(ledger.begin().is_none());
    }

    #[test]
    fn ledger_rejects_stale_commit() {
        let mut ledger = RebuildLedger::default();
        let gen1 = ledger.begin().unwrap();
        assert!(!ledger.commit(gen1 + 1));
        assert!(ledger.in_progress());
        assert!(ledger.commit(gen1));
    }
}
