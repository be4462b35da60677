//! Per-frame rendering driver
//!
//! Owns everything built on top of the device context and runs the
//! acquire → wait → record → submit → present cycle once per tick.
//! Exactly one frame is in flight: the tick blocks on the submission
//! fence before returning, so the next tick never overlaps GPU work.

use ash::vk;

use crate::core::config::EngineConfig;
use crate::render::vulkan::initialization::context::{
    DeviceSelectionStrategy, FirstDevice, VulkanContext, VulkanError, VulkanResult,
};
use crate::render::vulkan::rendering::commands::CommandPool;
use crate::render::vulkan::rendering::framebuffer::Framebuffer;
use crate::render::vulkan::rendering::render_pass::RenderPass;
use crate::render::vulkan::state::depth::DepthTarget;
use crate::render::vulkan::state::swapchain::SwapchainManager;
use crate::render::vulkan::state::sync::{Fence, FrameSync, SUBMIT_WAIT_TIMEOUT_NS};
use crate::render::window::Window;

/// Color every frame clears to
const CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

/// Where a tick stands in the frame cycle
///
/// The phases are strictly ordered; `advance` rejects any transition
/// the cycle does not allow, which is what keeps a failed acquire
/// from reaching record, submit, or present in the same tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePhase {
    /// Between ticks, ready to acquire
    Idle,
    /// An image index is held, its prior submission not yet checked
    Acquired,
    /// The image's previous submission has fully completed
    ReuseSafe,
    /// Commands for this tick are recorded
    Recorded,
    /// Work is on the queue, fence pending
    Submitted,
    /// The swapchain is stale; only a rebuild leaves this phase
    Invalidated,
}

/// Events that move a tick through the frame cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameEvent {
    /// Acquire returned an image index
    Acquire,
    /// Acquire reported the swapchain stale
    AcquireFailed,
    /// The per-image submission fence was observed signaled
    WaitReuse,
    /// Command recording finished
    Record,
    /// The queue accepted the submission
    Submit,
    /// Present was enqueued successfully
    Present,
    /// Present reported the swapchain stale
    PresentFailed,
    /// The surface is known stale between ticks (resize, or a
    /// suboptimal acquire whose frame still completed)
    Invalidate,
    /// A replacement swapchain was committed
    Rebuilt,
}

impl FramePhase {
    /// Apply one event, returning the next phase or `None` when the
    /// cycle forbids it
    pub fn advance(self, event: FrameEvent) -> Option<FramePhase> {
        use FrameEvent::*;
        use FramePhase::*;
        match (self, event) {
            (Idle, Acquire) => Some(Acquired),
            (Idle, AcquireFailed) => Some(Invalidated),
            (Acquired, WaitReuse) => Some(ReuseSafe),
            (ReuseSafe, Record) => Some(Recorded),
            (Recorded, Submit) => Some(Submitted),
            (Submitted, Present) => Some(Idle),
            (Submitted, PresentFailed) => Some(Invalidated),
            (Idle, Invalidate) => Some(Invalidated),
            (Invalidated, Rebuilt) => Some(Idle),
            _ => None,
        }
    }
}

/// Vulkan renderer driving the per-tick frame cycle
///
/// Field order is teardown order: everything built on the device
/// drops before the context it was built from.
pub struct VulkanRenderer {
    framebuffers: Vec<Framebuffer>,
    image_fences: Vec<Option<Fence>>,
    command_buffers: Vec<vk::CommandBuffer>,
    command_pool: CommandPool,
    frame_sync: FrameSync,
    depth_target: DepthTarget,
    swapchain: SwapchainManager,
    render_pass: RenderPass,
    phase: FramePhase,
    requested_extent: (u32, u32),
    context: VulkanContext,
}

impl VulkanRenderer {
    /// Bring up the renderer with the default device selection
    pub fn new(window: &mut Window, config: &EngineConfig) -> VulkanResult<Self> {
        Self::with_strategy(window, config, &FirstDevice)
    }

    /// Bring up the renderer with an explicit selection strategy
    pub fn with_strategy(
        window: &mut Window,
        config: &EngineConfig,
        strategy: &dyn DeviceSelectionStrategy,
    ) -> VulkanResult<Self> {
        let context = VulkanContext::new(window, config, strategy)?;
        let device = context.raw_device();

        let (width, height) = window.get_framebuffer_size();
        let swapchain = SwapchainManager::new(
            &device,
            context.swapchain_loader(),
            &context.surface,
            &context.physical_device,
            width,
            height,
        )?;

        let depth_target = DepthTarget::new(
            &device,
            context.instance(),
            &context.physical_device,
            swapchain.swapchain.extent,
        )?;

        let render_pass = RenderPass::new(&device, swapchain.swapchain.format, depth_target.format)?;

        let framebuffers = Self::create_framebuffers(
            &device,
            &render_pass,
            &swapchain,
            &depth_target,
        )?;

        let command_pool = CommandPool::new(&device, context.device.queue_family_index)?;
        let command_buffers =
            command_pool.allocate_command_buffers(swapchain.swapchain.image_count() as u32)?;

        let frame_sync = FrameSync::new(&device)?;
        let image_fences = (0..swapchain.swapchain.image_count()).map(|_| None).collect();

        log::info!("Renderer initialized");

        Ok(Self {
            framebuffers,
            image_fences,
            command_buffers,
            command_pool,
            frame_sync,
            depth_target,
            swapchain,
            render_pass,
            phase: FramePhase::Idle,
            requested_extent: (width, height),
            context,
        })
    }

    fn create_framebuffers(
        device: &ash::Device,
        render_pass: &RenderPass,
        swapchain: &SwapchainManager,
        depth_target: &DepthTarget,
    ) -> VulkanResult<Vec<Framebuffer>> {
        swapchain
            .swapchain
            .image_views
            .iter()
            .map(|&view| {
                Framebuffer::new(
                    device,
                    render_pass.handle(),
                    view,
                    depth_target.view,
                    swapchain.swapchain.extent,
                )
            })
            .collect()
    }

    fn step(&mut self, event: FrameEvent) {
        match self.phase.advance(event) {
            Some(next) => self.phase = next,
            None => {
                log::error!(
                    "illegal frame transition: {:?} on {:?}",
                    event,
                    self.phase
                );
                self.phase = FramePhase::Invalidated;
            }
        }
    }

    /// Record the window's framebuffer size; the next tick rebuilds
    pub fn note_resize(&mut self, width: u32, height: u32) {
        self.requested_extent = (width, height);
        if self.phase == FramePhase::Idle {
            self.step(FrameEvent::Invalidate);
        }
    }

    /// Current committed swapchain generation
    pub fn swapchain_generation(&self) -> u64 {
        self.swapchain.generation()
    }

    /// Number of per-image framebuffers in the current generation
    pub fn framebuffer_count(&self) -> usize {
        self.framebuffers.len()
    }

    /// Run one tick of the frame cycle
    ///
    /// A stale swapchain is handled internally: the tick that detects
    /// it does no further work, the next tick rebuilds and then
    /// renders. A failed rebuild is fatal to that tick only; the next
    /// tick retries. Returned errors are fatal.
    pub fn draw_frame(&mut self) -> VulkanResult<()> {
        if self.phase == FramePhase::Invalidated {
            return match self.rebuild() {
                Err(VulkanError::SwapchainCreation(reason)) => {
                    // The old chain is still current and the phase is
                    // still Invalidated, so the next tick retries
                    log::warn!("swapchain rebuild failed, retrying next frame: {}", reason);
                    Ok(())
                }
                other => other,
            };
        }

        let device = self.context.raw_device();
        let loader = self.context.swapchain_loader().clone();

        // Acquire: on a stale chain the semaphore was never signaled,
        // so aborting the tick here leaves sync state clean
        let acquire = unsafe {
            loader.acquire_next_image(
                self.swapchain.swapchain.handle,
                u64::MAX,
                self.frame_sync.image_acquired.handle(),
                vk::Fence::null(),
            )
        };
        let image_index = match acquire {
            Ok((index, false)) => index,
            Ok((index, true)) => {
                // Suboptimal still signals the semaphore; finish this
                // frame on the old chain and rebuild next tick
                self.step(FrameEvent::Acquire);
                self.finish_frame(&device, index)?;
                // Present may itself have flagged staleness; only a
                // frame that ran to completion needs the nudge
                if self.phase == FramePhase::Idle {
                    self.step(FrameEvent::Invalidate);
                }
                return Ok(());
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                self.step(FrameEvent::AcquireFailed);
                return Ok(());
            }
            Err(e) => return Err(VulkanError::Api(e)),
        };
        self.step(FrameEvent::Acquire);

        self.finish_frame(&device, image_index)
    }

    /// Wait, record, submit, and present for an acquired image
    fn finish_frame(&mut self, device: &ash::Device, image_index: u32) -> VulkanResult<()> {
        let index = image_index as usize;

        // The image's previous submission must be fully complete
        // before its command buffer is touched again
        if let Some(fence) = &self.image_fences[index] {
            fence.wait(SUBMIT_WAIT_TIMEOUT_NS)?;
        }
        let fence = Fence::new(device, false)?;
        self.step(FrameEvent::WaitReuse);

        let command_buffer = self.command_buffers[index];
        self.record_clear(device, command_buffer, self.swapchain.swapchain.images[index])?;
        self.step(FrameEvent::Record);

        let wait_semaphores = [self.frame_sync.image_acquired.handle()];
        let wait_stages = [vk::PipelineStageFlags::BOTTOM_OF_PIPE];
        let signal_semaphores = [self.frame_sync.render_complete.handle()];
        let command_buffers = [command_buffer];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();

        unsafe {
            device
                .queue_submit(
                    self.context.graphics_queue(),
                    &[submit_info],
                    fence.handle(),
                )
                .map_err(VulkanError::Api)?;
        }
        self.step(FrameEvent::Submit);

        // Single frame in flight: block here until the GPU is done
        fence.wait(SUBMIT_WAIT_TIMEOUT_NS)?;
        self.image_fences[index] = Some(fence);

        let swapchains = [self.swapchain.swapchain.handle];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&signal_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let present = unsafe {
            self.context
                .swapchain_loader()
                .queue_present(self.context.graphics_queue(), &present_info)
        };
        match present {
            Ok(false) => {
                self.step(FrameEvent::Present);
                Ok(())
            }
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                self.step(FrameEvent::PresentFailed);
                Ok(())
            }
            Err(e) => Err(VulkanError::Api(e)),
        }
    }

    /// Record the fixed clear for one swapchain image
    ///
    /// Transition to transfer-destination, clear, transition to
    /// present-source. No render pass is entered; the clear runs as a
    /// transfer operation.
    fn record_clear(
        &self,
        device: &ash::Device,
        command_buffer: vk::CommandBuffer,
        image: vk::Image,
    ) -> VulkanResult<()> {
        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        let range = vk::ImageSubresourceRange::builder()
            .aspect_mask(vk::ImageAspectFlags::COLOR)
            .base_mip_level(0)
            .level_count(1)
            .base_array_layer(0)
            .layer_count(1)
            .build();

        unsafe {
            device
                .begin_command_buffer(command_buffer, &begin_info)
                .map_err(VulkanError::Api)?;

            let to_transfer = vk::ImageMemoryBarrier::builder()
                .src_access_mask(vk::AccessFlags::empty())
                .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .old_layout(vk::ImageLayout::UNDEFINED)
                .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(image)
                .subresource_range(range)
                .build();
            device.cmd_pipeline_barrier(
                command_buffer,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[to_transfer],
            );

            let clear_value = vk::ClearColorValue {
                float32: CLEAR_COLOR,
            };
            device.cmd_clear_color_image(
                command_buffer,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &clear_value,
                &[range],
            );

            let to_present = vk::ImageMemoryBarrier::builder()
                .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .dst_access_mask(vk::AccessFlags::MEMORY_READ)
                .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .new_layout(vk::ImageLayout::PRESENT_SRC_KHR)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(image)
                .subresource_range(range)
                .build();
            device.cmd_pipeline_barrier(
                command_buffer,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[to_present],
            );

            device
                .end_command_buffer(command_buffer)
                .map_err(VulkanError::Api)?;
        }

        Ok(())
    }

    /// Replace the swapchain and everything sized to it
    ///
    /// A zero-sized framebuffer (minimized window) skips the rebuild
    /// and stays invalidated; ticks remain cheap no-ops until the
    /// window is restored.
    fn rebuild(&mut self) -> VulkanResult<()> {
        let (width, height) = self.requested_extent;
        if width == 0 || height == 0 {
            return Ok(());
        }

        let device = self.context.raw_device();
        unsafe {
            device.device_wait_idle().map_err(VulkanError::Api)?;
        }

        let loader = self.context.swapchain_loader().clone();
        self.swapchain.rebuild(
            &device,
            &loader,
            &self.context.surface,
            &self.context.physical_device,
            width,
            height,
        )?;

        self.depth_target = DepthTarget::new(
            &device,
            self.context.instance(),
            &self.context.physical_device,
            self.swapchain.swapchain.extent,
        )?;

        self.framebuffers = Self::create_framebuffers(
            &device,
            &self.render_pass,
            &self.swapchain,
            &self.depth_target,
        )?;

        self.command_pool.free_command_buffers(&self.command_buffers);
        self.command_buffers = self
            .command_pool
            .allocate_command_buffers(self.swapchain.swapchain.image_count() as u32)?;

        // The GPU is idle, so old fences and semaphores carry no
        // pending signals; start the new generation clean
        self.image_fences = (0..self.swapchain.swapchain.image_count()).map(|_| None).collect();
        self.frame_sync = FrameSync::new(&device)?;

        self.step(FrameEvent::Rebuilt);
        log::info!(
            "Swapchain rebuilt to generation {}",
            self.swapchain.generation()
        );
        Ok(())
    }

    /// Block until the GPU has finished all submitted work
    pub fn wait_idle(&self) -> VulkanResult<()> {
        unsafe {
            self.context
                .raw_device()
                .device_wait_idle()
                .map_err(VulkanError::Api)
        }
    }
}

impl Drop for VulkanRenderer {
    fn drop(&mut self) {
        // Drain the GPU so dependent resources can drop safely
        let _ = self.wait_idle();
        self.command_pool.free_command_buffers(&self.command_buffers);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use FrameEvent::*;
    use FramePhase::*;

    #[test]
    fn happy_path_cycles_back_to_idle() {
        let mut phase = Idle;
        for event in [Acquire, WaitReuse, Record, Submit, Present] {
            phase = phase.advance(event).unwrap();
        }
        assert_eq!(phase, Idle);
    }

    #[test]
    fn failed_acquire_skips_the_rest_of_the_tick() {
        let phase = Idle.advance(AcquireFailed).unwrap();
        assert_eq!(phase, Invalidated);

        // No record, submit, or present is reachable from here
        assert_eq!(phase.advance(Record), None);
        assert_eq!(phase.advance(Submit), None);
        assert_eq!(phase.advance(Present), None);
    }

    #[test]
    fn recording_requires_the_reuse_wait() {
        let phase = Idle.advance(Acquire).unwrap();
        assert_eq!(phase.advance(Record), None);
        assert_eq!(phase.advance(Submit), None);

        let phase = phase.advance(WaitReuse).unwrap();
        assert_eq!(phase.advance(Record), Some(Recorded));
    }

    #[test]
    fn present_failure_invalidates() {
        let phase = Idle
            .advance(Acquire)
            .and_then(|p| p.advance(WaitReuse))
            .and_then(|p| p.advance(Record))
            .and_then(|p| p.advance(Submit))
            .unwrap();
        assert_eq!(phase.advance(PresentFailed), Some(Invalidated));
    }

    #[test]
    fn only_a_rebuild_leaves_invalidated() {
        let phase = Invalidated;
        assert_eq!(phase.advance(Acquire), None);
        assert_eq!(phase.advance(WaitReuse), None);
        assert_eq!(phase.advance(Rebuilt), Some(Idle));
    }

    #[test]
    fn suboptimal_acquire_completes_the_frame_then_invalidates() {
        // The frame runs to completion on the old chain; the stale
        // flag is applied afterwards through a legal transition
        let mut phase = Idle;
        for event in [Acquire, WaitReuse, Record, Submit, Present] {
            phase = phase.advance(event).expect("cycle step must be legal");
        }
        assert_eq!(phase, Idle);
        assert_eq!(phase.advance(Invalidate), Some(Invalidated));
    }

    #[test]
    fn invalidate_is_only_legal_between_ticks() {
        assert_eq!(Idle.advance(Invalidate), Some(Invalidated));
        assert_eq!(Acquired.advance(Invalidate), None);
        assert_eq!(ReuseSafe.advance(Invalidate), None);
        assert_eq!(Recorded.advance(Invalidate), None);
        assert_eq!(Submitted.advance(Invalidate), None);
        assert_eq!(Invalidated.advance(Invalidate), None);
    }

    #[test]
    fn stale_present_needs_no_extra_invalidation() {
        // When present itself reports staleness the machine is
        // already Invalidated; a second invalidation is rejected
        let phase = Idle
            .advance(Acquire)
            .and_then(|p| p.advance(WaitReuse))
            .and_then(|p| p.advance(Record))
            .and_then(|p| p.advance(Submit))
            .and_then(|p| p.advance(PresentFailed))
            .unwrap();
        assert_eq!(phase, Invalidated);
        assert_eq!(phase.advance(Invalidate), None);
        assert_eq!(phase.advance(Rebuilt), Some(Idle));
    }

    #[test]
    fn submit_cannot_be_replayed() {
        let phase = Idle
            .advance(Acquire)
            .and_then(|p| p.advance(WaitReuse))
            .and_then(|p| p.advance(Record))
            .and_then(|p| p.advance(Submit))
            .unwrap();
        assert_eq!(phase.advance(Submit), None);
    }
}
