//! Vulkan backend
//!
//! Bring-up happens in `initialization`, long-lived GPU state lives
//! in `state`, command plumbing in `rendering`, and the per-tick
//! frame cycle in `renderer`.

pub mod initialization;
pub mod renderer;
pub mod rendering;
pub mod state;

pub use initialization::context::{
    DeviceRecord, DeviceSelectionStrategy, FirstDevice, VulkanContext, VulkanError, VulkanResult,
};
pub use renderer::VulkanRenderer;
