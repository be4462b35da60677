//! Rendering subsystem
//!
//! The window wrapper and the Vulkan backend. The backend performs
//! device bring-up once at startup and then drives the per-tick
//! acquire/record/submit/present cycle.

pub mod vulkan;
pub mod window;

pub use vulkan::VulkanRenderer;
pub use window::Window;
