//! Vulkan initialization types (instance, device context, surface)

pub mod context;
pub mod surface;
