//! Long-lived GPU state: swapchain, depth target, synchronization

pub mod depth;
pub mod swapchain;
pub mod sync;
