//! # Startup Engine
//!
//! Vulkan device bring-up and a clear/present frame loop.
//!
//! This crate owns the graphics bring-up sequence (instance, physical
//! device selection, logical device and queue, presentation surface,
//! swapchain, depth target) and the steady-state frame driver that
//! acquires, records, submits, and presents one frame per tick with
//! explicit fence/semaphore discipline.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use startup_engine::core::config::EngineConfig;
//! use startup_engine::render::window::Window;
//! use startup_engine::render::vulkan::VulkanRenderer;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     startup_engine::foundation::logging::init();
//!     let config = EngineConfig::default();
//!     let mut window = Window::new(
//!         &config.application_name,
//!         config.window.width,
//!         config.window.height,
//!     )?;
//!     let mut renderer = VulkanRenderer::new(&mut window, &config)?;
//!     while !window.should_close() {
//!         window.poll_events();
//!         renderer.draw_frame()?;
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

pub mod core;
pub mod foundation;
pub mod render;
