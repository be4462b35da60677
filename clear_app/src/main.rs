//! Windowed clear demo
//!
//! Brings up the full Vulkan stack, then clears and presents every
//! frame until the window closes. Escape also quits.

use startup_engine::core::config::EngineConfig;
use startup_engine::foundation::logging;
use startup_engine::render::{VulkanRenderer, Window};

fn main() {
    logging::init();

    let config = match EngineConfig::from_file_or_default("config.toml") {
        Ok(config) => config,
        Err(e) => {
            log::error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let mut window = match Window::new(
        &config.application_name,
        config.window.width,
        config.window.height,
    ) {
        Ok(window) => window,
        Err(e) => {
            log::error!("Failed to create window: {}", e);
            std::process::exit(1);
        }
    };

    let mut renderer = match VulkanRenderer::new(&mut window, &config) {
        Ok(renderer) => renderer,
        Err(e) => {
            log::error!("Failed to initialize Vulkan: {}", e);
            std::process::exit(1);
        }
    };

    log::info!("Entering main loop");

    while !window.should_close() {
        window.poll_events();

        let mut resized = None;
        let mut close_requested = false;
        for (_, event) in window.flush_events() {
            match event {
                glfw::WindowEvent::Close => close_requested = true,
                glfw::WindowEvent::Key(glfw::Key::Escape, _, glfw::Action::Press, _) => {
                    close_requested = true;
                }
                glfw::WindowEvent::FramebufferSize(width, height) => {
                    resized = Some((width as u32, height as u32));
                }
                _ => {}
            }
        }
        if close_requested {
            window.set_should_close(true);
            continue;
        }
        if let Some((width, height)) = resized {
            renderer.note_resize(width, height);
        }

        if let Err(e) = renderer.draw_frame() {
            log::error!("Frame failed: {}", e);
            std::process::exit(1);
        }
    }

    if let Err(e) = renderer.wait_idle() {
        log::warn!("Device wait on shutdown failed: {}", e);
    }
    log::info!("Shutting down");
}
