//! Command recording and render-pass plumbing

pub mod commands;
pub mod framebuffer;
pub mod render_pass;
