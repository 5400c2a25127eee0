//! Fulltri engine crate.
//!
//! This crate owns the platform + GPU runtime pieces and the renderer used by
//! the output-precision harness.

pub mod device;
pub mod window;
pub mod input;
pub mod time;
pub mod core;

pub mod logging;
pub mod render;
