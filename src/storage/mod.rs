//! Local file storage
//!
//! Handles:
//! - Comment screenshot upload and cleanup

mod screenshots;

pub use screenshots::{ScreenshotStore, extension_for};
