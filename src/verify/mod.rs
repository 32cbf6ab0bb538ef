//! Screenshot and comment verification
//!
//! - Vision model client
//! - Screenshot field extraction
//! - Comment timestamp parsing and recency

pub mod comment_time;
mod screenshot;
mod vision;

pub use comment_time::{CommentTimeValidator, Recency};
pub use screenshot::{ScreenshotAnalysis, ScreenshotVerifier, names_match};
pub use vision::{OpenAiVisionClient, VisionClient};
