//! Screenshot verification
//!
//! Asks the vision model to read a comment screenshot and return strict
//! JSON, then turns the reply into a [`ScreenshotAnalysis`].

use std::sync::Arc;

use serde::Deserialize;

use super::vision::VisionClient;
use crate::error::{AppError, Result};

const CONFIDENCE_UNCHECKED: f64 = 0.95;
const CONFIDENCE_NAME_MATCH: f64 = 0.9;
const CONFIDENCE_LENIENT: f64 = 0.8;

const REPLY_FORMAT: &str = r#"Reply with JSON only, no Markdown, in exactly this shape:
{"username": "<commenter name>", "comment": "<comment text>", "comment_time": "<comment time>", "is_comment": true}
- Set "is_comment" to true only if the image is a comment screenshot showing a commenter name and comment text; otherwise false.
- Copy "comment_time" exactly as displayed, e.g. "昨天 21:58", "11月1日", "2天前", "2 days ago"."#;

/// Case-insensitive bidirectional containment: either name contains the other.
pub fn names_match(a: &str, b: &str) -> bool {
    let a = a.to_lowercase();
    let b = b.to_lowercase();
    a.contains(&b) || b.contains(&a)
}

/// What the model read off a screenshot
#[derive(Debug, Clone, PartialEq)]
pub struct ScreenshotAnalysis {
    pub is_comment_image: bool,
    pub extracted_name: Option<String>,
    pub comment: Option<String>,
    pub comment_time: Option<String>,
    pub confidence: f64,
    /// Reply was not valid JSON and the expected-name fallback was used
    pub degraded: bool,
}

impl ScreenshotAnalysis {
    fn not_a_comment() -> Self {
        Self {
            is_comment_image: false,
            extracted_name: None,
            comment: None,
            comment_time: None,
            confidence: 0.0,
            degraded: false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct VisionReply {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    comment: Option<String>,
    #[serde(default)]
    comment_time: Option<String>,
    #[serde(default = "default_true")]
    is_comment: bool,
}

fn default_true() -> bool {
    true
}

/// Extracts username, comment and time from comment screenshots
#[derive(Clone)]
pub struct ScreenshotVerifier {
    client: Option<Arc<dyn VisionClient>>,
}

impl ScreenshotVerifier {
    pub fn new(client: Option<Arc<dyn VisionClient>>) -> Self {
        Self { client }
    }

    pub fn is_available(&self) -> bool {
        self.client.is_some()
    }

    /// Analyze a screenshot.
    ///
    /// With `expected_name` the model is told whom to look for and a
    /// malformed reply can still pass if it mentions that name. Call
    /// failures are returned as errors with no extracted fields.
    pub async fn analyze(
        &self,
        image: &[u8],
        mime_type: &str,
        expected_name: Option<&str>,
    ) -> Result<ScreenshotAnalysis> {
        let client = self.client.as_ref().ok_or(AppError::VisionUnavailable)?;
        let expected_name = expected_name.map(str::trim).filter(|n| !n.is_empty());

        let prompt = build_prompt(expected_name);
        let reply = client.describe(image, mime_type, &prompt).await?;

        interpret_reply(&reply, expected_name)
    }
}

fn build_prompt(expected_name: Option<&str>) -> String {
    match expected_name {
        Some(name) => format!(
            "Analyze this comment screenshot and extract:\n\
             1. The commenter's name (usually next to the avatar, e.g. awilltian, bestomzhang)\n\
             2. The comment text\n\
             3. The comment time\n\n\
             {REPLY_FORMAT}\n\
             - Names only need to be similar to the expected name.\n\n\
             Expected name: {name}"
        ),
        None => format!(
            "Decide whether this image is a comment screenshot and extract its fields.\n\n\
             {REPLY_FORMAT}"
        ),
    }
}

fn interpret_reply(reply: &str, expected_name: Option<&str>) -> Result<ScreenshotAnalysis> {
    let parsed = serde_json::from_str::<VisionReply>(strip_fences(reply));

    let reply_fields = match parsed {
        Ok(fields) => fields,
        Err(error) => {
            tracing::warn!(%error, reply, "Vision reply was not valid JSON");

            return match expected_name {
                Some(name) if reply.contains(name) => Ok(ScreenshotAnalysis {
                    is_comment_image: true,
                    extracted_name: Some(name.to_string()),
                    comment: None,
                    comment_time: None,
                    confidence: CONFIDENCE_LENIENT,
                    degraded: true,
                }),
                Some(_) => Err(AppError::Vision(
                    "could not read a user name from the screenshot".to_string(),
                )),
                None => Err(AppError::Vision(
                    "could not read the screenshot, make sure it is clear and shows the user name and comment"
                        .to_string(),
                )),
            };
        }
    };

    if !reply_fields.is_comment {
        return Ok(ScreenshotAnalysis::not_a_comment());
    }

    let extracted_name = reply_fields.username.map(|n| n.trim().to_string());
    let confidence = match expected_name {
        None => CONFIDENCE_UNCHECKED,
        Some(name) if names_match(extracted_name.as_deref().unwrap_or_default(), name) => {
            CONFIDENCE_NAME_MATCH
        }
        Some(_) => CONFIDENCE_LENIENT,
    };

    Ok(ScreenshotAnalysis {
        is_comment_image: true,
        extracted_name,
        comment: reply_fields.comment.map(|c| c.trim().to_string()),
        comment_time: reply_fields
            .comment_time
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty()),
        confidence,
        degraded: false,
    })
}

/// Drop a surrounding ```json fence and any chatter around the object
fn strip_fences(reply: &str) -> &str {
    let trimmed = reply.trim();
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => trimmed,
    }
}
