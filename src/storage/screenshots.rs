//! Screenshot file storage
//!
//! Uploaded comment screenshots are kept on local disk; the generated file
//! name is what application records reference.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rand::Rng;

use crate::clock::Clock;
use crate::error::{AppError, Result};
use crate::metrics::SCREENSHOTS_STORED_TOTAL;

/// File extension for an accepted image content type
pub fn extension_for(content_type: &str) -> Option<&'static str> {
    match content_type {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        _ => None,
    }
}

/// Screenshot storage service
pub struct ScreenshotStore {
    dir: PathBuf,
    max_bytes: usize,
    clock: Arc<dyn Clock>,
}

impl ScreenshotStore {
    /// Open the screenshot directory, creating it if needed
    pub async fn open(dir: &Path, max_bytes: usize, clock: Arc<dyn Clock>) -> Result<Self> {
        tokio::fs::create_dir_all(dir).await?;
        Ok(Self {
            dir: dir.to_path_buf(),
            max_bytes,
            clock,
        })
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Check content type and size before anything is written
    pub fn validate(&self, data: &[u8], content_type: &str) -> Result<&'static str> {
        let ext = extension_for(content_type).ok_or_else(|| {
            AppError::Validation("only JPG, PNG, GIF and WEBP images are supported".to_string())
        })?;
        if data.is_empty() {
            return Err(AppError::Validation("screenshot is empty".to_string()));
        }
        if data.len() > self.max_bytes {
            return Err(AppError::Validation(format!(
                "screenshot exceeds {} MB",
                self.max_bytes / (1024 * 1024)
            )));
        }
        Ok(ext)
    }

    /// Store a screenshot and return its file name
    ///
    /// Names look like `screenshot_<millis>-<random>.<ext>`.
    pub async fn save(&self, data: &[u8], content_type: &str) -> Result<String> {
        let ext = self.validate(data, content_type)?;
        let suffix: u32 = rand::thread_rng().gen_range(0..1_000_000_000);
        let name = format!(
            "screenshot_{}-{}.{}",
            self.clock.now().timestamp_millis(),
            suffix,
            ext
        );

        tokio::fs::write(self.dir.join(&name), data).await?;
        SCREENSHOTS_STORED_TOTAL.inc();
        tracing::debug!(file = %name, bytes = data.len(), "Screenshot stored");
        Ok(name)
    }

    /// Delete a stored screenshot; missing files are not an error
    pub async fn remove(&self, name: &str) -> Result<()> {
        let path = self.path(name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Full path of a stored screenshot
    pub fn path(&self, name: &str) -> Result<PathBuf> {
        let plain = Path::new(name)
            .file_name()
            .is_some_and(|file| file == name);
        if !plain {
            return Err(AppError::Validation("invalid screenshot name".to_string()));
        }
        Ok(self.dir.join(name))
    }
}
