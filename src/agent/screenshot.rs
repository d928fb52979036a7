use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

/// Where per-step screenshots go. The controller only keeps the returned path.
#[async_trait]
pub trait ScreenshotSink: Send + Sync {
    async fn save(&self, bytes: &[u8]) -> io::Result<PathBuf>;
}

/// Writes `<dir>/<session>/<timestamp>-<uuid>.png`.
#[derive(Debug, Clone)]
pub struct FileScreenshotSink {
    dir: PathBuf,
    session: String,
}

impl FileScreenshotSink {
    pub fn new(dir: impl Into<PathBuf>, session: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            session: session.into(),
        }
    }

    pub fn session_dir(&self) -> PathBuf {
        self.dir.join(&self.session)
    }
}

#[async_trait]
impl ScreenshotSink for FileScreenshotSink {
    async fn save(&self, bytes: &[u8]) -> io::Result<PathBuf> {
        let dir = self.session_dir();
        tokio::fs::create_dir_all(&dir).await?;
        let name = format!("{}-{}.png", Utc::now().format("%Y%m%dT%H%M%S%3f"), Uuid::new_v4());
        let path = dir.join(name);
        tokio::fs::write(&path, bytes).await?;
        Ok(path)
    }
}
