//! Active-user gauge written to a small file as `"<unix-ts> <count>"`.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::collaborators::ActiveUserGauge;
use crate::error::SourceResult;

#[derive(Debug, Clone)]
pub struct FileGauge {
    path: PathBuf,
}

impl FileGauge {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ActiveUserGauge for FileGauge {
    async fn report(&self, count: i64) -> SourceResult<()> {
        let line = format!("{} {}", chrono::Utc::now().timestamp(), count);
        tokio::fs::write(&self.path, line).await?;
        Ok(())
    }
}
