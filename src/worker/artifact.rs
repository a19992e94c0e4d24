use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use std::path::{Path, PathBuf};
use tracing::info;

/// Container used when the encoder reports no MIME type
pub const DEFAULT_MIME_TYPE: &str = "audio/webm";
const DEFAULT_EXTENSION: &str = "webm";

/// A finished recording: every encoder chunk concatenated in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl Artifact {
    pub fn assemble(chunks: Vec<Vec<u8>>, mime_type: &str) -> Self {
        let mime_type = if mime_type.trim().is_empty() {
            DEFAULT_MIME_TYPE.to_string()
        } else {
            mime_type.to_string()
        };

        Self {
            mime_type,
            bytes: chunks.concat(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn extension(&self) -> &str {
        extension_for(&self.mime_type)
    }

    /// `recording-<timestamp>.<ext>` with `:` and `.` in the timestamp replaced by `-`
    pub fn file_name(&self, at: DateTime<Utc>) -> String {
        let stamp = at
            .to_rfc3339_opts(SecondsFormat::Millis, true)
            .replace([':', '.'], "-");
        format!("recording-{}.{}", stamp, self.extension())
    }
}

/// File extension for a MIME type: the subtype with parameters stripped
///
/// `audio/webm;codecs=opus` → `webm`, `audio/wav` → `wav`.
pub fn extension_for(mime_type: &str) -> &str {
    mime_type
        .split(';')
        .next()
        .and_then(|essence| essence.split_once('/'))
        .map(|(_, subtype)| subtype.trim())
        .filter(|subtype| !subtype.is_empty())
        .unwrap_or(DEFAULT_EXTENSION)
}

/// Download capability provider
#[async_trait]
pub trait DownloadSink: Send + Sync {
    /// Save the artifact under `file_name`, returning where it landed
    async fn save(&self, file_name: &str, artifact: &Artifact) -> Result<PathBuf>;
}

/// Saves recordings into a local directory
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl DownloadSink for DirectorySink {
    async fn save(&self, file_name: &str, artifact: &Artifact) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create output directory {}", self.dir.display()))?;

        let path = self.dir.join(file_name);
        tokio::fs::write(&path, &artifact.bytes)
            .await
            .with_context(|| format!("Failed to write recording {}", path.display()))?;

        info!(
            "Saved recording: {} ({} bytes, {})",
            path.display(),
            artifact.len(),
            artifact.mime_type
        );

        Ok(path)
    }
}
