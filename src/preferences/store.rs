use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Persisted user preferences and session flags
///
/// Absent keys read as their defaults, so a store written by an older build
/// (or an empty file) always loads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Preferences {
    /// A recording was active when this was last written
    pub is_recording: bool,
    pub include_microphone: bool,
    pub microphone_permission_granted: bool,
    /// Epoch milliseconds of the last permission request
    pub last_permission_check: Option<i64>,
}

/// Partial write; `None` fields keep their stored value
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreferenceUpdate {
    pub is_recording: Option<bool>,
    pub include_microphone: Option<bool>,
    pub microphone_permission_granted: Option<bool>,
    pub last_permission_check: Option<i64>,
}

impl PreferenceUpdate {
    pub fn recording(is_recording: bool) -> Self {
        Self {
            is_recording: Some(is_recording),
            ..Default::default()
        }
    }

    pub fn microphone(include_microphone: bool) -> Self {
        Self {
            include_microphone: Some(include_microphone),
            ..Default::default()
        }
    }

    pub fn permission(granted: bool, checked_at: i64) -> Self {
        Self {
            microphone_permission_granted: Some(granted),
            last_permission_check: Some(checked_at),
            ..Default::default()
        }
    }

    fn apply(&self, prefs: &mut Preferences) {
        if let Some(v) = self.is_recording {
            prefs.is_recording = v;
        }
        if let Some(v) = self.include_microphone {
            prefs.include_microphone = v;
        }
        if let Some(v) = self.microphone_permission_granted {
            prefs.microphone_permission_granted = v;
        }
        if let Some(v) = self.last_permission_check {
            prefs.last_permission_check = Some(v);
        }
    }
}

/// Key-value preference storage with last-write-wins merges
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    async fn load(&self) -> Result<Preferences>;

    /// Apply `update` and return the resulting preferences
    async fn merge(&self, update: PreferenceUpdate) -> Result<Preferences>;
}

/// Process-local store, used by tests and the one-shot CLI
#[derive(Debug, Default)]
pub struct MemoryPreferenceStore {
    inner: Mutex<Preferences>,
}

impl MemoryPreferenceStore {
    pub fn new(initial: Preferences) -> Self {
        Self {
            inner: Mutex::new(initial),
        }
    }
}

#[async_trait]
impl PreferenceStore for MemoryPreferenceStore {
    async fn load(&self) -> Result<Preferences> {
        Ok(self.inner.lock().await.clone())
    }

    async fn merge(&self, update: PreferenceUpdate) -> Result<Preferences> {
        let mut prefs = self.inner.lock().await;
        update.apply(&mut prefs);
        Ok(prefs.clone())
    }
}

/// Preferences stored as a JSON document on disk
pub struct JsonPreferenceStore {
    path: PathBuf,
    // Serializes read-modify-write cycles within the process
    lock: Mutex<()>,
}

impl JsonPreferenceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> Result<Preferences> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(Preferences::default()),
            Ok(bytes) => serde_json::from_slice(&bytes)
                .with_context(|| format!("Invalid preferences file {}", self.path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No preferences at {}, using defaults", self.path.display());
                Ok(Preferences::default())
            }
            Err(e) => Err(e)
                .with_context(|| format!("Failed to read preferences {}", self.path.display())),
        }
    }

    async fn write(&self, prefs: &Preferences) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .context("Failed to create preferences directory")?;
            }
        }

        let json = serde_json::to_vec_pretty(prefs)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;

        Ok(())
    }
}

#[async_trait]
impl PreferenceStore for JsonPreferenceStore {
    async fn load(&self) -> Result<Preferences> {
        let _guard = self.lock.lock().await;
        self.read().await
    }

    async fn merge(&self, update: PreferenceUpdate) -> Result<Preferences> {
        let _guard = self.lock.lock().await;
        let mut prefs = self.read().await?;
        update.apply(&mut prefs);
        self.write(&prefs).await?;

        info!("Preferences saved: {:?}", update);
        Ok(prefs)
    }
}
