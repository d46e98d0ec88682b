use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Creation time of the newest record already notified. Only records created
/// strictly after it are eligible.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Watermark(Option<DateTime<Utc>>);

impl Watermark {
    pub fn empty() -> Self {
        Self(None)
    }

    pub fn at(timestamp: DateTime<Utc>) -> Self {
        Self(Some(timestamp))
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    pub fn admits(&self, created_time: &DateTime<Utc>) -> bool {
        match &self.0 {
            Some(mark) => created_time > mark,
            None => true,
        }
    }

    /// Moves forward to `created_time`; never moves back.
    pub fn advance(&mut self, created_time: DateTime<Utc>) {
        if self.admits(&created_time) {
            self.0 = Some(created_time);
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(Self::empty());
        }
        let parsed = DateTime::parse_from_rfc3339(trimmed)
            .map_err(|e| anyhow!("Invalid watermark {:?}: {}", trimmed, e))?;
        Ok(Self::at(parsed.with_timezone(&Utc)))
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(ts) => write!(f, "{}", ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            None => Ok(()),
        }
    }
}

/// Persistence for the watermark. Only the poll loop holds one. `load` runs
/// once at startup; `save` runs inside the poll loop.
#[async_trait]
pub trait WatermarkStore: Send {
    fn load(&self) -> Result<Watermark>;
    async fn save(&mut self, watermark: &Watermark) -> Result<()>;
}

/// Keeps the watermark as a single RFC 3339 line in a text file.
#[derive(Debug, Clone)]
pub struct FileWatermarkStore {
    path: PathBuf,
}

impl FileWatermarkStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl WatermarkStore for FileWatermarkStore {
    fn load(&self) -> Result<Watermark> {
        if !self.path.exists() {
            return Ok(Watermark::empty());
        }
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read watermark file {}", self.path.display()))?;
        Watermark::parse(&raw)
            .with_context(|| format!("Corrupt watermark file {}", self.path.display()))
    }

    async fn save(&mut self, watermark: &Watermark) -> Result<()> {
        let temp = self.temp_path();
        tokio::fs::write(&temp, watermark.to_string())
            .await
            .with_context(|| format!("Failed to write {}", temp.display()))?;
        tokio::fs::rename(&temp, &self.path)
            .await
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

/// Process-lifetime store; every save is kept so callers can inspect history.
#[derive(Debug, Clone, Default)]
pub struct MemoryWatermarkStore {
    current: Watermark,
    history: Vec<Watermark>,
}

impl MemoryWatermarkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(watermark: Watermark) -> Self {
        Self {
            current: watermark,
            history: Vec::new(),
        }
    }

    pub fn history(&self) -> &[Watermark] {
        &self.history
    }
}

#[async_trait]
impl WatermarkStore for MemoryWatermarkStore {
    fn load(&self) -> Result<Watermark> {
        Ok(self.current)
    }

    async fn save(&mut self, watermark: &Watermark) -> Result<()> {
        self.current = *watermark;
        self.history.push(*watermark);
        Ok(())
    }
}
