//! Сохраняемый артефакт таймлайна
//!
//! Записывается рядом с клипами после синтеза и читается стадиями записи и
//! сборки, поэтому сборку можно запускать отдельно и позже записи.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::EngineTier;
use crate::error::{Result, SyncError};
use crate::timeline::{ClipId, Timeline};
use crate::tts::voices::VoiceAssignment;

/// Версия формата артефакта
pub const ARTIFACT_VERSION: u32 = 1;
/// Имя файла артефакта в директории результатов
pub const ARTIFACT_FILE: &str = "timeline.json";

/// Клип на диске
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipRecord {
    /// Путь относительно директории артефакта
    pub file: PathBuf,
    pub duration: f64,
    pub voice: String,
    pub engine: EngineTier,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineArtifact {
    pub version: u32,
    pub generated_at: DateTime<Utc>,
    pub title: String,
    pub part: u32,
    #[serde(flatten)]
    pub timeline: Timeline,
    pub voice_assignments: Vec<VoiceAssignment>,
    pub clips: BTreeMap<ClipId, ClipRecord>,
}

impl TimelineArtifact {
    pub fn new(
        title: impl Into<String>,
        part: u32,
        timeline: Timeline,
        voice_assignments: Vec<VoiceAssignment>,
        clips: BTreeMap<ClipId, ClipRecord>,
    ) -> Self {
        Self {
            version: ARTIFACT_VERSION,
            generated_at: Utc::now(),
            title: title.into(),
            part,
            timeline,
            voice_assignments,
            clips,
        }
    }

    /// Записать артефакт в JSON
    pub async fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, json).await?;
        log::info!(
            "Timeline artifact saved to {} ({} steps, {:.3}s)",
            path.display(),
            self.timeline.len(),
            self.timeline.total_duration
        );
        Ok(())
    }

    /// Прочитать и проверить артефакт
    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path).await?;
        let artifact: TimelineArtifact = serde_json::from_str(&raw)?;
        artifact.verify()?;
        Ok(artifact)
    }

    /// Проверить версию, непрерывность шагов и наличие всех клипов
    pub fn verify(&self) -> Result<()> {
        if self.version != ARTIFACT_VERSION {
            return Err(SyncError::Configuration(format!(
                "Unsupported timeline artifact version {} (expected {})",
                self.version, ARTIFACT_VERSION
            )));
        }
        self.timeline
            .check_contiguity()
            .map_err(|e| SyncError::Configuration(format!("Corrupted timeline artifact: {}", e)))?;
        for id in self.timeline.clip_ids() {
            if !self.clips.contains_key(&id) {
                return Err(SyncError::MissingAudio(id.to_string()));
            }
        }
        Ok(())
    }

    /// Абсолютный путь к клипу
    pub fn clip_path(&self, base_dir: &Path, id: &ClipId) -> Result<PathBuf> {
        self.clips
            .get(id)
            .map(|record| base_dir.join(&record.file))
            .ok_or_else(|| SyncError::MissingAudio(id.to_string()))
    }

    /// Сколько говорящих получили каждый голос
    pub fn voice_usage(&self) -> BTreeMap<String, usize> {
        let mut usage = BTreeMap::new();
        for assignment in &self.voice_assignments {
            *usage.entry(assignment.voice.clone()).or_insert(0) += 1;
        }
        usage
    }
}
