//! Модуль для кэширования результатов TTS
//!
//! Ключ кэша строится из текста, голоса и движка, поэтому повторный запуск
//! не обращается к сервису за уже синтезированными клипами.

use std::path::PathBuf;

use bytes::Bytes;

use crate::config::{EngineTier, SpeechSettings};
use crate::error::Result;

/// Кэш синтезированного аудио на диске
#[derive(Debug, Clone)]
pub struct SynthesisCache {
    cache_dir: PathBuf,
    extension: String,
}

impl SynthesisCache {
    /// Создать кэш в указанной директории или во временной по умолчанию
    pub fn new(settings: &SpeechSettings) -> Result<Self> {
        let cache_dir = settings
            .cache_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("narration-sync-cache"));
        Self::in_dir(cache_dir, &settings.output_format)
    }

    pub fn in_dir(cache_dir: impl Into<PathBuf>, extension: &str) -> Result<Self> {
        let cache_dir = cache_dir.into();
        if !cache_dir.exists() {
            std::fs::create_dir_all(&cache_dir)?;
        }
        Ok(Self {
            cache_dir,
            extension: extension.to_string(),
        })
    }

    /// Сгенерировать ключ кэша
    pub fn cache_key(text: &str, voice: &str, engine: EngineTier) -> String {
        let key_data = format!("{}|{}|{}", engine.as_str(), voice, text);
        format!("{:x}", md5::compute(key_data.as_bytes()))
    }

    fn entry_path(&self, text: &str, voice: &str, engine: EngineTier) -> PathBuf {
        self.cache_dir
            .join(format!("{}.{}", Self::cache_key(text, voice, engine), self.extension))
    }

    /// Получить кэшированное аудио
    pub async fn get(&self, text: &str, voice: &str, engine: EngineTier) -> Option<Bytes> {
        let path = self.entry_path(text, voice, engine);
        match tokio::fs::read(&path).await {
            Ok(data) if !data.is_empty() => {
                log::debug!("Cache hit: {}", path.display());
                Some(Bytes::from(data))
            }
            _ => None,
        }
    }

    /// Добавить аудио в кэш
    pub async fn put(&self, text: &str, voice: &str, engine: EngineTier, audio: &[u8]) -> Result<()> {
        let path = self.entry_path(text, voice, engine);
        tokio::fs::write(&path, audio).await?;
        Ok(())
    }

    /// Удалить запись из кэша
    pub async fn remove(&self, text: &str, voice: &str, engine: EngineTier) -> Result<()> {
        let path = self.entry_path(text, voice, engine);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
