//! Граница с сервисом синтеза речи
//!
//! Сервис принимает текст, голос и движок и возвращает байты аудио. Ошибки
//! классифицируются, чтобы синтезатор мог решить, идти ли дальше по
//! лестнице запасных голосов.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use thiserror::Error;

use crate::config::{EngineTier, SpeechSettings};
use crate::error::{Result, SyncError};

/// Класс ошибки сервиса синтеза
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// Неверный ключ или нет доступа
    Auth,
    /// Сервис отклонил текст или голос
    Rejected,
    /// Превышен лимит запросов
    Throttled,
    /// Ошибка на стороне сервиса
    Unavailable,
    Timeout,
    /// Сетевая ошибка
    Transport,
    /// Пустой или нечитаемый ответ
    EmptyAudio,
}

impl ProviderErrorKind {
    /// Ошибки, которые не исправить сменой голоса или движка
    pub fn aborts_fallback(&self) -> bool {
        matches!(self, Self::Auth)
    }

    pub fn from_status(status: StatusCode) -> Self {
        match status.as_u16() {
            401 | 403 => Self::Auth,
            429 => Self::Throttled,
            400 | 404 | 413 | 422 => Self::Rejected,
            s if s >= 500 => Self::Unavailable,
            _ => Self::Rejected,
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("{kind:?}: {message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Сервис синтеза речи
#[async_trait]
pub trait SpeechProvider: Send + Sync {
    async fn synthesize(
        &self,
        text: &str,
        voice: &str,
        engine: EngineTier,
    ) -> std::result::Result<Bytes, ProviderError>;
}

#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    text: &'a str,
    voice_id: &'a str,
    engine: &'a str,
    output_format: &'a str,
    sample_rate: String,
}

/// Клиент HTTP шлюза синтеза речи
pub struct HttpSpeechProvider {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    output_format: String,
    sample_rate: u32,
}

impl HttpSpeechProvider {
    pub fn new(settings: &SpeechSettings) -> Result<Self> {
        if settings.endpoint.trim().is_empty() {
            return Err(SyncError::Configuration("Speech endpoint is not configured".to_string()));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()?;

        log::info!("TTS Configuration:");
        log::info!("  Endpoint: {}", settings.endpoint);
        log::info!("  Format: {} @ {} Hz", settings.output_format, settings.sample_rate);
        log::info!("  Max concurrent requests: {}", settings.max_concurrent_requests);

        Ok(Self {
            client,
            endpoint: settings.endpoint.clone(),
            api_key: settings.api_key.clone(),
            output_format: settings.output_format.clone(),
            sample_rate: settings.sample_rate,
        })
    }
}

#[async_trait]
impl SpeechProvider for HttpSpeechProvider {
    async fn synthesize(
        &self,
        text: &str,
        voice: &str,
        engine: EngineTier,
    ) -> std::result::Result<Bytes, ProviderError> {
        let body = SpeechRequest {
            text,
            voice_id: voice,
            engine: engine.as_str(),
            output_format: &self.output_format,
            sample_rate: self.sample_rate.to_string(),
        };

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        log::debug!("Sending TTS request: voice={}, engine={}, {} chars", voice, engine.as_str(), text.len());
        let response = request.send().await.map_err(|e| {
            let kind = if e.is_timeout() {
                ProviderErrorKind::Timeout
            } else {
                ProviderErrorKind::Transport
            };
            ProviderError::new(kind, e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = match response.text().await {
                Ok(text) => text,
                Err(e) => format!("Failed to read error response: {}", e),
            };
            return Err(ProviderError::new(
                ProviderErrorKind::from_status(status),
                format!("status {}: {}", status, error_text),
            ));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| ProviderError::new(ProviderErrorKind::Transport, e.to_string()))?;
        if audio.is_empty() {
            return Err(ProviderError::new(ProviderErrorKind::EmptyAudio, "empty response body"));
        }
        Ok(audio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(ProviderErrorKind::from_status(StatusCode::UNAUTHORIZED), ProviderErrorKind::Auth);
        assert_eq!(ProviderErrorKind::from_status(StatusCode::FORBIDDEN), ProviderErrorKind::Auth);
        assert_eq!(
            ProviderErrorKind::from_status(StatusCode::TOO_MANY_REQUESTS),
            ProviderErrorKind::Throttled
        );
        assert_eq!(
            ProviderErrorKind::from_status(StatusCode::UNPROCESSABLE_ENTITY),
            ProviderErrorKind::Rejected
        );
        assert_eq!(
            ProviderErrorKind::from_status(StatusCode::BAD_GATEWAY),
            ProviderErrorKind::Unavailable
        );
        assert!(ProviderErrorKind::Auth.aborts_fallback());
        assert!(!ProviderErrorKind::Throttled.aborts_fallback());
    }

    #[test]
    fn test_empty_endpoint_is_configuration_error() {
        let settings = SpeechSettings {
            endpoint: " ".to_string(),
            ..SpeechSettings::default()
        };
        assert!(matches!(HttpSpeechProvider::new(&settings), Err(SyncError::Configuration(_))));
    }
}
