use std::collections::VecDeque;
use std::f32::consts::PI;
use std::io::Cursor;

use async_trait::async_trait;
use bytes::Bytes;
use hound::{SampleFormat, WavSpec, WavWriter};
use parking_lot::Mutex;

use crate::config::EngineTier;
use crate::tts::{ProviderError, ProviderErrorKind, SpeechProvider};

/// Синусоида 440 Гц с амплитудой 0.5
pub fn sine(seconds: f64, sample_rate: u32) -> Vec<f32> {
    let frames = (seconds * sample_rate as f64).round() as usize;
    (0..frames)
        .map(|i| 0.5 * (2.0 * PI * 440.0 * i as f32 / sample_rate as f32).sin())
        .collect()
}

/// Моно WAV 16 бит заданной длины
pub fn wav_bytes(seconds: f64, sample_rate: u32) -> Bytes {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, spec).unwrap();
        for sample in sine(seconds, sample_rate) {
            writer.write_sample((sample * i16::MAX as f32) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }
    Bytes::from(cursor.into_inner())
}

enum Script {
    Queue(VecDeque<Result<Bytes, ProviderErrorKind>>),
    Failing(ProviderErrorKind),
    Always(Bytes),
}

/// Провайдер с заранее заданными ответами, запоминающий вызовы
pub struct ScriptedProvider {
    script: Mutex<Script>,
    calls: Mutex<Vec<(String, EngineTier)>>,
}

impl ScriptedProvider {
    /// Ответы по очереди, после их исчерпания сервис недоступен
    pub fn new(responses: Vec<Result<Bytes, ProviderErrorKind>>) -> Self {
        Self::with_script(Script::Queue(responses.into()))
    }

    pub fn failing(kind: ProviderErrorKind) -> Self {
        Self::with_script(Script::Failing(kind))
    }

    pub fn always(audio: Bytes) -> Self {
        Self::with_script(Script::Always(audio))
    }

    fn with_script(script: Script) -> Self {
        Self {
            script: Mutex::new(script),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(String, EngineTier)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl SpeechProvider for ScriptedProvider {
    async fn synthesize(&self, _text: &str, voice: &str, engine: EngineTier) -> Result<Bytes, ProviderError> {
        self.calls.lock().push((voice.to_string(), engine));
        let outcome = match &mut *self.script.lock() {
            Script::Queue(queue) => queue.pop_front().unwrap_or(Err(ProviderErrorKind::Unavailable)),
            Script::Failing(kind) => Err(*kind),
            Script::Always(audio) => Ok(audio.clone()),
        };
        outcome.map_err(|kind| ProviderError::new(kind, "scripted failure"))
    }
}
