//! Модуль для работы с аудио
//!
//! Декодирование клипов в моно PCM, измерение длительности по реальным
//! семплам, ресемплинг и запись WAV.

use std::io::Cursor;
use std::path::Path;

use hound::{SampleFormat, WavSpec, WavWriter};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::{Result, SyncError};

const RESAMPLE_CHUNK: usize = 1024;
const SINC_LEN: usize = 256;

/// Декодированное моно аудио
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    pub fn duration(&self) -> f64 {
        duration_in_seconds(self.samples.len(), self.sample_rate)
    }
}

/// Длительность в секундах по количеству семплов
pub fn duration_in_seconds(sample_count: usize, sample_rate: u32) -> f64 {
    if sample_rate == 0 {
        return 0.0;
    }
    sample_count as f64 / sample_rate as f64
}

/// Количество семплов для длительности, с округлением до ближайшего
pub fn seconds_to_frames(seconds: f64, sample_rate: u32) -> usize {
    if seconds <= 0.0 {
        return 0;
    }
    (seconds * sample_rate as f64).round() as usize
}

fn audio_error(context: &str, e: impl std::fmt::Display) -> SyncError {
    SyncError::AudioProcessing(format!("{}: {}", context, e))
}

/// Декодировать аудио (MP3, AAC, WAV) в моно семплы
pub fn decode_audio(data: &[u8], extension: Option<&str>) -> Result<DecodedAudio> {
    if data.is_empty() {
        return Err(SyncError::AudioProcessing("empty audio data".to_string()));
    }

    let cursor = Cursor::new(data.to_vec());
    let mss = MediaSourceStream::new(Box::new(cursor), Default::default());
    let mut hint = Hint::new();
    if let Some(ext) = extension {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| audio_error("Unsupported audio format", e))?;
    let mut format = probed.format;

    let (track_id, codec_params) = {
        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| SyncError::AudioProcessing("No audio track found".to_string()))?;
        (track.id, track.codec_params.clone())
    };

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| audio_error("Cannot create decoder", e))?;

    let mut sample_rate = codec_params.sample_rate.unwrap_or(0);
    let mut samples = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(audio_error("Cannot read packet", e)),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                log::warn!("Skipping undecodable packet: {}", e);
                continue;
            }
            Err(e) => return Err(audio_error("Decoding failed", e)),
        };

        let spec = *decoded.spec();
        sample_rate = spec.rate;
        let channels = spec.channels.count().max(1);
        let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buffer.copy_interleaved_ref(decoded);

        for frame in buffer.samples().chunks(channels) {
            samples.push(frame.iter().sum::<f32>() / channels as f32);
        }
    }

    if sample_rate == 0 {
        return Err(SyncError::AudioProcessing("Unknown sample rate".to_string()));
    }
    log::debug!("Decoded {} samples at {} Hz", samples.len(), sample_rate);
    Ok(DecodedAudio {
        samples,
        sample_rate,
    })
}

/// Декодировать аудиофайл
pub async fn decode_file(path: &Path) -> Result<DecodedAudio> {
    let data = tokio::fs::read(path).await?;
    let extension = path.extension().and_then(|e| e.to_str()).map(str::to_string);
    decode_audio(&data, extension.as_deref())
        .map_err(|e| SyncError::AudioProcessing(format!("{}: {}", path.display(), e)))
}

/// Измерить длительность аудио по декодированным семплам
pub fn measure_duration(data: &[u8], extension: Option<&str>) -> Result<f64> {
    let decoded = decode_audio(data, extension)?;
    if decoded.samples.is_empty() {
        return Err(SyncError::AudioProcessing("audio contains no samples".to_string()));
    }
    Ok(decoded.duration())
}

/// Изменить частоту дискретизации моно сигнала.
///
/// Длина результата равна `round(len * to / from)`.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let ratio = to_rate as f64 / from_rate as f64;
    let expected_len = (samples.len() as f64 * ratio).round() as usize;
    // задержка синк-фильтра в выходных семплах
    let delay = ((SINC_LEN / 2) as f64 * ratio).round() as usize;

    let params = SincInterpolationParameters {
        sinc_len: SINC_LEN,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };
    let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, RESAMPLE_CHUNK, 1)
        .map_err(|e| audio_error("Cannot create resampler", e))?;

    let mut output = Vec::with_capacity(expected_len + delay + RESAMPLE_CHUNK);
    let mut position = 0;
    while output.len() < expected_len + delay {
        let needed = resampler.input_frames_next();
        let mut chunk = vec![0.0_f32; needed];
        if position < samples.len() {
            let available = (samples.len() - position).min(needed);
            chunk[..available].copy_from_slice(&samples[position..position + available]);
            position += available;
        }
        let frames = resampler
            .process(&[chunk], None)
            .map_err(|e| audio_error("Resampling failed", e))?;
        output.extend_from_slice(&frames[0]);
    }

    Ok(output[delay..delay + expected_len].to_vec())
}

/// Записать моно семплы в WAV (32 бит, float)
pub fn encode_wav(samples: &[f32], sample_rate: u32, output_path: &Path) -> Result<()> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };

    let mut writer =
        WavWriter::create(output_path, spec).map_err(|e| audio_error("Cannot create WAV", e))?;
    for &sample in samples {
        writer
            .write_sample(sample)
            .map_err(|e| audio_error("Cannot write WAV sample", e))?;
    }
    writer
        .finalize()
        .map_err(|e| audio_error("Cannot finalize WAV", e))?;

    log::info!(
        "Saved WAV {} ({} samples, {} Hz)",
        output_path.display(),
        samples.len(),
        sample_rate
    );
    Ok(())
}
