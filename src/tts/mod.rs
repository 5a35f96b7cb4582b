//! Модуль для работы с TTS
//!
//! Граница с сервисом синтеза речи, выбор голосов для говорящих,
//! лестница запасных голосов и кэш синтезированных клипов.

pub mod cache;
pub mod provider;
pub mod synthesizer;
pub mod voices;

pub use provider::{HttpSpeechProvider, ProviderError, ProviderErrorKind, SpeechProvider};
pub use synthesizer::{SynthesizedClip, Synthesizer};
pub use voices::{VoiceAssigner, VoiceAssignment, VoiceAssignments};
