//! Вспомогательные модули

pub mod ffmpeg;
pub mod logger;
