//! Модуль для работы с медиафайлами
//!
//! Декодирование и сборка аудио, сверка и кодирование видео.

pub mod assembly;
pub mod audio;
pub mod video;

pub use assembly::{assemble_master_track, AssemblyReport};
pub use video::{FfmpegToolkit, MediaToolkit, MuxReport, VisualReconciliation};
