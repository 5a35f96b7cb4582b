//! Модуль для работы с FFmpeg
//!
//! Асинхронный запуск ffmpeg/ffprobe с таймаутом и классификацией ошибок.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;

/// Ошибка запуска внешнего инструмента
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{0} is not installed or not in PATH")]
    Missing(String),

    #[error("{program} timed out after {seconds}s")]
    TimedOut { program: String, seconds: u64 },

    #[error("{program} failed with status {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("Unexpected {program} output: {output}")]
    BadOutput { program: String, output: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Последние строки stderr, достаточные для диагностики
fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(8);
    lines[start..].join("\n")
}

/// Запустить программу и вернуть stdout
pub async fn run_tool(program: &str, args: &[String], timeout: Duration) -> Result<String, ToolError> {
    log::debug!("Running {} {}", program, args.join(" "));

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ToolError::Missing(program.to_string()),
            _ => ToolError::Io(e),
        })?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result?,
        Err(_) => {
            return Err(ToolError::TimedOut {
                program: program.to_string(),
                seconds: timeout.as_secs(),
            })
        }
    };

    if !output.status.success() {
        return Err(ToolError::Failed {
            program: program.to_string(),
            status: output.status.to_string(),
            stderr: stderr_tail(&output.stderr),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Запуск команды FFmpeg
pub async fn run_ffmpeg_command(ffmpeg: &str, args: &[String], timeout: Duration) -> Result<(), ToolError> {
    let mut full_args = vec!["-hide_banner".to_string(), "-nostdin".to_string(), "-y".to_string()];
    full_args.extend_from_slice(args);
    run_tool(ffmpeg, &full_args, timeout).await.map(|_| ())
}

/// Получение длительности медиафайла через ffprobe
pub async fn probe_duration(ffprobe: &str, path: &Path, timeout: Duration) -> Result<f64, ToolError> {
    let args = vec![
        "-v".to_string(),
        "error".to_string(),
        "-show_entries".to_string(),
        "format=duration".to_string(),
        "-of".to_string(),
        "default=noprint_wrappers=1:nokey=1".to_string(),
        path.to_string_lossy().to_string(),
    ];
    let output = run_tool(ffprobe, &args, timeout).await?;
    parse_duration(&output).ok_or_else(|| ToolError::BadOutput {
        program: ffprobe.to_string(),
        output: output.trim().to_string(),
    })
}

fn parse_duration(output: &str) -> Option<f64> {
    output
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .and_then(|l| l.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d >= 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("12.345000\n"), Some(12.345));
        assert_eq!(parse_duration("\nN/A\n"), None);
        assert_eq!(parse_duration(""), None);
    }

    #[test]
    fn test_stderr_tail_keeps_last_lines() {
        let text: String = (0..20).map(|i| format!("line {}\n", i)).collect();
        let tail = stderr_tail(text.as_bytes());
        assert!(tail.starts_with("line 12"));
        assert!(tail.ends_with("line 19"));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let err = run_tool("definitely-not-a-real-binary-xyz", &[], Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Missing(_)));
    }
}
