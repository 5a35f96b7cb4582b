//! Рендерер во внешнем процессе
//!
//! Процесс (например, скрипт управления браузером) получает команды по
//! одной JSON-строке на stdin и отвечает одной JSON-строкой на stdout:
//!
//! ```text
//! -> {"cmd":"apply","step":{"index":3,"kind":"transition",...}}
//! <- {"ok":true}
//! ```

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use crate::config::RendererSettings;
use crate::error::{Result, SyncError};
use crate::playback::{RecordedTrack, RenderFailure, VisualRenderer};
use crate::timeline::TimelineStep;

#[derive(Debug, Serialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
enum Request<'a> {
    Probe { seconds: f64 },
    StartRecording,
    Apply { step: &'a TimelineStep },
    Complete,
    StopRecording,
    Discard,
}

impl Request<'_> {
    fn name(&self) -> &'static str {
        match self {
            Self::Probe { .. } => "probe",
            Self::StartRecording => "start_recording",
            Self::Apply { .. } => "apply",
            Self::Complete => "complete",
            Self::StopRecording => "stop_recording",
            Self::Discard => "discard",
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct Reply {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    elapsed: Option<f64>,
    #[serde(default)]
    path: Option<PathBuf>,
    #[serde(default)]
    duration: Option<f64>,
}

/// Рендерер, управляемый через stdin/stdout дочернего процесса
pub struct ProcessRenderer {
    child: Child,
    stdin: ChildStdin,
    replies: Lines<BufReader<ChildStdout>>,
    reply_timeout: Duration,
}

impl ProcessRenderer {
    /// Запустить процесс рендерера для таймлайна `timeline`.
    ///
    /// К команде из настроек добавляются `--timeline <file> --output-dir <dir>`.
    pub fn spawn(settings: &RendererSettings, timeline: &Path, output_dir: &Path) -> Result<Self> {
        let (program, args) = settings
            .command
            .split_first()
            .ok_or_else(|| SyncError::Configuration("renderer command is empty".to_string()))?;

        log::info!("Starting renderer: {} {}", program, args.join(" "));
        let mut child = Command::new(program)
            .args(args)
            .arg("--timeline")
            .arg(timeline)
            .arg("--output-dir")
            .arg(output_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SyncError::Configuration(format!("cannot start renderer {}: {}", program, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SyncError::Configuration("renderer stdin is not piped".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SyncError::Configuration("renderer stdout is not piped".to_string()))?;

        Ok(Self {
            child,
            stdin,
            replies: BufReader::new(stdout).lines(),
            reply_timeout: Duration::from_secs(settings.reply_timeout_secs),
        })
    }

    async fn request(&mut self, request: Request<'_>, timeout: Duration) -> std::result::Result<Reply, RenderFailure> {
        let name = request.name();
        let mut line = serde_json::to_string(&request)
            .map_err(|e| RenderFailure::new(format!("cannot encode {} command: {}", name, e)))?;
        line.push('\n');

        self.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| RenderFailure::new(format!("cannot send {} to renderer: {}", name, e)))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| RenderFailure::new(format!("cannot send {} to renderer: {}", name, e)))?;

        let raw = tokio::time::timeout(timeout, self.replies.next_line())
            .await
            .map_err(|_| {
                RenderFailure::new(format!(
                    "renderer did not answer {} within {:.1}s",
                    name,
                    timeout.as_secs_f64()
                ))
            })?
            .map_err(|e| RenderFailure::new(format!("renderer pipe error: {}", e)))?
            .ok_or_else(|| RenderFailure::new(format!("renderer exited before answering {}", name)))?;

        let reply: Reply = serde_json::from_str(raw.trim())
            .map_err(|e| RenderFailure::new(format!("malformed renderer reply {:?}: {}", raw, e)))?;
        if !reply.ok {
            return Err(RenderFailure::new(
                reply
                    .error
                    .unwrap_or_else(|| format!("renderer rejected {}", name)),
            ));
        }
        Ok(reply)
    }

    /// Закрыть stdin и дождаться завершения процесса
    pub async fn shutdown(self) -> Result<()> {
        let Self {
            mut child,
            stdin,
            reply_timeout,
            ..
        } = self;
        drop(stdin);

        match tokio::time::timeout(reply_timeout, child.wait()).await {
            Ok(status) => {
                let status = status?;
                if !status.success() {
                    log::warn!("Renderer exited with {}", status);
                }
            }
            Err(_) => {
                log::warn!("Renderer did not exit, killing it");
                child.kill().await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl VisualRenderer for ProcessRenderer {
    async fn probe_wait(&mut self, interval: Duration) -> std::result::Result<Duration, RenderFailure> {
        let timeout = interval + self.reply_timeout;
        let reply = self
            .request(Request::Probe { seconds: interval.as_secs_f64() }, timeout)
            .await?;
        let elapsed = reply
            .elapsed
            .filter(|e| e.is_finite() && *e >= 0.0)
            .ok_or_else(|| RenderFailure::new("probe reply has no elapsed time"))?;
        Duration::try_from_secs_f64(elapsed)
            .map_err(|e| RenderFailure::new(format!("probe elapsed time {} out of range: {}", elapsed, e)))
    }

    async fn start_recording(&mut self) -> std::result::Result<(), RenderFailure> {
        self.request(Request::StartRecording, self.reply_timeout).await.map(|_| ())
    }

    async fn apply(&mut self, step: &TimelineStep) -> std::result::Result<(), RenderFailure> {
        self.request(Request::Apply { step }, self.reply_timeout).await.map(|_| ())
    }

    async fn complete(&mut self) -> std::result::Result<(), RenderFailure> {
        self.request(Request::Complete, self.reply_timeout).await.map(|_| ())
    }

    async fn stop_recording(&mut self) -> std::result::Result<RecordedTrack, RenderFailure> {
        let reply = self.request(Request::StopRecording, self.reply_timeout).await?;
        let path = reply
            .path
            .ok_or_else(|| RenderFailure::new("stop_recording reply has no path"))?;
        let duration = reply
            .duration
            .ok_or_else(|| RenderFailure::new("stop_recording reply has no duration"))?;
        Ok(RecordedTrack { path, duration })
    }

    async fn discard(&mut self) -> std::result::Result<(), RenderFailure> {
        let result = self.request(Request::Discard, self.reply_timeout).await.map(|_| ());
        if let Err(e) = self.child.start_kill() {
            log::debug!("Renderer already gone: {}", e);
        }
        result
    }
}
