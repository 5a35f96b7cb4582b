//! Командная строка narration-sync

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use narration_sync::config::Settings;
use narration_sync::content::ContentSpec;
use narration_sync::media::{FfmpegToolkit, MediaToolkit};
use narration_sync::notification::ConsoleProgressObserver;
use narration_sync::playback::{PlaybackReport, ProcessRenderer, RecordedTrack};
use narration_sync::timeline::artifact::ARTIFACT_FILE;
use narration_sync::timeline::{RuntimeEstimate, TimelineArtifact};
use narration_sync::tts::HttpSpeechProvider;
use narration_sync::utils::logger::init_logger;
use narration_sync::NarrationSync;

const FINAL_VIDEO_FILE: &str = "final.mp4";

#[derive(Parser)]
#[command(name = "narration-sync")]
#[command(about = "Narrated listening exercises: TTS clips, calibrated visual playback, exact audio assembly", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Settings file (YAML)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// More logging, repeat for trace
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Estimate the runtime of a content file without synthesis
    Plan {
        content: PathBuf,
    },

    /// Synthesize clips and write the timeline artifact
    Audio {
        content: PathBuf,

        /// Output directory (default: <output_dir>/teil<N>[_ubung<M>])
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },

    /// Play the timeline on the renderer and record the visual track
    Record {
        content: PathBuf,

        /// Timeline artifact (default: <output dir>/timeline.json)
        #[arg(long)]
        timeline: Option<PathBuf>,

        #[arg(long)]
        output_dir: Option<PathBuf>,
    },

    /// Assemble the master audio track and mux it with the recorded video
    Mux {
        content: PathBuf,

        #[arg(long)]
        timeline: Option<PathBuf>,

        /// Recorded video (default: the track written by `record`)
        #[arg(long)]
        video: Option<PathBuf>,

        /// Final video file (default: <output dir>/final.mp4)
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Full pipeline: audio, record, mux
    Run {
        content: PathBuf,

        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logger(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn load_settings(path: Option<&Path>) -> Result<Settings> {
    match path {
        Some(path) => {
            Settings::load(path).with_context(|| format!("Failed to load settings from {}", path.display()))
        }
        None => {
            let mut settings = Settings::default();
            settings.apply_env();
            settings.validate()?;
            Ok(settings)
        }
    }
}

fn load_content(path: &Path) -> Result<ContentSpec> {
    ContentSpec::load(path).with_context(|| format!("Invalid content file {}", path.display()))
}

/// Токен отмены, срабатывающий по Ctrl+C
fn interrupt_token() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted, stopping playback");
            child.cancel();
        }
    });
    token
}

async fn run(cli: Cli) -> Result<()> {
    let settings = load_settings(cli.settings.as_deref())?;
    let mut sync = NarrationSync::new(settings);
    sync.add_observer(Box::new(ConsoleProgressObserver::new()));

    match cli.command {
        Commands::Plan { content } => {
            let content = load_content(&content)?;
            let estimate = sync.plan(&content).context("Planning failed")?;
            print_estimate(&content, &estimate);
        }
        Commands::Audio { content, output_dir } => {
            let content = load_content(&content)?;
            let out = output_dir.unwrap_or_else(|| sync.output_dir_for(&content));
            let artifact = generate(&sync, &content, &out).await?;
            print_voice_usage(&artifact);
        }
        Commands::Record {
            content,
            timeline,
            output_dir,
        } => {
            let content = load_content(&content)?;
            let out = output_dir.unwrap_or_else(|| sync.output_dir_for(&content));
            let timeline = timeline.unwrap_or_else(|| out.join(ARTIFACT_FILE));
            let artifact = load_artifact(&timeline).await?;
            let report = record(&sync, &artifact, &timeline, &out).await?;
            print_timing(&report);
        }
        Commands::Mux {
            content,
            timeline,
            video,
            output,
        } => {
            let content = load_content(&content)?;
            let out = sync.output_dir_for(&content);
            let artifact = load_artifact(&timeline.unwrap_or_else(|| out.join(ARTIFACT_FILE))).await?;
            let toolkit = FfmpegToolkit::new(sync.settings().media.clone());
            let recorded = match video {
                Some(path) => {
                    let duration = toolkit.probe_duration(&path).await?;
                    RecordedTrack { path, duration }
                }
                None => sync
                    .load_recording(&out)
                    .await
                    .context("No recorded video, run `record` first or pass --video")?,
            };
            let output = output.unwrap_or_else(|| out.join(FINAL_VIDEO_FILE));
            mux(&sync, &toolkit, &artifact, &recorded, &out, &output).await?;
        }
        Commands::Run { content, output } => {
            let content = load_content(&content)?;
            let out = sync.output_dir_for(&content);
            let artifact = generate(&sync, &content, &out).await?;
            print_voice_usage(&artifact);

            let report = record(&sync, &artifact, &out.join(ARTIFACT_FILE), &out).await?;
            print_timing(&report);

            let toolkit = FfmpegToolkit::new(sync.settings().media.clone());
            let output = output.unwrap_or_else(|| out.join(FINAL_VIDEO_FILE));
            mux(&sync, &toolkit, &artifact, &report.track, &out, &output).await?;
        }
    }
    Ok(())
}

async fn load_artifact(path: &Path) -> Result<TimelineArtifact> {
    TimelineArtifact::load(path)
        .await
        .with_context(|| format!("Cannot use timeline artifact {}", path.display()))
}

async fn generate(sync: &NarrationSync, content: &ContentSpec, out: &Path) -> Result<TimelineArtifact> {
    let provider = Arc::new(HttpSpeechProvider::new(&sync.settings().speech)?);
    let artifact = sync
        .generate_audio(content, provider, out)
        .await
        .context("Audio generation failed")?;
    println!(
        "Timeline: {} steps, {:.3}s -> {}",
        artifact.timeline.len(),
        artifact.timeline.total_duration,
        out.join(ARTIFACT_FILE).display()
    );
    Ok(artifact)
}

async fn record(
    sync: &NarrationSync,
    artifact: &TimelineArtifact,
    timeline_path: &Path,
    out: &Path,
) -> Result<PlaybackReport> {
    let renderer = ProcessRenderer::spawn(&sync.settings().renderer, timeline_path, out)?;
    let (report, renderer) = sync
        .record(artifact, renderer, interrupt_token())
        .await
        .context("Recording failed")?;
    renderer.shutdown().await?;
    sync.save_playback(&report, out).await?;
    Ok(report)
}

async fn mux(
    sync: &NarrationSync,
    toolkit: &dyn MediaToolkit,
    artifact: &TimelineArtifact,
    recorded: &RecordedTrack,
    out: &Path,
    output: &Path,
) -> Result<()> {
    let assembly = sync.assemble(artifact, out).await.context("Audio assembly failed")?;
    if let Some(warning) = &assembly.warning {
        println!("Warning: {}", warning);
    }
    let report = sync
        .mux(toolkit, artifact, recorded, &assembly, output)
        .await
        .context("Final encode failed")?;
    if let Some(warning) = &report.visual.warning {
        println!("Warning: {}", warning);
    }
    println!("Final video: {} ({:.3}s)", report.output.display(), report.duration);
    Ok(())
}

fn print_estimate(content: &ContentSpec, estimate: &RuntimeEstimate) {
    println!("{} (Teil {})", content.info.title, content.info.part);
    for step in &estimate.steps {
        println!("  {:<40} {:>8.1}s", step.label, step.seconds);
    }
    println!(
        "Estimated runtime: {:.1}s ({:.1} min), {} words",
        estimate.total_seconds,
        estimate.total_seconds / 60.0,
        estimate.words
    );
}

fn print_voice_usage(artifact: &TimelineArtifact) {
    println!("Voice assignments:");
    for assignment in &artifact.voice_assignments {
        println!(
            "  {:<24} {} ({}, {})",
            assignment.speaker,
            assignment.voice,
            assignment.engine.as_str(),
            assignment.gender.as_str()
        );
    }
    for (voice, count) in artifact.voice_usage() {
        println!("  {}: {} speaker(s)", voice, count);
    }
}

fn print_timing(report: &PlaybackReport) {
    println!(
        "Calibration: baseline lag {:.3}s, spread {:.3}s{}",
        report.calibration.baseline_lag,
        report.calibration.spread,
        if report.calibration.low_confidence { " (low confidence)" } else { "" }
    );
    println!("{:>4} {:<16} {:>9} {:>9} {:>8} {:>7}", "#", "kind", "expected", "actual", "error", "drift");
    for m in &report.steps {
        println!(
            "{:>4} {:<16} {:>9.3} {:>9.3} {:>+8.3} {:>7.3}",
            m.index, m.kind, m.start_time, m.actual, m.error, m.drift
        );
    }
    let stats = &report.stats;
    println!(
        "Mean error {:+.3}s, mean |error| {:.3}s, min {:+.3}s, max {:+.3}s, {} of {} steps within tolerance",
        stats.mean_error,
        stats.mean_abs_error,
        stats.min_error,
        stats.max_error,
        stats.within_tolerance,
        report.steps.len()
    );
    println!("Final drift {:.3}s, recorded {:.3}s -> {}", report.final_drift, report.track.duration, report.track.path.display());
}
