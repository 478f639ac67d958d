use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use duet_audio::{CaptureFormat, SimulatedPlayback, SimulatedRecorder};
use duet_domain::{
    LessonCodec, LessonDescriptor, LessonFormat, PitchTrace, SegmentModel, SerdeLessonCodec,
};
use duet_tutor::{
    ContourEvaluator, Phase, PracticeSessionController, SessionAnalytics, SessionConfig,
    SessionPorts,
};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Run a simulated guided practice session against a lesson file"
)]
struct Args {
    /// Lesson file (.json, .yaml or .yml)
    lesson: PathBuf,
    /// Session config in YAML
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Frequency of the simulated voice; 0 sings silence
    #[arg(long, default_value_t = 220.0)]
    tone_hz: f32,
    /// Playback speed multiplier
    #[arg(long, default_value_t = 1.0)]
    rate: f32,
    /// Pitch error still counted as on target, in cents
    #[arg(long, default_value_t = 100.0)]
    tolerance_cents: f32,
    /// Step through segments manually instead of auto-advancing
    #[arg(long)]
    manual: bool,
    #[arg(long)]
    pass_threshold: Option<f32>,
    #[arg(long)]
    max_attempts: Option<u32>,
    /// Fold the session into the lesson statistics and write the file back
    #[arg(long)]
    write_stats: bool,
}

fn load_lesson(path: &Path) -> Result<(LessonDescriptor, LessonFormat)> {
    let format = LessonFormat::from_path(path)
        .with_context(|| format!("unrecognised lesson extension: {}", path.display()))?;
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let lesson = SerdeLessonCodec.decode(&bytes, format)?;
    Ok((lesson, format))
}

fn load_config(args: &Args) -> Result<SessionConfig> {
    let mut config = match &args.config {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig::default(),
    };
    if args.manual {
        config.auto_advance = false;
    }
    if let Some(threshold) = args.pass_threshold {
        config.pass_threshold = threshold;
    }
    if let Some(max_attempts) = args.max_attempts {
        config.max_attempts = max_attempts;
    }
    config.validate()?;
    Ok(config)
}

fn lesson_length_ms(model: &SegmentModel) -> u64 {
    let end = model
        .segments()
        .iter()
        .map(|s| s.end_seconds.max(s.student_end_seconds.unwrap_or(0.0)))
        .fold(0.0, f64::max);
    (end * 1000.0).ceil() as u64
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let (mut lesson, format) = load_lesson(&args.lesson)?;
    let config = load_config(&args)?;
    let model = lesson.segment_model()?;
    info!(
        lesson = %lesson.id,
        title = %lesson.title,
        mode = ?lesson.mode,
        segments = model.len(),
        "loaded lesson"
    );

    let recorder = if args.tone_hz > 0.0 {
        SimulatedRecorder::new(CaptureFormat::default()).with_tone(args.tone_hz)
    } else {
        SimulatedRecorder::new(CaptureFormat::default())
    };
    let contour = lesson
        .reference_contour
        .clone()
        .unwrap_or_else(PitchTrace::empty);
    let ports = SessionPorts {
        playback: Box::new(SimulatedPlayback::new(lesson_length_ms(&model)).with_rate(args.rate)),
        recorder: Box::new(recorder),
        evaluator: Box::new(
            ContourEvaluator::new(contour).with_tolerance_cents(args.tolerance_cents),
        ),
    };

    let manual = !config.auto_advance;
    let controller = PracticeSessionController::spawn(lesson.clone(), config, ports)?;
    let mut snapshots = controller.subscribe();
    controller.prepare().await?;
    controller.begin_segment(0).await?;

    while let Some(state) = snapshots.next().await {
        debug!(
            phase = ?state.phase,
            segment = state.active_segment_index,
            progress = state.segment_progress,
            pitch = state.current_pitch,
            "snapshot"
        );
        match state.phase {
            Phase::SegmentComplete => {
                if let Some(result) = &state.last_result {
                    info!(segment = result.segment_index, score = result.score, "scored");
                }
                if manual {
                    if state.active_segment_index + 1 < controller.segment_count() {
                        controller.next_segment().await?;
                    } else {
                        controller.finish_session().await?;
                    }
                }
            }
            Phase::SessionComplete => break,
            Phase::Error(reason) => bail!("practice session failed: {reason}"),
            _ => {}
        }
    }

    let report = controller.report().await?;
    if controller.dropped_buffers() > 0 {
        warn!(dropped = controller.dropped_buffers(), "buffers were dropped during capture");
    }
    controller.close().await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if args.write_stats {
        if SessionAnalytics::new(report).update_statistics(&mut lesson.stats) {
            let bytes = SerdeLessonCodec.encode(&lesson, format)?;
            std::fs::write(&args.lesson, bytes)
                .with_context(|| format!("writing {}", args.lesson.display()))?;
            info!(path = %args.lesson.display(), "lesson statistics updated");
        } else {
            info!("nothing was scored, statistics unchanged");
        }
    }
    Ok(())
}
