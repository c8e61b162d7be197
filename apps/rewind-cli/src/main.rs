mod ui;

use std::{
    env,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::Result;
use clap::Parser;
use futures::{FutureExt, StreamExt};
use rewind_bus::LocalBus;
use rewind_capture::{FfmpegCameraSource, FrameSource, MockFrameSource};
use rewind_catalog::JsonCatalog;
use rewind_encoder::{FfmpegEncoder, MockEncoder, VideoEncoder};
use rewind_ops::{init_tracing, prepare_storage, EventJournal};
use rewind_orchestrator::ReplayOrchestrator;
use rewind_playback::ClockSurface;
use rewind_types::{config::RewindConfig, events::EventPayload};
use tokio::{sync::mpsc, time};
use tracing::{debug, warn};

use crate::ui::{LiveFrame, UiCommand, UiMessage, UiSnapshot};

type App<S, E> = ReplayOrchestrator<S, E, JsonCatalog, ClockSurface, LocalBus>;

const BUS_CAPACITY: usize = 256;
const SEEK_STEP_SECS: f64 = 5.0;

#[derive(Debug, Parser)]
#[command(name = "rewind", about = "Rolling-buffer instant replay recorder")]
struct Args {
    /// Configuration file. Falls back to REWIND_CONFIG, then configs/dev.toml.
    config: Option<PathBuf>,
    /// Use the synthetic camera and the in-process encoder.
    #[arg(long)]
    mock: bool,
    /// Record for the given number of seconds, save once and exit without the terminal UI.
    #[arg(long, value_name = "SECONDS")]
    headless: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(args.config.clone());
    init_tracing(&config.ops)?;
    prepare_storage(&config.storage)?;

    if args.mock {
        let source = MockFrameSource::new(config.capture.frame_size());
        run(config, source, MockEncoder::new(), args.headless).await
    } else {
        let source = FfmpegCameraSource::new(config.capture.clone());
        let encoder = FfmpegEncoder::new(&config.encoder);
        run(config, source, encoder, args.headless).await
    }
}

async fn run<S, E>(config: RewindConfig, source: S, encoder: E, headless: Option<u64>) -> Result<()>
where
    S: FrameSource + 'static,
    E: VideoEncoder + 'static,
{
    let catalog = Arc::new(JsonCatalog::open(&config.storage.catalog_path).await?);
    let bus = Arc::new(LocalBus::new(BUS_CAPACITY)?);
    let journal = EventJournal::new(config.ops.journal_capacity);
    let mut app = ReplayOrchestrator::new(
        &config,
        source,
        Arc::new(encoder),
        catalog,
        ClockSurface::new(),
        bus,
        journal,
    )?;

    let outcome = match headless {
        Some(seconds) => run_headless(&mut app, seconds).await,
        None => run_interactive(&mut app, summary(&config)).await,
    };
    if let Some(path) = &config.ops.journal_path {
        export_journal(app.journal(), Path::new(path)).await;
    }
    outcome
}

async fn export_journal(journal: &EventJournal, path: &Path) {
    match journal.export(path).await {
        Ok(events) => debug!("Wrote {events} journal events to {}", path.display()),
        Err(err) => warn!("Journal export skipped: {err}"),
    }
}

async fn run_headless<S, E>(app: &mut App<S, E>, seconds: u64) -> Result<()>
where
    S: FrameSource + 'static,
    E: VideoEncoder + 'static,
{
    let mut events = app.subscribe();
    app.boot().await?;
    if !app.is_capturing() {
        anyhow::bail!("camera unavailable, nothing to record");
    }
    time::sleep(Duration::from_secs(seconds)).await;
    let saved = app.save().await;
    app.shutdown().await?;

    while let Some(Some(event)) = events.next().now_or_never() {
        app.apply_event(&event);
        match &event.payload {
            EventPayload::SaveCompleted { clip, timing } => println!(
                "saved {} to {} in {} ms",
                clip.display_info(),
                clip.video_path.display(),
                timing.encode_ms + timing.thumbnail_ms + timing.persist_ms
            ),
            EventPayload::SaveFailed(message) | EventPayload::Notice(message) => {
                eprintln!("{message}")
            }
            _ => {}
        }
    }
    saved?;
    println!("{} clips in library", app.clips().len());
    Ok(())
}

async fn run_interactive<S, E>(app: &mut App<S, E>, summary: String) -> Result<()>
where
    S: FrameSource + 'static,
    E: VideoEncoder + 'static,
{
    let (ui_tx, ui_rx) = std::sync::mpsc::channel();
    let (command_tx, mut command_rx) = mpsc::unbounded_channel();
    let mut events = app.subscribe();
    let mut preview = app.preview();
    let mut live_frame = None;
    let ui = tokio::task::spawn_blocking(move || ui::run(ui_rx, command_tx, summary));

    if let Err(err) = app.boot().await {
        warn!("Startup incomplete: {err}");
    }

    let mut ticker = time::interval(app.progress_interval());
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            command = command_rx.recv() => {
                match command {
                    Some(UiCommand::Quit) | None => break,
                    Some(command) => dispatch(app, command).await,
                }
            }
            Some(event) = events.next() => {
                app.apply_event(&event);
                let _ = ui_tx.send(UiMessage::Event(event));
            }
            Some(frame) = preview.next() => {
                live_frame = Some(LiveFrame::from(frame.as_ref()));
            }
            _ = ticker.tick() => {
                app.tick_playback().await;
                let _ = ui_tx.send(UiMessage::Snapshot(UiSnapshot {
                    capturing: app.is_capturing(),
                    buffer: app.buffer_stats(),
                    playback: app.playback_status(),
                    clips: app.clips().to_vec(),
                    pending_saves: app.pending_saves(),
                    live_frame: live_frame.filter(|_| app.is_capturing()),
                }));
            }
        }
    }

    app.shutdown().await?;
    let _ = ui_tx.send(UiMessage::Shutdown);
    drop(ui_tx);
    ui.await??;
    Ok(())
}

/// Run one user command. Failures are already surfaced as notices on the bus.
async fn dispatch<S, E>(app: &mut App<S, E>, command: UiCommand)
where
    S: FrameSource + 'static,
    E: VideoEncoder + 'static,
{
    let outcome = match command {
        UiCommand::Save => app.save().await.map(|_| ()),
        UiCommand::Select(id) => match app.select(id).await {
            Ok(clip) => {
                let duration = Duration::from_secs_f64(clip.duration_seconds.max(0.0));
                app.media_opened(duration).await;
                Ok(())
            }
            Err(err) => Err(err),
        },
        UiCommand::Toggle => {
            app.toggle().await;
            Ok(())
        }
        UiCommand::Seek(delta) => {
            app.seek_by(delta * SEEK_STEP_SECS).await;
            Ok(())
        }
        UiCommand::Live => {
            app.return_to_live().await;
            Ok(())
        }
        UiCommand::Rename(id, name) => app.rename(id, &name).await,
        UiCommand::Delete(id) => app.delete(id).await.map(|_| ()),
        UiCommand::Copy(id) => app.copy_to_downloads(id).await.map(|_| ()),
        UiCommand::Reload => app.reload_library().await.map(|_| ()),
        UiCommand::Quit => Ok(()),
    };
    if let Err(err) = outcome {
        debug!("Command failed: {err}");
    }
}

fn summary(config: &RewindConfig) -> String {
    format!(
        "{}x{} @ {} fps, {} s window",
        config.capture.frame_width,
        config.capture.frame_height,
        config.capture.frame_rate,
        config.capture.window_seconds
    )
}

fn load_config(from_args: Option<PathBuf>) -> RewindConfig {
    let from_env = env::var("REWIND_CONFIG").ok().map(PathBuf::from);
    let path = from_args
        .or(from_env)
        .unwrap_or_else(|| PathBuf::from("configs/dev.toml"));
    match RewindConfig::from_file(&path) {
        Ok(cfg) => {
            if let Err(err) = cfg.validate() {
                eprintln!(
                    "Invalid config in '{}': {err}. Falling back to internal defaults.",
                    path.display()
                );
                RewindConfig::default()
            } else {
                cfg
            }
        }
        Err(err) => {
            eprintln!(
                "Failed to load config from '{}': {err}. Falling back to internal defaults.",
                path.display()
            );
            RewindConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_falls_back_to_defaults() {
        let config = load_config(Some(PathBuf::from("/nonexistent/rewind.toml")));
        assert_eq!(config.capture.capacity(), 900);
        assert_eq!(config.encoder.codec, "avc1");
    }

    #[test]
    fn invalid_config_falls_back_to_defaults() {
        let path = std::env::temp_dir().join(format!("rewind-cli-{}.toml", std::process::id()));
        let mut config = RewindConfig::default();
        config.capture.frame_rate = 0;
        std::fs::write(&path, toml_doc(&config)).unwrap();
        let loaded = load_config(Some(path.clone()));
        assert_eq!(loaded.capture.frame_rate, 30);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn bundled_dev_config_is_valid() {
        let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../configs/dev.toml");
        let config = RewindConfig::from_file(path).unwrap();
        config.validate().unwrap();
        assert_eq!(config.storage.clip_dir, "replays");
    }

    #[test]
    fn args_accept_mock_and_headless() {
        let args = Args::parse_from(["rewind", "custom.toml", "--mock", "--headless", "5"]);
        assert_eq!(args.config, Some(PathBuf::from("custom.toml")));
        assert!(args.mock);
        assert_eq!(args.headless, Some(5));
    }

    #[tokio::test]
    async fn journal_export_writes_recorded_events() {
        let path = std::env::temp_dir().join(format!("rewind-cli-journal-{}.jsonl", std::process::id()));
        let journal = EventJournal::new(8);
        journal
            .record(rewind_types::events::SystemEvent::notice("Saved"))
            .await;
        export_journal(&journal, &path).await;
        let doc = std::fs::read_to_string(&path).unwrap();
        assert_eq!(doc.lines().count(), 1);
        std::fs::remove_file(&path).unwrap();

        // An unwritable destination is logged, not fatal.
        export_journal(&journal, Path::new("/nonexistent/dir/journal.jsonl")).await;
    }

    fn toml_doc(config: &RewindConfig) -> String {
        format!(
            "user_id = {}\n[capture]\ndevice_index = 0\nframe_rate = {}\nwindow_seconds = 30\n\
             frame_width = 640\nframe_height = 480\nread_timeout_ms = 2000\n\
             [encoder]\ncodec = \"avc1\"\nthumbnail_quality = 85\n\
             [storage]\nclip_dir = \"replays\"\ndownloads_dir = \"downloads\"\n\
             catalog_path = \"replays/catalog.json\"\n\
             [ops]\nlog_level = \"info\"\njournal_capacity = 16\n",
            config.user_id, config.capture.frame_rate
        )
    }
}
