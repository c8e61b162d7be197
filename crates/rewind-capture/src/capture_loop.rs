use std::sync::{Arc, Mutex};

use chrono::Utc;
use futures::Stream;
use rewind_types::{config::CaptureConfig, frame::Frame, telemetry::CaptureMetrics, Result};
use tokio::{
    sync::{oneshot, watch},
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::{capture_error, FrameSource, RollingBuffer};

/// Receiving side of the live preview channel.
pub type PreviewReceiver = watch::Receiver<Option<Arc<Frame>>>;

struct RunningLoop<S> {
    stop_tx: oneshot::Sender<()>,
    handle: JoinHandle<S>,
}

/// Periodic scheduler pulling frames from a source into the rolling buffer.
///
/// The loop runs as a single task, so ticks never overlap. The task is the only
/// writer of the buffer.
pub struct CaptureLoop<S: FrameSource + 'static> {
    config: CaptureConfig,
    buffer: Arc<RollingBuffer>,
    preview: Arc<watch::Sender<Option<Arc<Frame>>>>,
    metrics: Arc<Mutex<CaptureMetrics>>,
    source: Option<S>,
    running: Option<RunningLoop<S>>,
}

impl<S: FrameSource + 'static> CaptureLoop<S> {
    pub fn new(config: CaptureConfig, source: S, buffer: Arc<RollingBuffer>) -> Self {
        let (preview, _) = watch::channel(None);
        Self {
            config,
            buffer,
            preview: Arc::new(preview),
            metrics: Arc::new(Mutex::new(CaptureMetrics::default())),
            source: Some(source),
            running: None,
        }
    }

    pub fn buffer(&self) -> Arc<RollingBuffer> {
        self.buffer.clone()
    }

    pub fn subscribe_preview(&self) -> PreviewReceiver {
        self.preview.subscribe()
    }

    /// Newest preview frames as they are published. Frames published faster
    /// than the consumer polls are skipped, and clearing the preview on stop
    /// yields nothing.
    pub fn preview_frames(&self) -> impl Stream<Item = Arc<Frame>> + Send + 'static {
        let mut rx = self.subscribe_preview();
        async_stream::stream! {
            while rx.changed().await.is_ok() {
                let frame = rx.borrow_and_update().clone();
                if let Some(frame) = frame {
                    yield frame;
                }
            }
        }
    }

    pub fn metrics(&self) -> CaptureMetrics {
        self.metrics.lock().map(|m| m.clone()).unwrap_or_default()
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Open the source and begin ticking. Calling it while running is a no-op.
    pub async fn start(&mut self) -> Result<()> {
        if self.running.is_some() {
            return Ok(());
        }
        let mut source = self
            .source
            .take()
            .ok_or_else(|| capture_error("frame source was lost by a previous run"))?;

        if let Err(err) = source.open().await {
            warn!("Camera unavailable, capture not started: {err}");
            source.release().await;
            self.source = Some(source);
            return Err(err);
        }

        let (stop_tx, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(run_loop(
            self.config.clone(),
            source,
            self.buffer.clone(),
            self.preview.clone(),
            self.metrics.clone(),
            stop_rx,
        ));
        self.running = Some(RunningLoop { stop_tx, handle });
        info!(
            "Capture loop started at {} fps, window of {} frames",
            self.config.frame_rate,
            self.buffer.capacity()
        );
        Ok(())
    }

    /// Stop ticking, release the source and drain the buffer before returning.
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(running) = self.running.take() {
            let _ = running.stop_tx.send(());
            match running.handle.await {
                Ok(source) => self.source = Some(source),
                Err(err) => warn!("Capture task ended abnormally: {err}"),
            }
        }
        let drained = self.buffer.clear();
        self.preview.send_replace(None);
        debug!("Capture loop stopped, released {drained} buffered frames");
        Ok(())
    }
}

async fn run_loop<S: FrameSource>(
    config: CaptureConfig,
    mut source: S,
    buffer: Arc<RollingBuffer>,
    preview: Arc<watch::Sender<Option<Arc<Frame>>>>,
    metrics: Arc<Mutex<CaptureMetrics>>,
    mut stop_rx: oneshot::Receiver<()>,
) -> S {
    let mut ticker = time::interval(config.frame_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let read_timeout = config.read_timeout();

    loop {
        tokio::select! {
            _ = &mut stop_rx => break,
            _ = ticker.tick() => {
                let frame = match time::timeout(read_timeout, source.read()).await {
                    Ok(Ok(Some(frame))) if !frame.is_empty() => Some(frame),
                    Ok(Ok(_)) => None,
                    Ok(Err(err)) => {
                        debug!("Frame read failed: {err}");
                        None
                    }
                    Err(_) => {
                        debug!("Frame read timed out after {:?}", read_timeout);
                        None
                    }
                };
                record_tick(&metrics, frame.as_ref());
                if let Some(frame) = frame {
                    let frame = Arc::new(frame);
                    buffer.push(frame.clone());
                    preview.send_replace(Some(frame));
                }
            }
        }
    }

    source.release().await;
    source
}

fn record_tick(metrics: &Mutex<CaptureMetrics>, frame: Option<&Frame>) {
    if let Ok(mut guard) = metrics.lock() {
        guard.ticks += 1;
        match frame {
            Some(_) => {
                guard.frames_captured += 1;
                guard.last_frame_at = Some(Utc::now());
            }
            None => guard.empty_reads += 1,
        }
    }
}
