//! Framegate demo: stream a camera into a deliberately slow analyzer and
//! report how many frames the backpressure pipeline drops.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use color_eyre::Result;
use framegate::camera::backend_from_config;
use framegate::capture::{ProcessedFrame, RgbConverter};
use framegate::pipeline::{FrameSink, SinkStatus};
use framegate::{CameraSession, Config, CONFIG};
use image::RgbImage;
use tokio::sync::Notify;
use tracing::{debug, info};

/// Stand-in analysis loop: sleeps for the configured analysis time and
/// measures mean brightness.
struct AnalysisLoop {
    work: Duration,
    budget: u64,
    analysed: AtomicU64,
    done: Arc<Notify>,
}

impl FrameSink<RgbImage> for AnalysisLoop {
    fn process_frame(&self, frame: ProcessedFrame<RgbImage>) -> SinkStatus {
        let count = self.analysed.load(Ordering::Relaxed);
        if self.budget > 0 && count >= self.budget {
            return SinkStatus::Busy;
        }

        std::thread::sleep(self.work);
        let pixels = frame.image.as_raw();
        let brightness = pixels.iter().map(|&p| p as u64).sum::<u64>() / pixels.len().max(1) as u64;
        debug!(
            sequence = frame.sequence,
            rotation = %frame.rotation,
            width = frame.image.width(),
            height = frame.image.height(),
            brightness,
            latency_ms = frame.captured_at.elapsed().as_millis() as u64,
            "frame analysed"
        );

        if self.analysed.fetch_add(1, Ordering::Relaxed) + 1 == self.budget {
            info!(frames = self.budget, "analysis budget reached");
            self.done.notify_one();
        }
        SinkStatus::Accepted
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "framegate=debug".into()),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("Framegate launching...");

    let path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = Config::load(path.as_deref())?;
    CONFIG.store(Arc::new(config.clone()));

    let backend = backend_from_config(&config.capture)?;
    let converter = RgbConverter::new(
        Some(config.capture.analysis_resolution),
        config.capture.rotate_frames,
    );
    let done = Arc::new(Notify::new());
    let sink = Arc::new(AnalysisLoop {
        work: Duration::from_millis(config.pipeline.analysis_time_ms),
        budget: config.pipeline.frame_budget,
        analysed: AtomicU64::new(0),
        done: Arc::clone(&done),
    });

    let mut session = CameraSession::start(backend, converter, sink, &config)?;
    session
        .control()
        .with_flash_support(Box::new(|supported| info!(supported, "flash support known")));
    info!(
        format = ?session.capture_format(),
        resolution = %session.resolution(),
        preview = %session.preview_size(),
        aspect = ?session.aspect_ratio(),
        fit = %session.preview_fit(config.display.size()),
        "session started"
    );

    let mut ticker = tokio::time::interval(Duration::from_secs(
        CONFIG.load().pipeline.stats_interval_secs.max(1),
    ));
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            _ = done.notified() => break,
            _ = ticker.tick() => {
                let stats = session.stats();
                info!(
                    admitted = stats.admitted,
                    dropped = stats.dropped,
                    overwritten = stats.overwritten,
                    delivered = stats.delivered,
                    failures = stats.conversion_failures,
                    "pipeline stats"
                );
            }
        }
    }

    // Joining the session threads blocks
    let stats = tokio::task::block_in_place(|| {
        session.close();
        session.stats()
    });
    info!(?stats, "Framegate shutting down");
    Ok(())
}
