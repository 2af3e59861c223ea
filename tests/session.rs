use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use framegate::camera::{CameraBackend, SyntheticCamera, SyntheticConfig};
use framegate::capture::{
    FrameConverter, PixelFormat, ProcessedFrame, RawFrame, RgbConverter, SelectionStrategy,
};
use framegate::error::{ConvertError, SessionError};
use framegate::geometry::{AspectRatio, Rotation, Size};
use framegate::pipeline::{DeliveryMode, FrameSink, SinkStatus};
use framegate::{CameraSession, Config};
use image::RgbImage;

/// Skips decoding; the analysis only needs the sequence number.
struct SequenceConverter;

impl FrameConverter for SequenceConverter {
    type Output = u64;

    fn convert(&self, frame: &RawFrame, _rotation: Rotation) -> Result<u64, ConvertError> {
        Ok(frame.sequence())
    }
}

fn small_camera() -> Box<dyn CameraBackend> {
    Box::new(SyntheticCamera::new(SyntheticConfig {
        fps: 0,
        catalog: vec![
            (PixelFormat::Rgb24, Size::new(64, 48)),
            (PixelFormat::Rgb24, Size::new(96, 54)),
        ],
        ..SyntheticConfig::default()
    }))
}

fn small_config(mode: DeliveryMode) -> Config {
    let mut config = Config::default();
    config.capture.minimum_resolution = Size::new(64, 48);
    config.pipeline.mode = mode;
    config
}

fn wait_for(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
    let until = Instant::now() + deadline;
    while Instant::now() < until {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    done()
}

type Seen<T> = Arc<Mutex<Vec<T>>>;

fn sequence_sink(delay: Duration) -> (Seen<u64>, Arc<dyn FrameSink<u64>>) {
    let seen: Seen<u64> = Arc::default();
    let record = Arc::clone(&seen);
    let sink = move |frame: ProcessedFrame<u64>| {
        thread::sleep(delay);
        record.lock().unwrap().push(frame.image);
        SinkStatus::Accepted
    };
    (seen, Arc::new(sink))
}

#[test]
fn decoupled_session_delivers_upright_frames() {
    let seen: Seen<(u64, Size, Rotation)> = Arc::default();
    let record = Arc::clone(&seen);
    let sink: Arc<dyn FrameSink<RgbImage>> = Arc::new(move |frame: ProcessedFrame<RgbImage>| {
        let size = Size::new(frame.image.width(), frame.image.height());
        record.lock().unwrap().push((frame.sequence, size, frame.rotation));
        SinkStatus::Accepted
    });

    let mut session = CameraSession::start(
        small_camera(),
        RgbConverter::new(None, true),
        sink,
        &small_config(DeliveryMode::Decoupled),
    )
    .unwrap();

    // 96x54 is the 16:9 match for a portrait 1080x1920 display
    assert_eq!(session.capture_format(), PixelFormat::Rgb24);
    assert_eq!(session.resolution(), Size::new(96, 54));
    assert_eq!(session.preview_size(), Size::new(54, 96));
    assert_eq!(session.frame_rotation(), Rotation::from_degrees(90));
    assert_eq!(session.preview_rotation(), Rotation::from_degrees(90));
    assert_eq!(session.preview_fit(Size::new(1080, 1920)), Size::new(1080, 1920));
    assert_eq!(session.aspect_ratio(), AspectRatio::Ratio16x9);

    assert!(wait_for(Duration::from_secs(5), || seen.lock().unwrap().len() >= 3));
    assert!(session.close());

    let seen = seen.lock().unwrap();
    for (_, size, rotation) in seen.iter() {
        assert_eq!(*size, Size::new(54, 96));
        assert_eq!(*rotation, Rotation::from_degrees(90));
    }
    assert!(seen.windows(2).all(|pair| pair[0].0 < pair[1].0));
}

#[test]
fn inline_session_analyses_on_producer() {
    let (seen, sink) = sequence_sink(Duration::ZERO);
    let mut session = CameraSession::start(
        small_camera(),
        SequenceConverter,
        sink,
        &small_config(DeliveryMode::Inline),
    )
    .unwrap();

    assert!(wait_for(Duration::from_secs(5), || seen.lock().unwrap().len() >= 5));
    session.close();

    let stats = session.stats();
    assert_eq!(stats.overwritten, 0);
    // A single producer never contends with itself inline
    assert_eq!(stats.dropped, 0);
    assert_eq!(stats.admitted, stats.delivered);
    assert_eq!(stats.delivered as usize, seen.lock().unwrap().len());
}

#[test]
fn slow_analysis_only_sees_latest_frames() {
    let (seen, sink) = sequence_sink(Duration::from_millis(20));
    let mut session = CameraSession::start(
        small_camera(),
        SequenceConverter,
        sink,
        &small_config(DeliveryMode::Decoupled),
    )
    .unwrap();

    assert!(wait_for(Duration::from_secs(5), || seen.lock().unwrap().len() >= 5));
    session.close();

    let stats = session.stats();
    assert!(stats.overwritten > 0, "{stats:?}");
    assert!(stats.delivered < stats.admitted, "{stats:?}");

    let seen = seen.lock().unwrap();
    assert!(seen.windows(2).all(|pair| pair[0] < pair[1]));
    // Skipped sequence numbers are the frames that were superseded
    assert!(seen.windows(2).any(|pair| pair[1] - pair[0] > 1));
}

#[test]
fn format_strategy_picks_smallest_preferred_pair() {
    let (_seen, sink) = sequence_sink(Duration::ZERO);
    let mut config = Config::default();
    config.capture.strategy = SelectionStrategy::Format;

    let backend = Box::new(SyntheticCamera::new(SyntheticConfig {
        fps: 0,
        ..SyntheticConfig::default()
    }));
    let mut session = CameraSession::start(backend, SequenceConverter, sink, &config).unwrap();

    // NV21 and MJPEG both offer 1280x720; NV21 is preferred
    assert_eq!(session.capture_format(), PixelFormat::Nv21);
    assert_eq!(session.resolution(), Size::new(1280, 720));
    assert!(session.close());
}

#[test]
fn no_compatible_resolution_fails_start() {
    let (_seen, sink) = sequence_sink(Duration::ZERO);
    let backend = Box::new(SyntheticCamera::new(SyntheticConfig {
        fps: 0,
        catalog: vec![(PixelFormat::Rgb24, Size::new(32, 24))],
        ..SyntheticConfig::default()
    }));

    let result = CameraSession::start(backend, SequenceConverter, sink, &Config::default());
    assert!(matches!(result, Err(SessionError::NoCompatibleResolution)));
}

#[test]
fn unavailable_camera_fails_start() {
    let (_seen, sink) = sequence_sink(Duration::ZERO);
    let backend = Box::new(SyntheticCamera::new(SyntheticConfig {
        available: false,
        ..SyntheticConfig::default()
    }));

    let result = CameraSession::start(backend, SequenceConverter, sink, &Config::default());
    assert!(matches!(result, Err(SessionError::CameraUnavailable)));
}

#[test]
fn close_is_idempotent() {
    let (seen, sink) = sequence_sink(Duration::ZERO);
    let mut session = CameraSession::start(
        small_camera(),
        SequenceConverter,
        sink,
        &small_config(DeliveryMode::Decoupled),
    )
    .unwrap();

    assert!(session.is_running());
    assert!(session.close());
    assert!(!session.close());
    assert!(!session.is_running());

    // Nothing arrives once close has returned
    let delivered = seen.lock().unwrap().len();
    thread::sleep(Duration::from_millis(50));
    assert_eq!(seen.lock().unwrap().len(), delivered);
}

#[test]
fn flash_support_reported_through_control() {
    let (_seen, sink) = sequence_sink(Duration::ZERO);
    let session = CameraSession::start(
        small_camera(),
        SequenceConverter,
        sink,
        &small_config(DeliveryMode::Inline),
    )
    .unwrap();

    let control = session.control();
    let supported = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&supported);
    control.with_flash_support(Box::new(move |flash| flag.store(flash, Ordering::SeqCst)));
    assert!(supported.load(Ordering::SeqCst));

    control.set_torch_state(true);
    assert!(control.is_torch_on());
    assert!(session.details().flash_available);
    // Dropping the session closes it
}
