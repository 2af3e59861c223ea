//! Per-session frame path from raw camera buffer to the analysis sink.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam::utils::CachePadded;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use super::gate::SingleFlightGate;
use super::latest::{LatestFrameChannel, SendOutcome};
use crate::capture::{FrameConverter, ProcessedFrame, RawFrame};
use crate::geometry::Orientation;

/// How converted frames reach the sink.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// The producer calls the sink itself while holding the gate
    #[default]
    Inline,
    /// The producer hands frames to a dedicated consumer thread through a
    /// latest-wins channel
    Decoupled,
}

/// Diagnostic answer from the analysis loop. Never influences admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkStatus {
    Accepted,
    Busy,
}

/// The analysis loop's single entry point. Calls are strictly serialized
/// by the pipeline and may take arbitrarily long.
pub trait FrameSink<T>: Send + Sync {
    fn process_frame(&self, frame: ProcessedFrame<T>) -> SinkStatus;
}

impl<T, F> FrameSink<T> for F
where
    F: Fn(ProcessedFrame<T>) -> SinkStatus + Send + Sync,
{
    fn process_frame(&self, frame: ProcessedFrame<T>) -> SinkStatus {
        self(frame)
    }
}

/// Result of offering a raw frame to the pipeline.
#[must_use = "a rejected frame must be recycled by the caller"]
#[derive(Debug)]
pub enum Admission {
    /// The pipeline consumed the frame
    Accepted,
    /// Another frame is in flight (or the pipeline is closed); the buffer is
    /// handed back for recycling
    Rejected(RawFrame),
}

impl Admission {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Admission::Accepted)
    }
}

/// Snapshot of pipeline counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub admitted: u64,
    pub dropped: u64,
    pub conversion_failures: u64,
    pub delivered: u64,
    pub busy: u64,
    pub overwritten: u64,
}

#[derive(Default)]
struct DeliveryStats {
    conversion_failures: AtomicU64,
    delivered: AtomicU64,
    busy: AtomicU64,
}

enum Route<T> {
    Inline,
    Decoupled(LatestFrameChannel<ProcessedFrame<T>>),
}

/// Admission, conversion and delivery for one camera session.
pub struct FrameDeliveryPipeline<C: FrameConverter> {
    orientation: Orientation,
    converter: C,
    sink: Arc<dyn FrameSink<C::Output>>,
    gate: SingleFlightGate,
    route: Route<C::Output>,
    closed: AtomicBool,
    stats: CachePadded<DeliveryStats>,
}

impl<C: FrameConverter> FrameDeliveryPipeline<C> {
    /// `orientation` is captured once at session start and used for every
    /// frame of the session.
    pub fn new(
        orientation: Orientation,
        converter: C,
        sink: Arc<dyn FrameSink<C::Output>>,
        mode: DeliveryMode,
    ) -> Self {
        let route = match mode {
            DeliveryMode::Inline => Route::Inline,
            DeliveryMode::Decoupled => Route::Decoupled(LatestFrameChannel::new()),
        };
        Self {
            orientation,
            converter,
            sink,
            gate: SingleFlightGate::new(),
            route,
            closed: AtomicBool::new(false),
            stats: CachePadded::new(DeliveryStats::default()),
        }
    }

    pub fn mode(&self) -> DeliveryMode {
        match self.route {
            Route::Inline => DeliveryMode::Inline,
            Route::Decoupled(_) => DeliveryMode::Decoupled,
        }
    }

    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    /// Offer a raw frame. Never blocks on other frames: if one is already in
    /// flight the frame comes straight back as [`Admission::Rejected`].
    ///
    /// In inline mode an accepted frame is analysed before this returns.
    pub fn admit(&self, raw: RawFrame) -> Admission {
        if self.closed.load(Ordering::Acquire) {
            return Admission::Rejected(raw);
        }

        let rotation = self.orientation.effective_rotation();

        let Some(_in_flight) = self.gate.enter() else {
            metrics::counter!("framegate_frames_dropped").increment(1);
            trace!(sequence = raw.sequence(), "frame dropped, analysis in flight");
            return Admission::Rejected(raw);
        };
        // close() may have reopened the gate after our first check
        if self.closed.load(Ordering::Acquire) {
            return Admission::Rejected(raw);
        }
        metrics::counter!("framegate_frames_admitted").increment(1);

        let image = match self.converter.convert(&raw, rotation) {
            Ok(image) => image,
            Err(e) => {
                self.stats.conversion_failures.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("framegate_conversion_failures").increment(1);
                debug!(sequence = raw.sequence(), error = %e, "frame conversion failed");
                return Admission::Accepted;
            }
        };

        let processed = ProcessedFrame {
            image,
            rotation,
            sequence: raw.sequence(),
            captured_at: raw.timestamp,
        };
        // Release the camera buffer before the possibly slow delivery
        drop(raw);

        match &self.route {
            Route::Inline => self.deliver(processed),
            Route::Decoupled(channel) => {
                if channel.send(processed) == SendOutcome::Closed {
                    trace!("frame discarded, channel closed");
                }
            }
        }

        Admission::Accepted
    }

    fn deliver(&self, frame: ProcessedFrame<C::Output>) {
        let sequence = frame.sequence;
        let started = Instant::now();
        let status = self.sink.process_frame(frame);
        metrics::histogram!("framegate_analysis_time_us")
            .record(started.elapsed().as_micros() as f64);

        self.stats.delivered.fetch_add(1, Ordering::Relaxed);
        if status == SinkStatus::Busy {
            self.stats.busy.fetch_add(1, Ordering::Relaxed);
        }
        trace!(sequence, ?status, "frame delivered");
    }

    /// Consumer side of decoupled mode: deliver frames until the channel
    /// closes. Returns immediately in inline mode.
    pub fn run_consumer(&self) {
        let Route::Decoupled(channel) = &self.route else {
            return;
        };
        while let Ok(frame) = channel.receive() {
            self.deliver(frame);
        }
        debug!("frame consumer finished");
    }

    /// Start [`run_consumer`](Self::run_consumer) on a dedicated thread.
    /// Inline pipelines have no consumer and yield `None`.
    pub fn spawn_consumer(self: &Arc<Self>) -> std::io::Result<Option<JoinHandle<()>>>
    where
        C: 'static,
    {
        if self.mode() == DeliveryMode::Inline {
            return Ok(None);
        }
        let pipeline = Arc::clone(self);
        thread::Builder::new()
            .name("framegate-consumer".into())
            .spawn(move || pipeline.run_consumer())
            .map(Some)
    }

    /// Stop admitting frames, close the channel and reset the gate.
    /// Returns `false` if the pipeline was already closed.
    ///
    /// An inline analysis already running finishes on its producer thread;
    /// no new one starts once this returns.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        if let Route::Decoupled(channel) = &self.route {
            channel.close();
        }
        self.gate.reset();
        info!(stats = ?self.stats(), "frame pipeline closed");
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> PipelineStats {
        let (admitted, dropped) = self.gate.stats();
        let overwritten = match &self.route {
            Route::Inline => 0,
            Route::Decoupled(channel) => channel.stats().1,
        };
        PipelineStats {
            admitted,
            dropped,
            conversion_failures: self.stats.conversion_failures.load(Ordering::Relaxed),
            delivered: self.stats.delivered.load(Ordering::Relaxed),
            busy: self.stats.busy.load(Ordering::Relaxed),
            overwritten,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{FrameMetadata, PixelFormat};
    use crate::error::ConvertError;
    use crate::geometry::Rotation;
    use bytes::Bytes;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Passes the sequence number through; empty buffers fail to convert.
    struct SequenceConverter;

    impl FrameConverter for SequenceConverter {
        type Output = u64;

        fn convert(&self, frame: &RawFrame, _rotation: Rotation) -> Result<u64, ConvertError> {
            if frame.data.is_empty() {
                return Err(ConvertError::Dimensions);
            }
            Ok(frame.sequence())
        }
    }

    fn raw(sequence: u64) -> RawFrame {
        RawFrame::new(
            Bytes::from_static(&[1, 2, 3]),
            FrameMetadata {
                sequence,
                width: 1,
                height: 1,
                stride: 1,
                format: PixelFormat::Rgb24,
                device_timestamp: None,
            },
        )
    }

    type Seen = Arc<Mutex<Vec<(u64, Rotation)>>>;

    fn recording_sink() -> (Seen, Arc<dyn FrameSink<u64>>) {
        let seen: Seen = Arc::default();
        let sink = {
            let seen = Arc::clone(&seen);
            move |frame: ProcessedFrame<u64>| {
                seen.lock().unwrap().push((frame.image, frame.rotation));
                SinkStatus::Accepted
            }
        };
        (seen, Arc::new(sink))
    }

    #[test]
    fn inline_delivers_with_session_rotation() {
        let (seen, sink) = recording_sink();
        let pipeline = FrameDeliveryPipeline::new(
            Orientation::new(0, 90),
            SequenceConverter,
            sink,
            DeliveryMode::Inline,
        );

        for sequence in 1..=3 {
            assert!(pipeline.admit(raw(sequence)).is_accepted());
        }

        let rotation = Rotation::from_degrees(90);
        assert_eq!(*seen.lock().unwrap(), vec![(1, rotation), (2, rotation), (3, rotation)]);
        assert_eq!(pipeline.stats().delivered, 3);
    }

    #[test]
    fn inline_rejects_while_analysis_in_flight() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let release_rx = Mutex::new(release_rx);
        let sink = move |_frame: ProcessedFrame<u64>| {
            entered_tx.send(()).unwrap();
            release_rx.lock().unwrap().recv().unwrap();
            SinkStatus::Accepted
        };
        let pipeline = Arc::new(FrameDeliveryPipeline::new(
            Orientation::default(),
            SequenceConverter,
            Arc::new(sink),
            DeliveryMode::Inline,
        ));

        let producer = {
            let pipeline = Arc::clone(&pipeline);
            thread::spawn(move || pipeline.admit(raw(1)).is_accepted())
        };
        entered_rx.recv_timeout(Duration::from_secs(1)).unwrap();

        match pipeline.admit(raw(2)) {
            Admission::Rejected(frame) => assert_eq!(frame.sequence(), 2),
            Admission::Accepted => panic!("second frame must be rejected"),
        }

        release_tx.send(()).unwrap();
        assert!(producer.join().unwrap());

        // Pre-release the next analysis so the inline call returns
        release_tx.send(()).unwrap();
        assert!(pipeline.admit(raw(3)).is_accepted());

        let stats = pipeline.stats();
        assert_eq!((stats.admitted, stats.dropped, stats.delivered), (2, 1, 2));
    }

    #[test]
    fn decoupled_consumer_only_sees_latest() {
        let (seen, sink) = recording_sink();
        let pipeline = Arc::new(FrameDeliveryPipeline::new(
            Orientation::new(90, 90),
            SequenceConverter,
            sink,
            DeliveryMode::Decoupled,
        ));

        assert!(pipeline.admit(raw(1)).is_accepted());
        assert!(pipeline.admit(raw(2)).is_accepted());

        let consumer = pipeline.spawn_consumer().unwrap().expect("decoupled mode has a consumer");
        let deadline = Instant::now() + Duration::from_secs(1);
        while seen.lock().unwrap().is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }

        assert!(pipeline.close());
        consumer.join().unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![(2, Rotation::ZERO)]);
        assert_eq!(pipeline.stats().overwritten, 1);
    }

    #[test]
    fn conversion_failure_consumes_frame() {
        let (seen, sink) = recording_sink();
        let pipeline = FrameDeliveryPipeline::new(
            Orientation::default(),
            SequenceConverter,
            sink,
            DeliveryMode::Inline,
        );

        let mut empty = raw(1);
        empty.data = Bytes::new();
        assert!(pipeline.admit(empty).is_accepted());

        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(pipeline.stats().conversion_failures, 1);
        assert!(pipeline.admit(raw(2)).is_accepted());
    }

    #[test]
    fn close_is_idempotent_and_rejects_later_frames() {
        let (_seen, sink) = recording_sink();
        let pipeline = FrameDeliveryPipeline::new(
            Orientation::default(),
            SequenceConverter,
            sink,
            DeliveryMode::Decoupled,
        );

        assert!(pipeline.close());
        assert!(!pipeline.close());
        assert!(pipeline.is_closed());
        assert!(matches!(pipeline.admit(raw(1)), Admission::Rejected(_)));
    }

    #[test]
    fn inline_pipeline_has_no_consumer() {
        let (_seen, sink) = recording_sink();
        let pipeline = Arc::new(FrameDeliveryPipeline::new(
            Orientation::default(),
            SequenceConverter,
            sink,
            DeliveryMode::Inline,
        ));
        assert!(pipeline.spawn_consumer().unwrap().is_none());
    }

    #[test]
    fn close_during_contended_inline_run_keeps_single_flight() {
        for _ in 0..50 {
            let running = Arc::new(AtomicUsize::new(0));
            let peak = Arc::new(AtomicUsize::new(0));
            let sink = {
                let (running, peak) = (Arc::clone(&running), Arc::clone(&peak));
                move |_frame: ProcessedFrame<u64>| {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    for _ in 0..50 {
                        std::hint::spin_loop();
                    }
                    thread::yield_now();
                    running.fetch_sub(1, Ordering::SeqCst);
                    SinkStatus::Accepted
                }
            };
            let pipeline = Arc::new(FrameDeliveryPipeline::new(
                Orientation::default(),
                SequenceConverter,
                Arc::new(sink),
                DeliveryMode::Inline,
            ));

            let producers: Vec<_> = (0..8)
                .map(|_| {
                    let pipeline = Arc::clone(&pipeline);
                    thread::spawn(move || {
                        for sequence in 0..2000 {
                            let _ = pipeline.admit(raw(sequence));
                        }
                    })
                })
                .collect();

            thread::sleep(Duration::from_micros(300));
            assert!(pipeline.close());
            for producer in producers {
                producer.join().unwrap();
            }

            let peak = peak.load(Ordering::SeqCst);
            assert!(peak <= 1, "{peak} analyses ran at once");
            assert!(matches!(pipeline.admit(raw(0)), Admission::Rejected(_)));
        }
    }
}
