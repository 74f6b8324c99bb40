//! Frame acquisition pipeline: capture thread → handoff → consumer loop

pub mod consumer;
pub mod handoff;
pub mod rate;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam::utils::CachePadded;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::calib_log::{CalibrationLogger, LogError};
use crate::capture::{CaptureError, FrameSource, ProducerSummary, VideoPort};
use crate::detect::PatternDetector;
use crate::display::OverlayRenderer;
use crate::Config;

pub use consumer::{ConsumerLoop, ConsumerState, CycleReport, RunSummary};
pub use handoff::{HandoffCloser, HandoffReceiver, HandoffSender, Published};
pub use rate::RateMeter;

/// Counters shared by the producer and the consumer
#[derive(Debug, Default)]
pub struct PipelineStats {
    published: CachePadded<AtomicU64>,
    dropped: CachePadded<AtomicU64>,
    video_fps_bits: CachePadded<AtomicU64>,
    port_errors: AtomicU64,
    pool_misses: AtomicU64,
}

impl PipelineStats {
    pub fn record_published(&self, sequence: u64) {
        self.published.store(sequence, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("camcal_frames_dropped").increment(1);
    }

    pub fn record_port_error(&self) {
        self.port_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_pool_miss(&self) {
        self.pool_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_video_fps(&self, fps: f64) {
        self.video_fps_bits.store(fps.to_bits(), Ordering::Relaxed);
    }

    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Snapshots replaced before the consumer took them
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn port_errors(&self) -> u64 {
        self.port_errors.load(Ordering::Relaxed)
    }

    pub fn pool_misses(&self) -> u64 {
        self.pool_misses.load(Ordering::Relaxed)
    }

    /// Last hardware frame rate computed by the producer
    pub fn video_fps(&self) -> f64 {
        f64::from_bits(self.video_fps_bits.load(Ordering::Relaxed))
    }
}

/// Cooperative stop request shared by both sides of the pipeline.
///
/// Requesting a stop also closes the handoff so a consumer blocked waiting
/// for a frame wakes up.
#[derive(Clone)]
pub struct StopToken {
    inner: Arc<StopInner>,
}

struct StopInner {
    requested: AtomicBool,
    handoff: HandoffCloser,
}

impl StopToken {
    pub fn new(handoff: HandoffCloser) -> Self {
        Self {
            inner: Arc::new(StopInner {
                requested: AtomicBool::new(false),
                handoff,
            }),
        }
    }

    pub fn request_stop(&self) {
        if !self.inner.requested.swap(true, Ordering::AcqRel) {
            info!("stop requested");
        }
        self.inner.handoff.close();
    }

    pub fn is_requested(&self) -> bool {
        self.inner.requested.load(Ordering::Acquire)
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("video source setup failed")]
    Capture(#[from] CaptureError),
    #[error("calibration log setup failed")]
    Log(#[from] LogError),
}

/// A running capture thread plus the consumer loop that drains it
pub struct Pipeline<D: PatternDetector> {
    consumer: ConsumerLoop<D>,
    producer: Option<JoinHandle<ProducerSummary>>,
    stop: StopToken,
    stats: Arc<PipelineStats>,
}

impl<D: PatternDetector> Pipeline<D> {
    /// Open the log, configure the port and start the capture thread.
    #[instrument(skip_all)]
    pub fn start<P>(
        config: &Config,
        port: P,
        detector: D,
        renderer: OverlayRenderer,
    ) -> Result<Self, PipelineError>
    where
        P: VideoPort + 'static,
    {
        let stats = Arc::new(PipelineStats::default());
        let (sender, receiver) = handoff::channel(Arc::clone(&stats));
        let stop = StopToken::new(sender.closer());

        let logger = CalibrationLogger::create(&config.log.path)?;
        let source = FrameSource::open(
            port,
            &config.capture,
            sender,
            stop.clone(),
            Arc::clone(&stats),
        )?;
        let producer = source.spawn()?;

        let consumer = ConsumerLoop::new(
            receiver,
            detector,
            logger,
            renderer,
            config.pattern.grid(),
            Arc::clone(&stats),
            stop.clone(),
        );

        info!("pipeline started");
        Ok(Self {
            consumer,
            producer: Some(producer),
            stop,
            stats,
        })
    }

    pub fn stop_token(&self) -> StopToken {
        self.stop.clone()
    }

    pub fn stop(&self) {
        self.stop.request_stop();
    }

    /// Drive the consumer on the calling thread until a stop is requested or
    /// the source ends, then join the capture thread.
    pub fn run(mut self) -> RunSummary {
        let mut summary = self.consumer.run();
        self.stop.request_stop();

        if let Some(handle) = self.producer.take() {
            match handle.join() {
                Ok(producer) => summary.producer = Some(producer),
                Err(_) => warn!("capture thread panicked"),
            }
        }
        summary.dropped = self.stats.dropped();
        summary.pool_misses = self.stats.pool_misses();
        info!(
            published = self.stats.published(),
            cycles = summary.cycles,
            calibration_frames = summary.calibration_frames,
            skipped = summary.skipped,
            port_errors = self.stats.port_errors(),
            pool_misses = summary.pool_misses,
            "pipeline finished"
        );
        summary
    }
}
