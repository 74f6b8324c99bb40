//! The consumer side: wait for the latest frame, detect, log, render.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use super::handoff::HandoffReceiver;
use super::rate::RateMeter;
use super::{PipelineStats, StopToken};
use crate::calib_log::CalibrationLogger;
use crate::capture::ProducerSummary;
use crate::detect::{Detection, GridSize, PatternDetector};
use crate::display::{OverlayRenderer, OverlayStats};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    WaitingForFrame,
    Detecting,
    Logging,
    Rendering,
}

/// Outcome of one consumer cycle
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub sequence: u64,
    /// Frames published since the previous cycle that were never seen
    pub skipped: u64,
    pub found: bool,
    pub points: usize,
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub cycles: u64,
    pub calibration_frames: u64,
    pub skipped: u64,
    pub dropped: u64,
    /// Times the producer found no free buffer to hand the port
    pub pool_misses: u64,
    pub producer: Option<ProducerSummary>,
}

pub struct ConsumerLoop<D: PatternDetector> {
    receiver: HandoffReceiver,
    detector: D,
    logger: CalibrationLogger,
    renderer: OverlayRenderer,
    grid: GridSize,
    stats: Arc<PipelineStats>,
    stop: StopToken,
    meter: RateMeter,
    state: ConsumerState,
    cycles: u64,
    skipped: u64,
}

impl<D: PatternDetector> ConsumerLoop<D> {
    pub fn new(
        receiver: HandoffReceiver,
        detector: D,
        logger: CalibrationLogger,
        renderer: OverlayRenderer,
        grid: GridSize,
        stats: Arc<PipelineStats>,
        stop: StopToken,
    ) -> Self {
        Self {
            receiver,
            detector,
            logger,
            renderer,
            grid,
            stats,
            stop,
            meter: RateMeter::started_at(Instant::now()),
            state: ConsumerState::WaitingForFrame,
            cycles: 0,
            skipped: 0,
        }
    }

    pub fn state(&self) -> ConsumerState {
        self.state
    }

    /// Run one cycle. `None` once a stop was requested or the stream ended.
    pub fn run_cycle(&mut self) -> Option<CycleReport> {
        self.state = ConsumerState::WaitingForFrame;
        if self.stop.is_requested() {
            return None;
        }
        let previous = self.receiver.last_sequence();
        let published = self.receiver.wait_and_take()?;

        let skipped = published.sequence.saturating_sub(previous + 1);
        if skipped > 0 {
            self.skipped += skipped;
            metrics::counter!("camcal_frames_skipped").increment(skipped);
            debug!(sequence = published.sequence, skipped, "consumer skipped frames");
        }

        self.state = ConsumerState::Detecting;
        let started = Instant::now();
        let detection = self.detector.detect(&published.frame, self.grid);
        metrics::histogram!("camcal_detect_time_us").record(started.elapsed().as_micros() as f64);
        let Detection { found, points } = detection;

        if found {
            self.state = ConsumerState::Logging;
            if let Err(err) = self.logger.log_frame(&points) {
                warn!(
                    error = %err,
                    sequence = published.sequence,
                    log = %self.logger.path().display(),
                    "calibration frame not logged"
                );
            }
        }

        self.state = ConsumerState::Rendering;
        self.cycles += 1;
        self.meter.sample();
        let overlay = OverlayStats {
            cycles: self.cycles,
            video_fps: self.stats.video_fps(),
            consumer_fps: self.meter.current_rate(),
            calibration_frames: self.logger.frames(),
        };
        if let Err(err) = self.renderer.preview(&published.frame) {
            warn!(error = %err, "preview failed");
        }
        if let Err(err) = self.renderer.render(&points, &overlay) {
            warn!(error = %err, "overlay render failed");
        }
        info!("{}", overlay.status_line());

        if self.renderer.quit_requested() {
            self.stop.request_stop();
        }
        self.state = ConsumerState::WaitingForFrame;

        Some(CycleReport {
            sequence: published.sequence,
            skipped,
            found,
            points: points.len(),
        })
    }

    /// Cycle until stopped.
    pub fn run(&mut self) -> RunSummary {
        while self.run_cycle().is_some() {}
        RunSummary {
            cycles: self.cycles,
            calibration_frames: self.logger.frames(),
            skipped: self.skipped,
            dropped: self.stats.dropped(),
            pool_misses: self.stats.pool_misses(),
            producer: None,
        }
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn logger(&self) -> &CalibrationLogger {
        &self.logger
    }

    pub fn renderer(&self) -> &OverlayRenderer {
        &self.renderer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::FrameSnapshot;
    use crate::detect::Point2;
    use crate::display::{HeadlessDisplay, HeadlessText};
    use crate::pipeline::handoff::{self, HandoffSender};
    use crate::OverlayConfig;

    /// Finds a "board" whenever the first pixel is bright
    struct FirstPixel;

    impl PatternDetector for FirstPixel {
        fn detect(&mut self, frame: &FrameSnapshot, grid: GridSize) -> Detection {
            if frame.pixel(0, 0) > 128 {
                Detection::found(vec![Point2::new(1.0, 2.0); grid.corners()])
            } else {
                Detection::not_found()
            }
        }
    }

    fn consumer(dir: &tempfile::TempDir) -> (HandoffSender, StopToken, ConsumerLoop<FirstPixel>) {
        let stats = Arc::new(PipelineStats::default());
        let (sender, receiver) = handoff::channel(Arc::clone(&stats));
        let stop = StopToken::new(sender.closer());
        let logger = CalibrationLogger::create(&dir.path().join("calibration_data.txt")).unwrap();
        let renderer = OverlayRenderer::new(
            &OverlayConfig::default(),
            8,
            Box::new(HeadlessDisplay::new(640, 480)),
            Box::new(HeadlessText),
        );
        let consumer = ConsumerLoop::new(
            receiver,
            FirstPixel,
            logger,
            renderer,
            GridSize::new(2, 3),
            stats,
            stop.clone(),
        );
        (sender, stop, consumer)
    }

    fn frame(level: u8) -> FrameSnapshot {
        FrameSnapshot::luma(8, 8, vec![level; 64])
    }

    #[test]
    fn logs_only_found_frames() {
        let dir = tempfile::tempdir().unwrap();
        let (mut sender, _stop, mut consumer) = consumer(&dir);

        sender.publish(frame(200)).unwrap();
        let report = consumer.run_cycle().unwrap();
        assert!(report.found);
        assert_eq!(report.points, 6);

        sender.publish(frame(10)).unwrap();
        let report = consumer.run_cycle().unwrap();
        assert!(!report.found);
        assert_eq!(report.points, 0);

        assert_eq!(consumer.logger().frames(), 1);
        assert_eq!(consumer.cycles(), 2);
        assert_eq!(consumer.state(), ConsumerState::WaitingForFrame);
        assert!(consumer
            .renderer()
            .status_text()
            .ends_with("; 1 calibration frames"));

        let text = std::fs::read_to_string(dir.path().join("calibration_data.txt")).unwrap();
        assert_eq!(text.lines().count(), 1);
    }

    #[test]
    fn counts_frames_replaced_before_pickup() {
        let dir = tempfile::tempdir().unwrap();
        let (mut sender, _stop, mut consumer) = consumer(&dir);

        for _ in 0..4 {
            sender.publish(frame(10)).unwrap();
        }
        let report = consumer.run_cycle().unwrap();
        assert_eq!(report.sequence, 4);
        assert_eq!(report.skipped, 3);

        sender.publish(frame(10)).unwrap();
        assert_eq!(consumer.run_cycle().unwrap().skipped, 0);
    }

    #[test]
    fn stop_ends_run_with_summary() {
        let dir = tempfile::tempdir().unwrap();
        let (mut sender, stop, mut consumer) = consumer(&dir);

        sender.publish(frame(200)).unwrap();
        assert!(consumer.run_cycle().is_some());
        stop.request_stop();

        let summary = consumer.run();
        assert_eq!(summary.cycles, 1);
        assert_eq!(summary.calibration_frames, 1);
        assert!(consumer.run_cycle().is_none());
    }

    #[test]
    fn closed_handoff_drains_last_frame() {
        let dir = tempfile::tempdir().unwrap();
        let (mut sender, _stop, mut consumer) = consumer(&dir);

        sender.publish(frame(200)).unwrap();
        sender.publish(frame(10)).unwrap();
        sender.close();

        let summary = consumer.run();
        assert_eq!(summary.cycles, 1);
        assert_eq!(summary.calibration_frames, 0);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.dropped, 1);
        assert_eq!(summary.pool_misses, 0);
    }
}
