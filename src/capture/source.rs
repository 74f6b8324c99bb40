//! Capture thread: turns hardware buffers into published snapshots

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use super::frame::{FrameFormat, FrameSnapshot};
use super::port::{BufferPool, PortBuffer, SendError, VideoPort};
use super::CaptureError;
use crate::pipeline::{HandoffSender, PipelineStats, StopToken};
use crate::CaptureConfig;

/// Pause after a failed delivery so a dead device does not spin the thread
const ERROR_BACKOFF: Duration = Duration::from_millis(10);

/// What the capture thread saw before it exited
#[derive(Debug, Clone, Default)]
pub struct ProducerSummary {
    pub delivered: u64,
    pub published: u64,
    pub port_errors: u64,
}

pub struct FrameSource<P: VideoPort> {
    port: P,
    pool: BufferPool,
    format: FrameFormat,
    handoff: HandoffSender,
    stop: StopToken,
    stats: Arc<PipelineStats>,
    summary: ProducerSummary,
}

impl<P: VideoPort> FrameSource<P> {
    /// Configure the port once and prime it with every pooled buffer.
    #[instrument(skip_all, fields(width = config.width, height = config.height, fps = config.fps))]
    pub fn open(
        mut port: P,
        config: &CaptureConfig,
        handoff: HandoffSender,
        stop: StopToken,
        stats: Arc<PipelineStats>,
    ) -> Result<Self, CaptureError> {
        let format = port.configure(config)?;
        if (format.width, format.height) != (config.width, config.height) {
            return Err(CaptureError::FormatRejected {
                requested: format!("{}x{}", config.width, config.height),
                actual: format!("{}x{}", format.width, format.height),
            });
        }
        info!(?format, "video port configured");

        let pool = BufferPool::new(config.buffer_count as usize, format.buffer_len())?;
        info!(
            buffers = pool.capacity(),
            buffer_size = format.buffer_len(),
            "buffer pool created"
        );

        let mut source = Self {
            port,
            pool,
            format,
            handoff,
            stop,
            stats,
            summary: ProducerSummary::default(),
        };
        source.prime();
        Ok(source)
    }

    fn prime(&mut self) {
        for index in 0..self.pool.capacity() {
            if !self.send_one() {
                warn!(index, "unable to send a buffer to the video port");
            }
        }
    }

    /// Move one pooled buffer to the port. False if none could be sent.
    fn send_one(&mut self) -> bool {
        let Some(buffer) = self.pool.acquire() else {
            self.stats.record_pool_miss();
            return false;
        };
        match self.port.send_buffer(buffer) {
            Ok(()) => true,
            Err(SendError { buffer, source }) => {
                warn!(error = %source, "video port refused buffer");
                if self.pool.release(buffer).is_err() {
                    warn!("buffer pool overflow, buffer discarded");
                }
                false
            }
        }
    }

    /// Handle one buffer delivered by the hardware.
    fn on_buffer(&mut self, buffer: PortBuffer) {
        self.summary.delivered += 1;

        match FrameSnapshot::copy_from_buffer(&self.format, buffer.filled()) {
            Ok(snapshot) => match self.handoff.publish(snapshot) {
                Ok(sequence) => {
                    self.summary.published += 1;
                    debug!(sequence, hw_sequence = buffer.sequence, "frame published");
                }
                Err(err) => warn!(error = %err, "frame not published"),
            },
            Err(err) => warn!(error = %err, "frame not copied"),
        }

        if self.pool.release(buffer).is_err() {
            warn!("buffer pool overflow, buffer discarded");
        }
        if !self.send_one() {
            warn!("Unable to return a buffer to the video port");
        }
    }

    /// Capture until a stop is requested or the port ends the stream.
    pub fn run(mut self) -> ProducerSummary {
        info!("capture started");
        while !self.stop.is_requested() {
            match self.port.next_filled() {
                Ok(buffer) => self.on_buffer(buffer),
                Err(CaptureError::EndOfStream) => {
                    info!("video port reached end of stream");
                    break;
                }
                Err(CaptureError::Starved) => {
                    if !self.send_one() {
                        warn!("video port starved and buffer pool is empty");
                        thread::sleep(ERROR_BACKOFF);
                    }
                }
                Err(err) => {
                    self.summary.port_errors += 1;
                    self.stats.record_port_error();
                    warn!(error = %err, "frame delivery failed");
                    thread::sleep(ERROR_BACKOFF);
                }
            }
        }

        if let Err(err) = self.port.stop() {
            warn!(error = %err, "failed to stop video port");
        }
        self.handoff.close();
        info!(
            delivered = self.summary.delivered,
            published = self.summary.published,
            port_errors = self.summary.port_errors,
            pool_misses = self.stats.pool_misses(),
            "capture stopped"
        );
        self.summary
    }
}

impl<P: VideoPort + 'static> FrameSource<P> {
    /// Run the capture loop on its own thread.
    pub fn spawn(self) -> Result<JoinHandle<ProducerSummary>, CaptureError> {
        thread::Builder::new()
            .name("camcal-capture".into())
            .spawn(move || self.run())
            .map_err(CaptureError::Spawn)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::io;

    use super::*;
    use crate::capture::PixelFormat;
    use crate::pipeline::handoff;

    /// Port that fills queued buffers with a counter byte and counts sends
    struct CountingPort {
        queued: VecDeque<PortBuffer>,
        remaining: u32,
        next: u8,
        sent: Arc<std::sync::atomic::AtomicU32>,
    }

    impl VideoPort for CountingPort {
        fn configure(&mut self, config: &CaptureConfig) -> Result<FrameFormat, CaptureError> {
            Ok(FrameFormat::packed(config.width, config.height, PixelFormat::Grey))
        }

        fn send_buffer(&mut self, buffer: PortBuffer) -> Result<(), SendError> {
            self.sent.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            self.queued.push_back(buffer);
            Ok(())
        }

        fn next_filled(&mut self) -> Result<PortBuffer, CaptureError> {
            if self.remaining == 0 {
                return Err(CaptureError::EndOfStream);
            }
            let mut buffer = self.queued.pop_front().ok_or(CaptureError::Starved)?;
            self.remaining -= 1;
            self.next = self.next.wrapping_add(1);
            buffer.data.fill(self.next);
            buffer.bytes_used = buffer.data.len();
            Ok(buffer)
        }
    }

    /// Port that refuses its first sends, fails its first reads and reports
    /// `stalls` spurious starvations while still holding buffers
    struct FlakyPort {
        inner: CountingPort,
        refuse_sends: u32,
        io_errors: u32,
        stalls: u32,
        refused: u32,
    }

    impl FlakyPort {
        fn new(frames: u32) -> Self {
            Self {
                inner: CountingPort {
                    queued: VecDeque::new(),
                    remaining: frames,
                    next: 0,
                    sent: Arc::default(),
                },
                refuse_sends: 0,
                io_errors: 0,
                stalls: 0,
                refused: 0,
            }
        }
    }

    impl VideoPort for FlakyPort {
        fn configure(&mut self, config: &CaptureConfig) -> Result<FrameFormat, CaptureError> {
            self.inner.configure(config)
        }

        fn send_buffer(&mut self, buffer: PortBuffer) -> Result<(), SendError> {
            if self.refuse_sends > 0 {
                self.refuse_sends -= 1;
                self.refused += 1;
                return Err(SendError {
                    buffer,
                    source: CaptureError::Io(io::Error::new(io::ErrorKind::WouldBlock, "queue full")),
                });
            }
            self.inner.send_buffer(buffer)
        }

        fn next_filled(&mut self) -> Result<PortBuffer, CaptureError> {
            if self.io_errors > 0 {
                self.io_errors -= 1;
                return Err(CaptureError::Io(io::Error::other("dequeue failed")));
            }
            if self.stalls > 0 && !self.inner.queued.is_empty() {
                self.stalls -= 1;
                return Err(CaptureError::Starved);
            }
            self.inner.next_filled()
        }
    }

    fn small_config() -> CaptureConfig {
        CaptureConfig {
            width: 8,
            height: 6,
            buffer_count: 2,
            ..CaptureConfig::default()
        }
    }

    #[test]
    fn every_buffer_goes_back_to_the_port() {
        let stats = Arc::new(PipelineStats::default());
        let (sender, mut receiver) = handoff::channel(Arc::clone(&stats));
        let stop = StopToken::new(sender.closer());
        let sent = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let port = CountingPort {
            queued: VecDeque::new(),
            remaining: 5,
            next: 0,
            sent: Arc::clone(&sent),
        };

        let source = FrameSource::open(port, &small_config(), sender, stop, stats).unwrap();
        let summary = source.run();

        assert_eq!(summary.delivered, 5);
        assert_eq!(summary.published, 5);
        // two primed, then one per delivered buffer
        assert_eq!(sent.load(std::sync::atomic::Ordering::Relaxed), 7);

        let last = receiver.wait_and_take().unwrap();
        assert_eq!(last.sequence, 5);
        assert!(last.frame.as_slice().iter().all(|&p| p == 5));
        assert!(receiver.wait_and_take().is_none(), "source closes the handoff");
    }

    #[test]
    fn stop_request_ends_capture() {
        let stats = Arc::new(PipelineStats::default());
        let (sender, _receiver) = handoff::channel(Arc::clone(&stats));
        let stop = StopToken::new(sender.closer());
        let port = CountingPort {
            queued: VecDeque::new(),
            remaining: u32::MAX,
            next: 0,
            sent: Arc::default(),
        };

        let source = FrameSource::open(port, &small_config(), sender, stop.clone(), stats).unwrap();
        stop.request_stop();
        let summary = source.run();
        assert_eq!(summary.delivered, 0);
    }

    #[test]
    fn mismatched_port_geometry_is_fatal() {
        struct HalfPort;
        impl VideoPort for HalfPort {
            fn configure(&mut self, c: &CaptureConfig) -> Result<FrameFormat, CaptureError> {
                Ok(FrameFormat::packed(c.width / 2, c.height / 2, PixelFormat::Grey))
            }
            fn send_buffer(&mut self, _buffer: PortBuffer) -> Result<(), SendError> {
                Ok(())
            }
            fn next_filled(&mut self) -> Result<PortBuffer, CaptureError> {
                Err(CaptureError::EndOfStream)
            }
        }

        let (sender, _receiver) = handoff::channel(Arc::default());
        let stop = StopToken::new(sender.closer());
        let result = FrameSource::open(HalfPort, &small_config(), sender, stop, Arc::default());
        assert!(matches!(result, Err(CaptureError::FormatRejected { .. })));
    }

    #[test]
    fn refused_sends_and_read_errors_do_not_end_capture() {
        let stats = Arc::new(PipelineStats::default());
        let (sender, mut receiver) = handoff::channel(Arc::clone(&stats));
        let stop = StopToken::new(sender.closer());
        let port = FlakyPort {
            refuse_sends: 3,
            io_errors: 2,
            ..FlakyPort::new(5)
        };

        let source = FrameSource::open(port, &small_config(), sender, stop, Arc::clone(&stats)).unwrap();
        // both priming sends were refused and went back to the pool
        assert_eq!(source.pool.available(), 2);
        assert!(source.port.inner.queued.is_empty());

        let summary = source.run();
        assert_eq!(summary.delivered, 5);
        assert_eq!(summary.published, 5);
        assert_eq!(summary.port_errors, 2);
        assert_eq!(stats.port_errors(), 2);
        assert_eq!(stats.pool_misses(), 0);
        assert_eq!(stats.published(), 5);

        let last = receiver.wait_and_take().unwrap();
        assert_eq!(last.sequence, 5);
    }

    #[test]
    fn starvation_with_an_empty_pool_is_counted() {
        let stats = Arc::new(PipelineStats::default());
        let (sender, _receiver) = handoff::channel(Arc::clone(&stats));
        let stop = StopToken::new(sender.closer());
        let port = FlakyPort {
            stalls: 2,
            ..FlakyPort::new(3)
        };
        let config = CaptureConfig {
            buffer_count: 1,
            ..small_config()
        };

        let source = FrameSource::open(port, &config, sender, stop, Arc::clone(&stats)).unwrap();
        let summary = source.run();

        assert_eq!(summary.delivered, 3);
        assert_eq!(summary.port_errors, 0);
        // the only buffer sat in the port during both stalls
        assert_eq!(stats.pool_misses(), 2);
    }
}
