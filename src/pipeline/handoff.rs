//! Single-slot latest-frame mailbox between the capture thread and the consumer.
//!
//! The producer swaps a freshly built snapshot into the slot and posts one
//! wake-up per publish. A snapshot the consumer has not taken yet is replaced
//! and counted as dropped; sequence numbers let the consumer count the gap.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwapOption;
use crossbeam::sync::{Parker, Unparker};
use thiserror::Error;
use tracing::{debug, info};

use super::rate::RateMeter;
use super::PipelineStats;
use crate::capture::FrameSnapshot;

/// Producer status is reported every this many published frames
pub const REPORT_INTERVAL: u64 = 10;

/// A snapshot with its publish sequence number (first publish is 1)
#[derive(Debug, Clone)]
pub struct Published {
    pub sequence: u64,
    pub frame: FrameSnapshot,
}

#[derive(Debug, Error)]
pub enum HandoffError {
    #[error("frame is {got_w}x{got_h}, stream is fixed at {want_w}x{want_h}")]
    DimensionsChanged {
        want_w: u32,
        want_h: u32,
        got_w: u32,
        got_h: u32,
    },
}

struct Slot {
    latest: ArcSwapOption<Published>,
    closed: AtomicBool,
}

/// Create a connected sender/receiver pair.
pub fn channel(stats: Arc<PipelineStats>) -> (HandoffSender, HandoffReceiver) {
    let slot = Arc::new(Slot {
        latest: ArcSwapOption::empty(),
        closed: AtomicBool::new(false),
    });
    let parker = Parker::new();
    let unparker = parker.unparker().clone();

    let sender = HandoffSender {
        slot: Arc::clone(&slot),
        unparker,
        stats,
        sequence: 0,
        dimensions: None,
        meter: RateMeter::new(),
    };
    let receiver = HandoffReceiver {
        slot,
        parker,
        last_sequence: 0,
    };
    (sender, receiver)
}

/// Producer half, owned by the capture thread
pub struct HandoffSender {
    slot: Arc<Slot>,
    unparker: Unparker,
    stats: Arc<PipelineStats>,
    sequence: u64,
    dimensions: Option<(u32, u32)>,
    meter: RateMeter,
}

impl HandoffSender {
    /// Make `frame` the latest snapshot and wake the consumer.
    pub fn publish(&mut self, frame: FrameSnapshot) -> Result<u64, HandoffError> {
        let (want_w, want_h) = *self.dimensions.get_or_insert((frame.width, frame.height));
        if (frame.width, frame.height) != (want_w, want_h) {
            return Err(HandoffError::DimensionsChanged {
                want_w,
                want_h,
                got_w: frame.width,
                got_h: frame.height,
            });
        }

        self.sequence += 1;
        let sequence = self.sequence;
        let previous = self
            .slot
            .latest
            .swap(Some(Arc::new(Published { sequence, frame })));
        self.unparker.unpark();

        self.stats.record_published(sequence);
        if let Some(previous) = previous {
            self.stats.record_dropped();
            debug!(sequence = previous.sequence, "unconsumed frame replaced");
        }

        let now = Instant::now();
        self.meter.sample_at(now);
        if sequence % REPORT_INTERVAL == 0 {
            let fps = self.meter.rate_at(now);
            self.stats.set_video_fps(fps);
            metrics::gauge!("camcal_video_fps").set(fps);
            info!(
                "Frame = {}, Frame Post {}, Framerate = {:.0} fps",
                sequence,
                sequence - self.stats.dropped(),
                fps
            );
        }

        Ok(sequence)
    }

    /// Mark the stream finished; the consumer drains what is pending, then stops.
    pub fn close(&self) {
        self.closer().close();
    }

    pub fn closer(&self) -> HandoffCloser {
        HandoffCloser {
            slot: Arc::clone(&self.slot),
            unparker: self.unparker.clone(),
        }
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

/// Closes a handoff from any thread, waking a blocked consumer
#[derive(Clone)]
pub struct HandoffCloser {
    slot: Arc<Slot>,
    unparker: Unparker,
}

impl HandoffCloser {
    pub fn close(&self) {
        self.slot.closed.store(true, Ordering::Release);
        self.unparker.unpark();
    }
}

/// Consumer half
pub struct HandoffReceiver {
    slot: Arc<Slot>,
    parker: Parker,
    last_sequence: u64,
}

impl HandoffReceiver {
    /// Block until a snapshot is available and take the latest one.
    ///
    /// There is no timeout. Returns `None` only after the handoff was closed
    /// and nothing is pending.
    pub fn wait_and_take(&mut self) -> Option<Published> {
        loop {
            if let Some(published) = self.try_take() {
                return Some(published);
            }
            if self.slot.closed.load(Ordering::Acquire) {
                // a publish may have landed between the take and the close check
                return self.try_take();
            }
            self.parker.park();
        }
    }

    pub fn try_take(&mut self) -> Option<Published> {
        let shared = self.slot.latest.swap(None)?;
        let published = Arc::try_unwrap(shared).unwrap_or_else(|shared| (*shared).clone());
        self.last_sequence = published.sequence;
        Some(published)
    }

    /// Sequence number of the last snapshot taken, 0 before the first
    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }
}
