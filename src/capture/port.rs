//! Hardware side of the capture path: the video port and its buffer pool

use flume::{Receiver, Sender, TrySendError};

use super::frame::FrameFormat;
use super::CaptureError;
use crate::CaptureConfig;

/// One hardware buffer cycling between the pool, the port and the producer
#[derive(Debug)]
pub struct PortBuffer {
    pub data: Vec<u8>,
    /// Valid bytes written by the port
    pub bytes_used: usize,
    /// Driver sequence number of the frame it holds
    pub sequence: u64,
}

impl PortBuffer {
    pub fn with_len(len: usize) -> Self {
        Self {
            data: vec![0; len],
            bytes_used: 0,
            sequence: 0,
        }
    }

    pub fn filled(&self) -> &[u8] {
        &self.data[..self.bytes_used.min(self.data.len())]
    }
}

/// A buffer the port refused, handed back so it can return to the pool
#[derive(Debug)]
pub struct SendError {
    pub buffer: PortBuffer,
    pub source: CaptureError,
}

/// A frame-delivering device.
///
/// The port only fills buffers that were sent to it; `next_filled` blocks until
/// the hardware completes one of them.
pub trait VideoPort: Send {
    /// Negotiate resolution, pixel format and frame rate. Called once.
    fn configure(&mut self, config: &CaptureConfig) -> Result<FrameFormat, CaptureError>;

    /// Queue an empty buffer for the hardware to fill.
    fn send_buffer(&mut self, buffer: PortBuffer) -> Result<(), SendError>;

    /// Wait for the next filled buffer. `CaptureError::Starved` means no
    /// buffer is queued; `CaptureError::EndOfStream` ends capture.
    fn next_filled(&mut self) -> Result<PortBuffer, CaptureError>;

    fn stop(&mut self) -> Result<(), CaptureError> {
        Ok(())
    }
}

impl<P: VideoPort + ?Sized> VideoPort for Box<P> {
    fn configure(&mut self, config: &CaptureConfig) -> Result<FrameFormat, CaptureError> {
        (**self).configure(config)
    }

    fn send_buffer(&mut self, buffer: PortBuffer) -> Result<(), SendError> {
        (**self).send_buffer(buffer)
    }

    fn next_filled(&mut self) -> Result<PortBuffer, CaptureError> {
        (**self).next_filled()
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        (**self).stop()
    }
}

/// Fixed set of buffers waiting to be sent back to the port
pub struct BufferPool {
    tx: Sender<PortBuffer>,
    rx: Receiver<PortBuffer>,
    capacity: usize,
}

impl BufferPool {
    pub fn new(count: usize, buffer_len: usize) -> Result<Self, CaptureError> {
        if count == 0 || buffer_len == 0 {
            return Err(CaptureError::Pool(format!(
                "cannot create {count} buffers of {buffer_len} bytes"
            )));
        }

        let (tx, rx) = flume::bounded(count);
        for _ in 0..count {
            tx.try_send(PortBuffer::with_len(buffer_len))
                .map_err(|_| CaptureError::Pool("pool filled past capacity".into()))?;
        }

        Ok(Self {
            tx,
            rx,
            capacity: count,
        })
    }

    /// Return a buffer. Hands it back if the pool is already full.
    pub fn release(&self, mut buffer: PortBuffer) -> Result<(), PortBuffer> {
        buffer.bytes_used = 0;
        match self.tx.try_send(buffer) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(buffer)) | Err(TrySendError::Disconnected(buffer)) => {
                Err(buffer)
            }
        }
    }

    pub fn acquire(&self) -> Option<PortBuffer> {
        self.rx.try_recv().ok()
    }

    pub fn available(&self) -> usize {
        self.rx.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_hands_out_each_buffer_once() {
        let pool = BufferPool::new(2, 16).unwrap();
        let a = pool.acquire().unwrap();
        let _b = pool.acquire().unwrap();
        assert!(pool.acquire().is_none());
        assert_eq!(a.data.len(), 16);

        pool.release(a).unwrap();
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn pool_refuses_foreign_buffer_when_full() {
        let pool = BufferPool::new(1, 8).unwrap();
        let extra = PortBuffer::with_len(8);
        assert!(pool.release(extra).is_err());
        assert_eq!(pool.capacity(), 1);
    }

    #[test]
    fn empty_pool_is_a_setup_error() {
        assert!(matches!(BufferPool::new(0, 8), Err(CaptureError::Pool(_))));
    }
}
