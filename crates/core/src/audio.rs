//! PCM frames and the device-side seams of a session.

use crate::error::SessionError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Microphone rate expected by the remote service.
pub const INPUT_SAMPLE_RATE: u32 = 16_000;
/// Rate of the audio the remote service sends back.
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;
/// Samples per captured frame: 64 ms at 16 kHz.
pub const CAPTURE_CHUNK_SAMPLES: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Received from the remote service, bound for playback.
    Inbound,
    /// Captured locally, bound for the remote service.
    Outbound,
}

/// A timestamped, immutable chunk of mono 16-bit PCM.
///
/// Samples sit behind an `Arc`, so clones are cheap and share storage.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    direction: Direction,
    sample_rate: u32,
    timestamp: Instant,
    samples: Arc<[i16]>,
}

impl Frame {
    pub fn new(direction: Direction, sample_rate: u32, samples: Vec<i16>) -> Self {
        Self {
            direction,
            sample_rate,
            timestamp: Instant::now(),
            samples: samples.into(),
        }
    }

    /// A microphone frame at the fixed input rate.
    pub fn captured(samples: Vec<i16>) -> Self {
        Self::new(Direction::Outbound, INPUT_SAMPLE_RATE, samples)
    }

    /// A frame received from the remote service.
    pub fn received(sample_rate: u32, samples: Vec<i16>) -> Self {
        Self::new(Direction::Inbound, sample_rate, samples)
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Playback length of the frame.
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }
}

/// A microphone (or any other source) producing fixed-size outbound frames.
///
/// Frames arrive on the channel returned by `start`; a closed channel means
/// the device went away. The receiver is awaited, so readers never poll.
pub trait AudioCaptureSource: Send {
    /// Opens the device and starts producing frames. Calling `start` again
    /// after `stop` opens a fresh stream. Open failures are `SessionError::Device`
    /// and are not retried here.
    fn start(&mut self) -> Result<mpsc::Receiver<Frame>, SessionError>;

    /// Failures of a running stream. Taken once by the session.
    fn take_errors(&mut self) -> Option<mpsc::UnboundedReceiver<SessionError>> {
        None
    }

    /// Releases the device. Idempotent.
    fn stop(&mut self);
}

/// A playback queue fed by the session loop.
pub trait AudioSink: Send {
    /// Appends a frame to the playback queue.
    fn enqueue(&self, frame: Frame);

    /// Drops everything queued but not yet played, including a frame that is
    /// partly played. Returns the number of frames dropped.
    fn flush(&self) -> usize;

    /// Device failures, reported asynchronously. Taken once by the session.
    fn take_errors(&mut self) -> Option<mpsc::UnboundedReceiver<SessionError>> {
        None
    }

    /// Releases the output device. Idempotent.
    fn close(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_frame_duration_is_64ms() {
        let frame = Frame::captured(vec![0; CAPTURE_CHUNK_SAMPLES]);
        assert_eq!(frame.direction(), Direction::Outbound);
        assert_eq!(frame.sample_rate(), INPUT_SAMPLE_RATE);
        assert_eq!(frame.duration(), Duration::from_millis(64));
    }

    #[test]
    fn clones_share_samples() {
        let frame = Frame::received(OUTPUT_SAMPLE_RATE, vec![1, 2, 3]);
        let copy = frame.clone();
        assert!(std::ptr::eq(frame.samples().as_ptr(), copy.samples().as_ptr()));
        assert_eq!(copy.direction(), Direction::Inbound);
    }
}
