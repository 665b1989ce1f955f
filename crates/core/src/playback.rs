//! Shared playback queue between the session loop and an output callback.

use crate::audio::{AudioSink, Frame};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct QueueState {
    frames: VecDeque<Frame>,
    /// Read position inside the front frame.
    cursor: usize,
    generation: u64,
}

/// Frame queue that an audio callback drains sample by sample.
///
/// The lock is held only for queue bookkeeping, never across device I/O, so
/// `flush` is never starved by playback. `flush` is a total drain: frames
/// enqueued before it returns are gone, including a partly played one.
#[derive(Clone, Default)]
pub struct PlaybackQueue {
    state: Arc<Mutex<QueueState>>,
}

impl PlaybackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn enqueue(&self, frame: Frame) {
        if frame.is_empty() {
            return;
        }
        self.lock().frames.push_back(frame);
    }

    pub fn flush(&self) -> usize {
        let mut state = self.lock();
        let dropped = state.frames.len();
        state.frames.clear();
        state.cursor = 0;
        state.generation = state.generation.wrapping_add(1);
        dropped
    }

    /// Copies queued samples into `out` as normalized f32, returning how many
    /// were written. The caller pads the rest with silence.
    pub fn fill(&self, out: &mut [f32]) -> usize {
        let mut state = self.lock();
        let mut written = 0;
        while written < out.len() {
            let cursor = state.cursor;
            let Some(front) = state.frames.front() else {
                break;
            };
            let front_len = front.len();
            let samples = &front.samples()[cursor..];
            let n = samples.len().min(out.len() - written);
            for (dst, &src) in out[written..written + n].iter_mut().zip(samples) {
                *dst = src as f32 / 32768.0;
            }
            written += n;
            if cursor + n >= front_len {
                state.frames.pop_front();
                state.cursor = 0;
            } else {
                state.cursor = cursor + n;
            }
        }
        written
    }

    /// Bumped by every flush so consumers can drop their own staging buffers.
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    pub fn len(&self) -> usize {
        self.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().frames.is_empty()
    }
}

impl AudioSink for PlaybackQueue {
    fn enqueue(&self, frame: Frame) {
        PlaybackQueue::enqueue(self, frame);
    }

    fn flush(&self) -> usize {
        PlaybackQueue::flush(self)
    }
}
