//! cpal-backed capture and playback.
//!
//! cpal streams are not `Send` on every host, so each stream is built and
//! kept alive on its own thread, parked until the owner asks it to stop.

use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FrameCount, StreamConfig};
use parley_core::audio::{CAPTURE_CHUNK_SAMPLES, INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE};
use parley_core::{AudioCaptureSource, AudioSink, Frame, PlaybackQueue, SessionError};
use parley_native_utils::audio::{Chunker, create_resampler, downmix, f32_to_i16};
use rubato::{FastFixedIn, Resampler};
use std::collections::VecDeque;
use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;
use tokio::sync::mpsc;

/// Device callback buffer size, in frames.
pub const INPUT_CHUNK_SIZE: usize = 1024;
pub const OUTPUT_CHUNK_SIZE: usize = 1024;
/// Captured frames that may wait for the session loop before new ones are dropped.
const FRAME_CHANNEL_CAPACITY: usize = 64;

/// A cpal stream living on a dedicated thread.
struct StreamThread {
    stop_tx: std_mpsc::Sender<()>,
    thread: JoinHandle<()>,
}

impl StreamThread {
    /// Builds the stream on a new thread and waits until it is playing.
    fn spawn<F>(name: &str, build: F) -> Result<Self>
    where
        F: FnOnce() -> Result<cpal::Stream> + Send + 'static,
    {
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<(), String>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let thread = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let stream = match build().and_then(|s| s.play().map(|_| s).context("Failed to start stream")) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(format!("{e:#}")));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                // Either a stop request or the owner going away ends the stream.
                let _ = stop_rx.recv();
                drop(stream);
            })
            .context("Failed to spawn audio thread")?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self { stop_tx, thread }),
            Ok(Err(message)) => {
                let _ = thread.join();
                Err(anyhow::anyhow!(message))
            }
            Err(_) => {
                let _ = thread.join();
                Err(anyhow::anyhow!("audio thread exited before the stream started"))
            }
        }
    }

    fn stop(self) {
        let _ = self.stop_tx.send(());
        if self.thread.join().is_err() {
            tracing::error!("audio thread panicked");
        }
    }
}

/// Microphone capture producing 1024-sample mono frames at 16 kHz.
pub struct CpalCapture {
    device_name: Option<String>,
    stream: Option<StreamThread>,
    errors_tx: mpsc::UnboundedSender<SessionError>,
    errors: Option<mpsc::UnboundedReceiver<SessionError>>,
}

impl CpalCapture {
    pub fn new(device_name: Option<String>) -> Self {
        let (errors_tx, errors_rx) = mpsc::unbounded_channel();
        Self {
            device_name,
            stream: None,
            errors_tx,
            errors: Some(errors_rx),
        }
    }
}

impl AudioCaptureSource for CpalCapture {
    fn start(&mut self) -> Result<mpsc::Receiver<Frame>, SessionError> {
        self.stop();
        let (frames_tx, frames_rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        let device_name = self.device_name.clone();
        let errors_tx = self.errors_tx.clone();
        let stream = StreamThread::spawn("parley-capture", move || {
            build_input_stream(device_name.as_deref(), frames_tx, errors_tx)
        })
        .map_err(|e| SessionError::Device(format!("{e:#}")))?;
        self.stream = Some(stream);
        Ok(frames_rx)
    }

    fn take_errors(&mut self) -> Option<mpsc::UnboundedReceiver<SessionError>> {
        self.errors.take()
    }

    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.stop();
            tracing::info!("Capture stopped.");
        }
    }
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Turns device callbacks into fixed-size 16 kHz frames.
struct CapturePipeline {
    channels: usize,
    resampler: Option<(FastFixedIn<f32>, Chunker)>,
    frames: Chunker,
    frames_tx: mpsc::Sender<Frame>,
}

impl CapturePipeline {
    fn process(&mut self, data: &[f32]) {
        let mono = downmix(data, self.channels);
        let resampled = match &mut self.resampler {
            None => mono,
            Some((resampler, chunker)) => {
                let mut out = Vec::new();
                for chunk in chunker.push(&mono) {
                    match resampler.process(&[chunk.as_slice()], None) {
                        Ok(mut channels) => {
                            if let Some(first) = channels.pop() {
                                out.extend(first);
                            }
                        }
                        Err(e) => tracing::warn!("Input resampling failed: {e}"),
                    }
                }
                out
            }
        };
        for chunk in self.frames.push(&resampled) {
            let frame = Frame::captured(f32_to_i16(&chunk));
            if let Err(e) = self.frames_tx.try_send(frame) {
                tracing::warn!("Dropping captured frame: {e}");
            }
        }
    }
}

fn build_input_stream(
    device_name: Option<&str>,
    frames_tx: mpsc::Sender<Frame>,
    errors_tx: mpsc::UnboundedSender<SessionError>,
) -> Result<cpal::Stream> {
    let input = parley_native_utils::device::get_or_default_input(device_name)
        .context("Failed to get audio input device")?;
    tracing::info!("Using input device: {:?}", input.name()?);

    let supported = input
        .default_input_config()
        .context("Failed to get default input config")?;
    let config = StreamConfig {
        channels: supported.channels(),
        sample_rate: supported.sample_rate(),
        buffer_size: cpal::BufferSize::Fixed(FrameCount::from(INPUT_CHUNK_SIZE as u32)),
    };
    tracing::info!("Input stream config: {:?}", &config);

    let device_rate = config.sample_rate.0;
    let resampler = if device_rate == INPUT_SAMPLE_RATE {
        None
    } else {
        let resampler = create_resampler(device_rate as f64, INPUT_SAMPLE_RATE as f64, INPUT_CHUNK_SIZE)?;
        let chunker = Chunker::new(resampler.input_frames_next());
        Some((resampler, chunker))
    };
    let mut pipeline = CapturePipeline {
        channels: config.channels as usize,
        resampler,
        frames: Chunker::new(CAPTURE_CHUNK_SAMPLES),
        frames_tx,
    };

    let stream = input.build_input_stream(
        &config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| pipeline.process(data),
        move |err| {
            tracing::error!("An error occurred on input stream: {}", err);
            let _ = errors_tx.send(SessionError::Device(err.to_string()));
        },
        None,
    )?;
    Ok(stream)
}

/// Speaker output fed from a [`PlaybackQueue`] of 24 kHz frames.
pub struct CpalSink {
    queue: PlaybackQueue,
    stream: Option<StreamThread>,
    errors: Option<mpsc::UnboundedReceiver<SessionError>>,
}

impl CpalSink {
    pub fn open(device_name: Option<&str>) -> Result<Self> {
        let queue = PlaybackQueue::new();
        let (errors_tx, errors_rx) = mpsc::unbounded_channel();
        let device_name = device_name.map(str::to_string);
        let callback_queue = queue.clone();
        let stream = StreamThread::spawn("parley-playback", move || {
            build_output_stream(device_name.as_deref(), callback_queue, errors_tx)
        })?;
        Ok(Self {
            queue,
            stream: Some(stream),
            errors: Some(errors_rx),
        })
    }
}

impl AudioSink for CpalSink {
    fn enqueue(&self, frame: Frame) {
        self.queue.enqueue(frame);
    }

    fn flush(&self) -> usize {
        self.queue.flush()
    }

    fn take_errors(&mut self) -> Option<mpsc::UnboundedReceiver<SessionError>> {
        self.errors.take()
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.stop();
            tracing::info!("Playback stopped.");
        }
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.close();
    }
}

/// Stands in for an output device that could not be opened. Audio is
/// dropped; the open failure is reported once through `take_errors`.
pub struct MutedSink {
    errors: Option<mpsc::UnboundedReceiver<SessionError>>,
}

impl MutedSink {
    pub fn new(reason: SessionError) -> Self {
        let (errors_tx, errors_rx) = mpsc::unbounded_channel();
        let _ = errors_tx.send(reason);
        Self {
            errors: Some(errors_rx),
        }
    }
}

impl AudioSink for MutedSink {
    fn enqueue(&self, frame: Frame) {
        tracing::trace!(samples = frame.len(), "no output device, dropping audio");
    }

    fn flush(&self) -> usize {
        0
    }

    fn take_errors(&mut self) -> Option<mpsc::UnboundedReceiver<SessionError>> {
        self.errors.take()
    }
}

/// Pulls 24 kHz samples from the queue and resamples them to the device rate.
struct PlaybackPipeline {
    queue: PlaybackQueue,
    generation: u64,
    resampler: Option<(FastFixedIn<f32>, Chunker)>,
    scratch: Vec<f32>,
    staged: VecDeque<f32>,
    errors_tx: mpsc::UnboundedSender<SessionError>,
}

impl PlaybackPipeline {
    fn refill(&mut self, wanted: usize) {
        let generation = self.queue.generation();
        if generation != self.generation {
            // Flushed: whatever we staged belongs to the discarded audio.
            self.generation = generation;
            self.staged.clear();
            if let Some((resampler, chunker)) = &mut self.resampler {
                resampler.reset();
                chunker.clear();
            }
        }

        while self.staged.len() < wanted {
            let n = self.queue.fill(&mut self.scratch);
            let Some((resampler, chunker)) = &mut self.resampler else {
                self.staged.extend(&self.scratch[..n]);
                if n == 0 {
                    break;
                }
                continue;
            };

            let mut chunks = chunker.push(&self.scratch[..n]);
            if n == 0 && chunks.is_empty() {
                if chunker.pending() == 0 {
                    break;
                }
                // End of the queued audio: pad the tail so it gets played.
                let padding = vec![0.0; chunker.chunk_size() - chunker.pending()];
                chunks = chunker.push(&padding);
            }
            for chunk in chunks {
                match resampler.process(&[chunk.as_slice()], None) {
                    Ok(mut channels) => {
                        if let Some(first) = channels.pop() {
                            self.staged.extend(first);
                        }
                    }
                    Err(e) => {
                        let _ = self
                            .errors_tx
                            .send(SessionError::Device(format!("output resampling failed: {e}")));
                    }
                }
            }
            if n == 0 {
                break;
            }
        }
    }

    fn write(&mut self, data: &mut [f32], channels: usize) {
        let frames = data.len() / channels.max(1);
        self.refill(frames);
        for frame in data.chunks_mut(channels.max(1)) {
            let sample = self.staged.pop_front().unwrap_or(0.0);
            frame.fill(sample);
        }
    }
}

fn build_output_stream(
    device_name: Option<&str>,
    queue: PlaybackQueue,
    errors_tx: mpsc::UnboundedSender<SessionError>,
) -> Result<cpal::Stream> {
    let output = parley_native_utils::device::get_or_default_output(device_name)
        .context("Failed to get audio output device")?;
    tracing::info!("Using output device: {:?}", output.name()?);

    let supported = output
        .default_output_config()
        .context("Failed to get default output config")?;
    let config = StreamConfig {
        channels: supported.channels(),
        sample_rate: supported.sample_rate(),
        buffer_size: cpal::BufferSize::Fixed(FrameCount::from(OUTPUT_CHUNK_SIZE as u32)),
    };
    tracing::info!("Output stream config: {:?}", &config);

    let device_rate = config.sample_rate.0;
    let channels = config.channels as usize;
    let resampler = if device_rate == OUTPUT_SAMPLE_RATE {
        None
    } else {
        let resampler = create_resampler(OUTPUT_SAMPLE_RATE as f64, device_rate as f64, OUTPUT_CHUNK_SIZE)?;
        let chunker = Chunker::new(resampler.input_frames_next());
        Some((resampler, chunker))
    };
    let mut pipeline = PlaybackPipeline {
        generation: queue.generation(),
        queue,
        resampler,
        scratch: vec![0.0; OUTPUT_CHUNK_SIZE],
        staged: VecDeque::with_capacity(OUTPUT_CHUNK_SIZE * 4),
        errors_tx: errors_tx.clone(),
    };

    let stream = output.build_output_stream(
        &config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| pipeline.write(data, channels),
        move |err| {
            tracing::error!("An error occurred on output stream: {}", err);
            let _ = errors_tx.send(SessionError::Device(err.to_string()));
        },
        None,
    )?;
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline(queue: PlaybackQueue, resample_to: Option<u32>) -> (PlaybackPipeline, mpsc::UnboundedReceiver<SessionError>) {
        let (errors_tx, errors_rx) = mpsc::unbounded_channel();
        let resampler = resample_to.map(|rate| {
            let resampler = create_resampler(OUTPUT_SAMPLE_RATE as f64, rate as f64, 256).unwrap();
            let chunker = Chunker::new(resampler.input_frames_next());
            (resampler, chunker)
        });
        let pipeline = PlaybackPipeline {
            generation: queue.generation(),
            queue,
            resampler,
            scratch: vec![0.0; 256],
            staged: VecDeque::new(),
            errors_tx,
        };
        (pipeline, errors_rx)
    }

    #[test]
    fn playback_duplicates_mono_across_channels() {
        let queue = PlaybackQueue::new();
        queue.enqueue(Frame::received(OUTPUT_SAMPLE_RATE, vec![16384, -16384]));
        let (mut pipeline, _errors) = pipeline(queue, None);

        let mut out = [1.0f32; 6];
        pipeline.write(&mut out, 2);
        assert_eq!(out, [0.5, 0.5, -0.5, -0.5, 0.0, 0.0]);
    }

    #[test]
    fn flush_discards_staged_samples() {
        let queue = PlaybackQueue::new();
        queue.enqueue(Frame::received(OUTPUT_SAMPLE_RATE, vec![16384; 1000]));
        let (mut pipeline, _errors) = pipeline(queue.clone(), Some(48_000));

        let mut out = vec![0.0f32; 64];
        pipeline.write(&mut out, 1);
        assert!(!pipeline.staged.is_empty());

        queue.flush();
        let mut out = vec![1.0f32; 64];
        pipeline.write(&mut out, 1);
        assert!(out.iter().all(|&s| s == 0.0));
        assert!(pipeline.staged.is_empty());
    }

    #[test]
    fn capture_pipeline_emits_fixed_frames() {
        let (frames_tx, mut frames_rx) = mpsc::channel(8);
        let mut pipeline = CapturePipeline {
            channels: 2,
            resampler: None,
            frames: Chunker::new(CAPTURE_CHUNK_SAMPLES),
            frames_tx,
        };
        // 1.5 frames worth of stereo input.
        pipeline.process(&vec![0.25; CAPTURE_CHUNK_SAMPLES * 3]);
        let frame = frames_rx.try_recv().unwrap();
        assert_eq!(frame.len(), CAPTURE_CHUNK_SAMPLES);
        assert_eq!(frame.sample_rate(), INPUT_SAMPLE_RATE);
        assert_eq!(frame.samples()[0], 8192);
        assert!(frames_rx.try_recv().is_err());
    }

    #[test]
    fn muted_sink_reports_once_and_drops_audio() {
        let mut sink = MutedSink::new(SessionError::Device("no output device".into()));
        sink.enqueue(Frame::received(OUTPUT_SAMPLE_RATE, vec![1, 2, 3]));
        assert_eq!(sink.flush(), 0);

        let mut errors = sink.take_errors().unwrap();
        assert_eq!(
            errors.try_recv().unwrap(),
            SessionError::Device("no output device".into())
        );
        // The sender is gone, so the session stops watching this channel.
        assert!(matches!(
            errors.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
        assert!(sink.take_errors().is_none());
    }

    #[test]
    fn capture_errors_reach_the_taken_channel() {
        let mut capture = CpalCapture::new(None);
        let mut errors = capture.take_errors().unwrap();
        assert!(capture.take_errors().is_none());

        capture
            .errors_tx
            .send(SessionError::Device("stream invalidated".into()))
            .unwrap();
        assert_eq!(
            errors.try_recv().unwrap(),
            SessionError::Device("stream invalidated".into())
        );
    }
}
