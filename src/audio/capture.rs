//! Blocking audio capture on top of cpal's callback stream
//!
//! The cpal stream is not `Send`, so a `CpalSource` must be opened on the
//! thread that reads from it. The stream callback converts samples to i16 and
//! pushes them into a bounded ring shared with the reader; `read_frame`
//! blocks until a full frame is buffered and returns the newest one.

use super::sources::{find_input_device, SourceError};
use super::{AudioFrame, AudioSource};
use crate::config::RunConfig;
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{Device, SampleFormat, StreamConfig};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Longest wait for audio before a read is considered failed
pub const READ_TIMEOUT: Duration = Duration::from_secs(2);

/// Frames of audio kept while the reader is busy; older audio is evicted
const RING_FRAMES: usize = 4;

/// Audio capture errors
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("Failed to get device config: {0}")]
    ConfigError(String),

    #[error("Failed to build audio stream: {0}")]
    StreamError(String),

    #[error("Failed to start stream: {0}")]
    PlayError(String),

    #[error("No audio received for {0:?}")]
    ReadTimeout(Duration),
}

/// Bounded sample ring cut into fixed-size frames.
///
/// Pushing past capacity evicts the oldest whole frames, so interleaved
/// channels stay aligned and the reader never sees audio older than
/// `RING_FRAMES` frames.
#[derive(Debug)]
pub(crate) struct FrameRing {
    pending: VecDeque<i16>,
    samples_per_frame: usize,
    capacity: usize,
}

impl FrameRing {
    pub(crate) fn new(samples_per_frame: usize, frames: usize) -> Self {
        let capacity = samples_per_frame * frames.max(1);
        Self {
            pending: VecDeque::with_capacity(capacity + samples_per_frame),
            samples_per_frame,
            capacity,
        }
    }

    pub(crate) fn push(&mut self, samples: &[i16]) {
        self.pending.extend(samples.iter().copied());
        while self.pending.len() > self.capacity && self.pending.len() >= self.samples_per_frame {
            self.pending.drain(..self.samples_per_frame);
        }
    }

    /// Newest complete frame. Older complete frames are discarded; a trailing
    /// partial frame is kept for the next read.
    pub(crate) fn latest_frame(&mut self) -> Option<AudioFrame> {
        let whole = self.pending.len() / self.samples_per_frame;
        if whole == 0 {
            return None;
        }
        if whole > 1 {
            log::trace!("Skipping {} stale frames", whole - 1);
            self.pending.drain(..(whole - 1) * self.samples_per_frame);
        }
        let samples: Vec<i16> = self.pending.drain(..self.samples_per_frame).collect();
        Some(AudioFrame::new(samples))
    }
}

/// State shared between the stream callbacks and the reader
struct CaptureShared {
    inner: Mutex<CaptureInner>,
    ready: Condvar,
}

struct CaptureInner {
    ring: FrameRing,
    error: Option<String>,
}

/// Audio source backed by a cpal input stream
pub struct CpalSource {
    /// Dropping the stream stops capture
    _stream: cpal::Stream,
    shared: Arc<CaptureShared>,
    read_timeout: Duration,
}

impl CpalSource {
    /// Resolve the configured device and start capturing.
    pub fn open(config: &RunConfig) -> Result<Self, CaptureError> {
        let device = find_input_device(&config.audio_device)?;
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());

        let supported = device
            .default_input_config()
            .map_err(|e| CaptureError::ConfigError(e.to_string()))?;

        let stream_config = StreamConfig {
            channels: config.channels,
            sample_rate: cpal::SampleRate(config.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        log::info!(
            "Audio capture: '{}' {} Hz, {} channels, {:?}",
            name,
            config.sample_rate,
            config.channels,
            supported.sample_format()
        );

        let shared = Arc::new(CaptureShared {
            inner: Mutex::new(CaptureInner {
                ring: FrameRing::new(config.samples_per_frame(), RING_FRAMES),
                error: None,
            }),
            ready: Condvar::new(),
        });

        let stream = match supported.sample_format() {
            SampleFormat::F32 => build_stream::<f32>(&device, &stream_config, shared.clone()),
            SampleFormat::I16 => build_stream::<i16>(&device, &stream_config, shared.clone()),
            SampleFormat::U16 => build_stream::<u16>(&device, &stream_config, shared.clone()),
            other => {
                return Err(CaptureError::ConfigError(format!(
                    "Unsupported sample format {:?}",
                    other
                )))
            }
        }
        .map_err(|e| CaptureError::StreamError(e.to_string()))?;

        stream
            .play()
            .map_err(|e| CaptureError::PlayError(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            shared,
            read_timeout: READ_TIMEOUT,
        })
    }
}

impl AudioSource for CpalSource {
    fn read_frame(&mut self) -> Result<AudioFrame, CaptureError> {
        let mut inner = self.shared.inner.lock();
        loop {
            if let Some(message) = inner.error.take() {
                return Err(CaptureError::StreamError(message));
            }
            if let Some(frame) = inner.ring.latest_frame() {
                return Ok(frame);
            }
            if self.shared.ready.wait_for(&mut inner, self.read_timeout).timed_out() {
                return Err(CaptureError::ReadTimeout(self.read_timeout));
            }
        }
    }
}

impl Drop for CpalSource {
    fn drop(&mut self) {
        log::info!("Audio capture stopped");
    }
}

/// Build audio stream for given sample type
fn build_stream<T: cpal::Sample + cpal::SizedSample>(
    device: &Device,
    config: &StreamConfig,
    shared: Arc<CaptureShared>,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    i16: cpal::FromSample<T>,
{
    let error_shared = shared.clone();

    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            let pcm: Vec<i16> = data
                .iter()
                .map(|s| cpal::Sample::from_sample(*s))
                .collect();

            shared.inner.lock().ring.push(&pcm);
            shared.ready.notify_one();
        },
        move |err| {
            log::error!("Audio stream error: {}", err);
            error_shared.inner.lock().error = Some(err.to_string());
            error_shared.ready.notify_one();
        },
        None,
    )
}
