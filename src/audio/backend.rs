// Audio backend contract
// The controller only talks to decode/playback/analysis through these traits

use std::sync::Arc;

use crate::error::{DecodeError, Result};

/// Detune units per pitch step (cents per semitone)
pub const CENTS_PER_PITCH_STEP: f64 = 100.0;

/// Decoded, fixed-rate multichannel audio ready for playback
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedBuffer {
    sample_rate: u32,
    channels: usize,
    /// Interleaved f32 samples
    samples: Vec<f32>,
}

impl DecodedBuffer {
    /// Build a buffer from interleaved samples.
    ///
    /// Trailing samples that do not fill a whole frame are dropped.
    pub fn new(sample_rate: u32, channels: usize, mut samples: Vec<f32>) -> Self {
        let channels = channels.max(1);
        let whole = samples.len() - samples.len() % channels;
        samples.truncate(whole);
        Self {
            sample_rate: sample_rate.max(1),
            channels,
            samples,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Number of frames (samples per channel)
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels
    }

    /// Length in buffer-time seconds
    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Sample at a fractional frame position, linearly interpolated.
    ///
    /// Channels past the last one read the last channel, positions past the
    /// end read silence.
    pub fn sample_interpolated(&self, position_frames: f64, channel: usize) -> f32 {
        let frames = self.frames();
        if position_frames < 0.0 || frames == 0 {
            return 0.0;
        }
        let index = position_frames.floor() as usize;
        if index >= frames {
            return 0.0;
        }
        let channel = channel.min(self.channels - 1);
        let current = self.samples[index * self.channels + channel];
        let next = if index + 1 < frames {
            self.samples[(index + 1) * self.channels + channel]
        } else {
            0.0
        };
        let frac = (position_frames - index as f64) as f32;
        current + (next - current) * frac
    }
}

/// Rate parameters applied to a live session
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionParams {
    pub speed: f64,
    pub detune_cents: f64,
}

impl SessionParams {
    /// Combined resampling ratio, the same way a Web Audio buffer source
    /// folds playbackRate and detune together.
    pub fn effective_rate(&self) -> f64 {
        self.speed * 2f64.powf(self.detune_cents / 1200.0)
    }
}

/// One continuous backend playback run
pub trait PlaybackSession {
    /// Change the playback rate without restarting
    fn set_speed(&mut self, speed: f64);

    /// Change the detune (cents) without restarting
    fn set_detune(&mut self, cents: f64);

    /// Silence the run. Further calls are no-ops.
    fn stop(&mut self);
}

/// Platform decode/playback/analysis primitives
#[allow(async_fn_in_trait)]
pub trait AudioBackend {
    type Session: PlaybackSession;

    /// Decode an encoded payload into a play-ready buffer
    fn decode(&mut self, bytes: &[u8]) -> std::result::Result<DecodedBuffer, DecodeError>;

    /// Wake the output device if it is suspended
    async fn resume(&mut self) -> Result<()>;

    /// Start playing `buffer` from `offset_secs` of buffer time
    fn start_session(
        &mut self,
        buffer: Arc<DecodedBuffer>,
        offset_secs: f64,
        params: SessionParams,
    ) -> Result<Self::Session>;

    /// Monotonic clock in seconds
    fn now(&self) -> f64;

    /// Output gain (0.0 to 1.0)
    fn set_gain(&mut self, gain: f32);

    /// Number of frequency bins the analysis stage reports
    fn frequency_bin_count(&self) -> usize;

    /// Fill `out` with the current byte magnitudes, one per bin
    fn frequency_data(&mut self, out: &mut [u8]) -> Result<()>;
}
