// Audio output using cpal
// One voice slot rendered at a variable rate, a gain stage, and an analyser tap

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Stream, StreamConfig};
use parking_lot::Mutex;
use ringbuf::{HeapRb, traits::{Consumer, Producer, Split}};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

use super::analyser::{AnalyserConfig, FrequencyAnalyser};
use super::backend::{AudioBackend, DecodedBuffer, PlaybackSession, SessionParams};
use super::decoder::{decode_bytes, DecodeOptions};
use crate::error::{DecodeError, PlayerError, Result};

const TAP_BUFFER_SIZE: usize = 48000 / 4; // ~250ms of mono at 48kHz

type TapProducer = ringbuf::HeapProd<f32>;
type TapConsumer = ringbuf::HeapCons<f32>;

/// The buffer currently being rendered
struct Voice {
    id: u64,
    buffer: Arc<DecodedBuffer>,
    /// Read position in source frames
    cursor: f64,
    params: SessionParams,
}

/// State shared with the audio callback
struct OutputShared {
    voice: Mutex<Option<Voice>>,
    gain: Mutex<f32>,
}

pub struct CpalBackend {
    stream: Stream,
    shared: Arc<OutputShared>,
    tap: TapConsumer,
    analyser: FrequencyAnalyser,
    tap_scratch: Vec<f32>,
    decode_options: DecodeOptions,
    sample_rate: u32,
    channels: u16,
    started: Instant,
    running: bool,
    next_voice_id: u64,
}

impl CpalBackend {
    /// Open the default output device. The stream starts suspended.
    pub fn new(decode_options: DecodeOptions, analyser_config: AnalyserConfig) -> Result<Self> {
        let analyser = FrequencyAnalyser::new(analyser_config)?;

        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| PlayerError::BackendUnavailable("No output device available".into()))?;

        let config = device.default_output_config().map_err(|e| {
            PlayerError::BackendUnavailable(format!("Failed to get default output config: {}", e))
        })?;

        let sample_rate = config.sample_rate().0;
        let channels = config.channels();

        info!(
            "Audio: {} @ {}Hz x{}",
            device.name().unwrap_or_else(|_| "Unknown".to_string()),
            sample_rate,
            channels
        );

        let shared = Arc::new(OutputShared {
            voice: Mutex::new(None),
            gain: Mutex::new(1.0),
        });

        let (tap_producer, tap) = HeapRb::<f32>::new(TAP_BUFFER_SIZE).split();

        let stream = match config.sample_format() {
            cpal::SampleFormat::F32 => {
                Self::build_stream::<f32>(&device, &config.into(), Arc::clone(&shared), tap_producer)?
            }
            cpal::SampleFormat::I16 => {
                Self::build_stream::<i16>(&device, &config.into(), Arc::clone(&shared), tap_producer)?
            }
            cpal::SampleFormat::U16 => {
                Self::build_stream::<u16>(&device, &config.into(), Arc::clone(&shared), tap_producer)?
            }
            format => {
                return Err(PlayerError::BackendUnavailable(format!(
                    "Unsupported sample format: {:?}",
                    format
                )))
            }
        };

        // Some hosts start streams on creation
        if let Err(e) = stream.pause() {
            debug!("Could not suspend new stream: {}", e);
        }

        Ok(Self {
            stream,
            shared,
            tap,
            analyser,
            tap_scratch: vec![0.0; TAP_BUFFER_SIZE],
            decode_options,
            sample_rate,
            channels,
            started: Instant::now(),
            running: false,
            next_voice_id: 1,
        })
    }

    fn build_stream<T: cpal::SizedSample + cpal::FromSample<f32>>(
        device: &cpal::Device,
        config: &StreamConfig,
        shared: Arc<OutputShared>,
        mut tap: TapProducer,
    ) -> Result<Stream> {
        let out_channels = usize::from(config.channels.max(1));
        let out_rate = config.sample_rate.0 as f64;

        let stream = device
            .build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    let gain = *shared.gain.lock();
                    let mut voice = shared.voice.lock();

                    for frame in data.chunks_mut(out_channels) {
                        let mut mix = 0.0f32;
                        match voice.as_mut() {
                            Some(v) if v.cursor < v.buffer.frames() as f64 => {
                                for (ch, sample) in frame.iter_mut().enumerate() {
                                    let value = v.buffer.sample_interpolated(v.cursor, ch) * gain;
                                    *sample = T::from_sample(value);
                                    mix += value;
                                }
                                v.cursor += v.params.effective_rate()
                                    * v.buffer.sample_rate() as f64
                                    / out_rate;
                            }
                            _ => {
                                for sample in frame.iter_mut() {
                                    *sample = T::from_sample(0.0f32);
                                }
                            }
                        }
                        // Analyser may lag behind; dropping samples is fine
                        let _ = tap.try_push(mix / out_channels as f32);
                    }
                },
                move |err| {
                    error!("Audio output error: {}", err);
                },
                None,
            )
            .map_err(|e| {
                PlayerError::BackendUnavailable(format!("Failed to build output stream: {}", e))
            })?;

        Ok(stream)
    }
}

pub struct CpalSession {
    id: u64,
    shared: Arc<OutputShared>,
}

impl CpalSession {
    fn with_voice(&self, f: impl FnOnce(&mut Voice)) {
        let mut voice = self.shared.voice.lock();
        if let Some(v) = voice.as_mut().filter(|v| v.id == self.id) {
            f(v);
        }
    }
}

impl PlaybackSession for CpalSession {
    fn set_speed(&mut self, speed: f64) {
        self.with_voice(|v| v.params.speed = speed);
    }

    fn set_detune(&mut self, cents: f64) {
        self.with_voice(|v| v.params.detune_cents = cents);
    }

    fn stop(&mut self) {
        let mut voice = self.shared.voice.lock();
        if voice.as_ref().is_some_and(|v| v.id == self.id) {
            *voice = None;
        }
    }
}

impl AudioBackend for CpalBackend {
    type Session = CpalSession;

    fn decode(&mut self, bytes: &[u8]) -> std::result::Result<DecodedBuffer, DecodeError> {
        decode_bytes(bytes, &self.decode_options)
    }

    async fn resume(&mut self) -> Result<()> {
        if self.running {
            return Ok(());
        }
        self.stream
            .play()
            .map_err(|e| PlayerError::BackendUnavailable(format!("Failed to start stream: {}", e)))?;
        self.running = true;
        debug!("Output stream resumed");
        Ok(())
    }

    fn start_session(
        &mut self,
        buffer: Arc<DecodedBuffer>,
        offset_secs: f64,
        params: SessionParams,
    ) -> Result<CpalSession> {
        let id = self.next_voice_id;
        self.next_voice_id += 1;

        let cursor = offset_secs.max(0.0) * buffer.sample_rate() as f64;
        debug!(
            "Voice {}: {}Hz x{} -> {}Hz x{} from {:.3}s at {:.3}x",
            id,
            buffer.sample_rate(),
            buffer.channels(),
            self.sample_rate,
            self.channels,
            offset_secs,
            params.effective_rate()
        );
        *self.shared.voice.lock() = Some(Voice {
            id,
            buffer,
            cursor,
            params,
        });
        self.analyser.clear();

        Ok(CpalSession {
            id,
            shared: Arc::clone(&self.shared),
        })
    }

    fn now(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    /// Set the output volume (0.0 to 1.0)
    fn set_gain(&mut self, gain: f32) {
        *self.shared.gain.lock() = gain.clamp(0.0, 1.0);
    }

    fn frequency_bin_count(&self) -> usize {
        self.analyser.bin_count()
    }

    fn frequency_data(&mut self, out: &mut [u8]) -> Result<()> {
        loop {
            let read = self.tap.pop_slice(&mut self.tap_scratch);
            if read == 0 {
                break;
            }
            self.analyser.push_samples(&self.tap_scratch[..read]);
        }
        self.analyser.write_byte_frequency_data(out);
        Ok(())
    }
}
