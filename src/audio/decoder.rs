// Audio decoder using Symphonia
// Decodes an in-memory clip payload to interleaved f32 PCM

use std::io::Cursor;

use serde::{Deserialize, Serialize};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

use super::backend::DecodedBuffer;
use super::clip::sniff_container;
use crate::error::DecodeError;

/// Layout used when a payload has no container and is read as raw PCM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawPcmFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for RawPcmFormat {
    /// Speech services commonly return 24 kHz mono s16le
    fn default() -> Self {
        Self {
            sample_rate: 24_000,
            channels: 1,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DecodeOptions {
    /// Read unrecognised payloads as s16le PCM in this layout
    pub raw_pcm: Option<RawPcmFormat>,
}

pub struct AudioDecoder {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
    channels: usize,
}

impl AudioDecoder {
    /// Probe an encoded payload and prepare for decoding
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, DecodeError> {
        let mut hint = Hint::new();
        if let Some(container) = sniff_container(&bytes) {
            hint.with_extension(container.extension());
        }

        let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| DecodeError::UnsupportedFormat(e.to_string()))?;

        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(DecodeError::NoAudioTrack)?;

        let track_id = track.id;
        let sample_rate = track.codec_params.sample_rate.unwrap_or(44100);
        let channels = track.codec_params.channels.map(|c| c.count()).unwrap_or(1);

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| DecodeError::UnsupportedFormat(e.to_string()))?;

        Ok(Self {
            format,
            decoder,
            track_id,
            sample_rate,
            channels,
        })
    }

    /// Decode the next packet into interleaved samples.
    /// Returns None at end of stream.
    pub fn decode_next(&mut self) -> Result<Option<Vec<f32>>, DecodeError> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(None);
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.decoder.reset();
                    continue;
                }
                Err(e) => return Err(DecodeError::Corrupt(e.to_string())),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    let spec = *decoded.spec();
                    self.sample_rate = spec.rate;
                    self.channels = spec.channels.count();

                    let mut samples = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                    samples.copy_interleaved_ref(decoded);
                    return Ok(Some(samples.samples().to_vec()));
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    warn!("Skipping undecodable packet: {}", e);
                    continue;
                }
                Err(e) => return Err(DecodeError::Corrupt(e.to_string())),
            }
        }
    }

    /// Decode every remaining packet into a single buffer
    pub fn decode_to_end(mut self) -> Result<DecodedBuffer, DecodeError> {
        let mut samples = Vec::new();
        while let Some(chunk) = self.decode_next()? {
            samples.extend_from_slice(&chunk);
        }
        if samples.is_empty() {
            return Err(DecodeError::Empty);
        }
        Ok(DecodedBuffer::new(self.sample_rate, self.channels, samples))
    }
}

/// Decode a whole payload, falling back to raw PCM when configured
pub fn decode_bytes(bytes: &[u8], options: &DecodeOptions) -> Result<DecodedBuffer, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }

    match AudioDecoder::from_bytes(bytes.to_vec()) {
        Ok(decoder) => {
            let buffer = decoder.decode_to_end()?;
            debug!(
                "Decoded {} frames @ {}Hz x{}",
                buffer.frames(),
                buffer.sample_rate(),
                buffer.channels()
            );
            Ok(buffer)
        }
        // A recognised but unreadable container is a decode error, never raw PCM
        Err(DecodeError::UnsupportedFormat(reason)) => match options.raw_pcm {
            Some(format) if sniff_container(bytes).is_none() => {
                debug!("No container recognised ({}), reading as raw PCM", reason);
                decode_raw_pcm(bytes, format)
            }
            _ => Err(DecodeError::UnsupportedFormat(reason)),
        },
        Err(e) => Err(e),
    }
}

/// Interpret bytes as interleaved signed 16-bit little-endian PCM
pub fn decode_raw_pcm(bytes: &[u8], format: RawPcmFormat) -> Result<DecodedBuffer, DecodeError> {
    let channels = usize::from(format.channels.max(1));
    let frame_bytes = 2 * channels;
    if bytes.len() < frame_bytes {
        return Err(DecodeError::Empty);
    }
    if bytes.len() % frame_bytes != 0 {
        warn!(
            "Raw PCM payload has {} trailing bytes, ignoring them",
            bytes.len() % frame_bytes
        );
    }

    let samples = bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect();

    Ok(DecodedBuffer::new(format.sample_rate, channels, samples))
}
