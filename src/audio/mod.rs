// Audio playback module
// Uses Symphonia for decoding, cpal for output and rustfft for analysis

pub mod analyser;
pub mod backend;
pub mod clip;
pub mod decoder;
pub mod output;
pub mod player;

pub use backend::{AudioBackend, DecodedBuffer, PlaybackSession, SessionParams};
pub use clip::AudioClip;
pub use output::CpalBackend;
pub use player::{PlaybackController, PlaybackParams, PlaybackSnapshot, PlayerEvent, PlayerStatus};
