// Settings module
// JSON settings file with defaults for playback, visualizer, decoding and downloads

#[allow(clippy::module_inception)]
mod settings;

pub use settings::*;
