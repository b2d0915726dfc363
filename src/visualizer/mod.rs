// Frequency visualizer
// Renders analyser output into an RGBA canvas the host can display or save

pub mod renderer;

pub use renderer::{parse_hex_color, SpectrumRenderer, VisualStyle};
