// Settings management and persistence
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::audio::analyser::AnalyserConfig;
use crate::audio::decoder::{DecodeOptions, RawPcmFormat};
use crate::audio::player::{validate_pitch, validate_speed, validate_volume};
use crate::error::{PlayerError, Result};
use crate::visualizer::{parse_hex_color, VisualStyle};

/// Parameters applied when a player starts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackDefaults {
    pub speed: f64,  // 0.5-2.0
    pub pitch: f64,  // -10 to 10
    pub volume: f32, // 0.0-1.0
}

impl Default for PlaybackDefaults {
    fn default() -> Self {
        Self {
            speed: 1.0,
            pitch: 0.0,
            volume: 1.0,
        }
    }
}

/// Visualizer canvas, analyser and colors
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualizerSettings {
    pub width: u32,
    pub height: u32,
    pub fft_size: usize,
    pub smoothing: f32,
    pub min_db: f32,
    pub max_db: f32,
    pub low_color: String,  // Hex color code e.g. "#7000ff"
    pub high_color: String,
    pub baseline_color: String,
    pub baseline_alpha: f32,
    pub frame_interval_ms: u64,
}

impl Default for VisualizerSettings {
    fn default() -> Self {
        let analyser = AnalyserConfig::default();
        Self {
            width: 600,
            height: 96,
            fft_size: analyser.fft_size,
            smoothing: analyser.smoothing,
            min_db: analyser.min_db,
            max_db: analyser.max_db,
            low_color: "#7000ff".to_string(),
            high_color: "#00f0ff".to_string(),
            baseline_color: "#00f0ff".to_string(),
            baseline_alpha: 0.3,
            frame_interval_ms: 16,
        }
    }
}

/// Payload decoding
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodingSettings {
    /// Treat payloads without a container as raw s16le PCM
    pub raw_pcm_fallback: bool,
    pub raw_pcm: RawPcmFormat,
}

/// Where downloaded clips go
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadSettings {
    pub directory: Option<PathBuf>, // None = current directory
    pub file_prefix: String,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            directory: None,
            file_prefix: "neonvoice".to_string(),
        }
    }
}

/// Main player settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerSettings {
    pub version: i32, // Settings schema version for future migrations
    pub playback: PlaybackDefaults,
    pub visualizer: VisualizerSettings,
    pub decoding: DecodingSettings,
    pub download: DownloadSettings,
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self {
            version: 1,
            playback: PlaybackDefaults::default(),
            visualizer: VisualizerSettings::default(),
            decoding: DecodingSettings::default(),
            download: DownloadSettings::default(),
        }
    }
}

impl PlayerSettings {
    /// Per-user settings file, e.g. `~/.config/neonvoice/settings.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("neonvoice").join("settings.json"))
    }

    /// Load settings from file, or return defaults if file doesn't exist
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("No settings file at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .map_err(|e| PlayerError::Settings(format!("Failed to read settings file: {}", e)))?;

        let settings: PlayerSettings = serde_json::from_str(&content)
            .map_err(|e| PlayerError::Settings(format!("Failed to parse settings: {}", e)))?;

        settings.validate()?;

        info!("Loaded settings from {:?}", path);
        Ok(settings)
    }

    /// Save settings to file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| PlayerError::Settings(format!("Failed to serialize settings: {}", e)))?;

        fs::write(path, content)?;

        info!("Saved settings to {:?}", path);
        Ok(())
    }

    /// Reject values the player would refuse at runtime
    pub fn validate(&self) -> Result<()> {
        let invalid = |e: PlayerError| PlayerError::Settings(e.to_string());

        validate_speed(self.playback.speed).map_err(invalid)?;
        validate_pitch(self.playback.pitch).map_err(invalid)?;
        validate_volume(self.playback.volume).map_err(invalid)?;
        self.analyser_config().validate().map_err(invalid)?;

        let v = &self.visualizer;
        if v.width == 0 || v.height == 0 {
            return Err(PlayerError::Settings(format!(
                "Visualizer canvas must be non-empty, got {}x{}",
                v.width, v.height
            )));
        }
        if v.frame_interval_ms == 0 {
            return Err(PlayerError::Settings("Frame interval must be > 0 ms".into()));
        }
        if self.decoding.raw_pcm.sample_rate == 0 || self.decoding.raw_pcm.channels == 0 {
            return Err(PlayerError::Settings(
                "Raw PCM layout needs a sample rate and at least one channel".into(),
            ));
        }
        Ok(())
    }

    pub fn analyser_config(&self) -> AnalyserConfig {
        AnalyserConfig {
            fft_size: self.visualizer.fft_size,
            smoothing: self.visualizer.smoothing,
            min_db: self.visualizer.min_db,
            max_db: self.visualizer.max_db,
        }
    }

    pub fn decode_options(&self) -> DecodeOptions {
        DecodeOptions {
            raw_pcm: self
                .decoding
                .raw_pcm_fallback
                .then_some(self.decoding.raw_pcm),
        }
    }

    /// Canvas style, falling back to the stock palette for unreadable colors
    pub fn visual_style(&self) -> VisualStyle {
        let stock = VisualStyle::default();
        let v = &self.visualizer;

        let color = |text: &str, fallback: [u8; 3], name: &str| {
            parse_hex_color(text).unwrap_or_else(|| {
                warn!("Invalid {} color {:?}, using default", name, text);
                fallback
            })
        };

        let [r, g, b] = color(
            &v.baseline_color,
            [stock.baseline_color[0], stock.baseline_color[1], stock.baseline_color[2]],
            "baseline",
        );
        let alpha = (v.baseline_alpha.clamp(0.0, 1.0) * 255.0).round() as u8;

        VisualStyle {
            width: v.width,
            height: v.height,
            low_color: color(&v.low_color, stock.low_color, "low"),
            high_color: color(&v.high_color, stock.high_color, "high"),
            baseline_color: [r, g, b, alpha],
            ..stock
        }
    }

    pub fn download_dir(&self) -> PathBuf {
        self.download
            .directory
            .clone()
            .unwrap_or_else(|| PathBuf::from("."))
    }
}
