// Real-time frequency analysis
// Mirrors a browser AnalyserNode: Blackman window, FFT, smoothing, dB -> byte

use std::collections::VecDeque;
use std::f32::consts::PI;
use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use serde::{Deserialize, Serialize};

use crate::error::{PlayerError, Result};

/// Analysis stage parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnalyserConfig {
    /// Window size in samples (power of two, 32..=32768)
    pub fft_size: usize,
    /// Time smoothing constant (0.0 = none, 1.0 = frozen)
    pub smoothing: f32,
    /// Magnitude mapped to byte 0
    pub min_db: f32,
    /// Magnitude mapped to byte 255
    pub max_db: f32,
}

impl Default for AnalyserConfig {
    fn default() -> Self {
        Self {
            fft_size: 64,
            smoothing: 0.8,
            min_db: -100.0,
            max_db: -30.0,
        }
    }
}

impl AnalyserConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.fft_size.is_power_of_two() || !(32..=32768).contains(&self.fft_size) {
            return Err(PlayerError::InvalidParameter(format!(
                "FFT size must be a power of 2 between 32 and 32768, got {}",
                self.fft_size
            )));
        }
        if !(0.0..=1.0).contains(&self.smoothing) {
            return Err(PlayerError::InvalidParameter(format!(
                "Smoothing must be within 0..=1, got {}",
                self.smoothing
            )));
        }
        if self.min_db >= self.max_db {
            return Err(PlayerError::InvalidParameter(format!(
                "min_db ({}) must be below max_db ({})",
                self.min_db, self.max_db
            )));
        }
        Ok(())
    }

    pub fn bin_count(&self) -> usize {
        self.fft_size / 2
    }
}

pub struct FrequencyAnalyser {
    config: AnalyserConfig,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    /// Most recent `fft_size` time-domain samples
    history: VecDeque<f32>,
    smoothed: Vec<f32>,
    scratch: Vec<Complex<f32>>,
}

impl FrequencyAnalyser {
    pub fn new(config: AnalyserConfig) -> Result<Self> {
        config.validate()?;
        let size = config.fft_size;

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(size);

        Ok(Self {
            config,
            fft,
            window: (0..size).map(|i| blackman_window(i, size)).collect(),
            history: std::iter::repeat(0.0).take(size).collect(),
            smoothed: vec![0.0; config.bin_count()],
            scratch: vec![Complex::new(0.0, 0.0); size],
        })
    }

    pub fn bin_count(&self) -> usize {
        self.config.bin_count()
    }

    /// Append time-domain samples, keeping only the latest window
    pub fn push_samples(&mut self, samples: &[f32]) {
        let size = self.config.fft_size;
        let skip = samples.len().saturating_sub(size);
        for &sample in &samples[skip..] {
            if self.history.len() == size {
                self.history.pop_front();
            }
            self.history.push_back(sample);
        }
    }

    /// Forget buffered samples and smoothing state
    pub fn clear(&mut self) {
        self.history.iter_mut().for_each(|s| *s = 0.0);
        self.smoothed.iter_mut().for_each(|s| *s = 0.0);
    }

    /// Analyse the current window and write one byte per bin into `out`.
    /// Extra output slots are zeroed.
    pub fn write_byte_frequency_data(&mut self, out: &mut [u8]) {
        let size = self.config.fft_size;
        for (i, (slot, &sample)) in self.scratch.iter_mut().zip(self.history.iter()).enumerate() {
            *slot = Complex::new(sample * self.window[i], 0.0);
        }

        self.fft.process(&mut self.scratch);

        let tau = self.config.smoothing;
        let range = self.config.max_db - self.config.min_db;
        for (k, slot) in out.iter_mut().enumerate() {
            if k >= self.smoothed.len() {
                *slot = 0;
                continue;
            }
            let magnitude = self.scratch[k].norm() / size as f32;
            self.smoothed[k] = tau * self.smoothed[k] + (1.0 - tau) * magnitude;

            let db = 20.0 * self.smoothed[k].log10();
            let scaled = (255.0 / range) * (db - self.config.min_db);
            *slot = if scaled.is_finite() {
                scaled.clamp(0.0, 255.0).floor() as u8
            } else {
                0
            };
        }
    }
}

/// Blackman window (alpha = 0.16)
pub fn blackman_window(index: usize, size: usize) -> f32 {
    let x = index as f32 / size as f32;
    0.42 - 0.5 * (2.0 * PI * x).cos() + 0.08 * (4.0 * PI * x).cos()
}
