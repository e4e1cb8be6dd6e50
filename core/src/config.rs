use crate::error::{ModemError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Every tunable of the modem in one place.
///
/// The same value must be handed to the transmitter and the receiver; both
/// derive their symbol table, tone lengths and thresholds from it. Fields left
/// out of a JSON config file fall back to the canonical values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Sample rate in Hz (must place the whole band below Nyquist)
    pub sample_rate: u32,
    /// Analysis window length in samples, one FFT per window
    pub window_size: usize,
    /// Duration of data and SYNC tones in seconds
    pub symbol_duration: f32,
    /// Duration of START and END tones in seconds
    pub control_duration: f32,
    /// Silence after every tone in seconds
    pub symbol_gap: f32,
    /// Peak tone amplitude (0.0-1.0)
    pub amplitude: f32,
    /// Frequency of the first alphabet symbol in Hz
    pub base_frequency: f32,
    /// Spacing between adjacent alphabet symbols in Hz
    pub frequency_step: f32,
    pub start_frequency: f32,
    pub sync_frequency: f32,
    pub end_frequency: f32,
    /// Lower edge of the analysis band in Hz
    pub band_low: f32,
    /// Upper edge of the analysis band in Hz
    pub band_high: f32,
    /// Maximum distance in Hz between a detection and a table entry
    pub tolerance_hz: f32,
    /// Minimum peak-to-band-mean ratio in dB
    pub min_snr_db: f32,
    /// Consecutive windows a frequency must hold before it is confirmed
    pub persistence_frames: usize,
    /// Cooldown before the last confirmed symbol may be confirmed again
    pub debounce_seconds: f32,
    /// Frequency distance under which a detection counts as a repeat
    pub debounce_hz: f32,
    /// Mid-frame silence after which a partial frame is dropped
    pub idle_timeout_seconds: f32,
    /// Ambient capture before listening; 0 skips calibration
    pub calibration_seconds: f32,
    /// Percentile of the ambient band levels used as the noise floor
    pub noise_percentile: f32,
    /// Noise floor used when calibration is skipped or fails
    pub fallback_noise_floor_db: f32,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            sample_rate: 96_000,
            window_size: 2048,
            symbol_duration: 0.08,
            control_duration: 0.16,
            symbol_gap: 0.05,
            amplitude: 0.8,
            base_frequency: 18_700.0,
            frequency_step: 100.0,
            start_frequency: 18_500.0,
            sync_frequency: 18_600.0,
            end_frequency: 18_400.0,
            band_low: 18_000.0,
            band_high: 26_000.0,
            tolerance_hz: 50.0,
            min_snr_db: 10.0,
            persistence_frames: 2,
            debounce_seconds: 0.04,
            debounce_hz: 50.0,
            idle_timeout_seconds: 1.0,
            calibration_seconds: 1.0,
            noise_percentile: 95.0,
            fallback_noise_floor_db: -50.0,
        }
    }
}

impl ProtocolConfig {
    /// The canonical parameter set shared by every transmitter and receiver
    pub fn canonical() -> Self {
        Self::default()
    }

    /// Parse a JSON document and validate it
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check the timing, band and threshold constraints.
    ///
    /// Frequency-table collisions are checked separately when the
    /// `SymbolTable` is built.
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(invalid("sample rate must be positive"));
        }
        if self.window_size < 64 {
            return Err(invalid("window size must be at least 64 samples"));
        }
        if !(self.symbol_duration > 0.0) || !(self.control_duration > 0.0) {
            return Err(invalid("tone durations must be positive"));
        }
        if self.control_duration < 1.5 * self.symbol_duration {
            return Err(invalid(
                "control duration must be at least 1.5x the symbol duration",
            ));
        }
        if self.symbol_gap < 0.0 {
            return Err(invalid("symbol gap cannot be negative"));
        }
        // Two identical symbols in a row are only separable if a full window
        // of silence falls between them.
        if self.samples_for(self.symbol_gap) < 2 * self.window_size {
            return Err(invalid("symbol gap must span at least two analysis windows"));
        }
        if !(self.amplitude > 0.0 && self.amplitude <= 1.0) {
            return Err(invalid("amplitude must be in (0, 1]"));
        }
        if !(self.frequency_step > 0.0) {
            return Err(invalid("frequency step must be positive"));
        }
        if !(self.tolerance_hz > 0.0) || self.tolerance_hz > self.frequency_step / 2.0 {
            return Err(invalid("tolerance must be positive and at most half the step"));
        }
        if self.band_low >= self.band_high {
            return Err(invalid("analysis band is empty"));
        }
        if self.band_high >= self.nyquist() {
            return Err(invalid("analysis band exceeds the Nyquist frequency"));
        }
        if !self.min_snr_db.is_finite() || !self.fallback_noise_floor_db.is_finite() {
            return Err(invalid("SNR threshold and fallback floor must be finite"));
        }
        if self.persistence_frames == 0 {
            return Err(invalid("persistence needs at least one frame"));
        }
        if self.debounce_seconds < 0.0 || self.debounce_hz < 0.0 {
            return Err(invalid("debounce window cannot be negative"));
        }
        if !(self.idle_timeout_seconds > 0.0) {
            return Err(invalid("idle timeout must be positive"));
        }
        if self.calibration_seconds < 0.0 {
            return Err(invalid("calibration duration cannot be negative"));
        }
        if !(self.noise_percentile > 0.0 && self.noise_percentile <= 100.0) {
            return Err(invalid("noise percentile must be in (0, 100]"));
        }
        Ok(())
    }

    pub fn nyquist(&self) -> f32 {
        self.sample_rate as f32 / 2.0
    }

    /// Convert a duration in seconds to a sample count at the configured rate
    pub fn samples_for(&self, seconds: f32) -> usize {
        (seconds as f64 * self.sample_rate as f64).round() as usize
    }

    /// Duration of one analysis window in seconds
    pub fn window_seconds(&self) -> f64 {
        self.window_size as f64 / self.sample_rate as f64
    }

    /// Frequency resolution of one FFT bin in Hz
    pub fn bin_width(&self) -> f32 {
        self.sample_rate as f32 / self.window_size as f32
    }
}

fn invalid(msg: &str) -> ModemError {
    ModemError::InvalidConfig(msg.to_string())
}
