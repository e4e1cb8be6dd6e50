use crate::audio::{CaptureStream, WindowStatus};
use crate::config::ProtocolConfig;
use crate::error::{ModemError, Result};
use crate::spectrum::SpectralAnalyzer;
use std::time::SystemTime;

/// Lowest noise floor a calibration may report.
///
/// Digital silence would otherwise produce a floor near `MIN_LEVEL_DB` and a
/// meaningless detection threshold.
pub const MIN_NOISE_FLOOR_DB: f32 = -120.0;

/// Ambient noise estimate for the analysis band
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoiseProfile {
    /// Band level in dB below which ambient audio stays most of the time
    pub floor_db: f32,
    /// Number of windows the floor was measured from, 0 for a fixed floor
    pub windows: usize,
    pub captured_at: SystemTime,
}

impl NoiseProfile {
    /// A floor taken from configuration rather than measured
    pub fn fixed(floor_db: f32) -> Self {
        Self {
            floor_db: floor_db.max(MIN_NOISE_FLOOR_DB),
            windows: 0,
            captured_at: SystemTime::now(),
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.windows == 0
    }

    /// Minimum peak level a detection must reach to count as a tone
    pub fn threshold_db(&self, min_snr_db: f32) -> f32 {
        self.floor_db + min_snr_db
    }
}

/// Percentile of per-window band levels, linearly interpolated between ranks.
///
/// Returns `None` for an empty slice.
pub fn floor_from_levels(levels: &[f32], percentile: f32) -> Option<f32> {
    if levels.is_empty() {
        return None;
    }
    let mut sorted = levels.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let rank = (percentile.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f32;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let fraction = rank - lower as f32;
    let floor = sorted[lower] + (sorted[upper] - sorted[lower]) * fraction;

    Some(floor.max(MIN_NOISE_FLOOR_DB))
}

/// Measures the ambient band level before the receiver starts listening
#[derive(Debug, Clone)]
pub struct NoiseCalibrator {
    percentile: f32,
    fallback_floor_db: f32,
    sample_rate: u32,
}

impl NoiseCalibrator {
    pub fn new(config: &ProtocolConfig) -> Self {
        Self {
            percentile: config.noise_percentile,
            fallback_floor_db: config.fallback_noise_floor_db,
            sample_rate: config.sample_rate,
        }
    }

    pub fn fallback(&self) -> NoiseProfile {
        NoiseProfile::fixed(self.fallback_floor_db)
    }

    /// Capture `duration_seconds` of ambient audio and derive a noise profile.
    ///
    /// A calibration that yields no usable window falls back to the configured
    /// floor. Device errors other than overruns are returned.
    pub fn calibrate<S: CaptureStream>(
        &self,
        stream: &mut S,
        analyzer: &mut SpectralAnalyzer,
        duration_seconds: f32,
    ) -> Result<NoiseProfile> {
        match self.measure(stream, analyzer, duration_seconds) {
            Ok(profile) => {
                log::info!(
                    "Noise floor {:.1} dB from {} windows",
                    profile.floor_db,
                    profile.windows
                );
                Ok(profile)
            }
            Err(ModemError::CalibrationFailed(reason)) => {
                log::warn!(
                    "Calibration failed ({}), using fixed floor {:.1} dB",
                    reason,
                    self.fallback_floor_db
                );
                Ok(self.fallback())
            }
            Err(e) => Err(e),
        }
    }

    fn measure<S: CaptureStream>(
        &self,
        stream: &mut S,
        analyzer: &mut SpectralAnalyzer,
        duration_seconds: f32,
    ) -> Result<NoiseProfile> {
        let window_size = analyzer.window_size();
        let wanted = window_count(duration_seconds, self.sample_rate, window_size);
        if wanted == 0 {
            return Err(ModemError::CalibrationFailed(
                "calibration duration is zero".to_string(),
            ));
        }

        let mut window = vec![0.0f32; window_size];
        let mut levels = Vec::with_capacity(wanted);
        for _ in 0..wanted {
            match stream.read_window(&mut window) {
                Ok(WindowStatus::Ready) => {
                    let event = analyzer.analyze(&window, 0.0)?;
                    levels.push(event.band_level_db());
                }
                Ok(WindowStatus::Exhausted) => break,
                Err(ModemError::StreamOverflow) => {
                    log::warn!("Capture overrun during calibration, window dropped");
                }
                Err(e) => return Err(e),
            }
        }

        let floor_db = floor_from_levels(&levels, self.percentile).ok_or_else(|| {
            ModemError::CalibrationFailed("no ambient audio could be read".to_string())
        })?;

        Ok(NoiseProfile {
            floor_db,
            windows: levels.len(),
            captured_at: SystemTime::now(),
        })
    }
}

fn window_count(duration_seconds: f32, sample_rate: u32, window_size: usize) -> usize {
    if !(duration_seconds > 0.0) {
        return 0;
    }
    let samples = duration_seconds as f64 * sample_rate as f64;
    (samples / window_size as f64).ceil() as usize
}
