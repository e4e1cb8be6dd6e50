use crate::config::ProtocolConfig;
use crate::error::{ModemError, Result};
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::f64::consts::PI;
use std::fmt;
use std::sync::Arc;

/// Floor for dB conversions so silence maps to a finite level
pub const MIN_LEVEL_DB: f32 = -200.0;

/// One analysis window reduced to its dominant ultrasonic tone
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionEvent {
    /// Estimated peak frequency in Hz, 0.0 when the band was silent
    pub frequency: f32,
    /// Peak magnitude in dB (full-scale sine = about -6 dB)
    pub magnitude_db: f32,
    /// Peak over mean band magnitude in dB
    pub snr_db: f32,
    /// Stream time at the end of the window, in seconds
    pub timestamp: f64,
}

impl DetectionEvent {
    /// The event reported for a window with no energy in the band
    pub fn silent(timestamp: f64) -> Self {
        Self {
            frequency: 0.0,
            magnitude_db: MIN_LEVEL_DB,
            snr_db: 0.0,
            timestamp,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.frequency > 0.0
    }

    /// Mean magnitude across the band in dB
    pub fn band_level_db(&self) -> f32 {
        if self.is_valid() {
            self.magnitude_db - self.snr_db
        } else {
            MIN_LEVEL_DB
        }
    }
}

pub fn amplitude_to_db(amplitude: f32) -> f32 {
    if amplitude > 0.0 {
        (20.0 * amplitude.log10()).max(MIN_LEVEL_DB)
    } else {
        MIN_LEVEL_DB
    }
}

/// Power at a single frequency using the Goertzel algorithm
pub fn goertzel_power(samples: &[f32], frequency: f32, sample_rate: f32) -> f32 {
    let n = samples.len();
    if n == 0 {
        return 0.0;
    }
    let k = (0.5 + (n as f32 * frequency / sample_rate)).floor();
    let omega = 2.0 * std::f32::consts::PI * k / n as f32;
    let coeff = 2.0 * omega.cos();

    let mut s1 = 0.0f32;
    let mut s2 = 0.0f32;
    for &sample in samples {
        let s0 = sample + coeff * s1 - s2;
        s2 = s1;
        s1 = s0;
    }

    s1 * s1 + s2 * s2 - coeff * s1 * s2
}

/// Windowed FFT peak picker restricted to the ultrasonic band
///
/// The FFT plan, window coefficients and work buffers are built once; each
/// `analyze` call only reuses them.
pub struct SpectralAnalyzer {
    sample_rate: f32,
    window_size: usize,
    fft: Arc<dyn Fft<f32>>,
    taper: Vec<f32>,
    /// Converts raw bin magnitude to the amplitude of the underlying sine
    amplitude_scale: f32,
    buffer: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    magnitudes: Vec<f32>,
    /// Tapered copy of the window for single-tone measurements
    tapered: Vec<f32>,
    first_bin: usize,
    last_bin: usize,
}

impl fmt::Debug for SpectralAnalyzer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpectralAnalyzer")
            .field("window_size", &self.window_size)
            .field("first_bin", &self.first_bin)
            .field("last_bin", &self.last_bin)
            .finish()
    }
}

impl SpectralAnalyzer {
    pub fn new(config: &ProtocolConfig) -> Result<Self> {
        let window_size = config.window_size;
        if window_size < 4 {
            return Err(ModemError::InvalidInputSize);
        }

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(window_size);
        let scratch = vec![Complex::new(0.0, 0.0); fft.get_inplace_scratch_len()];

        // Hann taper
        let taper: Vec<f32> = (0..window_size)
            .map(|i| (0.5 * (1.0 - (2.0 * PI * i as f64 / window_size as f64).cos())) as f32)
            .collect();
        let taper_sum: f32 = taper.iter().sum();

        let bin_width = config.bin_width();
        let nyquist_bin = window_size / 2;
        let first_bin = ((config.band_low / bin_width).ceil() as usize).max(1);
        let last_bin = ((config.band_high / bin_width).floor() as usize).min(nyquist_bin - 1);
        if first_bin > last_bin {
            return Err(ModemError::InvalidConfig(
                "analysis band covers no FFT bins".to_string(),
            ));
        }

        Ok(Self {
            sample_rate: config.sample_rate as f32,
            window_size,
            fft,
            taper,
            amplitude_scale: 2.0 / taper_sum,
            buffer: vec![Complex::new(0.0, 0.0); window_size],
            scratch,
            magnitudes: vec![0.0; last_bin - first_bin + 1],
            tapered: vec![0.0; window_size],
            first_bin,
            last_bin,
        })
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Frequencies of the first and last analyzed bin
    pub fn band(&self) -> (f32, f32) {
        (self.bin_frequency(self.first_bin as f32), self.bin_frequency(self.last_bin as f32))
    }

    fn bin_frequency(&self, bin: f32) -> f32 {
        bin * self.sample_rate / self.window_size as f32
    }

    /// Find the dominant tone of one window.
    ///
    /// `timestamp` is carried into the event unchanged.
    pub fn analyze(&mut self, window: &[f32], timestamp: f64) -> Result<DetectionEvent> {
        if window.len() != self.window_size {
            return Err(ModemError::InvalidInputSize);
        }

        for ((slot, &sample), &weight) in self.buffer.iter_mut().zip(window).zip(&self.taper) {
            *slot = Complex::new(sample * weight, 0.0);
        }
        self.fft.process_with_scratch(&mut self.buffer, &mut self.scratch);

        let mut peak_index = 0;
        let mut peak = 0.0f32;
        let mut total = 0.0f32;
        for (i, magnitude) in self.magnitudes.iter_mut().enumerate() {
            let value = self.buffer[self.first_bin + i].norm() * self.amplitude_scale;
            *magnitude = value;
            total += value;
            if value > peak {
                peak = value;
                peak_index = i;
            }
        }

        if !(peak > f32::EPSILON) {
            return Ok(DetectionEvent::silent(timestamp));
        }

        let mean = total / self.magnitudes.len() as f32;
        let offset = self.interpolate_peak(peak_index);
        let frequency = self.bin_frequency((self.first_bin + peak_index) as f32 + offset);

        Ok(DetectionEvent {
            frequency,
            magnitude_db: amplitude_to_db(peak),
            snr_db: amplitude_to_db(peak) - amplitude_to_db(mean),
            timestamp,
        })
    }

    /// Parabolic fit over the log magnitudes around the peak, in bins
    fn interpolate_peak(&self, index: usize) -> f32 {
        if index == 0 || index + 1 >= self.magnitudes.len() {
            return 0.0;
        }
        let ln = |m: f32| m.max(f32::MIN_POSITIVE).ln();
        let left = ln(self.magnitudes[index - 1]);
        let center = ln(self.magnitudes[index]);
        let right = ln(self.magnitudes[index + 1]);
        let denom = left - 2.0 * center + right;
        if denom.abs() < f32::EPSILON {
            return 0.0;
        }
        (0.5 * (left - right) / denom).clamp(-0.5, 0.5)
    }

    /// Level of a single known frequency in dB, via Goertzel.
    ///
    /// Uses the same taper and amplitude scale as `analyze`, so the two are
    /// comparable.
    pub fn tone_level_db(&mut self, window: &[f32], frequency: f32) -> Result<f32> {
        if window.len() != self.window_size {
            return Err(ModemError::InvalidInputSize);
        }
        for ((slot, &sample), &weight) in self.tapered.iter_mut().zip(window).zip(&self.taper) {
            *slot = sample * weight;
        }
        let power = goertzel_power(&self.tapered, frequency, self.sample_rate);
        Ok(amplitude_to_db(power.max(0.0).sqrt() * self.amplitude_scale))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tone::ToneSynthesizer;

    fn sine(frequency: f32, amplitude: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| {
                let phase = 2.0 * PI * frequency as f64 * i as f64 / 96_000.0;
                (amplitude as f64 * phase.sin()) as f32
            })
            .collect()
    }

    #[test]
    fn test_detects_data_tone_within_tolerance() {
        let config = ProtocolConfig::canonical();
        let mut analyzer = SpectralAnalyzer::new(&config).unwrap();

        for &freq in &[18_400.0f32, 18_700.0, 20_500.0, 21_450.0, 25_500.0] {
            let event = analyzer.analyze(&sine(freq, 0.8, 2048), 0.5).unwrap();
            assert!(event.is_valid());
            assert!(
                (event.frequency - freq).abs() < 10.0,
                "expected {} Hz, got {} Hz",
                freq,
                event.frequency
            );
            assert_eq!(event.timestamp, 0.5);
        }
    }

    #[test]
    fn test_magnitude_tracks_amplitude() {
        let config = ProtocolConfig::canonical();
        let mut analyzer = SpectralAnalyzer::new(&config).unwrap();

        let loud = analyzer.analyze(&sine(20_000.0, 0.8, 2048), 0.0).unwrap();
        let quiet = analyzer.analyze(&sine(20_000.0, 0.08, 2048), 0.0).unwrap();
        assert!((loud.magnitude_db - quiet.magnitude_db - 20.0).abs() < 0.5);
        // A 0.8 sine peaks close to 20*log10(0.8) after amplitude scaling
        assert!((loud.magnitude_db - amplitude_to_db(0.8)).abs() < 1.5);
    }

    #[test]
    fn test_pure_tone_has_high_snr() {
        let config = ProtocolConfig::canonical();
        let mut analyzer = SpectralAnalyzer::new(&config).unwrap();
        let event = analyzer.analyze(&sine(22_000.0, 0.5, 2048), 0.0).unwrap();
        assert!(event.snr_db > 25.0, "snr {}", event.snr_db);
        assert!(event.band_level_db() < event.magnitude_db);
    }

    #[test]
    fn test_silence_reports_invalid_detection() {
        let config = ProtocolConfig::canonical();
        let mut analyzer = SpectralAnalyzer::new(&config).unwrap();
        let event = analyzer.analyze(&vec![0.0; 2048], 1.0).unwrap();
        assert!(!event.is_valid());
        assert_eq!(event.magnitude_db, MIN_LEVEL_DB);
        assert_eq!(event.band_level_db(), MIN_LEVEL_DB);
    }

    #[test]
    fn test_out_of_band_tone_is_not_peak() {
        let config = ProtocolConfig::canonical();
        let mut analyzer = SpectralAnalyzer::new(&config).unwrap();
        // Strong audible tone plus a weak ultrasonic one
        let mut window = sine(1_000.0, 0.9, 2048);
        for (s, u) in window.iter_mut().zip(sine(23_000.0, 0.05, 2048)) {
            *s += u;
        }
        let event = analyzer.analyze(&window, 0.0).unwrap();
        assert!((event.frequency - 23_000.0).abs() < 10.0, "got {}", event.frequency);
    }

    #[test]
    fn test_wrong_window_length_rejected() {
        let config = ProtocolConfig::canonical();
        let mut analyzer = SpectralAnalyzer::new(&config).unwrap();
        assert!(matches!(
            analyzer.analyze(&[0.0; 100], 0.0),
            Err(ModemError::InvalidInputSize)
        ));
    }

    #[test]
    fn test_goertzel_separates_adjacent_symbols() {
        let config = ProtocolConfig::canonical();
        let mut analyzer = SpectralAnalyzer::new(&config).unwrap();
        let synth = ToneSynthesizer::new(96_000, 0.8);
        let tone = synth.tone(20_500.0, 0.08);
        let window = &tone[2048..4096];

        let on = analyzer.tone_level_db(window, 20_500.0).unwrap();
        let neighbour = analyzer.tone_level_db(window, 20_600.0).unwrap();
        assert!(on - neighbour > 15.0, "on {} neighbour {}", on, neighbour);

        // The shared buffer carries nothing over between calls
        let quiet = vec![0.0; 2048];
        assert_eq!(analyzer.tone_level_db(&quiet, 20_500.0).unwrap(), MIN_LEVEL_DB);
        assert_eq!(analyzer.tone_level_db(window, 20_500.0).unwrap(), on);
        assert!(matches!(
            analyzer.tone_level_db(&quiet[..100], 20_500.0),
            Err(ModemError::InvalidInputSize)
        ));
    }

    #[test]
    fn test_goertzel_power_empty() {
        assert_eq!(goertzel_power(&[], 20_000.0, 96_000.0), 0.0);
    }
}
