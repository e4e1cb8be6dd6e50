use std::f64::consts::PI;

/// Fraction of each tone spent ramping in and out
const TONE_EDGE_TAPER_RATIO: f32 = 0.08;

/// Minimum attack/decay length so short tones do not click
const TONE_MIN_TAPER_SAMPLES: usize = 64;

/// Raised-cosine window that ramps amplitude at both edges and is flat in between
pub fn raised_cosine_window(len: usize, taper_len: usize) -> Vec<f32> {
    let taper = taper_len.min(len / 2);
    let mut window = vec![1.0; len];
    for i in 0..taper {
        let progress = i as f64 / taper as f64;
        let value = (PI * progress / 2.0).sin().powi(2) as f32;
        window[i] = value;
        window[len - 1 - i] = value;
    }
    window
}

/// Renders single-frequency tones and silence at a fixed sample rate
#[derive(Debug, Clone)]
pub struct ToneSynthesizer {
    sample_rate: u32,
    amplitude: f32,
}

impl ToneSynthesizer {
    pub fn new(sample_rate: u32, amplitude: f32) -> Self {
        Self {
            sample_rate,
            amplitude,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn sample_count(&self, duration: f32) -> usize {
        (duration as f64 * self.sample_rate as f64).round().max(0.0) as usize
    }

    /// A tapered sine at `frequency` lasting `duration` seconds
    pub fn tone(&self, frequency: f32, duration: f32) -> Vec<f32> {
        let mut samples = Vec::new();
        self.append_tone(&mut samples, frequency, duration);
        samples
    }

    pub fn append_tone(&self, out: &mut Vec<f32>, frequency: f32, duration: f32) {
        let len = self.sample_count(duration);
        let taper = taper_length(len);
        let window = raised_cosine_window(len, taper);
        let angular = 2.0 * PI * frequency as f64 / self.sample_rate as f64;

        out.reserve(len);
        out.extend(window.iter().enumerate().map(|(i, &weight)| {
            (angular * i as f64).sin() as f32 * self.amplitude * weight
        }));
    }

    pub fn append_silence(&self, out: &mut Vec<f32>, duration: f32) {
        let len = self.sample_count(duration);
        out.resize(out.len() + len, 0.0);
    }
}

fn taper_length(len: usize) -> usize {
    let taper = ((len as f32) * TONE_EDGE_TAPER_RATIO).round() as usize;
    taper.max(TONE_MIN_TAPER_SAMPLES).min(len / 2)
}
