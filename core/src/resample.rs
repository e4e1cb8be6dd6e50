//! Sample-format helpers for recordings that do not match the protocol rate
//! Uses linear interpolation, which is adequate for tones well below Nyquist

use crate::error::{ModemError, Result};

/// Mix interleaved multi-channel audio down to mono by averaging the channels
///
/// # Arguments
/// * `samples` - Interleaved audio samples [c0, c1, ..., c0, c1, ...]
/// * `channels` - Number of interleaved channels
///
/// # Errors
/// `InvalidInputSize` if `channels` is zero or the sample count is not a
/// whole number of frames
pub fn downmix(samples: &[f32], channels: usize) -> Result<Vec<f32>> {
    if channels == 0 || samples.len() % channels != 0 {
        return Err(ModemError::InvalidInputSize);
    }
    if channels == 1 {
        return Ok(samples.to_vec());
    }

    Ok(samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect())
}

/// Resample audio to a target sample rate using linear interpolation
///
/// # Arguments
/// * `samples` - Input audio samples
/// * `from_rate` - Current sample rate in Hz
/// * `to_rate` - Target sample rate in Hz
///
/// # Returns
/// Resampled audio at the target sample rate
///
/// # Example
/// ```ignore
/// let audio_48k = vec![0.1, 0.2, 0.3, ...]; // recording at 48kHz
/// let audio_96k = resample_audio(&audio_48k, 48000, 96000);
/// ```
pub fn resample_audio(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }

    // Positions in f64 so long recordings keep sub-sample accuracy
    let ratio = to_rate as f64 / from_rate as f64;
    let new_length = ((samples.len() as f64) * ratio).ceil() as usize;
    let mut resampled = Vec::with_capacity(new_length);

    for i in 0..new_length {
        let src_idx = i as f64 / ratio;
        let src_idx_floor = (src_idx.floor() as usize).min(samples.len() - 1);
        let src_idx_ceil = src_idx_floor + 1;
        let fraction = (src_idx - src_idx_floor as f64) as f32;

        let interpolated = if src_idx_ceil < samples.len() {
            samples[src_idx_floor] * (1.0 - fraction) + samples[src_idx_ceil] * fraction
        } else {
            samples[src_idx_floor]
        };

        resampled.push(interpolated);
    }

    resampled
}
