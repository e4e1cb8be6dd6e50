//! Boundary to the audio I/O layer
//!
//! Real capture and playback live outside this crate. The receiver only needs
//! something that opens a stream of fixed-size windows, and the modulator only
//! needs something that plays a buffer to completion.

use crate::error::{ModemError, Result};
use std::collections::VecDeque;

/// Outcome of one blocking window read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowStatus {
    /// The window buffer was filled with fresh samples
    Ready,
    /// The source has no more audio; the stream is finished
    Exhausted,
}

/// An open capture stream, closed when dropped
pub trait CaptureStream {
    /// Block until `window` is filled with the next samples in capture order.
    ///
    /// An overrun is reported as `ModemError::StreamOverflow`; the caller may
    /// keep reading after it.
    fn read_window(&mut self, window: &mut [f32]) -> Result<WindowStatus>;
}

/// A device able to open capture streams
pub trait CaptureDevice {
    type Stream: CaptureStream;

    fn open_capture(&mut self, sample_rate: u32, window_size: usize) -> Result<Self::Stream>;
}

/// A device able to play a sample buffer
pub trait PlaybackDevice {
    /// Play `samples` and return once playback has completed
    fn play(&mut self, samples: &[f32], sample_rate: u32) -> Result<()>;
}

/// Capture device backed by a recorded buffer
///
/// Each call to `open_capture` replays the buffer from the start. Overruns can
/// be injected at given window indices to exercise the receiver's recovery.
#[derive(Debug, Clone, Default)]
pub struct MemoryCapture {
    samples: Vec<f32>,
    sample_rate: Option<u32>,
    overflow_windows: Vec<usize>,
}

impl MemoryCapture {
    pub fn new(samples: Vec<f32>) -> Self {
        Self {
            samples,
            sample_rate: None,
            overflow_windows: Vec::new(),
        }
    }

    /// Refuse to open unless the requested rate matches
    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = Some(sample_rate);
        self
    }

    /// Report an overrun instead of delivering these windows
    pub fn with_overflow_at(mut self, windows: &[usize]) -> Self {
        self.overflow_windows = windows.to_vec();
        self
    }
}

impl CaptureDevice for MemoryCapture {
    type Stream = MemoryStream;

    fn open_capture(&mut self, sample_rate: u32, window_size: usize) -> Result<MemoryStream> {
        if let Some(rate) = self.sample_rate {
            if rate != sample_rate {
                return Err(ModemError::DeviceUnavailable(format!(
                    "recording is {} Hz, {} Hz requested",
                    rate, sample_rate
                )));
            }
        }
        if window_size == 0 {
            return Err(ModemError::InvalidInputSize);
        }
        Ok(MemoryStream {
            samples: self.samples.iter().copied().collect(),
            overflow_windows: self.overflow_windows.clone(),
            windows_read: 0,
        })
    }
}

#[derive(Debug)]
pub struct MemoryStream {
    samples: VecDeque<f32>,
    overflow_windows: Vec<usize>,
    windows_read: usize,
}

impl CaptureStream for MemoryStream {
    fn read_window(&mut self, window: &mut [f32]) -> Result<WindowStatus> {
        if self.samples.len() < window.len() {
            return Ok(WindowStatus::Exhausted);
        }
        let index = self.windows_read;
        self.windows_read += 1;
        for slot in window.iter_mut() {
            *slot = self.samples.pop_front().unwrap_or(0.0);
        }
        if self.overflow_windows.contains(&index) {
            return Err(ModemError::StreamOverflow);
        }
        Ok(WindowStatus::Ready)
    }
}

/// Playback device that keeps what it was asked to play
#[derive(Debug, Clone, Default)]
pub struct MemoryPlayback {
    samples: Vec<f32>,
    sample_rate: Option<u32>,
}

impl MemoryPlayback {
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> Option<u32> {
        self.sample_rate
    }
}

impl PlaybackDevice for MemoryPlayback {
    fn play(&mut self, samples: &[f32], sample_rate: u32) -> Result<()> {
        self.samples.extend_from_slice(samples);
        self.sample_rate = Some(sample_rate);
        Ok(())
    }
}
