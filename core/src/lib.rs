//! Ultrasonic FSK modem for short text messages
//!
//! Text is sent one character per tone in the 18-26 kHz band, framed by
//! START, SYNC and END control tones with a trailing checksum symbol. The
//! receive side windows a capture stream, picks the dominant tone per window,
//! stabilizes the detections and runs them through the frame state machine.

pub mod audio;
pub mod calibration;
pub mod config;
pub mod error;
pub mod frame_decoder;
pub mod modulator;
pub mod receiver;
pub mod resample;
pub mod spectrum;
pub mod stabilizer;
pub mod symbols;
pub mod tone;

pub use audio::{
    CaptureDevice, CaptureStream, MemoryCapture, MemoryPlayback, PlaybackDevice, WindowStatus,
};
pub use calibration::{NoiseCalibrator, NoiseProfile};
pub use config::ProtocolConfig;
pub use error::{ModemError, Result};
pub use frame_decoder::{ChecksumStatus, DecodedMessage, FrameDecoder, FrameEvent, ReceiverState};
pub use modulator::Modulator;
pub use receiver::{
    decode_samples, spawn, Receiver, ReceiverEvent, ReceiverHandle, ReceiverSession, StopSignal,
};
pub use resample::{downmix, resample_audio};
pub use spectrum::{DetectionEvent, SpectralAnalyzer};
pub use stabilizer::{ConfirmedSymbol, DetectionStabilizer};
pub use symbols::{ControlSymbol, Symbol, SymbolTable, ALPHABET};

/// Longest message, in characters, a single frame may carry
pub const MAX_MESSAGE_LEN: usize = 256;
