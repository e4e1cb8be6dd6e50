use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModemError {
    #[error("Audio device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Capture buffer overrun")]
    StreamOverflow,

    #[error("No symbol within tolerance of {frequency:.1} Hz")]
    InvalidSymbol { frequency: f32 },

    #[error("Checksum mismatch: expected '{expected}', received '{received}'")]
    ChecksumMismatch { expected: char, received: char },

    #[error("No symbol received before the idle timeout")]
    Timeout,

    #[error("Noise calibration failed: {0}")]
    CalibrationFailed(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid input size")]
    InvalidInputSize,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ModemError>;
