use clap::{Parser, Subcommand};
use hound::{SampleFormat, WavSpec};
use serde::Serialize;
use std::fs::File;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing_subscriber::EnvFilter;
use ultrawave_core::{
    downmix, resample_audio, ChecksumStatus, ControlSymbol, FrameEvent, MemoryCapture, Modulator,
    ProtocolConfig, Receiver, ReceiverEvent, StopSignal, SymbolTable,
};

#[derive(Parser)]
#[command(name = "ultrawave")]
#[command(about = "Ultrasonic FSK modem for short text messages")]
struct Cli {
    /// Protocol configuration (JSON); omitted fields use the canonical values
    #[arg(short, long, global = true, value_name = "CONFIG.JSON")]
    config: Option<PathBuf>,

    /// Log progress to stderr (-v info, -vv debug); RUST_LOG overrides
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encode a text message to a WAV audio file
    Encode {
        /// Message to send
        #[arg(value_name = "MESSAGE")]
        message: String,

        /// Output WAV file
        #[arg(value_name = "OUTPUT.WAV")]
        output: PathBuf,

        /// Silence written before the frame, in seconds
        #[arg(long, default_value = "0.0")]
        lead_in: f32,
    },

    /// Decode every message found in a WAV recording
    Decode {
        /// Input WAV file
        #[arg(value_name = "INPUT.WAV")]
        input: PathBuf,

        /// Skip noise calibration and use the configured fixed floor
        #[arg(long)]
        no_calibration: bool,

        /// Print one JSON object per frame event instead of plain text
        #[arg(long)]
        json: bool,
    },

    /// Write every control and alphabet tone in turn, to test a speaker and mic
    Sweep {
        /// Output WAV file
        #[arg(value_name = "OUTPUT.WAV")]
        output: PathBuf,
    },

    /// Show the airtime of a message without encoding it
    Duration {
        #[arg(value_name = "MESSAGE")]
        message: String,
    },

    /// List the symbol alphabet and control tones
    Symbols,

    /// Print the effective protocol configuration as JSON
    Config,
}

#[derive(Debug, Error)]
enum CliError {
    #[error("Unsupported WAV format: {bits}-bit {format:?}")]
    UnsupportedFormat { bits: u16, format: SampleFormat },

    #[error("No message decoded from {0}")]
    NoMessage(String),

    #[error("Receiver task failed: {0}")]
    Task(String),
}

/// One frame event in `decode --json` output
#[derive(Debug, Serialize)]
struct EventRecord {
    event: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    verified: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency: Option<f32>,
}

impl From<&FrameEvent> for EventRecord {
    fn from(event: &FrameEvent) -> Self {
        let mut record = EventRecord {
            event: "",
            text: None,
            verified: None,
            frequency: None,
        };
        match event {
            FrameEvent::Complete(message) => {
                record.event = "complete";
                record.text = Some(message.text.clone());
                record.verified = Some(message.is_verified());
            }
            FrameEvent::TimedOut { discarded } => {
                record.event = "timeout";
                record.text = Some(discarded.clone());
            }
            FrameEvent::InvalidSymbol { frequency } => {
                record.event = "invalid_symbol";
                record.frequency = Some(*frequency);
            }
            FrameEvent::Incomplete => record.event = "incomplete",
            FrameEvent::Cancelled => record.event = "cancelled",
        }
        record
    }
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    // Try RUST_LOG first, then the verbosity flag
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match &cli.config {
        Some(path) => {
            tracing::info!("Loading protocol config from {}", path.display());
            ProtocolConfig::from_json_file(path)?
        }
        None => ProtocolConfig::canonical(),
    };

    match cli.command {
        Commands::Encode {
            message,
            output,
            lead_in,
        } => encode_command(&config, &message, &output, lead_in)?,
        Commands::Decode {
            input,
            no_calibration,
            json,
        } => decode_command(config, &input, no_calibration, json).await?,
        Commands::Sweep { output } => {
            let modulator = Modulator::new(&config)?;
            let samples = modulator.sweep();
            tracing::info!(
                "Band sweep of {} tones ({:.2} s)",
                modulator.symbol_table().len() + 3,
                samples.len() as f32 / config.sample_rate as f32
            );
            write_wav(&samples, config.sample_rate, &output)?;
            println!("Wrote {}", output.display());
        }
        Commands::Duration { message } => {
            let modulator = Modulator::new(&config)?;
            println!("{:.2} s", modulator.duration_seconds(&message)?);
        }
        Commands::Symbols => symbols_command(&config)?,
        Commands::Config => println!("{}", config.to_json_pretty()?),
    }

    Ok(())
}

fn encode_command(
    config: &ProtocolConfig,
    message: &str,
    output_path: &Path,
    lead_in: f32,
) -> Result<(), Box<dyn std::error::Error>> {
    let modulator = Modulator::new(config)?;
    let mut samples = vec![0.0f32; config.samples_for(lead_in.max(0.0))];
    samples.extend(modulator.encode(message)?);
    tracing::info!(
        "Encoded {:?} into {} samples ({:.2} s)",
        message,
        samples.len(),
        samples.len() as f32 / config.sample_rate as f32
    );

    write_wav(&samples, config.sample_rate, output_path)?;
    println!("Wrote {}", output_path.display());
    Ok(())
}

/// Write mono samples as a 16-bit PCM WAV file
fn write_wav(
    samples: &[f32],
    sample_rate: u32,
    output_path: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let file = File::create(output_path)?;
    let mut writer = hound::WavWriter::new(file, spec)?;

    // Convert f32 samples to i16 range [-32768, 32767]
    for &sample in samples {
        let clamped = sample.clamp(-1.0, 1.0);
        writer.write_sample((clamped * 32767.0) as i16)?;
    }
    writer.finalize()?;
    Ok(())
}

/// Read a WAV file as mono samples at the protocol rate
fn load_wav(path: &Path, sample_rate: u32) -> Result<Vec<f32>, Box<dyn std::error::Error>> {
    let file = File::open(path)?;
    let mut reader = hound::WavReader::new(file)?;

    let spec = reader.spec();
    tracing::info!(
        "Read WAV: {} Hz, {} channels, {} bits",
        spec.sample_rate,
        spec.channels,
        spec.bits_per_sample
    );

    let interleaved: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .map(|s| s.map(|v| v as f32 / 32768.0))
            .collect::<Result<_, _>>()?,
        (SampleFormat::Int, bits @ (24 | 32)) => {
            let scale = (1u64 << (bits - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()?
        }
        (SampleFormat::Float, 32) => reader.samples::<f32>().collect::<Result<_, _>>()?,
        (format, bits) => return Err(CliError::UnsupportedFormat { bits, format }.into()),
    };

    let mono = downmix(&interleaved, spec.channels as usize)?;
    if spec.sample_rate != sample_rate {
        tracing::info!("Resampling {} Hz to {} Hz", spec.sample_rate, sample_rate);
    }
    Ok(resample_audio(&mono, spec.sample_rate, sample_rate))
}

async fn decode_command(
    mut config: ProtocolConfig,
    input_path: &Path,
    no_calibration: bool,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if no_calibration {
        config.calibration_seconds = 0.0;
    }
    let samples = load_wav(input_path, config.sample_rate)?;
    let device = MemoryCapture::new(samples).with_sample_rate(config.sample_rate);
    let mut receiver = Receiver::new(device, &config)?;

    let stop = StopSignal::new();
    let loop_stop = stop.clone();
    let mut task = tokio::task::spawn_blocking(move || {
        let mut decoded = 0usize;
        let result = receiver.run(&loop_stop, |event| match event {
            ReceiverEvent::Calibrated(profile) => {
                tracing::info!("Noise floor {:.1} dB", profile.floor_db);
            }
            ReceiverEvent::Frame(frame) => {
                if matches!(frame, FrameEvent::Complete(_)) {
                    decoded += 1;
                }
                report(&frame, json);
            }
        });
        result.map(|_| decoded)
    });

    let decoded = tokio::select! {
        joined = &mut task => joined,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted, stopping receiver");
            stop.stop();
            task.await
        }
    }
    .map_err(|e| CliError::Task(e.to_string()))??;

    if decoded == 0 {
        return Err(CliError::NoMessage(input_path.display().to_string()).into());
    }
    Ok(())
}

fn report(event: &FrameEvent, json: bool) {
    if json {
        match serde_json::to_string(&EventRecord::from(event)) {
            Ok(line) => println!("{}", line),
            Err(e) => tracing::error!("Failed to serialize event: {}", e),
        }
        return;
    }

    match event {
        FrameEvent::Complete(message) => match message.checksum {
            ChecksumStatus::Valid => println!("{}", message.text),
            ChecksumStatus::Mismatch { expected, received } => {
                tracing::warn!(
                    "Checksum mismatch (expected '{}', received '{}')",
                    expected,
                    received
                );
                println!("{} [checksum mismatch]", message.text);
            }
        },
        FrameEvent::TimedOut { discarded } => {
            tracing::warn!("Frame timed out, discarded {:?}", discarded)
        }
        FrameEvent::InvalidSymbol { frequency } => {
            tracing::warn!("Unresolved tone at {:.1} Hz", frequency)
        }
        FrameEvent::Incomplete => tracing::warn!("Frame ended before SYNC"),
        FrameEvent::Cancelled => tracing::warn!("Recording ended inside a frame"),
    }
}

fn symbols_command(config: &ProtocolConfig) -> Result<(), Box<dyn std::error::Error>> {
    let table = SymbolTable::new(config)?;
    for control in [ControlSymbol::Start, ControlSymbol::Sync, ControlSymbol::End] {
        let name = format!("{:?}", control).to_uppercase();
        println!("{:<6} {:>8.1} Hz", name, table.control_frequency(control));
    }
    for (&symbol, frequency) in table.alphabet().iter().zip(table.frequencies()) {
        println!("{:<6} {:>8.1} Hz", format!("{:?}", symbol), frequency);
    }
    Ok(())
}
