use crate::audio::PlaybackDevice;
use crate::config::ProtocolConfig;
use crate::error::{ModemError, Result};
use crate::symbols::{ControlSymbol, Symbol, SymbolTable};
use crate::tone::ToneSynthesizer;
use crate::MAX_MESSAGE_LEN;

/// Renders text into a complete ultrasonic frame
///
/// Frame layout, each tone followed by the inter-symbol gap:
/// START (long) - SYNC - data symbols - checksum symbol - SYNC - END (long)
///
/// The long control tones give the receiver a robust onset; the silence
/// between tones guarantees that repeated characters are separated by at
/// least one empty analysis window.
pub struct Modulator {
    config: ProtocolConfig,
    table: SymbolTable,
    synth: ToneSynthesizer,
}

impl Modulator {
    pub fn new(config: &ProtocolConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config: config.clone(),
            table: SymbolTable::new(config)?,
            synth: ToneSynthesizer::new(config.sample_rate, config.amplitude),
        })
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    pub fn symbol_table(&self) -> &SymbolTable {
        &self.table
    }

    /// The symbol sequence sent for `message`, framing included
    pub fn frame_symbols(&self, message: &str) -> Result<Vec<Symbol>> {
        let payload: String = message.chars().map(|c| self.table.normalize(c)).collect();
        let len = payload.chars().count();
        if len > MAX_MESSAGE_LEN {
            return Err(ModemError::InvalidInputSize);
        }

        let mut symbols = Vec::with_capacity(len + 5);
        symbols.push(Symbol::Control(ControlSymbol::Start));
        symbols.push(Symbol::Control(ControlSymbol::Sync));
        symbols.extend(payload.chars().map(Symbol::Data));
        symbols.push(Symbol::Data(self.table.checksum(&payload)));
        symbols.push(Symbol::Control(ControlSymbol::Sync));
        symbols.push(Symbol::Control(ControlSymbol::End));
        Ok(symbols)
    }

    /// Carrier frequencies of the frame, in transmission order
    pub fn frame_frequencies(&self, message: &str) -> Result<Vec<f32>> {
        Ok(self
            .frame_symbols(message)?
            .into_iter()
            .map(|symbol| self.table.symbol_frequency(symbol))
            .collect())
    }

    fn tone_duration(&self, symbol: Symbol) -> f32 {
        match symbol {
            Symbol::Control(ControlSymbol::Start) | Symbol::Control(ControlSymbol::End) => {
                self.config.control_duration
            }
            _ => self.config.symbol_duration,
        }
    }

    fn render(&self, symbols: &[Symbol]) -> Vec<f32> {
        let total = self.config.samples_for(self.frame_duration(symbols));
        let mut samples = Vec::with_capacity(total);

        for &symbol in symbols {
            let frequency = self.table.symbol_frequency(symbol);
            self.synth
                .append_tone(&mut samples, frequency, self.tone_duration(symbol));
            self.synth.append_silence(&mut samples, self.config.symbol_gap);
        }
        samples
    }

    /// Encode a message into one playable sample buffer
    pub fn encode(&self, message: &str) -> Result<Vec<f32>> {
        let samples = self.render(&self.frame_symbols(message)?);

        log::debug!(
            "Encoded {} chars into {} samples ({:.2} s)",
            message.chars().count(),
            samples.len(),
            samples.len() as f32 / self.config.sample_rate as f32
        );
        Ok(samples)
    }

    fn frame_duration(&self, symbols: &[Symbol]) -> f32 {
        symbols
            .iter()
            .map(|&symbol| self.tone_duration(symbol) + self.config.symbol_gap)
            .sum()
    }

    /// START, SYNC, every alphabet symbol in table order, then END
    pub fn sweep_symbols(&self) -> Vec<Symbol> {
        let mut symbols = Vec::with_capacity(self.table.len() + 3);
        symbols.push(Symbol::Control(ControlSymbol::Start));
        symbols.push(Symbol::Control(ControlSymbol::Sync));
        symbols.extend(self.table.alphabet().iter().map(|&c| Symbol::Data(c)));
        symbols.push(Symbol::Control(ControlSymbol::End));
        symbols
    }

    /// Every tone of the table in turn, with the usual durations and gaps.
    ///
    /// Used to check that a speaker and microphone pair carries the whole
    /// band. It is not a valid frame: there is no checksum or closing SYNC.
    pub fn sweep(&self) -> Vec<f32> {
        let samples = self.render(&self.sweep_symbols());
        log::debug!(
            "Rendered band sweep of {} tones ({:.2} s)",
            self.table.len() + 3,
            samples.len() as f32 / self.config.sample_rate as f32
        );
        samples
    }

    /// Airtime of the encoded frame in seconds
    pub fn duration_seconds(&self, message: &str) -> Result<f32> {
        Ok(self.frame_duration(&self.frame_symbols(message)?))
    }

    /// Encode and hand the buffer to a playback device, blocking until it is done
    pub fn transmit<P: PlaybackDevice>(&self, message: &str, playback: &mut P) -> Result<()> {
        let samples = self.encode(message)?;
        playback.play(&samples, self.config.sample_rate)
    }
}
