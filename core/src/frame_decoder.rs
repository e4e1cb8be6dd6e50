use crate::config::ProtocolConfig;
use crate::error::{ModemError, Result};
use crate::stabilizer::ConfirmedSymbol;
use crate::symbols::{ControlSymbol, SymbolTable};

/// Where the decoder is inside a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    /// Waiting for START
    Idle,
    /// START seen, waiting for SYNC
    Started,
    /// Collecting data symbols
    Synced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumStatus {
    Valid,
    Mismatch { expected: char, received: char },
}

/// Payload of a completed frame, with the checksum already stripped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedMessage {
    pub text: String,
    pub checksum: ChecksumStatus,
}

impl DecodedMessage {
    pub fn is_verified(&self) -> bool {
        self.checksum == ChecksumStatus::Valid
    }

    /// The text, or `ChecksumMismatch` if the checksum symbol disagreed
    pub fn verified(self) -> Result<String> {
        match self.checksum {
            ChecksumStatus::Valid => Ok(self.text),
            ChecksumStatus::Mismatch { expected, received } => {
                Err(ModemError::ChecksumMismatch { expected, received })
            }
        }
    }
}

/// Outcome reported by the decoder whenever a frame ends or a symbol is lost
#[derive(Debug, Clone, PartialEq)]
pub enum FrameEvent {
    /// END closed a synced frame
    Complete(DecodedMessage),
    /// The frame went quiet for longer than the idle timeout
    TimedOut { discarded: String },
    /// A tone inside the data range matched no symbol and was dropped
    InvalidSymbol { frequency: f32 },
    /// END arrived before SYNC
    Incomplete,
    /// The frame in progress was abandoned on request
    Cancelled,
}

impl FrameEvent {
    /// `Some(message)` for a completed frame, an error for timeouts and
    /// unresolvable symbols, `None` otherwise
    pub fn into_result(self) -> Result<Option<DecodedMessage>> {
        match self {
            FrameEvent::Complete(message) => Ok(Some(message)),
            FrameEvent::TimedOut { .. } => Err(ModemError::Timeout),
            FrameEvent::InvalidSymbol { frequency } => Err(ModemError::InvalidSymbol { frequency }),
            FrameEvent::Incomplete | FrameEvent::Cancelled => Ok(None),
        }
    }
}

enum Classified {
    Control(ControlSymbol),
    Data(char),
    Unresolved,
    Noise,
}

/// Protocol state machine over confirmed symbols.
///
/// Performs no I/O and never blocks; the caller feeds symbols as they are
/// confirmed and calls `poll` with the current stream time so a stalled frame
/// can time out.
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    table: SymbolTable,
    idle_timeout: f64,
    state: ReceiverState,
    buffer: String,
    /// Set by the SYNC that closes the data region
    data_closed: bool,
    last_activity: f64,
}

impl FrameDecoder {
    pub fn new(config: &ProtocolConfig) -> Result<Self> {
        Ok(Self::with_table(SymbolTable::new(config)?, config))
    }

    pub fn with_table(table: SymbolTable, config: &ProtocolConfig) -> Self {
        Self {
            table,
            idle_timeout: config.idle_timeout_seconds as f64,
            state: ReceiverState::Idle,
            buffer: String::new(),
            data_closed: false,
            last_activity: 0.0,
        }
    }

    pub fn state(&self) -> ReceiverState {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == ReceiverState::Idle
    }

    /// Characters collected so far in the current frame
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    fn classify(&self, frequency: f32) -> Classified {
        if let Some(control) = self.table.control_for(frequency) {
            return Classified::Control(control);
        }
        if !self.table.is_data_frequency(frequency) {
            return Classified::Noise;
        }
        match self.table.frequency_to_char(frequency) {
            Some(c) => Classified::Data(c),
            None => Classified::Unresolved,
        }
    }

    /// Advance the state machine with one confirmed symbol
    pub fn feed(&mut self, symbol: ConfirmedSymbol) -> Option<FrameEvent> {
        if self.state != ReceiverState::Idle {
            self.last_activity = symbol.timestamp;
        }

        match (self.state, self.classify(symbol.frequency)) {
            (_, Classified::Control(ControlSymbol::Start)) => {
                if self.state != ReceiverState::Idle {
                    log::debug!("START inside a frame, restarting");
                }
                self.begin(symbol.timestamp);
                None
            }
            (ReceiverState::Started, Classified::Control(ControlSymbol::Sync)) => {
                log::debug!("SYNC, collecting data");
                self.state = ReceiverState::Synced;
                None
            }
            (ReceiverState::Synced, Classified::Control(ControlSymbol::Sync)) => {
                self.data_closed = true;
                None
            }
            (ReceiverState::Synced, Classified::Data(c)) => {
                if !self.data_closed {
                    log::debug!("Symbol '{}' at {:.1} Hz", c, symbol.frequency);
                    self.buffer.push(c);
                }
                None
            }
            (ReceiverState::Synced, Classified::Unresolved) if !self.data_closed => {
                log::warn!("No symbol matches {:.1} Hz, dropped", symbol.frequency);
                Some(FrameEvent::InvalidSymbol {
                    frequency: symbol.frequency,
                })
            }
            (ReceiverState::Synced, Classified::Control(ControlSymbol::End)) => {
                Some(self.complete())
            }
            (ReceiverState::Started, Classified::Control(ControlSymbol::End)) => {
                log::warn!("END before SYNC, frame dropped");
                self.reset();
                Some(FrameEvent::Incomplete)
            }
            // END, data and noise while idle, and data before SYNC
            _ => None,
        }
    }

    fn begin(&mut self, now: f64) {
        self.reset();
        self.state = ReceiverState::Started;
        self.last_activity = now;
    }

    fn complete(&mut self) -> FrameEvent {
        let mut text = std::mem::take(&mut self.buffer);
        self.reset();

        let received = match text.pop() {
            Some(c) => c,
            None => {
                log::warn!("END with no checksum symbol, frame dropped");
                return FrameEvent::Incomplete;
            }
        };
        let expected = self.table.checksum(&text);
        let checksum = if expected == received {
            log::info!("Received {:?}", text);
            ChecksumStatus::Valid
        } else {
            log::warn!(
                "Checksum mismatch on {:?}: expected '{}', received '{}'",
                text,
                expected,
                received
            );
            ChecksumStatus::Mismatch { expected, received }
        };

        FrameEvent::Complete(DecodedMessage { text, checksum })
    }

    /// Drop a frame that has been silent past the idle timeout
    pub fn poll(&mut self, now: f64) -> Option<FrameEvent> {
        if self.state == ReceiverState::Idle || now - self.last_activity <= self.idle_timeout {
            return None;
        }
        let discarded = std::mem::take(&mut self.buffer);
        log::warn!(
            "Frame timed out after {:.2} s idle, discarded {:?}",
            now - self.last_activity,
            discarded
        );
        self.reset();
        Some(FrameEvent::TimedOut { discarded })
    }

    /// Abandon the frame in progress, if any
    pub fn cancel(&mut self) -> Option<FrameEvent> {
        if self.state == ReceiverState::Idle {
            return None;
        }
        self.reset();
        Some(FrameEvent::Cancelled)
    }

    fn reset(&mut self) {
        self.state = ReceiverState::Idle;
        self.buffer.clear();
        self.data_closed = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Script {
        table: SymbolTable,
        decoder: FrameDecoder,
        now: f64,
        events: Vec<FrameEvent>,
    }

    impl Script {
        fn new() -> Self {
            Self::with_config(ProtocolConfig::canonical())
        }

        fn with_config(config: ProtocolConfig) -> Self {
            Self {
                table: SymbolTable::new(&config).unwrap(),
                decoder: FrameDecoder::new(&config).unwrap(),
                now: 0.0,
                events: Vec::new(),
            }
        }

        fn send_frequency(&mut self, frequency: f32) -> &mut Self {
            self.now += 0.13;
            if let Some(event) = self.decoder.poll(self.now) {
                self.events.push(event);
            }
            let symbol = ConfirmedSymbol {
                frequency,
                timestamp: self.now,
            };
            if let Some(event) = self.decoder.feed(symbol) {
                self.events.push(event);
            }
            self
        }

        fn control(&mut self, control: ControlSymbol) -> &mut Self {
            let frequency = self.table.control_frequency(control);
            self.send_frequency(frequency)
        }

        fn text(&mut self, text: &str) -> &mut Self {
            for c in text.chars() {
                let frequency = self.table.char_to_frequency(c);
                self.send_frequency(frequency);
            }
            self
        }

        fn frame(&mut self, payload: &str, checksum: char) -> &mut Self {
            self.control(ControlSymbol::Start)
                .control(ControlSymbol::Sync)
                .text(payload)
                .text(&checksum.to_string())
                .control(ControlSymbol::Sync)
                .control(ControlSymbol::End)
        }

        fn wait(&mut self, seconds: f64) -> &mut Self {
            self.now += seconds;
            if let Some(event) = self.decoder.poll(self.now) {
                self.events.push(event);
            }
            self
        }
    }

    fn complete(text: &str) -> FrameEvent {
        FrameEvent::Complete(DecodedMessage {
            text: text.to_string(),
            checksum: ChecksumStatus::Valid,
        })
    }

    #[test]
    fn test_hello_frame_completes_verified() {
        let mut script = Script::new();
        script.frame("HELLO", 'Q');
        assert_eq!(script.events, vec![complete("HELLO")]);
        assert_eq!(script.decoder.state(), ReceiverState::Idle);
    }

    #[test]
    fn test_corrupted_character_flagged() {
        let mut script = Script::new();
        script.frame("HELPO", 'Q');
        let message = match script.events.pop() {
            Some(FrameEvent::Complete(message)) => message,
            other => panic!("expected Complete, got {:?}", other),
        };
        assert_eq!(message.text, "HELPO");
        assert!(!message.is_verified());
        assert!(matches!(
            message.verified(),
            Err(ModemError::ChecksumMismatch { received: 'Q', .. })
        ));
    }

    #[test]
    fn test_timeout_then_clean_frame() {
        let mut script = Script::new();
        script
            .control(ControlSymbol::Start)
            .control(ControlSymbol::Sync)
            .text("HE")
            .wait(1.5);
        assert_eq!(
            script.events,
            vec![FrameEvent::TimedOut {
                discarded: "HE".to_string()
            }]
        );
        assert_eq!(script.decoder.state(), ReceiverState::Idle);

        script.events.clear();
        script.frame("HI", script.table.checksum("HI"));
        assert_eq!(script.events, vec![complete("HI")]);
    }

    #[test]
    fn test_back_to_back_start_restarts() {
        let mut script = Script::new();
        script
            .control(ControlSymbol::Start)
            .control(ControlSymbol::Sync)
            .text("XY");
        script.frame("OK", script.table.checksum("OK"));
        assert_eq!(script.events, vec![complete("OK")]);
    }

    #[test]
    fn test_data_before_sync_ignored() {
        let mut script = Script::new();
        let checksum = script.table.checksum("A");
        script
            .control(ControlSymbol::Start)
            .text("ZZ")
            .control(ControlSymbol::Sync)
            .text("A")
            .text(&checksum.to_string())
            .control(ControlSymbol::Sync)
            .control(ControlSymbol::End);
        assert_eq!(script.events, vec![complete("A")]);
    }

    #[test]
    fn test_idle_noise_ignored() {
        let mut script = Script::new();
        script
            .control(ControlSymbol::End)
            .text("NOISE")
            .control(ControlSymbol::Sync)
            .send_frequency(30_000.0);
        assert!(script.events.is_empty());
        assert_eq!(script.decoder.state(), ReceiverState::Idle);
        assert_eq!(script.decoder.poll(100.0), None);
    }

    #[test]
    fn test_end_before_sync_is_incomplete() {
        let mut script = Script::new();
        script
            .control(ControlSymbol::Start)
            .control(ControlSymbol::End);
        assert_eq!(script.events, vec![FrameEvent::Incomplete]);
        assert!(script.decoder.is_idle());
    }

    #[test]
    fn test_unresolved_tone_reported_and_dropped() {
        // A narrower tolerance leaves gaps between symbols
        let mut script = Script::with_config(ProtocolConfig {
            tolerance_hz: 30.0,
            ..ProtocolConfig::canonical()
        });
        let checksum = script.table.checksum("AB");
        script
            .control(ControlSymbol::Start)
            .control(ControlSymbol::Sync)
            .text("A")
            .send_frequency(19_850.0)
            .text("B")
            .text(&checksum.to_string())
            .control(ControlSymbol::Sync)
            .control(ControlSymbol::End);
        assert_eq!(
            script.events,
            vec![
                FrameEvent::InvalidSymbol { frequency: 19_850.0 },
                complete("AB"),
            ]
        );
    }

    #[test]
    fn test_data_after_closing_sync_ignored() {
        let mut script = Script::new();
        let checksum = script.table.checksum("GO");
        script
            .control(ControlSymbol::Start)
            .control(ControlSymbol::Sync)
            .text("GO")
            .text(&checksum.to_string())
            .control(ControlSymbol::Sync)
            .text("X")
            .control(ControlSymbol::End);
        assert_eq!(script.events, vec![complete("GO")]);
    }

    #[test]
    fn test_cancel_discards_frame() {
        let mut script = Script::new();
        script.control(ControlSymbol::Start).control(ControlSymbol::Sync);
        assert_eq!(script.decoder.cancel(), Some(FrameEvent::Cancelled));
        assert_eq!(script.decoder.cancel(), None);
        assert!(script.decoder.buffer().is_empty());
    }

    #[test]
    fn test_into_result_mapping() {
        assert!(matches!(
            FrameEvent::TimedOut {
                discarded: String::new()
            }
            .into_result(),
            Err(ModemError::Timeout)
        ));
        assert!(matches!(FrameEvent::Cancelled.into_result(), Ok(None)));
        assert_eq!(
            complete("HI").into_result().unwrap().map(|m| m.text),
            Some("HI".to_string())
        );
    }
}
