use crate::config::ProtocolConfig;
use crate::error::{ModemError, Result};

/// Transmission alphabet, in frequency order starting at the base frequency.
///
/// Space sits on the lowest data tone, then digits, upper-case letters and
/// punctuation, one frequency step apart.
pub const ALPHABET: &[char] = &[
    ' ', '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'A', 'B', 'C', 'D', 'E', 'F', 'G',
    'H', 'I', 'J', 'K', 'L', 'M', 'N', 'O', 'P', 'Q', 'R', 'S', 'T', 'U', 'V', 'W', 'X', 'Y',
    'Z', '!', '@', '#', '$', '%', '^', '&', '*', '(', ')', '-', '_', '+', '=', '{', '}', '[',
    ']', '|', '\\', ':', ';', '"', '\'', '<', '>', ',', '.', '/', '?', '`', '~',
];

/// Symbol sent in place of any character outside the alphabet
pub const DEFAULT_SYMBOL: char = ' ';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlSymbol {
    Start,
    Sync,
    End,
}

/// A classified tone: either framing or payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Symbol {
    Control(ControlSymbol),
    Data(char),
}

/// Bidirectional char <-> frequency mapping plus the control tones
#[derive(Debug, Clone)]
pub struct SymbolTable {
    base_frequency: f32,
    step: f32,
    tolerance: f32,
    start: f32,
    sync: f32,
    end: f32,
}

impl SymbolTable {
    /// Build the table and verify that every tone is unambiguous.
    ///
    /// Data symbols must be more than twice the tolerance apart, the control
    /// tones must keep at least one step of clearance from the data range and
    /// from each other, and everything must sit inside the analysis band.
    pub fn new(config: &ProtocolConfig) -> Result<Self> {
        let table = Self {
            base_frequency: config.base_frequency,
            step: config.frequency_step,
            tolerance: config.tolerance_hz,
            start: config.start_frequency,
            sync: config.sync_frequency,
            end: config.end_frequency,
        };
        table.check_layout(config)?;
        Ok(table)
    }

    fn check_layout(&self, config: &ProtocolConfig) -> Result<()> {
        if !(self.step > 0.0) || 2.0 * self.tolerance > self.step {
            return Err(ModemError::InvalidConfig(format!(
                "step of {} Hz cannot separate symbols with {} Hz tolerance",
                self.step, self.tolerance
            )));
        }

        let (low, high) = self.data_range();
        for (name, freq) in self.controls() {
            let clearance = if freq < low {
                low - freq
            } else if freq > high {
                freq - high
            } else {
                0.0
            };
            if clearance < self.step {
                return Err(ModemError::InvalidConfig(format!(
                    "{:?} tone at {} Hz is within one step of the data range",
                    name, freq
                )));
            }
        }

        let controls = self.controls();
        for (i, (a_name, a)) in controls.iter().enumerate() {
            for (b_name, b) in &controls[i + 1..] {
                if (a - b).abs() < 2.0 * self.tolerance {
                    return Err(ModemError::InvalidConfig(format!(
                        "{:?} and {:?} tones overlap",
                        a_name, b_name
                    )));
                }
            }
        }

        let band_low = config.band_low;
        let band_high = config.band_high;
        let outside = self
            .frequencies()
            .into_iter()
            .chain(controls.iter().map(|&(_, f)| f))
            .find(|&f| f < band_low || f > band_high || f >= config.nyquist());
        if let Some(freq) = outside {
            return Err(ModemError::InvalidConfig(format!(
                "tone at {} Hz is outside the {}-{} Hz analysis band",
                freq, band_low, band_high
            )));
        }

        Ok(())
    }

    fn controls(&self) -> [(ControlSymbol, f32); 3] {
        [
            (ControlSymbol::Start, self.start),
            (ControlSymbol::Sync, self.sync),
            (ControlSymbol::End, self.end),
        ]
    }

    /// Number of data symbols
    pub fn len(&self) -> usize {
        ALPHABET.len()
    }

    pub fn is_empty(&self) -> bool {
        ALPHABET.is_empty()
    }

    pub fn alphabet(&self) -> &'static [char] {
        ALPHABET
    }

    /// Lowest and highest data frequency
    pub fn data_range(&self) -> (f32, f32) {
        (self.frequency_at(0), self.frequency_at(ALPHABET.len() - 1))
    }

    /// All data frequencies in alphabet order
    pub fn frequencies(&self) -> Vec<f32> {
        (0..ALPHABET.len()).map(|i| self.frequency_at(i)).collect()
    }

    fn frequency_at(&self, index: usize) -> f32 {
        self.base_frequency + index as f32 * self.step
    }

    pub fn control_frequency(&self, control: ControlSymbol) -> f32 {
        match control {
            ControlSymbol::Start => self.start,
            ControlSymbol::Sync => self.sync,
            ControlSymbol::End => self.end,
        }
    }

    /// Map a character to the symbol actually transmitted for it.
    ///
    /// ASCII lower case folds to upper case; anything else outside the
    /// alphabet becomes the default symbol.
    pub fn normalize(&self, c: char) -> char {
        let upper = c.to_ascii_uppercase();
        if self.index_of(upper).is_some() {
            upper
        } else {
            DEFAULT_SYMBOL
        }
    }

    pub fn index_of(&self, c: char) -> Option<usize> {
        ALPHABET.iter().position(|&a| a == c)
    }

    /// Carrier frequency for a character. Never returns a control tone.
    pub fn char_to_frequency(&self, c: char) -> f32 {
        let normalized = self.normalize(c);
        let index = self.index_of(normalized).unwrap_or(0);
        self.frequency_at(index)
    }

    /// Nearest data symbol within tolerance of `frequency`
    pub fn frequency_to_char(&self, frequency: f32) -> Option<char> {
        if !frequency.is_finite() {
            return None;
        }
        let position = ((frequency - self.base_frequency) / self.step).round();
        if position < 0.0 || position >= ALPHABET.len() as f32 {
            return None;
        }
        let index = position as usize;
        if (frequency - self.frequency_at(index)).abs() <= self.tolerance {
            Some(ALPHABET[index])
        } else {
            None
        }
    }

    /// Like `frequency_to_char`, but reports the miss as `InvalidSymbol`
    pub fn resolve(&self, frequency: f32) -> Result<char> {
        self.frequency_to_char(frequency)
            .ok_or(ModemError::InvalidSymbol { frequency })
    }

    pub fn control_for(&self, frequency: f32) -> Option<ControlSymbol> {
        self.controls()
            .into_iter()
            .find(|&(_, f)| (frequency - f).abs() <= self.tolerance)
            .map(|(control, _)| control)
    }

    pub fn is_control_frequency(&self, frequency: f32) -> bool {
        self.control_for(frequency).is_some()
    }

    /// True if `frequency` falls inside the data range, matched or not
    pub fn is_data_frequency(&self, frequency: f32) -> bool {
        let (low, high) = self.data_range();
        frequency >= low - self.tolerance && frequency <= high + self.tolerance
    }

    /// Classify a detected frequency as a control or data symbol
    pub fn classify(&self, frequency: f32) -> Option<Symbol> {
        if let Some(control) = self.control_for(frequency) {
            return Some(Symbol::Control(control));
        }
        self.frequency_to_char(frequency).map(Symbol::Data)
    }

    /// Sum of character codes modulo the alphabet size, as a symbol
    pub fn checksum(&self, text: &str) -> char {
        let sum: u64 = text.chars().map(|c| c as u64).sum();
        ALPHABET[(sum % ALPHABET.len() as u64) as usize]
    }

    pub fn symbol_frequency(&self, symbol: Symbol) -> f32 {
        match symbol {
            Symbol::Control(control) => self.control_frequency(control),
            Symbol::Data(c) => self.char_to_frequency(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> SymbolTable {
        SymbolTable::new(&ProtocolConfig::canonical()).unwrap()
    }

    #[test]
    fn test_alphabet_has_no_duplicates() {
        for (i, a) in ALPHABET.iter().enumerate() {
            assert!(!ALPHABET[i + 1..].contains(a), "duplicate symbol {:?}", a);
        }
        assert_eq!(ALPHABET.len(), 69);
    }

    #[test]
    fn test_symbol_bijection() {
        let table = table();
        for &c in ALPHABET {
            let freq = table.char_to_frequency(c);
            assert_eq!(table.frequency_to_char(freq), Some(c), "failed for {:?}", c);
        }
    }

    #[test]
    fn test_canonical_frequencies() {
        let table = table();
        assert_eq!(table.char_to_frequency(' '), 18_700.0);
        assert_eq!(table.char_to_frequency('0'), 18_800.0);
        assert_eq!(table.char_to_frequency('A'), 19_800.0);
        assert_eq!(table.char_to_frequency('~'), 25_500.0);
        assert_eq!(table.data_range(), (18_700.0, 25_500.0));
    }

    #[test]
    fn test_lowercase_folds_and_unknown_defaults() {
        let table = table();
        assert_eq!(table.char_to_frequency('h'), table.char_to_frequency('H'));
        assert_eq!(table.char_to_frequency('é'), table.char_to_frequency(DEFAULT_SYMBOL));
        assert!(!table.is_control_frequency(table.char_to_frequency('\u{7f}')));
    }

    #[test]
    fn test_reverse_lookup_tolerance() {
        let table = table();
        assert_eq!(table.frequency_to_char(19_845.0), Some('A'));
        assert_eq!(table.frequency_to_char(19_740.0), Some('9'));
        assert_eq!(table.frequency_to_char(18_640.0), None);
        assert_eq!(table.frequency_to_char(25_600.0), None);
        assert_eq!(table.frequency_to_char(f32::NAN), None);
    }

    #[test]
    fn test_controls_never_resolve_to_data() {
        let table = table();
        for control in [ControlSymbol::Start, ControlSymbol::Sync, ControlSymbol::End] {
            let freq = table.control_frequency(control);
            assert_eq!(table.frequency_to_char(freq), None);
            assert_eq!(table.classify(freq), Some(Symbol::Control(control)));
        }
    }

    #[test]
    fn test_resolve_reports_invalid_symbol() {
        let table = table();
        match table.resolve(26_000.0) {
            Err(ModemError::InvalidSymbol { frequency }) => assert_eq!(frequency, 26_000.0),
            other => panic!("expected InvalidSymbol, got {:?}", other),
        }
    }

    #[test]
    fn test_checksum_of_hello() {
        // 72 + 69 + 76 + 76 + 79 = 372, 372 mod 69 = 27
        assert_eq!(table().checksum("HELLO"), 'Q');
    }

    #[test]
    fn test_colliding_control_rejected() {
        let config = ProtocolConfig {
            end_frequency: 22_000.0,
            ..ProtocolConfig::canonical()
        };
        assert!(matches!(
            SymbolTable::new(&config),
            Err(ModemError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_overlapping_controls_rejected() {
        let config = ProtocolConfig {
            sync_frequency: 18_530.0,
            ..ProtocolConfig::canonical()
        };
        assert!(SymbolTable::new(&config).is_err());
    }

    #[test]
    fn test_wide_tolerance_rejected() {
        let config = ProtocolConfig {
            tolerance_hz: 60.0,
            ..ProtocolConfig::canonical()
        };
        assert!(SymbolTable::new(&config).is_err());
    }
}
