use crate::calibration::NoiseProfile;
use crate::config::ProtocolConfig;
use crate::spectrum::DetectionEvent;

/// A tone that survived the SNR, persistence and debounce checks
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfirmedSymbol {
    /// Mean frequency over the persistence run
    pub frequency: f32,
    /// Timestamp of the window that completed the run
    pub timestamp: f64,
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    frequency_sum: f32,
    frames: usize,
    /// Timestamp of the run's first window
    onset: f64,
}

impl Candidate {
    fn frequency(&self) -> f32 {
        self.frequency_sum / self.frames as f32
    }
}

#[derive(Debug, Clone, Copy)]
struct Recent {
    frequency: f32,
    last_seen: f64,
    onset: f64,
    /// Still held since confirmation, with no interrupting window
    latched: bool,
    /// A window was lost while latched, so a silent gap may have been missed
    dropped: bool,
}

/// Turns the raw per-window detections into discrete symbol onsets.
///
/// A detection counts only if its SNR and absolute level clear the
/// thresholds, and it must repeat within tolerance for several consecutive
/// windows before it is confirmed. After confirmation the tone is latched
/// until a different or failed window arrives, so a long tone yields a single
/// symbol. A new run on the same frequency is still suppressed if it starts
/// within the debounce time of the last window the previous one was seen in.
///
/// A window lost to a capture overrun is neither a detection nor a silence.
/// It breaks the persistence run but keeps the latch. The latch is then
/// released once the held tone would outlast its own transmitted length, so
/// a repeated symbol whose only silent window was lost is still confirmed.
#[derive(Debug, Clone)]
pub struct DetectionStabilizer {
    min_snr_db: f32,
    tolerance_hz: f32,
    persistence_frames: usize,
    debounce_seconds: f64,
    debounce_hz: f32,
    window_seconds: f64,
    symbol_seconds: f64,
    control_seconds: f64,
    /// START and END, the tones sent for `control_seconds`
    long_tones: [f32; 2],
    noise_floor_db: f32,
    candidate: Option<Candidate>,
    recent: Option<Recent>,
}

impl DetectionStabilizer {
    pub fn new(config: &ProtocolConfig, noise: &NoiseProfile) -> Self {
        Self {
            min_snr_db: config.min_snr_db,
            tolerance_hz: config.tolerance_hz,
            persistence_frames: config.persistence_frames.max(1),
            debounce_seconds: config.debounce_seconds as f64,
            debounce_hz: config.debounce_hz,
            window_seconds: config.window_seconds(),
            symbol_seconds: config.symbol_duration as f64,
            control_seconds: config.control_duration as f64,
            long_tones: [config.start_frequency, config.end_frequency],
            noise_floor_db: noise.floor_db,
            candidate: None,
            recent: None,
        }
    }

    pub fn set_noise_floor(&mut self, noise: &NoiseProfile) {
        self.noise_floor_db = noise.floor_db;
    }

    pub fn threshold_db(&self) -> f32 {
        self.noise_floor_db + self.min_snr_db
    }

    /// Forget any run in progress and the debounce history
    pub fn reset(&mut self) {
        self.candidate = None;
        self.recent = None;
    }

    /// Account for a window the capture stream lost.
    ///
    /// The run in progress is broken; a latched tone stays latched.
    pub fn drop_window(&mut self) {
        self.candidate = None;
        if let Some(recent) = self.recent.as_mut() {
            if recent.latched {
                recent.dropped = true;
            }
        }
    }

    /// Longest span, first window to last, in which one tone can be seen
    fn max_hold_seconds(&self, frequency: f32) -> f64 {
        let long = self
            .long_tones
            .iter()
            .any(|&f| (frequency - f).abs() <= self.tolerance_hz);
        let duration = if long {
            self.control_seconds
        } else {
            self.symbol_seconds
        };
        duration + self.window_seconds
    }

    fn passes(&self, event: &DetectionEvent) -> bool {
        event.is_valid()
            && event.snr_db >= self.min_snr_db
            && event.magnitude_db >= self.threshold_db()
    }

    /// Feed one window's detection; returns a symbol when one is confirmed
    pub fn push(&mut self, event: &DetectionEvent) -> Option<ConfirmedSymbol> {
        if !self.passes(event) {
            self.interrupt();
            return None;
        }

        let frequency = event.frequency;
        if let Some(mut recent) = self.recent.filter(|r| r.latched) {
            let outlasted = recent.dropped
                && event.timestamp - recent.onset > self.max_hold_seconds(recent.frequency);
            let same = (frequency - recent.frequency).abs() <= self.tolerance_hz;
            if same && !outlasted {
                recent.last_seen = event.timestamp;
                self.recent = Some(recent);
                return None;
            }
            if same {
                log::debug!(
                    "Latch on {:.1} Hz released after a lost window",
                    recent.frequency
                );
            }
            recent.latched = false;
            self.recent = Some(recent);
        }

        let candidate = match self.candidate {
            Some(mut run) if (frequency - run.frequency()).abs() <= self.tolerance_hz => {
                run.frequency_sum += frequency;
                run.frames += 1;
                run
            }
            _ => Candidate {
                frequency_sum: frequency,
                frames: 1,
                onset: event.timestamp,
            },
        };

        if candidate.frames < self.persistence_frames {
            self.candidate = Some(candidate);
            return None;
        }
        self.candidate = None;

        let confirmed = candidate.frequency();
        let repeat = self.recent.map_or(false, |recent| {
            (confirmed - recent.frequency).abs() <= self.debounce_hz
                && event.timestamp - recent.last_seen < self.debounce_seconds
        });

        self.recent = Some(Recent {
            frequency: confirmed,
            last_seen: event.timestamp,
            onset: candidate.onset,
            latched: true,
            dropped: false,
        });

        if repeat {
            log::debug!(
                "Suppressed repeat of {:.1} Hz at {:.3} s",
                confirmed,
                event.timestamp
            );
            return None;
        }

        log::debug!("Confirmed {:.1} Hz at {:.3} s", confirmed, event.timestamp);
        Some(ConfirmedSymbol {
            frequency: confirmed,
            timestamp: event.timestamp,
        })
    }

    fn interrupt(&mut self) {
        self.candidate = None;
        if let Some(recent) = self.recent.as_mut() {
            recent.latched = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: f64 = 2048.0 / 96_000.0;

    fn stabilizer() -> DetectionStabilizer {
        DetectionStabilizer::new(&ProtocolConfig::canonical(), &NoiseProfile::fixed(-80.0))
    }

    fn tone(frequency: f32, index: usize) -> DetectionEvent {
        DetectionEvent {
            frequency,
            magnitude_db: -3.0,
            snr_db: 30.0,
            timestamp: (index + 1) as f64 * WINDOW,
        }
    }

    fn silence(index: usize) -> DetectionEvent {
        DetectionEvent::silent((index + 1) as f64 * WINDOW)
    }

    fn feed(stabilizer: &mut DetectionStabilizer, events: &[DetectionEvent]) -> Vec<ConfirmedSymbol> {
        events.iter().filter_map(|e| stabilizer.push(e)).collect()
    }

    #[test]
    fn test_single_window_spike_rejected() {
        let mut s = stabilizer();
        let events = [silence(0), tone(20_000.0, 1), silence(2), silence(3)];
        assert!(feed(&mut s, &events).is_empty());
    }

    #[test]
    fn test_two_windows_confirm_once() {
        let mut s = stabilizer();
        let events = [tone(20_010.0, 0), tone(19_990.0, 1)];
        let confirmed = feed(&mut s, &events);
        assert_eq!(confirmed.len(), 1);
        assert!((confirmed[0].frequency - 20_000.0).abs() < 1e-3);
        assert_eq!(confirmed[0].timestamp, 2.0 * WINDOW);
    }

    #[test]
    fn test_held_tone_confirms_once() {
        let mut s = stabilizer();
        let events: Vec<_> = (0..12).map(|i| tone(18_500.0, i)).collect();
        assert_eq!(feed(&mut s, &events).len(), 1);
    }

    #[test]
    fn test_mismatched_window_resets_persistence() {
        let mut s = stabilizer();
        let events = [
            tone(20_000.0, 0),
            tone(21_000.0, 1),
            tone(20_000.0, 2),
            tone(21_000.0, 3),
        ];
        assert!(feed(&mut s, &events).is_empty());
    }

    #[test]
    fn test_separated_repeat_confirmed_twice() {
        let mut s = stabilizer();
        // Two runs of the same tone separated by two silent windows
        let events = [
            tone(20_900.0, 0),
            tone(20_900.0, 1),
            tone(20_900.0, 2),
            silence(3),
            silence(4),
            tone(20_900.0, 5),
            tone(20_900.0, 6),
        ];
        assert_eq!(feed(&mut s, &events).len(), 2);
    }

    #[test]
    fn test_dropout_inside_debounce_suppressed() {
        let config = ProtocolConfig {
            debounce_seconds: 0.1,
            ..ProtocolConfig::canonical()
        };
        let mut s = DetectionStabilizer::new(&config, &NoiseProfile::fixed(-80.0));
        // A one-window dropout splits the tone; the second run completes three
        // windows (about 64 ms) after the first was last seen
        let events = [
            tone(20_900.0, 0),
            tone(20_900.0, 1),
            silence(2),
            tone(20_900.0, 3),
            tone(20_900.0, 4),
        ];
        assert_eq!(feed(&mut s, &events).len(), 1);
    }

    #[test]
    fn test_lost_window_inside_tone_keeps_latch() {
        let mut s = stabilizer();
        let mut confirmed = feed(&mut s, &[tone(18_600.0, 0), tone(18_600.0, 1)]);
        s.drop_window();
        confirmed.extend(feed(&mut s, &[tone(18_600.0, 3), tone(18_600.0, 4)]));
        assert_eq!(confirmed.len(), 1);
    }

    #[test]
    fn test_lost_window_breaks_unconfirmed_run() {
        let mut s = stabilizer();
        assert!(s.push(&tone(20_000.0, 0)).is_none());
        s.drop_window();
        assert!(s.push(&tone(20_000.0, 2)).is_none());
        assert!(s.push(&tone(20_000.0, 3)).is_some());
    }

    #[test]
    fn test_repeat_after_lost_gap_window_confirmed() {
        let mut s = stabilizer();
        // An 80 ms tone seen in windows 0..=3; the silent window 4 between it
        // and the repeat is lost, so only the hold length separates them
        let first: Vec<_> = (0..4).map(|i| tone(20_900.0, i)).collect();
        let mut confirmed = feed(&mut s, &first);
        s.drop_window();
        let second: Vec<_> = (5..9).map(|i| tone(20_900.0, i)).collect();
        confirmed.extend(feed(&mut s, &second));
        assert_eq!(confirmed.len(), 2);
        assert_eq!(confirmed[1].timestamp, 7.0 * WINDOW);
    }

    #[test]
    fn test_long_control_tone_survives_lost_window() {
        let mut s = stabilizer();
        // START is sent for 160 ms, about eight windows
        let mut confirmed = feed(&mut s, &[tone(18_500.0, 0), tone(18_500.0, 1)]);
        s.drop_window();
        let rest: Vec<_> = (3..8).map(|i| tone(18_500.0, i)).collect();
        confirmed.extend(feed(&mut s, &rest));
        assert_eq!(confirmed.len(), 1);
    }

    #[test]
    fn test_weak_or_noisy_windows_ignored() {
        let mut s = stabilizer();
        let quiet = |i| DetectionEvent {
            magnitude_db: -75.0,
            ..tone(20_000.0, i)
        };
        let flat = |i| DetectionEvent {
            snr_db: 4.0,
            ..tone(20_000.0, i)
        };
        let events = [quiet(0), quiet(1), flat(2), flat(3)];
        assert!(feed(&mut s, &events).is_empty());
        assert_eq!(s.threshold_db(), -70.0);
    }

    #[test]
    fn test_raised_floor_blocks_tones() {
        let mut s = stabilizer();
        s.set_noise_floor(&NoiseProfile::fixed(0.0));
        let events = [tone(20_000.0, 0), tone(20_000.0, 1)];
        assert!(feed(&mut s, &events).is_empty());
    }
}
