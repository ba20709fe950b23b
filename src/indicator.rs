//! Status indicator patterns.
//!
//! Rendering is a pure function of the pattern and the time since it was
//! selected; [`Indicator`] only tracks the phase reference and writes the
//! output when the level actually changes.

use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{self, Instant};

use crate::hal::IndicatorOutput;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Pattern {
    #[default]
    Off,
    Ok,
    Error,
    UpdateInProgress,
}

const PULSE_MS: u128 = 150;
const PERIOD_MS: u128 = 2000;
const FAST_PERIOD_MS: u128 = 600;

/// Output level of `pattern` after `elapsed` in that pattern.
pub fn level(pattern: Pattern, elapsed: Duration) -> bool {
    let ms = elapsed.as_millis();
    match pattern {
        Pattern::Off => false,
        Pattern::Ok => ms % PERIOD_MS < PULSE_MS,
        Pattern::Error => {
            let pos = ms % PERIOD_MS;
            pos < PULSE_MS || (2 * PULSE_MS..3 * PULSE_MS).contains(&pos)
        }
        Pattern::UpdateInProgress => ms % FAST_PERIOD_MS < FAST_PERIOD_MS / 2,
    }
}

pub struct Indicator<O> {
    output: O,
    pattern: Pattern,
    since: Instant,
    lit: bool,
}

impl<O: IndicatorOutput> Indicator<O> {
    pub fn new(mut output: O, now: Instant) -> Self {
        output.write(false);
        Self {
            output,
            pattern: Pattern::Off,
            since: now,
            lit: false,
        }
    }

    pub fn pattern(&self) -> Pattern {
        self.pattern
    }

    /// Selecting a different pattern restarts its waveform.
    pub fn set_pattern(&mut self, pattern: Pattern, now: Instant) {
        if pattern != self.pattern {
            self.pattern = pattern;
            self.since = now;
        }
    }

    pub fn update(&mut self, now: Instant) {
        let on = level(self.pattern, now.saturating_duration_since(self.since));
        if on != self.lit {
            self.output.write(on);
            self.lit = on;
        }
    }
}

/// Renders the pattern published on `patterns` until the sender is dropped.
pub async fn run<O: IndicatorOutput>(
    output: O,
    mut patterns: watch::Receiver<Pattern>,
    tick: Duration,
) {
    let mut indicator = Indicator::new(output, Instant::now());
    let mut ticker = time::interval(tick);
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            changed = patterns.changed() => {
                if changed.is_err() {
                    break;
                }
                let next = *patterns.borrow_and_update();
                indicator.set_pattern(next, Instant::now());
            }
            _ = ticker.tick() => {}
        }
        indicator.update(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::sim::RecordingOutput;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn waveforms() {
        assert!(!level(Pattern::Off, ms(0)));
        assert!(!level(Pattern::Off, ms(1234)));

        assert!(level(Pattern::Ok, ms(0)));
        assert!(level(Pattern::Ok, ms(149)));
        assert!(!level(Pattern::Ok, ms(150)));
        assert!(!level(Pattern::Ok, ms(1999)));
        assert!(level(Pattern::Ok, ms(2000)));

        assert!(level(Pattern::Error, ms(100)));
        assert!(!level(Pattern::Error, ms(200)));
        assert!(level(Pattern::Error, ms(300)));
        assert!(level(Pattern::Error, ms(449)));
        assert!(!level(Pattern::Error, ms(450)));
        assert!(level(Pattern::Error, ms(2300)));

        assert!(level(Pattern::UpdateInProgress, ms(0)));
        assert!(level(Pattern::UpdateInProgress, ms(299)));
        assert!(!level(Pattern::UpdateInProgress, ms(300)));
        assert!(level(Pattern::UpdateInProgress, ms(600)));
    }

    #[test]
    fn writes_only_on_transitions() {
        let out = RecordingOutput::default();
        let t0 = Instant::now();
        let mut ind = Indicator::new(out.clone(), t0);
        ind.set_pattern(Pattern::Ok, t0);
        for step in 0..40 {
            ind.update(t0 + ms(step * 25));
        }
        // initial off, on at 0ms, off at 150ms
        assert_eq!(out.writes(), vec![false, true, false]);
    }

    #[test]
    fn changing_pattern_resets_phase() {
        let out = RecordingOutput::default();
        let t0 = Instant::now();
        let mut ind = Indicator::new(out.clone(), t0);
        ind.set_pattern(Pattern::Ok, t0);
        ind.update(t0 + ms(1000));
        assert_eq!(out.writes(), vec![false]);

        ind.set_pattern(Pattern::Error, t0 + ms(1000));
        ind.update(t0 + ms(1000));
        assert_eq!(out.writes(), vec![false, true]);

        ind.set_pattern(Pattern::Error, t0 + ms(1100));
        ind.update(t0 + ms(1200));
        assert_eq!(out.writes(), vec![false, true, false]);
        assert_eq!(ind.pattern(), Pattern::Error);
    }
}
