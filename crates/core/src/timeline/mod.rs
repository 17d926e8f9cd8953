use std::time::Duration;

/// Render-loop clock: accumulates elapsed time from per-tick deltas.
#[derive(Debug, Default, Clone)]
pub struct FrameClock {
    elapsed: f32,
    delta: f32,
    ticks: u64,
}

impl FrameClock {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Advances by `delta` and returns it in seconds.
    pub fn advance(&mut self, delta: Duration) -> f32 {
        self.delta = delta.as_secs_f32();
        self.elapsed += self.delta;
        self.ticks += 1;
        self.delta
    }

    pub fn elapsed(&self) -> f32 {
        self.elapsed
    }

    pub fn delta(&self) -> f32 {
        self.delta
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }
}

/// Position on the musical grid derived from playback time and tempo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarPosition {
    pub beat: u64,
    pub bar: u64,
}

/// Bar/beat clock. Reports a [`BarPosition`] whenever the derived bar
/// moves forward; an unknown tempo suspends it without losing the last bar.
#[derive(Debug, Clone)]
pub struct BarClock {
    beats_per_bar: u32,
    last_bar: Option<u64>,
}

impl BarClock {
    pub fn new(beats_per_bar: u32) -> Self {
        Self {
            beats_per_bar: beats_per_bar.max(1),
            last_bar: None,
        }
    }

    pub fn beats_per_bar(&self) -> u32 {
        self.beats_per_bar
    }

    pub fn current_bar(&self) -> Option<u64> {
        self.last_bar
    }

    /// Forgets the last bar, so the next valid frame reports a change.
    pub fn reset(&mut self) {
        self.last_bar = None;
    }

    /// `beat = floor(time / (60 / tempo))`, `bar = beat / beats_per_bar`.
    /// Returns `None` for a non-positive or non-finite tempo or time.
    pub fn position(&self, time: f32, tempo: f32) -> Option<BarPosition> {
        if !(tempo.is_finite() && tempo > 0.0) || !(time.is_finite() && time >= 0.0) {
            return None;
        }
        let beat_length = 60.0 / tempo as f64;
        let beat = (time as f64 / beat_length).floor() as u64;
        Some(BarPosition {
            beat,
            bar: beat / self.beats_per_bar as u64,
        })
    }

    /// Feeds one frame; returns the new position only when a later bar
    /// begins. Moving back to an earlier bar reports nothing until the clock
    /// passes its last bar again or is [reset](Self::reset).
    pub fn advance(&mut self, time: f32, tempo: f32) -> Option<BarPosition> {
        let position = self.position(time, tempo)?;
        if self.last_bar.is_some_and(|last| position.bar <= last) {
            return None;
        }
        self.last_bar = Some(position.bar);
        Some(position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_clock_accumulates_deltas() {
        let mut clock = FrameClock::default();
        for _ in 0..4 {
            clock.advance(Duration::from_millis(250));
        }
        assert!((clock.elapsed() - 1.0).abs() < 1e-6);
        assert_eq!(clock.delta(), 0.25);
        assert_eq!(clock.ticks(), 4);

        clock.reset();
        assert_eq!(clock.elapsed(), 0.0);
    }

    #[test]
    fn derives_beats_and_bars_from_tempo() {
        let clock = BarClock::new(4);
        // 120 bpm: half a second per beat, two seconds per bar.
        assert_eq!(clock.position(0.0, 120.0), Some(BarPosition { beat: 0, bar: 0 }));
        assert_eq!(clock.position(1.99, 120.0), Some(BarPosition { beat: 3, bar: 0 }));
        assert_eq!(clock.position(2.0, 120.0), Some(BarPosition { beat: 4, bar: 1 }));
        assert_eq!(clock.position(9.1, 120.0), Some(BarPosition { beat: 18, bar: 4 }));
    }

    #[test]
    fn reports_only_bar_changes() {
        let mut clock = BarClock::new(4);
        let bars: Vec<u64> = (0..100)
            .filter_map(|step| clock.advance(step as f32 * 0.1, 120.0))
            .map(|position| position.bar)
            .collect();
        assert_eq!(bars, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn zero_tempo_suspends_the_clock() {
        let mut clock = BarClock::new(4);
        assert_eq!(clock.advance(5.0, 0.0), None);
        assert_eq!(clock.advance(5.0, f32::NAN), None);
        assert_eq!(clock.advance(5.0, -90.0), None);
        assert_eq!(clock.current_bar(), None);

        assert!(clock.advance(0.0, 120.0).is_some());
        assert_eq!(clock.advance(100.0, 0.0), None);
        assert_eq!(clock.current_bar(), Some(0));
    }

    #[test]
    fn seeking_backwards_reports_nothing_until_the_last_bar_is_passed() {
        let mut clock = BarClock::new(4);
        assert_eq!(clock.advance(4.5, 120.0).map(|p| p.bar), Some(2));
        assert_eq!(clock.advance(0.1, 120.0), None);
        assert_eq!(clock.advance(2.5, 120.0), None);
        assert_eq!(clock.advance(4.9, 120.0), None);
        assert_eq!(clock.current_bar(), Some(2));
        assert_eq!(clock.advance(6.0, 120.0).map(|p| p.bar), Some(3));
    }

    #[test]
    fn reset_rearms_the_current_bar() {
        let mut clock = BarClock::new(3);
        assert!(clock.advance(0.5, 60.0).is_some());
        assert!(clock.advance(0.7, 60.0).is_none());
        clock.reset();
        assert!(clock.advance(0.7, 60.0).is_some());
    }
}
