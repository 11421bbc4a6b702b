use crate::model::{DEFAULT_TEMPO_MICROS, Event, TimeMode, Track};

pub const MICROS_PER_MINUTE: f64 = 60_000_000.0;

/// Replaces delta times with running totals. The first event keeps its own delta.
pub fn to_absolute(events: &mut [Event]) {
    let mut elapsed = 0_u64;
    for event in events {
        elapsed = elapsed.saturating_add(event.time);
        event.time = elapsed;
    }
}

/// Replaces absolute times with deltas from the previous event.
///
/// Events must already be sorted by absolute time.
pub fn to_relative(events: &mut [Event]) {
    debug_assert!(
        events.windows(2).all(|pair| pair[0].time <= pair[1].time),
        "to_relative requires events sorted by absolute time"
    );

    let mut previous = 0_u64;
    for event in events {
        let absolute = event.time;
        event.time = absolute.saturating_sub(previous);
        previous = absolute;
    }
}

impl Track {
    pub fn to_absolute(&mut self) {
        if self.mode == TimeMode::Absolute {
            return;
        }
        to_absolute(&mut self.events);
        self.mode = TimeMode::Absolute;
    }

    pub fn to_relative(&mut self) {
        if self.mode == TimeMode::Relative {
            return;
        }
        to_relative(&mut self.events);
        self.mode = TimeMode::Relative;
    }
}

/// Tick/millisecond arithmetic for one tempo and resolution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickClock {
    pub tempo_micros: u32,
    pub resolution_unit: u16,
}

impl TickClock {
    #[must_use]
    pub fn new(tempo_micros: u32, resolution_unit: u16) -> Self {
        Self {
            tempo_micros: if tempo_micros == 0 {
                DEFAULT_TEMPO_MICROS
            } else {
                tempo_micros
            },
            resolution_unit: resolution_unit.max(1),
        }
    }

    #[must_use]
    pub fn beats_per_minute(&self) -> f64 {
        MICROS_PER_MINUTE / f64::from(self.tempo_micros)
    }

    #[must_use]
    pub fn micros_per_tick(&self) -> f64 {
        f64::from(self.tempo_micros) / f64::from(self.resolution_unit)
    }

    #[must_use]
    pub fn millis_per_tick(&self) -> f64 {
        self.micros_per_tick() / 1_000.0
    }

    /// Rounds half away from zero, so negative durations map to negative ticks.
    #[must_use]
    pub fn ms_to_ticks(&self, ms: f64) -> i64 {
        (ms / self.millis_per_tick()).round() as i64
    }
}

#[must_use]
pub fn bpm_to_tempo_micros(bpm: f64) -> u32 {
    if bpm <= 0.0 {
        return DEFAULT_TEMPO_MICROS;
    }
    (MICROS_PER_MINUTE / bpm).round() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deltas(times: &[u64]) -> Vec<Event> {
        times
            .iter()
            .map(|&time| Event::note_on(time, 0, 60, 100))
            .collect()
    }

    #[test]
    fn absolute_times_accumulate_deltas() {
        let mut events = deltas(&[10, 0, 120, 5]);
        to_absolute(&mut events);
        let times: Vec<u64> = events.iter().map(|event| event.time).collect();
        assert_eq!(times, vec![10, 10, 130, 135]);
    }

    #[test]
    fn relative_keeps_first_event_time() {
        let mut events = deltas(&[30, 60, 60, 200]);
        to_relative(&mut events);
        let times: Vec<u64> = events.iter().map(|event| event.time).collect();
        assert_eq!(times, vec![30, 30, 0, 140]);
    }

    #[test]
    fn track_mode_conversions_are_idempotent() {
        let mut track = Track::new(deltas(&[0, 240, 240]));
        track.to_absolute();
        track.to_absolute();
        assert_eq!(track.mode, TimeMode::Absolute);
        assert_eq!(track.events[2].time, 480);

        track.to_relative();
        track.to_relative();
        assert_eq!(track.mode, TimeMode::Relative);
        assert_eq!(track.events[2].time, 240);
    }

    #[test]
    fn default_tempo_is_120_bpm() {
        let clock = TickClock::new(500_000, 480);
        assert!((clock.beats_per_minute() - 120.0).abs() < f64::EPSILON);
        assert!((clock.millis_per_tick() - 500.0 / 480.0).abs() < 1e-12);
    }

    #[test]
    fn ms_to_ticks_rounds_half_away_from_zero() {
        // 1 tick == 1 ms
        let clock = TickClock::new(480_000, 480);
        assert_eq!(clock.ms_to_ticks(2.5), 3);
        assert_eq!(clock.ms_to_ticks(-2.5), -3);
        assert_eq!(clock.ms_to_ticks(0.0), 0);
    }

    #[test]
    fn thirty_ms_at_120_bpm() {
        let clock = TickClock::new(500_000, 480);
        // 30 / (500/480) = 28.8
        assert_eq!(clock.ms_to_ticks(30.0), 29);
        assert_eq!(clock.ms_to_ticks(-30.0), -29);
    }

    #[test]
    fn bpm_converts_to_tempo() {
        assert_eq!(bpm_to_tempo_micros(120.0), 500_000);
        assert_eq!(bpm_to_tempo_micros(90.0), 666_667);
        assert_eq!(bpm_to_tempo_micros(0.0), DEFAULT_TEMPO_MICROS);
    }
}
