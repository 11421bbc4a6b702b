use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, trace};

use crate::{
    engine::EngineError,
    grid::Grid,
    model::{Event, Track},
    pattern::PatternResolver,
    time::TickClock,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviationParams {
    pub magnitude_ms: f64,
    pub tolerance_ticks: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviationSummary {
    pub events: usize,
    pub shifted: usize,
    pub max_shift_ticks: u64,
}

/// Tick offset for a weight at the configured magnitude.
#[must_use]
pub fn shift_ticks(clock: &TickClock, magnitude_ms: f64, weight: f64) -> i64 {
    clock.ms_to_ticks(magnitude_ms * weight)
}

/// Moves one absolute-time event by the weight of the grid slot it sits on.
pub fn shift_event(
    event: &mut Event,
    grid: &Grid,
    clock: &TickClock,
    resolver: &mut PatternResolver,
    params: &DeviationParams,
) -> Result<i64, EngineError> {
    let tick = event.time;
    let hit = grid
        .match_slot(tick, params.tolerance_ticks)
        .ok_or_else(|| EngineError::NoGridMatch {
            tick,
            bar: grid.current_bar(tick),
            resolution: grid.resolution,
            tolerance_ticks: params.tolerance_ticks,
        })?;

    let weight = resolver.for_bar(hit.bar).weight(hit.slot);
    let shift = shift_ticks(clock, params.magnitude_ms, weight);
    event.time = tick.saturating_add_signed(shift);

    trace!(
        tick,
        bar = hit.bar,
        slot = hit.slot,
        weight,
        shift,
        "event shifted"
    );
    Ok(shift)
}

/// Shifts every event of the track, then restores time order and relative deltas.
/// The end-of-track tick is kept where it was.
#[instrument(skip_all, fields(events = track.events.len(), magnitude_ms = params.magnitude_ms, tolerance_ticks = params.tolerance_ticks))]
pub fn apply_deviation(
    track: &mut Track,
    grid: &Grid,
    clock: &TickClock,
    resolver: &mut PatternResolver,
    params: &DeviationParams,
) -> Result<DeviationSummary, EngineError> {
    let end_tick = track.end_tick();
    track.to_absolute();

    let mut summary = DeviationSummary {
        events: track.events.len(),
        ..DeviationSummary::default()
    };
    for event in &mut track.events {
        let shift = shift_event(event, grid, clock, resolver, params)?;
        if shift != 0 {
            summary.shifted += 1;
            summary.max_shift_ticks = summary.max_shift_ticks.max(shift.unsigned_abs());
        }
    }

    // Shifts can swap neighbours; the sort is stable so ties keep their order.
    track.events.sort_by_key(|event| event.time);
    // The end marker stays put unless an event was pushed past it.
    track.end_padding = end_tick.saturating_sub(track.last_event_tick());
    track.to_relative();

    debug!(
        shifted = summary.shifted,
        max_shift_ticks = summary.max_shift_ticks,
        "deviation applied"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        model::{EventKind, TimeMode},
        pattern::{Pattern, PatternSource},
    };

    fn clock() -> TickClock {
        TickClock::new(500_000, 480)
    }

    fn resolver(weights: &[f64]) -> PatternResolver {
        PatternResolver::from_source(&PatternSource::Positional(weights.to_vec()), None)
            .expect("valid pattern")
    }

    fn params(magnitude_ms: f64) -> DeviationParams {
        DeviationParams {
            magnitude_ms,
            tolerance_ticks: 0,
        }
    }

    #[test]
    fn positive_weight_pushes_event_later() {
        let grid = Grid::from_parts(1_920, 480, 4, 16);
        let mut event = Event::note_on(480, 0, 60, 100);
        let mut weights = vec![0.0; 16];
        weights[4] = 1.0;

        let shift = shift_event(
            &mut event,
            &grid,
            &clock(),
            &mut resolver(&weights),
            &params(30.0),
        )
        .expect("on-grid event");
        assert_eq!(shift, 29);
        assert_eq!(event.time, 509);
    }

    #[test]
    fn negative_weight_pulls_event_earlier() {
        let grid = Grid::from_parts(1_920, 480, 4, 16);
        let mut event = Event::note_on(480, 0, 60, 100);
        let mut weights = vec![0.0; 16];
        weights[4] = -1.0;

        let shift = shift_event(
            &mut event,
            &grid,
            &clock(),
            &mut resolver(&weights),
            &params(30.0),
        )
        .expect("on-grid event");
        assert_eq!(shift, -29);
        assert_eq!(event.time, 451);
    }

    #[test]
    fn shifts_before_the_start_saturate_at_zero() {
        let grid = Grid::from_parts(1_920, 480, 4, 16);
        let mut event = Event::note_on(0, 0, 60, 100);
        let shift = shift_event(
            &mut event,
            &grid,
            &clock(),
            &mut PatternResolver::Fixed(Pattern::new(&[-1.0]).expect("pattern")),
            &params(30.0),
        )
        .expect("downbeat");
        assert_eq!(shift, -29);
        assert_eq!(event.time, 0);
    }

    #[test]
    fn unmatched_event_is_fatal() {
        let grid = Grid::from_parts(1_920, 480, 4, 16);
        let mut event = Event::note_on(61, 0, 60, 100);
        let error = shift_event(
            &mut event,
            &grid,
            &clock(),
            &mut resolver(&[1.0]),
            &params(10.0),
        )
        .expect_err("off-grid event with zero tolerance");
        assert!(matches!(
            error,
            EngineError::NoGridMatch {
                tick: 61,
                bar: 0,
                ..
            }
        ));
    }

    #[test]
    fn track_is_resorted_after_shifting() {
        let grid = Grid::from_parts(1_920, 480, 4, 16);
        // 300 ms at 2 s per quarter is 72 ticks, enough for slots 0 and 1 to cross
        let mut weights = vec![0.0; 16];
        weights[0] = 1.0;
        weights[1] = -1.0;
        let mut track = Track::new(vec![
            Event::note_on(0, 0, 60, 100),
            Event::note_on(120, 0, 62, 100),
            Event::note_off(1_800, 0, 60, 0),
        ]);

        let summary = apply_deviation(
            &mut track,
            &grid,
            &TickClock::new(2_000_000, 480),
            &mut resolver(&weights),
            &params(300.0),
        )
        .expect("all events on grid");

        assert_eq!(summary.events, 3);
        assert_eq!(summary.shifted, 2);
        assert_eq!(summary.max_shift_ticks, 72);
        assert_eq!(track.mode, TimeMode::Relative);
        let notes: Vec<(u64, u8)> = track
            .events
            .iter()
            .map(|event| match event.kind {
                EventKind::NoteOn { note, .. } | EventKind::NoteOff { note, .. } => {
                    (event.time, note)
                }
                _ => panic!("only notes in fixture"),
            })
            .collect();
        assert_eq!(notes, vec![(48, 62), (24, 60), (1_728, 60)]);
    }

    #[test]
    fn end_marker_keeps_its_tick() {
        let grid = Grid::from_parts(1_920, 480, 4, 16);
        let mut track = Track::new(vec![
            Event::note_on(0, 0, 60, 100),
            Event::note_off(1_440, 0, 60, 0),
        ])
        .with_end_padding(480);

        apply_deviation(
            &mut track,
            &grid,
            &clock(),
            &mut resolver(&[-1.0]),
            &params(30.0),
        )
        .expect("all events on grid");
        assert_eq!(track.end_padding, 509);
        assert_eq!(track.end_tick(), 1_920);

        let mut late = Track::new(vec![Event::note_on(1_920, 0, 60, 100)]);
        apply_deviation(
            &mut late,
            &grid,
            &clock(),
            &mut resolver(&[1.0]),
            &params(30.0),
        )
        .expect("downbeat of the next bar");
        assert_eq!(late.end_padding, 0);
        assert_eq!(late.end_tick(), 1_949);
    }
}
