use serde::Serialize;
use tracing::{debug, instrument};

use crate::{meter::beats_per_measure, model::Song};

/// One bar of reference positions, stored relative to the bar start.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GridBar {
    pub start_tick: f64,
    pub offsets: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SlotMatch {
    pub bar: usize,
    pub slot: usize,
    /// Signed distance from the matched slot, in ticks.
    pub distance: f64,
}

/// Metrical reference grid spanning the whole performance track.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Grid {
    pub resolution: u32,
    pub beats_per_measure: u32,
    pub resolution_unit: u16,
    pub total_ticks: u64,
    pub note_count: usize,
    pub bars: Vec<GridBar>,
    template: Vec<f64>,
}

/// Total grid slots covering `total_ticks` at the given resolution.
#[must_use]
pub fn note_count(total_ticks: u64, resolution_unit: u16, resolution: u32, beats: u32) -> usize {
    if resolution == 0 || beats == 0 || resolution_unit == 0 {
        return 0;
    }
    let quarters = total_ticks as f64 / f64::from(resolution_unit);
    let slots_per_quarter = f64::from(resolution) / f64::from(beats);
    (quarters * slots_per_quarter).round() as usize
}

#[must_use]
pub fn song_note_count(song: &Song, resolution: u32) -> usize {
    note_count(
        song.performance_ticks(),
        song.resolution_unit,
        resolution,
        beats_per_measure(song),
    )
}

impl Grid {
    #[must_use]
    #[instrument(skip(song))]
    pub fn build(song: &Song, resolution: u32) -> Self {
        Self::from_parts(
            song.performance_ticks(),
            song.resolution_unit,
            beats_per_measure(song),
            resolution,
        )
    }

    #[must_use]
    pub fn from_parts(
        total_ticks: u64,
        resolution_unit: u16,
        beats_per_measure: u32,
        resolution: u32,
    ) -> Self {
        let resolution = resolution.max(1);
        let beats_per_measure = beats_per_measure.max(1);
        let resolution_unit = resolution_unit.max(1);
        let note_count = note_count(total_ticks, resolution_unit, resolution, beats_per_measure);

        let measure_ticks = u64::from(resolution_unit) * u64::from(beats_per_measure);
        let slot_tick = |index: u64| (index * measure_ticks) as f64 / f64::from(resolution);

        let per_bar = resolution as usize;
        let template: Vec<f64> = (0..u64::from(resolution)).map(slot_tick).collect();
        let absolute: Vec<f64> = (0..note_count as u64).map(slot_tick).collect();
        let bars: Vec<GridBar> = absolute
            .chunks(per_bar)
            .map(|chunk| {
                let start_tick = chunk[0];
                GridBar {
                    start_tick,
                    offsets: chunk.iter().map(|tick| tick - start_tick).collect(),
                }
            })
            .collect();

        debug!(
            total_ticks,
            note_count,
            bars = bars.len(),
            "grid built"
        );

        Self {
            resolution,
            beats_per_measure,
            resolution_unit,
            total_ticks,
            note_count,
            bars,
            template,
        }
    }

    /// Whole bars covered by the grid; a trailing partial bar is not counted.
    #[must_use]
    pub fn bar_count(&self) -> usize {
        self.note_count / self.resolution as usize
    }

    fn measure_ticks(&self) -> f64 {
        f64::from(self.resolution_unit) * f64::from(self.beats_per_measure)
    }

    /// Length of one bar as the performance is divided; a full measure when the track is too
    /// short to hold one.
    #[must_use]
    pub fn bar_ticks(&self) -> f64 {
        let bars = self.bar_count();
        if bars == 0 || self.total_ticks == 0 {
            return self.measure_ticks();
        }
        self.total_ticks as f64 / bars as f64
    }

    #[must_use]
    pub fn current_bar(&self, tick: u64) -> usize {
        (tick as f64 / self.bar_ticks()).floor() as usize
    }

    /// Reference offsets for `bar`. Bars past the built grid reuse the full-bar layout.
    #[must_use]
    pub fn bar_offsets(&self, bar: usize) -> &[f64] {
        self.bars
            .get(bar)
            .map_or(self.template.as_slice(), |grid_bar| grid_bar.offsets.as_slice())
    }

    /// First slot of the event's bar lying within `tolerance_ticks` of the event.
    #[must_use]
    pub fn match_slot(&self, tick: u64, tolerance_ticks: u64) -> Option<SlotMatch> {
        let bar = self.current_bar(tick);
        let offset = tick as f64 - bar as f64 * self.bar_ticks();
        let tolerance = tolerance_ticks as f64;

        self.bar_offsets(bar)
            .iter()
            .enumerate()
            .find(|(_, reference)| (offset - *reference).abs() <= tolerance)
            .map(|(slot, reference)| SlotMatch {
                bar,
                slot,
                distance: offset - reference,
            })
    }
}
