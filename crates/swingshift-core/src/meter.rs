use tracing::debug;

use crate::{
    model::{
        DEFAULT_BEATS_PER_MEASURE, DEFAULT_METRICAL_LEVEL, DEFAULT_TEMPO_MICROS, Event, EventKind,
        Song, TimeMode, Track,
    },
    time::{TickClock, bpm_to_tempo_micros},
};

fn meta_events(song: &Song) -> impl Iterator<Item = &EventKind> {
    song.meta_track()
        .into_iter()
        .flat_map(|track| track.events.iter())
        .map(|event| &event.kind)
}

/// Microseconds per quarter note from the first tempo event, or 120 BPM when the song has none.
#[must_use]
pub fn tempo_micros(song: &Song) -> u32 {
    meta_events(song)
        .find_map(|kind| match kind {
            EventKind::SetTempo { micros_per_quarter } => Some(*micros_per_quarter),
            _ => None,
        })
        .unwrap_or(DEFAULT_TEMPO_MICROS)
}

#[must_use]
pub fn beats_per_minute(song: &Song) -> f64 {
    tick_clock(song).beats_per_minute()
}

#[must_use]
pub fn tick_clock(song: &Song) -> TickClock {
    TickClock::new(tempo_micros(song), song.resolution_unit)
}

/// Overwrites the first tempo event, or inserts one at the start of the meta track.
pub fn set_tempo(song: &mut Song, bpm: f64) {
    let micros_per_quarter = bpm_to_tempo_micros(bpm);
    if song.tracks.is_empty() {
        song.tracks.push(Track::default());
    }
    let Some(meta) = song.meta_track_mut() else {
        return;
    };

    let existing = meta.events.iter_mut().find_map(|event| match &mut event.kind {
        EventKind::SetTempo { micros_per_quarter } => Some(micros_per_quarter),
        _ => None,
    });

    if let Some(current) = existing {
        debug!(from = *current, to = micros_per_quarter, "tempo overwritten");
        *current = micros_per_quarter;
        return;
    }

    let tempo = Event::new(0, EventKind::SetTempo { micros_per_quarter });
    // Time 0 is the same value in either mode, but a relative track's first delta must survive.
    if meta.mode == TimeMode::Relative {
        meta.events.insert(0, tempo);
    } else {
        let index = meta.events.partition_point(|event| event.time == 0);
        meta.events.insert(index, tempo);
    }
    debug!(micros_per_quarter, "tempo event inserted");
}

fn first_time_signature(song: &Song) -> Option<(u8, u8)> {
    meta_events(song).find_map(|kind| match kind {
        EventKind::TimeSignature {
            numerator,
            subdivisions_per_quarter,
            ..
        } => Some((*numerator, *subdivisions_per_quarter)),
        _ => None,
    })
}

#[must_use]
pub fn beats_per_measure(song: &Song) -> u32 {
    first_time_signature(song)
        .map(|(numerator, _)| u32::from(numerator))
        .filter(|beats| *beats > 0)
        .unwrap_or(DEFAULT_BEATS_PER_MEASURE)
}

/// Finest subdivision the meter advertises; the default grid resolution.
#[must_use]
pub fn fastest_metrical_level(song: &Song) -> u32 {
    first_time_signature(song)
        .map(|(numerator, subdivisions)| u32::from(numerator) * u32::from(subdivisions))
        .filter(|level| *level > 0)
        .unwrap_or(DEFAULT_METRICAL_LEVEL)
}
