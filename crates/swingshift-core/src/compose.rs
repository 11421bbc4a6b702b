use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::model::{Event, EventKind};

/// Bar used to place the cut point in each loop copy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipBoundary {
    pub bar: u32,
}

impl ClipBoundary {
    #[must_use]
    pub fn new(bar: u32) -> Self {
        Self { bar }
    }

    /// Cut point for the `copy`-th repetition, counting from 1.
    #[must_use]
    pub fn cutoff(&self, total_ticks: u64, copy: u32) -> u64 {
        (total_ticks / (u64::from(self.bar) + 1)) * u64::from(copy)
    }
}

/// Running tick position across every copy of one composition.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ClipAccumulator {
    pub position: u64,
    pub clipped: usize,
}

impl ClipAccumulator {
    fn advance(&mut self, delta: u64) {
        self.position = self.position.saturating_add(delta);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Composition {
    pub events: Vec<Event>,
    /// Ticks between the last composed event and the end of the final copy.
    pub end_padding: u64,
    pub clipped: usize,
}

/// Turns the event that crosses a cut point into a note-off landing exactly on it.
fn truncate(event: &Event, delta: u64) -> Event {
    let kind = match &event.kind {
        EventKind::NoteOn {
            channel,
            note,
            velocity,
        }
        | EventKind::NoteOff {
            channel,
            note,
            velocity,
        } => EventKind::NoteOff {
            channel: *channel,
            note: *note,
            velocity: *velocity,
        },
        other => other.clone(),
    };
    Event::new(delta, kind)
}

/// Concatenates `loops` copies of a relative-time event list. Each copy lasts until its
/// `end_padding` has elapsed, so the next copy starts on the end marker of the previous one.
///
/// With a clip boundary, the first event of each copy that reaches that copy's cut point is
/// replaced by a note-off ending on the cut point. The accumulator spans all copies.
#[must_use]
#[instrument(skip(events), fields(events = events.len()))]
pub fn compose(
    events: &[Event],
    end_padding: u64,
    total_ticks: u64,
    loops: u32,
    clip: Option<ClipBoundary>,
) -> Composition {
    let loops = loops.max(1);
    let clip = clip.filter(|_| total_ticks > 0);

    let mut composed = Vec::with_capacity(events.len() * loops as usize);
    let mut accumulator = ClipAccumulator::default();
    let mut gap = 0_u64;

    for copy in 1..=loops {
        let cutoff = clip.map(|boundary| boundary.cutoff(total_ticks, copy));
        let mut truncated = false;

        for event in events {
            let delta = gap.saturating_add(event.time);
            gap = 0;
            let reaches_cutoff = cutoff
                .filter(|_| !truncated)
                .filter(|cutoff| accumulator.position.saturating_add(delta) >= *cutoff);

            let event = match reaches_cutoff {
                Some(cutoff) => {
                    truncated = true;
                    accumulator.clipped += 1;
                    truncate(event, cutoff.saturating_sub(accumulator.position))
                }
                None => Event::new(delta, event.kind.clone()),
            };
            accumulator.advance(event.time);
            composed.push(event);
        }
        gap = gap.saturating_add(end_padding);
    }

    debug!(
        loops,
        composed = composed.len(),
        clipped = accumulator.clipped,
        "loops composed"
    );

    Composition {
        events: composed,
        end_padding: gap,
        clipped: accumulator.clipped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OtherPayload;

    fn one_bar() -> Vec<Event> {
        vec![
            Event::note_on(0, 0, 60, 100),
            Event::note_off(960, 0, 60, 0),
            Event::note_on(0, 0, 62, 100),
            Event::note_off(960, 0, 62, 0),
        ]
    }

    #[test]
    fn single_loop_is_identity() {
        let composition = compose(&one_bar(), 0, 1_920, 1, None);
        assert_eq!(composition.events, one_bar());
        assert_eq!(composition.clipped, 0);
    }

    #[test]
    fn loops_concatenate_in_order() {
        let composition = compose(&one_bar(), 0, 1_920, 3, None);
        assert_eq!(composition.events.len(), 12);
        assert_eq!(composition.events[4..8], one_bar()[..]);
        assert_eq!(composition.events[8..], one_bar()[..]);
    }

    #[test]
    fn zero_loops_behave_as_one() {
        assert_eq!(compose(&one_bar(), 0, 1_920, 0, None).events, one_bar());
    }

    #[test]
    fn cutoff_scales_with_copy_index() {
        let boundary = ClipBoundary::new(1);
        assert_eq!(boundary.cutoff(1_920, 1), 960);
        assert_eq!(boundary.cutoff(1_920, 2), 1_920);
        assert_eq!(ClipBoundary::default().cutoff(1_921, 3), 5_763);
    }

    #[test]
    fn late_final_note_off_is_pulled_to_loop_boundary() {
        let events = vec![
            Event::note_on(0, 0, 60, 100),
            Event::note_off(1_949, 0, 60, 0),
        ];
        let composition = compose(&events, 0, 1_920, 2, Some(ClipBoundary::default()));
        assert_eq!(composition.clipped, 2);
        assert_eq!(composition.events[1], Event::note_off(1_920, 0, 60, 0));
        // second copy starts exactly on the boundary and clips at twice the total
        assert_eq!(composition.events[2], Event::note_on(0, 0, 60, 100));
        assert_eq!(composition.events[3], Event::note_off(1_920, 0, 60, 0));
    }

    #[test]
    fn crossing_note_on_becomes_note_off() {
        let events = vec![
            Event::note_on(0, 0, 60, 100),
            Event::note_on(1_000, 0, 64, 90),
            Event::note_off(920, 0, 64, 0),
        ];
        let composition = compose(&events, 0, 1_920, 1, Some(ClipBoundary::new(1)));
        assert_eq!(composition.clipped, 1);
        assert_eq!(composition.events[1], Event::note_off(960, 0, 64, 90));
        // only the first crossing event per copy is rewritten
        assert_eq!(composition.events[2], Event::note_off(920, 0, 64, 0));
    }

    #[test]
    fn crossing_meta_event_keeps_its_kind() {
        let marker = EventKind::Other(OtherPayload::Meta {
            meta_type: 0x06,
            data: b"B".to_vec(),
        });
        let events = vec![
            Event::note_on(0, 0, 60, 100),
            Event::new(2_000, marker.clone()),
        ];
        let composition = compose(&events, 0, 1_920, 1, Some(ClipBoundary::default()));
        assert_eq!(composition.events[1], Event::new(1_920, marker));
    }

    #[test]
    fn early_copy_end_is_not_stretched() {
        let events = vec![
            Event::note_on(0, 0, 60, 100),
            Event::note_off(1_900, 0, 60, 0),
        ];
        let composition = compose(&events, 0, 1_920, 2, Some(ClipBoundary::default()));
        // copy one ends at 1900, copy two ends at 3800, neither reaches its cut point
        assert_eq!(composition.clipped, 0);
        assert_eq!(composition.events, [events.clone(), events].concat());
    }

    #[test]
    fn end_padding_separates_copies() {
        let events = vec![
            Event::note_on(0, 0, 60, 100),
            Event::note_off(1_800, 0, 60, 0),
        ];
        let composition = compose(&events, 120, 1_920, 2, None);
        assert_eq!(composition.events[2], Event::note_on(120, 0, 60, 100));
        assert_eq!(composition.end_padding, 120);

        let clipped = compose(&events, 120, 1_920, 2, Some(ClipBoundary::default()));
        // neither copy reaches its cut point once the padding is counted
        assert_eq!(clipped.clipped, 0);
        assert_eq!(clipped.events, composition.events);
    }
}
