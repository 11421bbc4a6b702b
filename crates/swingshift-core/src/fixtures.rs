use crate::model::{DEFAULT_PPQ, Event, EventKind, FormatKind, OtherPayload, Song, Track};

const SIXTEENTH: u64 = DEFAULT_PPQ as u64 / 4;
const EIGHTH: u64 = DEFAULT_PPQ as u64 / 2;
const MELODY: [u8; 8] = [60, 62, 64, 65, 67, 65, 64, 62];

fn track_name(name: &str) -> Event {
    Event::new(
        0,
        EventKind::Other(OtherPayload::Meta {
            meta_type: 0x03,
            data: name.as_bytes().to_vec(),
        }),
    )
}

/// 4/4 at 120 BPM with eight 32nd notes per quarter advertised.
fn meter_events() -> Vec<Event> {
    vec![
        Event::new(
            0,
            EventKind::TimeSignature {
                numerator: 4,
                denominator_exponent: 2,
                clocks_per_click: 24,
                subdivisions_per_quarter: 8,
            },
        ),
        Event::new(
            0,
            EventKind::SetTempo {
                micros_per_quarter: 500_000,
            },
        ),
    ]
}

fn meta_track(name: &str) -> Track {
    let mut events = vec![track_name(name)];
    events.extend(meter_events());
    Track::new(events)
}

fn two_track_song(name: &str, performance: Vec<Event>) -> Song {
    let mut song = Song::new(DEFAULT_PPQ, FormatKind::Parallel);
    song.tracks.push(meta_track(name));
    song.tracks.push(Track::new(performance));
    song
}

/// Back-to-back sixteenth notes; every onset and release sits on the sixteenth grid.
#[must_use]
pub fn straight_sixteenths(bars: usize) -> Song {
    let mut performance = Vec::with_capacity(bars * 32);
    for index in 0..bars * 16 {
        let note = MELODY[index % MELODY.len()];
        let velocity = if index % 4 == 0 { 110 } else { 84 };
        performance.push(Event::note_on(0, 0, note, velocity));
        performance.push(Event::note_off(SIXTEENTH, 0, note, 0));
    }
    two_track_song("Straight sixteenths", performance)
}

/// One whole-bar note.
#[must_use]
pub fn single_note_song() -> Song {
    two_track_song(
        "Single note",
        vec![
            Event::note_on(0, 0, 60, 100),
            Event::note_off(4 * u64::from(DEFAULT_PPQ), 0, 60, 0),
        ],
    )
}

/// Two bars of detached eighths in a single-track file, as many sequencers export them.
#[must_use]
pub fn demo_song() -> Song {
    let mut events = vec![track_name("Swingshift demo")];
    events.extend(meter_events());

    let mut rest = 0;
    for index in 0..16 {
        let note = MELODY[(index * 3) % MELODY.len()];
        // the last note is held to the barline so the take spans whole bars
        let length = if index == 15 { EIGHTH } else { EIGHTH * 3 / 4 };
        events.push(Event::note_on(rest, 1, note, 96));
        events.push(Event::note_off(length, 1, note, 0));
        rest = EIGHTH / 4;
    }
    events.push(Event::new(
        0,
        EventKind::Other(OtherPayload::Meta {
            meta_type: 0x06,
            data: b"end".to_vec(),
        }),
    ));

    let mut song = Song::new(DEFAULT_PPQ, FormatKind::SingleTrack);
    song.tracks.push(Track::new(events));
    song
}
