use tracing::{debug, instrument};

use crate::model::{Event, EventKind, FormatKind, Song, Track};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Destination {
    Meta,
    Performance,
}

fn destination(kind: &EventKind) -> Destination {
    match kind {
        EventKind::NoteOn { .. } | EventKind::NoteOff { .. } => Destination::Performance,
        EventKind::SetTempo { .. } | EventKind::TimeSignature { .. } | EventKind::Other(_) => {
            Destination::Meta
        }
    }
}

/// One destination track under construction.
#[derive(Debug, Default)]
struct Lane {
    events: Vec<Event>,
    /// Ticks owed to the next event, left over from earlier source tracks.
    carry: u64,
    /// Ticks since this lane's last event in the current source track.
    elapsed: u64,
    touched: bool,
}

impl Lane {
    fn begin_source(&mut self) {
        self.elapsed = 0;
        self.touched = false;
    }

    fn push(&mut self, kind: EventKind) {
        let delta = self.carry.saturating_add(self.elapsed);
        self.events.push(Event::new(delta, kind));
        self.carry = 0;
        self.elapsed = 0;
        self.touched = true;
    }

    /// A source track that fed this lane hands over its remaining span.
    fn end_source(&mut self, end_padding: u64) {
        if self.touched {
            self.carry = self.elapsed.saturating_add(end_padding);
        }
    }

    fn into_track(self) -> Track {
        Track::new(self.events).with_end_padding(self.carry)
    }
}

/// Collapses a song into one meta track and one performance track.
///
/// Songs that already have exactly two tracks are returned untouched. Otherwise events are routed
/// by kind in encounter order, source track by source track, without re-sorting by time. Within a
/// source track each routed event keeps its distance from the previous event routed to the same
/// destination, and the source tracks feeding a destination are laid end to end.
#[must_use]
#[instrument(skip(song), fields(tracks = song.tracks.len()))]
pub fn normalize(song: Song) -> Song {
    if song.tracks.len() == 2 {
        debug!("song already has the two-track layout");
        return song;
    }

    let mut meta = Lane::default();
    let mut performance = Lane::default();

    for mut track in song.tracks {
        track.to_relative();
        meta.begin_source();
        performance.begin_source();

        for event in track.events {
            meta.elapsed = meta.elapsed.saturating_add(event.time);
            performance.elapsed = performance.elapsed.saturating_add(event.time);
            match destination(&event.kind) {
                Destination::Meta => meta.push(event.kind),
                Destination::Performance => performance.push(event.kind),
            }
        }

        meta.end_source(track.end_padding);
        performance.end_source(track.end_padding);
    }

    let tracks = vec![meta.into_track(), performance.into_track()];
    debug!(
        meta_events = tracks[0].events.len(),
        performance_events = tracks[1].events.len(),
        performance_ticks = tracks[1].end_tick(),
        "song normalized"
    );

    Song {
        resolution_unit: song.resolution_unit,
        format: FormatKind::Parallel,
        tracks,
    }
}
