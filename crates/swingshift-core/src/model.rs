use midly::MidiMessage;
use serde::{Deserialize, Serialize};

pub const DEFAULT_PPQ: u16 = 480;
pub const DEFAULT_TEMPO_MICROS: u32 = 500_000;
pub const DEFAULT_BEATS_PER_MEASURE: u32 = 4;
pub const DEFAULT_METRICAL_LEVEL: u32 = 16;
pub const META_TRACK: usize = 0;
pub const PERFORMANCE_TRACK: usize = 1;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FormatKind {
    SingleTrack,
    Parallel,
    Sequential,
}

/// Whether event times hold deltas from the previous event or ticks from the track start.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TimeMode {
    #[default]
    Relative,
    Absolute,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Song {
    /// Ticks per quarter note.
    pub resolution_unit: u16,
    pub format: FormatKind,
    pub tracks: Vec<Track>,
}

impl Song {
    #[must_use]
    pub fn new(resolution_unit: u16, format: FormatKind) -> Self {
        Self {
            resolution_unit: resolution_unit.max(1),
            format,
            tracks: Vec::new(),
        }
    }

    #[must_use]
    pub fn meta_track(&self) -> Option<&Track> {
        self.tracks.get(META_TRACK)
    }

    pub fn meta_track_mut(&mut self) -> Option<&mut Track> {
        self.tracks.get_mut(META_TRACK)
    }

    #[must_use]
    pub fn performance_track(&self) -> Option<&Track> {
        self.tracks.get(PERFORMANCE_TRACK)
    }

    pub fn performance_track_mut(&mut self) -> Option<&mut Track> {
        self.tracks.get_mut(PERFORMANCE_TRACK)
    }

    /// Length of the performance track in ticks, regardless of its current time mode.
    #[must_use]
    pub fn performance_ticks(&self) -> u64 {
        self.performance_track().map_or(0, Track::end_tick)
    }

    #[must_use]
    pub fn event_count(&self) -> usize {
        self.tracks.iter().map(|track| track.events.len()).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Track {
    pub mode: TimeMode,
    pub events: Vec<Event>,
    /// Ticks between the last event and the end-of-track marker.
    pub end_padding: u64,
}

impl Track {
    #[must_use]
    pub fn new(events: Vec<Event>) -> Self {
        Self {
            mode: TimeMode::Relative,
            events,
            end_padding: 0,
        }
    }

    #[must_use]
    pub fn with_end_padding(mut self, end_padding: u64) -> Self {
        self.end_padding = end_padding;
        self
    }

    /// Tick of the last event in the track.
    #[must_use]
    pub fn last_event_tick(&self) -> u64 {
        match self.mode {
            TimeMode::Relative => self.events.iter().map(|event| event.time).sum(),
            TimeMode::Absolute => self
                .events
                .iter()
                .map(|event| event.time)
                .max()
                .unwrap_or_default(),
        }
    }

    /// Tick of the end-of-track marker.
    #[must_use]
    pub fn end_tick(&self) -> u64 {
        self.last_event_tick().saturating_add(self.end_padding)
    }

    #[must_use]
    pub fn note_count(&self) -> usize {
        self.events
            .iter()
            .filter(|event| event.kind.is_note())
            .count()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Delta or absolute ticks, depending on the owning track's [`TimeMode`].
    pub time: u64,
    pub kind: EventKind,
}

impl Event {
    #[must_use]
    pub fn new(time: u64, kind: EventKind) -> Self {
        Self { time, kind }
    }

    #[must_use]
    pub fn note_on(time: u64, channel: u8, note: u8, velocity: u8) -> Self {
        Self::new(
            time,
            EventKind::NoteOn {
                channel,
                note,
                velocity,
            },
        )
    }

    #[must_use]
    pub fn note_off(time: u64, channel: u8, note: u8, velocity: u8) -> Self {
        Self::new(
            time,
            EventKind::NoteOff {
                channel,
                note,
                velocity,
            },
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    NoteOn {
        channel: u8,
        note: u8,
        velocity: u8,
    },
    NoteOff {
        channel: u8,
        note: u8,
        velocity: u8,
    },
    SetTempo {
        micros_per_quarter: u32,
    },
    TimeSignature {
        numerator: u8,
        denominator_exponent: u8,
        clocks_per_click: u8,
        subdivisions_per_quarter: u8,
    },
    Other(OtherPayload),
}

impl EventKind {
    #[must_use]
    pub fn is_note(&self) -> bool {
        matches!(self, Self::NoteOn { .. } | Self::NoteOff { .. })
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::NoteOn { .. } => "note_on",
            Self::NoteOff { .. } => "note_off",
            Self::SetTempo { .. } => "set_tempo",
            Self::TimeSignature { .. } => "time_signature",
            Self::Other(payload) => payload.label(),
        }
    }
}

/// Events the timing engine carries through untouched.
#[derive(Debug, Clone, PartialEq)]
pub enum OtherPayload {
    Channel { channel: u8, message: MidiMessage },
    SysEx(Vec<u8>),
    Escape(Vec<u8>),
    /// Meta message stored as its type byte and raw data.
    Meta { meta_type: u8, data: Vec<u8> },
}

impl OtherPayload {
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Channel { .. } => "channel",
            Self::SysEx(_) => "sysex",
            Self::Escape(_) => "escape",
            Self::Meta { .. } => "meta",
        }
    }
}
