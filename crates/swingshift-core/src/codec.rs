use std::{fs, path::Path};

use anyhow::{Context, Result, anyhow, bail};
use midly::{
    Format, Fps, Header, MetaMessage, MidiMessage, Smf, SmpteTime, Timing, TrackEvent,
    TrackEventKind,
    num::{u4, u7, u15, u24, u28},
};
use tracing::{debug, info, instrument};

use crate::{
    model::{Event, EventKind, FormatKind, OtherPayload, Song, Track},
    persistence::write_atomic,
};

/// Largest delta a variable-length quantity can carry.
const MAX_DELTA: u64 = 0x0FFF_FFFF;
const MAX_TEMPO: u32 = 0x00FF_FFFF;

fn format_kind(format: Format) -> FormatKind {
    match format {
        Format::SingleTrack => FormatKind::SingleTrack,
        Format::Parallel => FormatKind::Parallel,
        Format::Sequential => FormatKind::Sequential,
    }
}

fn midly_format(format: FormatKind) -> Format {
    match format {
        FormatKind::SingleTrack => Format::SingleTrack,
        FormatKind::Parallel => Format::Parallel,
        FormatKind::Sequential => Format::Sequential,
    }
}

fn fps_code(fps: Fps) -> u8 {
    match fps {
        Fps::Fps24 => 0,
        Fps::Fps25 => 1,
        Fps::Fps29 => 2,
        Fps::Fps30 => 3,
    }
}

fn smpte_bytes(time: &SmpteTime) -> Vec<u8> {
    vec![
        (fps_code(time.fps()) << 5) | time.hour(),
        time.minute(),
        time.second(),
        time.frame(),
        time.subframe(),
    ]
}

/// Raw type byte and payload of a meta message, as it appears in the file.
fn meta_bytes(meta: &MetaMessage<'_>) -> (u8, Vec<u8>) {
    match meta {
        MetaMessage::TrackNumber(number) => (
            0x00,
            number.map(|number| number.to_be_bytes().to_vec()).unwrap_or_default(),
        ),
        MetaMessage::Text(data) => (0x01, data.to_vec()),
        MetaMessage::Copyright(data) => (0x02, data.to_vec()),
        MetaMessage::TrackName(data) => (0x03, data.to_vec()),
        MetaMessage::InstrumentName(data) => (0x04, data.to_vec()),
        MetaMessage::Lyric(data) => (0x05, data.to_vec()),
        MetaMessage::Marker(data) => (0x06, data.to_vec()),
        MetaMessage::CuePoint(data) => (0x07, data.to_vec()),
        MetaMessage::ProgramName(data) => (0x08, data.to_vec()),
        MetaMessage::DeviceName(data) => (0x09, data.to_vec()),
        MetaMessage::MidiChannel(channel) => (0x20, vec![channel.as_int()]),
        MetaMessage::MidiPort(port) => (0x21, vec![port.as_int()]),
        MetaMessage::EndOfTrack => (0x2F, Vec::new()),
        MetaMessage::Tempo(tempo) => (0x51, tempo.as_int().to_be_bytes()[1..].to_vec()),
        MetaMessage::SmpteOffset(time) => (0x54, smpte_bytes(time)),
        MetaMessage::TimeSignature(numerator, denominator, clocks, subdivisions) => {
            (0x58, vec![*numerator, *denominator, *clocks, *subdivisions])
        }
        MetaMessage::KeySignature(sharps, minor) => {
            (0x59, vec![sharps.to_be_bytes()[0], u8::from(*minor)])
        }
        MetaMessage::SequencerSpecific(data) => (0x7F, data.to_vec()),
        MetaMessage::Unknown(meta_type, data) => (*meta_type, data.to_vec()),
    }
}

/// `None` marks track framing that the model does not carry.
fn decode_kind(kind: &TrackEventKind<'_>) -> Option<EventKind> {
    let decoded = match kind {
        TrackEventKind::Midi { channel, message } => {
            let channel = channel.as_int();
            match *message {
                MidiMessage::NoteOn { key, vel } => EventKind::NoteOn {
                    channel,
                    note: key.as_int(),
                    velocity: vel.as_int(),
                },
                MidiMessage::NoteOff { key, vel } => EventKind::NoteOff {
                    channel,
                    note: key.as_int(),
                    velocity: vel.as_int(),
                },
                message => EventKind::Other(OtherPayload::Channel { channel, message }),
            }
        }
        TrackEventKind::SysEx(data) => EventKind::Other(OtherPayload::SysEx(data.to_vec())),
        TrackEventKind::Escape(data) => EventKind::Other(OtherPayload::Escape(data.to_vec())),
        TrackEventKind::Meta(MetaMessage::EndOfTrack) => return None,
        TrackEventKind::Meta(MetaMessage::Tempo(tempo)) => EventKind::SetTempo {
            micros_per_quarter: tempo.as_int(),
        },
        TrackEventKind::Meta(MetaMessage::TimeSignature(
            numerator,
            denominator_exponent,
            clocks_per_click,
            subdivisions_per_quarter,
        )) => EventKind::TimeSignature {
            numerator: *numerator,
            denominator_exponent: *denominator_exponent,
            clocks_per_click: *clocks_per_click,
            subdivisions_per_quarter: *subdivisions_per_quarter,
        },
        TrackEventKind::Meta(meta) => {
            let (meta_type, data) = meta_bytes(meta);
            EventKind::Other(OtherPayload::Meta { meta_type, data })
        }
    };
    Some(decoded)
}

fn encode_kind(kind: &EventKind) -> TrackEventKind<'_> {
    match kind {
        EventKind::NoteOn {
            channel,
            note,
            velocity,
        } => TrackEventKind::Midi {
            channel: u4::from((*channel).min(15)),
            message: MidiMessage::NoteOn {
                key: u7::from((*note).min(127)),
                vel: u7::from((*velocity).min(127)),
            },
        },
        EventKind::NoteOff {
            channel,
            note,
            velocity,
        } => TrackEventKind::Midi {
            channel: u4::from((*channel).min(15)),
            message: MidiMessage::NoteOff {
                key: u7::from((*note).min(127)),
                vel: u7::from((*velocity).min(127)),
            },
        },
        EventKind::SetTempo { micros_per_quarter } => {
            TrackEventKind::Meta(MetaMessage::Tempo(u24::from((*micros_per_quarter).min(MAX_TEMPO))))
        }
        EventKind::TimeSignature {
            numerator,
            denominator_exponent,
            clocks_per_click,
            subdivisions_per_quarter,
        } => TrackEventKind::Meta(MetaMessage::TimeSignature(
            *numerator,
            *denominator_exponent,
            *clocks_per_click,
            *subdivisions_per_quarter,
        )),
        EventKind::Other(OtherPayload::Channel { channel, message }) => TrackEventKind::Midi {
            channel: u4::from((*channel).min(15)),
            message: *message,
        },
        EventKind::Other(OtherPayload::SysEx(data)) => TrackEventKind::SysEx(data),
        EventKind::Other(OtherPayload::Escape(data)) => TrackEventKind::Escape(data),
        EventKind::Other(OtherPayload::Meta { meta_type, data }) => {
            TrackEventKind::Meta(MetaMessage::Unknown(*meta_type, data))
        }
    }
}

/// Decodes one track chunk. The end-of-track delta becomes the track's end padding; a delta
/// left by a marker that is not last is folded into the following event.
fn decode_track(raw: &[TrackEvent<'_>]) -> Track {
    let mut events = Vec::with_capacity(raw.len());
    let mut pending = 0_u64;
    for event in raw {
        let delta = pending.saturating_add(u64::from(event.delta.as_int()));
        match decode_kind(&event.kind) {
            Some(kind) => {
                events.push(Event::new(delta, kind));
                pending = 0;
            }
            None => pending = delta,
        }
    }
    Track::new(events).with_end_padding(pending)
}

/// Parses a Standard MIDI File. Only metrical (ticks per quarter) timing is accepted.
#[instrument(skip(bytes), fields(bytes = bytes.len()))]
pub fn decode(bytes: &[u8]) -> Result<Song> {
    let smf = Smf::parse(bytes).map_err(|error| anyhow!("failed to parse midi: {error:?}"))?;

    let resolution_unit = match smf.header.timing {
        Timing::Metrical(ticks) => ticks.as_int(),
        Timing::Timecode(fps, subframes) => bail!(
            "SMPTE timing ({} fps, {subframes} subframes) is not supported",
            fps.as_int()
        ),
    };
    if resolution_unit == 0 {
        bail!("midi header declares zero ticks per quarter note");
    }

    let mut song = Song::new(resolution_unit, format_kind(smf.header.format));
    song.tracks = smf.tracks.iter().map(|track| decode_track(track)).collect();

    debug!(
        resolution_unit,
        tracks = song.tracks.len(),
        events = song.event_count(),
        "midi decoded"
    );
    Ok(song)
}

/// Serializes a song; tracks held in absolute time are written from a relative copy.
#[instrument(skip(song), fields(tracks = song.tracks.len()))]
pub fn encode(song: &Song) -> Result<Vec<u8>> {
    let relative: Vec<Track> = song
        .tracks
        .iter()
        .map(|track| {
            let mut track = track.clone();
            track.to_relative();
            track
        })
        .collect();

    let tracks: Vec<Vec<TrackEvent<'_>>> = relative
        .iter()
        .map(|track| {
            let mut events: Vec<TrackEvent<'_>> = track
                .events
                .iter()
                .map(|event| TrackEvent {
                    delta: u28::from(event.time.min(MAX_DELTA) as u32),
                    kind: encode_kind(&event.kind),
                })
                .collect();
            events.push(TrackEvent {
                delta: u28::from(track.end_padding.min(MAX_DELTA) as u32),
                kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
            });
            events
        })
        .collect();

    let header = Header {
        format: midly_format(song.format),
        timing: Timing::Metrical(u15::from(song.resolution_unit.min(0x7FFF))),
    };

    let mut bytes = Vec::new();
    Smf { header, tracks }
        .write_std(&mut bytes)
        .context("failed to encode midi bytes")?;
    Ok(bytes)
}

#[instrument(fields(path = %path.display()))]
pub fn read_song(path: &Path) -> Result<Song> {
    let bytes =
        fs::read(path).with_context(|| format!("failed to read midi file: {}", path.display()))?;
    let song = decode(&bytes).with_context(|| format!("invalid midi file: {}", path.display()))?;
    info!(tracks = song.tracks.len(), "song loaded");
    Ok(song)
}

#[instrument(skip(song), fields(path = %path.display()))]
pub fn write_song(path: &Path, song: &Song) -> Result<()> {
    let bytes = encode(song)?;
    write_atomic(path, &bytes)?;
    info!(bytes = bytes.len(), "song written");
    Ok(())
}
