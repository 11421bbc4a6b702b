use std::fmt::Write as _;

use serde::Serialize;

use crate::model::{EventKind, OtherPayload, TimeMode, Track};

/// One performance event as shown by the diagnostic dump.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DumpRow {
    pub absolute: u64,
    pub delta: u64,
    /// Note number, tempo, numerator or channel, depending on the kind.
    pub field: Option<u32>,
    pub kind: &'static str,
}

fn primary_field(kind: &EventKind) -> Option<u32> {
    match kind {
        EventKind::NoteOn { note, .. } | EventKind::NoteOff { note, .. } => Some(u32::from(*note)),
        EventKind::SetTempo { micros_per_quarter } => Some(*micros_per_quarter),
        EventKind::TimeSignature { numerator, .. } => Some(u32::from(*numerator)),
        EventKind::Other(OtherPayload::Channel { channel, .. }) => Some(u32::from(*channel)),
        EventKind::Other(OtherPayload::Meta { meta_type, .. }) => Some(u32::from(*meta_type)),
        EventKind::Other(OtherPayload::SysEx(_) | OtherPayload::Escape(_)) => None,
    }
}

#[must_use]
pub fn dump_track(track: &Track) -> Vec<DumpRow> {
    let mut previous = 0_u64;
    let mut elapsed = 0_u64;
    track
        .events
        .iter()
        .map(|event| {
            let (absolute, delta) = match track.mode {
                TimeMode::Relative => {
                    elapsed = elapsed.saturating_add(event.time);
                    (elapsed, event.time)
                }
                TimeMode::Absolute => (event.time, event.time.saturating_sub(previous)),
            };
            previous = absolute;
            DumpRow {
                absolute,
                delta,
                field: primary_field(&event.kind),
                kind: event.kind.label(),
            }
        })
        .collect()
}

/// Fixed-width text table, or one absolute tick per line.
#[must_use]
pub fn render_rows(rows: &[DumpRow], absolute_only: bool) -> String {
    let mut out = String::new();
    if absolute_only {
        for row in rows {
            let _ = writeln!(out, "{}", row.absolute);
        }
        return out;
    }

    let _ = writeln!(out, "{:>10} {:>8} {:>8}  kind", "absolute", "delta", "field");
    for row in rows {
        let field = row
            .field
            .map_or_else(|| "-".to_string(), |field| field.to_string());
        let _ = writeln!(
            out,
            "{:>10} {:>8} {:>8}  {}",
            row.absolute, row.delta, field, row.kind
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Event;

    fn track() -> Track {
        Track::new(vec![
            Event::note_on(10, 0, 60, 100),
            Event::new(
                0,
                EventKind::Other(OtherPayload::SysEx(vec![0x7E, 0xF7])),
            ),
            Event::note_off(110, 0, 60, 0),
        ])
    }

    #[test]
    fn rows_carry_both_time_forms() {
        let rows = dump_track(&track());
        assert_eq!(
            rows,
            vec![
                DumpRow {
                    absolute: 10,
                    delta: 10,
                    field: Some(60),
                    kind: "note_on"
                },
                DumpRow {
                    absolute: 10,
                    delta: 0,
                    field: None,
                    kind: "sysex"
                },
                DumpRow {
                    absolute: 120,
                    delta: 110,
                    field: Some(60),
                    kind: "note_off"
                },
            ]
        );
    }

    #[test]
    fn absolute_tracks_dump_the_same_rows() {
        let mut absolute = track();
        absolute.to_absolute();
        assert_eq!(dump_track(&absolute), dump_track(&track()));
    }

    #[test]
    fn renders_text_table() {
        let text = render_rows(&dump_track(&track()), false);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].contains("absolute"));
        assert!(lines[2].ends_with("sysex"));
        assert_eq!(render_rows(&dump_track(&track()), true), "10\n10\n120\n");
    }
}
