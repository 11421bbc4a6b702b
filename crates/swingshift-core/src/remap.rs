use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::model::{EventKind, Track};

pub type Mapping = BTreeMap<u8, u8>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemapField {
    /// Note numbers (transpose).
    Note,
    /// MIDI channels (bank).
    Channel,
}

impl RemapField {
    #[must_use]
    pub fn max_value(self) -> u8 {
        match self {
            Self::Note => 127,
            Self::Channel => 15,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RemapError {
    #[error("invalid mapping entry `{0}`, expected `from:to`")]
    InvalidEntry(String),
    #[error("{field:?} value {value} out of range 0..={max}")]
    OutOfRange { field: RemapField, value: u8, max: u8 },
}

/// Parses `from:to` pairs separated by commas or whitespace, e.g. `60:62, 64:65`.
pub fn parse_mapping(text: &str, field: RemapField) -> Result<Mapping, RemapError> {
    let mut mapping = Mapping::new();
    for entry in text
        .split(|ch: char| ch == ',' || ch.is_whitespace())
        .filter(|entry| !entry.is_empty())
    {
        let (from, to) = entry
            .split_once(':')
            .ok_or_else(|| RemapError::InvalidEntry(entry.to_string()))?;
        let parse = |value: &str| {
            value
                .trim()
                .parse::<u8>()
                .map_err(|_| RemapError::InvalidEntry(entry.to_string()))
        };
        mapping.insert(parse(from)?, parse(to)?);
    }
    validate_mapping(&mapping, field)?;
    Ok(mapping)
}

pub fn validate_mapping(mapping: &Mapping, field: RemapField) -> Result<(), RemapError> {
    let max = field.max_value();
    match mapping
        .iter()
        .flat_map(|(from, to)| [*from, *to])
        .find(|value| *value > max)
    {
        Some(value) => Err(RemapError::OutOfRange { field, value, max }),
        None => Ok(()),
    }
}

/// Substitutes the selected field of every note event found in `mapping`. Returns how many events
/// changed.
pub fn remap(track: &mut Track, field: RemapField, mapping: &Mapping) -> usize {
    if mapping.is_empty() {
        return 0;
    }

    let mut remapped = 0;
    for event in &mut track.events {
        let slot = match (&mut event.kind, field) {
            (
                EventKind::NoteOn { note, .. } | EventKind::NoteOff { note, .. },
                RemapField::Note,
            ) => note,
            (
                EventKind::NoteOn { channel, .. } | EventKind::NoteOff { channel, .. },
                RemapField::Channel,
            ) => channel,
            _ => continue,
        };
        if let Some(target) = mapping.get(&*slot) {
            *slot = *target;
            remapped += 1;
        }
    }

    debug!(?field, remapped, "track remapped");
    remapped
}
