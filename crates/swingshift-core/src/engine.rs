use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::{
    codec,
    compose::{ClipBoundary, compose},
    deviation::{DeviationParams, DeviationSummary, apply_deviation},
    dump::{DumpRow, dump_track},
    grid::Grid,
    meter::{fastest_metrical_level, set_tempo, tick_clock},
    model::{Event, Song},
    normalize::normalize,
    pattern::{Pattern, PatternError, PatternResolver, PatternSource},
    remap::{Mapping, RemapError, RemapField, remap, validate_mapping},
};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(
        "no grid slot within {tolerance_ticks} ticks of tick {tick} (bar {bar}, resolution {resolution}); \
         check the resolution and tolerance settings"
    )]
    NoGridMatch {
        tick: u64,
        bar: usize,
        resolution: u32,
        tolerance_ticks: u64,
    },
    #[error("resolution must be between 1 and {MAX_RESOLUTION} slots per bar, got {0}")]
    InvalidResolution(u32),
    #[error("loop count must be at least 1, got {0}")]
    InvalidLoopCount(u32),
    #[error("tolerance must be a non-negative number of milliseconds, got {0}")]
    InvalidTolerance(f64),
    #[error("magnitude must be a finite number of milliseconds, got {0}")]
    InvalidMagnitude(f64),
    #[error("tempo must be a positive BPM value, got {0}")]
    InvalidTempo(f64),
    #[error("song has no performance track")]
    MissingPerformanceTrack,
    #[error(transparent)]
    Pattern(#[from] PatternError),
    #[error(transparent)]
    Remap(#[from] RemapError),
    #[error("io error: {0}")]
    Io(String),
}

impl From<anyhow::Error> for EngineError {
    fn from(value: anyhow::Error) -> Self {
        Self::Io(format!("{value:#}"))
    }
}

/// Resolved options for one humanization run.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformSettings {
    /// Grid subdivisions per measure; the meter's fastest level when unset.
    pub resolution: Option<u32>,
    pub magnitude_ms: f64,
    pub tolerance_ms: f64,
    pub loops: u32,
    pub tempo_bpm: Option<f64>,
    pub transpose: Mapping,
    pub bank: Mapping,
    pub pattern: Option<PatternSource>,
    pub clip: Option<ClipBoundary>,
    pub seed: Option<u64>,
    pub mock_lead_in: bool,
}

impl Default for TransformSettings {
    fn default() -> Self {
        Self {
            resolution: None,
            magnitude_ms: 0.0,
            tolerance_ms: 0.0,
            loops: 1,
            tempo_bpm: None,
            transpose: Mapping::new(),
            bank: Mapping::new(),
            pattern: None,
            clip: None,
            seed: None,
            mock_lead_in: true,
        }
    }
}

/// Finest grid accepted, in slots per bar.
pub const MAX_RESOLUTION: u32 = 1_024;

fn check_resolution(resolution: u32) -> Result<u32, EngineError> {
    if (1..=MAX_RESOLUTION).contains(&resolution) {
        Ok(resolution)
    } else {
        Err(EngineError::InvalidResolution(resolution))
    }
}

impl TransformSettings {
    pub fn validate(&self) -> Result<(), EngineError> {
        if let Some(resolution) = self.resolution {
            check_resolution(resolution)?;
        }
        if self.loops == 0 {
            return Err(EngineError::InvalidLoopCount(self.loops));
        }
        if !self.tolerance_ms.is_finite() || self.tolerance_ms < 0.0 {
            return Err(EngineError::InvalidTolerance(self.tolerance_ms));
        }
        if !self.magnitude_ms.is_finite() {
            return Err(EngineError::InvalidMagnitude(self.magnitude_ms));
        }
        if let Some(bpm) = self.tempo_bpm.filter(|bpm| !bpm.is_finite() || *bpm <= 0.0) {
            return Err(EngineError::InvalidTempo(bpm));
        }
        validate_mapping(&self.transpose, RemapField::Note)?;
        validate_mapping(&self.bank, RemapField::Channel)?;
        Ok(())
    }

    /// Builds the per-run pattern state. Without a pattern every slot weighs zero.
    pub fn resolver(&self) -> Result<PatternResolver, EngineError> {
        match &self.pattern {
            Some(source) => Ok(PatternResolver::from_source(source, self.seed)?),
            None => Ok(PatternResolver::Fixed(Pattern::silent())),
        }
    }
}

/// What a run did, for logs and reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformSummary {
    pub resolution: u32,
    pub tempo_micros: u32,
    pub tolerance_ticks: u64,
    pub bar_count: usize,
    pub performance_ticks: u64,
    pub deviation: DeviationSummary,
    pub transposed: usize,
    pub rebanked: usize,
    pub clipped: usize,
    pub loops: u32,
    pub lead_in: bool,
}

#[derive(Debug, Clone)]
pub struct Engine {
    song: Song,
}

impl Engine {
    #[must_use]
    pub fn new(song: Song) -> Self {
        Self { song }
    }

    #[must_use]
    pub fn song(&self) -> &Song {
        &self.song
    }

    #[must_use]
    pub fn into_song(self) -> Song {
        self.song
    }

    #[instrument(fields(path = %path.display()))]
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let song = codec::read_song(path)?;
        Ok(Self::new(song))
    }

    #[instrument(skip(self), fields(path = %path.display(), tracks = self.song.tracks.len()))]
    pub fn save(&self, path: &Path) -> Result<(), EngineError> {
        codec::write_song(path, &self.song)?;
        Ok(())
    }

    pub fn encode(&self) -> Result<Vec<u8>, EngineError> {
        Ok(codec::encode(&self.song)?)
    }

    /// Rows for the performance track, or nothing when the song has none.
    #[must_use]
    pub fn dump(&self) -> Vec<DumpRow> {
        self.song.performance_track().map(dump_track).unwrap_or_default()
    }

    /// Runs the whole humanization pipeline. The song is only replaced when every stage succeeds.
    #[instrument(
        skip(self, settings),
        fields(
            magnitude_ms = settings.magnitude_ms,
            tolerance_ms = settings.tolerance_ms,
            loops = settings.loops
        )
    )]
    pub fn apply(&mut self, settings: &TransformSettings) -> Result<TransformSummary, EngineError> {
        settings.validate()?;
        let mut resolver = settings.resolver()?;

        let mut song = normalize(self.song.clone());
        if let Some(bpm) = settings.tempo_bpm {
            set_tempo(&mut song, bpm);
        }

        let resolution = check_resolution(
            settings
                .resolution
                .unwrap_or_else(|| fastest_metrical_level(&song)),
        )?;
        let clock = tick_clock(&song);
        let tolerance_ticks = clock.ms_to_ticks(settings.tolerance_ms).unsigned_abs();
        let grid = Grid::build(&song, resolution);
        let performance_ticks = song.performance_ticks();
        info!(
            resolution,
            bars = grid.bar_count(),
            performance_ticks,
            tempo_micros = clock.tempo_micros,
            tolerance_ticks,
            "grid ready"
        );

        let track = song
            .performance_track_mut()
            .ok_or(EngineError::MissingPerformanceTrack)?;

        let transposed = remap(track, RemapField::Note, &settings.transpose);
        let rebanked = remap(track, RemapField::Channel, &settings.bank);

        let deviation = apply_deviation(
            track,
            &grid,
            &clock,
            &mut resolver,
            &DeviationParams {
                magnitude_ms: settings.magnitude_ms,
                tolerance_ticks,
            },
        )?;

        let composition = compose(
            &track.events,
            track.end_padding,
            performance_ticks,
            settings.loops,
            settings.clip,
        );
        track.events = composition.events;
        track.end_padding = composition.end_padding;

        if settings.mock_lead_in {
            track.events.insert(0, Event::note_on(0, 0, 0, 0));
            debug!("lead-in note prepended");
        }

        let summary = TransformSummary {
            resolution,
            tempo_micros: clock.tempo_micros,
            tolerance_ticks,
            bar_count: grid.bar_count(),
            performance_ticks,
            deviation,
            transposed,
            rebanked,
            clipped: composition.clipped,
            loops: settings.loops,
            lead_in: settings.mock_lead_in,
        };
        self.song = song;

        info!(
            shifted = summary.deviation.shifted,
            max_shift_ticks = summary.deviation.max_shift_ticks,
            clipped = summary.clipped,
            "humanization complete"
        );
        Ok(summary)
    }
}
