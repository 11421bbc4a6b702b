pub mod codec;
pub mod compose;
pub mod config;
pub mod deviation;
pub mod diagnostics;
pub mod dump;
pub mod engine;
pub mod fixtures;
pub mod grid;
pub mod meter;
pub mod model;
pub mod normalize;
pub mod pattern;
pub mod persistence;
pub mod remap;
pub mod report;
pub mod time;

pub use codec::{decode, encode, read_song, write_song};
pub use compose::{ClipAccumulator, ClipBoundary, Composition, compose};
pub use config::{AppConfig, DiagnosticsConfig, TransformConfig};
pub use deviation::{DeviationParams, DeviationSummary, apply_deviation};
pub use diagnostics::{
    TelemetryGuard, init_console_tracing, init_tracing, init_tracing_with_options,
};
pub use dump::{DumpRow, dump_track, render_rows};
pub use engine::{Engine, EngineError, MAX_RESOLUTION, TransformSettings, TransformSummary};
pub use grid::{Grid, GridBar, SlotMatch};
pub use model::{Event, EventKind, FormatKind, OtherPayload, Song, TimeMode, Track};
pub use normalize::normalize;
pub use pattern::{Pattern, PatternError, PatternPool, PatternResolver, PatternSource};
pub use remap::{Mapping, RemapError, RemapField, parse_mapping, remap};
pub use report::{RunReport, build_report, read_report, write_report};
pub use time::TickClock;
