use std::{fs, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, instrument};

use crate::{engine::TransformSummary, persistence::write_atomic};

const REPORT_SCHEMA_VERSION: u32 = 1;

/// Fingerprint of one run, stable enough to diff between builds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunReport {
    pub schema_version: u32,
    pub input_hash: String,
    pub output_hash: String,
    pub resolution: u32,
    pub tempo_micros: u32,
    pub tolerance_ticks: u64,
    pub bar_count: usize,
    pub performance_events: usize,
    pub shifted_events: usize,
    pub max_shift_ticks: u64,
    pub clipped_events: usize,
    pub loops: u32,
}

#[must_use]
pub fn build_report(input: &[u8], output: &[u8], summary: &TransformSummary) -> RunReport {
    RunReport {
        schema_version: REPORT_SCHEMA_VERSION,
        input_hash: hash_hex(input),
        output_hash: hash_hex(output),
        resolution: summary.resolution,
        tempo_micros: summary.tempo_micros,
        tolerance_ticks: summary.tolerance_ticks,
        bar_count: summary.bar_count,
        performance_events: summary.deviation.events,
        shifted_events: summary.deviation.shifted,
        max_shift_ticks: summary.deviation.max_shift_ticks,
        clipped_events: summary.clipped,
        loops: summary.loops,
    }
}

pub fn read_report(path: &Path) -> Result<RunReport> {
    let bytes = fs::read(path)
        .with_context(|| format!("failed to read run report: {}", path.display()))?;
    let report: RunReport =
        serde_json::from_slice(&bytes).context("failed to parse run report json")?;
    Ok(report)
}

#[instrument(skip(report), fields(path = %path.display()))]
pub fn write_report(path: &Path, report: &RunReport) -> Result<()> {
    let json = serde_json::to_vec_pretty(report).context("failed to encode run report json")?;
    write_atomic(path, &json)?;
    info!(output_hash = %report.output_hash, "run report written");
    Ok(())
}

fn hash_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    format!("{digest:x}")
}
