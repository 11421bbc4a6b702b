use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use swingshift_core::{
    AppConfig, Engine, TransformConfig, build_report, codec, decode,
    diagnostics::init_tracing_with_options, fixtures::demo_song, normalize, persistence::write_atomic,
    render_rows, write_report,
};

#[derive(Debug, Parser)]
#[command(name = "swingshift-cli")]
#[command(about = "Humanize MIDI timing with grid-matched, pattern-weighted deviations")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory for JSON trace files; console only when unset.
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Config file to use instead of discovering swingshift.config.toml.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Transform a MIDI file and write the result.
    Apply(ApplyArgs),
    /// Print the performance track of a MIDI file.
    Dump {
        input: PathBuf,

        #[arg(long)]
        json: bool,

        #[arg(long)]
        absolute_only: bool,
    },
    /// Write a small single-track MIDI file to experiment with.
    Demo {
        #[arg(long, default_value = "data/demo.mid")]
        output: PathBuf,
    },
}

#[derive(Debug, Args)]
struct ApplyArgs {
    input: PathBuf,
    output: PathBuf,

    /// Grid subdivisions per measure.
    #[arg(long, short = 'r')]
    resolution: Option<u32>,

    /// Largest deviation in milliseconds.
    #[arg(long, short = 'm', allow_hyphen_values = true)]
    magnitude: Option<f64>,

    /// Allowed distance from a grid slot in milliseconds.
    #[arg(long, short = 't')]
    tolerance: Option<f64>,

    #[arg(long, short = 'l')]
    loops: Option<u32>,

    /// Tempo override in BPM.
    #[arg(long)]
    tempo: Option<f64>,

    /// Note substitutions, e.g. `60:62,64:65`.
    #[arg(long)]
    transpose: Option<String>,

    /// Channel substitutions, e.g. `0:9`.
    #[arg(long)]
    bank: Option<String>,

    /// Positional weights (`1 0 -0.5`) or named slots (`1:1.0,3:-0.5`).
    #[arg(long, short = 'p', allow_hyphen_values = true, conflicts_with = "pattern_file")]
    pattern: Option<String>,

    /// Pool file with one pattern per line, rotated per bar.
    #[arg(long)]
    pattern_file: Option<PathBuf>,

    /// Cut each loop copy at the end of this bar.
    #[arg(long)]
    clip_bar: Option<u32>,

    #[arg(long)]
    clip: bool,

    /// Seed for the pattern pool shuffle.
    #[arg(long)]
    seed: Option<u64>,

    #[arg(long)]
    no_lead_in: bool,

    /// Write a JSON run report here.
    #[arg(long)]
    report: Option<PathBuf>,
}

impl ApplyArgs {
    fn overlay(&self, transform: &mut TransformConfig) {
        if let Some(resolution) = self.resolution {
            transform.resolution = Some(resolution);
        }
        if let Some(magnitude) = self.magnitude {
            transform.magnitude_ms = magnitude;
        }
        if let Some(tolerance) = self.tolerance {
            transform.tolerance_ms = tolerance;
        }
        if let Some(loops) = self.loops {
            transform.loops = loops;
        }
        if let Some(tempo) = self.tempo {
            transform.tempo_bpm = Some(tempo);
        }
        if let Some(transpose) = &self.transpose {
            transform.transpose.clone_from(transpose);
        }
        if let Some(bank) = &self.bank {
            transform.bank.clone_from(bank);
        }
        if let Some(pattern) = &self.pattern {
            transform.pattern = Some(pattern.clone());
            transform.pattern_file = None;
        }
        if let Some(pattern_file) = &self.pattern_file {
            transform.pattern_file = Some(pattern_file.clone());
            transform.pattern = None;
        }
        if let Some(clip_bar) = self.clip_bar {
            transform.clip = true;
            transform.clip_bar = clip_bar;
        }
        if self.clip {
            transform.clip = true;
        }
        if let Some(seed) = self.seed {
            transform.seed = Some(seed);
        }
        if self.no_lead_in {
            transform.mock_lead_in = false;
        }
    }
}

fn run_apply(args: &ApplyArgs, mut config: AppConfig) -> anyhow::Result<()> {
    args.overlay(&mut config.transform);
    let settings = config.transform.to_settings()?;

    let input = fs::read(&args.input)
        .with_context(|| format!("failed to read midi file: {}", args.input.display()))?;
    let song =
        decode(&input).with_context(|| format!("invalid midi file: {}", args.input.display()))?;

    let mut engine = Engine::new(song);
    let summary = engine.apply(&settings)?;
    let output = engine.encode()?;
    write_atomic(&args.output, &output)?;
    tracing::info!(
        path = %args.output.display(),
        shifted = summary.deviation.shifted,
        "humanized midi written"
    );

    if let Some(report_path) = &args.report {
        let report = build_report(&input, &output, &summary);
        write_report(report_path, &report)?;
    }
    Ok(())
}

fn run_dump(input: &Path, json: bool, absolute_only: bool) -> anyhow::Result<()> {
    let engine = Engine::new(normalize(codec::read_song(input)?));
    let rows = engine.dump();
    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        print!("{}", render_rows(&rows, absolute_only));
    }
    Ok(())
}

fn run_demo(output: &Path) -> anyhow::Result<()> {
    Engine::new(demo_song()).save(output)?;
    tracing::info!(path = %output.display(), "demo midi written");
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };

    let log_dir = cli.log_dir.clone().or_else(|| config.diagnostics.log_dir.clone());
    let _telemetry = init_tracing_with_options(
        log_dir.as_deref(),
        &config.diagnostics.trace_file_prefix,
        &config.diagnostics.rust_log_filter,
    )?;

    let result = match &cli.command {
        Commands::Apply(args) => run_apply(args, config),
        Commands::Dump {
            input,
            json,
            absolute_only,
        } => run_dump(input, *json, *absolute_only),
        Commands::Demo { output } => run_demo(output),
    };

    if let Err(error) = &result {
        tracing::error!("run failed: {error:#}");
    }
    result
}
