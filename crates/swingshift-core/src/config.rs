use std::{
    env, fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    compose::ClipBoundary,
    diagnostics::{DEFAULT_FILE_PREFIX, DEFAULT_LOG_FILTER},
    engine::{EngineError, TransformSettings},
    pattern::PatternSource,
    remap::{RemapField, parse_mapping},
};

pub const CONFIG_FILE_NAME: &str = "swingshift.config.toml";
pub const CONFIG_PATH_ENV: &str = "SWINGSHIFT_CONFIG_PATH";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub transform: TransformConfig,
    pub diagnostics: DiagnosticsConfig,
}

/// Transform options as written in the config file. Mappings and patterns stay textual here and
/// are parsed by [`TransformConfig::to_settings`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TransformConfig {
    pub resolution: Option<u32>,
    pub magnitude_ms: f64,
    pub tolerance_ms: f64,
    pub loops: u32,
    pub tempo_bpm: Option<f64>,
    /// `from:to` note pairs.
    pub transpose: String,
    /// `from:to` channel pairs.
    pub bank: String,
    pub pattern: Option<String>,
    pub pattern_file: Option<PathBuf>,
    pub clip: bool,
    pub clip_bar: u32,
    pub seed: Option<u64>,
    pub mock_lead_in: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DiagnosticsConfig {
    pub rust_log_filter: String,
    pub trace_file_prefix: String,
    pub log_dir: Option<PathBuf>,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            resolution: None,
            magnitude_ms: 0.0,
            tolerance_ms: 0.0,
            loops: 1,
            tempo_bpm: None,
            transpose: String::new(),
            bank: String::new(),
            pattern: None,
            pattern_file: None,
            clip: false,
            clip_bar: 0,
            seed: None,
            mock_lead_in: true,
        }
    }
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            rust_log_filter: DEFAULT_LOG_FILTER.to_string(),
            trace_file_prefix: DEFAULT_FILE_PREFIX.to_string(),
            log_dir: None,
        }
    }
}

impl TransformConfig {
    pub fn to_settings(&self) -> Result<TransformSettings, EngineError> {
        let pattern = match (&self.pattern_file, &self.pattern) {
            (Some(path), text) => {
                if text.is_some() {
                    warn!(path = %path.display(), "pattern file set; inline pattern ignored");
                }
                Some(PatternSource::File(path.clone()))
            }
            (None, Some(text)) => Some(PatternSource::parse(text)?),
            (None, None) => None,
        };

        let settings = TransformSettings {
            resolution: self.resolution,
            magnitude_ms: self.magnitude_ms,
            tolerance_ms: self.tolerance_ms,
            loops: self.loops,
            tempo_bpm: self.tempo_bpm,
            transpose: parse_mapping(&self.transpose, RemapField::Note)?,
            bank: parse_mapping(&self.bank, RemapField::Channel)?,
            pattern,
            clip: self.clip.then(|| ClipBoundary::new(self.clip_bar)),
            seed: self.seed,
            mock_lead_in: self.mock_lead_in,
        };
        settings.validate()?;
        Ok(settings)
    }
}

impl AppConfig {
    /// Loads the discovered config file, falling back to defaults when there is none.
    pub fn load() -> Result<Self> {
        match discover_config_path()? {
            Some(path) => Self::load_from(&path),
            None => {
                debug!("no {CONFIG_FILE_NAME} found; using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;

        let config: AppConfig = toml::from_str(&content)
            .with_context(|| format!("failed to parse config TOML from {}", path.display()))?;

        debug!(path = %path.display(), "config loaded");
        Ok(config)
    }
}

/// Looks at the override variable, then the working directory and its parent.
pub fn discover_config_path() -> Result<Option<PathBuf>> {
    if let Some(path) = env::var_os(CONFIG_PATH_ENV) {
        let path = PathBuf::from(path);
        if path.is_file() {
            return Ok(Some(path));
        }
        warn!(path = %path.display(), "{CONFIG_PATH_ENV} does not point at a file");
    }

    let cwd = env::current_dir().context("failed to resolve current directory")?;
    let candidates = [
        cwd.join(CONFIG_FILE_NAME),
        cwd.join("..").join(CONFIG_FILE_NAME),
    ];

    Ok(candidates.into_iter().find(|path| path.is_file()))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::remap::Mapping;

    #[test]
    fn empty_file_gives_defaults() {
        let config: AppConfig = toml::from_str("").expect("empty toml");
        assert_eq!(config, AppConfig::default());

        let settings = config.transform.to_settings().expect("defaults are valid");
        assert_eq!(settings, TransformSettings::default());
    }

    #[test]
    fn sections_are_parsed() {
        let config: AppConfig = toml::from_str(
            r#"
            [transform]
            resolution = 16
            magnitude_ms = 25.0
            tolerance_ms = 5
            loops = 2
            transpose = "60:62, 64:65"
            bank = "0:9"
            pattern = "1:1.0, 3:-0.5"
            clip = true
            clip_bar = 1
            seed = 7

            [diagnostics]
            log_dir = "logs"
            "#,
        )
        .expect("valid toml");

        assert_eq!(config.diagnostics.log_dir, Some(PathBuf::from("logs")));
        assert_eq!(config.diagnostics.rust_log_filter, DEFAULT_LOG_FILTER);

        let settings = config.transform.to_settings().expect("valid settings");
        assert_eq!(settings.resolution, Some(16));
        assert_eq!(settings.loops, 2);
        assert!((settings.tolerance_ms - 5.0).abs() < f64::EPSILON);
        assert_eq!(settings.transpose, Mapping::from([(60, 62), (64, 65)]));
        assert_eq!(settings.bank, Mapping::from([(0, 9)]));
        assert_eq!(
            settings.pattern,
            Some(PatternSource::Named(BTreeMap::from([(1, 1.0), (3, -0.5)])))
        );
        assert_eq!(settings.clip, Some(ClipBoundary::new(1)));
        assert_eq!(settings.seed, Some(7));
        assert!(settings.mock_lead_in);
    }

    #[test]
    fn pattern_file_wins_over_inline_pattern() {
        let transform = TransformConfig {
            pattern: Some("1 0 -1".to_string()),
            pattern_file: Some(PathBuf::from("grooves.txt")),
            ..TransformConfig::default()
        };
        let settings = transform.to_settings().expect("valid settings");
        assert_eq!(
            settings.pattern,
            Some(PatternSource::File(PathBuf::from("grooves.txt")))
        );
    }

    #[test]
    fn invalid_values_surface_as_engine_errors() {
        let transform = TransformConfig {
            bank: "0:20".to_string(),
            ..TransformConfig::default()
        };
        assert!(matches!(
            transform.to_settings(),
            Err(EngineError::Remap(_))
        ));

        let transform = TransformConfig {
            loops: 0,
            ..TransformConfig::default()
        };
        assert!(matches!(
            transform.to_settings(),
            Err(EngineError::InvalidLoopCount(0))
        ));
    }

    #[test]
    fn loads_from_explicit_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&path, "[transform]\nmagnitude_ms = 12.5\n").expect("write config");

        let config = AppConfig::load_from(&path).expect("load config");
        assert!((config.transform.magnitude_ms - 12.5).abs() < f64::EPSILON);
        assert_eq!(config.transform.loops, 1);

        fs::write(&path, "[transform\n").expect("write broken config");
        assert!(AppConfig::load_from(&path).is_err());
    }
}
