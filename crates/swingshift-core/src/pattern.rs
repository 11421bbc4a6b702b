use std::{
    collections::{BTreeMap, VecDeque},
    fs,
    path::{Path, PathBuf},
};

use rand::{SeedableRng, seq::SliceRandom};
use rand_chacha::ChaCha8Rng;
use thiserror::Error;
use tracing::{debug, info, instrument};

#[derive(Debug, Error)]
pub enum PatternError {
    #[error("pattern has no weights")]
    Empty,
    #[error("invalid weight `{0}`")]
    InvalidWeight(String),
    #[error("invalid slot entry `{0}`; expected slot:weight")]
    InvalidSlot(String),
    #[error("slot numbers start at 1")]
    ZeroSlot,
    #[error("failed to read pattern pool {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("pattern pool {} line {line}: {source}", .path.display())]
    PoolLine {
        path: PathBuf,
        line: usize,
        source: Box<PatternError>,
    },
    #[error("pattern pool {} holds no patterns", .0.display())]
    EmptyPool(PathBuf),
}

/// Scales weights into [-1, 1] by their largest magnitude. All-zero input is returned as is.
#[must_use]
pub fn normalize_weights(weights: &[f64]) -> Vec<f64> {
    let peak = weights.iter().fold(0.0_f64, |peak, weight| peak.max(weight.abs()));
    if peak == 0.0 {
        return weights.to_vec();
    }
    weights.iter().map(|weight| weight / peak).collect()
}

/// Expands 1-based `slot -> weight` entries into a dense list, filling gaps with zero.
pub fn named_to_positional(named: &BTreeMap<usize, f64>) -> Result<Vec<f64>, PatternError> {
    if named.contains_key(&0) {
        return Err(PatternError::ZeroSlot);
    }
    let Some(&highest) = named.keys().next_back() else {
        return Err(PatternError::Empty);
    };

    let mut positional = vec![0.0; highest];
    for (&slot, &weight) in named {
        positional[slot - 1] = weight;
    }
    Ok(positional)
}

/// Parses weights separated by whitespace and/or commas.
pub fn parse_weights(text: &str) -> Result<Vec<f64>, PatternError> {
    let weights = text
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|token| !token.is_empty())
        .map(|token| {
            token
                .parse::<f64>()
                .ok()
                .filter(|weight| weight.is_finite())
                .ok_or_else(|| PatternError::InvalidWeight(token.to_string()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    if weights.is_empty() {
        return Err(PatternError::Empty);
    }
    Ok(weights)
}

/// Parses `slot:weight` entries, e.g. `1:1.0,3:0.5`.
pub fn parse_named(text: &str) -> Result<BTreeMap<usize, f64>, PatternError> {
    let mut named = BTreeMap::new();
    for entry in text
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|entry| !entry.is_empty())
    {
        let (slot, weight) = entry
            .split_once(':')
            .ok_or_else(|| PatternError::InvalidSlot(entry.to_string()))?;
        let slot: usize = slot
            .trim()
            .parse()
            .map_err(|_| PatternError::InvalidSlot(entry.to_string()))?;
        let weight: f64 = weight
            .trim()
            .parse()
            .ok()
            .filter(|weight: &f64| weight.is_finite())
            .ok_or_else(|| PatternError::InvalidWeight(entry.to_string()))?;
        named.insert(slot, weight);
    }

    if named.is_empty() {
        return Err(PatternError::Empty);
    }
    Ok(named)
}

/// Normalized per-slot weights.
#[derive(Debug, Clone, PartialEq)]
pub struct Pattern {
    weights: Vec<f64>,
    repeats: bool,
}

impl Pattern {
    /// Positional weights; grids longer than the pattern repeat it.
    pub fn new(weights: &[f64]) -> Result<Self, PatternError> {
        if weights.is_empty() {
            return Err(PatternError::Empty);
        }
        Ok(Self {
            weights: normalize_weights(weights),
            repeats: true,
        })
    }

    /// Named slots; every slot past the highest named one weighs zero.
    pub fn from_named(named: &BTreeMap<usize, f64>) -> Result<Self, PatternError> {
        let mut pattern = Self::new(&named_to_positional(named)?)?;
        pattern.repeats = false;
        Ok(pattern)
    }

    /// A pattern that never moves anything.
    #[must_use]
    pub fn silent() -> Self {
        Self {
            weights: vec![0.0],
            repeats: true,
        }
    }

    #[must_use]
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.weights.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    #[must_use]
    pub fn repeats(&self) -> bool {
        self.repeats
    }

    /// Weight for a grid slot.
    #[must_use]
    pub fn weight(&self, slot: usize) -> f64 {
        if self.weights.is_empty() {
            return 0.0;
        }
        if self.repeats {
            self.weights[slot % self.weights.len()]
        } else {
            self.weights.get(slot).copied().unwrap_or(0.0)
        }
    }
}

/// Where a run takes its weights from.
#[derive(Debug, Clone, PartialEq)]
pub enum PatternSource {
    Positional(Vec<f64>),
    Named(BTreeMap<usize, f64>),
    File(PathBuf),
}

impl PatternSource {
    /// Reads the textual forms accepted on the command line: `slot:weight` entries select the
    /// named form, anything else is read as positional weights.
    pub fn parse(text: &str) -> Result<Self, PatternError> {
        if text.contains(':') {
            parse_named(text).map(Self::Named)
        } else {
            parse_weights(text).map(Self::Positional)
        }
    }
}

/// Whole patterns rotated one per bar.
#[derive(Debug, Clone)]
pub struct PatternPool {
    patterns: VecDeque<Pattern>,
    last_bar: Option<usize>,
}

impl PatternPool {
    pub fn new(mut patterns: Vec<Pattern>, rng: &mut ChaCha8Rng) -> Result<Self, PatternError> {
        if patterns.is_empty() {
            return Err(PatternError::Empty);
        }
        patterns.shuffle(rng);
        Ok(Self {
            patterns: patterns.into(),
            last_bar: None,
        })
    }

    #[instrument(skip(rng), fields(path = %path.display()))]
    pub fn load(path: &Path, rng: &mut ChaCha8Rng) -> Result<Self, PatternError> {
        let content = fs::read_to_string(path).map_err(|source| PatternError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let mut patterns = Vec::new();
        for (index, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let pattern = parse_weights(line)
                .and_then(|weights| Pattern::new(&weights))
                .map_err(|source| PatternError::PoolLine {
                    path: path.to_path_buf(),
                    line: index + 1,
                    source: Box::new(source),
                })?;
            patterns.push(pattern);
        }

        if patterns.is_empty() {
            return Err(PatternError::EmptyPool(path.to_path_buf()));
        }

        info!(patterns = patterns.len(), "pattern pool loaded");
        Self::new(patterns, rng)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Same bar as the previous query: the current tail. New bar: rotate head to tail first.
    pub fn for_bar(&mut self, bar: usize) -> &Pattern {
        if self.last_bar != Some(bar) {
            self.patterns.rotate_left(1);
            self.last_bar = Some(bar);
            debug!(bar, "pattern pool rotated");
        }
        &self.patterns[self.patterns.len() - 1]
    }
}

/// Per-run pattern state handed to the deviation stage.
#[derive(Debug, Clone)]
pub enum PatternResolver {
    Fixed(Pattern),
    Pool(PatternPool),
}

impl PatternResolver {
    pub fn from_source(source: &PatternSource, seed: Option<u64>) -> Result<Self, PatternError> {
        match source {
            PatternSource::Positional(weights) => Pattern::new(weights).map(Self::Fixed),
            PatternSource::Named(named) => Pattern::from_named(named).map(Self::Fixed),
            PatternSource::File(path) => {
                let mut rng = match seed {
                    Some(seed) => ChaCha8Rng::seed_from_u64(seed),
                    None => ChaCha8Rng::from_entropy(),
                };
                PatternPool::load(path, &mut rng).map(Self::Pool)
            }
        }
    }

    pub fn for_bar(&mut self, bar: usize) -> &Pattern {
        match self {
            Self::Fixed(pattern) => pattern,
            Self::Pool(pool) => pool.for_bar(bar),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn rng() -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(7)
    }

    fn distinct_patterns(count: u32) -> Vec<Pattern> {
        (1..=count)
            .map(|n| Pattern::new(&[1.0, f64::from(n) / 10.0]).expect("pattern"))
            .collect()
    }

    #[test]
    fn normalization_scales_to_unit_peak() {
        let weights = normalize_weights(&[2.0, -4.0, 1.0]);
        assert_eq!(weights, vec![0.5, -1.0, 0.25]);
    }

    #[test]
    fn all_zero_weights_are_unchanged() {
        assert_eq!(normalize_weights(&[0.0, 0.0]), vec![0.0, 0.0]);
    }

    #[test]
    fn named_weights_fill_gaps() {
        let named = BTreeMap::from([(3, 0.5), (1, 1.0)]);
        assert_eq!(
            named_to_positional(&named).expect("valid slots"),
            vec![1.0, 0.0, 0.5]
        );
    }

    #[test]
    fn slot_zero_is_rejected() {
        let named = BTreeMap::from([(0, 1.0)]);
        assert!(matches!(
            named_to_positional(&named),
            Err(PatternError::ZeroSlot)
        ));
    }

    #[test]
    fn source_parsing_picks_form() {
        assert_eq!(
            PatternSource::parse("1, -0.5 0").expect("positional"),
            PatternSource::Positional(vec![1.0, -0.5, 0.0])
        );
        assert_eq!(
            PatternSource::parse("1:1.0,3:0.5").expect("named"),
            PatternSource::Named(BTreeMap::from([(1, 1.0), (3, 0.5)]))
        );
        assert!(matches!(
            PatternSource::parse("1 x"),
            Err(PatternError::InvalidWeight(token)) if token == "x"
        ));
        assert!(matches!(PatternSource::parse("  "), Err(PatternError::Empty)));
    }

    #[test]
    fn short_patterns_wrap() {
        let pattern = Pattern::new(&[1.0, -1.0]).expect("pattern");
        assert_eq!(pattern.weight(0), 1.0);
        assert_eq!(pattern.weight(3), -1.0);
        assert_eq!(pattern.weight(4), 1.0);
    }

    #[test]
    fn named_patterns_stop_at_their_highest_slot() {
        let pattern =
            Pattern::from_named(&BTreeMap::from([(1, 1.0), (3, -0.5)])).expect("pattern");
        assert!(!pattern.repeats());
        assert_eq!(pattern.weight(0), 1.0);
        assert_eq!(pattern.weight(1), 0.0);
        assert_eq!(pattern.weight(2), -0.5);
        assert_eq!(pattern.weight(3), 0.0);
        assert_eq!(pattern.weight(15), 0.0);
    }

    #[test]
    fn fixed_resolver_ignores_bar() {
        let mut resolver =
            PatternResolver::from_source(&PatternSource::Positional(vec![0.0, 2.0]), None)
                .expect("resolver");
        assert_eq!(resolver.for_bar(0).weights(), &[0.0, 1.0]);
        assert_eq!(resolver.for_bar(9).weights(), &[0.0, 1.0]);
    }

    #[test]
    fn pool_is_stable_within_a_bar_and_rotates_across_bars() {
        let patterns = distinct_patterns(3);
        let mut pool = PatternPool::new(patterns, &mut rng()).expect("pool");

        let first = pool.for_bar(0).clone();
        assert_eq!(pool.for_bar(0), &first);

        let second = pool.for_bar(1).clone();
        let third = pool.for_bar(2).clone();
        assert_ne!(first, second);
        assert_ne!(second, third);
        assert_ne!(first, third);

        // three bars later the rotation comes back around
        assert_eq!(pool.for_bar(3), &first);
    }

    #[test]
    fn pool_rotation_moves_head_to_tail() {
        let patterns = distinct_patterns(4);
        let mut pool = PatternPool::new(patterns, &mut rng()).expect("pool");
        let order: Vec<Pattern> = pool.patterns.iter().cloned().collect();

        assert_eq!(pool.for_bar(0), &order[0]);
        assert_eq!(pool.for_bar(1), &order[1]);
        assert_eq!(pool.for_bar(1), &order[1]);
        assert_eq!(pool.for_bar(0), &order[2]);
    }

    #[test]
    fn pool_file_lines_are_normalized_independently() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "2 0 -2 1").expect("write");
        writeln!(file).expect("write");
        writeln!(file, "# comment").expect("write");
        writeln!(file, "0.5 0.25").expect("write");

        let pool = PatternPool::load(file.path(), &mut rng()).expect("pool should load");
        assert_eq!(pool.len(), 2);
        let mut peaks: Vec<f64> = pool
            .patterns
            .iter()
            .map(|pattern| pattern.weights().iter().fold(0.0_f64, |a, w| a.max(w.abs())))
            .collect();
        peaks.dedup();
        assert_eq!(peaks, vec![1.0]);
    }

    #[test]
    fn pool_reports_bad_lines() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "1 0").expect("write");
        writeln!(file, "1 nope").expect("write");

        let error = PatternPool::load(file.path(), &mut rng()).expect_err("bad line");
        assert!(matches!(error, PatternError::PoolLine { line: 2, .. }));
    }

    #[test]
    fn missing_pool_file_is_an_io_error() {
        let error = PatternResolver::from_source(
            &PatternSource::File(PathBuf::from("/definitely/not/here.txt")),
            Some(1),
        )
        .expect_err("missing file");
        assert!(matches!(error, PatternError::Io { .. }));
    }

    #[test]
    fn seeded_shuffles_are_reproducible() {
        let patterns = distinct_patterns(8);
        let a = PatternPool::new(patterns.clone(), &mut rng()).expect("pool");
        let b = PatternPool::new(patterns, &mut rng()).expect("pool");
        assert_eq!(a.patterns, b.patterns);
    }
}
