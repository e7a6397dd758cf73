use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub dimensions: DimensionsConfig,
    #[serde(default)]
    pub aggregation: AggregationConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DimensionsConfig {
    /// The full set of dimension names a classifier may score.
    #[serde(default = "default_dimension_names")]
    pub names: Vec<String>,

    /// The dimensions participating in dedup equality. Empty means all of
    /// `names`. Non-key dimensions are stored but first-writer-wins.
    #[serde(default)]
    pub dedup_key: Vec<String>,

    /// Scores are rounded to this many decimals before comparison and
    /// storage, matching the upstream classifier's precision.
    #[serde(default = "default_round_decimals")]
    pub round_decimals: u32,
}

impl Default for DimensionsConfig {
    fn default() -> Self {
        Self {
            names: default_dimension_names(),
            dedup_key: Vec::new(),
            round_decimals: default_round_decimals(),
        }
    }
}

impl DimensionsConfig {
    /// Dimensions that define classification identity.
    pub fn dedup_dimensions(&self) -> &[String] {
        if self.dedup_key.is_empty() {
            &self.names
        } else {
            &self.dedup_key
        }
    }
}

fn default_dimension_names() -> Vec<String> {
    [
        "emotional_valence",
        "temporal_bleed",
        "certainty",
        "time_compression",
        "agency_reversal",
        "metaphor_density",
        "novel_meme",
        "sacred_profane",
        "pronoun_flip",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_round_decimals() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct AggregationConfig {
    /// Groups with fewer underlying samples are flagged low-confidence,
    /// never dropped.
    #[serde(default = "default_min_samples")]
    pub min_samples: u64,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            min_samples: default_min_samples(),
        }
    }
}

fn default_min_samples() -> u64 {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct DetectionConfig {
    /// Two-sided significance level for the Welch test.
    #[serde(default = "default_significance_level")]
    pub significance_level: f64,

    /// Number of control windows sampled per detection run.
    #[serde(default = "default_control_windows")]
    pub control_windows: usize,

    /// RNG seed for control-window sampling. Unset means entropy-seeded.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            significance_level: default_significance_level(),
            control_windows: default_control_windows(),
            seed: None,
        }
    }
}

fn default_significance_level() -> f64 {
    0.0001
}

fn default_control_windows() -> usize {
    5
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;

    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    let dims = &config.dimensions;

    if dims.names.is_empty() {
        anyhow::bail!("dimensions.names must not be empty");
    }

    for (i, name) in dims.names.iter().enumerate() {
        if name.is_empty() {
            anyhow::bail!("dimensions.names must not contain empty strings");
        }
        if dims.names[..i].contains(name) {
            anyhow::bail!("duplicate dimension name: '{}'", name);
        }
    }

    for key in &dims.dedup_key {
        if !dims.names.contains(key) {
            anyhow::bail!(
                "dimensions.dedup_key entry '{}' is not in dimensions.names",
                key
            );
        }
    }

    if dims.round_decimals > 9 {
        anyhow::bail!("dimensions.round_decimals must be <= 9");
    }

    if config.aggregation.min_samples == 0 {
        anyhow::bail!("aggregation.min_samples must be >= 1");
    }

    if !(config.detection.significance_level > 0.0 && config.detection.significance_level < 1.0) {
        anyhow::bail!("detection.significance_level must be in (0, 1)");
    }

    if config.detection.control_windows == 0 {
        anyhow::bail!("detection.control_windows must be >= 1");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_str)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let cfg = parse("[db]\npath = \"data/lxs.sqlite\"\n").unwrap();
        assert_eq!(cfg.dimensions.names.len(), 9);
        assert_eq!(cfg.dimensions.dedup_dimensions().len(), 9);
        assert_eq!(cfg.dimensions.round_decimals, 3);
        assert_eq!(cfg.aggregation.min_samples, 200);
        assert_eq!(cfg.detection.significance_level, 0.0001);
        assert_eq!(cfg.detection.control_windows, 5);
    }

    #[test]
    fn dedup_key_subset_is_honored() {
        let cfg = parse(
            r#"
            [db]
            path = "data/lxs.sqlite"

            [dimensions]
            names = ["certainty", "emotional_valence", "novel_meme"]
            dedup_key = ["certainty", "emotional_valence"]
            "#,
        )
        .unwrap();
        assert_eq!(cfg.dimensions.dedup_dimensions(), ["certainty", "emotional_valence"]);
    }

    #[test]
    fn unknown_dedup_key_is_rejected() {
        let err = parse(
            r#"
            [db]
            path = "data/lxs.sqlite"

            [dimensions]
            names = ["certainty"]
            dedup_key = ["valence"]
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("dedup_key"));
    }

    #[test]
    fn bad_significance_level_is_rejected() {
        let err = parse(
            "[db]\npath = \"x.sqlite\"\n[detection]\nsignificance_level = 1.5\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("significance_level"));
    }

    #[test]
    fn duplicate_dimension_is_rejected() {
        let err = parse(
            "[db]\npath = \"x.sqlite\"\n[dimensions]\nnames = [\"a\", \"a\"]\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }
}
