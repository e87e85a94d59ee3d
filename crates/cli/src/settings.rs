use std::path::Path;

use anyhow::{Context, Result};
use render_profile_core::{EngineConfig, ThresholdConfig};
use serde::Deserialize;

/// Contents of the `--config` file.
///
/// ```toml
/// [engine]
/// max_depth = 128
///
/// [engine.metrics.memory]
/// value_kind = "self"
///
/// [thresholds.default]
/// minor = 5
/// significant = 15
/// major = 40
///
/// [thresholds.metrics.pixel_samples]
/// higher_is_better = true
/// ```
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub engine: EngineConfig,
    pub thresholds: ThresholdConfig,
}

pub fn load(path: &Path) -> Result<Settings> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    parse(&text).with_context(|| format!("Failed to parse config {}", path.display()))
}

fn parse(text: &str) -> Result<Settings> {
    Ok(toml::from_str(text)?)
}
