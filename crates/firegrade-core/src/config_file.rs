use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::doc_type::Overrides;

/// On-disk TOML configuration structure.
/// All fields are optional so partial configs work (merge with defaults).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    pub thresholds: Option<ThresholdsConfig>,
    pub bench: Option<BenchConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThresholdsConfig {
    pub max_time_seconds: Option<f64>,
    pub min_throughput_mb_per_sec: Option<f64>,
    pub entity_precision_threshold: Option<f64>,
    pub entity_recall_threshold: Option<f64>,
    pub chunk_iou_threshold: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BenchConfig {
    pub fixtures_dir: Option<String>,
    pub num_workers: Option<usize>,
    pub timeout_seconds: Option<f64>,
    pub subset_size: Option<usize>,
    pub skip_slow: Option<bool>,
    pub parallel: Option<bool>,
}

/// Platform config directory path: `<config_dir>/firegrade/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("firegrade").join("config.toml"))
}

/// Load config by cascading CWD `.firegrade.toml` over platform config.
/// CWD values override platform values.
pub fn load_config() -> ConfigFile {
    let platform = config_path().and_then(|p| load_from_path(&p));
    let cwd = load_from_path(&PathBuf::from(".firegrade.toml"));

    match (platform, cwd) {
        (None, None) => ConfigFile::default(),
        (Some(p), None) => p,
        (None, Some(c)) => c,
        (Some(p), Some(c)) => merge(p, c),
    }
}

/// Load a config from a specific path. Returns `None` if the file doesn't
/// exist or can't be parsed.
pub fn load_from_path(path: &PathBuf) -> Option<ConfigFile> {
    let content = std::fs::read_to_string(path).ok()?;
    toml::from_str(&content).ok()
}

/// Merge two configs: `overlay` values take precedence over `base`.
pub fn merge(base: ConfigFile, overlay: ConfigFile) -> ConfigFile {
    ConfigFile {
        thresholds: Some(ThresholdsConfig {
            max_time_seconds: overlay
                .thresholds
                .as_ref()
                .and_then(|t| t.max_time_seconds)
                .or_else(|| base.thresholds.as_ref().and_then(|t| t.max_time_seconds)),
            min_throughput_mb_per_sec: overlay
                .thresholds
                .as_ref()
                .and_then(|t| t.min_throughput_mb_per_sec)
                .or_else(|| {
                    base.thresholds
                        .as_ref()
                        .and_then(|t| t.min_throughput_mb_per_sec)
                }),
            entity_precision_threshold: overlay
                .thresholds
                .as_ref()
                .and_then(|t| t.entity_precision_threshold)
                .or_else(|| {
                    base.thresholds
                        .as_ref()
                        .and_then(|t| t.entity_precision_threshold)
                }),
            entity_recall_threshold: overlay
                .thresholds
                .as_ref()
                .and_then(|t| t.entity_recall_threshold)
                .or_else(|| {
                    base.thresholds
                        .as_ref()
                        .and_then(|t| t.entity_recall_threshold)
                }),
            chunk_iou_threshold: overlay
                .thresholds
                .as_ref()
                .and_then(|t| t.chunk_iou_threshold)
                .or_else(|| base.thresholds.as_ref().and_then(|t| t.chunk_iou_threshold)),
        }),
        bench: Some(BenchConfig {
            fixtures_dir: overlay
                .bench
                .as_ref()
                .and_then(|b| b.fixtures_dir.clone())
                .or_else(|| base.bench.as_ref().and_then(|b| b.fixtures_dir.clone())),
            num_workers: overlay
                .bench
                .as_ref()
                .and_then(|b| b.num_workers)
                .or_else(|| base.bench.as_ref().and_then(|b| b.num_workers)),
            timeout_seconds: overlay
                .bench
                .as_ref()
                .and_then(|b| b.timeout_seconds)
                .or_else(|| base.bench.as_ref().and_then(|b| b.timeout_seconds)),
            subset_size: overlay
                .bench
                .as_ref()
                .and_then(|b| b.subset_size)
                .or_else(|| base.bench.as_ref().and_then(|b| b.subset_size)),
            skip_slow: overlay
                .bench
                .as_ref()
                .and_then(|b| b.skip_slow)
                .or_else(|| base.bench.as_ref().and_then(|b| b.skip_slow)),
            parallel: overlay
                .bench
                .as_ref()
                .and_then(|b| b.parallel)
                .or_else(|| base.bench.as_ref().and_then(|b| b.parallel)),
        }),
    }
}

/// Save the current config to the platform config directory.
pub fn save_config(config: &ConfigFile) -> Result<PathBuf, String> {
    let path = config_path().ok_or_else(|| "Could not determine config directory".to_string())?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
    }
    let content =
        toml::to_string_pretty(config).map_err(|e| format!("Failed to serialize config: {}", e))?;
    std::fs::write(&path, content).map_err(|e| format!("Failed to write config: {}", e))?;
    Ok(path)
}

impl ConfigFile {
    /// File-level overrides in the same shape the environment produces,
    /// so the cascade is file < environment.
    pub fn to_overrides(&self) -> Overrides {
        let t = self.thresholds.as_ref();
        let b = self.bench.as_ref();
        Overrides {
            max_time_seconds: t.and_then(|t| t.max_time_seconds),
            min_throughput_mb_per_sec: t.and_then(|t| t.min_throughput_mb_per_sec),
            entity_precision_threshold: t.and_then(|t| t.entity_precision_threshold),
            entity_recall_threshold: t.and_then(|t| t.entity_recall_threshold),
            chunk_iou_threshold: t.and_then(|t| t.chunk_iou_threshold),
            timeout_seconds: b.and_then(|b| b.timeout_seconds),
            subset_size: b.and_then(|b| b.subset_size),
            skip_slow: b.and_then(|b| b.skip_slow),
            parallel: b.and_then(|b| b.parallel),
        }
    }
}
