//! Typed configuration with a layered loader.
//!
//! Precedence is `env > file > defaults`. Every section is validated once at
//! load time so components never read ad hoc defaults at their call sites.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::hash::BuildHasher;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{GenError, GenResult};
use crate::types::Resolution;

const PRECEDENCE: [ConfigSource; 3] = [ConfigSource::Env, ConfigSource::File, ConfigSource::Defaults];

// ─── Sections ───────────────────────────────────────────────────────────────

/// Memory guard and retry bounds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryConfig {
    /// When false the monitor reports unconstrained and never cleans.
    pub enabled: bool,
    /// Utilization percentage above which the device counts as under pressure.
    pub threshold_percent: f64,
    /// Step the degradation ladder down on exhaustion or threshold breach.
    pub auto_adjustment_enabled: bool,
    /// Force a cleanup before the first attempt of every run.
    pub safe_mode: bool,
    /// Maximum attempts per run, including the first.
    pub max_retries: u32,
    /// Cooldown between a failed attempt and the next one.
    pub recovery_delay_ms: u64,
    /// Cache-release passes per forced cleanup.
    pub cleanup_passes: u32,
    /// Pause after each cleanup pass.
    pub cleanup_pause_ms: u64,
    /// Recovery pause after the last cleanup pass.
    pub settle_pause_ms: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold_percent: 70.0,
            auto_adjustment_enabled: true,
            safe_mode: true,
            max_retries: 5,
            recovery_delay_ms: 10_000,
            cleanup_passes: 3,
            cleanup_pause_ms: 1_000,
            settle_pause_ms: 10_000,
        }
    }
}

impl MemoryConfig {
    #[must_use]
    pub const fn recovery_delay(&self) -> Duration {
        Duration::from_millis(self.recovery_delay_ms)
    }

    #[must_use]
    pub const fn cleanup_pause(&self) -> Duration {
        Duration::from_millis(self.cleanup_pause_ms)
    }

    #[must_use]
    pub const fn settle_pause(&self) -> Duration {
        Duration::from_millis(self.settle_pause_ms)
    }

    /// Check the bounds this section must satisfy.
    ///
    /// # Errors
    ///
    /// Returns `GenError::InvalidConfig` naming the offending field.
    pub fn validate(&self) -> GenResult<()> {
        if !self.threshold_percent.is_finite()
            || self.threshold_percent <= 0.0
            || self.threshold_percent > 100.0
        {
            return Err(invalid(
                "memory.threshold_percent",
                self.threshold_percent,
                "must be in (0, 100]",
            ));
        }
        if self.max_retries == 0 {
            return Err(invalid("memory.max_retries", 0, "must be at least 1"));
        }
        if self.cleanup_passes == 0 {
            return Err(invalid("memory.cleanup_passes", 0, "must be at least 1"));
        }
        Ok(())
    }
}

/// Full-quality generation settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GenerationConfig {
    pub width: u32,
    pub height: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            width: 896,
            height: 1152,
        }
    }
}

impl GenerationConfig {
    #[must_use]
    pub const fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }
}

/// Sampler history settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SamplerConfig {
    pub history_file: Option<String>,
    pub default_window: usize,
    pub category_windows: BTreeMap<String, usize>,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            history_file: None,
            default_window: 3,
            category_windows: BTreeMap::new(),
        }
    }
}

impl SamplerConfig {
    /// Window for `category`, falling back to `default_window`.
    #[must_use]
    pub fn window_for(&self, category: &str) -> usize {
        self.category_windows
            .get(category)
            .copied()
            .unwrap_or(self.default_window)
    }
}

/// Used-item pool settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PoolConfig {
    pub history_file: Option<String>,
    pub extensions: Vec<String>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            history_file: None,
            extensions: vec!["png".into(), "jpg".into(), "jpeg".into(), "webp".into()],
        }
    }
}

/// Batch planning settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchConfig {
    pub inter_genre_pause_ms: u64,
    pub genre_distribution: BTreeMap<String, f64>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            inter_genre_pause_ms: 60_000,
            genre_distribution: BTreeMap::new(),
        }
    }
}

impl BatchConfig {
    #[must_use]
    pub const fn inter_genre_pause(&self) -> Duration {
        Duration::from_millis(self.inter_genre_pause_ms)
    }
}

/// Default fallback ladder, most to least expensive.
#[must_use]
pub fn default_fallback_resolutions() -> Vec<Resolution> {
    vec![
        Resolution::new(832, 1088),
        Resolution::new(768, 1024),
        Resolution::new(704, 960),
        Resolution::new(640, 832),
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenloopConfig {
    pub memory: MemoryConfig,
    pub generation: GenerationConfig,
    pub fallback_resolutions: Vec<Resolution>,
    pub sampler: SamplerConfig,
    pub pool: PoolConfig,
    pub batch: BatchConfig,
}

impl Default for GenloopConfig {
    fn default() -> Self {
        Self {
            memory: MemoryConfig::default(),
            generation: GenerationConfig::default(),
            fallback_resolutions: default_fallback_resolutions(),
            sampler: SamplerConfig::default(),
            pool: PoolConfig::default(),
            batch: BatchConfig::default(),
        }
    }
}

// ─── Patches ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
struct MemoryConfigPatch {
    enabled: Option<bool>,
    threshold_percent: Option<f64>,
    auto_adjustment_enabled: Option<bool>,
    safe_mode: Option<bool>,
    max_retries: Option<u32>,
    recovery_delay_ms: Option<u64>,
    cleanup_passes: Option<u32>,
    cleanup_pause_ms: Option<u64>,
    settle_pause_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq, Default)]
struct GenerationConfigPatch {
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq, Default)]
struct SamplerConfigPatch {
    history_file: Option<String>,
    default_window: Option<usize>,
    category_windows: Option<BTreeMap<String, usize>>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq, Default)]
struct PoolConfigPatch {
    history_file: Option<String>,
    extensions: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
struct BatchConfigPatch {
    inter_genre_pause_ms: Option<u64>,
    genre_distribution: Option<BTreeMap<String, f64>>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
struct GenloopConfigPatch {
    memory: Option<MemoryConfigPatch>,
    generation: Option<GenerationConfigPatch>,
    fallback_resolutions: Option<Vec<Resolution>>,
    sampler: Option<SamplerConfigPatch>,
    pool: Option<PoolConfigPatch>,
    batch: Option<BatchConfigPatch>,
}

// ─── Load results ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConfigSource {
    Env,
    File,
    Defaults,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfigWarning {
    pub reason_code: String,
    pub field: String,
    pub source: ConfigSource,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConfigLoadResult {
    pub config: GenloopConfig,
    pub source_precedence: [ConfigSource; 3],
    pub config_file_used: Option<PathBuf>,
    pub env_keys_used: Vec<String>,
    pub warnings: Vec<ConfigWarning>,
}

impl ConfigLoadResult {
    /// Emit the resolved configuration as a single structured event.
    pub fn emit_loaded(&self) {
        let reason_codes: Vec<&str> = self
            .warnings
            .iter()
            .map(|warning| warning.reason_code.as_str())
            .collect();
        info!(
            precedence = ?self.source_precedence,
            config_file_used = ?self.config_file_used,
            env_keys_used = ?self.env_keys_used,
            reason_codes = ?reason_codes,
            max_retries = self.config.memory.max_retries,
            threshold_percent = self.config.memory.threshold_percent,
            fallback_rungs = self.config.fallback_resolutions.len(),
            "genloop configuration loaded"
        );
    }
}

/// Load config from an optional TOML file plus environment overrides.
///
/// A missing file is not an error; defaults are used instead.
///
/// # Errors
///
/// Returns `GenError::InvalidConfig` for parse/validation failures and
/// `GenError::Io` if reading a present file fails.
pub fn load_from_sources<S>(
    config_file: Option<&Path>,
    env: &HashMap<String, String, S>,
    home_dir: &Path,
) -> GenResult<ConfigLoadResult>
where
    S: BuildHasher,
{
    let (toml_contents, config_file_used) = match config_file {
        Some(path) if path.exists() => (Some(fs::read_to_string(path)?), Some(path.to_path_buf())),
        Some(_) | None => (None, None),
    };

    load_from_str(
        toml_contents.as_deref(),
        config_file_used.as_deref(),
        env,
        home_dir,
    )
}

/// Load config from raw TOML and environment overrides (`env > file > defaults`).
///
/// # Errors
///
/// Returns `GenError::InvalidConfig` when parsing or validation fails.
pub fn load_from_str<S>(
    config_toml: Option<&str>,
    config_file_path: Option<&Path>,
    env: &HashMap<String, String, S>,
    home_dir: &Path,
) -> GenResult<ConfigLoadResult>
where
    S: BuildHasher,
{
    let mut config = GenloopConfig::default();
    let mut warnings = Vec::new();

    if let Some(config_toml) = config_toml {
        warnings.extend(collect_unknown_key_warnings(config_toml)?);
        let patch: GenloopConfigPatch =
            toml::from_str(config_toml).map_err(|error| GenError::InvalidConfig {
                field: "config_file".into(),
                value: "<toml>".into(),
                reason: error.to_string(),
            })?;
        apply_patch(&mut config, patch);
    }

    let env_keys_used = apply_env_overrides(&mut config, env)?;
    expand_tilde_paths(&mut config, home_dir);
    validate_config(&config)?;

    let result = ConfigLoadResult {
        config,
        source_precedence: PRECEDENCE,
        config_file_used: config_file_path.map(Path::to_path_buf),
        env_keys_used,
        warnings,
    };
    result.emit_loaded();
    Ok(result)
}

fn apply_patch(config: &mut GenloopConfig, patch: GenloopConfigPatch) {
    if let Some(memory) = patch.memory {
        let target = &mut config.memory;
        if let Some(enabled) = memory.enabled {
            target.enabled = enabled;
        }
        if let Some(threshold_percent) = memory.threshold_percent {
            target.threshold_percent = threshold_percent;
        }
        if let Some(auto) = memory.auto_adjustment_enabled {
            target.auto_adjustment_enabled = auto;
        }
        if let Some(safe_mode) = memory.safe_mode {
            target.safe_mode = safe_mode;
        }
        if let Some(max_retries) = memory.max_retries {
            target.max_retries = max_retries;
        }
        if let Some(recovery_delay_ms) = memory.recovery_delay_ms {
            target.recovery_delay_ms = recovery_delay_ms;
        }
        if let Some(cleanup_passes) = memory.cleanup_passes {
            target.cleanup_passes = cleanup_passes;
        }
        if let Some(cleanup_pause_ms) = memory.cleanup_pause_ms {
            target.cleanup_pause_ms = cleanup_pause_ms;
        }
        if let Some(settle_pause_ms) = memory.settle_pause_ms {
            target.settle_pause_ms = settle_pause_ms;
        }
    }

    if let Some(generation) = patch.generation {
        if let Some(width) = generation.width {
            config.generation.width = width;
        }
        if let Some(height) = generation.height {
            config.generation.height = height;
        }
    }

    if let Some(fallbacks) = patch.fallback_resolutions {
        config.fallback_resolutions = fallbacks;
    }

    if let Some(sampler) = patch.sampler {
        if sampler.history_file.is_some() {
            config.sampler.history_file = sampler.history_file;
        }
        if let Some(default_window) = sampler.default_window {
            config.sampler.default_window = default_window;
        }
        if let Some(category_windows) = sampler.category_windows {
            config.sampler.category_windows = category_windows;
        }
    }

    if let Some(pool) = patch.pool {
        if pool.history_file.is_some() {
            config.pool.history_file = pool.history_file;
        }
        if let Some(extensions) = pool.extensions {
            config.pool.extensions = extensions;
        }
    }

    if let Some(batch) = patch.batch {
        if let Some(pause) = batch.inter_genre_pause_ms {
            config.batch.inter_genre_pause_ms = pause;
        }
        if let Some(distribution) = batch.genre_distribution {
            config.batch.genre_distribution = distribution;
        }
    }
}

fn apply_env_overrides(
    config: &mut GenloopConfig,
    env: &HashMap<String, String, impl BuildHasher>,
) -> GenResult<Vec<String>> {
    let mut keys_used = Vec::new();

    if let Some(value) = env.get("GENLOOP_MEMORY_ENABLED") {
        config.memory.enabled = parse_bool(value, "memory.enabled")?;
        keys_used.push("GENLOOP_MEMORY_ENABLED".into());
    }

    if let Some(value) = env.get("GENLOOP_MEMORY_THRESHOLD_PERCENT") {
        config.memory.threshold_percent =
            value.parse::<f64>().map_err(|_| GenError::InvalidConfig {
                field: "memory.threshold_percent".into(),
                value: value.clone(),
                reason: "expected a number".into(),
            })?;
        keys_used.push("GENLOOP_MEMORY_THRESHOLD_PERCENT".into());
    }

    if let Some(value) = env.get("GENLOOP_MEMORY_MAX_RETRIES") {
        config.memory.max_retries = parse_u32(value, "memory.max_retries")?;
        keys_used.push("GENLOOP_MEMORY_MAX_RETRIES".into());
    }

    if let Some(value) = env.get("GENLOOP_MEMORY_RECOVERY_DELAY_MS") {
        config.memory.recovery_delay_ms = parse_u64(value, "memory.recovery_delay_ms")?;
        keys_used.push("GENLOOP_MEMORY_RECOVERY_DELAY_MS".into());
    }

    if let Some(value) = env.get("GENLOOP_MEMORY_AUTO_ADJUST") {
        config.memory.auto_adjustment_enabled =
            parse_bool(value, "memory.auto_adjustment_enabled")?;
        keys_used.push("GENLOOP_MEMORY_AUTO_ADJUST".into());
    }

    if let Some(value) = env.get("GENLOOP_MEMORY_SAFE_MODE") {
        config.memory.safe_mode = parse_bool(value, "memory.safe_mode")?;
        keys_used.push("GENLOOP_MEMORY_SAFE_MODE".into());
    }

    if let Some(value) = env.get("GENLOOP_SAMPLER_HISTORY_FILE") {
        config.sampler.history_file = Some(value.clone());
        keys_used.push("GENLOOP_SAMPLER_HISTORY_FILE".into());
    }

    if let Some(value) = env.get("GENLOOP_SAMPLER_DEFAULT_WINDOW") {
        config.sampler.default_window = parse_usize(value, "sampler.default_window")?;
        keys_used.push("GENLOOP_SAMPLER_DEFAULT_WINDOW".into());
    }

    if let Some(value) = env.get("GENLOOP_POOL_HISTORY_FILE") {
        config.pool.history_file = Some(value.clone());
        keys_used.push("GENLOOP_POOL_HISTORY_FILE".into());
    }

    Ok(keys_used)
}

fn collect_unknown_key_warnings(config_toml: &str) -> GenResult<Vec<ConfigWarning>> {
    let value: toml::Value = toml::from_str(config_toml).map_err(|error| GenError::InvalidConfig {
        field: "config_file".into(),
        value: "<toml>".into(),
        reason: error.to_string(),
    })?;

    let root = value.as_table().ok_or_else(|| GenError::InvalidConfig {
        field: "config_file".into(),
        value: "<toml>".into(),
        reason: "expected table at root".into(),
    })?;

    let mut warnings = Vec::new();

    for (section, section_value) in root {
        let known_section_keys: HashSet<&str> = match section.as_str() {
            "memory" => [
                "enabled",
                "threshold_percent",
                "auto_adjustment_enabled",
                "safe_mode",
                "max_retries",
                "recovery_delay_ms",
                "cleanup_passes",
                "cleanup_pause_ms",
                "settle_pause_ms",
            ]
            .into_iter()
            .collect(),
            "generation" => ["width", "height"].into_iter().collect(),
            "sampler" => ["history_file", "default_window", "category_windows"]
                .into_iter()
                .collect(),
            "pool" => ["history_file", "extensions"].into_iter().collect(),
            "batch" => ["inter_genre_pause_ms", "genre_distribution"]
                .into_iter()
                .collect(),
            "fallback_resolutions" => continue,
            _ => {
                warnings.push(ConfigWarning {
                    reason_code: "config.unknown_key.warning".into(),
                    field: format!("config.{section}"),
                    source: ConfigSource::File,
                    message: format!("Unknown section {section} ignored"),
                });
                continue;
            }
        };

        let Some(section_table) = section_value.as_table() else {
            continue;
        };

        for key in section_table.keys() {
            if !known_section_keys.contains(key.as_str()) {
                warnings.push(ConfigWarning {
                    reason_code: "config.unknown_key.warning".into(),
                    field: format!("{section}.{key}"),
                    source: ConfigSource::File,
                    message: format!("Unknown key {section}.{key} ignored"),
                });
            }
        }
    }

    Ok(warnings)
}

fn expand_tilde_paths(config: &mut GenloopConfig, home_dir: &Path) {
    for slot in [&mut config.sampler.history_file, &mut config.pool.history_file] {
        let expanded = slot.as_deref().and_then(|raw| expand_tilde(raw, home_dir));
        if let Some(expanded) = expanded {
            *slot = Some(expanded);
        }
    }
}

fn expand_tilde(value: &str, home_dir: &Path) -> Option<String> {
    if value == "~" {
        return Some(home_dir.to_string_lossy().into_owned());
    }

    value
        .strip_prefix("~/")
        .map(|rest| home_dir.join(rest).to_string_lossy().into_owned())
}

fn validate_config(config: &GenloopConfig) -> GenResult<()> {
    config.memory.validate()?;

    let full = config.generation.resolution();
    if full.pixels() == 0 {
        return Err(invalid("generation", full, "width and height must be non-zero"));
    }

    validate_ladder(full, &config.fallback_resolutions)?;

    if config.sampler.default_window == 0 {
        return Err(invalid("sampler.default_window", 0, "must be at least 1"));
    }
    for (category, window) in &config.sampler.category_windows {
        if *window == 0 {
            return Err(invalid(
                &format!("sampler.category_windows.{category}"),
                window,
                "must be at least 1",
            ));
        }
    }

    for (genre, share) in &config.batch.genre_distribution {
        if !share.is_finite() || *share < 0.0 {
            return Err(invalid(
                &format!("batch.genre_distribution.{genre}"),
                share,
                "must be a finite, non-negative share",
            ));
        }
    }

    Ok(())
}

/// Check that every rung is non-empty and strictly cheaper than the one above it.
///
/// # Errors
///
/// Returns `GenError::InvalidConfig` naming the first offending rung.
pub fn validate_ladder(full: Resolution, rungs: &[Resolution]) -> GenResult<()> {
    let mut previous = full;
    for (idx, rung) in rungs.iter().enumerate() {
        let field = format!("fallback_resolutions[{idx}]");
        if rung.pixels() == 0 {
            return Err(invalid(&field, rung, "width and height must be non-zero"));
        }
        if rung.pixels() >= previous.pixels() {
            return Err(invalid(
                &field,
                rung,
                &format!("must have fewer pixels than {previous}"),
            ));
        }
        previous = *rung;
    }
    Ok(())
}

fn invalid(field: &str, value: impl std::fmt::Display, reason: &str) -> GenError {
    GenError::InvalidConfig {
        field: field.into(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

fn parse_bool(value: &str, field: &str) -> GenResult<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(
            field,
            value,
            "expected boolean (true/false/1/0/yes/no/on/off)",
        )),
    }
}

fn parse_usize(value: &str, field: &str) -> GenResult<usize> {
    value
        .parse::<usize>()
        .map_err(|_| invalid(field, value, "expected unsigned integer"))
}

fn parse_u32(value: &str, field: &str) -> GenResult<u32> {
    value
        .parse::<u32>()
        .map_err(|_| invalid(field, value, "expected unsigned integer"))
}

fn parse_u64(value: &str, field: &str) -> GenResult<u64> {
    value
        .parse::<u64>()
        .map_err(|_| invalid(field, value, "expected unsigned integer"))
}
