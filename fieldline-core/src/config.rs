//! Configuration system for Fieldline.
//!
//! Uses `figment` for layered configuration: defaults -> user config file ->
//! job file -> environment -> explicit overrides.

use crate::error::ConfigError;
use crate::mapping::SemanticType;
use crate::rules::TransformRule;
use crate::validate::{CrossFieldRule, FieldRule, QualityWeights};
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Top-level configuration of one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Ingestion settings.
    #[serde(default)]
    pub stream: StreamConfig,
    /// Auto mapper settings and target schema.
    #[serde(default)]
    pub mapping: MappingConfig,
    /// Declarative transformation rules.
    #[serde(default)]
    pub rules: Vec<TransformRule>,
    /// Rule engine limits.
    #[serde(default)]
    pub rule_engine: RuleEngineConfig,
    /// Validation rules and quality gate.
    #[serde(default)]
    pub validation: ValidationConfig,
    /// Lineage tracker settings.
    #[serde(default)]
    pub lineage: LineageConfig,
    /// Merge settings for multi-source runs.
    #[serde(default)]
    pub merge: MergeConfig,
    /// Inline reference tables, keyed by table name.
    #[serde(default)]
    pub lookups: BTreeMap<String, BTreeMap<String, serde_json::Value>>,
}

/// Compression codec of a source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Compression {
    /// Infer from the file suffix or gzip magic bytes.
    #[default]
    Auto,
    None,
    Gzip,
}

/// Ingestion streamer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Rows per chunk.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Encoding label, or "auto" to detect.
    #[serde(default = "default_auto")]
    pub encoding: String,
    /// Single-character delimiter ("tab" and "\t" accepted), or "auto" to detect.
    #[serde(default = "default_auto")]
    pub delimiter: String,
    /// Whether the first row is a header.
    #[serde(default = "default_true")]
    pub has_header: bool,
    #[serde(default)]
    pub compression: Compression,
    /// Maximum chunks processed concurrently.
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,
    /// Soft resident-memory ceiling in bytes (0 = unlimited).
    #[serde(default = "default_memory_ceiling")]
    pub memory_ceiling_bytes: u64,
    /// Fraction above the ceiling that triggers a backoff after reclamation.
    #[serde(default = "default_memory_margin")]
    pub memory_margin: f64,
    /// Backoff duration in milliseconds.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    /// Promote malformed rows and encoding failures to fatal errors.
    #[serde(default)]
    pub strict: bool,
    /// Bytes read for encoding and delimiter detection.
    #[serde(default = "default_sample_bytes")]
    pub sample_bytes: usize,
}

fn default_chunk_size() -> usize {
    10_000
}
fn default_auto() -> String {
    "auto".to_string()
}
fn default_true() -> bool {
    true
}
fn default_worker_pool_size() -> usize {
    4
}
fn default_memory_ceiling() -> u64 {
    2 * 1024 * 1024 * 1024
}
fn default_memory_margin() -> f64 {
    0.10
}
fn default_backoff_ms() -> u64 {
    250
}
fn default_sample_bytes() -> usize {
    100 * 1024
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            encoding: default_auto(),
            delimiter: default_auto(),
            has_header: true,
            compression: Compression::default(),
            worker_pool_size: default_worker_pool_size(),
            memory_ceiling_bytes: default_memory_ceiling(),
            memory_margin: default_memory_margin(),
            backoff_ms: default_backoff_ms(),
            strict: false,
            sample_bytes: default_sample_bytes(),
        }
    }
}

impl StreamConfig {
    /// The declared encoding label, or `None` for auto-detection.
    pub fn declared_encoding(&self) -> Option<&str> {
        let label = self.encoding.trim();
        if label.is_empty() || label.eq_ignore_ascii_case("auto") {
            None
        } else {
            Some(label)
        }
    }

    /// The declared delimiter byte, or `None` for auto-detection.
    pub fn declared_delimiter(&self) -> Result<Option<u8>, ConfigError> {
        match self.delimiter.as_str() {
            "" | "auto" => Ok(None),
            "tab" | "\\t" | "\t" => Ok(Some(b'\t')),
            "space" => Ok(Some(b' ')),
            other if other.len() == 1 && other.is_ascii() => Ok(Some(other.as_bytes()[0])),
            other => Err(ConfigError::Invalid(format!(
                "delimiter must be a single ASCII character or 'auto', got '{other}'"
            ))),
        }
    }
}

/// A field of the target schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetField {
    pub name: String,
    #[serde(default)]
    pub semantic_type: SemanticType,
    #[serde(default)]
    pub sample: Option<String>,
    /// Run fails at configuration time when this target cannot be mapped.
    #[serde(default)]
    pub mandatory: bool,
}

impl TargetField {
    pub fn new(name: impl Into<String>, semantic_type: SemanticType) -> Self {
        Self {
            name: name.into(),
            semantic_type,
            sample: None,
            mandatory: false,
        }
    }
}

/// Auto mapper configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingConfig {
    /// Run the auto mapper against the first chunk's header.
    #[serde(default)]
    pub auto: bool,
    /// Minimum composite score (inclusive).
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    /// Activate generated rule stubs instead of leaving them for review.
    #[serde(default)]
    pub activate_stubs: bool,
    /// Rows sampled per column when inferring source types.
    #[serde(default = "default_sample_rows")]
    pub sample_rows: usize,
    #[serde(default)]
    pub targets: Vec<TargetField>,
}

fn default_threshold() -> f64 {
    0.7
}
fn default_sample_rows() -> usize {
    50
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            auto: false,
            threshold: default_threshold(),
            activate_stubs: false,
            sample_rows: default_sample_rows(),
            targets: Vec::new(),
        }
    }
}

/// Rule engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleEngineConfig {
    /// A record is rejected when its rule failures exceed this count.
    #[serde(default = "default_max_rule_failures")]
    pub max_rule_failures: usize,
}

fn default_max_rule_failures() -> usize {
    1
}

impl Default for RuleEngineConfig {
    fn default() -> Self {
        Self {
            max_rule_failures: default_max_rule_failures(),
        }
    }
}

/// Validator configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationConfig {
    #[serde(default)]
    pub fields: Vec<FieldRule>,
    #[serde(default)]
    pub cross_field: Vec<CrossFieldRule>,
    /// Promote the first validation error to a fatal run abort.
    #[serde(default)]
    pub strict: bool,
    /// Fail the run when the run-level quality score is below this value.
    #[serde(default)]
    pub min_quality_score: Option<f64>,
    #[serde(default)]
    pub weights: QualityWeights,
}

/// Lineage tracker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineageConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Edges older than this (seconds) become eligible for compaction.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
    /// Compaction runs once the store holds more edges than this.
    #[serde(default = "default_compact_after_edges")]
    pub compact_after_edges: usize,
    /// Upper bound on simple paths returned by an ancestor query.
    #[serde(default = "default_max_paths")]
    pub max_paths: usize,
    /// Downstream systems attached to every output record.
    #[serde(default)]
    pub systems: Vec<String>,
}

fn default_retention_secs() -> u64 {
    3600
}
fn default_compact_after_edges() -> usize {
    100_000
}
fn default_max_paths() -> usize {
    1024
}

impl Default for LineageConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            retention_secs: default_retention_secs(),
            compact_after_edges: default_compact_after_edges(),
            max_paths: default_max_paths(),
            systems: Vec::new(),
        }
    }
}

/// Merge configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MergeConfig {
    /// Join results of all sources on this output field; concatenate when unset.
    #[serde(default)]
    pub join_key: Option<String>,
}

impl EngineConfig {
    /// Check value ranges that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stream.chunk_size == 0 {
            return Err(ConfigError::Invalid("stream.chunk_size must be > 0".into()));
        }
        if self.stream.worker_pool_size == 0 {
            return Err(ConfigError::Invalid(
                "stream.worker_pool_size must be > 0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.mapping.threshold) {
            return Err(ConfigError::Invalid(format!(
                "mapping.threshold must be within [0, 1], got {}",
                self.mapping.threshold
            )));
        }
        if self.stream.memory_margin < 0.0 {
            return Err(ConfigError::Invalid(
                "stream.memory_margin must be >= 0".into(),
            ));
        }
        if let Some(min) = self.validation.min_quality_score {
            if !(0.0..=1.0).contains(&min) {
                return Err(ConfigError::Invalid(format!(
                    "validation.min_quality_score must be within [0, 1], got {min}"
                )));
            }
        }
        self.stream.declared_delimiter()?;
        Ok(())
    }
}

/// Load configuration with layered merging.
///
/// Order (later wins): defaults, `~/.config/fieldline/config.toml`, the job
/// file (TOML, or JSON when the extension is `.json`), `FIELDLINE_`-prefixed
/// environment variables (`__` separates nesting), explicit overrides.
pub fn load_config(
    job_file: Option<&Path>,
    overrides: Option<&EngineConfig>,
) -> Result<EngineConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(EngineConfig::default()));

    if let Some(dirs) = directories::ProjectDirs::from("dev", "fieldline", "fieldline") {
        let user_config = dirs.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(path) = job_file {
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        figment = if is_json {
            figment.merge(Json::file(path))
        } else {
            figment.merge(Toml::file(path))
        };
    }

    figment = figment.merge(Env::prefixed("FIELDLINE_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    let config: EngineConfig = figment.extract().map_err(Box::new)?;
    config.validate()?;
    Ok(config)
}

/// Parse a configuration document from a TOML string (no other layers).
pub fn from_toml_str(text: &str) -> Result<EngineConfig, ConfigError> {
    let config: EngineConfig = Figment::from(Serialized::defaults(EngineConfig::default()))
        .merge(Toml::string(text))
        .extract()
        .map_err(Box::new)?;
    config.validate()?;
    Ok(config)
}
