// crates/elspeth-config/src/config.rs
// ============================================================================
// Module: Elspeth Configuration
// Description: Configuration loading and validation for Elspeth pipelines.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: elspeth-core, elspeth-store-sqlite, serde, toml
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with strict size and path limits
//! and validated at the trust boundary before anything executes. Missing or
//! invalid configuration fails closed; the validated settings lower into the
//! engine's [`PipelineSpec`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::Component;
use std::path::Path;
use std::path::PathBuf;

use elspeth_core::AggregationOutputMode;
use elspeth_core::AggregationSettings;
use elspeth_core::BatchSettings;
use elspeth_core::PipelineSpec;
use elspeth_core::RetrySettings;
use elspeth_core::RouteTarget;
use elspeth_core::RowErrorPolicy;
use elspeth_core::RowPluginSpec;
use elspeth_core::SinkSpec;
use elspeth_core::SourceSpec;
use elspeth_core::StageKind;
use elspeth_core::TriggerSpec;
use elspeth_core::TriggerType;
use elspeth_store_sqlite::SqliteJournalMode;
use elspeth_store_sqlite::SqliteLandscapeConfig;
use elspeth_store_sqlite::SqliteSyncMode;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "elspeth.toml";
/// Environment variable used to override the config path.
pub(crate) const CONFIG_ENV_VAR: &str = "ELSPETH_CONFIG";
/// Maximum configuration file size in bytes.
pub(crate) const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum length of a single path component.
pub(crate) const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
pub(crate) const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Maximum number of row plugins in one pipeline.
pub(crate) const MAX_ROW_PLUGINS: usize = 64;
/// Maximum number of sinks in one pipeline.
pub(crate) const MAX_SINKS: usize = 64;
/// Maximum number of routes on one gate.
pub(crate) const MAX_GATE_ROUTES: usize = 32;
/// Maximum length of a plugin, sink, or label name.
pub(crate) const MAX_NAME_LENGTH: usize = 128;
/// Maximum retry attempts accepted from configuration.
pub(crate) const MAX_RETRY_ATTEMPTS: u32 = 16;
/// Maximum batch pool size accepted from configuration.
pub(crate) const MAX_BATCH_POOL_SIZE: usize = 256;
/// Maximum aggregation count threshold accepted from configuration.
pub(crate) const MAX_TRIGGER_THRESHOLD: usize = 1_000_000;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Filesystem failure while loading.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parse failure.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Validation failure.
    #[error("config invalid: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Settings Model
// ============================================================================

/// Top-level Elspeth settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ElspethSettings {
    /// Source binding.
    pub datasource: DatasourceSettings,
    /// Ordered row plugins.
    #[serde(default)]
    pub row_plugins: Vec<RowPluginSettings>,
    /// Aggregation bindings keyed by plugin occurrence.
    #[serde(default)]
    pub aggregations: Vec<AggregationBinding>,
    /// Named sinks.
    pub sinks: BTreeMap<String, SinkSettings>,
    /// Default output sink name.
    pub output_sink: String,
    /// Landscape (audit ledger) configuration.
    #[serde(default)]
    pub landscape: LandscapeSettings,
}

/// Source configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatasourceSettings {
    /// Source plugin name.
    pub plugin: String,
    /// Plugin options, interpreted by the plugin.
    #[serde(default = "empty_options")]
    pub options: Value,
    /// Policy applied to rows that violate the source contract.
    #[serde(default)]
    pub on_violation: RowErrorPolicy,
}

/// One configured row plugin.
#[derive(Debug, Clone, Deserialize)]
pub struct RowPluginSettings {
    /// Plugin name.
    pub plugin: String,
    /// Declared kind.
    #[serde(rename = "type")]
    pub kind: StageKind,
    /// Plugin options, interpreted by the plugin.
    #[serde(default = "empty_options")]
    pub options: Value,
    /// Gate routes: label to sink name, or `continue`.
    #[serde(default)]
    pub routes: BTreeMap<String, String>,
    /// Row error policy for this node.
    #[serde(default)]
    pub on_error: RowErrorPolicy,
    /// Retry policy override.
    pub retry: Option<RetryConfig>,
    /// Batch-aware pool settings.
    pub batch: Option<BatchConfig>,
}

/// Retry configuration.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts including the first.
    pub max_attempts: u32,
    /// Initial backoff in milliseconds.
    #[serde(default)]
    pub initial_backoff_ms: u64,
    /// Backoff cap in milliseconds.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

/// Returns the default backoff cap.
const fn default_max_backoff_ms() -> u64 {
    5_000
}

/// Batch-aware pool configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchConfig {
    /// Worker pool size.
    pub pool_size: usize,
    /// Backpressure threshold for submitted, unfinished rows.
    pub max_pending: usize,
    /// Per-row timeout in milliseconds.
    pub row_timeout_ms: Option<u64>,
    /// Rate-limit service name acquired before each submission.
    pub service: Option<String>,
}

/// Aggregation binding attached to one aggregation row plugin.
#[derive(Debug, Clone, Deserialize)]
pub struct AggregationBinding {
    /// Aggregation plugin name this binding applies to.
    pub node: String,
    /// Trigger configuration.
    pub trigger: TriggerConfig,
    /// Output arity mode.
    pub output_mode: AggregationOutputMode,
}

/// Trigger configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TriggerConfig {
    /// Trigger type.
    #[serde(rename = "type")]
    pub trigger_type: TriggerType,
    /// Member count threshold for count triggers.
    pub threshold: Option<usize>,
    /// Wall-time budget in milliseconds for timeout triggers.
    pub timeout_ms: Option<u64>,
}

/// Sink configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SinkSettings {
    /// Sink plugin name.
    pub plugin: String,
    /// Plugin options, interpreted by the plugin.
    #[serde(default = "empty_options")]
    pub options: Value,
}

/// Landscape (audit ledger) configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LandscapeSettings {
    /// Whether ledger recording uses the durable backend.
    #[serde(default)]
    pub enabled: bool,
    /// Backend name; only `sqlite` is supported locally.
    #[serde(default = "default_backend")]
    pub backend: String,
    /// Database path for the sqlite backend.
    pub url: Option<PathBuf>,
    /// Optional payload store database path.
    pub payload_store: Option<PathBuf>,
    /// Checkpoint configuration.
    #[serde(default)]
    pub checkpoint: CheckpointSettings,
    /// Journal mode for the sqlite backend.
    #[serde(default)]
    pub journal_mode: SqliteJournalMode,
    /// Sync mode for the sqlite backend.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
}

impl Default for LandscapeSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            backend: default_backend(),
            url: None,
            payload_store: None,
            checkpoint: CheckpointSettings::default(),
            journal_mode: SqliteJournalMode::default(),
            sync_mode: SqliteSyncMode::default(),
        }
    }
}

/// Checkpoint configuration.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct CheckpointSettings {
    /// Persist aggregation checkpoints at row boundaries.
    #[serde(default)]
    pub enabled: bool,
}

/// Returns the default ledger backend name.
fn default_backend() -> String {
    "sqlite".to_string()
}

/// Returns an empty options table.
fn empty_options() -> Value {
    Value::Object(serde_json::Map::new())
}

// ============================================================================
// SECTION: Loading
// ============================================================================

impl ElspethSettings {
    /// Loads settings from disk using the default resolution rules.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = resolve_path(path)?;
        validate_path(&resolved)?;
        let bytes = fs::read(&resolved).map_err(|err| ConfigError::Io(err.to_string()))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes)
            .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        Self::from_toml(content)
    }

    /// Parses and validates settings from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when parsing or validation fails.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let settings: Self =
            toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validates the settings for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] on the first inconsistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_name(&self.datasource.plugin, "datasource.plugin")?;
        if self.row_plugins.len() > MAX_ROW_PLUGINS {
            return Err(ConfigError::Invalid(format!(
                "row_plugins exceeds limit of {MAX_ROW_PLUGINS}"
            )));
        }
        if self.sinks.is_empty() {
            return Err(ConfigError::Invalid("at least one sink is required".to_string()));
        }
        if self.sinks.len() > MAX_SINKS {
            return Err(ConfigError::Invalid(format!("sinks exceeds limit of {MAX_SINKS}")));
        }
        for (name, sink) in &self.sinks {
            validate_name(name, "sink name")?;
            validate_name(&sink.plugin, "sink plugin")?;
        }
        if !self.sinks.contains_key(&self.output_sink) {
            return Err(ConfigError::Invalid(format!(
                "output_sink {} is not a defined sink",
                self.output_sink
            )));
        }
        validate_policy_sink(&self.datasource.on_violation, &self.sinks, "datasource")?;

        let mut aggregation_plugins = Vec::new();
        for plugin in &self.row_plugins {
            validate_name(&plugin.plugin, "row plugin name")?;
            if plugin.kind != StageKind::Gate && !plugin.routes.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "plugin {} declares routes but is not a gate",
                    plugin.plugin
                )));
            }
            if plugin.routes.len() > MAX_GATE_ROUTES {
                return Err(ConfigError::Invalid(format!(
                    "plugin {} exceeds the route limit of {MAX_GATE_ROUTES}",
                    plugin.plugin
                )));
            }
            for (label, target) in &plugin.routes {
                validate_name(label, "route label")?;
                if target != "continue" && !self.sinks.contains_key(target) {
                    return Err(ConfigError::Invalid(format!(
                        "route {label} on {} targets unknown sink {target}",
                        plugin.plugin
                    )));
                }
            }
            validate_policy_sink(&plugin.on_error, &self.sinks, &plugin.plugin)?;
            if let Some(retry) = &plugin.retry {
                if retry.max_attempts == 0 || retry.max_attempts > MAX_RETRY_ATTEMPTS {
                    return Err(ConfigError::Invalid(format!(
                        "plugin {} retry.max_attempts must be 1..={MAX_RETRY_ATTEMPTS}",
                        plugin.plugin
                    )));
                }
            }
            if let Some(batch) = &plugin.batch {
                if batch.pool_size == 0 || batch.pool_size > MAX_BATCH_POOL_SIZE {
                    return Err(ConfigError::Invalid(format!(
                        "plugin {} batch.pool_size must be 1..={MAX_BATCH_POOL_SIZE}",
                        plugin.plugin
                    )));
                }
                if batch.max_pending == 0 {
                    return Err(ConfigError::Invalid(format!(
                        "plugin {} batch.max_pending must be positive",
                        plugin.plugin
                    )));
                }
            }
            if plugin.kind == StageKind::Aggregation {
                aggregation_plugins.push(plugin.plugin.clone());
            }
        }

        for binding in &self.aggregations {
            if !aggregation_plugins.contains(&binding.node) {
                return Err(ConfigError::Invalid(format!(
                    "aggregation binding {} matches no aggregation row plugin",
                    binding.node
                )));
            }
            binding.trigger.validate(&binding.node)?;
        }
        for plugin in &aggregation_plugins {
            if !self.aggregations.iter().any(|binding| &binding.node == plugin) {
                return Err(ConfigError::Invalid(format!(
                    "aggregation plugin {plugin} has no trigger binding"
                )));
            }
        }

        self.landscape.validate()?;
        Ok(())
    }

    /// Lowers validated settings into the engine pipeline specification.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when bindings cannot be resolved.
    pub fn to_pipeline_spec(&self) -> Result<PipelineSpec, ConfigError> {
        let mut row_plugins = Vec::with_capacity(self.row_plugins.len());
        for plugin in &self.row_plugins {
            let routes: BTreeMap<String, RouteTarget> = plugin
                .routes
                .iter()
                .map(|(label, target)| {
                    let target = if target == "continue" {
                        RouteTarget::Continue
                    } else {
                        RouteTarget::Sink(target.clone())
                    };
                    (label.clone(), target)
                })
                .collect();
            let aggregation = if plugin.kind == StageKind::Aggregation {
                let binding = self
                    .aggregations
                    .iter()
                    .find(|binding| binding.node == plugin.plugin)
                    .ok_or_else(|| {
                        ConfigError::Invalid(format!(
                            "aggregation plugin {} has no trigger binding",
                            plugin.plugin
                        ))
                    })?;
                Some(AggregationSettings {
                    trigger: TriggerSpec {
                        trigger_type: binding.trigger.trigger_type,
                        threshold: binding.trigger.threshold,
                        timeout_ms: binding.trigger.timeout_ms,
                    },
                    output_mode: binding.output_mode,
                })
            } else {
                None
            };
            row_plugins.push(RowPluginSpec {
                plugin: plugin.plugin.clone(),
                kind: plugin.kind,
                options: plugin.options.clone(),
                routes,
                aggregation,
                on_error: plugin.on_error.clone(),
                retry: plugin.retry.map(|retry| RetrySettings {
                    max_attempts: retry.max_attempts,
                    initial_backoff_ms: retry.initial_backoff_ms,
                    max_backoff_ms: retry.max_backoff_ms,
                }),
                batch: plugin.batch.as_ref().map(|batch| BatchSettings {
                    pool_size: batch.pool_size,
                    max_pending: batch.max_pending,
                    row_timeout_ms: batch.row_timeout_ms,
                    service: batch.service.clone(),
                }),
            });
        }
        Ok(PipelineSpec {
            source: SourceSpec {
                plugin: self.datasource.plugin.clone(),
                options: self.datasource.options.clone(),
                on_violation: self.datasource.on_violation.clone(),
            },
            row_plugins,
            sinks: self
                .sinks
                .iter()
                .map(|(name, sink)| {
                    (name.clone(), SinkSpec {
                        plugin: sink.plugin.clone(),
                        options: sink.options.clone(),
                    })
                })
                .collect(),
            output_sink: self.output_sink.clone(),
        })
    }
}

impl TriggerConfig {
    /// Validates trigger bounds against the trigger type.
    fn validate(&self, node: &str) -> Result<(), ConfigError> {
        match self.trigger_type {
            TriggerType::Count => match self.threshold {
                Some(threshold) if threshold > 0 && threshold <= MAX_TRIGGER_THRESHOLD => Ok(()),
                _ => Err(ConfigError::Invalid(format!(
                    "aggregation {node} count trigger requires threshold 1..={MAX_TRIGGER_THRESHOLD}"
                ))),
            },
            TriggerType::Timeout => match self.timeout_ms {
                Some(timeout_ms) if timeout_ms > 0 => Ok(()),
                _ => Err(ConfigError::Invalid(format!(
                    "aggregation {node} timeout trigger requires a positive timeout_ms"
                ))),
            },
            TriggerType::EndOfSource | TriggerType::Custom => Ok(()),
        }
    }
}

impl LandscapeSettings {
    /// Validates backend selection and paths.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled {
            if self.backend != "sqlite" {
                return Err(ConfigError::Invalid(format!(
                    "landscape backend {} is not supported; use sqlite",
                    self.backend
                )));
            }
            let Some(url) = &self.url else {
                return Err(ConfigError::Invalid(
                    "landscape.url is required when the ledger is enabled".to_string(),
                ));
            };
            validate_path(url)?;
            if let Some(payloads) = &self.payload_store {
                validate_path(payloads)?;
            }
        }
        Ok(())
    }

    /// Returns the sqlite configuration when the ledger is enabled.
    #[must_use]
    pub fn sqlite_config(&self) -> Option<SqliteLandscapeConfig> {
        if !self.enabled {
            return None;
        }
        self.url.as_ref().map(|url| SqliteLandscapeConfig {
            path: url.clone(),
            busy_timeout_ms: 5_000,
            journal_mode: self.journal_mode,
            sync_mode: self.sync_mode,
        })
    }
}

// ============================================================================
// SECTION: Validation Helpers
// ============================================================================

/// Validates a plugin, sink, or label name.
fn validate_name(name: &str, what: &str) -> Result<(), ConfigError> {
    if name.is_empty() {
        return Err(ConfigError::Invalid(format!("{what} must not be empty")));
    }
    if name.len() > MAX_NAME_LENGTH {
        return Err(ConfigError::Invalid(format!(
            "{what} exceeds {MAX_NAME_LENGTH} characters"
        )));
    }
    Ok(())
}

/// Validates that a quarantine policy targets a defined sink.
fn validate_policy_sink(
    policy: &RowErrorPolicy,
    sinks: &BTreeMap<String, SinkSettings>,
    owner: &str,
) -> Result<(), ConfigError> {
    if let RowErrorPolicy::Quarantine { sink } = policy {
        if !sinks.contains_key(sink) {
            return Err(ConfigError::Invalid(format!(
                "{owner} quarantine policy targets unknown sink {sink}"
            )));
        }
    }
    Ok(())
}

/// Resolves the configuration path from the argument, env, or default.
fn resolve_path(path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = path {
        return Ok(path.to_path_buf());
    }
    if let Ok(value) = env::var(CONFIG_ENV_VAR) {
        if !value.is_empty() {
            return Ok(PathBuf::from(value));
        }
    }
    Ok(PathBuf::from(DEFAULT_CONFIG_NAME))
}

/// Validates a filesystem path against traversal and length limits.
fn validate_path(path: &Path) -> Result<(), ConfigError> {
    let display = path.display().to_string();
    if display.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid("path exceeds total length limit".to_string()));
    }
    for component in path.components() {
        match component {
            Component::ParentDir => {
                return Err(ConfigError::Invalid(format!(
                    "path {display} must not contain parent traversal"
                )));
            }
            Component::Normal(part) => {
                if part.len() > MAX_PATH_COMPONENT_LENGTH {
                    return Err(ConfigError::Invalid(
                        "path component exceeds length limit".to_string(),
                    ));
                }
            }
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
    }
    Ok(())
}
