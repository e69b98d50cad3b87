// crates/elspeth-plugins/src/registry.rs
// ============================================================================
// Module: Elspeth Plugin Registry
// Description: Plugin name resolution for configured pipelines.
// Purpose: Bind specification entries to plugin constructors fail-closed.
// Dependencies: crate::{aggregation, gate, sink, source, transform}, elspeth-core
// ============================================================================

//! ## Overview
//! The registry maps configured plugin names to constructors. Unknown names
//! fail before any run begins; there is no dynamic discovery. Hosts with
//! their own plugin crates build [`PipelineBindings`] directly instead.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use elspeth_core::AggregationOutputMode;
use elspeth_core::BatchSettings;
use elspeth_core::PipelineBindings;
use elspeth_core::PipelineSpec;
use elspeth_core::SinkPlugin;
use elspeth_core::SourcePlugin;
use elspeth_core::StageBinding;
use elspeth_core::StageKind;
use elspeth_core::StagePlugin;
use serde_json::Value;
use thiserror::Error;

use crate::aggregation::CollectAggregation;
use crate::gate::ConditionGate;
use crate::sink::JsonlSink;
use crate::sink::MemorySink;
use crate::source::InlineSource;
use crate::transform::DigestTransform;
use crate::transform::RenameTransform;
use crate::transform::TemplateTransform;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Plugin resolution errors.
#[derive(Debug, Error)]
pub enum PluginBuildError {
    /// No plugin is registered under the name.
    #[error("unknown {kind} plugin: {name:?}")]
    UnknownPlugin {
        /// Plugin kind being resolved.
        kind: &'static str,
        /// Unresolved plugin name.
        name: String,
    },
    /// Plugin options were rejected by the constructor.
    #[error("plugin {name:?} rejected its options: {message}")]
    InvalidOptions {
        /// Plugin name.
        name: String,
        /// Constructor failure detail.
        message: String,
    },
}

// ============================================================================
// SECTION: Registry
// ============================================================================

/// Built-in plugin registry.
#[derive(Debug, Default, Clone, Copy)]
pub struct PluginRegistry;

impl PluginRegistry {
    /// Creates the built-in registry.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Builds a source plugin by name.
    ///
    /// # Errors
    ///
    /// Returns [`PluginBuildError`] for unknown names or rejected options.
    pub fn build_source(
        &self,
        name: &str,
        options: &Value,
    ) -> Result<Box<dyn SourcePlugin>, PluginBuildError> {
        match name {
            "inline" => Ok(Box::new(InlineSource::from_options(options).map_err(|err| {
                PluginBuildError::InvalidOptions {
                    name: name.to_string(),
                    message: err.to_string(),
                }
            })?)),
            other => Err(PluginBuildError::UnknownPlugin {
                kind: "source",
                name: other.to_string(),
            }),
        }
    }

    /// Builds a row plugin by declared kind and name.
    ///
    /// # Errors
    ///
    /// Returns [`PluginBuildError`] for unknown names or rejected options.
    pub fn build_stage(
        &self,
        kind: StageKind,
        name: &str,
        options: &Value,
        output_mode: Option<AggregationOutputMode>,
        batch: Option<&BatchSettings>,
    ) -> Result<StagePlugin, PluginBuildError> {
        let invalid = |err: elspeth_core::PluginError| PluginBuildError::InvalidOptions {
            name: name.to_string(),
            message: err.to_string(),
        };
        match (kind, name) {
            (StageKind::Transform, "rename") => Ok(StagePlugin::Transform(Box::new(
                RenameTransform::from_options(options).map_err(invalid)?,
            ))),
            (StageKind::Transform, "template") => Ok(StagePlugin::Transform(Box::new(
                TemplateTransform::from_options(options).map_err(invalid)?,
            ))),
            (StageKind::Transform, "digest") => Ok(StagePlugin::Transform(Box::new(
                DigestTransform::from_options(options, batch).map_err(invalid)?,
            ))),
            (StageKind::Gate, "condition_gate") => Ok(StagePlugin::Gate(Box::new(
                ConditionGate::from_options(options).map_err(invalid)?,
            ))),
            (StageKind::Aggregation, "collect") => {
                let mode = output_mode.unwrap_or(AggregationOutputMode::Passthrough);
                Ok(StagePlugin::Aggregation(Box::new(CollectAggregation::new(mode))))
            }
            (StageKind::Transform, other) => Err(PluginBuildError::UnknownPlugin {
                kind: "transform",
                name: other.to_string(),
            }),
            (StageKind::Gate, other) => Err(PluginBuildError::UnknownPlugin {
                kind: "gate",
                name: other.to_string(),
            }),
            (StageKind::Aggregation, other) => Err(PluginBuildError::UnknownPlugin {
                kind: "aggregation",
                name: other.to_string(),
            }),
        }
    }

    /// Builds a sink plugin by name.
    ///
    /// # Errors
    ///
    /// Returns [`PluginBuildError`] for unknown names or rejected options.
    pub fn build_sink(
        &self,
        name: &str,
        options: &Value,
    ) -> Result<Box<dyn SinkPlugin>, PluginBuildError> {
        match name {
            "jsonl" => Ok(Box::new(JsonlSink::from_options(options).map_err(|err| {
                PluginBuildError::InvalidOptions {
                    name: name.to_string(),
                    message: err.to_string(),
                }
            })?)),
            "memory" => {
                let (sink, _log) = MemorySink::with_log();
                Ok(Box::new(sink))
            }
            other => Err(PluginBuildError::UnknownPlugin {
                kind: "sink",
                name: other.to_string(),
            }),
        }
    }

    /// Builds every plugin instance a specification names.
    ///
    /// # Errors
    ///
    /// Returns [`PluginBuildError`] for the first unresolvable entry.
    pub fn build_bindings(
        &self,
        spec: &PipelineSpec,
    ) -> Result<PipelineBindings, PluginBuildError> {
        let source = self.build_source(&spec.source.plugin, &spec.source.options)?;
        let mut stages = Vec::with_capacity(spec.row_plugins.len());
        for plugin in &spec.row_plugins {
            let output_mode = plugin.aggregation.as_ref().map(|binding| binding.output_mode);
            let stage = self.build_stage(
                plugin.kind,
                &plugin.plugin,
                &plugin.options,
                output_mode,
                plugin.batch.as_ref(),
            )?;
            stages.push(StageBinding {
                plugin: stage,
                on_error: plugin.on_error.clone(),
                retry: plugin.retry,
                aggregation: plugin.aggregation.clone(),
            });
        }
        let mut sinks: BTreeMap<String, Box<dyn SinkPlugin>> = BTreeMap::new();
        for (name, sink) in &spec.sinks {
            sinks.insert(name.clone(), self.build_sink(&sink.plugin, &sink.options)?);
        }
        Ok(PipelineBindings {
            source,
            stages,
            sinks,
        })
    }
}
