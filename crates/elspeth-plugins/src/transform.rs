// crates/elspeth-plugins/src/transform.rs
// ============================================================================
// Module: Elspeth Reference Transforms
// Description: Rename, template, and batch-aware digest transforms.
// Purpose: Exercise the transform contract with deterministic row rewrites.
// Dependencies: elspeth-core, serde, serde_json
// ============================================================================

//! ## Overview
//! Three transforms: `rename` projects fields under new names, `template`
//! renders a format string over row fields into a target field, and
//! `digest` stamps each row with its content hash through the bounded
//! batch-aware worker pool. All fail with structured reasons rather than
//! raising.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use elspeth_core::BatchSettings;
use elspeth_core::BatchWorkerPool;
use elspeth_core::Determinism;
use elspeth_core::PipelineRow;
use elspeth_core::PluginContext;
use elspeth_core::PluginError;
use elspeth_core::TransformErrorCategory;
use elspeth_core::TransformErrorReason;
use elspeth_core::TransformPlugin;
use elspeth_core::TransformResult;
use elspeth_core::content_hash;
use serde::Deserialize;
use serde_json::Value;

// ============================================================================
// SECTION: Rename Transform
// ============================================================================

/// Rename transform options.
#[derive(Debug, Clone, Deserialize)]
pub struct RenameOptions {
    /// Old display name to new display name.
    pub mapping: BTreeMap<String, String>,
    /// Fail rows that lack a mapped field.
    #[serde(default)]
    pub strict: bool,
}

/// Transform renaming fields per a configured mapping.
pub struct RenameTransform {
    /// Configured options.
    options: RenameOptions,
}

impl RenameTransform {
    /// Builds a rename transform from plugin options.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Failed`] when options are malformed.
    pub fn from_options(options: &Value) -> Result<Self, PluginError> {
        let options: RenameOptions = serde_json::from_value(options.clone())
            .map_err(|err| PluginError::Failed(format!("rename options: {err}")))?;
        Ok(Self {
            options,
        })
    }
}

impl TransformPlugin for RenameTransform {
    fn name(&self) -> &str {
        "rename"
    }

    fn plugin_version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn determinism(&self) -> Determinism {
        Determinism::Deterministic
    }

    fn process(&mut self, row: PipelineRow, _ctx: &mut PluginContext<'_>) -> TransformResult {
        let mut row = row;
        for (old, new) in &self.options.mapping {
            match row.remove(old) {
                Some(value) => {
                    if let Err(err) = row.set(new, value) {
                        return TransformResult::error(TransformErrorReason::new(
                            TransformErrorCategory::Validation,
                            err.to_string(),
                        ));
                    }
                }
                None if self.options.strict => {
                    return TransformResult::error(TransformErrorReason::new(
                        TransformErrorCategory::Validation,
                        format!("field {old} is absent and mapping is strict"),
                    ));
                }
                None => {}
            }
        }
        TransformResult::success(row.into_data())
    }
}

// ============================================================================
// SECTION: Template Transform
// ============================================================================

/// Template transform options.
#[derive(Debug, Clone, Deserialize)]
pub struct TemplateOptions {
    /// Target field receiving the rendered text.
    pub target: String,
    /// Template with `{field}` placeholders.
    pub template: String,
}

/// Transform rendering a template over row fields.
pub struct TemplateTransform {
    /// Configured options.
    options: TemplateOptions,
}

impl TemplateTransform {
    /// Builds a template transform from plugin options.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Failed`] when options are malformed.
    pub fn from_options(options: &Value) -> Result<Self, PluginError> {
        let options: TemplateOptions = serde_json::from_value(options.clone())
            .map_err(|err| PluginError::Failed(format!("template options: {err}")))?;
        Ok(Self {
            options,
        })
    }

    /// Renders the template, collecting unresolved placeholders.
    fn render(&self, row: &PipelineRow) -> Result<String, Vec<String>> {
        let mut out = String::with_capacity(self.options.template.len());
        let mut missing = Vec::new();
        let mut rest = self.options.template.as_str();
        while let Some(start) = rest.find('{') {
            out.push_str(&rest[..start]);
            let tail = &rest[start + 1..];
            let Some(end) = tail.find('}') else {
                missing.push("unterminated placeholder".to_string());
                break;
            };
            let field = &tail[..end];
            match row.get(field) {
                Some(Value::String(text)) => out.push_str(text),
                Some(value) => out.push_str(&value.to_string()),
                None => missing.push(format!("unresolved placeholder {field}")),
            }
            rest = &tail[end + 1..];
        }
        if missing.is_empty() {
            out.push_str(rest);
            Ok(out)
        } else {
            Err(missing)
        }
    }
}

impl TransformPlugin for TemplateTransform {
    fn name(&self) -> &str {
        "template"
    }

    fn plugin_version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn determinism(&self) -> Determinism {
        Determinism::Deterministic
    }

    fn process(&mut self, row: PipelineRow, _ctx: &mut PluginContext<'_>) -> TransformResult {
        match self.render(&row) {
            Ok(rendered) => {
                let mut row = row;
                if let Err(err) = row.set(&self.options.target, Value::String(rendered)) {
                    return TransformResult::error(TransformErrorReason::new(
                        TransformErrorCategory::Validation,
                        err.to_string(),
                    ));
                }
                TransformResult::success(row.into_data())
            }
            Err(template_errors) => {
                let mut reason = TransformErrorReason::new(
                    TransformErrorCategory::Template,
                    "template rendering failed",
                );
                reason.template_errors = template_errors;
                TransformResult::error(reason)
            }
        }
    }
}

// ============================================================================
// SECTION: Digest Transform
// ============================================================================

/// Digest transform options.
#[derive(Debug, Clone, Deserialize)]
pub struct DigestOptions {
    /// Target field receiving the row content hash.
    pub target: String,
}

/// Batch-aware transform stamping rows with their content hash.
///
/// The public contract stays synchronous `process`; internally each row is
/// handed to a bounded worker pool and the caller blocks on its per-row
/// future. The pool starts lazily on the first row so rate limiters come
/// from the run's services, never from module state.
pub struct DigestTransform {
    /// Configured options.
    options: DigestOptions,
    /// Worker pool configuration.
    batch: BatchSettings,
    /// Lazily started worker pool.
    pool: Option<BatchWorkerPool>,
}

impl DigestTransform {
    /// Builds a digest transform from plugin options and pool settings.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Failed`] when options are malformed.
    pub fn from_options(options: &Value, batch: Option<&BatchSettings>) -> Result<Self, PluginError> {
        let options: DigestOptions = serde_json::from_value(options.clone())
            .map_err(|err| PluginError::Failed(format!("digest options: {err}")))?;
        let batch = batch.cloned().unwrap_or(BatchSettings {
            pool_size: 2,
            max_pending: 16,
            row_timeout_ms: None,
            service: None,
        });
        Ok(Self {
            options,
            batch,
            pool: None,
        })
    }
}

impl TransformPlugin for DigestTransform {
    fn name(&self) -> &str {
        "digest"
    }

    fn plugin_version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn determinism(&self) -> Determinism {
        Determinism::Deterministic
    }

    fn is_batch_aware(&self) -> bool {
        true
    }

    fn process(&mut self, row: PipelineRow, ctx: &mut PluginContext<'_>) -> TransformResult {
        let batch = self.batch.clone();
        let rate_limits = ctx.services().rate_limits_handle();
        let pool = self
            .pool
            .get_or_insert_with(|| BatchWorkerPool::start(batch, rate_limits));

        let target = self.options.target.clone();
        let data = row.into_data();
        let submitted = pool.submit(Box::new(move || {
            let digest = match content_hash(&data) {
                Ok(digest) => digest,
                Err(err) => {
                    return TransformResult::error(TransformErrorReason::new(
                        TransformErrorCategory::Validation,
                        err.to_string(),
                    ));
                }
            };
            let mut row = PipelineRow::bare(data);
            if let Err(err) = row.set(&target, Value::String(digest)) {
                return TransformResult::error(TransformErrorReason::new(
                    TransformErrorCategory::Validation,
                    err.to_string(),
                ));
            }
            TransformResult::success(row.into_data())
        }));
        match submitted {
            Ok(future) => future.wait().unwrap_or_else(|err| {
                TransformResult::error(TransformErrorReason::fatal(err.to_string()))
            }),
            Err(err) => TransformResult::error(TransformErrorReason::fatal(err.to_string())),
        }
    }

    fn close(&mut self) -> Result<(), PluginError> {
        self.pool = None;
        Ok(())
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    reason = "Test-only panic-based assertions are permitted."
)]
mod tests {
    use elspeth_core::ManualClock;
    use elspeth_core::PipelineRow;
    use elspeth_core::PluginContext;
    use elspeth_core::RowData;
    use elspeth_core::RuntimeServices;
    use elspeth_core::TransformErrorCategory;
    use elspeth_core::TransformPlugin;
    use elspeth_core::TransformResult;
    use elspeth_core::contracts::NodeId;
    use elspeth_core::contracts::RunId;
    use serde_json::json;
    use std::sync::Arc;

    use super::DigestTransform;
    use super::RenameTransform;
    use super::TemplateTransform;

    fn row(pairs: &[(&str, serde_json::Value)]) -> PipelineRow {
        let mut data = RowData::new();
        for (key, value) in pairs {
            data.insert((*key).to_string(), value.clone());
        }
        PipelineRow::bare(data)
    }

    fn with_ctx<T>(run: impl FnOnce(&mut PluginContext<'_>) -> T) -> T {
        let services = RuntimeServices::new(Arc::new(ManualClock::starting_at(0)));
        let run_id = RunId::new("run-1");
        let node_id = NodeId::new("transform_test_0001");
        let mut ctx = PluginContext::new(&run_id, &node_id, &services);
        run(&mut ctx)
    }

    #[test]
    fn rename_moves_values_under_new_names() {
        let mut transform = RenameTransform::from_options(&json!({
            "mapping": {"old_name": "new_name"}
        }))
        .expect("options");
        let result = with_ctx(|ctx| transform.process(row(&[("old_name", json!(5))]), ctx));
        let TransformResult::Success { row } = result else {
            panic!("expected success");
        };
        assert_eq!(row.get("new_name"), Some(&json!(5)));
        assert!(!row.contains_key("old_name"));
    }

    #[test]
    fn strict_rename_fails_on_missing_fields() {
        let mut transform = RenameTransform::from_options(&json!({
            "mapping": {"gone": "elsewhere"},
            "strict": true
        }))
        .expect("options");
        let result = with_ctx(|ctx| transform.process(row(&[]), ctx));
        let TransformResult::Error { reason } = result else {
            panic!("expected error");
        };
        assert_eq!(reason.category, TransformErrorCategory::Validation);
    }

    #[test]
    fn digest_stamps_rows_through_the_worker_pool_in_order() {
        let mut transform =
            DigestTransform::from_options(&json!({"target": "fingerprint"}), None)
                .expect("options");
        let mut digests = Vec::new();
        for id in 0..4 {
            let result = with_ctx(|ctx| transform.process(row(&[("id", json!(id))]), ctx));
            let TransformResult::Success { row } = result else {
                panic!("expected success");
            };
            let digest = row.get("fingerprint").and_then(serde_json::Value::as_str)
                .expect("digest")
                .to_string();
            assert_eq!(digest.len(), 64);
            digests.push(digest);
        }
        // Equal inputs hash equally; distinct inputs differ.
        let again = with_ctx(|ctx| transform.process(row(&[("id", json!(0))]), ctx));
        let TransformResult::Success { row } = again else {
            panic!("expected success");
        };
        assert_eq!(row.get("fingerprint").and_then(serde_json::Value::as_str), Some(digests[0].as_str()));
        assert_ne!(digests[0], digests[1]);
        transform.close().expect("close");
    }

    #[test]
    fn template_renders_fields_and_reports_unresolved() {
        let mut transform = TemplateTransform::from_options(&json!({
            "target": "summary",
            "template": "row {id}: {text}"
        }))
        .expect("options");
        let result = with_ctx(|ctx| {
            transform.process(row(&[("id", json!(3)), ("text", json!("fine"))]), ctx)
        });
        let TransformResult::Success { row: out_row } = result else {
            panic!("expected success");
        };
        assert_eq!(out_row.get("summary"), Some(&json!("row 3: fine")));

        let result = with_ctx(|ctx| transform.process(row(&[("id", json!(3))]), ctx));
        let TransformResult::Error { reason } = result else {
            panic!("expected error");
        };
        assert_eq!(reason.category, TransformErrorCategory::Template);
        assert_eq!(reason.template_errors.len(), 1);
    }
}
