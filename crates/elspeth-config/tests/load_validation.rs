// crates/elspeth-config/tests/load_validation.rs
// ============================================================================
// Module: Config Load and Validation Tests
// Description: Fail-closed parsing and lowering of Elspeth settings.
// ============================================================================
//! ## Overview
//! Verifies that settings parse from TOML, that every inconsistency fails
//! closed, and that validated settings lower into the engine specification.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use elspeth_config::ConfigError;
use elspeth_config::ElspethSettings;
use elspeth_core::RouteTarget;
use elspeth_core::RowErrorPolicy;
use elspeth_core::StageKind;
use elspeth_core::TriggerType;

const VALID: &str = r#"
output_sink = "archive"

[datasource]
plugin = "inline"

[datasource.options]
rows = [{ id = 1 }]

[[row_plugins]]
plugin = "rename"
type = "transform"

[[row_plugins]]
plugin = "condition_gate"
type = "gate"

[row_plugins.routes]
flagged = "review"
cleared = "continue"

[[row_plugins]]
plugin = "collect"
type = "aggregation"

[[aggregations]]
node = "collect"
output_mode = "passthrough"

[aggregations.trigger]
type = "count"
threshold = 3

[sinks.archive]
plugin = "jsonl"

[sinks.archive.options]
path = "out/archive.jsonl"

[sinks.review]
plugin = "jsonl"

[sinks.review.options]
path = "out/review.jsonl"
"#;

#[test]
fn valid_settings_parse_and_lower() {
    let settings = ElspethSettings::from_toml(VALID).expect("parse");
    let spec = settings.to_pipeline_spec().expect("lower");

    assert_eq!(spec.source.plugin, "inline");
    assert_eq!(spec.row_plugins.len(), 3);
    assert_eq!(spec.row_plugins[0].kind, StageKind::Transform);
    assert_eq!(spec.row_plugins[1].kind, StageKind::Gate);
    assert_eq!(
        spec.row_plugins[1].routes.get("flagged"),
        Some(&RouteTarget::Sink("review".to_string()))
    );
    assert_eq!(spec.row_plugins[1].routes.get("cleared"), Some(&RouteTarget::Continue));
    let aggregation = spec.row_plugins[2].aggregation.as_ref().expect("binding");
    assert_eq!(aggregation.trigger.trigger_type, TriggerType::Count);
    assert_eq!(aggregation.trigger.threshold, Some(3));
    assert_eq!(spec.output_sink, "archive");
}

#[test]
fn unknown_output_sink_fails_closed() {
    let toml = VALID.replace("output_sink = \"archive\"", "output_sink = \"nowhere\"");
    let err = ElspethSettings::from_toml(&toml).expect_err("must fail");
    assert!(matches!(err, ConfigError::Invalid(_)));
}

#[test]
fn route_to_unknown_sink_fails_closed() {
    let toml = VALID.replace("flagged = \"review\"", "flagged = \"missing\"");
    let err = ElspethSettings::from_toml(&toml).expect_err("must fail");
    let ConfigError::Invalid(message) = err else {
        panic!("expected Invalid");
    };
    assert!(message.contains("missing"));
}

#[test]
fn routes_on_transforms_fail_closed() {
    let toml = VALID.replace(
        "plugin = \"condition_gate\"\ntype = \"gate\"",
        "plugin = \"condition_gate\"\ntype = \"transform\"",
    );
    let err = ElspethSettings::from_toml(&toml).expect_err("must fail");
    assert!(matches!(err, ConfigError::Invalid(_)));
}

#[test]
fn aggregation_without_binding_fails_closed() {
    let toml = VALID.replace("node = \"collect\"", "node = \"elsewhere\"");
    let err = ElspethSettings::from_toml(&toml).expect_err("must fail");
    assert!(matches!(err, ConfigError::Invalid(_)));
}

#[test]
fn count_trigger_requires_a_threshold() {
    let toml = VALID.replace("threshold = 3", "");
    let err = ElspethSettings::from_toml(&toml).expect_err("must fail");
    let ConfigError::Invalid(message) = err else {
        panic!("expected Invalid");
    };
    assert!(message.contains("threshold"));
}

#[test]
fn quarantine_policy_must_target_a_defined_sink() {
    let toml = VALID.replace(
        "[datasource]\nplugin = \"inline\"",
        "[datasource]\nplugin = \"inline\"\non_violation = { quarantine = { sink = \"nope\" } }",
    );
    let err = ElspethSettings::from_toml(&toml).expect_err("must fail");
    assert!(matches!(err, ConfigError::Invalid(_)));
}

#[test]
fn quarantine_policy_parses_with_a_known_sink() {
    let toml = VALID.replace(
        "[datasource]\nplugin = \"inline\"",
        "[datasource]\nplugin = \"inline\"\non_violation = { quarantine = { sink = \"review\" } }",
    );
    let settings = ElspethSettings::from_toml(&toml).expect("parse");
    assert_eq!(settings.datasource.on_violation, RowErrorPolicy::Quarantine {
        sink: "review".to_string(),
    });
}

#[test]
fn landscape_requires_a_url_when_enabled() {
    let toml = format!("{VALID}\n[landscape]\nenabled = true\n");
    let err = ElspethSettings::from_toml(&toml).expect_err("must fail");
    let ConfigError::Invalid(message) = err else {
        panic!("expected Invalid");
    };
    assert!(message.contains("landscape.url"));
}

#[test]
fn landscape_rejects_parent_traversal_paths() {
    let toml = format!(
        "{VALID}\n[landscape]\nenabled = true\nurl = \"../outside/elspeth.db\"\n"
    );
    let err = ElspethSettings::from_toml(&toml).expect_err("must fail");
    assert!(matches!(err, ConfigError::Invalid(_)));
}

#[test]
fn landscape_sqlite_config_is_built_when_enabled() {
    let toml = format!("{VALID}\n[landscape]\nenabled = true\nurl = \"ledger/elspeth.db\"\n");
    let settings = ElspethSettings::from_toml(&toml).expect("parse");
    let sqlite = settings.landscape.sqlite_config().expect("sqlite config");
    assert!(sqlite.path.ends_with("elspeth.db"));
}

#[test]
fn oversized_plugin_lists_fail_closed() {
    let mut toml = String::from(
        "output_sink = \"archive\"\n\n[datasource]\nplugin = \"inline\"\n\n[sinks.archive]\nplugin = \"jsonl\"\n",
    );
    for index in 0..65 {
        toml.push_str(&format!("\n[[row_plugins]]\nplugin = \"t{index}\"\ntype = \"transform\"\n"));
    }
    let err = ElspethSettings::from_toml(&toml).expect_err("must fail");
    assert!(matches!(err, ConfigError::Invalid(_)));
}

#[test]
fn retry_bounds_are_enforced() {
    let toml = VALID.replace(
        "plugin = \"rename\"\ntype = \"transform\"",
        "plugin = \"rename\"\ntype = \"transform\"\nretry = { max_attempts = 0 }",
    );
    let err = ElspethSettings::from_toml(&toml).expect_err("must fail");
    assert!(matches!(err, ConfigError::Invalid(_)));
}
