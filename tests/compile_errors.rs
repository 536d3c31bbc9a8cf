// tests/compile_errors.rs

use std::io::Write;

use batchflow::config::load_and_validate;
use batchflow::errors::EngineError;
use tempfile::NamedTempFile;

fn load(contents: &str) -> Result<batchflow::config::PipelineFile, EngineError> {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{contents}").unwrap();
    load_and_validate(file.path())
}

#[test]
fn test_cycle_returns_invalid_graph() {
    let result = load(
        r#"
name = "loop"

[node.src]
kind = "source"

[node.a]
kind = "union"
from = ["src", "b"]

[node.b]
kind = "map_reduce"
from = ["a"]
map = "count"
field = "value"
"#,
    );

    match result {
        Err(EngineError::InvalidGraph(msg)) => {
            assert!(msg.contains("cycle detected"));
            assert!(msg.contains("'a'") || msg.contains("'b'"));
        }
        Err(e) => panic!("Expected InvalidGraph error, got: {:?}", e),
        Ok(_) => panic!("Expected error, got Ok"),
    }
}

#[test]
fn test_unknown_upstream_returns_invalid_graph() {
    let result = load(
        r#"
name = "p"

[node.out]
kind = "output"
from = ["missing"]
name = "result"
"#,
    );

    match result {
        Err(EngineError::InvalidGraph(msg)) => {
            assert!(msg.contains("unknown node"));
            assert!(msg.contains("missing"));
        }
        Err(e) => panic!("Expected InvalidGraph, got: {:?}", e),
        Ok(_) => panic!("Expected error, got Ok"),
    }
}

#[test]
fn test_join_needs_two_inputs() {
    let result = load(
        r#"
name = "p"

[node.errors]
kind = "source"
period = "10s"

[node.join]
kind = "join"
from = ["errors"]
as = ["errors"]
"#,
    );

    match result {
        Err(EngineError::InvalidGraph(msg)) => assert!(msg.contains("at least two inputs")),
        other => panic!("Expected InvalidGraph, got: {:?}", other),
    }
}

#[test]
fn test_bad_duration_returns_config_error() {
    let result = load(
        r#"
name = "p"

[node.cpu]
kind = "source"
period = "ten seconds"
"#,
    );

    assert!(matches!(result, Err(EngineError::ConfigError(_))));
}

#[test]
fn test_key_that_does_not_apply_to_kind_is_rejected() {
    let result = load(
        r#"
name = "p"

[node.cpu]
kind = "source"
predicate = "x > 1"
"#,
    );

    match result {
        Err(EngineError::ConfigError(msg)) => {
            assert!(msg.contains("cpu"));
            assert!(msg.contains("predicate"));
        }
        other => panic!("Expected ConfigError, got: {:?}", other),
    }
}

#[test]
fn test_unknown_kind_is_a_toml_error() {
    let result = load(
        r#"
name = "p"

[node.cpu]
kind = "teleport"
"#,
    );

    assert!(matches!(result, Err(EngineError::TomlError(_))));
}

#[test]
fn test_invalid_engine_config_is_rejected() {
    let result = load(
        r#"
name = "p"

[config]
queue_capacity = 0

[node.cpu]
kind = "source"
"#,
    );

    match result {
        Err(EngineError::ConfigError(msg)) => assert!(msg.contains("queue_capacity")),
        other => panic!("Expected ConfigError, got: {:?}", other),
    }
}

#[test]
fn test_valid_file_compiles_with_implicit_group_by_stage() {
    let file = load(
        r#"
name = "p"

[config]
join_horizon = 4

[node.cpu]
kind = "source"
measurement = "cpu"
period = "10s"
group_by = ["time(2s)", "cpu"]
where = "host = 'serverA'"

[node.high]
kind = "alert"
from = ["cpu"]
predicate = "value > 90"
flapping = [25.0, 50.0]

[node.out]
kind = "cache"
from = ["high"]
"#,
    )
    .unwrap();

    assert_eq!(file.config.join_horizon, 4);
    assert_eq!(file.blueprint.output_names(), vec!["out".to_string()]);

    let plan = batchflow::pipeline::compile(&file.blueprint, &file.config).unwrap();
    let ids: Vec<&str> = plan.stages().iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["cpu", "cpu/group_by", "high", "out"]);
    assert!(plan.describe().contains("cpu/group_by"));
}
