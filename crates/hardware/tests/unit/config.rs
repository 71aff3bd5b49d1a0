//! Configuration Tests.
//!
//! Covers loading from disk, defaults for omitted sections and the
//! cross-field checks run before a simulator is built.

use std::io::Write;

use mgsim_core::common::SimError;
use mgsim_core::config::{Config, MemoryKind, WorkloadKind};
use pretty_assertions::assert_eq;
use rstest::rstest;

fn write_config(json: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(json.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn file_overrides_only_named_fields() {
    let file = write_config(
        r#"{
            "general": { "deadlock_threshold": 50 },
            "memory": { "kind": "Banked", "banks": 8, "buffer_size": null },
            "core": { "cores": 4 },
            "workload": { "kind": "Shared", "ops_per_thread": 2 }
        }"#,
    );
    let config = Config::from_file(file.path()).unwrap();
    let default = Config::default();

    assert_eq!(config.general.deadlock_threshold, 50);
    assert_eq!(config.general.max_cycles, default.general.max_cycles);
    assert_eq!(config.memory.kind, MemoryKind::Banked);
    assert_eq!(config.memory.banks, 8);
    assert_eq!(config.memory.buffer_size, None);
    assert_eq!(config.memory.line_size, default.memory.line_size);
    assert_eq!(config.core.cores, 4);
    assert_eq!(config.core.threads_per_core, default.core.threads_per_core);
    assert_eq!(config.workload.kind, WorkloadKind::Shared);
    assert_eq!(config.coma.num_caches(), default.coma.num_caches());
}

#[rstest]
#[case("Simple", MemoryKind::Simple)]
#[case("Parallel", MemoryKind::Parallel)]
#[case("Banked", MemoryKind::Banked)]
#[case("Coma", MemoryKind::Coma)]
#[case("COMA", MemoryKind::Coma)]
fn memory_kind_names(#[case] name: &str, #[case] kind: MemoryKind) {
    let json = format!(r#"{{ "memory": {{ "kind": "{name}" }} }}"#);
    assert_eq!(Config::from_json_str(&json).unwrap().memory.kind, kind);
}

#[rstest]
#[case(r#"{ "memory": { "kind": "Magnetic" } }"#)]
#[case(r#"{ "memory": { "line_size": 0 } }"#)]
#[case(r#"{ "memory": { "size": 32 } }"#)]
#[case(r#"{ "memory": { "buffer_size": 0 } }"#)]
#[case(r#"{ "memory": { "banks": 0 } }"#)]
#[case(r#"{ "coma": { "rings": 0 } }"#)]
#[case(r#"{ "coma": { "link_capacity": 1 } }"#)]
#[case(r#"{ "coma": { "deferred_high": 3, "deferred_low": 5 } }"#)]
#[case(r#"{ "core": { "regs_per_thread": 1 } }"#)]
#[case(r#"{ "core": { "completion_buffer": 0 } }"#)]
#[case(r#"{ "core": { "threads_per_core": -1 } }"#)]
fn invalid_configs_are_rejected(#[case] json: &str) {
    assert!(matches!(Config::from_json_str(json), Err(SimError::Config(_))));
}

#[test]
fn missing_file_names_the_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.json");
    let err = Config::from_file(&path).unwrap_err();
    assert!(matches!(&err, SimError::Config(msg) if msg.contains("absent.json")), "{err}");
}
