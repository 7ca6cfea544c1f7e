//! `#include` resolution against real files on disk: relative-path
//! resolution, cycle safety, and that a shared `Context` means locals
//! declared in an included file are visible to the file that included it.

use std::fs;

use tempfile::tempdir;

#[test]
fn include_resolves_relative_to_including_file() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("shared.tyco"), "str region: \"us-east\"\n").unwrap();
    fs::write(
        dir.path().join("main.tyco"),
        "#include shared.tyco\nstr name: \"app\"\n",
    )
    .unwrap();

    let result = tyco::parse_file(dir.path().join("main.tyco")).unwrap();
    assert_eq!(result["region"], serde_json::json!("us-east"));
    assert_eq!(result["name"], serde_json::json!("app"));
}

#[test]
fn include_cycle_is_a_silent_no_op() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("a.tyco"), "#include b.tyco\nstr a_val: \"a\"\n").unwrap();
    fs::write(dir.path().join("b.tyco"), "#include a.tyco\nstr b_val: \"b\"\n").unwrap();

    let result = tyco::parse_file(dir.path().join("a.tyco")).unwrap();
    assert_eq!(result["a_val"], serde_json::json!("a"));
    assert_eq!(result["b_val"], serde_json::json!("b"));
}

#[test]
fn including_the_same_file_twice_does_not_duplicate_globals() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("shared.tyco"), "str region: \"us-east\"\n").unwrap();
    fs::write(
        dir.path().join("main.tyco"),
        "#include shared.tyco\n#include shared.tyco\nstr name: \"app\"\n",
    )
    .unwrap();

    let result = tyco::parse_file(dir.path().join("main.tyco")).unwrap();
    assert_eq!(result["region"], serde_json::json!("us-east"));
}
