//! End-to-end document parsing: the seed scenarios from the specification,
//! plus a few whole-document failure cases that only show up once lexing,
//! rendering, and flattening all run together.

#[test]
fn rejects_duplicate_globals() {
    let err = tyco::parse("str name: \"a\"\nstr name: \"b\"\n").unwrap_err();
    assert!(matches!(err.kind, tyco::ErrorKind::DuplicateGlobal(_)));
}

#[test]
fn rejects_malformed_top_level_line() {
    let err = tyco::parse("this is not a valid line\n").unwrap_err();
    assert!(matches!(err.kind, tyco::ErrorKind::Malformatted));
}

#[test]
fn struct_with_no_primary_key_is_nested_only() {
    let source = "\
Address:
    str city:
    str zip:

User:
    *str id:
    Address home: Address(city: \"Springfield\", zip: \"00000\")
    - id: \"u1\", home: Address(city: \"Metropolis\", zip: \"11111\")
";
    let result = tyco::parse(source).unwrap();
    assert!(result.get("Address").is_none());
    assert_eq!(result["User"][0]["home"]["city"], serde_json::json!("Metropolis"));
}

#[test]
fn template_resolution_is_idempotent_on_literal_strings() {
    let source = "str name: \"db1\"\nstr literal: '{name} stays literal'\n";
    let result = tyco::parse(source).unwrap();
    assert_eq!(result["literal"], serde_json::json!("{name} stays literal"));
}

#[test]
fn template_escapes_into_global_scope_from_nested_instance() {
    let source = "\
str region: \"us-east\"

Service:
    str name:
    str label: \"{global.region}/{name}\"
    - name: \"api\"
";
    let result = tyco::parse(source).unwrap();
    assert_eq!(result["Service"][0]["label"], serde_json::json!("us-east/api"));
}

#[test]
fn nested_struct_default_is_deep_copied_per_instance() {
    let source = "\
Tag:
    str label: \"default\"

Item:
    *str id:
    Tag tag: Tag()
    - id: \"a\"
    - id: \"b\"
";
    let result = tyco::parse(source).unwrap();
    assert_eq!(result["Item"][0]["tag"]["label"], serde_json::json!("default"));
    assert_eq!(result["Item"][1]["tag"]["label"], serde_json::json!("default"));
}
