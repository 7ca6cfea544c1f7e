//! Tyco: a strongly-typed, structured configuration language.
//!
//! A document declares typed globals and struct types, optionally gives
//! struct types a primary key and zero or more instances, and may reference
//! other instances by primary key and interpolate values with `{path}`
//! templates. [`parse`] and [`parse_file`] lex, render, and flatten a
//! document to a plain [`serde_json::Value`] tree in one call.

mod context;
mod error;
mod fragment;
mod lexer;
mod render;
mod schema;
mod template;
mod value;

use std::path::Path;

pub use error::{Error, ErrorKind, Result};
pub use fragment::{Fragment, Origin};
pub use value::{NodeKey, Rendered};

/// Parses a Tyco document held in memory, with no `#include` base
/// directory (a relative `#include` in `text` is resolved against the
/// process's current directory).
#[tracing::instrument(skip(text), level = "debug")]
pub fn parse(text: &str) -> Result<serde_json::Value> {
    let mut ctx = context::Context::new();
    lexer::lex_into(&mut ctx, text, None, None)?;
    ctx.render()?;
    Ok(ctx.to_object())
}

/// Parses a Tyco document from disk, resolving `#include` directives
/// relative to `path`'s parent directory.
#[tracing::instrument(skip(path), level = "debug")]
pub fn parse_file(path: impl AsRef<Path>) -> Result<serde_json::Value> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)?;
    let base_dir = path.parent().map(Path::to_path_buf);
    let source = Some(path.to_string_lossy().into_owned());

    let mut ctx = context::Context::new();
    ctx.begin_include(path)?;
    lexer::lex_into(&mut ctx, &text, source, base_dir.as_deref())?;
    ctx.render()?;
    Ok(ctx.to_object())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_a_typed_global() {
        let result = parse("str name: \"hello\"\n").unwrap();
        assert_eq!(result["name"], serde_json::json!("hello"));
    }

    #[test]
    fn parses_numeric_bases() {
        let result = parse("int value: 0xFF\n").unwrap();
        assert_eq!(result["value"], serde_json::json!(255));
    }

    #[test]
    fn parses_nullable_global_and_array() {
        let result = parse("?str note: null\nint[] ids: [1, 2, 3]\n").unwrap();
        assert_eq!(result["note"], serde_json::json!(null));
        assert_eq!(result["ids"], serde_json::json!([1, 2, 3]));
    }

    #[test]
    fn struct_with_primary_key_and_reference() {
        let source = "\
User:
    *str id:
    str name:
    - id: \"a\", name: \"Alice\"
    - id: \"b\", name: \"Bob\"

User owner: User(\"a\")
";
        let result = parse(source).unwrap();
        assert_eq!(result["User"].as_array().unwrap().len(), 2);
        assert_eq!(result["owner"]["name"], serde_json::json!("Alice"));
    }

    #[test]
    fn expands_templates_against_parent_instance() {
        let source = "\
Host:
    str name:
    str greeting: \"hi {name}\"
    - name: \"db1\"
";
        let result = parse(source).unwrap();
        assert_eq!(result["Host"][0]["greeting"], serde_json::json!("hi db1"));
    }

    #[test]
    fn triple_quoted_string_keeps_newlines_and_literal_skips_templates() {
        let source = "str body: \"\"\"line one\nline two\"\"\"\nstr raw: '{not_a_template}'\n";
        let result = parse(source).unwrap();
        assert_eq!(result["body"], serde_json::json!("line one\nline two"));
        assert_eq!(result["raw"], serde_json::json!("{not_a_template}"));
    }

    #[test]
    fn unknown_reference_fails() {
        let source = "\
User:
    *str id:
    str name:
    - id: \"a\", name: \"Alice\"

User owner: User(\"missing\")
";
        let err = parse(source).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::UnknownReference(_, _)));
    }

    #[test]
    fn duplicate_primary_key_fails() {
        let source = "\
User:
    *str id:
    str name:
    - id: \"a\", name: \"Alice\"
    - id: \"a\", name: \"Alice Two\"
";
        let err = parse(source).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::DuplicatePrimaryKey(_, _)));
    }
}
