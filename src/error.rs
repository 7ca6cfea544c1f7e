//! Logical errors that can occur while parsing or rendering Tyco source.
//!
//! Every error carries a [`Fragment`] when one is available at the point of
//! failure; `Display` formats it as `source:row:col - message`, followed by
//! the offending line, mirroring how `grill::error` attaches location
//! context to each of its error structs.

use std::fmt;
use std::io;

use thiserror::Error;

use crate::fragment::Fragment;

/// The exhaustive set of ways a parse can fail, per spec section 7.
#[derive(Debug, Error)]
pub enum ErrorKind {
    #[error("could not access file: {0}")]
    FileAccess(#[from] io::Error),

    #[error("malformatted line")]
    Malformatted,

    #[error("invalid control character in comment")]
    InvalidComment,

    #[error("expected ':' after attribute name")]
    MissingColon,

    #[error("duplicate global '{0}'")]
    DuplicateGlobal(String),

    #[error("duplicate attribute '{0}' in struct '{1}'")]
    DuplicateAttr(String, String),

    #[error("schema line encountered after instances were already declared for '{0}'")]
    SchemaAfterInit(String),

    #[error("primary key attribute '{0}' may not be an array")]
    PrimaryKeyOnArray(String),

    #[error("unknown attribute '{0}'")]
    UnknownAttr(String),

    #[error("no instance of '{0}' with primary key ({1})")]
    UnknownReference(String, String),

    #[error("duplicate primary key ({1}) for struct '{0}'")]
    DuplicatePrimaryKey(String, String),

    #[error("missing required attribute '{0}'")]
    MissingAttr(String),

    #[error("positional argument follows a keyword argument")]
    PositionalAfterKeyword,

    #[error("expected an array for attribute '{0}'")]
    ExpectedArray(String),

    #[error("unexpected ':' in positional value")]
    StrayColon,

    #[error("unexpected delimiter '{0}'")]
    BadDelimiter(char),

    #[error("unclosed string literal")]
    UnclosedString,

    #[error("invalid bool literal '{0}'")]
    InvalidBool(String),

    #[error("invalid number literal '{0}'")]
    InvalidNumber(String),

    #[error("value was rendered more than once")]
    DoubleRender,

    #[error("template referenced an unresolved reference")]
    UnresolvedReferenceInTemplate,

    #[error("template path walked past the root of the containment chain")]
    ParentOverflow,

    #[error("template path resolved to a value that cannot be substituted into a string")]
    UntemplatableType,
}

/// A [`ErrorKind`] paired with the source location it occurred at, when one
/// was available.
#[derive(Debug)]
pub struct Error {
    pub kind: ErrorKind,
    pub fragment: Option<Fragment>,
}

impl Error {
    #[must_use]
    pub fn new(kind: ErrorKind, fragment: Option<Fragment>) -> Self {
        Self { kind, fragment }
    }

    #[must_use]
    pub fn at(kind: ErrorKind, fragment: &Fragment) -> Self {
        Self::new(kind, Some(fragment.clone()))
    }

    #[must_use]
    pub fn without_location(kind: ErrorKind) -> Self {
        Self::new(kind, None)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.fragment {
            Some(fragment) => {
                write!(f, "{fragment} - {}\n    {}", self.kind, fragment.line_text())
            }
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::without_location(ErrorKind::FileAccess(err))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn display_includes_location_and_line() {
        let origin = Rc::new(crate::fragment::Origin {
            name: Some("config.tyco".to_string()),
        });
        let fragment = Fragment::new("  bad line", 4, 3, origin);
        let err = Error::at(ErrorKind::Malformatted, &fragment);
        let rendered = err.to_string();
        assert!(rendered.starts_with("config.tyco:4:3 - malformatted line"));
        assert!(rendered.ends_with("\n      bad line"));
    }

    #[test]
    fn display_without_location_is_bare_message() {
        let err = Error::without_location(ErrorKind::StrayColon);
        assert_eq!(err.to_string(), "unexpected ':' in positional value");
    }
}
