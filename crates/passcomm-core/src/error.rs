//! Error types for decoding and assembling Password Commander exports.

use std::fmt;
use thiserror::Error;

/// Where in the export text a problem was found.
///
/// Lines and columns are 1-based when displayed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Location {
    pub line: Option<usize>,
    pub column: Option<usize>,
}

impl Location {
    /// A location known only down to the line.
    pub fn line(line: usize) -> Self {
        Self {
            line: Some(line),
            column: None,
        }
    }

    /// A location with both line and column.
    pub fn at(line: usize, column: usize) -> Self {
        Self {
            line: Some(line),
            column: Some(column),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.line, self.column) {
            (Some(line), Some(column)) => write!(f, " (line {line}, column {column})"),
            (Some(line), None) => write!(f, " (line {line})"),
            _ => Ok(()),
        }
    }
}

/// Fatal errors: any of these aborts the whole import.
#[derive(Debug, Error)]
pub enum ImportError {
    /// The text is not a well-formed Password Commander export.
    #[error("malformed export{location}: {message}")]
    Malformed { location: Location, message: String },

    /// The decoded tree could not be turned into a KeePass database.
    #[error("assembly failed: {0}")]
    Assembly(String),
}

impl ImportError {
    pub(crate) fn malformed(location: Location, message: impl Into<String>) -> Self {
        Self::Malformed {
            location,
            message: message.into(),
        }
    }

    /// The line reported for a malformed input, if known.
    pub fn line(&self) -> Option<usize> {
        match self {
            Self::Malformed { location, .. } => location.line,
            Self::Assembly(_) => None,
        }
    }
}

/// An auto-type macro referenced a command or field that cannot be translated.
///
/// Only the affected rule is dropped; decoding carries on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unresolved auto-type reference `{token}`")]
pub struct UnresolvedReference {
    pub token: String,
}

impl UnresolvedReference {
    pub(crate) fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

/// A convenience `Result` alias using [`ImportError`].
pub type Result<T> = std::result::Result<T, ImportError>;
