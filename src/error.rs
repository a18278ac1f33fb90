use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::path::PathError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Every failure the core can surface.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Load(#[from] FixtureLoadError),
    #[error(transparent)]
    Syntax(#[from] FixtureSyntaxError),
    #[error(transparent)]
    DataType(#[from] DataTypeConversionError),
    #[error(transparent)]
    Directive(#[from] DirectiveError),
    #[error(transparent)]
    Unresolved(#[from] UnresolvedReference),
    #[error(transparent)]
    Assertion(#[from] AssertionFailure),
    #[error(transparent)]
    Path(#[from] PathError),
    #[error("action caller failed: {0:#}")]
    ActionCaller(anyhow::Error),
    /// A mock, stub or frozen clock could not be started.
    #[error("{0:#}")]
    Resource(anyhow::Error),
}

#[derive(Debug, Error)]
pub enum FixtureLoadError {
    #[error("fixture path does not exist: {}", .0.display())]
    Missing(PathBuf),
    #[error("no fixture files found in {}", .0.display())]
    NoFixtureFiles(PathBuf),
    #[error("no test cases found in fixture file {}", .0.display())]
    NoTestCases(PathBuf),
    #[error("failed to read fixture file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to walk fixture directory: {0}")]
    Walk(#[from] walkdir::Error),
}

/// A fixture file could not be parsed. Carries enough provenance to point the author at the line.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{file}:{line}:{column}: {message}\n    {source_line}")]
pub struct FixtureSyntaxError {
    pub file: String,
    pub line: usize,
    pub column: usize,
    pub source_line: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("cannot convert {value:?} to {data_type}: {reason}")]
pub struct DataTypeConversionError {
    pub data_type: String,
    pub value: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DirectiveError {
    #[error("no directives registered")]
    NoDirectives,
    #[error("directive name {0:?} registered twice")]
    DuplicateName(String),
    #[error("directive {name:?} has an invalid grammar fragment: {reason}")]
    InvalidGrammar { name: String, reason: String },
    #[error("directive {name:?} needs a {collaborator} collaborator, none was configured")]
    MissingCollaborator {
        name: String,
        collaborator: &'static str,
    },
    #[error("directive {name:?}: {message}")]
    Invalid { name: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("unresolved reference [[{reference}]]: tried {}", .tried.join(", "))]
pub struct UnresolvedReference {
    pub reference: String,
    pub tried: Vec<String>,
}

/// A failed expectation. `details` holds one line per offending path.
#[derive(Debug, Clone, PartialEq, Error)]
pub struct AssertionFailure {
    pub message: String,
    pub details: Vec<String>,
}

impl AssertionFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            details: Vec::new(),
        }
    }

    pub fn with_details(message: impl Into<String>, details: Vec<String>) -> Self {
        Self {
            message: message.into(),
            details,
        }
    }

    /// Prefix the message with where the failure happened, e.g. the action path.
    pub fn in_context(mut self, context: &str) -> Self {
        self.message = format!("{context}: {}", self.message);
        self
    }
}

impl fmt::Display for AssertionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        for d in &self.details {
            write!(f, "\n  {d}")?;
        }
        Ok(())
    }
}
