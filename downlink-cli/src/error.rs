//! Error type for CLI commands.

use std::fmt;

/// Errors surfaced to the terminal by CLI commands.
#[derive(Debug)]
pub enum CliError {
    /// The catalog file could not be read or parsed.
    Catalog(String),

    /// The cache manager could not be constructed.
    Setup(String),

    /// The fetch finished with content still unavailable.
    Fetch(String),

    /// The user interrupted the fetch.
    Interrupted,
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Catalog(msg) => write!(f, "catalog: {}", msg),
            Self::Setup(msg) => write!(f, "setup: {}", msg),
            Self::Fetch(msg) => write!(f, "fetch: {}", msg),
            Self::Interrupted => write!(f, "interrupted"),
        }
    }
}

impl std::error::Error for CliError {}
