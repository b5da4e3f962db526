use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("Not found: {what}{}", suggestion_hint(.suggestions))]
    NotFound {
        what: String,
        suggestions: Vec<String>,
    },
    #[error("Unknown item: {0}")]
    UnknownItem(String),
    #[error("Parse error on line {line}: {message}")]
    ParseError { line: usize, message: String },
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),
    #[error("External command `{command}` failed: {detail}")]
    ExternalCommandFailure { command: String, detail: String },
    #[error("Malformed record {}: {message}", .path.display())]
    RecordFormat { path: PathBuf, message: String },
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl LedgerError {
    /// True for both flavours of "required but absent".
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            LedgerError::NotFound { .. } | LedgerError::UnknownItem(_)
        )
    }
}

fn suggestion_hint(suggestions: &[String]) -> String {
    if suggestions.is_empty() {
        String::new()
    } else {
        format!(" (did you mean: {}?)", suggestions.join(", "))
    }
}
