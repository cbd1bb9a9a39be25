use crate::location::SourceRange;
use thiserror::Error;

/// Basalt frontend error types
#[derive(Error, Debug)]
pub enum FrontendError {
    /// Malformed instruction, unknown command, bad flag, bad heredoc
    #[error("parse error: {message}")]
    Parse {
        message: String,
        location: Option<SourceRange>,
    },

    /// Unknown stage reference, cyclic stage graph, invalid base image
    #[error("resolve error: {message}")]
    Resolve {
        message: String,
        location: Option<SourceRange>,
    },

    /// Malformed variable expression
    #[error("expansion error: {message}")]
    Expand {
        message: String,
        location: Option<SourceRange>,
    },

    /// A mid-compile solve failed
    #[error("execution required: {0}")]
    ExecutionRequired(String),

    /// apt produced no URIs, or a URI line failed to parse
    #[error("package resolution failed: {message}")]
    PackageResolution {
        message: String,
        location: Option<SourceRange>,
    },

    /// Argument-count mismatches, invalid durations, negative retries
    #[error("validation error: {message}")]
    Validation {
        message: String,
        location: Option<SourceRange>,
    },

    /// The build-scoped cancellation signal fired
    #[error("build cancelled")]
    Cancelled,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl FrontendError {
    pub fn parse(message: impl Into<String>) -> Self {
        FrontendError::Parse {
            message: message.into(),
            location: None,
        }
    }

    pub fn resolve(message: impl Into<String>) -> Self {
        FrontendError::Resolve {
            message: message.into(),
            location: None,
        }
    }

    pub fn expand(message: impl Into<String>) -> Self {
        FrontendError::Expand {
            message: message.into(),
            location: None,
        }
    }

    pub fn package(message: impl Into<String>) -> Self {
        FrontendError::PackageResolution {
            message: message.into(),
            location: None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        FrontendError::Validation {
            message: message.into(),
            location: None,
        }
    }

    /// Attach a source range to the error if it can carry one and does not
    /// already have one.
    pub fn at(mut self, range: SourceRange) -> Self {
        match &mut self {
            FrontendError::Parse { location, .. }
            | FrontendError::Resolve { location, .. }
            | FrontendError::Expand { location, .. }
            | FrontendError::PackageResolution { location, .. }
            | FrontendError::Validation { location, .. } => {
                if location.is_none() {
                    *location = Some(range);
                }
            }
            _ => {}
        }
        self
    }

    /// The source range attached to the error, if any.
    pub fn location(&self) -> Option<SourceRange> {
        match self {
            FrontendError::Parse { location, .. }
            | FrontendError::Resolve { location, .. }
            | FrontendError::Expand { location, .. }
            | FrontendError::PackageResolution { location, .. }
            | FrontendError::Validation { location, .. } => *location,
            _ => None,
        }
    }
}

impl From<serde_json::Error> for FrontendError {
    fn from(err: serde_json::Error) -> Self {
        FrontendError::Serialization(err.to_string())
    }
}

/// Result type alias for basalt operations
pub type Result<T> = std::result::Result<T, FrontendError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_at_attaches_location_once() {
        let err = FrontendError::parse("bad flag")
            .at(SourceRange::line(3))
            .at(SourceRange::line(9));
        assert_eq!(err.location(), Some(SourceRange::line(3)));
    }

    #[test]
    fn test_at_ignores_non_located_kinds() {
        let err = FrontendError::Cancelled.at(SourceRange::line(1));
        assert_eq!(err.location(), None);
    }

    #[test]
    fn test_display_includes_message() {
        let err = FrontendError::validation("--retries cannot be negative");
        assert!(err.to_string().contains("--retries cannot be negative"));
    }
}
