//! Errors raised while parsing and evaluating directives.

use std::fmt;

use thiserror::Error;

use crate::spool::SpoolError;

/// A directive file that failed to parse.
///
/// Errors are chained from the innermost failure outwards: each grammar rule
/// that sees a failure started on a different line wraps it, so the outermost
/// error names the line where the enclosing construct began while
/// [`ParseError::root`] still reaches the original message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct ParseError {
    line: usize,
    message: Option<String>,
    #[source]
    cause: Option<Box<ParseError>>,
}

/// Result type for parser operations.
pub type ParseResult<T> = std::result::Result<T, ParseError>;

impl ParseError {
    pub fn new(line: usize, message: impl Into<String>) -> Self {
        ParseError {
            line,
            message: Some(message.into()),
            cause: None,
        }
    }

    /// Wraps `err` in an error at `line`, unless `line` is unknown (0) or is
    /// already the line of `err`.
    pub fn chain(line: usize, err: ParseError) -> Self {
        if line > 0 && line != err.line {
            ParseError {
                line,
                message: None,
                cause: Some(Box::new(err)),
            }
        } else {
            err
        }
    }

    pub fn line(&self) -> usize {
        self.line
    }

    /// The innermost error of the chain.
    pub fn root(&self) -> &ParseError {
        let mut err = self;
        while let Some(cause) = &err.cause {
            err = cause;
        }
        err
    }

    /// The message of the innermost error.
    pub fn root_message(&self) -> &str {
        self.root().message.as_deref().unwrap_or("")
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{}; at line {}", message, self.line),
            None => write!(f, "at line {}", self.line),
        }
    }
}

/// Evaluation stopped before the directive tree finished.
///
/// `Halt` is not a truth value: it bypasses every AND/OR fold and unwinds to
/// the dispatch boundary that started the evaluation.
#[derive(Debug, Error)]
pub enum Halt {
    /// An EXIT action ended processing of the current webhook.
    #[error("EXIT")]
    Exit,

    /// The spool failed while fanning the job out; fatal for this job.
    #[error("spool failure: {0}")]
    Spool(#[from] SpoolError),
}
