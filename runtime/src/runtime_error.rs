use std::error::Error;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use promql_common::histogram::HistogramError;
use promql_parser::parser::ParseError;

use crate::context::{ContextError, QueryContext};

pub type RuntimeResult<T> = Result<T, RuntimeError>;

#[derive(Debug, PartialEq, Clone, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Parse(ParseError),
    #[error("@ modifier is disabled")]
    ValidationAtModifierDisabled,
    #[error("negative offset is disabled")]
    ValidationNegativeOffsetDisabled,
    #[error("Argument error: {0}")]
    ArgumentError(String),
    #[error("query was canceled in {0}")]
    QueryCanceled(String),
    #[error("query timed out in {0}")]
    QueryTimeout(String),
    #[error("query processing would load too many samples into memory in {0}")]
    TooManySamples(String),
    #[error(transparent)]
    Storage(StorageError),
    #[error(transparent)]
    Histogram(HistogramError),
    #[error("{0}")]
    General(String),
}

impl RuntimeError {
    /// Maps a terminated context onto the error kind reported to callers.
    pub fn from_context(err: ContextError, env: &str) -> Self {
        match err {
            ContextError::Canceled => RuntimeError::QueryCanceled(env.to_string()),
            ContextError::DeadlineExceeded => RuntimeError::QueryTimeout(env.to_string()),
        }
    }
}

impl From<&str> for RuntimeError {
    fn from(message: &str) -> Self {
        RuntimeError::General(String::from(message))
    }
}

impl From<String> for RuntimeError {
    fn from(message: String) -> Self {
        RuntimeError::General(message)
    }
}

impl From<ParseError> for RuntimeError {
    fn from(err: ParseError) -> Self {
        RuntimeError::Parse(err)
    }
}

impl From<HistogramError> for RuntimeError {
    fn from(err: HistogramError) -> Self {
        RuntimeError::Histogram(err)
    }
}

impl From<StorageError> for RuntimeError {
    fn from(err: StorageError) -> Self {
        RuntimeError::Storage(err)
    }
}

/// Fails with the context's termination reason once it is done.
pub fn context_done(ctx: &QueryContext, env: &str) -> RuntimeResult<()> {
    match ctx.err() {
        Some(err) => Err(RuntimeError::from_context(err, env)),
        None => Ok(()),
    }
}

/// An error raised by a storage collaborator. Clones share the source, and
/// equality is identity of that source.
#[derive(Clone)]
pub struct StorageError(Arc<dyn Error + Send + Sync>);

impl StorageError {
    pub fn new<E: Error + Send + Sync + 'static>(err: E) -> Self {
        Self(Arc::new(err))
    }

    pub fn msg<S: Into<String>>(msg: S) -> Self {
        Self::new(SimpleError(msg.into()))
    }

    pub fn source_error(&self) -> &(dyn Error + Send + Sync + 'static) {
        self.0.as_ref()
    }
}

impl PartialEq for StorageError {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StorageError({:?})", self.0)
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Error for StorageError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(self.0.as_ref())
    }
}

#[derive(Debug, Error)]
#[error("{0}")]
struct SimpleError(String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_errors_compare_by_identity() {
        let a = StorageError::msg("boom");
        let b = StorageError::msg("boom");
        assert_eq!(a.clone(), a);
        assert_ne!(a, b);
        assert_eq!(
            RuntimeError::Storage(a.clone()).to_string(),
            "boom".to_string()
        );
    }

    #[test]
    fn context_errors_map_to_kinds() {
        assert_eq!(
            RuntimeError::from_context(ContextError::Canceled, "query execution"),
            RuntimeError::QueryCanceled("query execution".to_string())
        );
        assert_eq!(
            RuntimeError::from_context(ContextError::DeadlineExceeded, "query queue"),
            RuntimeError::QueryTimeout("query queue".to_string())
        );
    }
}
