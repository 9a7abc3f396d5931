use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Failure classification used by the retry policy and the endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Caller-supplied input is malformed or violates a bound. Never retried.
    Validation,
    /// Quote acquisition failed (timeout, all venues down).
    Routing,
    /// Swap execution failed (slippage exceeded, network jitter).
    Execution,
    /// Store/cache/queue/breaker-open failures.
    System,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Validation => "VALIDATION",
            ErrorKind::Routing => "ROUTING",
            ErrorKind::Execution => "EXECUTION",
            ErrorKind::System => "SYSTEM",
        };
        f.write_str(s)
    }
}

/// Engine-wide error value.
///
/// Every fallible layer below the worker raises one of these; the worker is
/// the single place that decides retry-vs-terminate based on `retryable`.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct EngineError {
    pub kind: ErrorKind,
    pub message: String,
    pub context: HashMap<String, String>,
    pub ts: DateTime<Utc>,
    pub retryable: bool,
}

impl EngineError {
    fn new(kind: ErrorKind, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            kind,
            message: message.into(),
            context: HashMap::new(),
            ts: Utc::now(),
            retryable,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message, false)
    }

    pub fn routing(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Routing, message, true)
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Execution, message, true)
    }

    /// Retryable by default; mark breaker-open and other dead ends with
    /// [`EngineError::non_retryable`].
    pub fn system(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::System, message, true)
    }

    pub fn non_retryable(mut self) -> Self {
        self.retryable = false;
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    /// Classify a foreign error by message substring.
    ///
    /// Heuristic of last resort for errors that arrive untyped from adapters
    /// or storage drivers; first-party layers construct typed errors
    /// directly and never round-trip through this.
    pub fn classify(err: &anyhow::Error) -> Self {
        let msg = err.to_string();
        let lowered = msg.to_lowercase();

        if ["validation", "invalid", "required"]
            .iter()
            .any(|n| lowered.contains(n))
        {
            return Self::validation(msg);
        }
        if ["quote", "routing"].iter().any(|n| lowered.contains(n)) {
            return Self::routing(msg);
        }
        if ["transaction", "swap", "slippage"]
            .iter()
            .any(|n| lowered.contains(n))
        {
            return Self::execution(msg);
        }
        Self::system(msg)
    }
}
