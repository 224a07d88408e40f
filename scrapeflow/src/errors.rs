//! Error types for the scrapeflow engine.
//!
//! Three families exist:
//!
//! - [`StepError`]: transient failures inside a single unit of work. They are
//!   caught at the unit boundary, logged, and only abandon that branch.
//! - [`PaginationConfigError`]: the one configuration error that cannot be
//!   skipped. It cancels the run and surfaces from `Scraper::run`.
//! - [`ScrapeflowError`]: the top-level error returned by the public API.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// The main error type for scrapeflow operations.
#[derive(Debug, Error)]
pub enum ScrapeflowError {
    /// A paginate step was declared without a usable trigger subtree.
    #[error("{0}")]
    Pagination(#[from] PaginationConfigError),

    /// The start page could not be loaded.
    #[error("{0}")]
    Load(#[from] LoadError),

    /// The scraper was assembled incorrectly.
    #[error("Invalid scraper configuration: {0}")]
    Configuration(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Metadata about a configuration error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "SCRAPE-PAGINATION-YIELD").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ContractErrorInfo {
    /// Creates a new contract error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Converts to a JSON payload suitable for the event sink.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "code": self.code,
            "summary": self.summary,
            "fix_hint": self.fix_hint,
            "context": self.context,
        })
    }
}

/// Error codes attached to configuration errors.
pub mod codes {
    /// The trigger subtree of a paginate step has no (or several) yield leaves.
    pub const PAGINATION_YIELD: &str = "SCRAPE-PAGINATION-YIELD";
    /// A `One` accumulator was applied twice to the same container.
    pub const COLLECTOR_ONE: &str = "SCRAPE-COLLECTOR-ONE";
    /// An accumulator found no container of the expected type on the stack.
    pub const CONTAINER_MISSING: &str = "SCRAPE-CONTAINER-MISSING";
    /// A collector could not convert or store a value.
    pub const COLLECTOR_REJECTED: &str = "SCRAPE-COLLECTOR-REJECTED";
    /// An execution guard found no model of the expected type on the stack.
    pub const GUARD_MODEL_MISSING: &str = "SCRAPE-GUARD-MODEL";
}

/// Error raised when a paginate step cannot be wired to its trigger subtree.
#[derive(Debug, Clone, Error)]
#[error("Pagination step '{step}' is misconfigured: {message}")]
pub struct PaginationConfigError {
    /// The paginate step's name.
    pub step: String,
    /// What is wrong with the trigger subtree.
    pub message: String,
    /// Where the paginate step was declared.
    pub declared_at: String,
    /// Diagnostic info.
    pub error_info: ContractErrorInfo,
}

impl PaginationConfigError {
    /// Creates an error for a trigger subtree with `found` yield leaves.
    #[must_use]
    pub fn yield_leaves(step: impl Into<String>, declared_at: impl Into<String>, found: usize) -> Self {
        let step = step.into();
        let message = if found == 0 {
            "trigger subtree has no 'yield next page' step".to_string()
        } else {
            format!("trigger subtree has {found} 'yield next page' steps, expected exactly one")
        };
        let error_info = ContractErrorInfo::new(codes::PAGINATION_YIELD, message.clone())
            .with_fix_hint("End the trigger subtree with exactly one yield_next_page() step.")
            .with_context_entry("step", step.clone())
            .with_context_entry("found", found.to_string());

        Self {
            step,
            message,
            declared_at: declared_at.into(),
            error_info,
        }
    }
}

/// Errors reported by a page-load collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LoadError {
    /// The server answered with a non-success status.
    #[error("HTTP {status} while loading {url}")]
    Status {
        /// The requested URL.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The request could not be completed.
    #[error("Failed to load {url}: {reason}")]
    Transport {
        /// The requested URL.
        url: String,
        /// The underlying failure.
        reason: String,
    },

    /// The URL is not known to the loader.
    #[error("Page not found: {url}")]
    NotFound {
        /// The requested URL.
        url: String,
    },

    /// A URL could not be parsed or resolved.
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl {
        /// The offending URL or reference.
        url: String,
        /// Parser message.
        reason: String,
    },

    /// The loader cannot perform the requested action.
    #[error("Unsupported page action: {0}")]
    Unsupported(String),
}

impl LoadError {
    /// Creates a transport error.
    #[must_use]
    pub fn transport(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Transport {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(url: impl Into<String>) -> Self {
        Self::NotFound { url: url.into() }
    }

    /// Creates an invalid-URL error.
    #[must_use]
    pub fn invalid_url(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }
}

/// Errors returned by DOM search primitives.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SearchError {
    /// The selector could not be parsed.
    #[error("Invalid selector '{selector}': {reason}")]
    InvalidSelector {
        /// The offending selector.
        selector: String,
        /// Parser message.
        reason: String,
    },

    /// The node implementation does not support this kind of search.
    #[error("Search not supported by this node: {0}")]
    Unsupported(String),
}

/// A failure inside one unit of work.
#[derive(Debug, Error)]
pub enum StepError {
    /// A DOM search failed.
    #[error("{0}")]
    Search(#[from] SearchError),

    /// A page could not be loaded or clicked.
    #[error("{0}")]
    Load(#[from] LoadError),

    /// Parsing a value from a node failed.
    #[error("Parse failed: {0}")]
    Parse(String),

    /// A user-supplied closure failed.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StepError {
    /// A short classifier used in failure records.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Search(_) => "SearchError",
            Self::Load(_) => "LoadError",
            Self::Parse(_) => "ParseError",
            Self::Other(_) => "Error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contract_error_info_creation() {
        let info = ContractErrorInfo::new("TEST-001", "Test error")
            .with_fix_hint("Fix this by doing that")
            .with_context_entry("step", "my_step");

        assert_eq!(info.code, "TEST-001");
        assert_eq!(info.fix_hint, Some("Fix this by doing that".to_string()));
        assert_eq!(info.context.get("step"), Some(&"my_step".to_string()));
        assert_eq!(info.to_json()["code"], "TEST-001");
    }

    #[test]
    fn test_pagination_error_messages() {
        let missing = PaginationConfigError::yield_leaves("paginate", "lib.rs:1:1", 0);
        assert!(missing.to_string().contains("no 'yield next page' step"));
        assert_eq!(missing.error_info.code, codes::PAGINATION_YIELD);

        let doubled = PaginationConfigError::yield_leaves("paginate", "lib.rs:1:1", 2);
        assert!(doubled.to_string().contains("2 'yield next page' steps"));
    }

    #[test]
    fn test_pagination_error_converts_to_top_level() {
        let err: ScrapeflowError = PaginationConfigError::yield_leaves("p", "x", 0).into();
        assert!(matches!(err, ScrapeflowError::Pagination(_)));
    }

    #[test]
    fn test_step_error_kind() {
        let err: StepError = LoadError::not_found("http://a").into();
        assert_eq!(err.kind(), "LoadError");
        assert_eq!(err.to_string(), "Page not found: http://a");

        let err: StepError = anyhow::anyhow!("boom").into();
        assert_eq!(err.kind(), "Error");
        assert_eq!(err.to_string(), "boom");
    }
}
