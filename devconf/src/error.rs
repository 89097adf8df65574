//! Error types for schema resolution, format lookups, propagation and persistence.
//!
//! Every failure in the form pipeline degrades to a sentinel value plus a
//! logged diagnostic; these types carry the diagnostic. Only [`StoreError`]
//! is surfaced to callers unmodified.

use thiserror::Error;

/// Failures while loading or walking a schema tree.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// The schema loader has no document for the reference.
    #[error("schema reference `{reference}` not found")]
    NotFound { reference: String },

    /// A schema path or node could not be interpreted.
    #[error("malformed schema at `{path}`: {reason}")]
    Malformed { path: String, reason: String },

    /// A schema node does not have the expected JSON shape.
    #[error("type mismatch at `{path}`: expected {expected}, got {actual}")]
    TypeMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Failures of a dynamic format-value lookup.
#[derive(Debug, Error)]
pub enum LookupError {
    /// The external list provider returned an error.
    #[error("list provider for `{tag}` failed: {reason}")]
    Provider { tag: String, reason: String },

    /// No list provider was registered for a provider-backed tag.
    #[error("no list provider registered for `{0}`")]
    Unregistered(String),
}

/// Failures while pushing a renamed value into its reference paths.
#[derive(Debug, Error, PartialEq)]
pub enum PropagationError {
    #[error("malformed reference path expression `{0}`")]
    MalformedExpression(String),

    #[error("segment `{segment}` of `{expression}` does not exist in the document")]
    MissingSegment { expression: String, segment: String },
}

/// Failures reported by a document store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("device `{0}` already exists")]
    Conflict(String),

    #[error("device `{0}` not found")]
    NotFound(String),

    #[error("transport error: {0}")]
    Transport(String),

    /// The document has no `dicomDeviceName`, so it cannot be addressed.
    #[error("device document has no dicomDeviceName")]
    MissingDeviceName,
}
