//! Error types for Lex Harness.
//!
//! The taxonomy is non-overlapping by policy:
//!
//! | Group | Variants | Retry policy |
//! |-------|----------|--------------|
//! | Validation | `InvalidInput` | never retried |
//! | Access | `PathAbsolute`, `PathTraversal`, `PathEscape`, `NotRegularFile`, `SuffixNotAllowed`, `RootMisconfigured`, `PermissionDenied`, `TenantScopeMissing` | never retried |
//! | Resource | `TooLarge`, `CacheFull` | caller may retry with smaller input |
//! | Downstream | `EmbeddingUnavailable`, `VectorStore`, `CatalogNotFound`, `ConverterFailed`, `RendererFailed` | retried with backoff inside the gateway/engine, then surfaced |
//! | Programming | `Internal` | logged and surfaced opaque |
//!
//! No variant ever carries raw document bytes or vector data in its message.

use thiserror::Error;

/// Main error type for Lex Harness operations.
#[derive(Error, Debug)]
pub enum LexError {
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Absolute paths are not allowed for file ingestion")]
    PathAbsolute,

    #[error("Path traversal ('..') is not allowed for file ingestion")]
    PathTraversal,

    #[error("File path escapes the allowlisted ingest root")]
    PathEscape,

    #[error("Ingestion target must be a regular file")]
    NotRegularFile,

    #[error("File type not allowed. Allowed extensions: {allowed}")]
    SuffixNotAllowed { allowed: String },

    #[error("File exceeds the size cap of {limit_bytes} bytes")]
    TooLarge { limit_bytes: u64 },

    #[error("Ingest root is misconfigured: {message}")]
    RootMisconfigured { message: String },

    #[error("Permission denied: {message}")]
    PermissionDenied { message: String },

    #[error("Operations on user_documents must be scoped by tenant_id")]
    TenantScopeMissing,

    #[error("Reference cache is at capacity")]
    CacheFull,

    #[error("No healthy embedding endpoint available: {message}")]
    EmbeddingUnavailable { message: String },

    #[error("Vector store error: {0}")]
    VectorStore(#[from] sqlx::Error),

    #[error("Catalog not available: {message}")]
    CatalogNotFound { message: String },

    #[error("File conversion failed: {message}")]
    ConverterFailed { message: String },

    #[error("Document renderer failed: {message}")]
    RendererFailed { message: String },

    #[error("Resource not found: {resource}")]
    NotFound { resource: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl LexError {
    /// Stable machine-readable code for structured tool errors and
    /// per-document summaries.
    pub fn code(&self) -> &'static str {
        match self {
            LexError::InvalidInput { .. } => "invalid_input",
            LexError::PathAbsolute => "path_absolute",
            LexError::PathTraversal => "path_traversal",
            LexError::PathEscape => "path_escape",
            LexError::NotRegularFile => "not_regular_file",
            LexError::SuffixNotAllowed { .. } => "suffix_not_allowed",
            LexError::TooLarge { .. } => "too_large",
            LexError::RootMisconfigured { .. } => "root_misconfigured",
            LexError::PermissionDenied { .. } => "permission_denied",
            LexError::TenantScopeMissing => "tenant_scope_missing",
            LexError::CacheFull => "cache_full",
            LexError::EmbeddingUnavailable { .. } => "embedding_unavailable",
            LexError::VectorStore(_) => "vector_store_unavailable",
            LexError::CatalogNotFound { .. } => "catalog_not_found",
            LexError::ConverterFailed { .. } => "converter_failed",
            LexError::RendererFailed { .. } => "renderer_failed",
            LexError::NotFound { .. } => "not_found",
            LexError::Io(_) => "io_error",
            LexError::Serialization(_) => "serialization_error",
            LexError::Internal { .. } => "internal",
        }
    }

    /// Whether this error may be retried by the caller (downstream flakiness).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LexError::EmbeddingUnavailable { .. }
                | LexError::VectorStore(_)
                | LexError::RendererFailed { .. }
        )
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        LexError::InvalidInput {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        LexError::Internal {
            message: message.into(),
        }
    }
}

/// Truncate an error message for inclusion in per-document summaries.
///
/// Summaries are returned to callers; messages are bounded and must never
/// contain document content.
pub fn bounded_message(error: &LexError) -> String {
    let mut message = error.to_string();
    if message.len() > 200 {
        let mut end = 200;
        while !message.is_char_boundary(end) {
            end -= 1;
        }
        message.truncate(end);
    }
    message
}
