//! Error types for the cascade engine.
//!
//! A single error hierarchy covers everything from catalog lookups to the
//! per-view stage failures produced by the fan-out write path.

use strsim::jaro_winkler;
use thiserror::Error;

/// The primary error type for cascade operations.
#[derive(Error, Debug)]
pub enum CascadeError {
    /// Schema error (column not found, header mismatch, etc.)
    #[error("Schema error: {message}")]
    Schema { message: String },

    /// Catalog error (table not found, etc.)
    #[error("Catalog error: {message}")]
    Catalog { message: String },

    /// A table was dropped while an insert into it (or its views) was running
    #[error("Table '{table}' disappeared while pushing to views")]
    TableDisappeared { table: String },

    /// Share-lock acquisition ran out of time
    #[error("Could not acquire share lock on table '{table}' within {timeout_ms} ms")]
    LockTimeout { table: String, timeout_ms: u64 },

    /// Dependent views nest deeper than the configured guard allows
    #[error("View cascade is too deep: {depth} levels of dependent views")]
    RecursionTooDeep { depth: usize },

    /// A view (transitively) depends on itself
    #[error("Cyclic view dependency detected at table '{table}'")]
    CycleDetected { table: String },

    /// Sibling nested array columns disagree on their per-row sizes
    #[error("Nested array size mismatch: {message}")]
    ShapeMismatch { message: String },

    /// Failure inside one view's prefix/block/suffix stage, annotated with
    /// the view the writer was pushing to when it happened
    #[error("{context} {view}: {source}")]
    ViewStage {
        context: String,
        view: String,
        #[source]
        source: Box<CascadeError>,
    },

    /// Query execution error
    #[error("Execution error: {message}")]
    Execution { message: String },

    /// Operation cancelled
    #[error("Operation cancelled")]
    Cancelled,

    /// Arrow error
    #[error("Arrow error: {message}")]
    Arrow { message: String },

    /// I/O error
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Internal error (bug in the engine)
    #[error("Internal error: {message}")]
    Internal { message: String },

    /// Not implemented
    #[error("Not implemented: {feature}")]
    NotImplemented { feature: String },

    /// Invalid argument
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },
}

impl CascadeError {
    /// Create a schema error.
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
        }
    }

    /// Create a catalog error.
    pub fn catalog(message: impl Into<String>) -> Self {
        Self::Catalog {
            message: message.into(),
        }
    }

    /// Create an execution error.
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution {
            message: message.into(),
        }
    }

    /// Create a shape-mismatch error.
    pub fn shape_mismatch(message: impl Into<String>) -> Self {
        Self::ShapeMismatch {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create a not implemented error.
    pub fn not_implemented(feature: impl Into<String>) -> Self {
        Self::NotImplemented {
            feature: feature.into(),
        }
    }

    /// Create an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Annotate a per-view stage failure with the view it belongs to.
    ///
    /// `context` reads like "while pushing to view" and `view` is the view's
    /// display name, so the final message names the failing view.
    pub fn view_stage(
        context: impl Into<String>,
        view: impl Into<String>,
        source: CascadeError,
    ) -> Self {
        Self::ViewStage {
            context: context.into(),
            view: view.into(),
            source: Box::new(source),
        }
    }

    /// Create a schema error with suggestions for similar names.
    ///
    /// Useful when a column is not found, to suggest similar names the
    /// caller might have meant.
    pub fn schema_with_suggestions(not_found: &str, available: &[String], entity_type: &str) -> Self {
        let suggestions = find_similar_names(not_found, available, 3);
        let mut message = format!("{} '{}' not found", entity_type, not_found);

        if !suggestions.is_empty() {
            message.push_str(". Did you mean: ");
            message.push_str(&suggestions.join(", "));
            message.push('?');
        }

        if !available.is_empty() && available.len() <= 10 {
            message.push_str(&format!(" Available: {}", available.join(", ")));
        }

        Self::Schema { message }
    }

    /// Create a catalog error with suggestions for similar table names.
    pub fn catalog_with_suggestions(not_found: &str, available: &[String]) -> Self {
        let suggestions = find_similar_names(not_found, available, 3);
        let mut message = format!("Table '{}' not found", not_found);

        if !suggestions.is_empty() {
            message.push_str(". Did you mean: ");
            message.push_str(&suggestions.join(", "));
            message.push('?');
        }

        Self::Catalog { message }
    }
}

/// Find similar names using Jaro-Winkler distance.
///
/// Returns up to `max_suggestions` names that are similar to `target`,
/// sorted by similarity (most similar first).
pub fn find_similar_names(target: &str, candidates: &[String], max_suggestions: usize) -> Vec<String> {
    const MIN_SIMILARITY: f64 = 0.7;

    let target_lower = target.to_lowercase();

    let mut scored: Vec<(f64, &String)> = candidates
        .iter()
        .map(|c| {
            let similarity = jaro_winkler(&target_lower, &c.to_lowercase());
            (similarity, c)
        })
        .filter(|(score, _)| *score >= MIN_SIMILARITY)
        .collect();

    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

    scored
        .into_iter()
        .take(max_suggestions)
        .map(|(_, name)| name.clone())
        .collect()
}

impl From<arrow::error::ArrowError> for CascadeError {
    fn from(err: arrow::error::ArrowError) -> Self {
        Self::Arrow {
            message: err.to_string(),
        }
    }
}

/// Result type alias for cascade operations.
pub type Result<T> = std::result::Result<T, CascadeError>;
