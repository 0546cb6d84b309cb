//! Error types for querytrend-core.

/// Result type for querytrend-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while turning an uploaded file into an analyzed batch.
///
/// Per-row problems never surface here: malformed rows are dropped and
/// counted in [`NormalizedBatch::rows_dropped`](crate::NormalizedBatch).
/// Every variant aborts the whole upload.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// None of the source columns map to one or more required fields.
    #[error(
        "Missing required columns: {} (available columns: {})",
        .missing.join(", "),
        .available.join(", ")
    )]
    MissingColumns {
        missing: Vec<&'static str>,
        available: Vec<String>,
    },

    /// The upload contained no usable rows after normalization.
    #[error("No usable rows found in upload")]
    EmptyBatch,

    /// The file type is not one we can decode.
    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    /// Structurally invalid input (e.g. a JSON upload that is not an array of objects).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// CSV decoding error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error while reading a source file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
