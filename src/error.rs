//! Error types for the finsight library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`PipelineError`]: **Fatal**: the run cannot start or cannot finish
//!   (invalid chunk parameters, missing input directory, no LLM provider,
//!   the artifact store refuses writes). Returned as `Err(PipelineError)`
//!   from [`crate::orchestrator::Orchestrator::run`].
//!
//! * [`StageError`]: **Non-fatal**: one document or one chunk failed
//!   (unreadable PDF, LLM gave up after every attempt, unparsable response,
//!   classifier error). Stored inside [`crate::output::DocumentReport`] so the
//!   batch keeps going and callers can inspect exactly what was degraded.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the finsight library.
///
/// Document- and chunk-level failures use [`StageError`] and are recorded
/// in the run report rather than propagated here.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── Config errors ─────────────────────────────────────────────────────
    /// Chunk size / overlap combination is unusable.
    #[error("Invalid chunk configuration: size={size}, overlap={overlap}\nOverlap must be smaller than size and size must be > 0.")]
    ChunkConfig { size: usize, overlap: usize },

    /// Builder validation failed for any other field.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The input directory does not exist or is not a directory.
    #[error("Input directory not found: '{path}'")]
    InputDirNotFound { path: PathBuf },

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// An intermediate artifact could not be read or written.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Could not create or write the final dataset.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single document, chunk or statement.
///
/// The variants map one-to-one onto the failure taxonomy of the pipeline:
/// unreadable source, failed LLM call, unparsable LLM response and failed
/// sentiment classification.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
pub enum StageError {
    /// Source file unreadable or corrupt; the document is skipped.
    #[error("{company}: text extraction failed for '{path}': {detail}")]
    ExtractionIo {
        company: String,
        path: PathBuf,
        detail: String,
    },

    /// Transport-level LLM failure (network, rate limit, provider error).
    #[error("chunk {chunk}: LLM call failed: {detail}")]
    LlmCall { chunk: usize, detail: String },

    /// The LLM answered but the body does not match the insight schema.
    #[error("chunk {chunk}: response does not match schema: {detail}")]
    Parse { chunk: usize, detail: String },

    /// The sentiment classifier could not score a statement.
    #[error("scoring failed: {detail}")]
    Scoring { detail: String },
}

impl StageError {
    /// Whether a retry may help. LLM call and parse failures are transient
    /// from the pipeline's point of view; everything else is not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StageError::LlmCall { .. } | StageError::Parse { .. })
    }
}

/// Errors raised by an [`crate::store::ArtifactStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("artifact I/O failed for '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("artifact '{key}' is not valid JSON: {source}")]
    Json {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}
