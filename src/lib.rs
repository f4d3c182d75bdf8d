//! # finsight
//!
//! Turn a directory of company annual reports (PDF) into one tabular
//! dataset of categorised, sentiment-scored statements.
//!
//! ## Why this crate?
//!
//! Annual reports bury the handful of statements an analyst cares about
//! (what went well, what went badly, what management expects, what could go
//! wrong) in hundreds of pages. This crate has an LLM pull those statements
//! out chunk by chunk, scores each one with a financial sentiment
//! classifier, and joins everything into a single CSV. Every intermediate
//! result is persisted, so an interrupted batch resumes where it stopped
//! without paying for the same LLM calls twice.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDFs
//!  │
//!  ├─ 1. Text       page text via pdfium (spawn_blocking)
//!  ├─ 2. Clean      strip headers, page numbers, broken line joins
//!  ├─ 3. Chunk      overlapping fixed-size character windows
//!  ├─ 4. Insights   LLM → positive / negative / guidance / risk, with retry
//!  ├─ 5. Sentiment  Positive / Negative / Neutral + confidence
//!  └─ 6. Reconcile  join → Company,Statement,Category,Sentiment,Confidence
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use finsight::{Orchestrator, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / ...
//!     let config = PipelineConfig::builder()
//!         .input_dir("data/raw_pdfs")
//!         .work_dir("data")
//!         .build()?;
//!     let report = Orchestrator::from_config(config)?.run().await?;
//!     eprintln!(
//!         "{} rows from {} reports ({} chunks failed)",
//!         report.stats.rows, report.stats.documents, report.stats.failed_chunks
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `finsight` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! finsight = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod dataset;
pub mod error;
pub mod manifest;
pub mod model;
pub mod orchestrator;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod retry;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{PipelineConfig, PipelineConfigBuilder, StagePolicies, StagePolicy};
pub use error::{PipelineError, StageError, StoreError};
pub use manifest::{Manifest, Stage, StageStatus};
pub use model::{
    Category, Chunk, Document, ExtractedStatement, ScoredStatement, SentimentLabel, UnifiedRecord,
};
pub use orchestrator::{Connector, Orchestrator};
pub use output::{DocumentReport, RunReport, RunStats};
pub use pipeline::extract::{ChunkInsights, DocumentInsights, InsightExtractor};
pub use pipeline::llm::{ClientChain, Completion, CompletionClient, ProviderClient};
pub use pipeline::sentiment::{
    HttpClassifier, LexiconClassifier, SentimentModel, SentimentScorer,
};
pub use pipeline::text::{PdfiumTextExtractor, TextExtractor};
pub use progress::{NoopProgressCallback, PipelineProgressCallback, ProgressCallback};
pub use retry::{attempt, Backoff, Exhausted};
pub use store::{ArtifactKey, ArtifactStore, FsArtifactStore, MemoryArtifactStore};
