//! Progress-callback trait for per-document and per-chunk run events.
//!
//! Hand an [`Arc<dyn PipelineProgressCallback>`] to
//! [`crate::orchestrator::Orchestrator::with_progress`] to observe a run as
//! it happens. The CLI drives an `indicatif` bar from it; a service could
//! forward the events to a channel or a job table instead.
//!
//! # Example
//!
//! ```rust
//! use finsight::PipelineProgressCallback;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! struct ChunkCounter(AtomicUsize);
//!
//! impl PipelineProgressCallback for ChunkCounter {
//!     fn on_chunk_complete(&self, company: &str, chunk: usize, total_chunks: usize) {
//!         let done = self.0.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("{company}: chunk {}/{} ({done} overall)", chunk + 1, total_chunks);
//!     }
//! }
//! ```

use crate::manifest::{Stage, StageStatus};
use std::sync::Arc;

/// Called by the orchestrator as it works through the batch.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Events arrive from a single task, in order.
pub trait PipelineProgressCallback: Send + Sync {
    /// Called once after discovery.
    ///
    /// # Arguments
    /// * `total_documents`: number of reports in the input directory
    fn on_run_start(&self, total_documents: usize) {
        let _ = total_documents;
    }

    /// Called before the first stage of a document.
    ///
    /// # Arguments
    /// * `company`: company identifier
    /// * `index`: 0-based position in the batch
    /// * `total`: number of documents in the batch
    fn on_document_start(&self, company: &str, index: usize, total: usize) {
        let _ = (company, index, total);
    }

    /// Called after every stage of a document settles, including stages
    /// satisfied by an existing artifact.
    fn on_stage_complete(&self, company: &str, stage: Stage, status: StageStatus) {
        let _ = (company, stage, status);
    }

    /// Called when a chunk's statements are available, fresh or cached.
    ///
    /// # Arguments
    /// * `chunk`: 0-based chunk index
    /// * `total_chunks`: number of chunks of the document
    fn on_chunk_complete(&self, company: &str, chunk: usize, total_chunks: usize) {
        let _ = (company, chunk, total_chunks);
    }

    /// Called when a chunk fails after every attempt.
    fn on_chunk_error(&self, company: &str, chunk: usize, total_chunks: usize, error: &str) {
        let _ = (company, chunk, total_chunks, error);
    }

    /// Called after the last stage of a document.
    fn on_document_complete(&self, company: &str, statements: usize) {
        let _ = (company, statements);
    }

    /// Called once after the dataset has been written.
    ///
    /// # Arguments
    /// * `documents`: documents in the batch
    /// * `rows`: rows written to the dataset
    fn on_run_complete(&self, documents: usize, rows: usize) {
        let _ = (documents, rows);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl PipelineProgressCallback for NoopProgressCallback {}

/// Shared callback handle as stored by the orchestrator.
pub type ProgressCallback = Arc<dyn PipelineProgressCallback>;
