//! Run results: per-document outcome and batch statistics.
//!
//! A [`RunReport`] is returned from
//! [`crate::orchestrator::Orchestrator::run`] whenever the run itself
//! succeeded, even if individual documents or chunks failed. Those
//! failures are listed per document so callers can tell a clean row from
//! a degraded one.

use crate::error::StageError;
use crate::manifest::{Stage, StageStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Outcome of one document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentReport {
    pub company: String,
    /// Final status of every stage.
    pub stages: BTreeMap<Stage, StageStatus>,
    /// Stages satisfied by an existing artifact instead of running.
    pub reused: Vec<Stage>,
    pub chunks: usize,
    pub failed_chunks: Vec<usize>,
    /// Statements handed to reconciliation.
    pub statements: usize,
    /// Scores replaced by the Neutral / 0.0 sentinel.
    pub defaulted_sentiments: usize,
    pub input_tokens: usize,
    pub output_tokens: usize,
    /// Non-fatal errors, in the order they happened.
    pub errors: Vec<StageError>,
}

impl DocumentReport {
    pub fn new(company: impl Into<String>) -> Self {
        Self {
            company: company.into(),
            ..Default::default()
        }
    }

    /// The text stage failed; nothing downstream ran.
    pub fn is_skipped(&self) -> bool {
        self.stages.get(&Stage::Text) == Some(&StageStatus::Failed)
    }

    /// Anything short of a clean pass.
    pub fn is_degraded(&self) -> bool {
        !self.errors.is_empty() || self.defaulted_sentiments > 0
    }
}

/// Aggregate statistics of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    pub documents: usize,
    pub skipped_documents: usize,
    pub total_chunks: usize,
    pub failed_chunks: usize,
    pub rows: usize,
    /// Rows whose sentiment is the sentinel (scoring failure, disabled
    /// sentiment stage or reconciliation gap).
    pub defaulted_rows: usize,
    pub total_input_tokens: usize,
    pub total_output_tokens: usize,
    pub duration_ms: u64,
}

/// Everything a caller learns from a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub documents: Vec<DocumentReport>,
    pub stats: RunStats,
    /// Where the dataset was written.
    pub output_file: PathBuf,
}

impl RunReport {
    pub fn document(&self, company: &str) -> Option<&DocumentReport> {
        self.documents.iter().find(|d| d.company == company)
    }

    /// Recompute document-derived totals. Row counts and duration are set
    /// by the caller.
    pub fn tally(&mut self) {
        let s = &mut self.stats;
        s.documents = self.documents.len();
        s.skipped_documents = self.documents.iter().filter(|d| d.is_skipped()).count();
        s.total_chunks = self.documents.iter().map(|d| d.chunks).sum();
        s.failed_chunks = self.documents.iter().map(|d| d.failed_chunks.len()).sum();
        s.total_input_tokens = self.documents.iter().map(|d| d.input_tokens).sum();
        s.total_output_tokens = self.documents.iter().map(|d| d.output_tokens).sum();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tally_sums_documents() {
        let mut a = DocumentReport::new("A");
        a.chunks = 3;
        a.failed_chunks = vec![1];
        a.input_tokens = 100;
        let mut b = DocumentReport::new("B");
        b.stages.insert(Stage::Text, StageStatus::Failed);

        let mut report = RunReport {
            documents: vec![a, b],
            ..Default::default()
        };
        report.tally();
        assert_eq!(report.stats.documents, 2);
        assert_eq!(report.stats.skipped_documents, 1);
        assert_eq!(report.stats.total_chunks, 3);
        assert_eq!(report.stats.failed_chunks, 1);
        assert_eq!(report.stats.total_input_tokens, 100);
        assert!(report.document("B").unwrap().is_skipped());
    }

    #[test]
    fn degraded_when_errors_or_defaults() {
        let mut d = DocumentReport::new("A");
        assert!(!d.is_degraded());
        d.defaulted_sentiments = 1;
        assert!(d.is_degraded());
    }

    #[test]
    fn report_serialises() {
        let mut d = DocumentReport::new("A");
        d.stages.insert(Stage::Insights, StageStatus::Failed);
        d.errors.push(StageError::LlmCall {
            chunk: 2,
            detail: "timeout".into(),
        });
        let json = serde_json::to_string(&d).unwrap();
        assert!(json.contains("\"insights\":\"failed\""), "got: {json}");
    }
}
