//! Per-(document, stage) state machine.
//!
//! ```text
//! Pending ──▶ InProgress ──▶ Done
//!                  │
//!                  └──────▶ Failed
//! ```
//!
//! On start-up the manifest is *derived* from the artifact store: a stage
//! whose artifact exists is `Done`, everything else is `Pending`. Nothing is
//! trusted from a previous run's `manifest.json`; that file is written after
//! every transition purely as a human-readable record.

use crate::error::StoreError;
use crate::store::{write_json, ArtifactKey, ArtifactStore};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

/// Per-document pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Text,
    Clean,
    Chunk,
    Insights,
    Sentiment,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Text,
        Stage::Clean,
        Stage::Chunk,
        Stage::Insights,
        Stage::Sentiment,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Text => "text",
            Stage::Clean => "clean",
            Stage::Chunk => "chunk",
            Stage::Insights => "insights",
            Stage::Sentiment => "sentiment",
        }
    }

    pub fn prerequisite(self) -> Option<Stage> {
        match self {
            Stage::Text => None,
            Stage::Clean => Some(Stage::Text),
            Stage::Chunk => Some(Stage::Clean),
            Stage::Insights => Some(Stage::Chunk),
            Stage::Sentiment => Some(Stage::Insights),
        }
    }

    /// The artifact whose presence marks this stage `Done` for `company`.
    pub fn artifact(self, company: &str) -> ArtifactKey {
        let company = company.to_string();
        match self {
            Stage::Text => ArtifactKey::RawText(company),
            Stage::Clean => ArtifactKey::CleanText(company),
            Stage::Chunk => ArtifactKey::Chunks(company),
            Stage::Insights => ArtifactKey::Insights(company),
            Stage::Sentiment => ArtifactKey::Sentiment(company),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                format!("unknown stage '{s}' (expected text, clean, chunk, insights or sentiment)")
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    #[default]
    Pending,
    InProgress,
    Done,
    Failed,
}

/// Status of every stage of every document in the run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    documents: BTreeMap<String, BTreeMap<Stage, StageStatus>>,
}

impl Manifest {
    /// Rebuild the manifest from which artifacts exist in `store`.
    pub fn derive(store: &dyn ArtifactStore, companies: &[String]) -> Result<Self, StoreError> {
        let mut manifest = Manifest::default();
        for company in companies {
            let stages = manifest.documents.entry(company.clone()).or_default();
            for stage in Stage::ALL {
                let status = if store.exists(&stage.artifact(company))? {
                    StageStatus::Done
                } else {
                    StageStatus::Pending
                };
                stages.insert(stage, status);
            }
        }
        Ok(manifest)
    }

    pub fn status(&self, company: &str, stage: Stage) -> StageStatus {
        self.documents
            .get(company)
            .and_then(|s| s.get(&stage))
            .copied()
            .unwrap_or_default()
    }

    pub fn set(&mut self, company: &str, stage: Stage, status: StageStatus) {
        debug!(company, %stage, ?status, "stage transition");
        self.documents
            .entry(company.to_string())
            .or_default()
            .insert(stage, status);
    }

    /// Whether `stage` may run for `company`.
    ///
    /// The nearest *enabled* upstream stage must be `Done`, except that a
    /// `Failed` Insights stage still feeds Sentiment: extraction failures are
    /// partial and whatever was extracted moves on.
    pub fn can_run(&self, company: &str, stage: Stage, is_enabled: impl Fn(Stage) -> bool) -> bool {
        let mut prereq = stage.prerequisite();
        while let Some(p) = prereq {
            if is_enabled(p) || self.status(company, p) != StageStatus::Pending {
                return match self.status(company, p) {
                    StageStatus::Done => true,
                    StageStatus::Failed => p == Stage::Insights,
                    StageStatus::Pending | StageStatus::InProgress => false,
                };
            }
            prereq = p.prerequisite();
        }
        true
    }

    pub fn companies(&self) -> impl Iterator<Item = &str> {
        self.documents.keys().map(String::as_str)
    }

    /// Number of documents whose `stage` is in `status`.
    pub fn count(&self, stage: Stage, status: StageStatus) -> usize {
        self.documents
            .values()
            .filter(|s| s.get(&stage).copied().unwrap_or_default() == status)
            .count()
    }

    pub fn persist(&self, store: &dyn ArtifactStore) -> Result<(), StoreError> {
        write_json(store, &ArtifactKey::Manifest, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryArtifactStore;

    fn all_enabled(_: Stage) -> bool {
        true
    }

    #[test]
    fn stage_names_parse() {
        assert_eq!("Insights".parse::<Stage>(), Ok(Stage::Insights));
        assert_eq!(" text ".parse::<Stage>(), Ok(Stage::Text));
        assert!("reconcile".parse::<Stage>().is_err());
    }

    #[test]
    fn derive_marks_existing_artifacts_done() {
        let store = MemoryArtifactStore::new();
        store
            .write(&ArtifactKey::RawText("A".into()), "text")
            .unwrap();
        store
            .write(&ArtifactKey::Insights("A".into()), "{}")
            .unwrap();

        let m = Manifest::derive(&store, &["A".to_string(), "B".to_string()]).unwrap();
        assert_eq!(m.status("A", Stage::Text), StageStatus::Done);
        assert_eq!(m.status("A", Stage::Clean), StageStatus::Pending);
        assert_eq!(m.status("A", Stage::Insights), StageStatus::Done);
        assert_eq!(m.status("B", Stage::Text), StageStatus::Pending);
        assert_eq!(m.count(Stage::Text, StageStatus::Done), 1);
        assert_eq!(m.companies().collect::<Vec<_>>(), vec!["A", "B"]);
    }

    #[test]
    fn stage_waits_for_prerequisite() {
        let mut m = Manifest::default();
        assert!(m.can_run("A", Stage::Text, all_enabled));
        assert!(!m.can_run("A", Stage::Clean, all_enabled));

        m.set("A", Stage::Text, StageStatus::InProgress);
        assert!(!m.can_run("A", Stage::Clean, all_enabled));

        m.set("A", Stage::Text, StageStatus::Done);
        assert!(m.can_run("A", Stage::Clean, all_enabled));
    }

    #[test]
    fn failed_text_blocks_downstream() {
        let mut m = Manifest::default();
        m.set("A", Stage::Text, StageStatus::Failed);
        assert!(!m.can_run("A", Stage::Clean, all_enabled));
    }

    #[test]
    fn failed_insights_still_feeds_sentiment() {
        let mut m = Manifest::default();
        m.set("A", Stage::Insights, StageStatus::Failed);
        assert!(m.can_run("A", Stage::Sentiment, all_enabled));
    }

    #[test]
    fn disabled_prerequisite_is_looked_through() {
        let mut m = Manifest::default();
        m.set("A", Stage::Text, StageStatus::Done);
        let clean_disabled = |s: Stage| s != Stage::Clean;
        assert!(m.can_run("A", Stage::Chunk, clean_disabled));
        assert!(!m.can_run("A", Stage::Chunk, all_enabled));
    }

    #[test]
    fn persisted_manifest_is_readable_json() {
        let store = MemoryArtifactStore::new();
        let mut m = Manifest::default();
        m.set("ACME", Stage::Chunk, StageStatus::Done);
        m.persist(&store).unwrap();

        let raw = store.read(&ArtifactKey::Manifest).unwrap().unwrap();
        assert!(raw.contains("\"chunk\": \"done\""), "got: {raw}");
        let back: Manifest = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, m);
    }
}
