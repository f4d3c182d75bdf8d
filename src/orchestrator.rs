//! Batch orchestration: discovery, per-document stages, reconciliation.
//!
//! ## Stage Decisions
//!
//! For every document the stages run in order
//! `Text → Clean → Chunk → Insights → Sentiment`. Each stage is either
//!
//! * **reused**: its artifact exists and its policy allows skipping (or
//!   the stage is disabled but an earlier run left an artifact);
//! * **run**: it is enabled and the manifest says its prerequisite is
//!   satisfied;
//! * **skipped**: neither; downstream stages see no input from it.
//!
//! Once a stage has run in this invocation, downstream artifacts of the
//! same document are stale and are recomputed rather than reused.
//!
//! A document whose Insights artifact records failed chunks is extracted
//! again on the next run. Cached chunk responses are reused, so only the
//! failed chunks reach the LLM.
//!
//! An artifact that exists but cannot be read or decoded (truncated write,
//! hand edit) counts as missing: the stage is planned again for that
//! document only.
//!
//! The LLM provider is resolved the first time a chunk needs it, so a run
//! that reuses every Insights artifact needs no credentials.
//!
//! Documents are processed one at a time, in sorted filename order.

use crate::config::PipelineConfig;
use crate::dataset::write_csv;
use crate::error::PipelineError;
use crate::manifest::{Manifest, Stage, StageStatus};
use crate::model::{Chunk, Document, ExtractedStatement, ScoredStatement, UnifiedRecord};
use crate::output::{DocumentReport, RunReport};
use crate::pipeline::chunk::chunk;
use crate::pipeline::clean::clean_text;
use crate::pipeline::extract::{DocumentInsights, InsightExtractor};
use crate::pipeline::input::{discover, SourceFile};
use crate::pipeline::llm::{ClientChain, CompletionClient, ProviderClient};
use crate::pipeline::reconcile::{combine, dedup_statements};
use crate::pipeline::sentiment::{
    DocumentSentiment, HttpClassifier, LexiconClassifier, SentimentModel, SentimentScorer,
};
use crate::pipeline::text::{PdfiumTextExtractor, TextExtractor};
use crate::progress::{NoopProgressCallback, ProgressCallback};
use crate::store::{read_json, write_json, ArtifactStore, FsArtifactStore};
use once_cell::sync::OnceCell;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// What to do with one stage of one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Plan {
    Reuse,
    Run,
    Skip,
}

/// Per-document result handed to reconciliation.
struct DocumentOutcome {
    report: DocumentReport,
    statements: Vec<ExtractedStatement>,
    scores: Vec<ScoredStatement>,
}

/// Builds the LLM client chain, primary first. Called when the first chunk
/// needs the LLM; a chain it returns is kept for the orchestrator's lifetime.
pub type Connector = Box<dyn Fn() -> Result<ClientChain, PipelineError> + Send + Sync>;

/// Runs the whole batch.
///
/// All collaborators are injected; [`Orchestrator::from_config`] wires the
/// production ones (pdfium, the configured LLM provider, the configured
/// classifier, artifacts under the work directory).
pub struct Orchestrator {
    config: PipelineConfig,
    text_extractor: Arc<dyn TextExtractor>,
    connect: Connector,
    extractor: OnceCell<InsightExtractor>,
    scorer: SentimentScorer,
    store: Arc<dyn ArtifactStore>,
    progress: ProgressCallback,
}

impl Orchestrator {
    pub fn new(
        config: PipelineConfig,
        text_extractor: Arc<dyn TextExtractor>,
        client: Arc<dyn CompletionClient>,
        sentiment_model: Arc<dyn SentimentModel>,
        store: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self::connecting(
            config,
            text_extractor,
            Box::new(move || Ok(vec![Arc::clone(&client)])),
            sentiment_model,
            store,
        )
    }

    /// Like [`Orchestrator::new`], with the LLM clients built on demand.
    pub fn connecting(
        config: PipelineConfig,
        text_extractor: Arc<dyn TextExtractor>,
        connect: Connector,
        sentiment_model: Arc<dyn SentimentModel>,
        store: Arc<dyn ArtifactStore>,
    ) -> Self {
        let scorer = SentimentScorer::new(sentiment_model, config.max_statement_chars);
        Self {
            config,
            text_extractor,
            connect,
            extractor: OnceCell::new(),
            scorer,
            store,
            progress: Arc::new(NoopProgressCallback),
        }
    }

    /// Production wiring. The LLM provider (and one client per fallback
    /// model) is resolved on first use.
    ///
    /// # Errors
    /// Only when the HTTP sentiment client cannot be set up. A missing LLM
    /// provider surfaces from [`Orchestrator::run`] as
    /// [`PipelineError::ProviderNotConfigured`], and only if a chunk has to
    /// be sent to the LLM.
    pub fn from_config(config: PipelineConfig) -> Result<Self, PipelineError> {
        let model = sentiment_model(&config)?;
        let store = Arc::new(FsArtifactStore::new(config.work_dir.clone()));
        let text_extractor = match config.pdf_password {
            Some(ref password) => PdfiumTextExtractor::with_password(password.clone()),
            None => PdfiumTextExtractor::new(),
        };
        let provider_config = config.clone();
        Ok(Self::connecting(
            config,
            Arc::new(text_extractor),
            Box::new(move || ProviderClient::chain_from_config(&provider_config)),
            model,
            store,
        ))
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = progress;
        self
    }

    /// The insight extractor, connecting to the LLM on first call.
    fn extractor(&self) -> Result<&InsightExtractor, PipelineError> {
        self.extractor.get_or_try_init(|| {
            let chain = (self.connect)()?;
            info!(models = chain.len(), "LLM clients ready");
            InsightExtractor::from_chain(chain, &self.config).ok_or_else(|| {
                PipelineError::ProviderNotConfigured {
                    provider: "none".to_string(),
                    hint: "no completion client was supplied".to_string(),
                }
            })
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Process every report of the input directory and write the dataset.
    ///
    /// # Returns
    /// `Ok(RunReport)` whenever the dataset was written, even if documents
    /// or chunks failed (see [`DocumentReport::errors`]).
    ///
    /// # Errors
    /// Only fatal conditions: missing input directory, artifact store or
    /// dataset write failures, no LLM provider when a chunk needs one.
    /// Damaged artifacts are recomputed, never fatal.
    pub async fn run(&self) -> Result<RunReport, PipelineError> {
        let run_start = Instant::now();

        // ── Step 1: Discover inputs ──────────────────────────────────────
        let files = discover(&self.config.input_dir)?;
        let companies: Vec<String> = files.iter().map(|f| f.company.clone()).collect();
        info!(
            input_dir = %self.config.input_dir.display(),
            documents = files.len(),
            force = self.config.force,
            "starting run"
        );
        if files.is_empty() {
            warn!(input_dir = %self.config.input_dir.display(), "no PDF reports found");
        }

        // ── Step 2: Derive state from existing artifacts ─────────────────
        let mut manifest = Manifest::derive(self.store.as_ref(), &companies)?;
        manifest.persist(self.store.as_ref())?;
        self.progress.on_run_start(files.len());

        // ── Step 3: Per-document stages ──────────────────────────────────
        let mut report = RunReport {
            output_file: self.config.output_file.clone(),
            ..Default::default()
        };
        let mut records: Vec<UnifiedRecord> = Vec::new();

        for (index, file) in files.iter().enumerate() {
            self.progress
                .on_document_start(&file.company, index, files.len());
            let outcome = self.process_document(file, &mut manifest).await?;

            // ── Step 4: Reconcile ────────────────────────────────────────
            records.extend(combine(&outcome.statements, &outcome.scores));
            self.progress
                .on_document_complete(&file.company, outcome.statements.len());
            report.documents.push(outcome.report);
        }

        // ── Step 5: Write dataset ────────────────────────────────────────
        write_csv(&self.config.output_file, &records)?;
        manifest.persist(self.store.as_ref())?;

        report.stats.rows = records.len();
        report.stats.defaulted_rows = records.iter().filter(|r| r.defaulted).count();
        report.tally();
        report.stats.duration_ms = run_start.elapsed().as_millis() as u64;

        info!(
            documents = report.stats.documents,
            skipped = report.stats.skipped_documents,
            failed_chunks = report.stats.failed_chunks,
            rows = report.stats.rows,
            duration_ms = report.stats.duration_ms,
            "run complete"
        );
        self.progress
            .on_run_complete(report.stats.documents, report.stats.rows);

        Ok(report)
    }

    async fn process_document(
        &self,
        file: &SourceFile,
        manifest: &mut Manifest,
    ) -> Result<DocumentOutcome, PipelineError> {
        let company = file.company.as_str();
        let mut report = DocumentReport::new(company);
        let mut dirty = false;

        // ── Text ─────────────────────────────────────────────────────────
        let mut raw: Option<Document> = None;
        let mut plan = self.plan(manifest, company, Stage::Text, dirty)?;
        if plan == Plan::Reuse {
            raw = self.load_text(company, Stage::Text).map(|text| file.document(text));
            plan = self.settle(&mut report, manifest, company, Stage::Text, raw.is_some());
        }
        if plan == Plan::Run {
            dirty = true;
            self.transition(manifest, company, Stage::Text, StageStatus::InProgress)?;
            match self.text_extractor.extract_text(company, &file.path).await {
                Ok(text) => {
                    if text.trim().is_empty() {
                        warn!(company, "no text layer found, document will yield no statements");
                    }
                    self.store.write(&Stage::Text.artifact(company), &text)?;
                    raw = Some(file.document(text));
                    self.transition(manifest, company, Stage::Text, StageStatus::Done)?;
                }
                Err(e) => {
                    warn!(company, error = %e, "text extraction failed, skipping document");
                    report.errors.push(e);
                    self.transition(manifest, company, Stage::Text, StageStatus::Failed)?;
                }
            }
        }

        // ── Clean ────────────────────────────────────────────────────────
        let mut cleaned: Option<String> = None;
        let mut plan = self.plan(manifest, company, Stage::Clean, dirty)?;
        if plan == Plan::Reuse {
            cleaned = self.load_text(company, Stage::Clean);
            plan = self.settle(&mut report, manifest, company, Stage::Clean, cleaned.is_some());
        }
        if plan == Plan::Run {
            if let Some(ref doc) = raw {
                let text = doc.text.as_str();
                dirty = true;
                self.transition(manifest, company, Stage::Clean, StageStatus::InProgress)?;
                let out = clean_text(text, file.company_name());
                debug!(
                    company,
                    before = text.chars().count(),
                    after = out.chars().count(),
                    "text cleaned"
                );
                self.store.write(&Stage::Clean.artifact(company), &out)?;
                cleaned = Some(out);
                self.transition(manifest, company, Stage::Clean, StageStatus::Done)?;
            }
        }

        // ── Chunk ────────────────────────────────────────────────────────
        let mut chunks: Option<Vec<Chunk>> = None;
        let mut plan = self.plan(manifest, company, Stage::Chunk, dirty)?;
        if plan == Plan::Reuse {
            chunks = self.load_json(company, Stage::Chunk);
            plan = self.settle(&mut report, manifest, company, Stage::Chunk, chunks.is_some());
        }
        if plan == Plan::Run {
            // A disabled cleaner passes the raw text through.
            let input = match cleaned.as_deref() {
                Some(text) => Some(text),
                None if !self.config.is_enabled(Stage::Clean) => {
                    raw.as_ref().map(|d| d.text.as_str())
                }
                None => None,
            };
            if let Some(text) = input {
                dirty = true;
                self.transition(manifest, company, Stage::Chunk, StageStatus::InProgress)?;
                let list = chunk(
                    company,
                    text,
                    self.config.chunk_size,
                    self.config.chunk_overlap,
                )?;
                if list.is_empty() {
                    warn!(company, "empty text, no chunks produced");
                }
                write_json(self.store.as_ref(), &Stage::Chunk.artifact(company), &list)?;
                chunks = Some(list);
                self.transition(manifest, company, Stage::Chunk, StageStatus::Done)?;
            }
        }
        report.chunks = chunks.as_ref().map_or(0, Vec::len);

        // ── Insights ─────────────────────────────────────────────────────
        let mut insights: Option<DocumentInsights> = None;
        let mut plan = self.plan(manifest, company, Stage::Insights, dirty)?;
        if plan == Plan::Reuse {
            insights = self.load_json(company, Stage::Insights);
            let partial = insights.as_ref().is_some_and(DocumentInsights::is_partial);
            if partial && self.config.is_enabled(Stage::Insights) && chunks.is_some() {
                info!(company, "retrying failed chunks of a previous run");
                plan = Plan::Run;
            } else {
                plan = self.settle(&mut report, manifest, company, Stage::Insights, insights.is_some());
            }
        }
        if plan == Plan::Run {
            if let Some(ref list) = chunks {
                // A missing provider must leave the manifest untouched.
                let extractor = if list.is_empty() {
                    None
                } else {
                    Some(self.extractor()?)
                };
                // Cached chunk responses only match chunks that were not rebuilt.
                let reuse_cached = self.config.may_skip(Stage::Insights) && !dirty;
                dirty = true;
                self.transition(manifest, company, Stage::Insights, StageStatus::InProgress)?;
                let doc = match extractor {
                    None => DocumentInsights::new(company, 0),
                    Some(extractor) => {
                        let (doc, errors) = extractor
                            .extract_document(
                                company,
                                list,
                                self.store.as_ref(),
                                reuse_cached,
                                self.progress.as_ref(),
                            )
                            .await?;
                        report.errors.extend(errors);
                        doc
                    }
                };
                write_json(self.store.as_ref(), &Stage::Insights.artifact(company), &doc)?;
                let status = if doc.is_partial() {
                    warn!(
                        company,
                        failed = doc.failed_chunks.len(),
                        "some chunks failed, continuing with partial statements"
                    );
                    StageStatus::Failed
                } else {
                    StageStatus::Done
                };
                insights = Some(doc);
                self.transition(manifest, company, Stage::Insights, status)?;
            }
        }

        let mut statements = insights
            .as_ref()
            .map(DocumentInsights::to_statements)
            .unwrap_or_default();
        if self.config.dedupe_statements {
            statements = dedup_statements(statements);
        }
        if let Some(ref doc) = insights {
            report.failed_chunks = doc.failed_chunks.clone();
            report.input_tokens = doc.input_tokens;
            report.output_tokens = doc.output_tokens;
            if report.chunks == 0 {
                report.chunks = doc.chunk_count;
            }
        }
        report.statements = statements.len();

        // ── Sentiment ────────────────────────────────────────────────────
        let mut sentiment: Option<DocumentSentiment> = None;
        let mut plan = self.plan(manifest, company, Stage::Sentiment, dirty)?;
        if plan == Plan::Reuse {
            sentiment = self.load_json(company, Stage::Sentiment);
            plan = self.settle(&mut report, manifest, company, Stage::Sentiment, sentiment.is_some());
        }
        match plan {
            Plan::Run if insights.is_some() => {
                self.transition(manifest, company, Stage::Sentiment, StageStatus::InProgress)?;
                let doc = self.scorer.score_document(company, &statements).await;
                write_json(self.store.as_ref(), &Stage::Sentiment.artifact(company), &doc)?;
                sentiment = Some(doc);
                self.transition(manifest, company, Stage::Sentiment, StageStatus::Done)?;
            }
            Plan::Skip if !self.config.is_enabled(Stage::Sentiment) && !statements.is_empty() => {
                info!(company, "sentiment disabled, statements default to Neutral");
            }
            _ => {}
        }

        let scores = sentiment.map(|s| s.scores).unwrap_or_default();
        report.defaulted_sentiments = scores.iter().filter(|s| s.defaulted).count();
        report.stages = Stage::ALL
            .iter()
            .map(|&s| (s, manifest.status(company, s)))
            .collect();

        Ok(DocumentOutcome {
            report,
            statements,
            scores,
        })
    }

    /// Raw contents of a stage artifact. Unreadable counts as missing.
    fn load_text(&self, company: &str, stage: Stage) -> Option<String> {
        match self.store.read(&stage.artifact(company)) {
            Ok(text) => text,
            Err(e) => {
                warn!(company, %stage, error = %e, "unreadable artifact, treating it as missing");
                None
            }
        }
    }

    /// Decoded stage artifact. Unreadable or undecodable counts as missing.
    fn load_json<T: DeserializeOwned>(&self, company: &str, stage: Stage) -> Option<T> {
        match read_json(self.store.as_ref(), &stage.artifact(company)) {
            Ok(value) => value,
            Err(e) => {
                warn!(company, %stage, error = %e, "undecodable artifact, treating it as missing");
                None
            }
        }
    }

    /// Finish a planned reuse: record it when the artifact loaded, otherwise
    /// forget the stage's `Done` state and plan it again.
    fn settle(
        &self,
        report: &mut DocumentReport,
        manifest: &mut Manifest,
        company: &str,
        stage: Stage,
        loaded: bool,
    ) -> Plan {
        if loaded {
            self.reused(report, company, stage);
            return Plan::Reuse;
        }
        manifest.set(company, stage, StageStatus::Pending);
        if self.config.is_enabled(stage)
            && manifest.can_run(company, stage, |s| self.config.is_enabled(s))
        {
            info!(company, %stage, "recomputing stage with a damaged artifact");
            Plan::Run
        } else {
            Plan::Skip
        }
    }

    fn plan(
        &self,
        manifest: &Manifest,
        company: &str,
        stage: Stage,
        upstream_ran: bool,
    ) -> Result<Plan, PipelineError> {
        let exists = self.store.exists(&stage.artifact(company))?;
        if !self.config.is_enabled(stage) {
            return Ok(if exists { Plan::Reuse } else { Plan::Skip });
        }
        if exists && !upstream_ran && self.config.may_skip(stage) {
            return Ok(Plan::Reuse);
        }
        if manifest.can_run(company, stage, |s| self.config.is_enabled(s)) {
            Ok(Plan::Run)
        } else {
            debug!(company, %stage, "prerequisite not satisfied, stage skipped");
            Ok(Plan::Skip)
        }
    }

    fn transition(
        &self,
        manifest: &mut Manifest,
        company: &str,
        stage: Stage,
        status: StageStatus,
    ) -> Result<(), PipelineError> {
        manifest.set(company, stage, status);
        manifest.persist(self.store.as_ref())?;
        if matches!(status, StageStatus::Done | StageStatus::Failed) {
            self.progress.on_stage_complete(company, stage, status);
        }
        Ok(())
    }

    fn reused(&self, report: &mut DocumentReport, company: &str, stage: Stage) {
        debug!(company, %stage, "artifact exists, stage reused");
        report.reused.push(stage);
        self.progress
            .on_stage_complete(company, stage, StageStatus::Done);
    }
}

/// Classifier selected by the configuration: HTTP when an endpoint is set
/// (authenticated with `HF_TOKEN` when present), the lexicon otherwise.
pub fn sentiment_model(config: &PipelineConfig) -> Result<Arc<dyn SentimentModel>, PipelineError> {
    match config.sentiment_endpoint {
        Some(ref endpoint) => {
            let mut classifier = HttpClassifier::new(
                endpoint,
                config.sentiment_model.clone(),
                Duration::from_secs(config.sentiment_timeout_secs),
            )?;
            if let Ok(token) = std::env::var("HF_TOKEN") {
                if !token.is_empty() {
                    classifier = classifier.with_bearer_token(token);
                }
            }
            info!(
                url = classifier.url(),
                model = %config.sentiment_model,
                timeout_secs = config.sentiment_timeout_secs,
                "using HTTP sentiment classifier"
            );
            Ok(Arc::new(classifier))
        }
        None => {
            info!("no sentiment endpoint configured, using the lexicon classifier");
            Ok(Arc::new(LexiconClassifier))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StageError;
    use crate::pipeline::llm::Completion;
    use crate::store::{ArtifactKey, MemoryArtifactStore};
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticText(&'static str);

    #[async_trait]
    impl TextExtractor for StaticText {
        async fn extract_text(&self, _company: &str, _path: &Path) -> Result<String, StageError> {
            Ok(self.0.to_string())
        }
    }

    struct CountingClient(AtomicUsize);

    #[async_trait]
    impl CompletionClient for CountingClient {
        async fn complete(&self, _system: &str, _user: &str) -> Result<Completion, String> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(Completion {
                content: r#"{"positive": ["Strong year."]}"#.into(),
                ..Default::default()
            })
        }
    }

    fn input_dir(names: &[&str]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for name in names {
            std::fs::write(dir.path().join(name), b"%PDF-1.7").unwrap();
        }
        dir
    }

    #[tokio::test]
    async fn disabled_clean_passes_raw_text_through() {
        let input = input_dir(&["ACME_2023.pdf"]);
        let out = tempfile::tempdir().unwrap();
        let config = PipelineConfig::builder()
            .input_dir(input.path())
            .work_dir(out.path())
            .chunk_size(50)
            .chunk_overlap(5)
            .stage(Stage::Clean, crate::config::StagePolicy::disabled())
            .build()
            .unwrap();
        let store = Arc::new(MemoryArtifactStore::new());
        let client = Arc::new(CountingClient(AtomicUsize::new(0)));
        let orch = Orchestrator::new(
            config,
            Arc::new(StaticText("--- Page 1 ---\nRaw   text stays as it is.")),
            client.clone(),
            Arc::new(LexiconClassifier),
            store.clone(),
        );

        let report = orch.run().await.unwrap();
        assert!(!store.exists(&ArtifactKey::CleanText("ACME_2023".into())).unwrap());
        let chunks: Vec<Chunk> = read_json(store.as_ref(), &ArtifactKey::Chunks("ACME_2023".into()))
            .unwrap()
            .unwrap();
        assert!(chunks[0].text.starts_with("--- Page 1 ---"));
        assert_eq!(report.stats.rows, 1);
        assert_eq!(client.0.load(Ordering::SeqCst), chunks.len());
    }

    #[tokio::test]
    async fn manifest_is_persisted() {
        let input = input_dir(&["ACME_2023.pdf"]);
        let out = tempfile::tempdir().unwrap();
        let config = PipelineConfig::builder()
            .input_dir(input.path())
            .work_dir(out.path())
            .build()
            .unwrap();
        let store = Arc::new(MemoryArtifactStore::new());
        let orch = Orchestrator::new(
            config,
            Arc::new(StaticText("Record profit.")),
            Arc::new(CountingClient(AtomicUsize::new(0))),
            Arc::new(LexiconClassifier),
            store.clone(),
        );
        orch.run().await.unwrap();

        let manifest: Manifest = read_json(store.as_ref(), &ArtifactKey::Manifest)
            .unwrap()
            .unwrap();
        for stage in Stage::ALL {
            assert_eq!(manifest.status("ACME_2023", stage), StageStatus::Done, "{stage}");
        }
    }

    #[tokio::test]
    async fn missing_input_dir_is_fatal() {
        let out = tempfile::tempdir().unwrap();
        let config = PipelineConfig::builder()
            .input_dir(out.path().join("nope"))
            .work_dir(out.path())
            .build()
            .unwrap();
        let orch = Orchestrator::new(
            config,
            Arc::new(StaticText("")),
            Arc::new(CountingClient(AtomicUsize::new(0))),
            Arc::new(LexiconClassifier),
            Arc::new(MemoryArtifactStore::new()),
        );
        assert!(matches!(
            orch.run().await,
            Err(PipelineError::InputDirNotFound { .. })
        ));
    }

    #[test]
    fn lexicon_is_the_default_classifier() {
        let config = PipelineConfig::default();
        assert_eq!(sentiment_model(&config).unwrap().name(), "lexicon");
    }
}
