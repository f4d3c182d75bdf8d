//! Configuration types for an annual-report analysis run.
//!
//! All pipeline behaviour is controlled through [`PipelineConfig`], built via
//! its [`PipelineConfigBuilder`]. The config is an immutable value handed to
//! [`crate::orchestrator::Orchestrator`] at construction; inner components
//! only ever receive the individual values they need, never the whole struct
//! as ambient state.

use crate::error::PipelineError;
use crate::manifest::Stage;
use crate::retry::Backoff;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for one batch run.
///
/// # Example
/// ```rust
/// use finsight::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .input_dir("data/raw_pdfs")
///     .work_dir("data")
///     .chunk_size(8_000)
///     .chunk_overlap(400)
///     .max_attempts(4)
///     .build()
///     .unwrap();
/// assert_eq!(config.chunk_size, 8_000);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Chunk length in characters. Default: 12 000.
    ///
    /// Large enough that a chunk usually holds a whole section of the report,
    /// small enough that prompt plus answer stay far below the context window
    /// of cheap models.
    pub chunk_size: usize,

    /// Characters shared by consecutive chunks. Default: 500.
    ///
    /// Must be strictly smaller than `chunk_size`. A sentence cut at a chunk
    /// boundary appears whole in at least one of the two chunks.
    pub chunk_overlap: usize,

    /// LLM model identifier, e.g. "gpt-4o-mini". If None, uses provider default.
    pub model: Option<String>,

    /// Models tried in order, on the same provider, when `model` still fails
    /// a chunk after `max_attempts` calls. Default: none.
    pub fallback_models: Vec<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    /// If None, the provider is auto-detected from the environment.
    pub provider_name: Option<String>,

    /// Sampling temperature for extraction. Default: 0.0.
    pub temperature: f32,

    /// Maximum tokens the LLM may generate per chunk. Default: 2048.
    pub max_tokens: usize,

    /// Total LLM calls allowed per chunk, first try included. Default: 3.
    pub max_attempts: u32,

    /// Delay schedule between attempts. Default: exponential 1 s → 30 s cap.
    pub backoff: Backoff,

    /// Custom extraction system prompt. If None, uses the built-in one.
    pub system_prompt: Option<String>,

    /// User password for encrypted reports.
    pub pdf_password: Option<String>,

    /// Sentiment model identifier. Default: "ProsusAI/finbert".
    pub sentiment_model: String,

    /// Base URL of a text-classification endpoint serving `sentiment_model`.
    /// If None, the offline lexicon classifier is used.
    pub sentiment_endpoint: Option<String>,

    /// Per-request timeout of the HTTP classifier, in seconds. Default: 30.
    pub sentiment_timeout_secs: u64,

    /// Statements longer than this many characters are truncated before
    /// classification. Default: 2000 (comfortably past FinBERT's 512 tokens).
    pub max_statement_chars: usize,

    /// Per-stage enable / skip-if-exists policies.
    pub stages: StagePolicies,

    /// Recompute every enabled stage even when its artifact exists.
    pub force: bool,

    /// Drop repeated statements (same company, category and normalised
    /// text) before reconciliation. Default: true.
    pub dedupe_statements: bool,

    /// Directory of input PDFs, one per company report.
    pub input_dir: PathBuf,

    /// Root directory of the intermediate artifacts.
    pub work_dir: PathBuf,

    /// Final CSV dataset.
    pub output_file: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_size: 12_000,
            chunk_overlap: 500,
            model: None,
            fallback_models: Vec::new(),
            provider_name: None,
            temperature: 0.0,
            max_tokens: 2048,
            max_attempts: 3,
            backoff: Backoff::default(),
            system_prompt: None,
            pdf_password: None,
            sentiment_model: "ProsusAI/finbert".to_string(),
            sentiment_endpoint: None,
            sentiment_timeout_secs: 30,
            max_statement_chars: 2000,
            stages: StagePolicies::default(),
            force: false,
            dedupe_statements: true,
            input_dir: PathBuf::from("data/raw_pdfs"),
            work_dir: PathBuf::from("data"),
            output_file: PathBuf::from("data/unified_financial_insights.csv"),
        }
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// Whether `stage` may reuse an artifact already present in the store.
    pub fn may_skip(&self, stage: Stage) -> bool {
        !self.force && self.stages.get(stage).skip_if_exists
    }

    /// Whether `stage` is allowed to run at all.
    pub fn is_enabled(&self, stage: Stage) -> bool {
        self.stages.get(stage).enabled
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn chunk_size(mut self, n: usize) -> Self {
        self.config.chunk_size = n;
        self
    }

    pub fn chunk_overlap(mut self, n: usize) -> Self {
        self.config.chunk_overlap = n;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    /// Append a fallback model; repeated calls keep their order.
    pub fn fallback_model(mut self, model: impl Into<String>) -> Self {
        self.config.fallback_models.push(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.max_attempts = n;
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.config.backoff = backoff;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn pdf_password(mut self, password: impl Into<String>) -> Self {
        self.config.pdf_password = Some(password.into());
        self
    }

    pub fn sentiment_model(mut self, model: impl Into<String>) -> Self {
        self.config.sentiment_model = model.into();
        self
    }

    pub fn sentiment_endpoint(mut self, url: impl Into<String>) -> Self {
        self.config.sentiment_endpoint = Some(url.into());
        self
    }

    pub fn sentiment_timeout_secs(mut self, secs: u64) -> Self {
        self.config.sentiment_timeout_secs = secs;
        self
    }

    pub fn max_statement_chars(mut self, n: usize) -> Self {
        self.config.max_statement_chars = n;
        self
    }

    /// Replace the policy of a single stage.
    pub fn stage(mut self, stage: Stage, policy: StagePolicy) -> Self {
        *self.config.stages.get_mut(stage) = policy;
        self
    }

    pub fn force(mut self, v: bool) -> Self {
        self.config.force = v;
        self
    }

    pub fn dedupe_statements(mut self, v: bool) -> Self {
        self.config.dedupe_statements = v;
        self
    }

    pub fn input_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.input_dir = dir.into();
        self
    }

    /// Set the work directory. The output file follows it unless it was set
    /// explicitly afterwards.
    pub fn work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        self.config.output_file = dir.join("unified_financial_insights.csv");
        self.config.work_dir = dir;
        self
    }

    pub fn output_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.output_file = path.into();
        self
    }

    /// Build the configuration, validating constraints.
    ///
    /// Invalid chunk parameters are reported as
    /// [`PipelineError::ChunkConfig`] so the run fails before any document
    /// is touched.
    pub fn build(self) -> Result<PipelineConfig, PipelineError> {
        let c = &self.config;
        if c.chunk_size == 0 || c.chunk_overlap >= c.chunk_size {
            return Err(PipelineError::ChunkConfig {
                size: c.chunk_size,
                overlap: c.chunk_overlap,
            });
        }
        if c.max_attempts == 0 {
            return Err(PipelineError::InvalidConfig(
                "max_attempts must be ≥ 1".into(),
            ));
        }
        if c.max_statement_chars == 0 {
            return Err(PipelineError::InvalidConfig(
                "max_statement_chars must be ≥ 1".into(),
            ));
        }
        if c.sentiment_timeout_secs == 0 {
            return Err(PipelineError::InvalidConfig(
                "sentiment_timeout_secs must be ≥ 1".into(),
            ));
        }
        if c.fallback_models.iter().any(|m| m.trim().is_empty()) {
            return Err(PipelineError::InvalidConfig(
                "fallback model names must not be empty".into(),
            ));
        }
        for (name, path) in [
            ("input_dir", &c.input_dir),
            ("work_dir", &c.work_dir),
            ("output_file", &c.output_file),
        ] {
            if path.as_os_str().is_empty() {
                return Err(PipelineError::InvalidConfig(format!(
                    "{name} must not be empty"
                )));
            }
        }
        Ok(self.config)
    }
}

// ── Stage policies ───────────────────────────────────────────────────────

/// Whether a stage runs, and whether it may reuse a persisted artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagePolicy {
    pub enabled: bool,
    pub skip_if_exists: bool,
}

impl Default for StagePolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            skip_if_exists: true,
        }
    }
}

impl StagePolicy {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            skip_if_exists: true,
        }
    }

    pub fn always_run() -> Self {
        Self {
            enabled: true,
            skip_if_exists: false,
        }
    }
}

/// One [`StagePolicy`] per [`Stage`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagePolicies {
    pub text: StagePolicy,
    pub clean: StagePolicy,
    pub chunk: StagePolicy,
    pub insights: StagePolicy,
    pub sentiment: StagePolicy,
}

impl StagePolicies {
    pub fn get(&self, stage: Stage) -> StagePolicy {
        match stage {
            Stage::Text => self.text,
            Stage::Clean => self.clean,
            Stage::Chunk => self.chunk,
            Stage::Insights => self.insights,
            Stage::Sentiment => self.sentiment,
        }
    }

    pub fn get_mut(&mut self, stage: Stage) -> &mut StagePolicy {
        match stage {
            Stage::Text => &mut self.text,
            Stage::Clean => &mut self.clean,
            Stage::Chunk => &mut self.chunk,
            Stage::Insights => &mut self.insights,
            Stage::Sentiment => &mut self.sentiment,
        }
    }
}
