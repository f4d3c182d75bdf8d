//! Insight extraction: chunk → LLM → categorised statements.
//!
//! ## Response Handling
//!
//! Models are told to answer with bare JSON but regularly wrap it in
//! ```` ```json ```` fences anyway, so fences are unwrapped before parsing.
//! The payload must be a JSON object whose category keys, when present,
//! hold lists of strings; `forward_looking` and `risks` are accepted as
//! older spellings of `guidance` and `risk`. Anything else is a
//! [`StageError::Parse`] and is retried like a transport failure.
//!
//! ## Model Fallback
//!
//! When a chunk still fails after `max_attempts` calls, the same chunk is
//! sent to the next client of the chain (usually a stronger model), with a
//! fresh attempt budget. The chunk fails only when every client gave up.
//!
//! ## Crash Recovery
//!
//! Every successful chunk is written to the artifact store as
//! `llm_outputs/<company>/chunk_NNNN.json` before the next chunk starts.
//! A restarted run reads those back instead of calling the LLM again.

use crate::config::PipelineConfig;
use crate::error::StageError;
use crate::model::{Category, Chunk, ExtractedStatement};
use crate::pipeline::llm::{ClientChain, CompletionClient};
use crate::progress::PipelineProgressCallback;
use crate::prompts::{user_prompt, DEFAULT_SYSTEM_PROMPT};
use crate::retry::{attempt, Backoff, Exhausted};
use crate::store::{read_json, write_json, ArtifactKey, ArtifactStore};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Statement texts of one chunk, per category.
pub type CategoryLists = BTreeMap<Category, Vec<String>>;

/// Parsed LLM answer for one chunk; the per-chunk cache entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkInsights {
    pub chunk: usize,
    pub statements: CategoryLists,
    #[serde(default)]
    pub input_tokens: usize,
    #[serde(default)]
    pub output_tokens: usize,
    /// LLM calls it took, first try included.
    #[serde(default)]
    pub attempts: u32,
}

impl ChunkInsights {
    /// Flatten into statements, category by category.
    pub fn to_statements(&self, company: &str) -> Vec<ExtractedStatement> {
        self.statements
            .iter()
            .flat_map(|(category, texts)| {
                texts.iter().map(move |text| ExtractedStatement {
                    company: company.to_string(),
                    chunk: self.chunk,
                    category: *category,
                    text: text.clone(),
                })
            })
            .collect()
    }
}

/// A statement inside [`DocumentInsights`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcedStatement {
    pub chunk: usize,
    pub text: String,
}

/// Everything extracted from one document; the `llm_outputs/<company>.json`
/// artifact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentInsights {
    pub company: String,
    pub chunk_count: usize,
    /// Chunks that failed after every attempt, ascending.
    pub failed_chunks: Vec<usize>,
    pub statements: BTreeMap<Category, Vec<SourcedStatement>>,
    #[serde(default)]
    pub input_tokens: usize,
    #[serde(default)]
    pub output_tokens: usize,
}

impl DocumentInsights {
    pub fn new(company: impl Into<String>, chunk_count: usize) -> Self {
        Self {
            company: company.into(),
            chunk_count,
            ..Default::default()
        }
    }

    /// Append one chunk's result. Chunks must be added in index order.
    pub fn absorb(&mut self, chunk: &ChunkInsights) {
        for (category, texts) in &chunk.statements {
            let bucket = self.statements.entry(*category).or_default();
            bucket.extend(texts.iter().map(|text| SourcedStatement {
                chunk: chunk.chunk,
                text: text.clone(),
            }));
        }
        self.input_tokens += chunk.input_tokens;
        self.output_tokens += chunk.output_tokens;
    }

    pub fn is_partial(&self) -> bool {
        !self.failed_chunks.is_empty()
    }

    pub fn statement_count(&self) -> usize {
        self.statements.values().map(Vec::len).sum()
    }

    /// Flatten into statements: category order, then extraction order.
    pub fn to_statements(&self) -> Vec<ExtractedStatement> {
        self.statements
            .iter()
            .flat_map(|(category, list)| {
                list.iter().map(move |s| ExtractedStatement {
                    company: self.company.clone(),
                    chunk: s.chunk,
                    category: *category,
                    text: s.text.clone(),
                })
            })
            .collect()
    }
}

// ── Parsing ──────────────────────────────────────────────────────────────

static RE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[A-Za-z]*[ \t]*\n?(.*?)\n?```$").unwrap());

/// Remove a Markdown code fence wrapping the whole response.
fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    match RE_FENCE.captures(trimmed).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str().trim(),
        None => trimmed,
    }
}

#[derive(Debug, Deserialize)]
struct InsightPayload {
    #[serde(default)]
    positive: Vec<String>,
    #[serde(default)]
    negative: Vec<String>,
    #[serde(default, alias = "forward_looking")]
    guidance: Vec<String>,
    #[serde(default, alias = "risks")]
    risk: Vec<String>,
}

/// Parse one LLM response into per-category statement lists.
///
/// Statements are trimmed and empty ones dropped; every category is present
/// in the result, possibly empty.
pub fn parse_response(chunk: usize, raw: &str) -> Result<CategoryLists, StageError> {
    let body = strip_fences(raw);
    let value: serde_json::Value = serde_json::from_str(body).map_err(|e| StageError::Parse {
        chunk,
        detail: format!("invalid JSON: {e}"),
    })?;
    if !value.is_object() {
        return Err(StageError::Parse {
            chunk,
            detail: "expected a JSON object".into(),
        });
    }
    let payload: InsightPayload =
        serde_json::from_value(value).map_err(|e| StageError::Parse {
            chunk,
            detail: e.to_string(),
        })?;

    let clean = |list: Vec<String>| -> Vec<String> {
        list.into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    };

    Ok(BTreeMap::from([
        (Category::Positive, clean(payload.positive)),
        (Category::Negative, clean(payload.negative)),
        (Category::Guidance, clean(payload.guidance)),
        (Category::Risk, clean(payload.risk)),
    ]))
}

// ── Extractor ────────────────────────────────────────────────────────────

/// Calls the LLM for each chunk, with bounded retries and model fallback.
pub struct InsightExtractor {
    /// Never empty; the first entry is the primary client.
    clients: ClientChain,
    system_prompt: String,
    max_attempts: u32,
    backoff: Backoff,
}

impl InsightExtractor {
    pub fn new(client: Arc<dyn CompletionClient>, max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            clients: vec![client],
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_attempts,
            backoff,
        }
    }

    pub fn from_config(client: Arc<dyn CompletionClient>, config: &PipelineConfig) -> Self {
        let mut extractor = Self::new(client, config.max_attempts, config.backoff);
        if let Some(ref prompt) = config.system_prompt {
            extractor.system_prompt = prompt.clone();
        }
        extractor
    }

    /// Extractor over a whole chain: the first client is primary, the rest
    /// are fallbacks. `None` for an empty chain.
    pub fn from_chain(chain: ClientChain, config: &PipelineConfig) -> Option<Self> {
        let mut clients = chain.into_iter();
        let primary = clients.next()?;
        Some(clients.fold(Self::from_config(primary, config), Self::with_fallback))
    }

    /// Try `client` for chunks the clients before it gave up on.
    pub fn with_fallback(mut self, client: Arc<dyn CompletionClient>) -> Self {
        self.clients.push(client);
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Run one chunk through the LLM until a response parses or every
    /// client used up its attempts. The error is the last attempt's.
    pub async fn extract_chunk(&self, chunk: &Chunk) -> Result<ChunkInsights, StageError> {
        let prompt = user_prompt(&chunk.text);
        let mut last_error = None;

        for (rank, client) in self.clients.iter().enumerate() {
            let model = client.model().unwrap_or("default");
            if rank > 0 {
                info!(
                    company = %chunk.company,
                    chunk = chunk.index,
                    model,
                    "falling back to the next model"
                );
            }
            match self.attempt_with(client.as_ref(), chunk.index, &prompt).await {
                Ok(result) => return Ok(result),
                Err(exhausted) => {
                    warn!(
                        company = %chunk.company,
                        chunk = chunk.index,
                        model,
                        attempts = exhausted.attempts,
                        error = %exhausted.last_error,
                        "model gave up on chunk"
                    );
                    last_error = Some(exhausted.last_error);
                }
            }
        }

        let error = last_error.unwrap_or_else(|| StageError::LlmCall {
            chunk: chunk.index,
            detail: "no completion client".into(),
        });
        warn!(
            company = %chunk.company,
            chunk = chunk.index,
            error = %error,
            "chunk failed, continuing with the next one"
        );
        Err(error)
    }

    async fn attempt_with(
        &self,
        client: &dyn CompletionClient,
        index: usize,
        prompt: &str,
    ) -> Result<ChunkInsights, Exhausted<StageError>> {
        let system = self.system_prompt.as_str();

        attempt(
            |n| async move {
                let completion = client
                    .complete(system, prompt)
                    .await
                    .map_err(|detail| StageError::LlmCall { chunk: index, detail })?;
                let statements = parse_response(index, &completion.content)?;
                Ok::<_, StageError>(ChunkInsights {
                    chunk: index,
                    statements,
                    input_tokens: completion.input_tokens,
                    output_tokens: completion.output_tokens,
                    attempts: n,
                })
            },
            self.max_attempts,
            |retry| self.backoff.delay(retry),
        )
        .await
    }

    /// Statements of one chunk.
    pub async fn extract(&self, chunk: &Chunk) -> Result<Vec<ExtractedStatement>, StageError> {
        Ok(self.extract_chunk(chunk).await?.to_statements(&chunk.company))
    }

    /// Extract every chunk of one document.
    ///
    /// Cached chunk results are reused when `reuse_cached` is set; a cache
    /// entry that does not decode is treated as missing. Fresh results are
    /// stored before moving on. Failed chunks are recorded and skipped.
    /// Only store write errors abort.
    pub async fn extract_document(
        &self,
        company: &str,
        chunks: &[Chunk],
        store: &dyn ArtifactStore,
        reuse_cached: bool,
        progress: &dyn PipelineProgressCallback,
    ) -> Result<(DocumentInsights, Vec<StageError>), crate::error::StoreError> {
        let total = chunks.len();
        let mut insights = DocumentInsights::new(company, total);
        let mut errors = Vec::new();

        for chunk in chunks {
            let key = ArtifactKey::ChunkInsights {
                company: company.to_string(),
                index: chunk.index,
            };

            if reuse_cached {
                match read_json::<ChunkInsights>(store, &key) {
                    Ok(Some(cached)) => {
                        debug!(company, chunk = chunk.index, "reusing cached chunk response");
                        insights.absorb(&cached);
                        progress.on_chunk_complete(company, chunk.index, total);
                        continue;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(
                            company,
                            chunk = chunk.index,
                            error = %e,
                            "unreadable cached response, asking again"
                        );
                    }
                }
            }

            match self.extract_chunk(chunk).await {
                Ok(result) => {
                    write_json(store, &key, &result)?;
                    debug!(
                        company,
                        chunk = chunk.index,
                        input_tokens = result.input_tokens,
                        output_tokens = result.output_tokens,
                        "chunk extracted"
                    );
                    insights.absorb(&result);
                    progress.on_chunk_complete(company, chunk.index, total);
                }
                Err(e) => {
                    progress.on_chunk_error(company, chunk.index, total, &e.to_string());
                    insights.failed_chunks.push(chunk.index);
                    errors.push(e);
                }
            }
        }

        info!(
            company,
            chunks = total,
            failed = insights.failed_chunks.len(),
            statements = insights.statement_count(),
            "insights extracted"
        );
        Ok((insights, errors))
    }
}
