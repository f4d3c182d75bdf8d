//! Sentiment scoring: one three-class label plus confidence per statement.
//!
//! The classifier sits behind [`SentimentModel`]:
//!
//! * [`HttpClassifier`]: a text-classification server (Text Embeddings
//!   Inference `/predict`, or a Hugging Face Inference API model URL)
//!   serving a financial model such as `ProsusAI/finbert`. Requests are
//!   bounded by a timeout.
//! * [`LexiconClassifier`]: a deterministic financial word list, used when
//!   no endpoint is configured and in offline runs.
//!
//! [`SentimentScorer`] wraps a model with the rules that hold for every
//! backend: over-long input is truncated to a fixed number of characters,
//! and any failure degrades to the Neutral / 0.0 sentinel instead of an
//! error.

use crate::error::{PipelineError, StageError};
use crate::model::{ExtractedStatement, ScoredStatement, SentimentLabel};
use crate::pipeline::reconcile::normalize_key;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A fixed three-class classifier.
#[async_trait]
pub trait SentimentModel: Send + Sync {
    /// Label and confidence in `[0.0, 1.0]` for `text`.
    async fn classify(&self, text: &str) -> Result<(SentimentLabel, f64), StageError>;

    /// Identifier recorded in the sentiment artifact.
    fn name(&self) -> &str;
}

// ── HTTP classifier ──────────────────────────────────────────────────────

#[derive(Serialize)]
struct PredictRequest<'a> {
    inputs: &'a str,
    truncate: bool,
}

#[derive(Debug, Deserialize)]
struct LabelScore {
    label: String,
    score: f64,
}

/// TEI answers `[{..}, ..]`; the Inference API wraps that in one more list.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PredictResponse {
    Flat(Vec<LabelScore>),
    Nested(Vec<Vec<LabelScore>>),
}

impl PredictResponse {
    fn into_scores(self) -> Vec<LabelScore> {
        match self {
            PredictResponse::Flat(v) => v,
            PredictResponse::Nested(v) => v.into_iter().next().unwrap_or_default(),
        }
    }
}

/// Classifier served over HTTP.
pub struct HttpClassifier {
    client: reqwest::Client,
    url: String,
    model: String,
    token: Option<String>,
    timeout: Duration,
}

impl HttpClassifier {
    /// `endpoint` is either a server root (`/predict` is appended) or a full
    /// model URL (`.../models/<id>` or ending in `/predict`), used as-is.
    ///
    /// Each request, body included, must finish within `timeout`.
    pub fn new(
        endpoint: &str,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PipelineError::Internal(format!("HTTP client setup failed: {e}")))?;
        Ok(Self {
            client,
            url: predict_url(endpoint),
            model: model.into(),
            token: None,
            timeout,
        })
    }

    /// Send `Authorization: Bearer <token>` with every request.
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl HttpClassifier {
    fn request_error(&self, e: &reqwest::Error) -> StageError {
        let detail = if e.is_timeout() {
            format!("classifier timed out after {:?}", self.timeout)
        } else {
            format!("classifier request failed: {e}")
        };
        StageError::Scoring { detail }
    }
}

fn predict_url(endpoint: &str) -> String {
    let base = endpoint.trim_end_matches('/');
    if base.ends_with("/predict") || base.contains("/models/") {
        base.to_string()
    } else {
        format!("{base}/predict")
    }
}

#[async_trait]
impl SentimentModel for HttpClassifier {
    async fn classify(&self, text: &str) -> Result<(SentimentLabel, f64), StageError> {
        let mut request = self.client.post(&self.url).json(&PredictRequest {
            inputs: text,
            truncate: true,
        });
        if let Some(ref token) = self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| self.request_error(&e))?;

        if !response.status().is_success() {
            return Err(StageError::Scoring {
                detail: format!("classifier returned status {}", response.status()),
            });
        }

        let body: PredictResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                self.request_error(&e)
            } else {
                StageError::Scoring {
                    detail: format!("classifier response parse error: {e}"),
                }
            }
        })?;

        let best = body
            .into_scores()
            .into_iter()
            .filter(|s| !s.score.is_nan())
            .fold(None::<LabelScore>, |best, s| match best {
                Some(b) if b.score >= s.score => Some(b),
                _ => Some(s),
            })
            .ok_or_else(|| StageError::Scoring {
                detail: "classifier returned no labels".into(),
            })?;

        let label = SentimentLabel::parse(&best.label).ok_or_else(|| StageError::Scoring {
            detail: format!("unknown label '{}'", best.label),
        })?;
        Ok((label, best.score))
    }

    fn name(&self) -> &str {
        &self.model
    }
}

// ── Lexicon classifier ───────────────────────────────────────────────────

/// Financial-report word weights.
///
/// Keys are lowercase single words. Values in `(0.0, 1.0]` are positive,
/// in `[-1.0, 0.0)` are negative.
pub(crate) const LEXICON: &[(&str, f64)] = &[
    // Positive signals
    ("growth", 0.4),
    ("grew", 0.4),
    ("increased", 0.3),
    ("increase", 0.3),
    ("improved", 0.4),
    ("improvement", 0.4),
    ("record", 0.4),
    ("strong", 0.4),
    ("robust", 0.4),
    ("profit", 0.3),
    ("profitable", 0.4),
    ("profitability", 0.3),
    ("exceeded", 0.5),
    ("outperformed", 0.5),
    ("expansion", 0.3),
    ("gains", 0.3),
    ("resilient", 0.3),
    ("dividend", 0.2),
    ("upgrade", 0.4),
    ("success", 0.4),
    ("successful", 0.4),
    ("achieved", 0.4),
    // Negative signals
    ("decline", -0.5),
    ("declined", -0.5),
    ("decreased", -0.4),
    ("decrease", -0.4),
    ("loss", -0.5),
    ("losses", -0.5),
    ("impairment", -0.5),
    ("weak", -0.4),
    ("weaker", -0.4),
    ("lower", -0.3),
    ("fell", -0.4),
    ("drop", -0.4),
    ("shortfall", -0.5),
    ("downturn", -0.5),
    ("litigation", -0.4),
    ("default", -0.5),
    ("disruption", -0.4),
    ("volatility", -0.3),
    ("uncertainty", -0.3),
    ("headwinds", -0.4),
    ("inflation", -0.2),
    ("writedown", -0.5),
    ("restructuring", -0.3),
];

/// Sum of matching lexicon weights, clamped to `[-1.0, 1.0]`.
#[must_use]
pub fn lexicon_score(text: &str) -> f64 {
    let mut score = 0.0_f64;
    for word in text.split_whitespace() {
        let w = word
            .trim_matches(|c: char| !c.is_alphabetic())
            .to_lowercase();
        if let Some(&(_, weight)) = LEXICON.iter().find(|(lex, _)| *lex == w) {
            score += weight;
        }
    }
    score.clamp(-1.0, 1.0)
}

/// Offline classifier built on [`lexicon_score`].
#[derive(Debug, Clone, Default)]
pub struct LexiconClassifier;

impl LexiconClassifier {
    /// Scores within this distance of zero are Neutral.
    const NEUTRAL_BAND: f64 = 0.1;
}

#[async_trait]
impl SentimentModel for LexiconClassifier {
    async fn classify(&self, text: &str) -> Result<(SentimentLabel, f64), StageError> {
        let score = lexicon_score(text);
        let result = if score > Self::NEUTRAL_BAND {
            (SentimentLabel::Positive, 0.5 + score / 2.0)
        } else if score < -Self::NEUTRAL_BAND {
            (SentimentLabel::Negative, 0.5 - score / 2.0)
        } else {
            (SentimentLabel::Neutral, 1.0 - score.abs() * 2.0)
        };
        Ok(result)
    }

    fn name(&self) -> &str {
        "lexicon"
    }
}

// ── Scorer ───────────────────────────────────────────────────────────────

/// Scores of one document; the `sentiment_outputs/<company>.json` artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSentiment {
    pub company: String,
    pub model: String,
    pub scores: Vec<ScoredStatement>,
}

impl DocumentSentiment {
    pub fn defaulted(&self) -> usize {
        self.scores.iter().filter(|s| s.defaulted).count()
    }
}

/// Applies a [`SentimentModel`] with truncation and sentinel fallback.
pub struct SentimentScorer {
    model: Arc<dyn SentimentModel>,
    max_chars: usize,
}

impl SentimentScorer {
    pub fn new(model: Arc<dyn SentimentModel>, max_chars: usize) -> Self {
        Self {
            model,
            max_chars: max_chars.max(1),
        }
    }

    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    /// Score one statement. Never fails: problems yield the sentinel.
    pub async fn score(&self, statement: &str) -> ScoredStatement {
        let text = statement.trim();
        if text.is_empty() {
            warn!("empty statement, using neutral sentinel");
            return ScoredStatement::sentinel(statement);
        }

        let input = truncate_chars(text, self.max_chars);
        if input.len() < text.len() {
            debug!(
                chars = text.chars().count(),
                max_chars = self.max_chars,
                "statement truncated for scoring"
            );
        }

        match self.model.classify(input).await {
            Ok((sentiment, confidence)) => ScoredStatement {
                text: statement.to_string(),
                sentiment,
                confidence: clamp_confidence(confidence),
                defaulted: false,
            },
            Err(e) => {
                warn!(error = %e, statement = %preview(text), "scoring failed, using neutral sentinel");
                ScoredStatement::sentinel(statement)
            }
        }
    }

    /// Score every distinct statement of a document once, in first-seen
    /// order. Duplicates are detected with the reconciliation join key.
    pub async fn score_document(
        &self,
        company: &str,
        statements: &[ExtractedStatement],
    ) -> DocumentSentiment {
        let mut seen = HashSet::new();
        let mut scores = Vec::new();
        for stmt in statements {
            if !seen.insert(normalize_key(&stmt.text)) {
                continue;
            }
            scores.push(self.score(&stmt.text).await);
        }

        let doc = DocumentSentiment {
            company: company.to_string(),
            model: self.model.name().to_string(),
            scores,
        };
        info!(
            company,
            scored = doc.scores.len(),
            defaulted = doc.defaulted(),
            "statements scored"
        );
        doc
    }
}

/// First `max_chars` characters of `text`, cut on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte, _)) => &text[..byte],
        None => text,
    }
}

/// NaN becomes 0.0; everything else is clamped to `[0.0, 1.0]`.
pub fn clamp_confidence(c: f64) -> f64 {
    if c.is_nan() {
        0.0
    } else {
        c.clamp(0.0, 1.0)
    }
}

fn preview(text: &str) -> &str {
    truncate_chars(text, 60)
}
