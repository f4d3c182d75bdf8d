//! Domain entities that flow between pipeline stages.
//!
//! ```text
//! Document ──▶ Chunk ──▶ ExtractedStatement ──┐
//!                                              ├──▶ UnifiedRecord
//!                          ScoredStatement ───┘
//! ```
//!
//! [`Category`] and [`SentimentLabel`] are closed enums: the final dataset
//! schema and the join in [`crate::pipeline::reconcile`] assume exactly these
//! values.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// One annual report, after text extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Company identifier, unique per report (the PDF filename stem).
    pub company: String,
    /// Extracted text. Empty when the PDF has no text layer.
    pub text: String,
    /// Where the text came from.
    pub source: PathBuf,
}

/// A bounded, overlapping window of a document's text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub company: String,
    /// 0-based, dense.
    pub index: usize,
    /// Offset of the first character of `text` in the document, in chars.
    pub start: usize,
    pub text: String,
}

/// Extraction taxonomy. Declaration order is the output order of the
/// final dataset within a company.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Positive,
    Negative,
    Guidance,
    Risk,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Positive,
        Category::Negative,
        Category::Guidance,
        Category::Risk,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Positive => "positive",
            Category::Negative => "negative",
            Category::Guidance => "guidance",
            Category::Risk => "risk",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A statement pulled out of one chunk by the LLM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedStatement {
    pub company: String,
    pub chunk: usize,
    pub category: Category,
    /// Non-empty, trimmed.
    pub text: String,
}

/// Output label of the three-class sentiment classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SentimentLabel {
    Positive,
    Negative,
    Neutral,
}

impl SentimentLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            SentimentLabel::Positive => "Positive",
            SentimentLabel::Negative => "Negative",
            SentimentLabel::Neutral => "Neutral",
        }
    }

    /// Map a classifier label onto the closed set.
    ///
    /// Accepts any casing plus the `LABEL_n` ids of untuned FinBERT heads
    /// (0 = positive, 1 = negative, 2 = neutral).
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "positive" | "pos" | "label_0" => Some(SentimentLabel::Positive),
            "negative" | "neg" | "label_1" => Some(SentimentLabel::Negative),
            "neutral" | "neu" | "label_2" => Some(SentimentLabel::Neutral),
            _ => None,
        }
    }
}

impl fmt::Display for SentimentLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sentiment of one statement text, independent of its category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredStatement {
    /// Join key back to [`ExtractedStatement::text`].
    pub text: String,
    pub sentiment: SentimentLabel,
    /// In `[0.0, 1.0]`.
    pub confidence: f64,
    /// `true` when the classifier failed and the sentinel was substituted.
    #[serde(default)]
    pub defaulted: bool,
}

impl ScoredStatement {
    /// The Neutral / 0.0 result used whenever a real score is unavailable.
    pub fn sentinel(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            sentiment: SentimentLabel::Neutral,
            confidence: 0.0,
            defaulted: true,
        }
    }
}

/// One row of the final dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedRecord {
    pub company: String,
    pub statement: String,
    pub category: Category,
    pub sentiment: SentimentLabel,
    pub confidence: f64,
    /// Sentiment is the sentinel: scoring failed or no score was found.
    /// Not a dataset column.
    #[serde(default, skip_serializing)]
    pub defaulted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_serialises_lowercase() {
        let json = serde_json::to_string(&Category::Guidance).unwrap();
        assert_eq!(json, "\"guidance\"");
        assert_eq!(Category::Risk.to_string(), "risk");
    }

    #[test]
    fn category_order_matches_output_order() {
        let mut cats = vec![Category::Risk, Category::Positive, Category::Guidance, Category::Negative];
        cats.sort();
        assert_eq!(cats, Category::ALL.to_vec());
    }

    #[test]
    fn sentiment_label_parse() {
        assert_eq!(SentimentLabel::parse("positive"), Some(SentimentLabel::Positive));
        assert_eq!(SentimentLabel::parse(" NEGATIVE "), Some(SentimentLabel::Negative));
        assert_eq!(SentimentLabel::parse("Neutral"), Some(SentimentLabel::Neutral));
        assert_eq!(SentimentLabel::parse("LABEL_1"), Some(SentimentLabel::Negative));
        assert_eq!(SentimentLabel::parse("mixed"), None);
    }

    #[test]
    fn sentinel_is_neutral_zero() {
        let s = ScoredStatement::sentinel("x");
        assert_eq!(s.sentiment, SentimentLabel::Neutral);
        assert_eq!(s.confidence, 0.0);
        assert!(s.defaulted);
    }
}
