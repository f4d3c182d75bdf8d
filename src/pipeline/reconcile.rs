//! Reconciliation: join extracted statements with their sentiment scores.
//!
//! The join key is the statement text, lowercased with whitespace runs
//! collapsed ([`normalize_key`]). [`combine`] is total: every extracted
//! statement yields exactly one [`UnifiedRecord`]. A statement without a
//! score gets the Neutral / 0.0 sentinel and a warning; it is never dropped.
//!
//! Output order: companies in first-seen order, then category
//! (positive, negative, guidance, risk), then extraction order.

use crate::model::{ExtractedStatement, ScoredStatement, SentimentLabel, UnifiedRecord};
use crate::pipeline::sentiment::clamp_confidence;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// Case- and whitespace-insensitive join key.
pub fn normalize_key(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Remove repeated statements within the same company and category,
/// keeping the first occurrence. Chunk overlap makes the LLM report the
/// same sentence twice.
pub fn dedup_statements(statements: Vec<ExtractedStatement>) -> Vec<ExtractedStatement> {
    let before = statements.len();
    let mut seen = HashSet::new();
    let kept: Vec<ExtractedStatement> = statements
        .into_iter()
        .filter(|s| seen.insert((s.company.clone(), s.category, normalize_key(&s.text))))
        .collect();
    if kept.len() < before {
        debug!(removed = before - kept.len(), "duplicate statements removed");
    }
    kept
}

/// Join `extracted` with `scored` into the final records.
pub fn combine(extracted: &[ExtractedStatement], scored: &[ScoredStatement]) -> Vec<UnifiedRecord> {
    let mut by_key: HashMap<String, &ScoredStatement> = HashMap::with_capacity(scored.len());
    for s in scored {
        by_key.entry(normalize_key(&s.text)).or_insert(s);
    }

    let mut company_rank: HashMap<&str, usize> = HashMap::new();
    for e in extracted {
        let next = company_rank.len();
        company_rank.entry(e.company.as_str()).or_insert(next);
    }

    let mut order: Vec<usize> = (0..extracted.len()).collect();
    // stable: ties keep extraction order
    order.sort_by_key(|&i| (company_rank[extracted[i].company.as_str()], extracted[i].category));

    order
        .into_iter()
        .map(|i| {
            let e = &extracted[i];
            let (sentiment, confidence, defaulted) = match by_key.get(&normalize_key(&e.text)) {
                Some(s) => (s.sentiment, clamp_confidence(s.confidence), s.defaulted),
                None => {
                    warn!(
                        company = %e.company,
                        category = %e.category,
                        chunk = e.chunk,
                        "reconciliation gap: no score for statement, defaulting to Neutral"
                    );
                    (SentimentLabel::Neutral, 0.0, true)
                }
            };
            UnifiedRecord {
                company: e.company.clone(),
                statement: e.text.clone(),
                category: e.category,
                sentiment,
                confidence,
                defaulted,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Category;

    fn ex(company: &str, category: Category, text: &str) -> ExtractedStatement {
        ExtractedStatement {
            company: company.into(),
            chunk: 0,
            category,
            text: text.into(),
        }
    }

    fn sc(text: &str, sentiment: SentimentLabel, confidence: f64) -> ScoredStatement {
        ScoredStatement {
            text: text.into(),
            sentiment,
            confidence,
            defaulted: false,
        }
    }

    #[test]
    fn key_ignores_case_and_whitespace() {
        assert_eq!(normalize_key("  Revenue   DECLINED\n12% "), "revenue declined 12%");
    }

    #[test]
    fn every_statement_yields_one_record() {
        let extracted = vec![
            ex("A", Category::Risk, "FX exposure."),
            ex("A", Category::Positive, "Margins improved."),
            ex("A", Category::Positive, "Unscored statement."),
        ];
        let scored = vec![
            sc("fx   exposure.", SentimentLabel::Negative, 0.7),
            sc("Margins improved.", SentimentLabel::Positive, 0.95),
        ];
        let records = combine(&extracted, &scored);
        assert_eq!(records.len(), extracted.len());

        let gap = records
            .iter()
            .find(|r| r.statement == "Unscored statement.")
            .unwrap();
        assert_eq!(gap.sentiment, SentimentLabel::Neutral);
        assert_eq!(gap.confidence, 0.0);
        assert!(gap.defaulted);
        assert_eq!(records.iter().filter(|r| r.defaulted).count(), 1);
    }

    #[test]
    fn genuine_neutral_zero_is_not_defaulted() {
        let extracted = vec![
            ex("A", Category::Guidance, "Outlook unchanged."),
            ex("A", Category::Risk, "Supplier failed."),
        ];
        let scored = vec![
            sc("Outlook unchanged.", SentimentLabel::Neutral, 0.0),
            ScoredStatement::sentinel("Supplier failed."),
        ];

        let records = combine(&extracted, &scored);
        assert!(!records[0].defaulted, "a real Neutral/0.0 score");
        assert!(records[1].defaulted, "the scorer's sentinel");
    }

    #[test]
    fn nothing_scored_still_yields_all_records() {
        let extracted = vec![ex("A", Category::Guidance, "We target 10%."); 3];
        let records = combine(&extracted, &[]);
        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.sentiment == SentimentLabel::Neutral));
    }

    #[test]
    fn ordering_is_company_then_category_then_extraction() {
        let extracted = vec![
            ex("Zeta", Category::Risk, "z-risk"),
            ex("Alpha", Category::Risk, "a-risk-1"),
            ex("Zeta", Category::Positive, "z-pos"),
            ex("Alpha", Category::Negative, "a-neg"),
            ex("Alpha", Category::Risk, "a-risk-2"),
        ];
        let records = combine(&extracted, &[]);
        let got: Vec<&str> = records.iter().map(|r| r.statement.as_str()).collect();
        assert_eq!(got, vec!["z-pos", "z-risk", "a-neg", "a-risk-1", "a-risk-2"]);
    }

    #[test]
    fn confidence_is_always_in_bounds() {
        let extracted = vec![
            ex("A", Category::Positive, "a"),
            ex("A", Category::Positive, "b"),
            ex("A", Category::Positive, "c"),
        ];
        let scored = vec![
            sc("a", SentimentLabel::Positive, f64::NAN),
            sc("b", SentimentLabel::Positive, 3.0),
            sc("c", SentimentLabel::Positive, -1.0),
        ];
        for r in combine(&extracted, &scored) {
            assert!((0.0..=1.0).contains(&r.confidence), "{}: {}", r.statement, r.confidence);
        }
    }

    #[test]
    fn first_score_wins_on_duplicate_keys() {
        let extracted = vec![ex("A", Category::Risk, "x")];
        let scored = vec![
            sc("x", SentimentLabel::Negative, 0.9),
            sc("X", SentimentLabel::Positive, 0.1),
        ];
        assert_eq!(combine(&extracted, &scored)[0].sentiment, SentimentLabel::Negative);
    }

    #[test]
    fn companies_are_not_merged() {
        let extracted = vec![
            ex("A", Category::Risk, "Shared sentence."),
            ex("B", Category::Risk, "Shared sentence."),
        ];
        let records = combine(&extracted, &[]);
        assert_eq!(records[0].company, "A");
        assert_eq!(records[1].company, "B");
    }

    #[test]
    fn dedup_keeps_first_within_company_and_category() {
        let statements = vec![
            ex("A", Category::Risk, "FX exposure."),
            ex("A", Category::Risk, "fx  exposure."),
            ex("A", Category::Negative, "FX exposure."),
            ex("B", Category::Risk, "FX exposure."),
        ];
        let kept = dedup_statements(statements);
        assert_eq!(kept.len(), 3);
        assert_eq!(kept[0].text, "FX exposure.");
    }
}
