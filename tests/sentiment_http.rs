//! Integration tests for `HttpClassifier`.
//!
//! Uses `wiremock` to stand up a local classification server for each test
//! so no real network traffic is made. Covers both response shapes a
//! text-classification server may return and the failures that must
//! degrade to the Neutral / 0.0 sentinel.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use finsight::{HttpClassifier, SentimentLabel, SentimentModel, SentimentScorer, StageError};

fn http_classifier(url: &str, model: &str) -> HttpClassifier {
    HttpClassifier::new(url, model, Duration::from_secs(5)).expect("client should build")
}

fn finbert_scores() -> serde_json::Value {
    json!([
        {"label": "positive", "score": 0.03},
        {"label": "negative", "score": 0.91},
        {"label": "neutral", "score": 0.06}
    ])
}

// ---------------------------------------------------------------------------
// Response shapes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn flat_response_picks_highest_score() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/predict"))
        .and(body_partial_json(json!({
            "inputs": "Revenue declined 12% due to supply issues.",
            "truncate": true
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(finbert_scores()))
        .expect(1)
        .mount(&server)
        .await;

    let classifier = http_classifier(&server.uri(), "ProsusAI/finbert");
    let (label, confidence) = classifier
        .classify("Revenue declined 12% due to supply issues.")
        .await
        .expect("classification should succeed");

    assert_eq!(label, SentimentLabel::Negative);
    assert!((confidence - 0.91).abs() < 1e-9);
    assert_eq!(classifier.name(), "ProsusAI/finbert");
}

#[tokio::test]
async fn nested_response_from_model_url() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/models/ProsusAI/finbert"))
        .and(header("authorization", "Bearer hf_test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([[
            {"label": "positive", "score": 0.88},
            {"label": "neutral", "score": 0.10},
            {"label": "negative", "score": 0.02}
        ]])))
        .expect(1)
        .mount(&server)
        .await;

    let url = format!("{}/models/ProsusAI/finbert", server.uri());
    let classifier = http_classifier(&url, "ProsusAI/finbert").with_bearer_token("hf_test");
    assert_eq!(classifier.url(), url);

    let (label, confidence) = classifier
        .classify("Operating margin improved to a record 21%.")
        .await
        .expect("classification should succeed");
    assert_eq!(label, SentimentLabel::Positive);
    assert!((confidence - 0.88).abs() < 1e-9);
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn server_error_is_a_scoring_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/predict"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let classifier = http_classifier(&server.uri(), "ProsusAI/finbert");
    let result = classifier.classify("Anything.").await;
    assert!(
        matches!(result, Err(StageError::Scoring { .. })),
        "expected Scoring error, got: {result:?}"
    );
}

#[tokio::test]
async fn unknown_label_is_a_scoring_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/predict"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([{"label": "bullish", "score": 0.99}])),
        )
        .mount(&server)
        .await;

    let classifier = http_classifier(&server.uri(), "custom");
    let err = classifier.classify("Shares rallied.").await.unwrap_err();
    assert!(err.to_string().contains("bullish"), "got: {err}");
}

#[tokio::test]
async fn scorer_falls_back_to_sentinel_on_http_failure() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/predict"))
        .respond_with(ResponseTemplate::new(500).set_body_string("model loading"))
        .mount(&server)
        .await;

    let scorer = SentimentScorer::new(
        Arc::new(http_classifier(&server.uri(), "ProsusAI/finbert")),
        2000,
    );
    let scored = scorer.score("Net debt rose sharply.").await;

    assert_eq!(scored.sentiment, SentimentLabel::Neutral);
    assert_eq!(scored.confidence, 0.0);
    assert!(scored.defaulted);
    assert_eq!(scored.text, "Net debt rose sharply.");
}

#[tokio::test]
async fn scorer_sends_truncated_statement() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/predict"))
        .and(body_partial_json(json!({"inputs": "abcde"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(finbert_scores()))
        .expect(1)
        .mount(&server)
        .await;

    let scorer = SentimentScorer::new(
        Arc::new(http_classifier(&server.uri(), "ProsusAI/finbert")),
        5,
    );
    let scored = scorer.score("abcdefghij").await;

    // The record keeps the full statement; only the request is truncated.
    assert_eq!(scored.text, "abcdefghij");
    assert_eq!(scored.sentiment, SentimentLabel::Negative);
    assert!(!scored.defaulted);
}

#[tokio::test]
async fn slow_classifier_times_out_to_sentinel() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/predict"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(finbert_scores())
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let classifier =
        HttpClassifier::new(&server.uri(), "ProsusAI/finbert", Duration::from_millis(200)).unwrap();
    let err = classifier.classify("Cash flow weakened.").await.unwrap_err();
    assert!(err.to_string().contains("timed out"), "got: {err}");

    let scorer = SentimentScorer::new(Arc::new(classifier), 2000);
    let started = std::time::Instant::now();
    let scored = scorer.score("Cash flow weakened.").await;
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(scored.sentiment, SentimentLabel::Neutral);
    assert_eq!(scored.confidence, 0.0);
    assert!(scored.defaulted);
}
