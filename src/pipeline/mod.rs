//! Pipeline stages for annual-report analysis.
//!
//! Each submodule implements exactly one transformation step and is
//! testable on its own; [`crate::orchestrator`] sequences them and owns
//! persistence.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ text ──▶ clean ──▶ chunk ──▶ extract ──▶ sentiment ──▶ reconcile
//! (PDFs)  (pdfium) (rules)  (window)    (LLM)       (classifier)   (join)
//! ```
//!
//! 1. [`input`]: list the report PDFs and derive company identifiers
//! 2. [`text`]: read each page's text layer; runs in `spawn_blocking`
//!    because pdfium is not async-safe
//! 3. [`clean`]: deterministic removal of headers, page numbers and
//!    broken line joins
//! 4. [`chunk`]: overlapping fixed-size character windows
//! 5. [`extract`]: categorised statements per chunk via [`llm`], with
//!    bounded retries; the only stage with LLM traffic
//! 6. [`sentiment`]: label + confidence per distinct statement
//! 7. [`reconcile`]: join statements with scores into dataset rows

pub mod chunk;
pub mod clean;
pub mod extract;
pub mod input;
pub mod llm;
pub mod reconcile;
pub mod sentiment;
pub mod text;
