//! PDF text extraction: read the text layer of every page via pdfium.
//!
//! ## Why spawn_blocking?
//!
//! `pdfium-render` wraps the pdfium C++ library, which keeps thread-local
//! state and is not safe to drive from async contexts. The whole document is
//! read inside `tokio::task::spawn_blocking` so Tokio worker threads never
//! stall on a 300-page annual report.
//!
//! Pages are joined with `--- Page N ---` markers; the cleaner strips them
//! again, but they keep the raw-text artifact easy to cross-check against
//! the PDF.

use crate::error::StageError;
use async_trait::async_trait;
use pdfium_render::prelude::*;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Turns a report file into plain text.
///
/// The production implementation is [`PdfiumTextExtractor`]; tests inject
/// their own to run the pipeline without PDFs.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract_text(&self, company: &str, path: &Path) -> Result<String, StageError>;
}

/// Text extraction backed by pdfium, bound through `pdfium-auto`.
#[derive(Debug, Clone, Default)]
pub struct PdfiumTextExtractor {
    password: Option<String>,
}

impl PdfiumTextExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `password` for encrypted reports.
    pub fn with_password(password: impl Into<String>) -> Self {
        Self {
            password: Some(password.into()),
        }
    }
}

#[async_trait]
impl TextExtractor for PdfiumTextExtractor {
    async fn extract_text(&self, company: &str, path: &Path) -> Result<String, StageError> {
        let owned: PathBuf = path.to_path_buf();
        let password = self.password.clone();
        let company_owned = company.to_string();

        let result = tokio::task::spawn_blocking(move || {
            extract_blocking(&company_owned, &owned, password.as_deref())
        })
        .await
        .map_err(|e| io_error(company, path, format!("extraction task panicked: {e}")))?;

        let text = result?;
        info!(company, chars = text.chars().count(), "extracted text");
        Ok(text)
    }
}

/// Blocking implementation of text extraction.
fn extract_blocking(
    company: &str,
    path: &Path,
    password: Option<&str>,
) -> Result<String, StageError> {
    check_pdf_magic(path).map_err(|detail| io_error(company, path, detail))?;

    let pdfium = pdfium_auto::bind_pdfium_silent()
        .map_err(|e| io_error(company, path, format!("pdfium unavailable: {e}")))?;

    let document = pdfium.load_pdf_from_file(path, password).map_err(|e| {
        let detail = format!("{e:?}");
        if detail.to_lowercase().contains("password") {
            io_error(company, path, "PDF is encrypted; a password is required".into())
        } else {
            io_error(company, path, format!("corrupt PDF: {detail}"))
        }
    })?;

    let pages = document.pages();
    let total = pages.len() as usize;
    let mut text = String::new();

    for (idx, page) in pages.iter().enumerate() {
        let page_text = page
            .text()
            .map_err(|e| io_error(company, path, format!("page {}: {e:?}", idx + 1)))?;
        if idx > 0 {
            text.push('\n');
        }
        text.push_str(&format!("--- Page {} ---\n", idx + 1));
        text.push_str(&page_text.all());
        debug!(company, page = idx + 1, total, "read page text");
    }

    Ok(text)
}

/// Reject files that do not start with `%PDF`.
pub fn check_pdf_magic(path: &Path) -> Result<(), String> {
    let mut f = std::fs::File::open(path).map_err(|e| format!("cannot open: {e}"))?;
    let mut magic = [0u8; 4];
    f.read_exact(&mut magic)
        .map_err(|e| format!("cannot read header: {e}"))?;
    if &magic != b"%PDF" {
        return Err(format!("not a PDF (first bytes: {magic:?})"));
    }
    Ok(())
}

fn io_error(company: &str, path: &Path, detail: String) -> StageError {
    StageError::ExtractionIo {
        company: company.to_string(),
        path: path.to_path_buf(),
        detail,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magic_check_accepts_pdf_header() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("ok.pdf");
        std::fs::write(&p, b"%PDF-1.7\n...").unwrap();
        assert!(check_pdf_magic(&p).is_ok());
    }

    #[test]
    fn magic_check_rejects_other_files() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("fake.pdf");
        std::fs::write(&p, b"<html></html>").unwrap();
        let err = check_pdf_magic(&p).unwrap_err();
        assert!(err.contains("not a PDF"), "got: {err}");

        let short = dir.path().join("short.pdf");
        std::fs::write(&short, b"%P").unwrap();
        assert!(check_pdf_magic(&short).is_err());
    }

    #[tokio::test]
    async fn fake_pdf_is_an_extraction_error() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("BROKEN_2023.pdf");
        std::fs::write(&p, b"garbage").unwrap();

        let err = PdfiumTextExtractor::new()
            .extract_text("BROKEN_2023", &p)
            .await
            .unwrap_err();
        match err {
            StageError::ExtractionIo { company, .. } => assert_eq!(company, "BROKEN_2023"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
