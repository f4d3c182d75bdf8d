//! Input discovery: enumerate the report PDFs of the input directory.
//!
//! One PDF is one company report. The filename stem is the company
//! identifier (`TRENT_2022.pdf` → `TRENT_2022`), which keeps reports of the
//! same company for different years distinct. The part before the first `_`
//! is the company *name*, used by the cleaner to recognise running headers.
//!
//! Only the `.pdf` extension is checked here. A file that merely claims to
//! be a PDF stays in the run and fails in the text stage, so it shows up in
//! the run report instead of vanishing.

use crate::error::PipelineError;
use crate::model::Document;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A report PDF found in the input directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Company identifier, unique within the run.
    pub company: String,
    pub path: PathBuf,
}

impl SourceFile {
    /// Company name without the year suffix.
    pub fn company_name(&self) -> &str {
        company_name(&self.company)
    }

    /// Pair this source with its extracted text.
    pub fn document(&self, text: String) -> Document {
        Document {
            company: self.company.clone(),
            text,
            source: self.path.clone(),
        }
    }
}

/// `TRENT_2022` → `TRENT`; identifiers without `_` are returned unchanged.
pub fn company_name(company: &str) -> &str {
    company.split('_').next().unwrap_or(company)
}

/// List the PDFs of `dir`, sorted by filename.
///
/// # Errors
/// [`PipelineError::InputDirNotFound`] if `dir` is missing or not a directory.
pub fn discover(dir: &Path) -> Result<Vec<SourceFile>, PipelineError> {
    if !dir.is_dir() {
        return Err(PipelineError::InputDirNotFound {
            path: dir.to_path_buf(),
        });
    }

    let entries = std::fs::read_dir(dir).map_err(|_| PipelineError::InputDirNotFound {
        path: dir.to_path_buf(),
    })?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && has_pdf_extension(p))
        .collect();
    paths.sort();

    let mut files: Vec<SourceFile> = Vec::with_capacity(paths.len());
    for path in paths {
        let Some(company) = path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
        else {
            warn!(path = %path.display(), "skipping file without a usable name");
            continue;
        };

        if files.iter().any(|f| f.company == company) {
            warn!(company = %company, path = %path.display(), "duplicate company identifier, skipping");
            continue;
        }

        debug!(company = %company, path = %path.display(), "discovered report");
        files.push(SourceFile { company, path });
    }

    Ok(files)
}

fn has_pdf_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("pdf"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(dir: &Path, name: &str, contents: &[u8]) {
        std::fs::write(dir.join(name), contents).unwrap();
    }

    #[test]
    fn test_company_name() {
        assert_eq!(company_name("TRENT_2022"), "TRENT");
        assert_eq!(company_name("AcmeCorp"), "AcmeCorp");
        assert_eq!(company_name("A_B_C"), "A");
    }

    #[test]
    fn discovers_sorted_pdfs_only() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "ZETA_2023.pdf", b"%PDF-1.7 ...");
        touch(dir.path(), "ALPHA_2023.PDF", b"%PDF-1.4 ...");
        touch(dir.path(), "notes.txt", b"hello");
        touch(dir.path(), "FAKE_2023.pdf", b"<html>");

        let files = discover(dir.path()).unwrap();
        let ids: Vec<&str> = files.iter().map(|f| f.company.as_str()).collect();
        assert_eq!(ids, vec!["ALPHA_2023", "FAKE_2023", "ZETA_2023"]);
        assert_eq!(files[0].company_name(), "ALPHA");
    }

    #[test]
    fn missing_dir_is_fatal() {
        let err = discover(Path::new("/definitely/not/here")).unwrap_err();
        assert!(matches!(err, PipelineError::InputDirNotFound { .. }));
    }

    #[test]
    fn empty_dir_yields_nothing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(discover(dir.path()).unwrap().is_empty());
    }
}
