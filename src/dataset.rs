//! The final CSV dataset.
//!
//! Columns are fixed: `Company,Statement,Category,Sentiment,Confidence`.
//! Fields are quoted per RFC 4180 when they contain a comma, a quote or a
//! line break. Confidence is rounded to four decimals and always carries a
//! fractional part (`0.91`, `0.0`, `1.0`).

use crate::error::PipelineError;
use crate::model::UnifiedRecord;
use crate::store::write_atomic;
use std::path::Path;
use tracing::info;

pub const HEADER: [&str; 5] = ["Company", "Statement", "Category", "Sentiment", "Confidence"];

/// Render records as CSV text, header included, `\n` line endings.
pub fn to_csv(records: &[UnifiedRecord]) -> String {
    let mut out = String::new();
    push_row(&mut out, HEADER.iter().copied());
    for r in records {
        let confidence = format_confidence(r.confidence);
        push_row(
            &mut out,
            [
                r.company.as_str(),
                r.statement.as_str(),
                r.category.as_str(),
                r.sentiment.as_str(),
                confidence.as_str(),
            ],
        );
    }
    out
}

/// Write the dataset atomically: readers see the old file or the new one.
pub fn write_csv(path: &Path, records: &[UnifiedRecord]) -> Result<(), PipelineError> {
    write_atomic(path, to_csv(records).as_bytes()).map_err(|source| {
        PipelineError::OutputWriteFailed {
            path: path.to_path_buf(),
            source,
        }
    })?;
    info!(path = %path.display(), rows = records.len(), "dataset written");
    Ok(())
}

pub fn format_confidence(c: f64) -> String {
    let c = if c.is_nan() { 0.0 } else { c.clamp(0.0, 1.0) };
    let rounded = (c * 10_000.0).round() / 10_000.0;
    // Debug formatting keeps the trailing ".0" on whole numbers.
    format!("{rounded:?}")
}

fn push_row<'a>(out: &mut String, fields: impl IntoIterator<Item = &'a str>) {
    for (i, field) in fields.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        push_field(out, field);
    }
    out.push('\n');
}

fn push_field(out: &mut String, field: &str) {
    if field.contains([',', '"', '\n', '\r']) {
        out.push('"');
        out.push_str(&field.replace('"', "\"\""));
        out.push('"');
    } else {
        out.push_str(field);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Category, SentimentLabel};

    fn record(statement: &str, confidence: f64) -> UnifiedRecord {
        UnifiedRecord {
            company: "AcmeCorp".into(),
            statement: statement.into(),
            category: Category::Risk,
            sentiment: SentimentLabel::Negative,
            confidence,
            defaulted: false,
        }
    }

    #[test]
    fn confidence_formatting() {
        assert_eq!(format_confidence(0.91), "0.91");
        assert_eq!(format_confidence(0.0), "0.0");
        assert_eq!(format_confidence(1.0), "1.0");
        assert_eq!(format_confidence(0.123456), "0.1235");
        assert_eq!(format_confidence(f64::NAN), "0.0");
    }

    #[test]
    fn header_and_row() {
        let csv = to_csv(&[record("Revenue declined 12% due to supply issues.", 0.91)]);
        assert_eq!(
            csv,
            "Company,Statement,Category,Sentiment,Confidence\n\
             AcmeCorp,Revenue declined 12% due to supply issues.,risk,Negative,0.91\n"
        );
    }

    #[test]
    fn fields_are_quoted_when_needed() {
        let csv = to_csv(&[record("Sales, net of \"returns\", fell\nsharply", 0.5)]);
        let row = csv.lines().skip(1).collect::<Vec<_>>().join("\n");
        assert_eq!(
            row,
            "AcmeCorp,\"Sales, net of \"\"returns\"\", fell\nsharply\",risk,Negative,0.5"
        );
    }

    #[test]
    fn empty_dataset_has_header_only() {
        assert_eq!(to_csv(&[]), "Company,Statement,Category,Sentiment,Confidence\n");
    }

    #[test]
    fn write_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/nested/insights.csv");
        write_csv(&path, &[record("x", 0.2)]).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.ends_with("AcmeCorp,x,risk,Negative,0.2\n"));
    }
}
