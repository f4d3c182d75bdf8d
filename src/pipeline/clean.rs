//! Text cleaning: deterministic removal of PDF extraction artefacts.
//!
//! Annual reports come out of the text layer with page markers, running
//! headers ("ACME | 2023 Annual Report"), standalone page numbers and
//! sentences broken across lines. Left in place they waste LLM tokens and
//! produce fragments instead of statements.
//!
//! ## Rule Order
//!
//! 1. Normalise line endings (CRLF → LF)
//! 2. Remove `--- Page N ---` markers
//! 3. Drop header/footer lines and standalone page numbers
//! 4. Re-join lines broken mid-sentence (paragraph breaks are kept)
//! 5. Collapse runs of spaces/tabs and 3+ newlines
//! 6. Trim the whole document
//!
//! Content lines are never rewritten beyond whitespace; the rules only
//! delete lines or join them.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply every cleaning rule to `text`.
///
/// `company_name` is the identifier without year suffix; a line consisting
/// only of that name (any case) is treated as a running header.
pub fn clean_text(text: &str, company_name: &str) -> String {
    let s = normalise_line_endings(text);
    let s = remove_page_markers(&s);
    let s = remove_headers_footers(&s, company_name);
    let s = fix_broken_line_joins(&s);
    let s = collapse_whitespace(&s);
    s.trim().to_string()
}

// ── Rule 1: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 2: Page markers ─────────────────────────────────────────────────────

static RE_PAGE_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)---\s*page\s+\d+\s*---").unwrap());

fn remove_page_markers(input: &str) -> String {
    RE_PAGE_MARKER.replace_all(input, "").into_owned()
}

// ── Rule 3: Headers, footers, page numbers ───────────────────────────────────

static RE_HEADERS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)^.*\|\s*\d{4}\s+annual\s+report.*$",
        r"(?i)^.*annual\s+report\s+\d{4}.*$",
        r"(?i)^.*\|\s*page\s*\d+.*$",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static RE_PAGE_NUMBERS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"^\d{1,4}\s*$",
        r"(?i)^\d{1,4}\s*yf\s*$",
        r"(?i)^yf\s*\d{4}\s*$",
        r"(?i)^page\s+\d+\s*$",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

fn is_artifact_line(stripped: &str, company_name: &str) -> bool {
    if RE_HEADERS.iter().any(|re| re.is_match(stripped)) {
        return true;
    }
    if RE_PAGE_NUMBERS.iter().any(|re| re.is_match(stripped)) {
        return true;
    }
    if !company_name.is_empty() {
        let lower = stripped.to_lowercase();
        let name = company_name.to_lowercase();
        if lower == name {
            return true;
        }
        // "ACME | Sustainability Annual Report"
        if let Some(rest) = lower.strip_prefix(&name) {
            let rest = rest.trim_start();
            if rest.starts_with('|') && rest.contains("annual report") {
                return true;
            }
        }
    }
    false
}

fn remove_headers_footers(input: &str, company_name: &str) -> String {
    input
        .split('\n')
        .filter_map(|line| {
            let stripped = line.trim();
            if stripped.is_empty() {
                Some("")
            } else if is_artifact_line(stripped, company_name) {
                None
            } else {
                Some(line)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 4: Broken line joins ────────────────────────────────────────────────

static RE_LIST_ITEM: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[\d\-\u{2022}]+\.").unwrap());

fn ends_sentence(line: &str) -> bool {
    matches!(line.chars().last(), Some('.' | '!' | '?' | ':' | ';'))
}

fn is_list_item(line: &str) -> bool {
    RE_LIST_ITEM.is_match(line) || line.starts_with(['-', '*', '\u{2022}'])
}

/// Join a line that does not end a sentence with the following line,
/// unless the following line is blank or a list item.
fn fix_broken_line_joins(input: &str) -> String {
    let lines: Vec<&str> = input.split('\n').collect();
    let mut fixed: Vec<String> = Vec::with_capacity(lines.len());
    let mut i = 0;

    while i < lines.len() {
        let current = lines[i].trim();
        if current.is_empty() {
            fixed.push(String::new());
            i += 1;
            continue;
        }

        if let Some(next) = lines.get(i + 1).map(|l| l.trim()) {
            if !next.is_empty() && !ends_sentence(current) && !is_list_item(next) {
                fixed.push(format!("{current} {next}"));
                i += 2;
                continue;
            }
        }

        fixed.push(current.to_string());
        i += 1;
    }

    fixed.join("\n")
}

// ── Rule 5: Whitespace ───────────────────────────────────────────────────────

static RE_SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]+").unwrap());
static RE_NEWLINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_whitespace(input: &str) -> String {
    let s = RE_SPACES.replace_all(input, " ");
    RE_NEWLINES.replace_all(&s, "\n\n").into_owned()
}
