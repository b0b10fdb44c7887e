//! Log sanitization for participant data.
//!
//! Sites hold patient-level questionnaire responses. None of it should reach a
//! log line, but a careless `{:?}` on a row or partition would leak it. The
//! writer wrapper in this module redacts, before output:
//! - record / participant identifiers (UUIDs, MRNs, `participant_id=...`)
//! - email addresses
//! - raw item responses (`"Q7": 2`, `Q7=2`)
//! - date-of-birth fields
//!
//! Sanitizing strings is a fallback. The protocol code never logs values; this
//! catches what slips through. Input is capped (see `FEDSCORE_SANITIZE_MAX_BYTES`)
//! so a huge line cannot stall logging.

use regex::{Regex, RegexSet};
use std::sync::OnceLock;
use tracing_subscriber::fmt::MakeWriter;

static PATTERNS: OnceLock<Patterns> = OnceLock::new();

/// Default cap on the bytes sanitized per call (16 KiB).
const DEFAULT_SANITIZE_MAX_BYTES: usize = 16 * 1024;

struct Rule {
    regex: Regex,
    replacement: &'static str,
}

struct Patterns {
    set: RegexSet,
    rules: Vec<Rule>,
}

const RULES: [(&str, &str); 6] = [
    (
        r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}",
        "[REDACTED-UUID]",
    ),
    (r"\bMRN[:\s]?\d{6,10}\b", "[REDACTED-MRN]"),
    (
        r"(?i)\b(?:participant|patient|subject|respondent)[_-]?(?:id)?\s*[:=]\s*[A-Za-z0-9_-]+",
        "[REDACTED-PARTICIPANT]",
    ),
    (
        r"(?i)\b[a-z0-9](?:[a-z0-9._%+-]{0,62}[a-z0-9])?@(?:[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z]{2,}\b",
        "[REDACTED-EMAIL]",
    ),
    // item responses such as `"Q7": 2`, `Q7=2` or `Q7: Number(2.0)`
    (
        r#"(?i)"?\bQ\d{1,3}"?\s*[:=]\s*(?:Number\()?"?-?\d+(?:\.\d+)?"?\)?"#,
        "[REDACTED-RESPONSE]",
    ),
    (
        r#"(?i)"?\b(?:dob|date[_ ]?of[_ ]?birth|birth[_ ]?date)"?\s*[:=]\s*"?[0-9./-]{6,10}"?"#,
        "[REDACTED-DOB]",
    ),
];

fn truncate_to_char_boundary(input: &str, max_bytes: usize) -> (&str, bool) {
    if input.len() <= max_bytes {
        return (input, false);
    }

    let mut end = max_bytes.min(input.len());
    while end > 0 && !input.is_char_boundary(end) {
        end -= 1;
    }
    (&input[..end], true)
}

fn max_sanitize_bytes() -> usize {
    std::env::var("FEDSCORE_SANITIZE_MAX_BYTES")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|&v| v > 0)
        .unwrap_or(DEFAULT_SANITIZE_MAX_BYTES)
}

fn patterns() -> &'static Patterns {
    PATTERNS.get_or_init(|| {
        let set = RegexSet::new(RULES.iter().map(|(p, _)| *p)).expect("Valid regex set");
        let rules = RULES
            .iter()
            .map(|(pattern, replacement)| Rule {
                regex: Regex::new(pattern).expect("Valid regex"),
                replacement,
            })
            .collect();
        Patterns { set, rules }
    })
}

/// Replace participant data patterns in `input`.
#[must_use]
pub fn sanitize(input: &str) -> String {
    sanitize_with_limit(input, max_sanitize_bytes())
}

fn sanitize_with_limit(input: &str, max_bytes: usize) -> String {
    let patterns = patterns();
    let (prefix, truncated) = truncate_to_char_boundary(input, max_bytes);

    let mut result = prefix.to_string();
    for idx in patterns.set.matches(prefix).into_iter() {
        let rule = &patterns.rules[idx];
        result = rule.regex.replace_all(&result, rule.replacement).to_string();
    }

    if truncated {
        result.push_str(" [TRUNCATED]");
    }
    result
}

/// Check if a string contains something that looks like participant data.
#[must_use]
pub fn contains_participant_data(input: &str) -> bool {
    let (prefix, _) = truncate_to_char_boundary(input, max_sanitize_bytes());
    patterns().set.is_match(prefix)
}

/// A `tracing_subscriber` writer wrapper that sanitizes formatted log output
/// line by line before it reaches the underlying sink.
#[derive(Debug, Clone)]
pub struct SanitizingMakeWriter<M> {
    inner: M,
}

impl<M> SanitizingMakeWriter<M> {
    #[must_use]
    pub fn new(inner: M) -> Self {
        Self { inner }
    }
}

pub struct SanitizingWriter<W> {
    inner: W,
    buffer: Vec<u8>,
}

impl<W> SanitizingWriter<W>
where
    W: std::io::Write,
{
    fn new(inner: W) -> Self {
        Self {
            inner,
            buffer: Vec::new(),
        }
    }

    fn write_sanitized(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        let sanitized = sanitize(&String::from_utf8_lossy(bytes));
        self.inner.write_all(sanitized.as_bytes())
    }

    fn flush_lines(&mut self) -> std::io::Result<()> {
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.write_sanitized(&line)?;
        }
        Ok(())
    }
}

impl<W> std::io::Write for SanitizingWriter<W>
where
    W: std::io::Write,
{
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.extend_from_slice(buf);

        // A formatter writing one giant line must not buffer without bound.
        let hard_cap = max_sanitize_bytes().saturating_mul(2);
        if self.buffer.len() > hard_cap {
            let pending = std::mem::take(&mut self.buffer);
            self.write_sanitized(&pending)?;
            self.inner.write_all(b"\n[TRUNCATED]\n")?;
            return Ok(buf.len());
        }

        self.flush_lines()?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.flush_lines()?;
        if !self.buffer.is_empty() {
            let pending = std::mem::take(&mut self.buffer);
            self.write_sanitized(&pending)?;
        }
        self.inner.flush()
    }
}

impl<'a, M> MakeWriter<'a> for SanitizingMakeWriter<M>
where
    M: MakeWriter<'a>,
{
    type Writer = SanitizingWriter<M::Writer>;

    fn make_writer(&'a self) -> Self::Writer {
        SanitizingWriter::new(self.inner.make_writer())
    }
}
