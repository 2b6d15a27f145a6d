//! JSONL (JSON Lines) read/write support for the manifest.
//!
//! Each line is a complete JSON object representing one issue. The writer is
//! byte-stable: serialising unchanged data produces identical bytes, so the
//! VCS sees no diff. The reader is permissive: corrupt lines are skipped
//! with a collected warning instead of aborting the import.

use std::io::{self, BufRead, Write};

use crate::issue::Issue;

/// Error type for JSONL operations.
#[derive(Debug, thiserror::Error)]
pub enum JsonlError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error at line {line}: {source}")]
    Json {
        line: usize,
        source: serde_json::Error,
    },
}

/// Result alias for JSONL operations.
pub type Result<T> = std::result::Result<T, JsonlError>;

/// A non-fatal problem encountered while reading a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseWarning {
    /// A line could not be parsed and was skipped.
    CorruptLine { line: usize, message: String },
    /// The final line was missing its newline terminator.
    MissingTrailingNewline,
}

impl std::fmt::Display for ParseWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CorruptLine { line, message } => {
                write!(f, "skipped corrupt line {line}: {message}")
            }
            Self::MissingTrailingNewline => {
                write!(f, "manifest is missing its trailing newline")
            }
        }
    }
}

/// Writes issues as JSONL to the given writer.
///
/// One JSON object per line, no trailing whitespace, a single newline after
/// each line (so the file ends with exactly one newline).
pub fn write_jsonl<W: Write>(writer: &mut W, issues: &[Issue]) -> Result<()> {
    for issue in issues {
        serde_json::to_writer(&mut *writer, issue)
            .map_err(|e| JsonlError::Json { line: 0, source: e })?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

/// Serialises issues to a JSONL byte vector.
pub fn to_jsonl_bytes(issues: &[Issue]) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    write_jsonl(&mut buf, issues)?;
    Ok(buf)
}

/// Reads issues leniently, collecting warnings instead of failing.
///
/// Empty lines are skipped silently. Corrupt lines produce a
/// [`ParseWarning::CorruptLine`]. A manifest whose final line lacks a
/// newline imports fully with a [`ParseWarning::MissingTrailingNewline`].
pub fn read_jsonl_lenient<R: BufRead>(mut reader: R) -> Result<(Vec<Issue>, Vec<ParseWarning>)> {
    let mut issues = Vec::new();
    let mut warnings = Vec::new();
    let mut line = String::new();
    let mut line_number = 0usize;

    loop {
        line.clear();
        let n = reader.read_line(&mut line)?;
        if n == 0 {
            break;
        }
        line_number += 1;
        if !line.ends_with('\n') {
            warnings.push(ParseWarning::MissingTrailingNewline);
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<Issue>(trimmed) {
            Ok(mut issue) => {
                issue.set_defaults();
                issues.push(issue);
            }
            Err(e) => warnings.push(ParseWarning::CorruptLine {
                line: line_number,
                message: e.to_string(),
            }),
        }
    }

    Ok((issues, warnings))
}

/// Returns an iterator that reads issues strictly from a JSONL reader.
///
/// Each line is parsed as a JSON object; a corrupt line yields an error
/// item. Empty lines are skipped.
pub fn read_jsonl<R: BufRead>(reader: R) -> JsonlIter<R> {
    JsonlIter {
        reader,
        line_number: 0,
    }
}

/// Iterator over JSONL-encoded issues.
pub struct JsonlIter<R> {
    reader: R,
    line_number: usize,
}

impl<R: BufRead> Iterator for JsonlIter<R> {
    type Item = Result<Issue>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut line = String::new();
        loop {
            line.clear();
            match self.reader.read_line(&mut line) {
                Ok(0) => return None, // EOF
                Ok(_) => {
                    self.line_number += 1;
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<Issue>(trimmed) {
                        Ok(issue) => return Some(Ok(issue)),
                        Err(e) => {
                            return Some(Err(JsonlError::Json {
                                line: self.line_number,
                                source: e,
                            }));
                        }
                    }
                }
                Err(e) => return Some(Err(JsonlError::Io(e))),
            }
        }
    }
}

/// Counts non-empty lines without parsing. Used by the freshness check.
pub fn count_lines<R: BufRead>(reader: R) -> io::Result<usize> {
    let mut count = 0;
    for line in reader.lines() {
        if !line?.trim().is_empty() {
            count += 1;
        }
    }
    Ok(count)
}
