use std::ops::Range;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum LineError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },
    #[error("span {start}..{end} is outside of {len} lines")]
    SpanOutOfRange { start: usize, end: usize, len: usize },
}

/// Reads a file into lines, dropping the `\n` / `\r\n` terminators.
pub fn read_lines(path: &Path) -> Result<Vec<String>, LineError> {
    let content = std::fs::read_to_string(path).map_err(|source| LineError::Read {
        path: path.display().to_string(),
        source,
    })?;
    Ok(split_lines(&content))
}

pub fn split_lines(content: &str) -> Vec<String> {
    content.lines().map(str::to_string).collect()
}

/// Writes every line followed by a single `\n`, so the file always ends with a newline.
pub fn write_lines(path: &Path, lines: &[String]) -> Result<(), LineError> {
    std::fs::write(path, join_lines(lines)).map_err(|source| LineError::Write {
        path: path.display().to_string(),
        source,
    })
}

pub fn join_lines(lines: &[String]) -> String {
    let mut output = String::with_capacity(lines.iter().map(|line| line.len() + 1).sum());
    for line in lines {
        output.push_str(line);
        output.push('\n');
    }
    output
}

/// Replaces `span` of `lines` with `replacement`, leaving everything outside it in
/// place. An empty span inserts `replacement` at `span.start`.
pub fn replace_span(
    lines: &mut Vec<String>,
    span: Range<usize>,
    replacement: Vec<String>,
) -> Result<(), LineError> {
    if span.start > span.end || span.end > lines.len() {
        return Err(LineError::SpanOutOfRange {
            start: span.start,
            end: span.end,
            len: lines.len(),
        });
    }
    lines.splice(span, replacement);
    Ok(())
}

pub(crate) fn is_indent_char(ch: char) -> bool {
    matches!(ch, ' ' | '\t' | '\n' | '\r' | '\x0b' | '\x0c')
}

/// Counts leading whitespace characters; tabs and spaces weigh the same.
pub fn leading_whitespace(line: &str) -> usize {
    line.chars().take_while(|ch| is_indent_char(*ch)).count()
}
