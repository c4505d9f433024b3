//! Compiler diagnostics

use std::sync::LazyLock;

use regex::Regex;

use crate::report::{LineTag, ReportLine, Span, SpanKind};

/// A source or header path followed by `:`
static SOURCE_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"[^\s:'"`()]*\.(?:cpp|hpp|c|h):"#).expect("source path regex is valid")
});

static SEVERITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(error|warning|note):").expect("severity regex is valid")
});

static LOCATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d+):(\d+):").expect("location regex is valid"));

/// Classify compiler output line by line
pub fn classify_compiler(raw: &str) -> Vec<ReportLine> {
    raw.lines().map(diagnostic_line).collect()
}

/// Strip paths from one line and tag it
pub(crate) fn diagnostic_line(line: &str) -> ReportLine {
    let text = strip_paths(line);
    let spans = spans(&text);
    let tag = tag_for(&spans);
    ReportLine { text, tag, spans }
}

fn strip_paths(line: &str) -> String {
    if !SOURCE_PATH.is_match(line) {
        return line.to_string();
    }
    let stripped = SOURCE_PATH.replace_all(line, "");
    stripped.trim_start().to_string()
}

fn spans(text: &str) -> Vec<Span> {
    let mut spans = Vec::new();

    for caps in LOCATION.captures_iter(text) {
        let (Some(whole), Some(line), Some(column)) = (caps.get(0), caps.get(1), caps.get(2))
        else {
            continue;
        };
        let (Ok(line), Ok(column)) = (line.as_str().parse(), column.as_str().parse()) else {
            continue;
        };
        spans.push(Span {
            start: whole.start(),
            // the trailing ':' is not part of the location
            end: whole.end() - 1,
            kind: SpanKind::Location { line, column },
        });
    }

    for caps in SEVERITY.captures_iter(text) {
        let Some(word) = caps.get(1) else {
            continue;
        };
        let kind = match word.as_str() {
            "error" => SpanKind::Error,
            "warning" => SpanKind::Warning,
            _ => SpanKind::Note,
        };
        spans.push(Span {
            start: word.start(),
            end: word.end(),
            kind,
        });
    }

    spans.sort_by_key(|span| span.start);
    spans
}

fn tag_for(spans: &[Span]) -> LineTag {
    let has = |kind: SpanKind| spans.iter().any(|span| span.kind == kind);
    if has(SpanKind::Error) {
        LineTag::Error
    } else if has(SpanKind::Warning) {
        LineTag::Warning
    } else if has(SpanKind::Note) {
        LineTag::Note
    } else {
        LineTag::Plain
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_workspace_path() {
        let lines = classify_compiler(
            "/tmp/snipbox/job-1234/main.c:3:5: error: expected ';' before 'return'",
        );
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].text, "3:5: error: expected ';' before 'return'");
        assert_eq!(lines[0].tag, LineTag::Error);
        assert!(!lines[0].text.contains("/tmp"));
    }

    #[test]
    fn strips_bare_file_names_and_headers() {
        let lines = classify_compiler(
            "main.cpp: In function 'int main()':\nIn file included from /usr/include/stdio.h:27,",
        );
        assert_eq!(lines[0].text, "In function 'int main()':");
        assert_eq!(lines[0].tag, LineTag::Plain);
        assert_eq!(lines[1].text, "In file included from 27,");
    }

    #[test]
    fn location_and_severity_spans() {
        let line = diagnostic_line("main.c:12:7: warning: unused variable 'x'");
        assert_eq!(line.text, "12:7: warning: unused variable 'x'");
        assert_eq!(line.tag, LineTag::Warning);
        assert_eq!(
            line.spans,
            vec![
                Span {
                    start: 0,
                    end: 4,
                    kind: SpanKind::Location {
                        line: 12,
                        column: 7
                    }
                },
                Span {
                    start: 6,
                    end: 13,
                    kind: SpanKind::Warning
                },
            ]
        );
        assert_eq!(&line.text[6..13], "warning");
    }

    #[test]
    fn error_outranks_note() {
        let line = diagnostic_line("main.c:1:1: note: in expansion; error: boom");
        assert_eq!(line.tag, LineTag::Error);
    }

    #[test]
    fn code_context_lines_are_kept_verbatim() {
        let raw = "main.c:3:5: error: expected ';'\n    3 |     return 0\n      |     ^~~~~~";
        let lines = classify_compiler(raw);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1].text, "    3 |     return 0");
        assert_eq!(lines[1].tag, LineTag::Plain);
        assert!(lines[1].spans.is_empty());
    }

    #[test]
    fn fatal_error_is_error() {
        let line = diagnostic_line("main.c:1:10: fatal error: nope.h: No such file or directory");
        assert_eq!(line.tag, LineTag::Error);
        assert!(!line.text.contains("main.c"));
        assert!(!line.text.contains("nope.h"));
    }
}
