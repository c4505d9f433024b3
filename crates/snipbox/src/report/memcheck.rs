//! Leak-checker reports
//!
//! A valgrind log is reduced to its summary part: everything from the
//! `HEAP SUMMARY:` marker to the end. Each line is stripped of its
//! `==pid==` prefix and assigned a [`LineShape`]. Stack frames are rewritten
//! one [`FrameShape`] at a time, and every loss record becomes a single
//! self-contained line.

use std::sync::LazyLock;

use regex::Regex;

use crate::report::{LineTag, ReportLine};

const HEAP_SUMMARY: &str = "HEAP SUMMARY:";
const ALL_FREED: &str = "All heap blocks were freed";

/// Stems of the file the submitted source is written to
const USER_SOURCES: [&str; 2] = ["main.c", "main.cpp"];

static PID_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:==|--)\d+(?:==|--) ?").expect("pid prefix regex is valid")
});

static LEAK_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[\d,]+ (?:\([^)]*\) )?bytes in [\d,]+ blocks? are (definitely|indirectly|possibly) lost")
        .expect("leak header regex is valid")
});

static ERROR_SUMMARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^ERROR SUMMARY: ([\d,]+) errors?").expect("error summary regex is valid")
});

/// `at 0xADDR: rest` or `by 0xADDR: rest`, with its indent
static FRAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\s*)(at|by) 0x[0-9A-Fa-f]+: (.*)$").expect("frame regex is valid")
});

/// `function (location)` at the end of a frame
static FRAME_LOCATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.*?) \(([^()]*)\)$").expect("frame location regex is valid")
});

static FILE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:(.*)/)?([^/]+):(\d+)$").expect("file line regex is valid")
});

/// The stack frame shapes valgrind emits
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameShape {
    /// `main (main.c:12)`
    Source { function: String, line: u32 },
    /// `main (/tmp/snipbox/job-…/main.c:12)`
    PathSource { function: String, line: u32 },
    /// `malloc (vg_replace_malloc.c:381)`, or with a directory
    Tool {
        function: String,
        file: String,
        line: u32,
    },
    /// `__libc_start_main (in /usr/lib/libc.so.6)`
    Object { function: String, object: String },
    /// `???`
    Unknown,
}

impl FrameShape {
    /// Parse what follows `at 0xADDR: `
    pub fn parse(rest: &str) -> FrameShape {
        let rest = rest.trim();
        let Some(caps) = FRAME_LOCATION.captures(rest) else {
            return FrameShape::Unknown;
        };
        let function = caps.get(1).map_or("???", |m| m.as_str()).to_string();
        let location = caps.get(2).map_or("", |m| m.as_str());

        if let Some(object) = location.strip_prefix("in ") {
            let object = object.rsplit('/').next().unwrap_or(object).to_string();
            return FrameShape::Object { function, object };
        }

        let Some(caps) = FILE_LINE.captures(location) else {
            return FrameShape::Unknown;
        };
        let has_dir = caps.get(1).is_some();
        let file = caps.get(2).map_or("", |m| m.as_str());
        let Some(line) = caps.get(3).and_then(|m| m.as_str().parse().ok()) else {
            return FrameShape::Unknown;
        };

        if USER_SOURCES.contains(&file) {
            if has_dir {
                FrameShape::PathSource { function, line }
            } else {
                FrameShape::Source { function, line }
            }
        } else {
            FrameShape::Tool {
                function,
                file: file.to_string(),
                line,
            }
        }
    }

    /// Path-free rendering, without the address
    pub fn render(&self, verb: &str) -> String {
        match self {
            FrameShape::Source { function, line } | FrameShape::PathSource { function, line } => {
                format!("{verb} {function} (line: {line})")
            }
            FrameShape::Tool {
                function,
                file,
                line,
            } => format!("{verb} {function} ({file}:{line})"),
            FrameShape::Object { function, object } => {
                format!("{verb} {function} (in {object})")
            }
            FrameShape::Unknown => format!("{verb} ???"),
        }
    }
}

/// What a single log line is
#[derive(Debug, PartialEq, Eq)]
enum LineShape {
    Blank,
    HeapSummary,
    LeakHeader { definite: bool },
    ErrorSummary { errors: u64 },
    AllFreed,
    Frame { rendered: String },
    Other,
}

impl LineShape {
    fn of(line: &str) -> LineShape {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return LineShape::Blank;
        }
        if trimmed.starts_with(HEAP_SUMMARY) {
            return LineShape::HeapSummary;
        }
        if trimmed.starts_with(ALL_FREED) {
            return LineShape::AllFreed;
        }
        if let Some(caps) = LEAK_HEADER.captures(trimmed) {
            let definite = caps.get(1).is_some_and(|m| m.as_str() == "definitely");
            return LineShape::LeakHeader { definite };
        }
        if let Some(caps) = ERROR_SUMMARY.captures(trimmed) {
            let errors = caps
                .get(1)
                .map(|m| m.as_str().replace(',', ""))
                .and_then(|digits| digits.parse().ok())
                .unwrap_or(u64::MAX);
            return LineShape::ErrorSummary { errors };
        }
        if let Some(caps) = FRAME.captures(line) {
            let indent = caps.get(1).map_or("", |m| m.as_str());
            let verb = caps.get(2).map_or("at", |m| m.as_str());
            let rest = caps.get(3).map_or("", |m| m.as_str());
            let rendered = format!("{indent}{}", FrameShape::parse(rest).render(verb));
            return LineShape::Frame { rendered };
        }
        LineShape::Other
    }
}

/// A loss record being collected up to the next blank line
struct LeakBlock {
    tag: LineTag,
    lines: Vec<String>,
}

impl LeakBlock {
    fn finish(self) -> ReportLine {
        ReportLine::new(self.lines.join("\n"), self.tag)
    }
}

/// Classify a valgrind log
pub fn classify_memcheck(raw: &str) -> Vec<ReportLine> {
    let lines: Vec<&str> = raw
        .lines()
        .map(|line| match PID_PREFIX.find(line) {
            Some(prefix) => &line[prefix.end()..],
            None => line,
        })
        .collect();

    let start = summary_start(&lines);
    let mut out = Vec::new();
    let mut leak: Option<LeakBlock> = None;

    for line in &lines[start..] {
        let shape = LineShape::of(line);

        if let Some(mut block) = leak.take() {
            match shape {
                LineShape::Blank => out.push(block.finish()),
                LineShape::Frame { rendered } => {
                    block.lines.push(rendered);
                    leak = Some(block);
                }
                _ => {
                    block.lines.push(line.trim_end().to_string());
                    leak = Some(block);
                }
            }
            continue;
        }

        match shape {
            LineShape::Blank => {}
            LineShape::LeakHeader { definite } => {
                leak = Some(LeakBlock {
                    tag: if definite {
                        LineTag::Leak
                    } else {
                        LineTag::Warning
                    },
                    lines: vec![line.trim().to_string()],
                });
            }
            LineShape::ErrorSummary { errors } => {
                let tag = if errors == 0 {
                    LineTag::Success
                } else {
                    LineTag::Failure
                };
                out.push(ReportLine::new(line.trim(), tag));
            }
            LineShape::AllFreed => out.push(ReportLine::new(line.trim(), LineTag::Success)),
            LineShape::Frame { rendered } => out.push(ReportLine::plain(rendered)),
            LineShape::HeapSummary | LineShape::Other => {
                out.push(ReportLine::plain(line.trim_end()));
            }
        }
    }

    if let Some(block) = leak {
        out.push(block.finish());
    }
    out
}

/// Index of the heap summary, or of the first line after the preamble
fn summary_start(lines: &[&str]) -> usize {
    if let Some(index) = lines
        .iter()
        .position(|line| line.trim_start().starts_with(HEAP_SUMMARY))
    {
        return index;
    }

    // The preamble ends at the first blank line after `Command:`
    let Some(command) = lines
        .iter()
        .position(|line| line.starts_with("Command:"))
    else {
        return 0;
    };
    lines[command..]
        .iter()
        .position(|line| line.trim().is_empty())
        .map_or(lines.len(), |offset| command + offset)
}
