//! Normalised reports
//!
//! Raw tool output is turned into a [`Report`]: a list of sections, each
//! either untouched text (assembly, formatted source, program output) or
//! classified lines carrying a tag and highlight spans. Classification works
//! line by line: every line is assigned a shape, and each shape has its own
//! rewrite. No report contains a workspace path.

use serde::Serialize;

use crate::types::ExecutionOutcome;

mod diagnostics;
mod lint;
mod memcheck;

pub use crate::report::diagnostics::classify_compiler;
pub use crate::report::lint::classify_lint;
pub use crate::report::memcheck::{FrameShape, classify_memcheck};

/// Text of the line emitted when a linter has nothing to say
pub const NO_ISSUES: &str = "No issues found.";

/// Which tool produced the text being classified
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputSource {
    Compiler,
    Linter,
    LeakChecker,
}

/// Classify raw tool output into a single-section report
pub fn classify(raw: &str, source: OutputSource) -> Report {
    let section = match source {
        OutputSource::Compiler => Section::Diagnostics {
            lines: classify_compiler(raw),
        },
        OutputSource::Linter => Section::Lint {
            lines: classify_lint(raw),
        },
        OutputSource::LeakChecker => Section::Memcheck {
            lines: classify_memcheck(raw),
        },
    };
    Report::new().with_section(section)
}

/// How a line should be rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LineTag {
    Plain,
    Error,
    Warning,
    Note,
    /// A self-contained leak block
    Leak,
    Success,
    Failure,
    /// The explicit "nothing found" marker
    NoIssues,
}

/// Highlighted region of a line, in byte offsets
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    #[serde(flatten)]
    pub kind: SpanKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SpanKind {
    Error,
    Warning,
    Note,
    Location { line: u32, column: u32 },
}

/// One classified output line
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportLine {
    pub text: String,
    pub tag: LineTag,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub spans: Vec<Span>,
}

impl ReportLine {
    pub fn new(text: impl Into<String>, tag: LineTag) -> Self {
        Self {
            text: text.into(),
            tag,
            spans: Vec::new(),
        }
    }

    pub fn plain(text: impl Into<String>) -> Self {
        Self::new(text, LineTag::Plain)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Section {
    /// Compiler warnings or errors
    Diagnostics { lines: Vec<ReportLine> },
    /// Generated assembly, verbatim
    Assembly { text: String },
    /// clang-format output, verbatim
    Formatted { text: String },
    /// What the user's program wrote to stdout
    ProgramOutput { text: String },
    /// What the user's program wrote to stderr
    ProgramErrors { text: String },
    Lint { lines: Vec<ReportLine> },
    Memcheck { lines: Vec<ReportLine> },
    /// Debugger transcript
    Debug { text: String },
    /// System call trace
    Trace { text: String },
}

impl Section {
    fn render(&self, out: &mut String) {
        match self {
            Section::Assembly { text }
            | Section::Formatted { text }
            | Section::ProgramOutput { text }
            | Section::ProgramErrors { text }
            | Section::Debug { text }
            | Section::Trace { text } => out.push_str(text),
            Section::Diagnostics { lines }
            | Section::Lint { lines }
            | Section::Memcheck { lines } => {
                for line in lines {
                    out.push_str(&line.text);
                    out.push('\n');
                }
            }
        }
    }
}

/// Result handed back to the client
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Report {
    pub sections: Vec<Section>,

    /// Set when a compiled program was executed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ExecutionOutcome>,

    /// Whether any captured stream hit the output ceiling
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
}

impl Report {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_section(mut self, section: Section) -> Self {
        self.sections.push(section);
        self
    }

    pub fn push(&mut self, section: Section) {
        self.sections.push(section);
    }

    /// Append all sections of another report
    pub fn extend(&mut self, other: Report) {
        self.sections.extend(other.sections);
        self.truncated |= other.truncated;
        if other.outcome.is_some() {
            self.outcome = other.outcome;
        }
    }

    /// Whether the report ran a program that did not exit with code 0
    pub fn has_failed_outcome(&self) -> bool {
        self.outcome
            .as_ref()
            .is_some_and(|outcome| !outcome.is_success())
    }

    /// Whether a lint section carries the explicit "no issues" marker
    pub fn is_clean(&self) -> bool {
        self.sections.iter().any(|section| {
            matches!(section, Section::Lint { lines }
                if lines.len() == 1 && lines[0].tag == LineTag::NoIssues)
        })
    }

    /// Plain text rendering of every section in order
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for section in &self.sections {
            section.render(&mut out);
        }
        if let Some(ref outcome) = self.outcome {
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(&outcome.describe());
            out.push('\n');
        }
        if self.truncated {
            out.push_str("[output truncated]\n");
        }
        out
    }
}
