//! Static analysis findings

use crate::report::diagnostics::diagnostic_line;
use crate::report::{LineTag, NO_ISSUES, ReportLine};

/// Finding ids that say nothing about the submitted code
const NOISE: [&str; 3] = ["missingInclude", "checkersReport", "unmatchedSuppression"];

/// Severities that are not `error:` but still deserve a warning tag
const SOFT_SEVERITIES: [&str; 3] = ["style:", "performance:", "portability:"];

/// Classify linter output.
///
/// Known-noisy findings and blank lines are dropped. When nothing survives,
/// the result is a single explicit [`LineTag::NoIssues`] line rather than an
/// empty list.
pub fn classify_lint(raw: &str) -> Vec<ReportLine> {
    let lines: Vec<ReportLine> = raw
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter(|line| !NOISE.iter().any(|id| line.contains(id)))
        .map(lint_line)
        .collect();

    if lines.is_empty() {
        return vec![ReportLine::new(NO_ISSUES, LineTag::NoIssues)];
    }
    lines
}

fn lint_line(line: &str) -> ReportLine {
    let mut classified = diagnostic_line(line);
    if classified.tag == LineTag::Plain
        && SOFT_SEVERITIES
            .iter()
            .any(|severity| classified.text.contains(severity))
    {
        classified.tag = LineTag::Warning;
    }
    classified
}
