use snipbox::job::{Action, Job, JobRequest, Language};
use snipbox::report::{LineTag, NO_ISSUES, Section};
use snipbox::runner::{JobContext, Runner};

use super::{fixture_job, test_config};

fn formatted(report: &snipbox::report::Report) -> String {
    match &report.sections[0] {
        Section::Formatted { text } => text.clone(),
        other => panic!("expected formatted text, got {other:?}"),
    }
}

#[tokio::test]
async fn test_format_is_idempotent() {
    let root = tempfile::tempdir().unwrap();
    let runner = Runner::new(test_config(root.path()));

    let first = runner
        .run_job(&fixture_job("unformatted.c", Action::Format), JobContext::default())
        .await
        .unwrap();
    let once = formatted(&first);
    assert_ne!(once, super::fixture_source("unformatted.c"));

    let again = Job::from_request(JobRequest {
        code: once.clone(),
        lang: Language::C,
        compiler: Default::default(),
        optimization: "-O0".to_string(),
        action: Action::Format,
    })
    .unwrap();
    let second = runner.run_job(&again, JobContext::default()).await.unwrap();
    assert_eq!(formatted(&second), once);
}

#[tokio::test]
async fn test_lint_clean_source_is_explicit() {
    let root = tempfile::tempdir().unwrap();
    let runner = Runner::new(test_config(root.path()));

    let report = runner
        .run_job(&fixture_job("clean.c", Action::Lint), JobContext::default())
        .await
        .unwrap();

    assert!(report.is_clean());
    assert_eq!(report.to_text(), format!("{NO_ISSUES}\n"));
}

#[tokio::test]
async fn test_lint_finds_out_of_bounds_write() {
    let root = tempfile::tempdir().unwrap();
    let runner = Runner::new(test_config(root.path()));

    let report = runner
        .run_job(&fixture_job("lint_issue.c", Action::Lint), JobContext::default())
        .await
        .unwrap();

    assert!(!report.is_clean());
    let Section::Lint { ref lines } = report.sections[0] else {
        panic!("expected lint section");
    };
    assert!(lines.iter().any(|line| line.tag == LineTag::Error));
    assert!(lines.iter().all(|line| !line.text.contains("main.c")));
}

#[tokio::test]
async fn test_memcheck_reports_definite_leak() {
    let root = tempfile::tempdir().unwrap();
    let runner = Runner::new(test_config(root.path()));

    let report = runner
        .run_job(&fixture_job("leak.c", Action::Memcheck), JobContext::default())
        .await
        .unwrap();

    let lines = report
        .sections
        .iter()
        .find_map(|section| match section {
            Section::Memcheck { lines } => Some(lines),
            _ => None,
        })
        .expect("memcheck section");

    assert!(lines[0].text.starts_with("HEAP SUMMARY"));
    assert!(lines.iter().any(|line| line.tag == LineTag::Leak
        && line.text.contains("40 bytes in 2 blocks are definitely lost")));
    assert!(lines.iter().any(|line| line.tag == LineTag::Failure));
    assert!(
        !report
            .to_text()
            .contains(&*root.path().to_string_lossy())
    );
}
