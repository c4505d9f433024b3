use snipbox::job::{Action, Compiler, Job, JobRequest, Language};
use snipbox::report::{LineTag, Section};
use snipbox::runner::{JobContext, JobError, Runner, report_status};
use snipbox::types::ExecutionOutcome;

use super::{fixture_job, fixture_source, test_config};

#[tokio::test]
async fn test_hello_c() {
    let root = tempfile::tempdir().unwrap();
    let runner = Runner::new(test_config(root.path()));

    let report = runner
        .run_job(&fixture_job("hello.c", Action::Compile), JobContext::default())
        .await
        .expect("job failed");

    assert_eq!(
        report.outcome,
        Some(ExecutionOutcome::Completed {
            exit_code: 0,
            stdout: "Hello, World!\n".to_string()
        })
    );
    assert_eq!(report_status(&report), 200);
}

#[tokio::test]
async fn test_hello_cpp_with_clang() {
    let root = tempfile::tempdir().unwrap();
    let runner = Runner::new(test_config(root.path()));
    let job = Job::from_request(JobRequest {
        code: fixture_source("hello.cpp"),
        lang: Language::Cpp,
        compiler: Compiler::Clang,
        optimization: "-O2".to_string(),
        action: Action::Compile,
    })
    .unwrap();

    let report = runner.run_job(&job, JobContext::default()).await.unwrap();
    assert!(report.to_text().contains("Hello, World!"));
}

#[tokio::test]
async fn test_compile_error_is_client_failure() {
    let root = tempfile::tempdir().unwrap();
    let runner = Runner::new(test_config(root.path()));

    let err = runner
        .run_job(&fixture_job("compile_error.c", Action::Compile), JobContext::default())
        .await
        .unwrap_err();

    let JobError::CompileFailed { ref report } = err else {
        panic!("expected compile failure, got {err:?}");
    };
    assert_eq!(err.status_code(), 400);
    let Section::Diagnostics { ref lines } = report.sections[0] else {
        panic!("expected diagnostics");
    };
    assert!(lines.iter().any(|line| line.tag == LineTag::Error));
    // no workspace path leaks into diagnostics
    assert!(!report.to_text().contains(&*root.path().to_string_lossy()));
}

#[tokio::test]
async fn test_warnings_do_not_stop_the_run() {
    let root = tempfile::tempdir().unwrap();
    let runner = Runner::new(test_config(root.path()));

    let report = runner
        .run_job(&fixture_job("warning.c", Action::Compile), JobContext::default())
        .await
        .unwrap();

    let Section::Diagnostics { ref lines } = report.sections[0] else {
        panic!("expected warnings first");
    };
    assert!(lines.iter().any(|line| line.tag == LineTag::Warning));
    assert!(report.outcome.as_ref().is_some_and(|o| o.is_success()));
}

#[tokio::test]
async fn test_non_zero_exit_is_reported() {
    let root = tempfile::tempdir().unwrap();
    let runner = Runner::new(test_config(root.path()));

    let report = runner
        .run_job(&fixture_job("exit_code.c", Action::Compile), JobContext::default())
        .await
        .unwrap();

    assert!(matches!(
        report.outcome,
        Some(ExecutionOutcome::Completed { exit_code: 3, .. })
    ));
    assert_eq!(report_status(&report), 422);
}

#[tokio::test]
async fn test_segfault_is_signaled() {
    let root = tempfile::tempdir().unwrap();
    let runner = Runner::new(test_config(root.path()));

    let report = runner
        .run_job(&fixture_job("segfault.c", Action::Compile), JobContext::default())
        .await
        .unwrap();

    assert_eq!(
        report.outcome,
        Some(ExecutionOutcome::Signaled { signal: 11 })
    );
}

#[tokio::test]
async fn test_assembly() {
    let root = tempfile::tempdir().unwrap();
    let runner = Runner::new(test_config(root.path()));

    let report = runner
        .run_job(&fixture_job("hello.c", Action::Assembly), JobContext::default())
        .await
        .unwrap();

    let Section::Assembly { ref text } = report.sections[0] else {
        panic!("expected assembly");
    };
    assert!(text.contains("main:"));
    assert!(!text.contains(".cfi_startproc"));
    assert!(report.outcome.is_none());
}

#[tokio::test]
async fn test_both_has_assembly_then_output() {
    let root = tempfile::tempdir().unwrap();
    let runner = Runner::new(test_config(root.path()));

    let report = runner
        .run_job(&fixture_job("hello.c", Action::Both), JobContext::default())
        .await
        .unwrap();

    assert!(matches!(report.sections[0], Section::Assembly { .. }));
    assert!(
        report
            .sections
            .iter()
            .any(|section| matches!(section, Section::ProgramOutput { text } if text == "Hello, World!\n"))
    );
}
