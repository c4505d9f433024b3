use std::time::{Duration, Instant};

use snipbox::job::Action;
use snipbox::runner::{JobContext, Runner};
use snipbox::types::ExecutionOutcome;

use super::{fixture_job, test_config};

#[tokio::test]
async fn test_cpu_bound_loop_times_out() {
    let root = tempfile::tempdir().unwrap();
    let mut config = test_config(root.path());
    config.limits.time_limit = Some(1.0);
    config.limits.wall_time_limit = Some(2.0);
    let runner = Runner::new(config);

    let started = Instant::now();
    let report = runner
        .run_job(&fixture_job("infinite_loop.c", Action::Compile), JobContext::default())
        .await
        .unwrap();

    assert_eq!(report.outcome, Some(ExecutionOutcome::TimedOut));
    // compile time plus the wall ceiling plus a little slack
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn test_sleeping_program_times_out_on_wall_clock() {
    let root = tempfile::tempdir().unwrap();
    let mut config = test_config(root.path());
    config.limits.time_limit = Some(1.0);
    config.limits.wall_time_limit = Some(1.5);
    let runner = Runner::new(config);

    let report = runner
        .run_job(&fixture_job("sleep_forever.c", Action::Compile), JobContext::default())
        .await
        .unwrap();

    assert_eq!(report.outcome, Some(ExecutionOutcome::TimedOut));
}

#[tokio::test]
async fn test_unbounded_allocation_is_memory_exceeded() {
    let root = tempfile::tempdir().unwrap();
    let runner = Runner::new(test_config(root.path()));

    let report = runner
        .run_job(&fixture_job("alloc_forever.cpp", Action::Compile), JobContext::default())
        .await
        .unwrap();

    assert_eq!(report.outcome, Some(ExecutionOutcome::MemoryExceeded));
}

#[tokio::test]
async fn test_c_allocation_crash_is_memory_exceeded() {
    let root = tempfile::tempdir().unwrap();
    let runner = Runner::new(test_config(root.path()));

    // malloc returns NULL at the ceiling and memset faults on it
    let report = runner
        .run_job(&fixture_job("alloc_touch.c", Action::Compile), JobContext::default())
        .await
        .unwrap();

    assert_eq!(report.outcome, Some(ExecutionOutcome::MemoryExceeded));
}

#[tokio::test]
async fn test_c_checked_allocation_failure_is_memory_exceeded() {
    let root = tempfile::tempdir().unwrap();
    let runner = Runner::new(test_config(root.path()));

    let report = runner
        .run_job(&fixture_job("alloc_checked.c", Action::Compile), JobContext::default())
        .await
        .unwrap();

    assert_eq!(report.outcome, Some(ExecutionOutcome::MemoryExceeded));
}
