use std::time::Duration;

use snipbox::job::Action;
use snipbox::runner::{JobContext, Runner};

use super::{fixture_job, leftover_workspaces, test_config};

#[tokio::test]
async fn test_no_workspace_survives_any_outcome() {
    let root = tempfile::tempdir().unwrap();
    let mut config = test_config(root.path());
    config.limits.time_limit = Some(1.0);
    config.limits.wall_time_limit = Some(1.5);
    let runner = Runner::new(config);

    let cases = [
        ("hello.c", Action::Compile),
        ("compile_error.c", Action::Compile),
        ("infinite_loop.c", Action::Compile),
        ("hello.c", Action::Assembly),
        ("unformatted.c", Action::Format),
        ("clean.c", Action::Lint),
    ];
    for (fixture, action) in cases {
        let _ = runner
            .run_job(&fixture_job(fixture, action), JobContext::default())
            .await;
        assert_eq!(
            leftover_workspaces(root.path()),
            0,
            "{fixture} ({action}) left a workspace behind"
        );
    }
    assert_eq!(runner.pool().available(), runner.pool().capacity());
}

#[tokio::test]
async fn test_abandoned_job_is_cleaned_up() {
    let root = tempfile::tempdir().unwrap();
    let runner = Runner::new(test_config(root.path()));
    let job = fixture_job("sleep_forever.c", Action::Compile);

    let abandoned =
        tokio::time::timeout(Duration::from_secs(3), runner.run_job(&job, JobContext::default()))
            .await;
    assert!(abandoned.is_err());
    assert_eq!(leftover_workspaces(root.path()), 0);
    assert_eq!(runner.pool().available(), runner.pool().capacity());
}
