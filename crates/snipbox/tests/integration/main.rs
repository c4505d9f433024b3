//! Integration tests for snipbox
//!
//! These tests drive the real toolchain: gcc, g++, clang++, clang-format,
//! cppcheck and valgrind must be on PATH.
//! Run with: cargo test -p snipbox --features integration-tests
//!
//! Debugger and tracer tests need ptrace and are marked `#[ignore]`. To
//! include them:
//!    cargo test -p snipbox --features integration-tests -- --include-ignored

#![cfg(feature = "integration-tests")]

use std::fs;
use std::path::Path;

use snipbox::config::Config;
use snipbox::job::{Action, Compiler, Job, JobRequest, Language};

mod analysis;
mod compile_and_run;
mod config_loading;
mod interactive;
mod resource_limits;
mod workspace_cleanup;

const FIXTURES_PATH: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures");

/// Helper to get fixture file content
pub(crate) fn fixture_source(name: &str) -> String {
    let path = format!("{FIXTURES_PATH}/sources/{name}");
    fs::read_to_string(&path).unwrap_or_else(|e| panic!("Failed to read fixture {path}: {e}"))
}

/// Default configuration with workspaces under `root`
pub(crate) fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.temp_root = root.to_path_buf();
    config
}

/// Job for a fixture, language taken from its extension
pub(crate) fn fixture_job(name: &str, action: Action) -> Job {
    let lang = if name.ends_with(".cpp") {
        Language::Cpp
    } else {
        Language::C
    };
    Job::from_request(JobRequest {
        code: fixture_source(name),
        lang,
        compiler: Compiler::Gcc,
        optimization: "-O0".to_string(),
        action,
    })
    .expect("fixture job is valid")
}

/// Number of entries left under a workspace root
pub(crate) fn leftover_workspaces(root: &Path) -> usize {
    fs::read_dir(root).map(|dir| dir.count()).unwrap_or(0)
}
