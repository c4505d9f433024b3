use std::time::Duration;

use snipbox::config::Config;

use super::FIXTURES_PATH;

fn fixture_config(name: &str) -> String {
    format!("{FIXTURES_PATH}/configs/{name}")
}

#[test]
fn test_load_valid_config() {
    let config = Config::from_file(fixture_config("valid_full.toml")).expect("Failed to load config");

    assert_eq!(config.max_concurrent_jobs, 2);
    assert_eq!(config.queue_timeout(), Duration::from_millis(1500));
    assert_eq!(config.source_limits.max_lines, 200);
    assert_eq!(config.limits.time_limit, Some(2.0));
    assert_eq!(config.limits.max_processes, Some(16));
    assert_eq!(config.tools.gcc, "gcc-13");
    assert_eq!(config.tools.gxx, "g++");
    assert_eq!(config.tools.c_standard, "c11");
    assert_eq!(config.tools.format_style, "Google");
    assert_eq!(config.session.heartbeat_grace(), Duration::from_secs(5));
    assert_eq!(config.server.bind, "127.0.0.1:9000");
}

#[test]
fn test_load_minimal_config() {
    let config = Config::from_file(fixture_config("valid_minimal.toml")).expect("Failed to load config");

    assert_eq!(config.limits.time_limit, Some(1.0));
    assert_eq!(config.source_limits.max_chars, 50_000);
    assert_eq!(config.tools.cppcheck, "cppcheck");
}

#[test]
fn test_wall_limit_must_exceed_cpu_limit() {
    assert!(Config::from_file(fixture_config("invalid_wall_limit.toml")).is_err());
}

#[test]
fn test_grace_must_fit_in_interval() {
    assert!(Config::from_file(fixture_config("invalid_heartbeat.toml")).is_err());
}

#[test]
fn test_tool_names_must_not_be_empty() {
    assert!(Config::from_file(fixture_config("invalid_empty_tool.toml")).is_err());
}

#[test]
fn test_missing_file() {
    assert!(Config::from_file(fixture_config("does_not_exist.toml")).is_err());
}
