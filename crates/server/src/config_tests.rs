// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use clap::Parser;

fn parse(args: &[&str]) -> Config {
    let mut full = vec!["apiary"];
    full.extend_from_slice(args);
    Config::try_parse_from(full).expect("config parses")
}

#[test]
fn requires_a_transport() {
    let config = parse(&[]);
    assert!(config.validate().is_err());
    assert!(parse(&["--port", "9900"]).validate().is_ok());
    assert!(parse(&["--stdio"]).validate().is_ok());
}

#[test]
fn port_zero_rejected() {
    let config = parse(&["--port", "0"]);
    let err = config.validate().expect_err("port 0 invalid");
    assert!(err.to_string().contains("65535"));
}

#[test]
fn defaults_match_spec() {
    let config = parse(&["--port", "9900"]);
    assert_eq!(config.max_commands_per_minute, 120);
    assert_eq!(config.max_in_flight_commands, 1000);
    assert_eq!(config.max_command_outcomes, 10_000);
    assert_eq!(config.breaker_failure_threshold, 5);
    assert_eq!(config.breaker_success_threshold, 2);
    assert_eq!(config.lock_max_waiters, 100);
    assert_eq!(config.ui_max_pending, 1000);

    let governor = config.governor();
    assert_eq!(governor.rate_window, Duration::from_secs(60));
    let locks = config.locks();
    assert_eq!(locks.acquire_timeout, Duration::from_secs(5));
    let breakers = config.breakers();
    assert_eq!(breakers.slow_call_threshold, Some(Duration::from_secs(30)));
}

#[test]
fn slow_call_zero_disables() {
    let config = parse(&["--port", "9900", "--breaker-slow-call-secs", "0"]);
    assert_eq!(config.breakers().slow_call_threshold, None);
}

#[test]
fn invalid_log_format_rejected() {
    let config = parse(&["--port", "9900", "--log-format", "yaml"]);
    assert!(config.validate().is_err());
}

#[test]
fn data_dir_defaults_under_home() {
    let config = parse(&["--port", "9900"]);
    let dir = config.data_dir();
    assert!(dir.ends_with(".apiary") || config.data_dir.is_some());

    let explicit = parse(&["--port", "9900", "--data-dir", "/tmp/apiary-test"]);
    assert_eq!(explicit.data_dir(), PathBuf::from("/tmp/apiary-test"));
}
