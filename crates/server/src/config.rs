// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::breaker::BreakerConfig;
use crate::engine::TimeoutPolicy;
use crate::governor::GovernorConfig;
use crate::replay::ReplayConfig;
use crate::session_lock::LockConfig;
use crate::ui::UiConfig;

/// Session multiplexer for AI coding agents.
#[derive(Debug, Clone, Parser)]
#[command(name = "apiary", version, about)]
pub struct Config {
    /// TCP port for the framed socket transport.
    #[arg(long, env = "APIARY_PORT")]
    pub port: Option<u16>,

    /// Host address to bind to.
    #[arg(long, env = "APIARY_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Serve the newline-delimited protocol on stdin/stdout.
    #[arg(long, env = "APIARY_STDIO")]
    pub stdio: bool,

    /// Data directory for persisted session metadata.
    /// Defaults to `$HOME/.apiary`.
    #[arg(long, env = "APIARY_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Maximum concurrent agent sessions.
    #[arg(long, env = "APIARY_MAX_SESSIONS", default_value = "50")]
    pub max_sessions: usize,

    /// Maximum concurrent transport connections.
    #[arg(long, env = "APIARY_MAX_CONNECTIONS", default_value = "100")]
    pub max_connections: usize,

    /// Maximum encoded frame size in bytes.
    #[arg(long, env = "APIARY_MAX_MESSAGE_BYTES", default_value = "10485760")]
    pub max_message_bytes: usize,

    /// Per-session command budget per sliding minute. The server-wide
    /// window caps at this budget times `--max-sessions`, so every session
    /// slot keeps its full allowance.
    #[arg(long, env = "APIARY_MAX_COMMANDS_PER_MINUTE", default_value = "120")]
    pub max_commands_per_minute: usize,

    /// Server-wide budget for extension_ui_response commands per sliding
    /// minute (a single global window, not per session).
    #[arg(long, env = "APIARY_MAX_UI_RESPONSES_PER_MINUTE", default_value = "30")]
    pub max_ui_responses_per_minute: usize,

    /// Maximum commands executing concurrently across all lanes.
    #[arg(long, env = "APIARY_MAX_IN_FLIGHT", default_value = "1000")]
    pub max_in_flight_commands: usize,

    /// Retained command outcomes (oldest evicted first).
    #[arg(long, env = "APIARY_MAX_OUTCOMES", default_value = "10000")]
    pub max_command_outcomes: usize,

    /// Idempotency cache entry lifetime in seconds.
    #[arg(long, env = "APIARY_IDEMPOTENCY_TTL_SECS", default_value = "300")]
    pub idempotency_ttl_secs: u64,

    /// Timeout for fast reads in seconds.
    #[arg(long, env = "APIARY_SHORT_TIMEOUT_SECS", default_value = "30")]
    pub short_timeout_secs: u64,

    /// Timeout for model calls and other slow commands in seconds.
    #[arg(long, env = "APIARY_DEFAULT_TIMEOUT_SECS", default_value = "300")]
    pub default_timeout_secs: u64,

    /// Per-dependency wait budget in seconds.
    #[arg(long, env = "APIARY_DEPENDENCY_TIMEOUT_SECS", default_value = "30")]
    pub dependency_timeout_secs: u64,

    /// Session lock acquisition timeout in seconds.
    #[arg(long, env = "APIARY_LOCK_TIMEOUT_SECS", default_value = "5")]
    pub lock_timeout_secs: u64,

    /// Maximum queued waiters per session lock key.
    #[arg(long, env = "APIARY_LOCK_MAX_WAITERS", default_value = "100")]
    pub lock_max_waiters: usize,

    /// Lock hold duration that triggers a diagnostic, in seconds.
    #[arg(long, env = "APIARY_LOCK_HOLD_WARNING_SECS", default_value = "30")]
    pub lock_hold_warning_secs: u64,

    /// Failures within the window that open a provider circuit.
    #[arg(long, env = "APIARY_BREAKER_FAILURE_THRESHOLD", default_value = "5")]
    pub breaker_failure_threshold: u32,

    /// Circuit breaker failure window in seconds.
    #[arg(long, env = "APIARY_BREAKER_WINDOW_SECS", default_value = "60")]
    pub breaker_window_secs: u64,

    /// Time an open circuit waits before admitting a probe, in seconds.
    #[arg(long, env = "APIARY_BREAKER_RECOVERY_SECS", default_value = "30")]
    pub breaker_recovery_secs: u64,

    /// Concurrent probes admitted while half-open.
    #[arg(long, env = "APIARY_BREAKER_HALF_OPEN_MAX_CALLS", default_value = "5")]
    pub breaker_half_open_max_calls: u32,

    /// Probe successes required to close a half-open circuit.
    #[arg(long, env = "APIARY_BREAKER_SUCCESS_THRESHOLD", default_value = "2")]
    pub breaker_success_threshold: u32,

    /// Latency that counts a completed call as slow, in seconds (0 disables).
    #[arg(long, env = "APIARY_BREAKER_SLOW_CALL_SECS", default_value = "30")]
    pub breaker_slow_call_secs: u64,

    /// Idle period after which a provider's breaker is reaped, in seconds.
    #[arg(long, env = "APIARY_BREAKER_IDLE_REAP_SECS", default_value = "3600")]
    pub breaker_idle_reap_secs: u64,

    /// Sessions without a heartbeat for this long are zombies, in seconds.
    #[arg(long, env = "APIARY_ZOMBIE_TIMEOUT_SECS", default_value = "300")]
    pub zombie_timeout_secs: u64,

    /// Hard session lifetime ceiling in seconds.
    #[arg(long, env = "APIARY_MAX_SESSION_LIFETIME_SECS", default_value = "86400")]
    pub max_session_lifetime_secs: u64,

    /// Maintenance sweep cadence in seconds.
    #[arg(long, env = "APIARY_SWEEP_INTERVAL_SECS", default_value = "300")]
    pub sweep_interval_secs: u64,

    /// Default extension UI request timeout in seconds.
    #[arg(long, env = "APIARY_UI_REQUEST_TIMEOUT_SECS", default_value = "60")]
    pub ui_request_timeout_secs: u64,

    /// Maximum pending extension UI requests.
    #[arg(long, env = "APIARY_UI_MAX_PENDING", default_value = "1000")]
    pub ui_max_pending: usize,

    /// Graceful shutdown drain window in seconds.
    #[arg(long, env = "APIARY_SHUTDOWN_DRAIN_SECS", default_value = "10")]
    pub shutdown_drain_secs: u64,

    /// Log format (json or text).
    #[arg(long, env = "APIARY_LOG_FORMAT", default_value = "json")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "APIARY_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.port.is_none() && !self.stdio {
            anyhow::bail!("either --port or --stdio must be specified");
        }
        if self.port == Some(0) {
            anyhow::bail!("--port must be in [1, 65535]");
        }
        if self.max_sessions == 0 {
            anyhow::bail!("--max-sessions must be at least 1");
        }
        if self.max_connections == 0 {
            anyhow::bail!("--max-connections must be at least 1");
        }
        match self.log_format.as_str() {
            "json" | "text" => {}
            other => anyhow::bail!("invalid log format: {other}"),
        }
        Ok(())
    }

    /// Resolve the data directory, defaulting under `$HOME`.
    pub fn data_dir(&self) -> PathBuf {
        if let Some(dir) = &self.data_dir {
            return dir.clone();
        }
        let home = std::env::var_os("HOME").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));
        home.join(".apiary")
    }

    pub fn governor(&self) -> GovernorConfig {
        GovernorConfig {
            max_sessions: self.max_sessions,
            max_connections: self.max_connections,
            max_message_bytes: self.max_message_bytes,
            max_commands_per_minute: self.max_commands_per_minute,
            max_ui_responses_per_minute: self.max_ui_responses_per_minute,
            rate_window: Duration::from_secs(60),
            zombie_timeout: Duration::from_secs(self.zombie_timeout_secs),
            max_session_lifetime: Duration::from_secs(self.max_session_lifetime_secs),
        }
    }

    pub fn locks(&self) -> LockConfig {
        LockConfig {
            acquire_timeout: Duration::from_secs(self.lock_timeout_secs),
            max_waiters: self.lock_max_waiters,
            hold_warning: Duration::from_secs(self.lock_hold_warning_secs),
        }
    }

    pub fn replay(&self) -> ReplayConfig {
        ReplayConfig {
            max_outcomes: self.max_command_outcomes,
            max_in_flight: self.max_in_flight_commands,
            idempotency_ttl: Duration::from_secs(self.idempotency_ttl_secs),
        }
    }

    pub fn timeouts(&self) -> TimeoutPolicy {
        TimeoutPolicy::new(
            Duration::from_secs(self.short_timeout_secs),
            Duration::from_secs(self.default_timeout_secs),
            Duration::from_secs(self.dependency_timeout_secs),
        )
    }

    pub fn breakers(&self) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: self.breaker_failure_threshold,
            window: Duration::from_secs(self.breaker_window_secs),
            recovery_timeout: Duration::from_secs(self.breaker_recovery_secs),
            half_open_max_calls: self.breaker_half_open_max_calls,
            success_threshold: self.breaker_success_threshold,
            slow_call_threshold: if self.breaker_slow_call_secs == 0 {
                None
            } else {
                Some(Duration::from_secs(self.breaker_slow_call_secs))
            },
            idle_reap: Duration::from_secs(self.breaker_idle_reap_secs),
        }
    }

    pub fn ui(&self) -> UiConfig {
        UiConfig {
            request_timeout: Duration::from_secs(self.ui_request_timeout_secs),
            max_pending: self.ui_max_pending,
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
