use std::path::PathBuf;

use nearby_cli_helpers::LogLevel;
use serde::{Deserialize, Serialize};

/// nearby_load_test configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Base URL of the social graph HTTP API
    pub http_server_url: String,
    /// URL of the WebSocket echo endpoint
    pub ws_server_url: String,
    pub log_level: LogLevel,
    /// Number of runtime worker threads
    pub num_workers: usize,
    /// Number of virtual users to simulate
    pub num_users: usize,
    /// Milliseconds to wait between spawning two virtual users
    pub user_spawn_interval_ms: u64,
    /// Run duration (quit and generate report after this many seconds).
    /// Zero means run until interrupted.
    pub duration: u64,
    pub think_time: ThinkTimeConfig,
    pub tasks: TaskConfig,
    pub http: HttpConfig,
    pub ws: WsConfig,
    pub statistics: StatisticsConfig,
}

impl nearby_cli_helpers::Config for Config {
    fn get_log_level(&self) -> Option<LogLevel> {
        Some(self.log_level)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.tasks.weight_friendship + self.tasks.weight_echo == 0 {
            anyhow::bail!("at least one task weight must be larger than zero");
        }
        if self.think_time.min_ms > self.think_time.max_ms {
            anyhow::bail!(
                "think_time.min_ms ({}) is larger than think_time.max_ms ({})",
                self.think_time.min_ms,
                self.think_time.max_ms
            );
        }
        if self.num_workers == 0 {
            anyhow::bail!("num_workers must be larger than zero");
        }
        if self.statistics.interval == 0 {
            anyhow::bail!("statistics.interval must be larger than zero");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_server_url: "http://127.0.0.1:8080".into(),
            ws_server_url: "ws://127.0.0.1:8080".into(),
            log_level: LogLevel::Warn,
            num_workers: 1,
            num_users: 16,
            user_spawn_interval_ms: 100,
            duration: 0,
            think_time: ThinkTimeConfig::default(),
            tasks: TaskConfig::default(),
            http: HttpConfig::default(),
            ws: WsConfig::default(),
            statistics: StatisticsConfig::default(),
        }
    }
}

/// Pause between two consecutive tasks of a virtual user, drawn uniformly
/// from [min_ms, max_ms]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ThinkTimeConfig {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl Default for ThinkTimeConfig {
    fn default() -> Self {
        Self {
            min_ms: 5_000,
            max_ms: 15_000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TaskConfig {
    /// Probability that a tick runs the friend discovery and request flow,
    /// as part of sum of the various weight arguments.
    ///
    /// Virtual users only register over HTTP when this is larger than zero.
    pub weight_friendship: usize,
    /// Probability that a tick sends a WebSocket echo message, as part of
    /// sum of the various weight arguments.
    ///
    /// Virtual users only open a WebSocket connection when this is larger
    /// than zero.
    pub weight_echo: usize,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            weight_friendship: 1,
            weight_echo: 0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HttpConfig {
    /// Give up on a request after this many milliseconds
    pub request_timeout_ms: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 10_000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WsConfig {
    /// Body of every echo message
    pub message: String,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            message: "hello, world".into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StatisticsConfig {
    /// Seconds between statistics printouts
    pub interval: u64,
    /// Write every raw event to this file as a line of JSON
    pub events_file: Option<PathBuf>,
}

impl Default for StatisticsConfig {
    fn default() -> Self {
        Self {
            interval: 5,
            events_file: None,
        }
    }
}
