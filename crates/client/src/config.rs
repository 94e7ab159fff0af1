// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::backend::{DEFAULT_LOGIN_PATH, DEFAULT_REFRESH_PATH};
use crate::codec::{DEFAULT_ACCESS_BUFFER, DEFAULT_BACKGROUND_BUFFER};
use crate::recovery::DEFAULT_PUBLIC_PATHS;

/// Default period of the proactive background refresh.
pub const DEFAULT_BACKGROUND_INTERVAL: Duration = Duration::from_secs(600);

/// Token freshness tuning for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Minimum remaining lifetime of an access token at use time.
    pub access_buffer: Duration,
    /// Minimum remaining lifetime enforced by the background timer.
    pub background_buffer: Duration,
    /// Background refresh period. `None` disables the timer.
    pub background_interval: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            access_buffer: DEFAULT_ACCESS_BUFFER,
            background_buffer: DEFAULT_BACKGROUND_BUFFER,
            background_interval: Some(DEFAULT_BACKGROUND_INTERVAL),
        }
    }
}

/// Authenticated API client with coordinated token refresh.
#[derive(Debug, Parser)]
#[command(name = "tokenguard", version, about)]
pub struct Config {
    /// API base URL (e.g. https://api.example.com).
    #[arg(long, env = "TOKENGUARD_BASE_URL", default_value = "http://localhost:8000")]
    pub base_url: String,

    /// Path of the token refresh endpoint.
    #[arg(long, env = "TOKENGUARD_REFRESH_PATH", default_value = DEFAULT_REFRESH_PATH)]
    pub refresh_path: String,

    /// Path of the login endpoint.
    #[arg(long, env = "TOKENGUARD_LOGIN_PATH", default_value = DEFAULT_LOGIN_PATH)]
    pub login_path: String,

    /// Token file (default: <state dir>/tokens.json).
    #[arg(long, env = "TOKENGUARD_TOKEN_FILE")]
    pub token_file: Option<PathBuf>,

    /// Access token buffer in seconds.
    #[arg(long, env = "TOKENGUARD_ACCESS_BUFFER_SECS", default_value = "30")]
    pub access_buffer_secs: u64,

    /// Background refresh buffer in seconds.
    #[arg(long, env = "TOKENGUARD_BACKGROUND_BUFFER_SECS", default_value = "300")]
    pub background_buffer_secs: u64,

    /// Background refresh interval in seconds (0 = disabled).
    #[arg(long, env = "TOKENGUARD_REFRESH_INTERVAL_SECS", default_value = "600")]
    pub refresh_interval_secs: u64,

    /// Request timeout in milliseconds.
    #[arg(long, env = "TOKENGUARD_TIMEOUT_MS", default_value = "10000")]
    pub timeout_ms: u64,

    /// Path prefix served without authentication (repeatable).
    #[arg(long = "public-path", env = "TOKENGUARD_PUBLIC_PATHS", value_delimiter = ',')]
    pub public_paths: Vec<String>,

    /// Log format (json or text).
    #[arg(long, env = "TOKENGUARD_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "TOKENGUARD_LOG_LEVEL", default_value = "warn")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Log in and store the issued tokens
    Login {
        #[arg(long, env = "TOKENGUARD_EMAIL")]
        email: String,
        #[arg(long, env = "TOKENGUARD_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Discard stored tokens
    Logout,
    /// Show the stored session
    Status,
    /// GET a path and print the response body
    Get {
        path: String,
        /// Treat the path as public for this request
        #[arg(long)]
        public: bool,
    },
    /// POST a JSON body to a path and print the response body
    Post {
        path: String,
        /// JSON request body
        #[arg(long, default_value = "{}")]
        body: String,
    },
    /// Keep the session fresh and print session events until interrupted
    Watch,
}

impl Config {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            anyhow::bail!("--base-url must start with http:// or https://");
        }
        for (flag, path) in [("--refresh-path", &self.refresh_path), ("--login-path", &self.login_path)]
        {
            if !path.starts_with('/') {
                anyhow::bail!("{flag} must start with '/'");
            }
        }
        if let Some(path) = self.public_paths.iter().find(|p| !p.starts_with('/')) {
            anyhow::bail!("--public-path {path:?} must start with '/'");
        }
        if self.timeout_ms == 0 {
            anyhow::bail!("--timeout-ms must be positive");
        }
        if self.background_buffer_secs < self.access_buffer_secs {
            anyhow::bail!("--background-buffer-secs must be at least --access-buffer-secs");
        }
        match self.log_format.as_str() {
            "json" | "text" => {}
            other => anyhow::bail!("invalid log format: {other}"),
        }
        if let Command::Post { ref body, .. } = self.command {
            serde_json::from_str::<serde_json::Value>(body)
                .map_err(|e| anyhow::anyhow!("--body is not valid JSON: {e}"))?;
        }
        Ok(())
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            access_buffer: Duration::from_secs(self.access_buffer_secs),
            background_buffer: Duration::from_secs(self.background_buffer_secs),
            background_interval: match self.refresh_interval_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Configured public prefixes, or the built-in ones when none are given.
    pub fn public_paths(&self) -> Vec<String> {
        if self.public_paths.is_empty() {
            DEFAULT_PUBLIC_PATHS.iter().map(|p| (*p).to_owned()).collect()
        } else {
            self.public_paths.clone()
        }
    }

    pub fn token_file(&self) -> PathBuf {
        self.token_file.clone().unwrap_or_else(|| state_dir().join("tokens.json"))
    }
}

/// Resolve the state directory for persisted tokens.
///
/// Checks `TOKENGUARD_STATE_DIR`, then `$XDG_STATE_HOME/tokenguard`,
/// then `$HOME/.local/state/tokenguard`.
pub fn state_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("TOKENGUARD_STATE_DIR") {
        return PathBuf::from(dir);
    }
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return PathBuf::from(xdg).join("tokenguard");
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".local/state/tokenguard");
    }
    PathBuf::from(".tokenguard")
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
