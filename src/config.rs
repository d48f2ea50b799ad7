//! Runtime configuration shared by the plan builder and the execution engine.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ExecError, Result};

pub const EXECUTION_CONCURRENCY_LIMIT_KEY: &str = "execution.concurrency.limit";
pub const POLL_INTERVAL_KEY: &str = "asyncmonitor.pollinterval";
pub const ASYNC_MAX_WAIT_KEY: &str = "asyncmonitor.maxwait";
pub const PLAN_CACHE_ENABLED_KEY: &str = "plancache.enabled";
pub const QUERY_CACHE_SIZE_KEY: &str = "querycachesize";
pub const HTTP_PAGE_LIMIT_KEY: &str = "http.response.pageLimit";
pub const API_REQUEST_TIMEOUT_KEY: &str = "apirequesttimeout";

const ENV_PREFIX: &str = "PLUMBLINE_";
const ALL_KEYS: [&str; 7] = [
    EXECUTION_CONCURRENCY_LIMIT_KEY,
    POLL_INTERVAL_KEY,
    ASYNC_MAX_WAIT_KEY,
    PLAN_CACHE_ENABLED_KEY,
    QUERY_CACHE_SIZE_KEY,
    HTTP_PAGE_LIMIT_KEY,
    API_REQUEST_TIMEOUT_KEY,
];

/// Process-level settings for building and running plans.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Maximum number of tasks in flight per graph. Zero or negative means unbounded.
    pub execution_concurrency_limit: i64,
    /// Sleep between two async monitor polls (default: 10s)
    pub poll_interval: Duration,
    /// Upper bound on the time an async monitor keeps polling. `None` polls forever.
    pub async_max_wait: Option<Duration>,
    /// Whether compiled plans are looked up in and written to the plan cache.
    pub plan_cache_enabled: bool,
    /// Capacity of the plan cache, in entries (default: 10000)
    pub query_cache_size: usize,
    /// Max pages fetched per HTTP task. Zero or negative means unlimited.
    pub http_page_limit: i64,
    /// Per-request timeout for outbound calls. Zero disables the timeout.
    pub api_request_timeout: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            execution_concurrency_limit: 1,
            poll_interval: Duration::from_secs(10),
            async_max_wait: None,
            plan_cache_enabled: false,
            query_cache_size: 10_000,
            http_page_limit: 20,
            api_request_timeout: Duration::from_secs(45),
        }
    }
}

impl RuntimeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_concurrency_limit(mut self, limit: i64) -> Self {
        self.execution_concurrency_limit = limit;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_async_max_wait(mut self, max_wait: Option<Duration>) -> Self {
        self.async_max_wait = max_wait;
        self
    }

    pub fn with_plan_cache(mut self, enabled: bool) -> Self {
        self.plan_cache_enabled = enabled;
        self
    }

    pub fn with_query_cache_size(mut self, size: usize) -> Self {
        self.query_cache_size = size;
        self
    }

    pub fn with_http_page_limit(mut self, limit: i64) -> Self {
        self.http_page_limit = limit;
        self
    }

    pub fn with_api_request_timeout(mut self, timeout: Duration) -> Self {
        self.api_request_timeout = timeout;
        self
    }

    /// Concurrency limit as the scheduler sees it: `None` for unbounded.
    pub fn concurrency_limit(&self) -> Option<usize> {
        usize::try_from(self.execution_concurrency_limit)
            .ok()
            .filter(|limit| *limit > 0)
    }

    /// Page limit as the HTTP task sees it: `None` for unlimited.
    pub fn page_limit(&self) -> Option<usize> {
        usize::try_from(self.http_page_limit)
            .ok()
            .filter(|limit| *limit > 0)
    }

    /// Sets a single value from its string key.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let value = value.trim();
        match key {
            EXECUTION_CONCURRENCY_LIMIT_KEY => {
                self.execution_concurrency_limit = parse_int(key, value)?;
            }
            POLL_INTERVAL_KEY => {
                self.poll_interval = Duration::from_secs(parse_uint(key, value)?);
            }
            ASYNC_MAX_WAIT_KEY => {
                let secs = parse_int(key, value)?;
                self.async_max_wait = u64::try_from(secs)
                    .ok()
                    .filter(|s| *s > 0)
                    .map(Duration::from_secs);
            }
            PLAN_CACHE_ENABLED_KEY => {
                // only the literal "false" disables
                self.plan_cache_enabled = !value.eq_ignore_ascii_case("false");
            }
            QUERY_CACHE_SIZE_KEY => {
                self.query_cache_size = parse_uint(key, value)? as usize;
            }
            HTTP_PAGE_LIMIT_KEY => {
                self.http_page_limit = parse_int(key, value)?;
            }
            API_REQUEST_TIMEOUT_KEY => {
                self.api_request_timeout = Duration::from_secs(parse_uint(key, value)?);
            }
            other => {
                return Err(ExecError::Config(format!("unknown key '{other}'")));
            }
        }
        Ok(())
    }

    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut config = Self::default();
        for (key, value) in pairs {
            config.set(key, value)?;
        }
        Ok(config)
    }

    /// Reads `PLUMBLINE_*` variables, e.g. `PLUMBLINE_EXECUTION_CONCURRENCY_LIMIT`.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        for key in ALL_KEYS {
            if let Ok(value) = std::env::var(env_var_name(key)) {
                log::debug!("config override from environment: {key} = {value}");
                config.set(key, &value)?;
            }
        }
        Ok(config)
    }
}

fn env_var_name(key: &str) -> String {
    format!("{ENV_PREFIX}{}", key.replace('.', "_").to_ascii_uppercase())
}

fn parse_int(key: &str, value: &str) -> Result<i64> {
    value
        .parse::<i64>()
        .map_err(|e| ExecError::Config(format!("'{key}' expects an integer, got '{value}': {e}")))
}

fn parse_uint(key: &str, value: &str) -> Result<u64> {
    value.parse::<u64>().map_err(|e| {
        ExecError::Config(format!(
            "'{key}' expects a non-negative integer, got '{value}': {e}"
        ))
    })
}
