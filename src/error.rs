use thiserror::Error;

/// Everything that can go wrong while building or running a plan.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("HTTP request error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("HTTP response status {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("Authentication error for provider '{provider}': {reason}")]
    Auth { provider: String, reason: String },

    #[error("{kind} task does not support {capability}")]
    Unsupported {
        kind: &'static str,
        capability: &'static str,
    },

    #[error(
        "async operation monitor for provider = '{provider}', api version = '{version}' currently not supported"
    )]
    MonitorUnsupported { provider: String, version: String },

    #[error("method {0} is not awaitable")]
    NotAwaitable(String),

    #[error("cannot execute monitor: {0}")]
    Monitor(String),

    #[error("{operation} did not complete within {waited_secs} seconds")]
    MonitorDeadline {
        operation: String,
        waited_secs: u64,
    },

    #[error("Missing required parameter: {0}")]
    MissingParameter(String),

    #[error("Invalid dependency wiring: {0}")]
    Wiring(String),

    #[error("Cycle detected in task graph involving node {0}")]
    CycleDetected(i64),

    #[error("empty execution graph")]
    EmptyGraph,

    #[error("Task {id} aborted: {reason}")]
    TaskAborted { id: i64, reason: String },

    #[error("{}", describe_graph_failure(.failed, .skipped))]
    GraphFailure {
        failed: Vec<(i64, String)>,
        skipped: Vec<i64>,
    },

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

fn describe_graph_failure(failed: &[(i64, String)], skipped: &[i64]) -> String {
    let mut msg = failed
        .iter()
        .map(|(id, err)| format!("task {id} failed: {err}"))
        .collect::<Vec<_>>()
        .join("; ");
    if !skipped.is_empty() {
        let ids = skipped
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        msg.push_str(&format!("; dependent tasks not executed: [{ids}]"));
    }
    msg
}

pub type Result<T> = std::result::Result<T, ExecError>;
