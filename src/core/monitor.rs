//! Poll-until-complete wrapper for long-running provider operations.
//!
//! The precursor task issues the mutating call exactly once. If the provider
//! answers with an unfinished operation, the monitor re-reads the operation
//! resource (an idempotent GET) until it reports completion.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::core::context::{AuthCtx, TaskContext};
use crate::core::directives::{CommentDirectives, NOSTATUS};
use crate::core::hierarchy::{MethodHandle, ProviderHandle};
use crate::core::output::ExecutorOutput;
use crate::core::task::{Capability, Executor, Task, TaskId, TaskKind};
use crate::error::{ExecError, Result};
use crate::http::{HttpClient, HttpRequest};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

const COMPLETION_FIELD: &str = "endTime";
const LOCATOR_FIELD: &str = "selfLink";

/// Builds monitor tasks for one provider.
///
/// Only providers the monitor understands can be constructed; asking for any
/// other is an error here rather than at execution time.
#[derive(Clone)]
pub struct AsyncMonitor {
    provider: ProviderHandle,
    client: Arc<dyn HttpClient>,
    poll_interval: Duration,
    max_wait: Option<Duration>,
}

impl AsyncMonitor {
    pub fn new(provider: &ProviderHandle, client: Arc<dyn HttpClient>) -> Result<Self> {
        match provider.name.as_str() {
            "google" => Ok(Self {
                provider: provider.clone(),
                client,
                poll_interval: DEFAULT_POLL_INTERVAL,
                max_wait: None,
            }),
            _ => Err(ExecError::MonitorUnsupported {
                provider: provider.name.clone(),
                version: provider.version.clone(),
            }),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Upper bound on the total time spent sleeping between polls.
    pub fn with_max_wait(mut self, max_wait: Option<Duration>) -> Self {
        self.max_wait = max_wait;
        self
    }

    /// Wraps `precursor`, the task issuing `method`.
    pub fn monitor(
        &self,
        method: &MethodHandle,
        precursor: Box<dyn Task>,
        directives: &CommentDirectives,
    ) -> Result<AsyncMonitorTask> {
        if !method.awaitable {
            return Err(ExecError::NotAwaitable(method.name.clone()));
        }
        Ok(AsyncMonitorTask {
            precursor,
            provider: self.provider.name.clone(),
            client: self.client.clone(),
            poll_interval: self.poll_interval,
            max_wait: self.max_wait,
            no_status: directives.is_set(NOSTATUS),
        })
    }
}

impl std::fmt::Debug for AsyncMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncMonitor")
            .field("provider", &self.provider)
            .field("poll_interval", &self.poll_interval)
            .field("max_wait", &self.max_wait)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
enum MonitorState {
    Start,
    Polling { locator: String, operation: String },
    Done { body: Value, operation: String },
    Failed(ExecError),
}

/// An awaitable operation in flight.
///
/// Elapsed time lives on the stack of one `execute` call, so a cached plan can
/// run the same monitor again from zero.
pub struct AsyncMonitorTask {
    precursor: Box<dyn Task>,
    provider: String,
    client: Arc<dyn HttpClient>,
    poll_interval: Duration,
    max_wait: Option<Duration>,
    no_status: bool,
}

impl AsyncMonitorTask {
    pub fn precursor(&self) -> &dyn Task {
        self.precursor.as_ref()
    }

    fn status(&self, ctx: &TaskContext, line: &str) {
        if !self.no_status {
            ctx.writer.write_line(line);
        }
    }

    fn failed(&self, ctx: &TaskContext, operation: &str, err: ExecError) -> ExecutorOutput {
        if !self.no_status {
            ctx.err_writer.write_line(&format!("{operation} failed: {err}"));
        }
        ExecutorOutput::erroneous(err)
    }

    async fn poll(&self, auth: &AuthCtx, locator: &str) -> MonitorState {
        let next = match self.client.send(&HttpRequest::get(locator), auth).await {
            Ok(response) => inspect(Some(response.body)),
            Err(e) => MonitorState::Failed(e),
        };
        match &next {
            MonitorState::Failed(e) => log::warn!("polling {locator} failed: {e}"),
            _ => log::debug!("polled {locator}"),
        }
        next
    }
}

/// `kind` or `kind: operationType` when the body has them, otherwise `operation`.
pub fn operation_descriptor(body: &Map<String, Value>) -> String {
    match (body.get("kind"), body.get("operationType")) {
        (Some(Value::String(kind)), Some(Value::String(op_type))) => format!("{kind}: {op_type}"),
        (Some(Value::String(kind)), _) => kind.clone(),
        _ => "operation".to_string(),
    }
}

fn inspect(body: Option<Value>) -> MonitorState {
    let body = match body {
        None | Some(Value::Null) => {
            return MonitorState::Failed(ExecError::Monitor("no body present".into()));
        }
        Some(Value::Object(map)) => map,
        Some(other) => {
            return MonitorState::Failed(ExecError::Monitor(format!(
                "response body of type '{}' unreadable",
                json_type(&other)
            )));
        }
    };
    log::info!("operation body = {}", Value::Object(body.clone()));

    let operation = operation_descriptor(&body);
    let complete = match body.get(COMPLETION_FIELD) {
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Null) | None => false,
        Some(_) => true,
    };
    if complete {
        return MonitorState::Done {
            body: Value::Object(body),
            operation,
        };
    }
    match body.get(LOCATOR_FIELD) {
        Some(Value::String(locator)) if !locator.is_empty() => MonitorState::Polling {
            locator: locator.clone(),
            operation,
        },
        _ => MonitorState::Failed(ExecError::Monitor(format!(
            "no '{LOCATOR_FIELD}' property present"
        ))),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl std::fmt::Debug for AsyncMonitorTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncMonitorTask")
            .field("precursor", &self.precursor)
            .field("provider", &self.provider)
            .field("poll_interval", &self.poll_interval)
            .field("no_status", &self.no_status)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Task for AsyncMonitorTask {
    fn kind(&self) -> TaskKind {
        TaskKind::AsyncMonitor
    }

    fn id(&self) -> TaskId {
        self.precursor.id()
    }

    fn set_id(&mut self, id: TaskId) {
        self.precursor.set_id(id);
    }

    fn debug_name(&self) -> String {
        format!("AsyncMonitor({})", self.precursor.debug_name())
    }

    fn is_read_only(&self) -> bool {
        false
    }

    fn optimise(&self) -> Result<()> {
        self.precursor.optimise()
    }

    async fn execute(&self, ctx: &TaskContext) -> ExecutorOutput {
        let mut state = MonitorState::Start;
        let mut elapsed = Duration::ZERO;
        let mut messages = Vec::new();
        let mut current = String::from("operation");

        loop {
            state = match state {
                MonitorState::Start => {
                    let out = self.precursor.execute(ctx).await;
                    if out.is_error() {
                        return out;
                    }
                    messages = out.messages;
                    inspect(out.body)
                }
                MonitorState::Polling { locator, operation } => {
                    current.clone_from(&operation);
                    if let Some(max_wait) = self.max_wait {
                        if elapsed + self.poll_interval > max_wait {
                            let err = ExecError::MonitorDeadline {
                                operation,
                                waited_secs: elapsed.as_secs(),
                            };
                            return self.failed(ctx, &current, err);
                        }
                    }
                    let auth = match ctx.auth_for(&self.provider) {
                        Ok(auth) => auth,
                        Err(e) => return self.failed(ctx, &current, e),
                    };

                    tokio::time::sleep(self.poll_interval).await;
                    elapsed += self.poll_interval;
                    self.status(
                        ctx,
                        &format!("{operation} in progress, {} seconds elapsed", elapsed.as_secs()),
                    );
                    self.poll(&auth, &locator).await
                }
                MonitorState::Done { body, operation } => {
                    self.status(ctx, &format!("{operation} complete"));
                    return ExecutorOutput::from_body(body).with_messages(messages);
                }
                MonitorState::Failed(e) => return self.failed(ctx, &current, e),
            }
        }
    }

    fn set_txn_id(&self, txn_id: i64) {
        self.precursor.set_txn_id(txn_id);
    }

    fn set_executor(&self, _executor: Executor) -> Result<()> {
        self.kind().check(Capability::SetExecutor)
    }

    fn set_input_alias(&self, alias: &str, source: TaskId) -> Result<()> {
        self.precursor.set_input_alias(alias, source)
    }

    fn incident_data(&self, from: TaskId, output: ExecutorOutput) -> Result<()> {
        self.precursor.incident_data(from, output)
    }

    fn get_input_from_alias(&self, alias: &str) -> Option<ExecutorOutput> {
        self.precursor.get_input_from_alias(alias)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context::StatusWriter;
    use crate::core::task::{executor, LocalTask};
    use crate::http::HttpResponse;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Default)]
    struct OperationsApi {
        polls: Mutex<VecDeque<Value>>,
        urls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl HttpClient for OperationsApi {
        async fn send(&self, request: &HttpRequest, _auth: &AuthCtx) -> Result<HttpResponse> {
            self.urls.lock().unwrap().push(request.url.clone());
            let body = self
                .polls
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| ExecError::HttpStatus {
                    status: 404,
                    body: "no more operations".into(),
                })?;
            Ok(HttpResponse { status: 200, body })
        }
    }

    fn google() -> ProviderHandle {
        ProviderHandle::new("google", "v1")
    }

    fn insert() -> MethodHandle {
        MethodHandle::new("insert", "POST").awaitable()
    }

    fn precursor(body: Value) -> Box<dyn Task> {
        Box::new(LocalTask::new(executor(move |_| {
            let body = body.clone();
            async move { ExecutorOutput::from_body(body) }
        })))
    }

    fn monitor_over(api: Arc<OperationsApi>, body: Value, directives: &[&str]) -> AsyncMonitorTask {
        AsyncMonitor::new(&google(), api)
            .unwrap()
            .with_poll_interval(Duration::from_millis(5))
            .monitor(&insert(), precursor(body), &CommentDirectives::from_names(directives))
            .unwrap()
    }

    fn buffered_ctx() -> (TaskContext, crate::core::context::StatusBuffer) {
        let (writer, buffer) = StatusWriter::buffer();
        (
            TaskContext::new(Arc::new(crate::core::context::NoAuth), writer, StatusWriter::sink()),
            buffer,
        )
    }

    #[test]
    fn test_unsupported_provider_is_construction_error() {
        let err = AsyncMonitor::new(
            &ProviderHandle::new("okta", "v3"),
            Arc::new(OperationsApi::default()),
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "async operation monitor for provider = 'okta', api version = 'v3' currently not supported"
        );
    }

    #[test]
    fn test_non_awaitable_method_is_rejected() {
        let monitor = AsyncMonitor::new(&google(), Arc::new(OperationsApi::default())).unwrap();
        let err = monitor
            .monitor(
                &MethodHandle::new("list", "GET"),
                precursor(json!({})),
                &CommentDirectives::new(),
            )
            .unwrap_err();
        assert!(matches!(err, ExecError::NotAwaitable(name) if name == "list"));
    }

    #[test]
    fn test_operation_descriptor() {
        let body = json!({"kind": "compute#operation", "operationType": "insert"});
        assert_eq!(
            operation_descriptor(body.as_object().unwrap()),
            "compute#operation: insert"
        );
        let body = json!({"kind": "compute#operation"});
        assert_eq!(operation_descriptor(body.as_object().unwrap()), "compute#operation");
        assert_eq!(operation_descriptor(&Map::new()), "operation");
    }

    #[tokio::test]
    async fn test_immediate_completion_never_polls() {
        let api = Arc::new(OperationsApi::default());
        let task = monitor_over(
            api.clone(),
            json!({"endTime": "2024-01-01T00:00:00Z"}),
            &[],
        );
        let (ctx, status) = buffered_ctx();
        let out = task.execute(&ctx).await;
        assert!(!out.is_error());
        assert!(api.urls.lock().unwrap().is_empty());
        assert_eq!(status.lines(), vec!["operation complete"]);
    }

    #[tokio::test]
    async fn test_missing_locator_fails() {
        let task = monitor_over(Arc::new(OperationsApi::default()), json!({"status": "RUNNING"}), &[]);
        let out = task.execute(&TaskContext::default()).await;
        assert_eq!(
            out.error().unwrap().to_string(),
            "cannot execute monitor: no 'selfLink' property present"
        );
    }

    #[tokio::test]
    async fn test_precursor_error_is_surfaced_verbatim() {
        let failing: Box<dyn Task> = Box::new(LocalTask::new(crate::core::task::failing_executor(
            Arc::new(ExecError::HttpStatus {
                status: 409,
                body: "already exists".into(),
            }),
        )));
        let api = Arc::new(OperationsApi::default());
        let task = AsyncMonitor::new(&google(), api.clone())
            .unwrap()
            .monitor(&insert(), failing, &CommentDirectives::new())
            .unwrap();
        let out = task.execute(&TaskContext::default()).await;
        assert!(matches!(out.error(), Some(ExecError::HttpStatus { status: 409, .. })));
        assert!(api.urls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_max_wait_bounds_polling() {
        let api = Arc::new(OperationsApi::default());
        for _ in 0..10 {
            api.polls
                .lock()
                .unwrap()
                .push_back(json!({"selfLink": "https://x/op/1", "status": "RUNNING"}));
        }
        let task = AsyncMonitor::new(&google(), api.clone())
            .unwrap()
            .with_poll_interval(Duration::from_secs(1))
            .with_max_wait(Some(Duration::from_secs(2)))
            .monitor(
                &insert(),
                precursor(json!({"selfLink": "https://x/op/1"})),
                &CommentDirectives::from_names([NOSTATUS]),
            )
            .unwrap();
        tokio::time::pause();
        let out = task.execute(&TaskContext::default()).await;
        assert!(matches!(
            out.error(),
            Some(ExecError::MonitorDeadline { waited_secs: 2, .. })
        ));
        assert_eq!(api.urls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_completion_keeps_precursor_messages() {
        let api = Arc::new(OperationsApi::default());
        api.polls
            .lock()
            .unwrap()
            .push_back(json!({"endTime": "2024-01-01T00:00:00Z", "status": "DONE"}));
        let started: Box<dyn Task> = Box::new(LocalTask::new(executor(|_| async {
            ExecutorOutput::from_body(json!({"selfLink": "https://x/op/2"}))
                .with_messages(["The operation completed successfully"])
        })));
        let task = AsyncMonitor::new(&google(), api)
            .unwrap()
            .with_poll_interval(Duration::from_millis(1))
            .monitor(&insert(), started, &CommentDirectives::new())
            .unwrap();
        let out = task.execute(&TaskContext::default()).await;
        assert_eq!(out.body.unwrap()["status"], json!("DONE"));
        assert_eq!(out.messages, vec!["The operation completed successfully"]);
    }

    #[tokio::test]
    async fn test_poll_failure_is_written_to_error_stream() {
        let api = Arc::new(OperationsApi::default());
        let task = monitor_over(
            api,
            json!({"kind": "compute#operation", "selfLink": "https://x/op/3"}),
            &[],
        );
        let (errors, buffer) = StatusWriter::buffer();
        let ctx = TaskContext::new(Arc::new(crate::core::context::NoAuth), StatusWriter::sink(), errors);
        let out = task.execute(&ctx).await;
        assert!(matches!(out.error(), Some(ExecError::HttpStatus { status: 404, .. })));
        let lines = buffer.lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("compute#operation failed: "));
    }

    #[test]
    fn test_set_executor_is_rejected() {
        let task = monitor_over(Arc::new(OperationsApi::default()), json!({}), &[]);
        let err = task
            .set_executor(executor(|_| async { ExecutorOutput::empty() }))
            .unwrap_err();
        assert_eq!(err.to_string(), "AsyncMonitor task does not support set_executor");
    }
}
