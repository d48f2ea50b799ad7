//! The unit of executable work.
//!
//! A task runs once per invocation and produces an [`ExecutorOutput`]. Four
//! variants exist:
//! - [`LocalTask`] for pure computation
//! - [`HttpTask`] for one (possibly paginated) outbound call
//! - [`MetaDataTask`] for introspection and control commands
//! - [`AsyncMonitorTask`](crate::core::monitor::AsyncMonitorTask) for
//!   poll-until-complete operations
//!
//! Tasks never own each other. Upstream results arrive through
//! [`Task::incident_data`] and are read back by alias with
//! [`Task::get_input_from_alias`].

pub mod http;
pub mod local;
pub mod metadata;

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::core::context::TaskContext;
use crate::core::lock;
use crate::core::output::ExecutorOutput;
use crate::core::txn::TxnControlCounters;
use crate::error::{ExecError, Result};

pub use http::HttpTask;
pub use local::LocalTask;
pub use metadata::MetaDataTask;

/// Graph-assigned, process-unique task id.
pub type TaskId = i64;

/// Id carried by a task that has not been inserted into a graph yet.
pub const UNASSIGNED_ID: TaskId = -1;

/// The closed set of task variants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Local,
    Http,
    MetaData,
    AsyncMonitor,
}

/// Operations a task may or may not accept.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Capability {
    SetExecutor,
    SetTxnId,
    SetInputAlias,
    IncidentData,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::SetExecutor => "set_executor",
            Capability::SetTxnId => "set_txn_id",
            Capability::SetInputAlias => "set_input_alias",
            Capability::IncidentData => "incident_data",
        }
    }
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Local => "Local",
            TaskKind::Http => "HTTP",
            TaskKind::MetaData => "MetaData",
            TaskKind::AsyncMonitor => "AsyncMonitor",
        }
    }

    /// The capability table. Unsupported calls fail fast with
    /// [`ExecError::Unsupported`]; `SetTxnId` on a variant without
    /// transaction counters is accepted and ignored.
    pub fn supports(&self, capability: Capability) -> bool {
        match (self, capability) {
            (TaskKind::AsyncMonitor, Capability::SetExecutor) => false,
            (TaskKind::MetaData, Capability::IncidentData) => false,
            (TaskKind::MetaData, Capability::SetInputAlias) => false,
            _ => true,
        }
    }

    pub(crate) fn check(&self, capability: Capability) -> Result<()> {
        if self.supports(capability) {
            Ok(())
        } else {
            Err(ExecError::Unsupported {
                kind: self.as_str(),
                capability: capability.as_str(),
            })
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Upstream outputs visible to one execution, keyed by alias.
#[derive(Clone, Debug, Default)]
pub struct TaskInputs {
    by_id: HashMap<TaskId, ExecutorOutput>,
    aliases: HashMap<String, TaskId>,
}

impl TaskInputs {
    /// Output of the upstream task registered under `alias` ("" is the default input).
    pub fn get(&self, alias: &str) -> Option<&ExecutorOutput> {
        self.aliases.get(alias).and_then(|id| self.by_id.get(id))
    }

    pub fn get_by_id(&self, id: TaskId) -> Option<&ExecutorOutput> {
        self.by_id.get(&id)
    }

    /// All received outputs, ordered by upstream task id.
    pub fn ordered(&self) -> Vec<(TaskId, &ExecutorOutput)> {
        let mut all: Vec<_> = self.by_id.iter().map(|(id, out)| (*id, out)).collect();
        all.sort_by_key(|(id, _)| *id);
        all
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

/// Everything an executor may look at, as owned values.
#[derive(Clone, Debug)]
pub struct ExecRequest {
    pub task_id: TaskId,
    pub ctx: TaskContext,
    pub inputs: TaskInputs,
    pub txn: Option<TxnControlCounters>,
}

/// A replaceable execution body.
pub type Executor = Arc<dyn Fn(ExecRequest) -> BoxFuture<'static, ExecutorOutput> + Send + Sync>;

/// Wraps an async closure as an [`Executor`].
pub fn executor<F, Fut>(f: F) -> Executor
where
    F: Fn(ExecRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ExecutorOutput> + Send + 'static,
{
    Arc::new(move |req| Box::pin(f(req)))
}

/// Executor that always reports `err`.
pub fn failing_executor(err: Arc<ExecError>) -> Executor {
    executor(move |_| {
        let err = err.clone();
        async move { ExecutorOutput::erroneous(err) }
    })
}

/// State every task variant carries: id, name, received inputs and aliases.
#[derive(Debug)]
pub struct TaskCore {
    pub(crate) id: TaskId,
    pub(crate) debug_name: Option<String>,
    inputs: Mutex<HashMap<TaskId, ExecutorOutput>>,
    aliases: Mutex<HashMap<String, TaskId>>,
}

impl Default for TaskCore {
    fn default() -> Self {
        Self {
            id: UNASSIGNED_ID,
            debug_name: None,
            inputs: Mutex::new(HashMap::new()),
            aliases: Mutex::new(HashMap::new()),
        }
    }
}

impl TaskCore {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self, kind: TaskKind) -> String {
        match &self.debug_name {
            Some(name) => name.clone(),
            None => format!("{kind} task {}", self.id),
        }
    }

    pub fn incident_data(&self, from: TaskId, output: ExecutorOutput) {
        lock(&self.inputs).insert(from, output);
    }

    pub fn set_input_alias(&self, alias: &str, source: TaskId) {
        lock(&self.aliases).insert(alias.to_string(), source);
    }

    pub fn get_input_from_alias(&self, alias: &str) -> Option<ExecutorOutput> {
        let source = *lock(&self.aliases).get(alias)?;
        lock(&self.inputs).get(&source).cloned()
    }

    pub fn snapshot(&self) -> TaskInputs {
        TaskInputs {
            by_id: lock(&self.inputs).clone(),
            aliases: lock(&self.aliases).clone(),
        }
    }
}

/// Holder for the executor a variant runs, swappable through `set_executor`.
pub(crate) struct ExecutorSlot(RwLock<Option<Executor>>);

impl ExecutorSlot {
    pub(crate) fn new(executor: Option<Executor>) -> Self {
        Self(RwLock::new(executor))
    }

    pub(crate) fn get(&self) -> Option<Executor> {
        self.0
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set(&self, executor: Executor) {
        *self
            .0
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(executor);
    }
}

impl fmt::Debug for ExecutorSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let set = self.get().is_some();
        f.debug_tuple("ExecutorSlot").field(&set).finish()
    }
}

/// Defines the behaviour of one schedulable unit of a plan.
///
/// Tasks are shared between the graph and its workers, so every mutating
/// operation takes `&self`. Implementations must not capture per-statement
/// state outside of what [`set_txn_id`](Task::set_txn_id) and
/// [`set_input_alias`](Task::set_input_alias) manage: cached plans are
/// replayed as-is under a new transaction id.
#[async_trait]
pub trait Task: Send + Sync + 'static {
    fn kind(&self) -> TaskKind;

    fn id(&self) -> TaskId;

    /// Called once by the graph on insertion.
    fn set_id(&mut self, id: TaskId);

    fn debug_name(&self) -> String;

    fn is_read_only(&self) -> bool;

    /// Pre-execution rewriting. Called exactly once, before the first `execute`.
    fn optimise(&self) -> Result<()> {
        Ok(())
    }

    async fn execute(&self, ctx: &TaskContext) -> ExecutorOutput;

    fn set_txn_id(&self, txn_id: i64);

    fn set_executor(&self, executor: Executor) -> Result<()>;

    /// Declares that at execution time this task reads `source`'s output under `alias`.
    fn set_input_alias(&self, alias: &str, source: TaskId) -> Result<()>;

    /// Delivers an upstream task's output.
    fn incident_data(&self, from: TaskId, output: ExecutorOutput) -> Result<()>;

    fn get_input_from_alias(&self, alias: &str) -> Option<ExecutorOutput>;
}

impl fmt::Debug for dyn Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("kind", &self.kind())
            .field("id", &self.id())
            .finish()
    }
}
