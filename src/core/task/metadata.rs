use async_trait::async_trait;

use crate::core::context::TaskContext;
use crate::core::output::ExecutorOutput;
use crate::core::task::{
    Capability, ExecRequest, Executor, ExecutorSlot, Task, TaskCore, TaskId, TaskKind,
};
use crate::error::Result;

/// Introspection and control commands (`SHOW`, `DESCRIBE`, registry pulls).
///
/// Read-only and self-contained: it never receives upstream outputs.
#[derive(Debug)]
pub struct MetaDataTask {
    core: TaskCore,
    provider: String,
    command: String,
    executor: ExecutorSlot,
}

impl MetaDataTask {
    pub fn new(provider: impl Into<String>, command: impl Into<String>, executor: Executor) -> Self {
        Self {
            core: TaskCore::default(),
            provider: provider.into(),
            command: command.into(),
            executor: ExecutorSlot::new(Some(executor)),
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn command(&self) -> &str {
        &self.command
    }
}

#[async_trait]
impl Task for MetaDataTask {
    fn kind(&self) -> TaskKind {
        TaskKind::MetaData
    }

    fn id(&self) -> TaskId {
        self.core.id()
    }

    fn set_id(&mut self, id: TaskId) {
        self.core.id = id;
    }

    fn debug_name(&self) -> String {
        format!("{} [{} {}]", self.core.name(self.kind()), self.provider, self.command)
    }

    fn is_read_only(&self) -> bool {
        true
    }

    async fn execute(&self, ctx: &TaskContext) -> ExecutorOutput {
        let Some(executor) = self.executor.get() else {
            return ExecutorOutput::empty();
        };
        log::debug!("metadata command '{}' against {}", self.command, self.provider);
        executor(ExecRequest {
            task_id: self.id(),
            ctx: ctx.clone(),
            inputs: self.core.snapshot(),
            txn: None,
        })
        .await
    }

    fn set_txn_id(&self, _txn_id: i64) {}

    fn set_executor(&self, executor: Executor) -> Result<()> {
        self.kind().check(Capability::SetExecutor)?;
        self.executor.set(executor);
        Ok(())
    }

    fn set_input_alias(&self, _alias: &str, _source: TaskId) -> Result<()> {
        self.kind().check(Capability::SetInputAlias)
    }

    fn incident_data(&self, _from: TaskId, _output: ExecutorOutput) -> Result<()> {
        self.kind().check(Capability::IncidentData)
    }

    fn get_input_from_alias(&self, _alias: &str) -> Option<ExecutorOutput> {
        None
    }
}
