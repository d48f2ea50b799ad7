use async_trait::async_trait;

use crate::core::context::TaskContext;
use crate::core::output::ExecutorOutput;
use crate::core::task::{
    Capability, ExecRequest, Executor, ExecutorSlot, Task, TaskCore, TaskId, TaskKind,
};
use crate::error::Result;

/// Pure computation, no network.
///
/// Used for error reporting, merges over upstream outputs (fan-in) and
/// internally answered statements.
#[derive(Debug)]
pub struct LocalTask {
    core: TaskCore,
    executor: ExecutorSlot,
}

impl LocalTask {
    pub fn new(executor: Executor) -> Self {
        Self {
            core: TaskCore::default(),
            executor: ExecutorSlot::new(Some(executor)),
        }
    }

    /// A task that returns an empty envelope.
    pub fn nop() -> Self {
        Self {
            core: TaskCore::default(),
            executor: ExecutorSlot::new(None),
        }
    }

    pub fn with_debug_name(mut self, name: impl Into<String>) -> Self {
        self.core.debug_name = Some(name.into());
        self
    }
}

#[async_trait]
impl Task for LocalTask {
    fn kind(&self) -> TaskKind {
        TaskKind::Local
    }

    fn id(&self) -> TaskId {
        self.core.id()
    }

    fn set_id(&mut self, id: TaskId) {
        self.core.id = id;
    }

    fn debug_name(&self) -> String {
        self.core.name(self.kind())
    }

    /// Local tasks never reach a provider.
    fn is_read_only(&self) -> bool {
        true
    }

    async fn execute(&self, ctx: &TaskContext) -> ExecutorOutput {
        let Some(executor) = self.executor.get() else {
            return ExecutorOutput::empty();
        };
        log::info!("running local task {}", self.debug_name());
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

    fn set_input_alias(&self, alias: &str, source: TaskId) -> Result<()> {
        self.core.set_input_alias(alias, source);
        Ok(())
    }

    fn incident_data(&self, from: TaskId, output: ExecutorOutput) -> Result<()> {
        self.core.incident_data(from, output);
        Ok(())
    }

    fn get_input_from_alias(&self, alias: &str) -> Option<ExecutorOutput> {
        self.core.get_input_from_alias(alias)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::output::RowSet;
    use crate::core::task::executor;
    use serde_json::json;

    #[tokio::test]
    async fn test_nop_returns_empty_output() {
        let task = LocalTask::nop();
        let out = task.execute(&TaskContext::default()).await;
        assert!(!out.is_error());
        assert!(out.rows.is_none());
        assert!(out.body.is_none());
    }

    #[tokio::test]
    async fn test_executor_sees_aliased_inputs() {
        let task = LocalTask::new(executor(|req: ExecRequest| async move {
            let mut rows = RowSet::new();
            for alias in ["left", "right"] {
                if let Some(body) = req.inputs.get(alias).and_then(|o| o.body.clone()) {
                    rows.push_value(body);
                }
            }
            ExecutorOutput::from_rows(rows)
        }));
        task.set_input_alias("left", 10).unwrap();
        task.set_input_alias("right", 11).unwrap();
        task.incident_data(10, ExecutorOutput::from_body(json!({"n": 1}))).unwrap();
        task.incident_data(11, ExecutorOutput::from_body(json!({"n": 2}))).unwrap();

        let out = task.execute(&TaskContext::default()).await;
        assert_eq!(out.row_count(), 2);
    }

    #[tokio::test]
    async fn test_set_executor_replaces_body() {
        let task = LocalTask::nop().with_debug_name("replaceable");
        task.set_executor(executor(|_| async { ExecutorOutput::from_body(json!("swapped")) }))
            .unwrap();
        let out = task.execute(&TaskContext::default()).await;
        assert_eq!(out.body, Some(json!("swapped")));
        assert_eq!(task.debug_name(), "replaceable");
    }
}
