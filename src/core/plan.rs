use std::any::Any;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::core::context::TaskContext;
use crate::core::graph::TaskGraph;
use crate::core::lock;
use crate::core::output::ExecutorOutput;

/// Classification of a statement, as reported by analysis.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum StatementType {
    Select,
    Insert,
    Update,
    Delete,
    Exec,
    Show,
    Describe,
    Use,
    Registry,
    #[default]
    Unknown,
}

impl StatementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatementType::Select => "SELECT",
            StatementType::Insert => "INSERT",
            StatementType::Update => "UPDATE",
            StatementType::Delete => "DELETE",
            StatementType::Exec => "EXEC",
            StatementType::Show => "SHOW",
            StatementType::Describe => "DESCRIBE",
            StatementType::Use => "USE",
            StatementType::Registry => "REGISTRY",
            StatementType::Unknown => "UNKNOWN",
        }
    }
}

/// Opaque handle to the rewritten statement. The engine never looks inside.
pub type StatementHandle = Arc<dyn Any + Send + Sync>;

/// Accumulated execution statistics of one plan.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PlanStats {
    pub exec_count: u64,
    pub exec_time: Duration,
    pub rows: u64,
    pub errors: u64,
}

/// The compiled, executable form of one statement.
pub struct Plan {
    statement_type: StatementType,
    original: String,
    statement: Option<StatementHandle>,
    instructions: TaskGraph,
    cacheable: bool,
    read_only: bool,
    bind_var_needs: Vec<String>,
    stats: Mutex<PlanStats>,
}

impl Plan {
    pub fn new(original: impl Into<String>, instructions: TaskGraph) -> Self {
        Self {
            statement_type: StatementType::Unknown,
            original: original.into(),
            statement: None,
            instructions,
            cacheable: true,
            read_only: false,
            bind_var_needs: Vec::new(),
            stats: Mutex::new(PlanStats::default()),
        }
    }

    pub fn with_statement_type(mut self, statement_type: StatementType) -> Self {
        self.statement_type = statement_type;
        self
    }

    pub fn with_statement(mut self, statement: Option<StatementHandle>) -> Self {
        self.statement = statement;
        self
    }

    pub fn with_cacheable(mut self, cacheable: bool) -> Self {
        self.cacheable = cacheable;
        self
    }

    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn with_bind_var_needs(mut self, needs: Vec<String>) -> Self {
        self.bind_var_needs = needs;
        self
    }

    pub fn statement_type(&self) -> StatementType {
        self.statement_type
    }

    /// The raw query text the plan was built from.
    pub fn original(&self) -> &str {
        &self.original
    }

    pub fn statement(&self) -> Option<&StatementHandle> {
        self.statement.as_ref()
    }

    pub fn instructions(&self) -> &TaskGraph {
        &self.instructions
    }

    pub fn is_cacheable(&self) -> bool {
        self.cacheable
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn bind_var_needs(&self) -> &[String] {
        &self.bind_var_needs
    }

    pub fn stats(&self) -> PlanStats {
        *lock(&self.stats)
    }

    /// Weight of the plan in the plan cache.
    pub fn size(&self) -> usize {
        1
    }

    pub fn set_txn_id(&self, txn_id: i64) {
        self.instructions.set_txn_id(txn_id);
    }

    pub async fn execute(&self, ctx: &TaskContext) -> ExecutorOutput {
        let start = Instant::now();
        let out = self.instructions.execute(ctx).await;
        let mut stats = lock(&self.stats);
        stats.exec_count += 1;
        stats.exec_time += start.elapsed();
        stats.rows += out.row_count() as u64;
        if out.is_error() {
            stats.errors += 1;
        }
        out
    }
}

impl fmt::Debug for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plan")
            .field("statement_type", &self.statement_type)
            .field("original", &self.original)
            .field("instructions", &self.instructions)
            .field("cacheable", &self.cacheable)
            .field("read_only", &self.read_only)
            .finish_non_exhaustive()
    }
}
