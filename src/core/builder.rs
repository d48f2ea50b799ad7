//! From analysed statement to executable [`Plan`].
//!
//! Analysis is done by a [`StatementAnalyzer`] living outside the engine. It
//! hands back a [`PlanBuilderInput`] describing the tasks to create and how
//! they depend on each other; [`PlanGraphBuilder`] turns that into a
//! [`TaskGraph`] and [`PlanBuilder`] wraps the graph in a plan, consulting and
//! filling the plan cache on the way.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::RuntimeConfig;
use crate::core::cache::PlanCache;
use crate::core::directives::{AWAIT, CommentDirectives, SHOWRESULTS};
use crate::core::graph::{NodeHandle, TaskGraph};
use crate::core::hierarchy::Hierarchy;
use crate::core::monitor::AsyncMonitor;
use crate::core::output::{ExecutorOutput, RowSet};
use crate::core::plan::{Plan, StatementHandle, StatementType};
use crate::core::task::{
    executor, failing_executor, Executor, HttpTask, LocalTask, MetaDataTask, Task,
};
use crate::core::txn::{TxnControlCounters, TxnCounterManager};
use crate::error::{ExecError, Result};
use crate::http::{HttpClient, HttpRequest, Pagination};

/// How the analysed statement is to be turned into instructions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum InstructionType {
    /// Provider calls, built from the task specs.
    #[default]
    Standard,
    /// Answered entirely in-process from precomputed rows.
    InternallyRoutable,
    /// Built like `Standard` but only ever reads.
    DummiedPg,
    /// Nothing to do.
    Nop,
}

/// One task to create.
pub enum TaskSpec {
    Local(Executor),
    Http {
        hierarchy: Hierarchy,
        request: HttpRequest,
        pagination: Option<Pagination>,
        items_field: Option<String>,
    },
    MetaData {
        provider: String,
        command: String,
        executor: Executor,
    },
}

impl TaskSpec {
    pub fn http(hierarchy: Hierarchy, request: HttpRequest) -> Self {
        TaskSpec::Http {
            hierarchy,
            request,
            pagination: None,
            items_field: None,
        }
    }
}

impl fmt::Debug for TaskSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskSpec::Local(_) => f.write_str("Local"),
            TaskSpec::Http {
                hierarchy, request, ..
            } => f
                .debug_struct("Http")
                .field("table", &hierarchy.table_name())
                .field("method", &hierarchy.method.name)
                .field("url", &request.url)
                .finish_non_exhaustive(),
            TaskSpec::MetaData {
                provider, command, ..
            } => f
                .debug_struct("MetaData")
                .field("provider", provider)
                .field("command", command)
                .finish_non_exhaustive(),
        }
    }
}

/// `to` depends on `from`; both are positions in [`PlanBuilderInput::tasks`].
#[derive(Clone, Debug, PartialEq)]
pub struct DependencySpec {
    pub from: usize,
    pub to: usize,
    pub weight: f64,
    pub alias: String,
}

impl DependencySpec {
    pub fn new(from: usize, to: usize) -> Self {
        Self {
            from,
            to,
            weight: 1.0,
            alias: String::new(),
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = alias.into();
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }
}

#[derive(Debug, Default)]
pub struct PlanBuilderInput {
    pub tasks: Vec<TaskSpec>,
    pub dependencies: Vec<DependencySpec>,
    pub directives: CommentDirectives,
    /// Answer rows for internally routed statements.
    pub internal_rows: Option<RowSet>,
}

impl PlanBuilderInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_task(mut self, task: TaskSpec) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn with_dependency(mut self, dependency: DependencySpec) -> Self {
        self.dependencies.push(dependency);
        self
    }

    pub fn with_directives(mut self, directives: CommentDirectives) -> Self {
        self.directives = directives;
        self
    }

    pub fn with_internal_rows(mut self, rows: RowSet) -> Self {
        self.internal_rows = Some(rows);
        self
    }
}

/// What analysis learned about a statement.
pub struct Analysis {
    pub statement_type: StatementType,
    pub instruction: InstructionType,
    pub read_only: bool,
    /// Session-scoped or time-varying material; the plan must not be cached.
    pub cache_exempt: bool,
    pub statement: Option<StatementHandle>,
    pub bind_var_needs: Vec<String>,
    pub input: PlanBuilderInput,
}

impl Analysis {
    pub fn new(statement_type: StatementType, instruction: InstructionType, input: PlanBuilderInput) -> Self {
        Self {
            statement_type,
            instruction,
            read_only: false,
            cache_exempt: false,
            statement: None,
            bind_var_needs: Vec::new(),
            input,
        }
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn cache_exempt(mut self) -> Self {
        self.cache_exempt = true;
        self
    }

    pub fn with_statement(mut self, statement: StatementHandle) -> Self {
        self.statement = Some(statement);
        self
    }

    pub fn with_bind_var_needs(mut self, needs: Vec<String>) -> Self {
        self.bind_var_needs = needs;
        self
    }
}

/// Parses, rewrites and analyses one statement.
pub trait StatementAnalyzer: Send + Sync {
    fn analyze(&self, query: &str, counters: &TxnControlCounters) -> Result<Analysis>;
}

/// Populates the task graph of one statement.
///
/// Each entry point builds into a fresh graph and only keeps it on success,
/// so a failed build never leaves a partial graph behind.
pub struct PlanGraphBuilder {
    graph: Option<TaskGraph>,
    client: Arc<dyn HttpClient>,
    counters: TxnControlCounters,
    concurrency_limit: Option<usize>,
    page_limit: Option<usize>,
    poll_interval: std::time::Duration,
    max_wait: Option<std::time::Duration>,
}

impl PlanGraphBuilder {
    pub fn new(config: &RuntimeConfig, client: Arc<dyn HttpClient>, counters: TxnControlCounters) -> Self {
        Self {
            graph: None,
            client,
            counters,
            concurrency_limit: config.concurrency_limit(),
            page_limit: config.page_limit(),
            poll_interval: config.poll_interval,
            max_wait: config.async_max_wait,
        }
    }

    fn staging(&self) -> Result<TaskGraph> {
        if self.graph.is_some() {
            return Err(ExecError::Wiring("instructions already built".into()));
        }
        Ok(TaskGraph::new(self.concurrency_limit))
    }

    fn http_task(
        &self,
        hierarchy: Hierarchy,
        request: HttpRequest,
        pagination: Option<Pagination>,
        items_field: Option<String>,
        directives: &CommentDirectives,
    ) -> Result<Box<dyn Task>> {
        let awaited = directives.is_set(AWAIT);
        let mut task = HttpTask::new(hierarchy.clone(), request, self.client.clone())
            .with_page_limit(self.page_limit)
            .with_txn_counters(self.counters)
            .with_show_results(directives.is_set(SHOWRESULTS))
            .with_awaited(awaited);
        if let Some(pagination) = pagination {
            task = task.with_pagination(pagination);
        }
        if let Some(field) = items_field {
            task = task.with_items_field(field);
        }

        // non-awaitable methods are rejected by `monitor`
        if awaited {
            let monitor = AsyncMonitor::new(&hierarchy.provider, self.client.clone())?
                .with_poll_interval(self.poll_interval)
                .with_max_wait(self.max_wait)
                .monitor(&hierarchy.method, Box::new(task), directives)?;
            return Ok(Box::new(monitor));
        }
        Ok(Box::new(task))
    }

    /// Materialises every task spec and wires the dependencies between them.
    pub fn create_instruction_for(&mut self, input: PlanBuilderInput) -> Result<()> {
        let mut graph = self.staging()?;
        if input.tasks.is_empty() {
            return Err(ExecError::EmptyGraph);
        }
        let directives = input.directives;

        let mut handles: Vec<NodeHandle> = Vec::with_capacity(input.tasks.len());
        for spec in input.tasks {
            let task: Box<dyn Task> = match spec {
                TaskSpec::Local(executor) => Box::new(LocalTask::new(executor)),
                TaskSpec::Http {
                    hierarchy,
                    request,
                    pagination,
                    items_field,
                } => self.http_task(hierarchy, request, pagination, items_field, &directives)?,
                TaskSpec::MetaData {
                    provider,
                    command,
                    executor,
                } => Box::new(MetaDataTask::new(provider, command, executor)),
            };
            handles.push(graph.create_boxed_node(task));
        }

        for dep in &input.dependencies {
            let (Some(&from), Some(&to)) = (handles.get(dep.from), handles.get(dep.to)) else {
                return Err(ExecError::Wiring(format!(
                    "dependency {} -> {} refers to a task that was not declared ({} tasks)",
                    dep.from,
                    dep.to,
                    handles.len()
                )));
            };
            graph.new_aliased_dependency(from, to, dep.weight, &dep.alias)?;
        }

        self.graph = Some(graph);
        Ok(())
    }

    /// A single local task answering with the precomputed rows.
    pub fn pg_internal(&mut self, input: PlanBuilderInput) -> Result<()> {
        let mut graph = self.staging()?;
        let rows = input.internal_rows.unwrap_or_default();
        graph.create_node(
            LocalTask::new(executor(move |_| {
                let rows = rows.clone();
                async move { ExecutorOutput::from_rows(rows) }
            }))
            .with_debug_name("internal"),
        );
        self.graph = Some(graph);
        Ok(())
    }

    /// A single local task that does nothing.
    pub fn nop(&mut self, _input: PlanBuilderInput) -> Result<()> {
        let mut graph = self.staging()?;
        graph.create_node(LocalTask::nop().with_debug_name("nop"));
        self.graph = Some(graph);
        Ok(())
    }

    pub fn into_graph(self) -> Option<TaskGraph> {
        self.graph
    }
}

/// Builds plans, reusing cached ones when allowed.
pub struct PlanBuilder {
    config: RuntimeConfig,
    cache: Arc<PlanCache>,
    analyzer: Arc<dyn StatementAnalyzer>,
    client: Arc<dyn HttpClient>,
    builds: AtomicU64,
}

impl PlanBuilder {
    pub fn new(
        config: RuntimeConfig,
        cache: Arc<PlanCache>,
        analyzer: Arc<dyn StatementAnalyzer>,
        client: Arc<dyn HttpClient>,
    ) -> Self {
        Self {
            config,
            cache,
            analyzer,
            client,
            builds: AtomicU64::new(0),
        }
    }

    pub fn with_cache(mut self, cache: Arc<PlanCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn cache(&self) -> &Arc<PlanCache> {
        &self.cache
    }

    /// Number of times a graph was built rather than taken from the cache.
    pub fn build_count(&self) -> u64 {
        self.builds.load(Ordering::Relaxed)
    }

    /// Returns the plan for `query`.
    ///
    /// A cache hit gets a fresh transaction id and is otherwise reused as is.
    /// Failures during analysis or construction yield a plan whose single
    /// task reports the error.
    pub fn build_plan(&self, query: &str, txn: &TxnCounterManager) -> Arc<Plan> {
        if self.config.plan_cache_enabled {
            if let Some(plan) = self.cache.get(query) {
                let txn_id = txn.next_txn_id();
                log::info!("retrieving query plan from cache (txn {txn_id})");
                plan.set_txn_id(txn_id);
                return plan;
            }
        }

        self.builds.fetch_add(1, Ordering::Relaxed);
        let counters = TxnControlCounters::new(txn);
        log::debug!("building plan: {counters:?}");
        match self.build_fresh(query, counters) {
            Ok(plan) => {
                let plan = Arc::new(plan);
                if plan.is_cacheable() && self.config.plan_cache_enabled {
                    log::debug!("plan cache: inserting '{query}'");
                    self.cache.set(query, plan.clone());
                }
                plan
            }
            Err(e) => {
                log::warn!("plan construction failed: {e}");
                Arc::new(erroneous_plan(query, e, self.config.concurrency_limit()))
            }
        }
    }

    fn build_fresh(&self, query: &str, counters: TxnControlCounters) -> Result<Plan> {
        let mut analysis = self.analyzer.analyze(query, &counters)?;
        if analysis.input.directives.is_empty() {
            analysis.input.directives = CommentDirectives::from_query(query);
        }

        let mut graph_builder = PlanGraphBuilder::new(&self.config, self.client.clone(), counters);
        let mut read_only = analysis.read_only;
        let mut cacheable = !analysis.cache_exempt;
        match analysis.instruction {
            InstructionType::InternallyRoutable => {
                read_only = true;
                cacheable = false;
                graph_builder.pg_internal(analysis.input)?;
            }
            InstructionType::Standard => graph_builder.create_instruction_for(analysis.input)?,
            InstructionType::DummiedPg => {
                read_only = true;
                graph_builder.create_instruction_for(analysis.input)?;
            }
            InstructionType::Nop => {
                read_only = true;
                graph_builder.nop(analysis.input)?;
            }
        }
        let graph = graph_builder.into_graph().ok_or(ExecError::EmptyGraph)?;
        graph.optimise()?;

        Ok(Plan::new(query, graph)
            .with_statement_type(analysis.statement_type)
            .with_statement(analysis.statement)
            .with_read_only(read_only)
            .with_cacheable(cacheable)
            .with_bind_var_needs(analysis.bind_var_needs))
    }
}

impl fmt::Debug for PlanBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlanBuilder")
            .field("config", &self.config)
            .field("cache", &self.cache)
            .field("builds", &self.build_count())
            .finish_non_exhaustive()
    }
}

/// A plan whose only task reports `err`. Never cached.
pub fn erroneous_plan(query: &str, err: ExecError, concurrency_limit: Option<usize>) -> Plan {
    let mut graph = TaskGraph::new(concurrency_limit);
    graph.create_node(LocalTask::new(failing_executor(Arc::new(err))).with_debug_name("error"));
    Plan::new(query, graph).with_cacheable(false)
}
