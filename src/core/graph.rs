//! The task graph: an arena of tasks plus an arena of dependency edges.
//!
//! Execution is a parallel topological walk. A task is dispatched once every
//! task it depends on has completed successfully; ready tasks run in parallel
//! up to the concurrency limit. When a task fails, everything downstream of it
//! is left unexecuted and reported in the graph's error.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use tokio::task::JoinSet;

use crate::core::context::TaskContext;
use crate::core::lock;
use crate::core::output::ExecutorOutput;
use crate::core::task::{Task, TaskId, UNASSIGNED_ID};
use crate::error::{ExecError, Result};

static NEXT_TASK_ID: AtomicI64 = AtomicI64::new(1);

fn next_task_id() -> TaskId {
    NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed)
}

/// Reference to a node of one particular graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeHandle {
    id: TaskId,
    index: usize,
}

impl NodeHandle {
    pub fn id(&self) -> TaskId {
        self.id
    }
}

/// `to` runs after `from` and reads its output under `alias`.
#[derive(Clone, Debug, PartialEq)]
pub struct DependencyEdge {
    pub from: TaskId,
    pub to: TaskId,
    /// Advisory only; never changes execution order.
    pub weight: f64,
    pub alias: String,
}

pub struct TaskGraph {
    nodes: Vec<Arc<dyn Task>>,
    index: HashMap<TaskId, usize>,
    edges: Vec<DependencyEdge>,
    concurrency_limit: Option<usize>,
    order: Mutex<Option<Arc<Vec<usize>>>>,
    optimised: Mutex<HashSet<TaskId>>,
    last_outputs: Mutex<HashMap<TaskId, ExecutorOutput>>,
}

impl TaskGraph {
    /// `concurrency_limit` of `None` runs every ready task at once; `Some(1)`
    /// is strictly sequential.
    pub fn new(concurrency_limit: Option<usize>) -> Self {
        Self {
            nodes: Vec::new(),
            index: HashMap::new(),
            edges: Vec::new(),
            concurrency_limit: concurrency_limit.filter(|limit| *limit > 0),
            order: Mutex::new(None),
            optimised: Mutex::new(HashSet::new()),
            last_outputs: Mutex::new(HashMap::new()),
        }
    }

    pub fn concurrency_limit(&self) -> Option<usize> {
        self.concurrency_limit
    }

    pub fn create_node<T: Task>(&mut self, task: T) -> NodeHandle {
        self.create_boxed_node(Box::new(task))
    }

    /// Assigns the next process-wide id to `task` and takes ownership of it.
    pub fn create_boxed_node(&mut self, mut task: Box<dyn Task>) -> NodeHandle {
        let id = next_task_id();
        task.set_id(id);
        let index = self.nodes.len();
        self.nodes.push(Arc::from(task));
        self.index.insert(id, index);
        *lock(&self.order) = None;
        log::debug!("graph: created node {id}");
        NodeHandle { id, index }
    }

    pub fn new_dependency(&mut self, from: NodeHandle, to: NodeHandle, weight: f64) -> Result<()> {
        self.new_aliased_dependency(from, to, weight, "")
    }

    /// Records the edge and tells `to` to read `from`'s output under `alias`.
    pub fn new_aliased_dependency(
        &mut self,
        from: NodeHandle,
        to: NodeHandle,
        weight: f64,
        alias: &str,
    ) -> Result<()> {
        self.check_handle(from)?;
        self.check_handle(to)?;
        if from.id == to.id {
            return Err(ExecError::Wiring(format!("task {} cannot depend on itself", from.id)));
        }
        self.nodes[to.index].set_input_alias(alias, from.id)?;
        self.edges.push(DependencyEdge {
            from: from.id,
            to: to.id,
            weight,
            alias: alias.to_string(),
        });
        *lock(&self.order) = None;
        Ok(())
    }

    fn check_handle(&self, handle: NodeHandle) -> Result<()> {
        match self.index.get(&handle.id) {
            Some(&index) if index == handle.index => Ok(()),
            _ => Err(ExecError::Wiring(format!(
                "task {} is not a node of this graph",
                handle.id
            ))),
        }
    }

    pub fn node(&self, handle: NodeHandle) -> Option<&Arc<dyn Task>> {
        self.index.get(&handle.id).map(|&i| &self.nodes[i])
    }

    pub fn node_by_id(&self, id: TaskId) -> Option<&Arc<dyn Task>> {
        self.index.get(&id).map(|&i| &self.nodes[i])
    }

    pub fn edges(&self) -> &[DependencyEdge] {
        &self.edges
    }

    pub fn size(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// True when no node can change state on a provider.
    pub fn is_read_only(&self) -> bool {
        self.nodes.iter().all(|node| node.is_read_only())
    }

    /// Rebinds the transaction id on every node.
    pub fn set_txn_id(&self, txn_id: i64) {
        for node in &self.nodes {
            node.set_txn_id(txn_id);
        }
    }

    /// Output of the node's most recent execution through this graph.
    pub fn last_output(&self, handle: NodeHandle) -> Option<ExecutorOutput> {
        lock(&self.last_outputs).get(&handle.id).cloned()
    }

    /// Node ids in execution order.
    pub fn execution_order(&self) -> Result<Vec<TaskId>> {
        let order = self.optimise()?;
        Ok(order.iter().map(|&i| self.nodes[i].id()).collect())
    }

    /// Sorts the graph and optimises each task in that order.
    ///
    /// Later calls return the stored order until the graph changes. A task is
    /// optimised at most once, even when an earlier attempt stopped at a later
    /// task or nodes were added since.
    pub fn optimise(&self) -> Result<Arc<Vec<usize>>> {
        let mut order = lock(&self.order);
        if let Some(order) = order.as_ref() {
            return Ok(order.clone());
        }
        let sorted = self.topological_order()?;
        let mut optimised = lock(&self.optimised);
        for &i in &sorted {
            let node = &self.nodes[i];
            if optimised.contains(&node.id()) {
                continue;
            }
            node.optimise()?;
            optimised.insert(node.id());
        }
        let sorted = Arc::new(sorted);
        *order = Some(sorted.clone());
        Ok(sorted)
    }

    fn successors(&self) -> Vec<Vec<usize>> {
        let mut successors = vec![Vec::new(); self.nodes.len()];
        for edge in &self.edges {
            successors[self.index[&edge.from]].push(self.index[&edge.to]);
        }
        successors
    }

    fn in_degrees(&self) -> Vec<usize> {
        let mut degrees = vec![0; self.nodes.len()];
        for edge in &self.edges {
            degrees[self.index[&edge.to]] += 1;
        }
        degrees
    }

    /// Kahn's algorithm, lowest id first among ready nodes.
    fn topological_order(&self) -> Result<Vec<usize>> {
        let successors = self.successors();
        let mut degrees = self.in_degrees();
        let mut ready: BTreeSet<(TaskId, usize)> = degrees
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(i, _)| (self.nodes[i].id(), i))
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some((_, i)) = ready.pop_first() {
            order.push(i);
            for &next in &successors[i] {
                degrees[next] -= 1;
                if degrees[next] == 0 {
                    ready.insert((self.nodes[next].id(), next));
                }
            }
        }

        if order.len() < self.nodes.len() {
            let stuck = degrees
                .iter()
                .position(|d| *d > 0)
                .map_or(UNASSIGNED_ID, |i| self.nodes[i].id());
            return Err(ExecError::CycleDetected(stuck));
        }
        Ok(order)
    }

    /// The node whose output is the graph's result.
    ///
    /// Among the nodes nothing depends on, the one ending the longest
    /// dependency chain wins; ties go to the one that runs last.
    fn sink(&self, order: &[usize], successors: &[Vec<usize>]) -> usize {
        let mut depth = vec![0usize; self.nodes.len()];
        for &i in order {
            for &next in &successors[i] {
                depth[next] = depth[next].max(depth[i] + 1);
            }
        }
        order
            .iter()
            .enumerate()
            .filter(|(_, i)| successors[**i].is_empty())
            .max_by_key(|(position, i)| (depth[**i], *position))
            .map(|(_, &i)| i)
            .unwrap_or(order[order.len() - 1])
    }

    /// Id of the node whose output [`TaskGraph::execute`] returns.
    pub fn sink_id(&self) -> Result<TaskId> {
        if self.nodes.is_empty() {
            return Err(ExecError::EmptyGraph);
        }
        let order = self.optimise()?;
        Ok(self.nodes[self.sink(&order, &self.successors())].id())
    }

    /// Runs the whole graph and returns the sink's output.
    ///
    /// See [`TaskGraph::sink_id`] for which node that is. If any node fails, the
    /// result is a [`ExecError::GraphFailure`] naming the failed nodes and the
    /// dependents that were never dispatched; unrelated nodes still run. A
    /// lone failure with nothing left undispatched is returned as is.
    pub async fn execute(&self, ctx: &TaskContext) -> ExecutorOutput {
        if self.nodes.is_empty() {
            return ExecutorOutput::erroneous(ExecError::EmptyGraph);
        }
        let order = match self.optimise() {
            Ok(order) => order,
            Err(e) => {
                log::warn!("graph optimisation failed, nothing executed: {e}");
                return ExecutorOutput::erroneous(e);
            }
        };

        let mut rank = vec![0; self.nodes.len()];
        for (position, &i) in order.iter().enumerate() {
            rank[i] = position;
        }
        let successors = self.successors();
        let mut remaining = self.in_degrees();
        let mut ready: BTreeSet<usize> = (0..self.nodes.len())
            .filter(|&i| remaining[i] == 0)
            .map(|i| rank[i])
            .collect();

        let mut outputs: HashMap<usize, ExecutorOutput> = HashMap::new();
        let mut failed: Vec<(usize, String)> = Vec::new();
        let mut running = JoinSet::new();

        loop {
            while self.concurrency_limit.is_none_or(|limit| running.len() < limit) {
                let Some(position) = ready.pop_first() else {
                    break;
                };
                let i = order[position];
                let task = self.nodes[i].clone();
                let ctx = ctx.clone();
                log::debug!("graph: dispatching {}", task.debug_name());
                running.spawn(async move {
                    let result = AssertUnwindSafe(task.execute(&ctx)).catch_unwind().await;
                    (i, result)
                });
            }

            let Some(joined) = running.join_next().await else {
                break;
            };
            let (i, result) = match joined {
                Ok(done) => done,
                Err(e) => {
                    running.abort_all();
                    return ExecutorOutput::erroneous(ExecError::TaskAborted {
                        id: UNASSIGNED_ID,
                        reason: e.to_string(),
                    });
                }
            };
            let id = self.nodes[i].id();
            let output = result.unwrap_or_else(|panic| {
                ExecutorOutput::erroneous(ExecError::TaskAborted {
                    id,
                    reason: panic_message(panic.as_ref()),
                })
            });

            if let Some(err) = output.error() {
                log::warn!("graph: task {id} failed: {err}");
                failed.push((i, err.to_string()));
            } else {
                log::debug!("graph: task {id} completed");
                for &next in &successors[i] {
                    // already failed on an earlier input
                    if outputs.contains_key(&next) {
                        continue;
                    }
                    if let Err(e) = self.nodes[next].incident_data(id, output.clone()) {
                        log::warn!("graph: task {} refused input from {id}: {e}", self.nodes[next].id());
                        failed.push((next, e.to_string()));
                        outputs.insert(next, ExecutorOutput::erroneous(e));
                        continue;
                    }
                    remaining[next] -= 1;
                    if remaining[next] == 0 {
                        ready.insert(rank[next]);
                    }
                }
            }
            outputs.insert(i, output);
        }

        {
            let mut last = lock(&self.last_outputs);
            last.clear();
            for (i, output) in &outputs {
                last.insert(self.nodes[*i].id(), output.clone());
            }
        }

        if !failed.is_empty() {
            let skipped: Vec<TaskId> = order
                .iter()
                .filter(|&&i| !outputs.contains_key(&i))
                .map(|&i| self.nodes[i].id())
                .collect();
            if let ([(i, _)], []) = (failed.as_slice(), skipped.as_slice()) {
                return outputs.remove(i).unwrap_or_default();
            }
            log::warn!("graph: dependents not executed: {skipped:?}");
            let failed = failed
                .into_iter()
                .map(|(i, err)| (self.nodes[i].id(), err))
                .collect();
            return ExecutorOutput::erroneous(ExecError::GraphFailure { failed, skipped });
        }

        let sink = self.sink(&order, &successors);
        outputs.remove(&sink).unwrap_or_default()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("panicked: {msg}")
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("panicked: {msg}")
    } else {
        "panicked".to_string()
    }
}

impl Default for TaskGraph {
    fn default() -> Self {
        Self::new(None)
    }
}

impl fmt::Debug for TaskGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskGraph")
            .field("nodes", &self.nodes)
            .field("edges", &self.edges)
            .field("concurrency_limit", &self.concurrency_limit)
            .finish()
    }
}
