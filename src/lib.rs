//! # Plumbline
//!
//! The plan execution engine behind a SQL-over-REST query layer: statements
//! are compiled into graphs of tasks (provider calls, local computation,
//! metadata commands) that run in dependency order under a concurrency limit.
//!
//! ## Features
//!
//! - **Task graphs**: deterministic topological order, bounded parallelism,
//!   failure isolation between unrelated branches
//! - **Async monitors**: poll long-running provider operations until done
//! - **Plan cache**: LRU keyed by raw query text, replayed under fresh
//!   transaction ids
//! - **Transaction counters**: process-wide transaction ids, per-statement
//!   insert ids
//! - **Optional logging setup**: `env_logger` initialisation behind the
//!   `logging` feature
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use plumbline::prelude::*;
//! use serde_json::json;
//!
//! # async fn run() {
//! let mut graph = TaskGraph::new(Some(2));
//! let list = graph.create_node(LocalTask::new(executor(|_| async {
//!     ExecutorOutput::from_body(json!([{"name": "disk-1"}]))
//! })));
//! let count = graph.create_node(LocalTask::new(executor(|req: ExecRequest| async move {
//!     let n = req.inputs.get("").and_then(|o| o.body.clone());
//!     ExecutorOutput::from_body(json!({"upstream": n}))
//! })));
//! graph.new_dependency(list, count, 1.0).unwrap();
//!
//! let out = graph.execute(&TaskContext::default()).await;
//! assert!(!out.is_error());
//! # }
//! ```
//!
//! ## Module Organization
//!
//! - [`config`]: runtime settings and their string keys
//! - [`http`]: the outbound HTTP seam and pagination
//! - [`error`]: the crate error type
//! - [`prelude`]: commonly used types (import with `use plumbline::prelude::*`)

// ============================================================================
// Core Module
// ============================================================================

mod core;

pub mod config;
pub mod error;
pub mod http;

#[cfg(any(test, feature = "logging"))]
pub mod logutil;

// ============================================================================
// Public Re-exports - Granular Imports
// ============================================================================

// Tasks
pub use crate::core::task::{
    executor, failing_executor, Capability, ExecRequest, Executor, HttpTask, LocalTask,
    MetaDataTask, Task, TaskCore, TaskId, TaskInputs, TaskKind, UNASSIGNED_ID,
};

// Execution environment and results
pub use crate::core::context::{AuthCtx, AuthProvider, NoAuth, StaticAuth, StatusBuffer, StatusWriter, TaskContext};
pub use crate::core::directives::{CommentDirectives, AWAIT, NOSTATUS, SHOWRESULTS};
pub use crate::core::hierarchy::{Hierarchy, MethodHandle, ProviderHandle};
pub use crate::core::output::{ExecutorOutput, RawRows, RowSet};

// Scheduling
pub use crate::core::graph::{DependencyEdge, NodeHandle, TaskGraph};
pub use crate::core::monitor::{operation_descriptor, AsyncMonitor, AsyncMonitorTask, DEFAULT_POLL_INTERVAL};

// Plans
pub use crate::core::builder::{
    erroneous_plan, Analysis, DependencySpec, InstructionType, PlanBuilder, PlanBuilderInput,
    PlanGraphBuilder, StatementAnalyzer, TaskSpec,
};
pub use crate::core::cache::{CacheStats, PlanCache};
pub use crate::core::plan::{Plan, PlanStats, StatementHandle, StatementType};
pub use crate::core::session::Session;

// Identifiers
pub use crate::core::txn::{
    GenerationStore, InMemoryGenerationStore, TxnControlCounters, TxnCounterManager,
    TxnIdAllocator,
};

pub use config::RuntimeConfig;
pub use error::{ExecError, Result};
pub use http::{HttpClient, HttpRequest, HttpResponse, NextPageToken, Pagination, RestClient};

// ============================================================================
// Prelude Modules - Convenient Bulk Imports
// ============================================================================

/// The main prelude: everything needed to build and run plans.
///
/// # Example
/// ```rust
/// use plumbline::prelude::*;
/// ```
pub mod prelude {
    pub use super::{
        // Tasks
        executor,
        failing_executor,
        ExecRequest,
        Executor,
        HttpTask,
        LocalTask,
        MetaDataTask,
        Task,
        TaskId,
        TaskKind,
        // Execution
        AuthCtx,
        AuthProvider,
        CommentDirectives,
        ExecutorOutput,
        Hierarchy,
        MethodHandle,
        ProviderHandle,
        RowSet,
        StatusWriter,
        TaskContext,
        // Scheduling
        AsyncMonitor,
        NodeHandle,
        TaskGraph,
        // Plans
        Analysis,
        DependencySpec,
        InstructionType,
        Plan,
        PlanBuilder,
        PlanBuilderInput,
        PlanCache,
        Session,
        StatementAnalyzer,
        StatementType,
        TaskSpec,
        // Identifiers
        TxnControlCounters,
        TxnCounterManager,
        TxnIdAllocator,
        // Errors and config
        ExecError,
        RuntimeConfig,
        // HTTP
        HttpClient,
        HttpRequest,
        HttpResponse,
        NextPageToken,
        Pagination,
    };
}

/// Prelude for driving task graphs directly, without plans or sessions.
///
/// # Example
/// ```rust
/// use plumbline::graph_prelude::*;
/// ```
pub mod graph_prelude {
    pub use super::{
        executor, ExecRequest, ExecutorOutput, LocalTask, NodeHandle, RowSet, Task, TaskContext,
        TaskGraph,
    };
}

// ============================================================================
// Re-export commonly used external types for convenience
// ============================================================================

pub use serde_json::Value as JsonValue;

// ============================================================================
// Library Metadata
// ============================================================================

/// The version of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The name of this crate.
pub const NAME: &str = env!("CARGO_PKG_NAME");
