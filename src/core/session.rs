use std::sync::Arc;

use crate::config::RuntimeConfig;
use crate::core::builder::{PlanBuilder, StatementAnalyzer};
use crate::core::cache::PlanCache;
use crate::core::context::TaskContext;
use crate::core::output::ExecutorOutput;
use crate::core::plan::Plan;
use crate::core::txn::{GenerationStore, TxnCounterManager, TxnIdAllocator};
use crate::error::Result;
use crate::http::{HttpClient, RestClient};

/// One connection: builds and runs plans for the statements it is given.
#[derive(Debug)]
pub struct Session {
    builder: PlanBuilder,
    txn: TxnCounterManager,
    ctx: TaskContext,
}

impl Session {
    pub fn new(
        config: RuntimeConfig,
        analyzer: Arc<dyn StatementAnalyzer>,
        client: Arc<dyn HttpClient>,
        txn: TxnCounterManager,
    ) -> Self {
        let cache = Arc::new(PlanCache::new(config.query_cache_size));
        Self {
            builder: PlanBuilder::new(config, cache, analyzer, client),
            txn,
            ctx: TaskContext::default(),
        }
    }

    /// Opens a session against `store`, sending provider calls through a
    /// [`RestClient`] configured from `config`.
    pub fn connect(
        config: RuntimeConfig,
        analyzer: Arc<dyn StatementAnalyzer>,
        store: &dyn GenerationStore,
        txn_ids: Arc<TxnIdAllocator>,
    ) -> Result<Self> {
        let txn = TxnCounterManager::from_store(store, txn_ids)?;
        let client = RestClient::new().with_timeout(config.api_request_timeout);
        Ok(Self::new(config, analyzer, Arc::new(client), txn))
    }

    /// Shares `cache` with other sessions.
    pub fn with_plan_cache(self, cache: Arc<PlanCache>) -> Self {
        let Session { builder, txn, ctx } = self;
        Self {
            builder: builder.with_cache(cache),
            txn,
            ctx,
        }
    }

    pub fn with_context(mut self, ctx: TaskContext) -> Self {
        self.ctx = ctx;
        self
    }

    pub fn plan_builder(&self) -> &PlanBuilder {
        &self.builder
    }

    pub fn txn_counters(&self) -> &TxnCounterManager {
        &self.txn
    }

    /// Builds (or fetches) the plan for one statement without running it.
    pub fn plan(&self, raw_query: &str) -> Arc<Plan> {
        self.builder.build_plan(raw_query, &self.txn.for_statement())
    }

    pub async fn execute(&self, raw_query: &str) -> ExecutorOutput {
        let plan = self.plan(raw_query);
        log::debug!("executing {:?} plan for '{raw_query}'", plan.statement_type());
        plan.execute(&self.ctx).await
    }
}
