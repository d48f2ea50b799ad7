//! Plan reuse across statements and sessions.

mod common;

use std::sync::{Arc, Mutex};

use common::{FnAnalyzer, ScriptedClient};
use plumbline::prelude::*;
use plumbline::Result;
use serde_json::json;

const SELECT: &str = "SELECT name FROM google.compute.instances WHERE project = 'p1'";
const LIST_URL: &str = "https://compute.googleapis.com/compute/v1/projects/p1/aggregated/instances";

fn list_instances() -> Analysis {
    let hierarchy = Hierarchy::new(
        ProviderHandle::new("google", "v1"),
        "compute",
        "instances",
        MethodHandle::new("aggregatedList", "GET"),
    );
    let input = PlanBuilderInput::new().with_task(TaskSpec::Http {
        hierarchy,
        request: HttpRequest::get(LIST_URL),
        pagination: None,
        items_field: Some("items".into()),
    });
    Analysis::new(StatementType::Select, InstructionType::Standard, input).read_only()
}

fn analyze_select(_query: &str, _counters: &TxnControlCounters) -> Result<Analysis> {
    Ok(list_instances())
}

fn txn() -> TxnCounterManager {
    TxnCounterManager::new(Arc::new(TxnIdAllocator::new()), 1, 1)
}

fn builder(config: RuntimeConfig, analyzer: Arc<dyn StatementAnalyzer>) -> PlanBuilder {
    let cache = Arc::new(PlanCache::new(config.query_cache_size));
    PlanBuilder::new(config, cache, analyzer, Arc::new(ScriptedClient::new()))
}

/// Replaces the body of every task in `plan` with one that records the
/// transaction id it runs under.
fn record_txn_ids(plan: &Plan) -> Arc<Mutex<Vec<i64>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let graph = plan.instructions();
    for id in graph.execution_order().unwrap() {
        let seen = seen.clone();
        let node = graph.node_by_id(id).unwrap();
        node.set_executor(executor(move |req: ExecRequest| {
            let seen = seen.clone();
            async move {
                seen.lock().unwrap().push(req.txn.map_or(-1, |t| t.txn_id));
                ExecutorOutput::empty()
            }
        }))
        .unwrap();
    }
    seen
}

#[tokio::test]
async fn test_cached_plan_replays_under_fresh_txn_id() {
    let analyzer = Arc::new(FnAnalyzer::new(analyze_select));
    let builder = builder(RuntimeConfig::new().with_plan_cache(true), analyzer.clone());
    let txn = txn();

    let first = builder.build_plan(SELECT, &txn.for_statement());
    let seen = record_txn_ids(&first);
    first.execute(&TaskContext::default()).await;

    let second = builder.build_plan(SELECT, &txn.for_statement());
    second.execute(&TaskContext::default()).await;

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(builder.build_count(), 1);
    assert_eq!(analyzer.calls(), 1);

    let seen = seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 2);
    assert!(seen[1] > seen[0], "txn ids not fresh: {seen:?}");
    assert_eq!(first.stats().exec_count, 2);

    let stats = builder.cache().stats();
    assert_eq!((stats.len, stats.hits, stats.misses), (1, 1, 1));
}

#[test]
fn test_cache_exempt_statements_are_rebuilt() {
    let analyzer = Arc::new(FnAnalyzer::new(
        |_query: &str, _counters: &TxnControlCounters| -> Result<Analysis> {
            Ok(list_instances().cache_exempt())
        },
    ));
    let builder = builder(RuntimeConfig::new().with_plan_cache(true), analyzer.clone());
    let txn = txn();

    let first = builder.build_plan(SELECT, &txn.for_statement());
    let second = builder.build_plan(SELECT, &txn.for_statement());

    assert!(!first.is_cacheable());
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(builder.build_count(), 2);
    assert_eq!(analyzer.calls(), 2);
    assert!(builder.cache().is_empty());
}

#[test]
fn test_disabled_cache_is_neither_read_nor_written() {
    let analyzer = Arc::new(FnAnalyzer::new(analyze_select));
    let builder = builder(RuntimeConfig::new().with_plan_cache(false), analyzer);
    let txn = txn();

    builder.build_plan(SELECT, &txn.for_statement());
    builder.build_plan(SELECT, &txn.for_statement());

    assert_eq!(builder.build_count(), 2);
    assert!(builder.cache().is_empty());
    assert_eq!(builder.cache().stats().hits + builder.cache().stats().misses, 0);
}

#[test]
fn test_erroneous_plans_are_not_cached() {
    let analyzer = Arc::new(FnAnalyzer::new(
        |_query: &str, _counters: &TxnControlCounters| -> Result<Analysis> {
            Err(ExecError::MissingParameter("zone".into()))
        },
    ));
    let builder = builder(RuntimeConfig::new().with_plan_cache(true), analyzer.clone());
    let txn = txn();

    builder.build_plan(SELECT, &txn.for_statement());
    builder.build_plan(SELECT, &txn.for_statement());

    assert_eq!(analyzer.calls(), 2);
    assert!(builder.cache().is_empty());
}

#[tokio::test]
async fn test_internally_routed_statements_bypass_the_cache() {
    let analyzer = Arc::new(FnAnalyzer::new(
        |_query: &str, _counters: &TxnControlCounters| -> Result<Analysis> {
            let mut rows = RowSet::new();
            rows.push_value(json!({"setting": "search_path", "value": "public"}));
            Ok(Analysis::new(
                StatementType::Show,
                InstructionType::InternallyRoutable,
                PlanBuilderInput::new().with_internal_rows(rows),
            ))
        },
    ));
    let builder = builder(RuntimeConfig::new().with_plan_cache(true), analyzer);
    let txn = txn();

    let plan = builder.build_plan("SHOW search_path", &txn.for_statement());
    let out = plan.execute(&TaskContext::default()).await;
    builder.build_plan("SHOW search_path", &txn.for_statement());

    assert!(plan.is_read_only());
    assert_eq!(out.row_count(), 1);
    assert_eq!(builder.build_count(), 2);
    assert!(builder.cache().is_empty());
}

#[test]
fn test_least_recently_used_plan_is_evicted() {
    let analyzer = Arc::new(FnAnalyzer::new(analyze_select));
    let config = RuntimeConfig::new()
        .with_plan_cache(true)
        .with_query_cache_size(2);
    let builder = builder(config, analyzer);
    let txn = txn();

    builder.build_plan("SELECT 1", &txn.for_statement());
    builder.build_plan("SELECT 2", &txn.for_statement());
    // touch the oldest so the second becomes the eviction candidate
    builder.build_plan("SELECT 1", &txn.for_statement());
    builder.build_plan("SELECT 3", &txn.for_statement());

    let cache = builder.cache();
    assert!(cache.contains("SELECT 1"));
    assert!(!cache.contains("SELECT 2"));
    assert!(cache.contains("SELECT 3"));
    assert_eq!(cache.stats().evictions, 1);
    assert_eq!(builder.build_count(), 3);
}

#[test]
fn test_sessions_can_share_one_cache() {
    let analyzer = Arc::new(FnAnalyzer::new(analyze_select));
    let config = RuntimeConfig::new().with_plan_cache(true);
    let shared = Arc::new(PlanCache::new(8));
    let ids = Arc::new(TxnIdAllocator::new());
    let client = Arc::new(ScriptedClient::new());

    let one = Session::new(
        config.clone(),
        analyzer.clone(),
        client.clone(),
        TxnCounterManager::new(ids.clone(), 1, 1),
    )
    .with_plan_cache(shared.clone());
    let two = Session::new(
        config,
        analyzer.clone(),
        client,
        TxnCounterManager::new(ids, 1, 2),
    )
    .with_plan_cache(shared.clone());

    let a = one.plan(SELECT);
    let b = two.plan(SELECT);

    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(one.plan_builder().build_count(), 1);
    assert_eq!(two.plan_builder().build_count(), 0);
    assert_eq!(analyzer.calls(), 1);
    assert_eq!(shared.len(), 1);
}
