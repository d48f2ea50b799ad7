//! Runs an awaited INSERT and a paginated SELECT through a session.
//!
//! The provider is simulated in-process, so the example needs no credentials:
//! - the disk listing answers in two pages
//! - creating a disk returns a pending operation that completes on the third poll
//!
//! Run with `RUST_LOG=plumbline=debug` to see the engine's own logging.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use plumbline::prelude::*;
use plumbline::{AuthCtx, InMemoryGenerationStore, Result};
use serde_json::json;

const DISKS: &str = "https://compute.googleapis.com/compute/v1/projects/demo/zones/us-east1-b/disks";
const OPERATION: &str =
    "https://compute.googleapis.com/compute/v1/projects/demo/zones/us-east1-b/operations/op-42";

// ============================================================================
// Simulated provider
// ============================================================================

#[derive(Default)]
struct FakeCompute {
    polls: AtomicUsize,
}

#[async_trait]
impl HttpClient for FakeCompute {
    async fn send(&self, request: &HttpRequest, _auth: &AuthCtx) -> Result<HttpResponse> {
        println!("[provider] {} {}", request.method, request.url);
        let body = match (request.method.as_str(), request.url.as_str()) {
            ("GET", DISKS) => json!({
                "items": [{"name": "boot-disk", "sizeGb": "10"}],
                "nextPageToken": "page-2"
            }),
            ("GET", url) if url.starts_with(DISKS) => json!({
                "items": [{"name": "data-disk", "sizeGb": "200"}]
            }),
            ("POST", DISKS) => json!({
                "kind": "compute#operation",
                "operationType": "insert",
                "status": "PENDING",
                "selfLink": OPERATION
            }),
            ("GET", OPERATION) => {
                if self.polls.fetch_add(1, Ordering::SeqCst) < 2 {
                    json!({
                        "kind": "compute#operation",
                        "operationType": "insert",
                        "status": "RUNNING",
                        "selfLink": OPERATION
                    })
                } else {
                    json!({
                        "kind": "compute#operation",
                        "operationType": "insert",
                        "status": "DONE",
                        "endTime": "2024-05-01T12:00:00Z"
                    })
                }
            }
            _ => {
                return Err(ExecError::HttpStatus {
                    status: 404,
                    body: format!("unknown resource {}", request.url),
                });
            }
        };
        Ok(HttpResponse { status: 200, body })
    }
}

// ============================================================================
// Statement analysis
// ============================================================================

struct DiskStatements;

impl StatementAnalyzer for DiskStatements {
    fn analyze(&self, query: &str, _counters: &TxnControlCounters) -> Result<Analysis> {
        let provider = ProviderHandle::new("google", "v1");
        if query.trim_start().to_ascii_uppercase().starts_with("SELECT") {
            let list = Hierarchy::new(provider, "compute", "disks", MethodHandle::new("list", "GET"));
            let input = PlanBuilderInput::new().with_task(TaskSpec::Http {
                hierarchy: list,
                request: HttpRequest::get(DISKS),
                pagination: Some(Pagination::new(
                    NextPageToken::QueryParam("pageToken".into()),
                    "nextPageToken",
                )),
                items_field: Some("items".into()),
            });
            return Ok(Analysis::new(StatementType::Select, InstructionType::Standard, input).read_only());
        }

        let insert = Hierarchy::new(
            provider,
            "compute",
            "disks",
            MethodHandle::new("insert", "POST").awaitable(),
        );
        let input = PlanBuilderInput::new().with_task(TaskSpec::http(
            insert,
            HttpRequest::post(DISKS, json!({"name": "scratch-disk", "sizeGb": 50})),
        ));
        Ok(Analysis::new(StatementType::Insert, InstructionType::Standard, input))
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    env_logger::init();
    println!("=== Plumbline Awaited Operation Example ===\n");

    let config = RuntimeConfig::new()
        .with_poll_interval(Duration::from_millis(250))
        .with_concurrency_limit(4);
    let txn = TxnCounterManager::from_store(
        &InMemoryGenerationStore::new(),
        Arc::new(TxnIdAllocator::new()),
    )
    .unwrap_or_else(|e| panic!("cannot open session: {e}"));
    let session = Session::new(
        config,
        Arc::new(DiskStatements),
        Arc::new(FakeCompute::default()),
        txn,
    );

    println!("--- SELECT across pages ---");
    let out = session
        .execute("SELECT name, sizeGb FROM google.compute.disks WHERE project = 'demo' AND zone = 'us-east1-b'")
        .await;
    match out.error() {
        Some(e) => println!("error: {e}"),
        None => {
            for row in out.rows.unwrap_or_default().rows {
                println!("  {} ({} GB)", row["name"], row["sizeGb"]);
            }
        }
    }

    println!("\n--- INSERT with AWAIT ---");
    let out = session
        .execute("INSERT /*+ AWAIT */ INTO google.compute.disks (project, zone, data__name) SELECT 'demo', 'us-east1-b', 'scratch-disk'")
        .await;
    match out.error() {
        Some(e) => println!("error: {e}"),
        None => println!("final operation: {}", out.body.unwrap_or_default()),
    }

    println!("\n=== Done ===");
}
