use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use crate::core::context::TaskContext;
use crate::core::hierarchy::Hierarchy;
use crate::core::lock;
use crate::core::output::{ExecutorOutput, RowSet};
use crate::core::task::{
    Capability, ExecRequest, Executor, ExecutorSlot, Task, TaskCore, TaskId, TaskKind,
};
use crate::core::txn::TxnControlCounters;
use crate::error::Result;
use crate::http::{HttpClient, HttpRequest, Pagination};

/// One outbound provider call, following continuation tokens when the
/// resource is paginated.
///
/// Every page goes through the same aggregation path: the array under
/// `items_field` (when configured) or the whole body becomes rows. The
/// envelope's body is the last page's body.
///
/// Mutating methods answer with the body and a success message instead of
/// rows, unless the statement asked for `SHOWRESULTS`.
pub struct HttpTask {
    core: TaskCore,
    hierarchy: Hierarchy,
    request: HttpRequest,
    pagination: Option<Pagination>,
    items_field: Option<String>,
    page_limit: Option<usize>,
    show_results: bool,
    awaited: bool,
    client: Arc<dyn HttpClient>,
    txn: Mutex<TxnControlCounters>,
    custom: ExecutorSlot,
}

impl HttpTask {
    pub fn new(hierarchy: Hierarchy, request: HttpRequest, client: Arc<dyn HttpClient>) -> Self {
        Self {
            core: TaskCore::default(),
            hierarchy,
            request,
            pagination: None,
            items_field: None,
            page_limit: None,
            show_results: false,
            awaited: false,
            client,
            txn: Mutex::new(TxnControlCounters::default()),
            custom: ExecutorSlot::new(None),
        }
    }

    pub fn with_pagination(mut self, pagination: Pagination) -> Self {
        self.pagination = Some(pagination);
        self
    }

    pub fn with_items_field(mut self, field: impl Into<String>) -> Self {
        self.items_field = Some(field.into());
        self
    }

    /// Maximum number of pages fetched per execution. `None` is unlimited.
    pub fn with_page_limit(mut self, limit: Option<usize>) -> Self {
        self.page_limit = limit;
        self
    }

    /// Return the response items as rows even when the method mutates.
    pub fn with_show_results(mut self, show_results: bool) -> Self {
        self.show_results = show_results;
        self
    }

    /// The call runs under an async monitor, so success means completion.
    pub fn with_awaited(mut self, awaited: bool) -> Self {
        self.awaited = awaited;
        self
    }

    pub fn with_txn_counters(self, counters: TxnControlCounters) -> Self {
        *lock(&self.txn) = counters;
        self
    }

    pub fn hierarchy(&self) -> &Hierarchy {
        &self.hierarchy
    }

    pub fn request(&self) -> &HttpRequest {
        &self.request
    }

    pub fn txn_counters(&self) -> TxnControlCounters {
        *lock(&self.txn)
    }

    fn aggregate(&self, rows: &mut RowSet, body: &Value) {
        match &self.items_field {
            Some(field) => {
                if let Some(items) = body.get(field) {
                    rows.push_value(items.clone());
                }
            }
            None => rows.push_value(body.clone()),
        }
    }

    fn finish(&self, rows: RowSet, body: Value) -> ExecutorOutput {
        if self.hierarchy.method.read_only || self.show_results {
            return ExecutorOutput::from_rows(rows).with_body(body);
        }
        ExecutorOutput::from_body(body).with_messages(self.hierarchy.success_messages(self.awaited))
    }

    async fn fetch(&self, ctx: &TaskContext) -> Result<ExecutorOutput> {
        let auth = ctx.auth_for(&self.hierarchy.provider.name)?;
        let mut request = self.request.clone();
        let mut rows = RowSet::new();
        let mut pages = 0usize;

        loop {
            let response = self.client.send(&request, &auth).await?;
            pages += 1;
            self.aggregate(&mut rows, &response.body);

            let next = self
                .pagination
                .as_ref()
                .and_then(|p| p.next_token(&response.body).map(|token| (p, token)));
            let Some((pagination, token)) = next else {
                return Ok(self.finish(rows, response.body));
            };
            if self.page_limit.is_some_and(|limit| pages >= limit) {
                log::info!(
                    "{}: page limit of {pages} reached, remaining pages not fetched",
                    self.hierarchy.table_name()
                );
                return Ok(self.finish(rows, response.body));
            }
            log::debug!("{}: fetching page {}", self.hierarchy.table_name(), pages + 1);
            request.set_next_page(&token, &pagination.token_kind)?;
        }
    }
}

impl std::fmt::Debug for HttpTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTask")
            .field("id", &self.core.id())
            .field("table", &self.hierarchy.table_name())
            .field("method", &self.hierarchy.method.name)
            .field("url", &self.request.url)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Task for HttpTask {
    fn kind(&self) -> TaskKind {
        TaskKind::Http
    }

    fn id(&self) -> TaskId {
        self.core.id()
    }

    fn set_id(&mut self, id: TaskId) {
        self.core.id = id;
    }

    fn debug_name(&self) -> String {
        format!(
            "{} [{}.{}]",
            self.core.name(self.kind()),
            self.hierarchy.table_name(),
            self.hierarchy.method.name
        )
    }

    fn is_read_only(&self) -> bool {
        self.hierarchy.method.read_only
    }

    async fn execute(&self, ctx: &TaskContext) -> ExecutorOutput {
        if let Some(custom) = self.custom.get() {
            return custom(ExecRequest {
                task_id: self.id(),
                ctx: ctx.clone(),
                inputs: self.core.snapshot(),
                txn: Some(self.txn_counters()),
            })
            .await;
        }
        log::debug!(
            "{} {} (txn {})",
            self.request.method,
            self.request.url,
            self.txn_counters().txn_id
        );
        match self.fetch(ctx).await {
            Ok(out) => out,
            Err(e) => {
                log::warn!("{} failed: {e}", self.debug_name());
                ExecutorOutput::erroneous(e)
            }
        }
    }

    fn set_txn_id(&self, txn_id: i64) {
        lock(&self.txn).set_txn_id(txn_id);
    }

    fn set_executor(&self, executor: Executor) -> Result<()> {
        self.kind().check(Capability::SetExecutor)?;
        self.custom.set(executor);
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
    use crate::core::context::AuthCtx;
    use crate::core::hierarchy::{MethodHandle, ProviderHandle};
    use crate::core::task::executor;
    use crate::error::ExecError;
    use crate::http::{HttpResponse, NextPageToken};
    use serde_json::json;
    use std::collections::VecDeque;

    struct Pages {
        responses: Mutex<VecDeque<Result<Value>>>,
        seen: Mutex<Vec<String>>,
    }

    impl Pages {
        fn new(responses: Vec<Result<Value>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl HttpClient for Pages {
        async fn send(&self, request: &HttpRequest, _auth: &AuthCtx) -> Result<HttpResponse> {
            self.seen.lock().unwrap().push(request.url.clone());
            let body = self.responses.lock().unwrap().pop_front().unwrap()?;
            Ok(HttpResponse { status: 200, body })
        }
    }

    fn instances() -> Hierarchy {
        Hierarchy::new(
            ProviderHandle::new("google", "v1"),
            "compute",
            "instances",
            MethodHandle::new("list", "GET"),
        )
    }

    fn paginated(client: Arc<Pages>) -> HttpTask {
        HttpTask::new(
            instances(),
            HttpRequest::get("https://compute.test/v1/instances"),
            client,
        )
        .with_pagination(Pagination::new(
            NextPageToken::QueryParam("pageToken".into()),
            "nextPageToken",
        ))
        .with_items_field("items")
    }

    #[tokio::test]
    async fn test_follows_page_tokens_and_aggregates_items() {
        let client = Pages::new(vec![
            Ok(json!({"items": [{"name": "a"}, {"name": "b"}], "nextPageToken": "p2"})),
            Ok(json!({"items": [{"name": "c"}]})),
        ]);
        let task = paginated(client.clone());

        let out = task.execute(&TaskContext::default()).await;
        assert!(!out.is_error());
        assert_eq!(out.row_count(), 3);
        assert_eq!(out.body, Some(json!({"items": [{"name": "c"}]})));
        assert_eq!(
            *client.seen.lock().unwrap(),
            vec![
                "https://compute.test/v1/instances",
                "https://compute.test/v1/instances?pageToken=p2"
            ]
        );
    }

    #[tokio::test]
    async fn test_page_limit_stops_early() {
        let client = Pages::new(vec![
            Ok(json!({"items": [{"name": "a"}], "nextPageToken": "p2"})),
            Ok(json!({"items": [{"name": "b"}], "nextPageToken": "p3"})),
        ]);
        let task = paginated(client.clone()).with_page_limit(Some(1));
        let out = task.execute(&TaskContext::default()).await;
        assert_eq!(out.row_count(), 1);
        assert_eq!(client.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_transport_error_lands_in_envelope() {
        let client = Pages::new(vec![Err(ExecError::HttpStatus {
            status: 403,
            body: "denied".into(),
        })]);
        let out = paginated(client).execute(&TaskContext::default()).await;
        assert!(matches!(out.error(), Some(ExecError::HttpStatus { status: 403, .. })));
    }

    fn create_disk(client: Arc<Pages>) -> HttpTask {
        let insert = Hierarchy::new(
            ProviderHandle::new("google", "v1"),
            "compute",
            "disks",
            MethodHandle::new("insert", "POST").awaitable(),
        );
        HttpTask::new(
            insert,
            HttpRequest::post("https://compute.test/v1/disks", json!({"name": "d1"})),
            client,
        )
    }

    fn pending_operation() -> Value {
        json!({"kind": "compute#operation", "status": "PENDING", "items": [{"name": "d1"}]})
    }

    #[tokio::test]
    async fn test_mutation_returns_body_and_success_message() {
        let out = create_disk(Pages::new(vec![Ok(pending_operation())]))
            .execute(&TaskContext::default())
            .await;
        assert!(out.rows.is_none());
        assert_eq!(out.body.unwrap()["status"], json!("PENDING"));
        assert_eq!(out.messages, vec!["The operation was despatched successfully"]);

        let awaited = create_disk(Pages::new(vec![Ok(pending_operation())]))
            .with_awaited(true)
            .execute(&TaskContext::default())
            .await;
        assert_eq!(awaited.messages, vec!["The operation completed successfully"]);
    }

    #[tokio::test]
    async fn test_show_results_turns_mutation_response_into_rows() {
        let out = create_disk(Pages::new(vec![Ok(pending_operation())]))
            .with_items_field("items")
            .with_show_results(true)
            .execute(&TaskContext::default())
            .await;
        assert!(out.messages.is_empty());
        let rows = out.rows.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows.rows[0]["name"], json!("d1"));
    }

    #[tokio::test]
    async fn test_reads_carry_no_success_message() {
        let client = Pages::new(vec![Ok(json!({"items": [{"name": "a"}]}))]);
        let out = paginated(client).execute(&TaskContext::default()).await;
        assert!(out.messages.is_empty());
        assert_eq!(out.row_count(), 1);
    }

    #[tokio::test]
    async fn test_custom_executor_sees_rebound_txn_id() {
        let task = paginated(Pages::new(vec![]));
        task.set_executor(executor(|req: ExecRequest| async move {
            ExecutorOutput::from_body(json!({"txn": req.txn.map(|t| t.txn_id)}))
        }))
        .unwrap();
        task.set_txn_id(77);
        let out = task.execute(&TaskContext::default()).await;
        assert_eq!(out.body, Some(json!({"txn": 77})));
    }
}
