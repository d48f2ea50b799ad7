//! Shared fixtures for integration tests: an in-memory provider API.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use plumbline::{
    Analysis, AuthCtx, ExecError, HttpClient, HttpRequest, HttpResponse, Result,
    StatementAnalyzer, TxnControlCounters,
};
use serde_json::Value;

/// Answers requests from per-URL queues of canned bodies and records every
/// request it sees.
#[derive(Default)]
pub struct ScriptedClient {
    routes: Mutex<HashMap<(String, String), VecDeque<Value>>>,
    calls: Mutex<Vec<(String, String, Option<String>)>>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, method: &str, url: &str, body: Value) -> Self {
        self.routes
            .lock()
            .unwrap()
            .entry((method.to_string(), url.to_string()))
            .or_default()
            .push_back(body);
        self
    }

    /// `(method, url)` of every request, in order.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(m, u, _)| (m.clone(), u.clone()))
            .collect()
    }

    pub fn calls_to(&self, method: &str, url: &str) -> usize {
        self.calls()
            .iter()
            .filter(|(m, u)| m == method && u == url)
            .count()
    }

    pub fn bearer_tokens(&self) -> Vec<Option<String>> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, _, t)| t.clone())
            .collect()
    }
}

#[async_trait]
impl HttpClient for ScriptedClient {
    async fn send(&self, request: &HttpRequest, auth: &AuthCtx) -> Result<HttpResponse> {
        let method = request.method.to_string();
        self.calls.lock().unwrap().push((
            method.clone(),
            request.url.clone(),
            auth.bearer_token.clone(),
        ));
        let body = self
            .routes
            .lock()
            .unwrap()
            .get_mut(&(method.clone(), request.url.clone()))
            .and_then(VecDeque::pop_front);
        match body {
            Some(body) => Ok(HttpResponse { status: 200, body }),
            None => Err(ExecError::HttpStatus {
                status: 404,
                body: format!("no scripted response for {method} {}", request.url),
            }),
        }
    }
}

/// A [`StatementAnalyzer`] backed by a closure, counting how often it ran.
pub struct FnAnalyzer<F> {
    analyze: F,
    calls: AtomicUsize,
}

impl<F> FnAnalyzer<F>
where
    F: Fn(&str, &TxnControlCounters) -> Result<Analysis> + Send + Sync,
{
    pub fn new(analyze: F) -> Self {
        Self {
            analyze,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl<F> StatementAnalyzer for FnAnalyzer<F>
where
    F: Fn(&str, &TxnControlCounters) -> Result<Analysis> + Send + Sync,
{
    fn analyze(&self, query: &str, counters: &TxnControlCounters) -> Result<Analysis> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.analyze)(query, counters)
    }
}
