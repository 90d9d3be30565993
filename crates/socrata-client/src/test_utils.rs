//! Test utilities.
//!
//! In-process [`Transport`] that serves a scripted view, so schema caching
//! and the query loop can be tested without a server. Enable via the
//! `test-utils` feature flag.

use crate::error::{ClientError, Result};
use crate::transport::{ApiRequest, Method, Transport};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Scripted transport for one view.
///
/// `GET` requests return the current column list. `POST` requests pop the
/// next scripted row response; the last one is repeated once the script
/// runs out.
#[derive(Default)]
pub struct MockTransport {
    columns: Mutex<Value>,
    row_responses: Mutex<VecDeque<Value>>,
    posted: Mutex<Vec<Value>>,
    column_fetches: AtomicUsize,
    row_queries: AtomicUsize,
    fail_columns: AtomicBool,
    cancel_on_rows: Mutex<Option<CancellationToken>>,
    delay: Duration,
}

impl MockTransport {
    pub fn new(columns: Value) -> Self {
        Self {
            columns: Mutex::new(columns),
            ..Default::default()
        }
    }

    /// Delay every response, to widen race windows.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Queue a response for the rows endpoint.
    pub fn push_rows(&self, response: Value) -> &Self {
        lock(&self.row_responses).push_back(response);
        self
    }

    /// Replace the column list served by the schema endpoint.
    pub fn set_columns(&self, columns: Value) {
        *lock(&self.columns) = columns;
    }

    /// Make schema fetches fail with a 503.
    pub fn fail_columns(&self, fail: bool) {
        self.fail_columns.store(fail, Ordering::SeqCst);
    }

    /// Cancel `token` as soon as a rows request has been answered.
    pub fn cancel_after_rows(&self, token: CancellationToken) {
        *lock(&self.cancel_on_rows) = Some(token);
    }

    pub fn column_fetches(&self) -> usize {
        self.column_fetches.load(Ordering::SeqCst)
    }

    pub fn row_queries(&self) -> usize {
        self.row_queries.load(Ordering::SeqCst)
    }

    /// Bodies of every rows request received so far.
    pub fn posted(&self) -> Vec<Value> {
        lock(&self.posted).clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: ApiRequest) -> Result<Value> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if request.method == Method::GET {
            self.column_fetches.fetch_add(1, Ordering::SeqCst);
            if self.fail_columns.load(Ordering::SeqCst) {
                return Err(ClientError::Api {
                    status: 503,
                    message: "Service unavailable".to_string(),
                    code: None,
                    request_id: None,
                });
            }
            return Ok(lock(&self.columns).clone());
        }

        self.row_queries.fetch_add(1, Ordering::SeqCst);
        lock(&self.posted).push(request.body.unwrap_or(Value::Null));

        let response = {
            let mut responses = lock(&self.row_responses);
            if responses.len() > 1 {
                responses.pop_front()
            } else {
                responses.front().cloned()
            }
        };

        if let Some(token) = lock(&self.cancel_on_rows).as_ref() {
            token.cancel();
        }
        Ok(response.unwrap_or_else(|| json!({ "data": [] })))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Column list JSON with sequential ids starting at `first_id`.
pub fn columns_json(first_id: i64, fields: &[&str]) -> Value {
    Value::Array(
        fields
            .iter()
            .enumerate()
            .map(|(i, field)| {
                json!({
                    "id": first_id + i as i64,
                    "fieldName": field,
                    "name": field.to_uppercase(),
                    "dataTypeName": "text"
                })
            })
            .collect(),
    )
}
