//! Per-task unit of work: GET one item, parse it, extract one field.

use std::time::Instant;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::FetchError;
use crate::event_log::{EventCategory, EventLogger};
use crate::metrics::{
    REQUEST_DURATION_SECONDS, REQUEST_ERRORS_BY_CATEGORY, REQUEST_STATUS_CODES, REQUEST_TOTAL,
};
use crate::queue::ResultCollector;

/// Value extracted from one successfully fetched item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchResult {
    pub task_id: u32,
    pub value: String,
}

/// Everything a worker needs to fetch items, shared by all workers.
pub struct FetchContext {
    pub client: reqwest::Client,
    pub endpoint_base: String,
    pub field: String,
    pub placeholder: String,
}

impl FetchContext {
    pub fn item_url(&self, task_id: u32) -> String {
        item_url(&self.endpoint_base, task_id)
    }
}

pub fn item_url(endpoint_base: &str, task_id: u32) -> String {
    format!("{}/{}", endpoint_base.trim_end_matches('/'), task_id)
}

/// Renders a JSON value for the log: strings verbatim, everything else as JSON text.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Fetches one item, logging each step under `worker_id`.
///
/// A missing field is not a failure: the placeholder is returned instead.
pub async fn fetch_item(
    ctx: &FetchContext,
    logger: &EventLogger,
    worker_id: u32,
    task_id: u32,
) -> Result<FetchResult, FetchError> {
    let wid = Some(worker_id);
    let url = ctx.item_url(task_id);
    logger.record(EventCategory::StepTodo, format!("prepare: HTTP GET {}", url), wid);

    logger.record(EventCategory::StepTodo, "HTTP send start", wid);
    REQUEST_TOTAL.inc();
    let request_start = Instant::now();
    let response = ctx.client.get(&url).send().await;
    REQUEST_DURATION_SECONDS.observe(request_start.elapsed().as_secs_f64());
    let response = response.map_err(|e| FetchError::from_reqwest(&url, e))?;

    let status = response.status();
    REQUEST_STATUS_CODES
        .with_label_values(&[status.as_str()])
        .inc();
    logger.record(
        EventCategory::StepTodo,
        format!(
            "response received: status={}, elapsed={:.3}s",
            status.as_u16(),
            request_start.elapsed().as_secs_f64()
        ),
        wid,
    );

    logger.record(EventCategory::StepTodo, "status check start", wid);
    if let Some(err) = FetchError::from_status(&url, status) {
        return Err(err);
    }
    logger.record(EventCategory::StepTodo, "status OK", wid);

    logger.record(EventCategory::StepTodo, "JSON parse start", wid);
    let body = response
        .bytes()
        .await
        .map_err(|e| FetchError::from_reqwest(&url, e))?;
    let document: Value = serde_json::from_slice(&body)?;
    let object = match document {
        Value::Object(map) => map,
        other => {
            return Err(FetchError::NotAnObject {
                found: json_kind(&other),
            })
        }
    };
    let keys: Vec<&str> = object.keys().map(String::as_str).collect();
    logger.record(
        EventCategory::StepTodo,
        format!("JSON parsed: keys={:?}", keys),
        wid,
    );

    let value = match object.get(&ctx.field) {
        Some(found) => {
            let text = value_text(found);
            logger.record(
                EventCategory::StepTodo,
                format!("{} extracted: {}", ctx.field, text),
                wid,
            );
            text
        }
        None => {
            logger.record(
                EventCategory::StepTodo,
                format!("{} field missing", ctx.field),
                wid,
            );
            ctx.placeholder.clone()
        }
    };

    Ok(FetchResult { task_id, value })
}

/// Runs [`fetch_item`] and routes the outcome: results go to the collector,
/// failures become a single `step-error` event. Returns whether the task succeeded.
pub async fn run_fetch(
    ctx: &FetchContext,
    logger: &EventLogger,
    results: &ResultCollector<FetchResult>,
    worker_id: u32,
    task_id: u32,
) -> bool {
    let wid = Some(worker_id);
    match fetch_item(ctx, logger, worker_id, task_id).await {
        Ok(result) => {
            logger.record(EventCategory::StepTodo, "result push start", wid);
            let value = result.value.clone();
            results.push(result);
            logger.record(EventCategory::StepTodo, "result push done", wid);
            logger.record(
                EventCategory::StepDone,
                format!("task complete: task_id={}, value={}", task_id, value),
                wid,
            );
            debug!(worker_id, task_id, value = %value, "Fetch succeeded");
            true
        }
        Err(err) => {
            let category = err.category();
            REQUEST_ERRORS_BY_CATEGORY
                .with_label_values(&[category.label()])
                .inc();
            logger.record(
                EventCategory::StepError,
                format!("fetch failed: {}: {}", category.label(), err),
                wid,
            );
            warn!(
                worker_id,
                task_id,
                error = %err,
                error_category = category.label(),
                "Fetch failed"
            );
            false
        }
    }
}
