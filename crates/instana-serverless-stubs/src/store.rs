// Copyright 2024-Present IBM Corp. https://www.ibm.com/
// SPDX-License-Identifier: Apache-2.0

//! In-memory store for everything the backend stub receives.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use serde::Serialize;
use serde_json::Value;

/// Everything received so far, split into processed and raw collections.
///
/// Raw collections record payloads exactly as they arrived, before any
/// validation, so tests can inspect what an agent sent even when the payload
/// was rejected or the stub was playing unresponsive.
#[derive(Debug, Default, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceivedData {
    pub metrics: Vec<Value>,
    pub aggregated_metrics: Vec<Value>,
    pub spans: Vec<Value>,
    pub raw_bundles: Vec<Value>,
    pub raw_metrics: Vec<Value>,
    pub raw_span_arrays: Vec<Value>,
}

/// Why an intake payload was rejected.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum IntakeError {
    #[error("The metrics value in the payload is no object.")]
    BundleMetricsNoObject,
    #[error("The metrics value in the payload is an array.")]
    BundleMetricsIsArray,
    #[error("The spans value in the payload is no array.")]
    BundleSpansNoArray,
    #[error("The payload is no object.")]
    MetricsPayloadNoObject,
    #[error("The payload is an array.")]
    MetricsPayloadIsArray,
    #[error("The payload is no array.")]
    TracesPayloadNoArray,
}

/// Shared state of one backend stub process.
pub struct BackendState {
    received: Mutex<ReceivedData>,
    responsive: AtomicBool,
    drop_data: bool,
}

impl BackendState {
    pub fn new(responsive: bool, drop_data: bool) -> Self {
        BackendState {
            received: Mutex::new(ReceivedData::default()),
            responsive: AtomicBool::new(responsive),
            drop_data,
        }
    }

    pub fn is_responsive(&self) -> bool {
        self.responsive.load(Ordering::SeqCst)
    }

    pub fn set_responsive(&self, responsive: bool) {
        self.responsive.store(responsive, Ordering::SeqCst);
    }

    pub fn record_raw_bundle(&self, payload: Value) {
        self.lock().raw_bundles.push(payload);
    }

    pub fn record_raw_metrics(&self, payload: Value) {
        self.lock().raw_metrics.push(payload);
    }

    pub fn record_raw_span_array(&self, payload: Value) {
        self.lock().raw_span_arrays.push(payload);
    }

    /// Validates and stores a spans-plus-metrics bundle.
    pub fn process_bundle(&self, headers: &Value, payload: Value) -> Result<(), IntakeError> {
        let metrics = payload.get("metrics");
        if let Some(metrics) = metrics {
            if metrics.is_array() {
                return Err(IntakeError::BundleMetricsIsArray);
            }
            if !metrics.is_object() {
                return Err(IntakeError::BundleMetricsNoObject);
            }
        }
        if let Some(spans) = payload.get("spans") {
            if !spans.is_array() {
                return Err(IntakeError::BundleSpansNoArray);
            }
        }
        if self.drop_data {
            return Ok(());
        }

        let mut received = self.lock();
        if let Some(metrics) = payload.get("metrics") {
            received
                .metrics
                .push(annotate_with_headers(metrics.clone(), headers));
            aggregate_metrics(&mut received.aggregated_metrics, metrics);
        }
        if let Some(spans) = payload.get("spans").and_then(Value::as_array) {
            for span in spans {
                received
                    .spans
                    .push(annotate_with_headers(span.clone(), headers));
            }
        }
        Ok(())
    }

    /// Validates and stores a standalone metrics payload.
    pub fn process_metrics(&self, headers: &Value, payload: Value) -> Result<(), IntakeError> {
        if payload.is_array() {
            return Err(IntakeError::MetricsPayloadIsArray);
        }
        if !payload.is_object() {
            return Err(IntakeError::MetricsPayloadNoObject);
        }
        if self.drop_data {
            return Ok(());
        }

        let mut received = self.lock();
        aggregate_metrics(&mut received.aggregated_metrics, &payload);
        received
            .metrics
            .push(annotate_with_headers(payload, headers));
        Ok(())
    }

    /// Validates and stores a span array.
    pub fn process_traces(&self, headers: &Value, payload: Value) -> Result<(), IntakeError> {
        let Value::Array(spans) = payload else {
            return Err(IntakeError::TracesPayloadNoArray);
        };
        if self.drop_data {
            return Ok(());
        }

        let mut received = self.lock();
        for span in spans {
            received.spans.push(annotate_with_headers(span, headers));
        }
        Ok(())
    }

    pub fn snapshot(&self) -> ReceivedData {
        self.lock().clone()
    }

    pub fn spans(&self) -> Vec<Value> {
        self.lock().spans.clone()
    }

    pub fn metrics(&self) -> Vec<Value> {
        self.lock().metrics.clone()
    }

    pub fn aggregated_metrics(&self) -> Vec<Value> {
        self.lock().aggregated_metrics.clone()
    }

    pub fn raw_bundles(&self) -> Vec<Value> {
        self.lock().raw_bundles.clone()
    }

    pub fn raw_metrics(&self) -> Vec<Value> {
        self.lock().raw_metrics.clone()
    }

    pub fn raw_span_arrays(&self) -> Vec<Value> {
        self.lock().raw_span_arrays.clone()
    }

    pub fn reset(&self) {
        *self.lock() = ReceivedData::default();
    }

    pub fn reset_spans(&self) {
        self.lock().spans.clear();
    }

    /// Clears metrics together with their aggregation.
    pub fn reset_metrics(&self) {
        let mut received = self.lock();
        received.metrics.clear();
        received.aggregated_metrics.clear();
    }

    pub fn reset_raw_bundles(&self) {
        self.lock().raw_bundles.clear();
    }

    pub fn reset_raw_metrics(&self) {
        self.lock().raw_metrics.clear();
    }

    pub fn reset_raw_span_arrays(&self) {
        self.lock().raw_span_arrays.clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ReceivedData> {
        match self.received.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn annotate_with_headers(mut payload: Value, headers: &Value) -> Value {
    if let Some(fields) = payload.as_object_mut() {
        fields.insert("_receivedHeaders".to_string(), headers.clone());
    }
    payload
}

/// Folds a metrics payload's plugin snapshots into the aggregated view.
/// Snapshots are keyed by plugin name and entity id; updates for a known
/// entity are merged recursively so later partial snapshots refine earlier
/// ones instead of replacing them.
fn aggregate_metrics(aggregated: &mut Vec<Value>, metrics_payload: &Value) {
    let Some(plugins) = metrics_payload.get("plugins").and_then(Value::as_array) else {
        return;
    };
    for update in plugins {
        let existing = aggregated.iter_mut().find(|snapshot| {
            snapshot.get("name") == update.get("name")
                && snapshot.get("entityId") == update.get("entityId")
        });
        match existing {
            Some(snapshot) => deep_merge(snapshot, update),
            None => aggregated.push(update.clone()),
        }
    }
}

/// Recursively merges `update` into `target`. Objects merge key by key,
/// everything else is overwritten.
pub fn deep_merge(target: &mut Value, update: &Value) {
    match (target, update) {
        (Value::Object(target_fields), Value::Object(update_fields)) => {
            for (key, update_value) in update_fields {
                match target_fields.get_mut(key) {
                    Some(target_value) => deep_merge(target_value, update_value),
                    None => {
                        target_fields.insert(key.clone(), update_value.clone());
                    }
                }
            }
        }
        (target, update) => *target = update.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn headers() -> Value {
        json!({ "host": "localhost:8443", "x-instana-key": "dummy-key" })
    }

    #[test]
    fn bundles_store_spans_and_metrics_with_headers() {
        let state = BackendState::new(true, false);
        state
            .process_bundle(
                &headers(),
                json!({
                    "spans": [{ "n": "aws.lambda.entry" }, { "n": "node.http.client" }],
                    "metrics": { "plugins": [] }
                }),
            )
            .unwrap();

        let spans = state.spans();
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0]["_receivedHeaders"]["x-instana-key"], "dummy-key");
        assert_eq!(state.metrics().len(), 1);
    }

    #[test]
    fn bundle_metrics_must_be_an_object() {
        let state = BackendState::new(true, false);
        let err = state
            .process_bundle(&headers(), json!({ "metrics": [1, 2, 3] }))
            .unwrap_err();
        assert_eq!(err, IntakeError::BundleMetricsIsArray);

        let err = state
            .process_bundle(&headers(), json!({ "metrics": "nope" }))
            .unwrap_err();
        assert_eq!(err, IntakeError::BundleMetricsNoObject);
    }

    #[test]
    fn bundle_spans_must_be_an_array() {
        let state = BackendState::new(true, false);
        let err = state
            .process_bundle(&headers(), json!({ "spans": { "n": "x" } }))
            .unwrap_err();
        assert_eq!(err, IntakeError::BundleSpansNoArray);
    }

    #[test]
    fn standalone_metrics_payload_shape_is_validated() {
        let state = BackendState::new(true, false);
        assert_eq!(
            state
                .process_metrics(&headers(), json!([1, 2]))
                .unwrap_err(),
            IntakeError::MetricsPayloadIsArray
        );
        assert_eq!(
            state
                .process_metrics(&headers(), json!("text"))
                .unwrap_err(),
            IntakeError::MetricsPayloadNoObject
        );
    }

    #[test]
    fn traces_payload_must_be_an_array() {
        let state = BackendState::new(true, false);
        assert_eq!(
            state
                .process_traces(&headers(), json!({ "n": "span" }))
                .unwrap_err(),
            IntakeError::TracesPayloadNoArray
        );
    }

    #[test]
    fn drop_data_keeps_raw_but_discards_processed() {
        let state = BackendState::new(true, true);
        state.record_raw_span_array(json!([{ "n": "x" }]));
        state
            .process_traces(&headers(), json!([{ "n": "x" }]))
            .unwrap();

        assert_eq!(state.raw_span_arrays().len(), 1);
        assert!(state.spans().is_empty());
    }

    #[test]
    fn metric_snapshots_aggregate_by_plugin_and_entity() {
        let state = BackendState::new(true, false);
        state
            .process_metrics(
                &headers(),
                json!({
                    "plugins": [
                        { "name": "com.instana.plugin.process", "entityId": "1234",
                          "data": { "pid": 1234, "cpu": { "user": 10 } } }
                    ]
                }),
            )
            .unwrap();
        state
            .process_metrics(
                &headers(),
                json!({
                    "plugins": [
                        { "name": "com.instana.plugin.process", "entityId": "1234",
                          "data": { "cpu": { "user": 20, "sys": 5 } } },
                        { "name": "com.instana.plugin.process", "entityId": "5678",
                          "data": { "pid": 5678 } }
                    ]
                }),
            )
            .unwrap();

        let aggregated = state.aggregated_metrics();
        assert_eq!(aggregated.len(), 2);
        let first = &aggregated[0];
        assert_eq!(first["data"]["pid"], 1234);
        assert_eq!(first["data"]["cpu"]["user"], 20);
        assert_eq!(first["data"]["cpu"]["sys"], 5);
    }

    #[test]
    fn reset_metrics_also_clears_the_aggregation() {
        let state = BackendState::new(true, false);
        state
            .process_metrics(
                &headers(),
                json!({ "plugins": [{ "name": "p", "entityId": "1", "data": {} }] }),
            )
            .unwrap();

        state.reset_metrics();
        assert!(state.metrics().is_empty());
        assert!(state.aggregated_metrics().is_empty());
    }

    #[test]
    fn reset_clears_everything() {
        let state = BackendState::new(true, false);
        state.record_raw_bundle(json!({}));
        state
            .process_traces(&headers(), json!([{ "n": "x" }]))
            .unwrap();

        state.reset();
        assert!(state.spans().is_empty());
        assert!(state.raw_bundles().is_empty());
    }

    #[test]
    fn responsiveness_toggles() {
        let state = BackendState::new(true, false);
        assert!(state.is_responsive());
        state.set_responsive(false);
        assert!(!state.is_responsive());
    }
}
