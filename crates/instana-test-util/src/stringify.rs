// Copyright 2024-Present IBM Corp. https://www.ibm.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded, readable rendering of telemetry items for failure messages.

use serde_json::Value;

/// Failure messages list at most this many items.
pub const MAX_LISTED_ITEMS: usize = 30;

/// Replacement for `stack` fields; stack traces captured in spans are long and
/// never useful when diffing a failed match.
pub const STACK_TRACE_PLACEHOLDER: &str = "<stack trace redacted>";

/// Renders a list of items, truncated to [`MAX_LISTED_ITEMS`] with a note
/// about how many were omitted, each with its `stack` field redacted.
pub fn stringify_items(items: &[Value]) -> String {
    let mut rendered = String::new();
    if items.len() > MAX_LISTED_ITEMS {
        rendered.push_str(&format!(
            "Only listing the first {MAX_LISTED_ITEMS} of {} total items.\n",
            items.len()
        ));
    }
    let listed: Vec<String> = items
        .iter()
        .take(MAX_LISTED_ITEMS)
        .map(stringify_item)
        .collect();
    rendered.push_str(&listed.join(",\n"));
    rendered
}

/// Renders a single item, with its `stack` field redacted.
pub fn stringify_item(item: &Value) -> String {
    let redacted = redact_stack_traces(item.clone());
    serde_json::to_string_pretty(&redacted).unwrap_or_else(|_| redacted.to_string())
}

fn redact_stack_traces(mut item: Value) -> Value {
    if let Some(fields) = item.as_object_mut() {
        if let Some(stack) = fields.get_mut("stack") {
            *stack = Value::String(STACK_TRACE_PLACEHOLDER.to_string());
        }
    }
    item
}
