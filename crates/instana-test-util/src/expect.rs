// Copyright 2024-Present IBM Corp. https://www.ibm.com/
// SPDX-License-Identifier: Apache-2.0

//! Quantified expectation wrappers around the match-all engine.

use serde_json::Value;

use crate::matching::{find_all_matching_items, report_failure, Expectations, MatchFailure};
use crate::stringify::stringify_items;

/// Asserts that exactly one item satisfies all expectations and returns it.
pub fn expect_exactly_one_matching<'a>(
    items: &'a [Value],
    expectations: &Expectations,
) -> Result<&'a Value, MatchFailure> {
    let result = find_all_matching_items(items, expectations)?;
    match result.matches() {
        &[single] => Ok(single),
        [] => Err(zero_match_failure(&result, "exactly one match")),
        matches => Err(MatchFailure::TooManyMatches {
            looking_for: "exactly one match".to_string(),
            count: matches.len(),
            matches: stringify_matches(matches),
        }),
    }
}

/// Asserts that at least one item satisfies all expectations and returns the
/// first match in item-list order (not relevance order).
pub fn expect_at_least_one_matching<'a>(
    items: &'a [Value],
    expectations: &Expectations,
) -> Result<&'a Value, MatchFailure> {
    let result = find_all_matching_items(items, expectations)?;
    match result.matches().first() {
        Some(first) => Ok(*first),
        None => Err(zero_match_failure(&result, "at least one match")),
    }
}

/// Asserts that exactly `n` items satisfy all expectations and returns them.
///
/// A nonzero-but-wrong match count produces [`MatchFailure::WrongMatchCount`]
/// listing everything that did match; only the zero-match case goes through
/// the best-partial-match diagnostics.
pub fn expect_exactly_n_matching<'a>(
    items: &'a [Value],
    n: usize,
    expectations: &Expectations,
) -> Result<Vec<&'a Value>, MatchFailure> {
    let looking_for = format!("exactly {n} matches");
    let result = find_all_matching_items(items, expectations)?;
    match result.matches() {
        matches if matches.len() == n => Ok(matches.to_vec()),
        [] => Err(zero_match_failure(&result, &looking_for)),
        matches => Err(MatchFailure::WrongMatchCount {
            looking_for,
            expected: n,
            actual: matches.len(),
            matches: stringify_matches(matches),
        }),
    }
}

fn zero_match_failure(
    result: &crate::matching::MatchResult<'_>,
    looking_for: &str,
) -> MatchFailure {
    if result.best_match().is_some() || result.last_error().is_some() {
        report_failure(result, looking_for)
    } else {
        // Zero matches over a non-empty list implies at least one recorded
        // expectation error; anything else is a bug in the engine.
        MatchFailure::Inconsistency(format!(
            "zero matches while looking for {looking_for}, but no expectation error was recorded"
        ))
    }
}

fn stringify_matches(matches: &[&Value]) -> String {
    let owned: Vec<Value> = matches.iter().map(|item| (*item).clone()).collect();
    stringify_items(&owned)
}
