// Copyright 2024-Present IBM Corp. https://www.ibm.com/
// SPDX-License-Identifier: Apache-2.0

//! Match-all engine: find every item in a list that satisfies a set of
//! expectations, tracking the best partial match for diagnostics.

use serde_json::Value;

use crate::stringify::{stringify_item, stringify_items};

/// A single labelled expectation against one item.
///
/// The label stands in for the expectation source in failure messages, so it
/// should read like the check it performs, e.g. `span.n == "aws.lambda.entry"`.
pub struct Expectation {
    label: String,
    check: Box<dyn Fn(&Value) -> anyhow::Result<()> + Send + Sync>,
}

impl Expectation {
    pub fn new<F>(label: impl Into<String>, check: F) -> Self
    where
        F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Expectation {
            label: label.into(),
            check: Box::new(check),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    fn check(&self, item: &Value) -> anyhow::Result<()> {
        (self.check)(item)
    }
}

impl std::fmt::Debug for Expectation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Expectation")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// The expectations to run against each item.
///
/// `Each` is the preferred form: one expectation per attribute, evaluated in
/// order, which enables best-partial-match diagnostics when nothing matches.
/// `Single` is the legacy form where one closure performs all checks and the
/// failure diagnostics can only report the last error seen.
pub enum Expectations {
    Single(Expectation),
    Each(Vec<Expectation>),
}

impl Expectations {
    /// Legacy form: one closure that checks the whole item.
    pub fn single<F>(check: F) -> Self
    where
        F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Expectations::Single(Expectation::new("<combined expectation>", check))
    }

    /// Preferred form: an ordered list of per-attribute expectations.
    pub fn each(expectations: impl IntoIterator<Item = Expectation>) -> Self {
        Expectations::Each(expectations.into_iter().collect())
    }

    fn count_if_each(&self) -> Option<usize> {
        match self {
            Expectations::Single(_) => None,
            Expectations::Each(list) => Some(list.len()),
        }
    }
}

/// The best partial match seen so far: the item that passed the longest prefix
/// of the expectation list before one of them failed.
#[derive(Debug)]
pub struct BestMatch<'a> {
    pub item: &'a Value,
    /// How many leading expectations this item passed.
    pub passed: usize,
    /// Label of the expectation that failed for this item.
    pub failed_expectation: String,
    /// The error that expectation produced.
    pub error: anyhow::Error,
}

/// Result of one [`find_all_matching_items`] call. Constructed fresh per
/// assertion, holds no cross-call state.
pub struct MatchResult<'a> {
    items: &'a [Value],
    matches: Vec<&'a Value>,
    expectation_count: Option<usize>,
    best_match: Option<BestMatch<'a>>,
    last_error: Option<anyhow::Error>,
}

impl<'a> MatchResult<'a> {
    pub fn items(&self) -> &'a [Value] {
        self.items
    }

    pub fn matches(&self) -> &[&'a Value] {
        &self.matches
    }

    /// Only populated in [`Expectations::Each`] mode.
    pub fn best_match(&self) -> Option<&BestMatch<'a>> {
        self.best_match.as_ref()
    }

    pub fn last_error(&self) -> Option<&anyhow::Error> {
        self.last_error.as_ref()
    }
}

impl std::fmt::Debug for MatchResult<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatchResult")
            .field("items", &self.items.len())
            .field("matches", &self.matches.len())
            .field("best_match", &self.best_match)
            .finish_non_exhaustive()
    }
}

/// How an assertion over a match result failed.
#[derive(Debug, thiserror::Error)]
pub enum MatchFailure {
    /// Hard precondition: the item list must not be empty.
    #[error(
        "Could not find any matching items which match all the criteria. \
         In fact, there were zero items."
    )]
    ZeroItems,

    #[error(
        "Found {count} matching items while looking for {looking_for}.\n\
         All matching items:\n{matches}"
    )]
    TooManyMatches {
        looking_for: String,
        count: usize,
        matches: String,
    },

    /// A nonzero number of items matched, but not the expected number. Kept
    /// distinct from the zero-match case: here the most useful diagnostic is
    /// the list of everything that did match, not a best partial match.
    #[error(
        "Found {actual} matching items while looking for {looking_for}.\n\
         All matching items:\n{matches}"
    )]
    WrongMatchCount {
        looking_for: String,
        expected: usize,
        actual: usize,
        matches: String,
    },

    #[error("{report}")]
    NoMatch { report: String },

    #[error("Inconsistency in the matching engine: {0}")]
    Inconsistency(String),
}

/// Runs the expectations against every item, in list order, and collects all
/// items that pass every expectation.
///
/// In [`Expectations::Each`] mode the engine also tracks the best partial
/// match. The tie policy is last-equal-wins: a later item that reaches a
/// passed-count greater than *or equal to* the current best replaces it. Tests
/// pin this policy; do not change it without revisiting the diagnostics that
/// depend on it.
///
/// An empty item list fails immediately with [`MatchFailure::ZeroItems`].
pub fn find_all_matching_items<'a>(
    items: &'a [Value],
    expectations: &Expectations,
) -> Result<MatchResult<'a>, MatchFailure> {
    if items.is_empty() {
        return Err(MatchFailure::ZeroItems);
    }

    let mut result = MatchResult {
        items,
        matches: Vec::new(),
        expectation_count: expectations.count_if_each(),
        best_match: None,
        last_error: None,
    };

    for item in items {
        match expectations {
            Expectations::Each(list) => {
                let mut failure = None;
                let mut passed = 0;
                for expectation in list {
                    if let Err(error) = expectation.check(item) {
                        failure = Some((expectation, error));
                        break;
                    }
                    passed += 1;
                }
                match failure {
                    None => result.matches.push(item),
                    Some((expectation, error)) => {
                        let best_so_far = result.best_match.as_ref().map_or(0, |best| best.passed);
                        if passed >= best_so_far {
                            result.best_match = Some(BestMatch {
                                item,
                                passed,
                                failed_expectation: expectation.label().to_string(),
                                error,
                            });
                        }
                    }
                }
            }
            Expectations::Single(expectation) => match expectation.check(item) {
                Ok(()) => result.matches.push(item),
                Err(error) => result.last_error = Some(error),
            },
        }
    }

    Ok(result)
}

/// Builds the rich zero-match failure: the best partial match (when
/// available), the expectation that failed for it, and a bounded dump of all
/// items. The dump is suppressed when `OMIT_ITEM_LIST_ON_MATCH_FAILURE` is
/// set, which keeps CI logs readable for suites with large span lists.
pub fn report_failure(result: &MatchResult<'_>, looking_for: &str) -> MatchFailure {
    let mut message = format!(
        "Could not find the required matching items while looking for {looking_for}.\n----\n"
    );
    let mut error_message_reported = false;

    if let Some(best) = result.best_match() {
        message.push_str(&format!(
            "Best matching item:\n{}\n",
            stringify_item(best.item)
        ));
        let total = result
            .expectation_count
            .unwrap_or(best.passed + 1);
        message.push_str(&format!(
            "This item passed the first {} (of {}) expectations.\n",
            best.passed, total
        ));
        message.push_str(&format!(
            "This expectation failed: {}\n",
            best.failed_expectation
        ));
        message.push_str(&format!("And it failed with this error: {}\n", best.error));
        error_message_reported = true;
        message.push_str("----\nMore details:\n");
    }

    message.push_str(&format!("Got {} items in total.\n", result.items().len()));
    if !omit_item_list() {
        message.push_str(&format!(
            "All items:\n{}\n",
            stringify_items(result.items())
        ));
    }
    if !error_message_reported {
        if let Some(error) = result.last_error() {
            message.push_str(&format!("Last error: {error}\n"));
        }
    }

    MatchFailure::NoMatch { report: message }
}

fn omit_item_list() -> bool {
    std::env::var("OMIT_ITEM_LIST_ON_MATCH_FAILURE")
        .map(|value| !value.is_empty())
        .unwrap_or(false)
}
