//! Result states and the result tree produced by a run.

use std::borrow::Cow;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::properties::PropertyBag;
use crate::tree::{RunState, TestRef};

/// Shortest duration recorded for a leaf, in seconds.
pub const MIN_DURATION: f64 = 0.000_001;

pub(crate) const CHILD_ERRORS_MESSAGE: &str = "One or more child tests had errors";
pub(crate) const CHILD_IGNORE_MESSAGE: &str = "One or more child tests were ignored";
pub(crate) const CANCELLED_MESSAGE: &str = "Test cancelled by user";

/// Outcome class. Declaration order is aggregation precedence, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TestStatus {
    Inconclusive,
    Skipped,
    Passed,
    Failed,
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TestStatus::Inconclusive => "Inconclusive",
            TestStatus::Skipped => "Skipped",
            TestStatus::Passed => "Passed",
            TestStatus::Failed => "Failed",
        };
        f.write_str(s)
    }
}

/// Phase of execution that produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureSite {
    Test,
    SetUp,
    TearDown,
    Parent,
    Child,
}

impl fmt::Display for FailureSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Status, label and failure site of a result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResultState {
    pub status: TestStatus,
    pub label: Cow<'static, str>,
    pub site: FailureSite,
}

impl ResultState {
    pub const INCONCLUSIVE: ResultState = ResultState::new(TestStatus::Inconclusive, "");
    pub const SKIPPED: ResultState = ResultState::new(TestStatus::Skipped, "");
    pub const IGNORED: ResultState = ResultState::new(TestStatus::Skipped, "Ignored");
    pub const EXPLICIT: ResultState = ResultState::new(TestStatus::Skipped, "Explicit");
    pub const SUCCESS: ResultState = ResultState::new(TestStatus::Passed, "");
    pub const FAILURE: ResultState = ResultState::new(TestStatus::Failed, "");
    pub const ERROR: ResultState = ResultState::new(TestStatus::Failed, "Error");
    pub const CANCELLED: ResultState = ResultState::new(TestStatus::Failed, "Cancelled");
    /// Undispatched work after a stop request.
    pub const SKIPPED_CANCELLED: ResultState = ResultState::new(TestStatus::Skipped, "Cancelled");
    pub const NOT_RUNNABLE: ResultState = ResultState::new(TestStatus::Inconclusive, "Invalid");
    pub const CHILD_FAILURE: ResultState =
        ResultState::at(TestStatus::Failed, "", FailureSite::Child);
    pub const SET_UP_FAILURE: ResultState =
        ResultState::at(TestStatus::Failed, "", FailureSite::SetUp);
    pub const SET_UP_ERROR: ResultState =
        ResultState::at(TestStatus::Failed, "Error", FailureSite::SetUp);
    pub const TEAR_DOWN_ERROR: ResultState =
        ResultState::at(TestStatus::Failed, "Error", FailureSite::TearDown);

    pub const fn new(status: TestStatus, label: &'static str) -> Self {
        ResultState::at(status, label, FailureSite::Test)
    }

    const fn at(status: TestStatus, label: &'static str, site: FailureSite) -> Self {
        ResultState {
            status,
            label: Cow::Borrowed(label),
            site,
        }
    }

    pub fn with_label(status: TestStatus, label: impl Into<String>) -> Self {
        ResultState {
            status,
            label: Cow::Owned(label.into()),
            site: FailureSite::Test,
        }
    }

    pub fn with_site(mut self, site: FailureSite) -> Self {
        self.site = site;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.label == "Cancelled"
    }

    pub fn is_ignored(&self) -> bool {
        self.status == TestStatus::Skipped && self.label == "Ignored"
    }
}

impl fmt::Display for ResultState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.status)?;
        if !self.label.is_empty() {
            write!(f, ":{}", self.label)?;
        }
        if self.site != FailureSite::Test {
            write!(f, "({})", self.site)?;
        }
        Ok(())
    }
}

/// Test-case counters of a result subtree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultCounts {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub inconclusive: usize,
}

impl ResultCounts {
    pub fn total(&self) -> usize {
        self.passed + self.failed + self.skipped + self.inconclusive
    }

    pub(crate) fn for_status(status: TestStatus) -> Self {
        let mut counts = ResultCounts::default();
        match status {
            TestStatus::Passed => counts.passed = 1,
            TestStatus::Failed => counts.failed = 1,
            TestStatus::Skipped => counts.skipped = 1,
            TestStatus::Inconclusive => counts.inconclusive = 1,
        }
        counts
    }
}

impl std::ops::AddAssign for ResultCounts {
    fn add_assign(&mut self, rhs: Self) {
        self.passed += rhs.passed;
        self.failed += rhs.failed;
        self.skipped += rhs.skipped;
        self.inconclusive += rhs.inconclusive;
    }
}

/// Outcome of one test node after execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub id: String,
    pub name: String,
    pub full_name: String,
    /// `"TestMethod"` for leaves, the suite kind tag (`"TestFixture"`, ...) otherwise.
    pub test_type: String,
    pub run_state: RunState,
    pub properties: PropertyBag,
    pub test_case_count: usize,
    pub state: ResultState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Seconds. For suites this is the sum of child durations, not the wall-clock span.
    pub duration: f64,
    pub assert_count: usize,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) counts: Option<ResultCounts>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TestResult>,
}

impl TestResult {
    /// A fresh, inconclusive result for `test`.
    pub fn for_test(test: TestRef<'_>) -> Self {
        let now = Utc::now();
        let is_suite = test.is_suite();
        TestResult {
            id: test.id().to_string(),
            name: test.name().to_string(),
            full_name: test.full_name().to_string(),
            test_type: test.test_type().to_string(),
            run_state: test.run_state(),
            properties: test.properties().clone(),
            test_case_count: test.test_case_count(),
            state: ResultState::INCONCLUSIVE,
            message: None,
            stack_trace: None,
            start_time: now,
            end_time: now,
            duration: 0.0,
            assert_count: 0,
            output: String::new(),
            counts: is_suite.then(ResultCounts::default),
            children: Vec::new(),
        }
    }

    /// A synthetic suite result not backed by a tree node.
    pub(crate) fn synthetic_suite(id: &str, name: &str, full_name: &str, test_type: &str) -> Self {
        let now = Utc::now();
        TestResult {
            id: id.to_string(),
            name: name.to_string(),
            full_name: full_name.to_string(),
            test_type: test_type.to_string(),
            run_state: RunState::Runnable,
            properties: PropertyBag::new(),
            test_case_count: 0,
            state: ResultState::INCONCLUSIVE,
            message: None,
            stack_trace: None,
            start_time: now,
            end_time: now,
            duration: 0.0,
            assert_count: 0,
            output: String::new(),
            counts: Some(ResultCounts::default()),
            children: Vec::new(),
        }
    }

    pub fn is_suite(&self) -> bool {
        self.counts.is_some()
    }

    pub fn status(&self) -> TestStatus {
        self.state.status
    }

    pub fn site(&self) -> FailureSite {
        self.state.site
    }

    /// Counters for this subtree. A leaf counts itself once.
    pub fn counts(&self) -> ResultCounts {
        self.counts
            .unwrap_or_else(|| ResultCounts::for_status(self.state.status))
    }

    pub fn total(&self) -> usize {
        self.counts().total()
    }

    pub fn pass_count(&self) -> usize {
        self.counts().passed
    }

    pub fn fail_count(&self) -> usize {
        self.counts().failed
    }

    pub fn skip_count(&self) -> usize {
        self.counts().skipped
    }

    pub fn inconclusive_count(&self) -> usize {
        self.counts().inconclusive
    }

    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    /// Find a result in this subtree by full name.
    pub fn find(&self, full_name: &str) -> Option<&TestResult> {
        if self.full_name == full_name {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(full_name))
    }

    /// All leaf results of this subtree, in tree order.
    pub fn leaves(&self) -> Vec<&TestResult> {
        let mut out = Vec::new();
        collect_leaves(self, &mut out);
        out
    }

    pub fn set_result(&mut self, state: ResultState, message: Option<String>, stack_trace: Option<String>) {
        self.state = state;
        self.message = message;
        self.stack_trace = stack_trace;
    }

    /// Record a failure raised during `site`, replacing the current state.
    pub(crate) fn record_failure(&mut self, failure: &crate::execution::Failure, site: FailureSite) {
        self.set_result(
            failure.state_at(site),
            Some(failure.message.clone()),
            failure.stack_trace.clone(),
        );
    }

    /// Record a teardown failure without losing what was recorded before.
    pub(crate) fn record_tear_down_failure(&mut self, failure: &crate::execution::Failure) {
        let state = if self.state.is_cancelled() && self.state.status == TestStatus::Failed {
            ResultState::CANCELLED
        } else {
            ResultState::ERROR
        }
        .with_site(FailureSite::TearDown);

        let mut message = format!("TearDown : {}", failure.message);
        if let Some(previous) = self.message.take() {
            message = format!("{previous}\n{message}");
        }
        let mut stack_trace = format!("--TearDown\n{}", failure.stack_trace.as_deref().unwrap_or(""));
        if let Some(previous) = self.stack_trace.take() {
            stack_trace = format!("{previous}\n{stack_trace}");
        }
        self.set_result(state, Some(message), Some(stack_trace));
    }

    /// Set the timing fields of a leaf from a measured interval.
    pub(crate) fn set_timing(&mut self, start: DateTime<Utc>, end: DateTime<Utc>, seconds: f64) {
        self.start_time = start;
        self.end_time = end;
        self.duration = seconds.max(MIN_DURATION);
    }
}

fn collect_leaves<'a>(result: &'a TestResult, out: &mut Vec<&'a TestResult>) {
    if result.is_suite() {
        for child in &result.children {
            collect_leaves(child, out);
        }
    } else {
        out.push(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_format() {
        assert_eq!(ResultState::SUCCESS.to_string(), "Passed");
        assert_eq!(ResultState::IGNORED.to_string(), "Skipped:Ignored");
        assert_eq!(ResultState::SET_UP_ERROR.to_string(), "Failed:Error(SetUp)");
        assert_eq!(
            ResultState::SKIPPED.with_site(FailureSite::Parent).to_string(),
            "Skipped(Parent)"
        );
    }

    #[test]
    fn test_status_precedence_order() {
        assert!(TestStatus::Failed > TestStatus::Passed);
        assert!(TestStatus::Passed > TestStatus::Skipped);
        assert!(TestStatus::Skipped > TestStatus::Inconclusive);
    }

    #[test]
    fn test_cancelled_label() {
        assert!(ResultState::CANCELLED.is_cancelled());
        assert!(ResultState::SKIPPED_CANCELLED.is_cancelled());
        assert!(!ResultState::ERROR.is_cancelled());
        assert!(ResultState::IGNORED.is_ignored());
    }

    #[test]
    fn test_counts_total() {
        let mut counts = ResultCounts::for_status(TestStatus::Passed);
        counts += ResultCounts::for_status(TestStatus::Failed);
        counts += ResultCounts::for_status(TestStatus::Inconclusive);
        assert_eq!(counts.total(), 3);
        assert_eq!(counts.failed, 1);
    }
}
