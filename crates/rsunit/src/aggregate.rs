//! Rolling child results up into suite results.

use chrono::Utc;

use crate::result::{
    FailureSite, ResultCounts, ResultState, TestResult, TestStatus, CANCELLED_MESSAGE,
    CHILD_ERRORS_MESSAGE, CHILD_IGNORE_MESSAGE,
};

/// Totals over a list of sibling results.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub status: TestStatus,
    pub counts: ResultCounts,
    pub assert_count: usize,
    /// Sum of child durations in seconds.
    pub duration: f64,
    pub any_ignored: bool,
    pub any_cancelled: bool,
}

/// Sum `children`. Status takes the highest precedence seen, starting from
/// Inconclusive, so an empty list yields Inconclusive and zero counts.
pub fn summarize(children: &[TestResult]) -> Summary {
    let mut summary = Summary {
        status: TestStatus::Inconclusive,
        counts: ResultCounts::default(),
        assert_count: 0,
        duration: 0.0,
        any_ignored: false,
        any_cancelled: false,
    };
    for child in children {
        summary.status = summary.status.max(child.status());
        summary.counts += child.counts();
        summary.assert_count += child.assert_count;
        summary.duration += child.duration;
        summary.any_ignored |= child.state.is_ignored();
        summary.any_cancelled |= is_user_cancelled(child);
    }
    summary
}

fn is_user_cancelled(result: &TestResult) -> bool {
    result.status() == TestStatus::Failed
        && result.state.is_cancelled()
        && result.message.as_deref() == Some(CANCELLED_MESSAGE)
}

/// Fold the children of `result` into its counters and, unless
/// `preserve_state` is set, into its state.
///
/// `preserve_state` is used when the suite already carries its own outcome
/// (a failed one-time setup or a non-runnable suite).
pub fn roll_up(result: &mut TestResult, preserve_state: bool) {
    let summary = summarize(&result.children);
    result.counts = Some(summary.counts);
    result.assert_count += summary.assert_count;
    result.duration = summary.duration;

    if preserve_state {
        return;
    }
    let (state, message) = match summary.status {
        TestStatus::Failed if summary.any_cancelled => (
            ResultState::CANCELLED.with_site(FailureSite::Child),
            Some(CANCELLED_MESSAGE.to_string()),
        ),
        TestStatus::Failed => (
            ResultState::CHILD_FAILURE,
            Some(CHILD_ERRORS_MESSAGE.to_string()),
        ),
        TestStatus::Passed => (ResultState::SUCCESS, None),
        TestStatus::Skipped if summary.any_ignored => (
            ResultState::IGNORED.with_site(FailureSite::Child),
            Some(CHILD_IGNORE_MESSAGE.to_string()),
        ),
        TestStatus::Skipped => (ResultState::SKIPPED, None),
        TestStatus::Inconclusive => (ResultState::INCONCLUSIVE, None),
    };
    result.set_result(state, message, None);
}

/// Combine disjoint result trees under a synthetic "Project" suite.
pub fn merge_results(results: Vec<TestResult>) -> TestResult {
    let mut project = TestResult::synthetic_suite("project", "Project", "Project", "Project");
    project.test_case_count = results.iter().map(|r| r.test_case_count).sum();
    if let Some(start) = results.iter().map(|r| r.start_time).min() {
        project.start_time = start;
    }
    project.end_time = results
        .iter()
        .map(|r| r.end_time)
        .max()
        .unwrap_or_else(Utc::now);
    project.children = results;
    roll_up(&mut project, false);
    project
}
