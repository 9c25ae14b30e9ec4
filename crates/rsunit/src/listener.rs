//! Progress notifications emitted while a run executes.

use crate::result::TestResult;
use crate::tree::TestRef;

/// Receives start and finish events for every node that is dispatched.
///
/// Called from worker threads when the run is concurrent.
pub trait TestListener: Send + Sync {
    fn test_started(&self, _test: TestRef<'_>) {}

    fn test_finished(&self, _result: &TestResult) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NullListener;

impl TestListener for NullListener {}
