//! Execution of a single node, and of leaves in particular.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use crossbeam::channel::{self, RecvTimeoutError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::Value;
use tracing::{debug, warn};

use crate::filter::TestFilter;
use crate::method::{Fixture, Hook, TestMethod};
use crate::properties::names;
use crate::result::{FailureSite, ResultState, TestResult, TestStatus, CANCELLED_MESSAGE};
use crate::test_context::TestContext;
use crate::tree::{NodeIndex, RunState, TestRef};

use super::composite;
use super::context::{ExecutionContext, ExecutionStatus, FixtureSource, SetUpTearDownLevel};
use super::failure::{guarded, Failure};

/// How long an own-thread wait sleeps before rechecking for an abort.
const WAIT_SLICE: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WorkItemState {
    Ready,
    Running,
    WaitingForChildren,
    Complete,
}

/// One node during one run, together with the result being built for it.
pub(crate) struct WorkItem {
    pub(super) index: NodeIndex,
    pub(super) state: WorkItemState,
    pub(super) context: ExecutionContext,
    pub(super) result: TestResult,
}

impl WorkItem {
    pub fn new(test: TestRef<'_>, context: ExecutionContext) -> Self {
        WorkItem {
            index: test.index(),
            state: WorkItemState::Ready,
            result: TestResult::for_test(test),
            context,
        }
    }

    pub fn test(&self) -> Option<TestRef<'_>> {
        self.context.tree.test(self.index)
    }

    /// Run the node to completion and hand back its result.
    pub fn execute(mut self) -> TestResult {
        let tree = Arc::clone(&self.context.tree);
        let Some(test) = tree.test(self.index) else {
            return self.result;
        };
        self.state = WorkItemState::Running;
        self.context.listener.test_started(test);
        let started = Instant::now();
        self.result.start_time = Utc::now();

        if self.context.status.is_stop_requested() {
            debug!(test = test.full_name(), "not dispatched, run is stopping");
            self.result = skipped_result(
                test,
                &*self.context.filter,
                ResultState::SKIPPED_CANCELLED,
                Some(CANCELLED_MESSAGE.to_string()),
            );
        } else if test.is_suite() {
            composite::execute(&mut self, test);
        } else {
            self.execute_leaf(test);
        }

        self.state = WorkItemState::Complete;
        let end = Utc::now();
        if test.is_suite() {
            self.result.end_time = end;
        } else {
            let start = self.result.start_time;
            self.result
                .set_timing(start, end, started.elapsed().as_secs_f64());
        }

        if self.context.settings.stop_on_error
            && self.result.status() == TestStatus::Failed
            && !self.context.status.is_stop_requested()
        {
            warn!(test = test.full_name(), "failure with stop-on-error set, stopping run");
            self.context.status.request_stop();
        }

        debug!(
            test = test.full_name(),
            state = %self.result.state,
            item = ?self.state,
            "finished"
        );
        self.context.listener.test_finished(&self.result);
        self.result
    }

    fn execute_leaf(&mut self, test: TestRef<'_>) {
        if let Some((state, reason)) = skip_state(test, &*self.context.filter) {
            self.result.set_result(state, reason, None);
            return;
        }
        let Some(method) = test.method().cloned() else {
            return;
        };

        let fixture = match &self.context.fixture {
            None => None,
            Some(FixtureSource::Shared(fixture)) => Some(fixture.clone()),
            Some(FixtureSource::PerTestCase(factory)) => match guarded(|| factory()) {
                Ok(fixture) => Some(fixture),
                Err(failure) => {
                    self.result.record_failure(&failure, FailureSite::SetUp);
                    return;
                }
            },
        };

        let seed = test_seed(self.context.settings.random_seed, &method, test.full_name());
        let ctx = TestContext::new(
            test.id(),
            test.name(),
            test.full_name(),
            fixture,
            &method.arguments,
            seed,
            Arc::clone(&self.context.status),
        );
        let run = LeafRun {
            method,
            chain: self.context.setup_chain.clone(),
            ctx,
        };

        let timeout = timeout_ms(test, self.context.settings.default_timeout_ms);
        let requires_thread = test.properties().contains_key(names::REQUIRES_THREAD);
        let outcome = if timeout.is_some() || requires_thread {
            run_on_own_thread(run, test.full_name(), timeout, &self.context.status)
        } else {
            run.run()
        };
        outcome.apply(&mut self.result);
    }
}

/// State and reason for a node that must not execute, if any.
pub(super) fn skip_state(
    test: TestRef<'_>,
    filter: &dyn TestFilter,
) -> Option<(ResultState, Option<String>)> {
    let reason = test.skip_reason().map(str::to_string);
    match test.run_state() {
        RunState::Runnable => None,
        RunState::Explicit if filter.is_explicit_match(test) => None,
        RunState::Explicit => Some((ResultState::EXPLICIT, reason)),
        RunState::Ignored => Some((ResultState::IGNORED, reason)),
        RunState::Skipped => Some((ResultState::SKIPPED, reason)),
        RunState::NotRunnable => Some((ResultState::NOT_RUNNABLE, reason)),
    }
}

/// Result for a node that is reported without running, along with all of
/// its filtered descendants, which are recorded with site Parent.
pub(super) fn skipped_result(
    test: TestRef<'_>,
    filter: &dyn TestFilter,
    state: ResultState,
    message: Option<String>,
) -> TestResult {
    let mut result = TestResult::for_test(test);
    result.set_result(state.clone(), message.clone(), None);
    if test.is_suite() {
        let child_state = state.with_site(FailureSite::Parent);
        result.children = composite::selected_children(test, filter)
            .into_iter()
            .map(|child| skipped_result(child, filter, child_state.clone(), message.clone()))
            .collect();
        crate::aggregate::roll_up(&mut result, true);
    }
    result
}

fn timeout_ms(test: TestRef<'_>, default: Option<u64>) -> Option<u64> {
    let mut current = Some(test);
    while let Some(node) = current {
        if let Some(ms) = node.properties().get_u64(names::TIMEOUT) {
            return (ms > 0).then_some(ms);
        }
        current = node.parent();
    }
    default.filter(|ms| *ms > 0)
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// The method's own seed, or one derived from the run seed and the test name.
///
/// The derivation only uses fixed algorithms so a seed printed by one build
/// replays the same values in another.
fn test_seed(run_seed: u64, method: &TestMethod, full_name: &str) -> u64 {
    if method.seed != 0 {
        return method.seed;
    }
    StdRng::seed_from_u64(run_seed).gen::<u64>() ^ fnv1a(full_name)
}

/// 64-bit FNV-1a.
fn fnv1a(text: &str) -> u64 {
    text.bytes()
        .fold(FNV_OFFSET, |hash, byte| (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME))
}

/// Everything a leaf needs to run, detached from the work item so it can be
/// moved to another thread.
struct LeafRun {
    method: Arc<TestMethod>,
    chain: Vec<SetUpTearDownLevel>,
    ctx: TestContext,
}

impl LeafRun {
    fn run(mut self) -> LeafOutcome {
        let mut outcome = LeafOutcome::new(ResultState::SUCCESS);
        let mut entered = 0;
        let mut setup_failed = false;
        for level in &self.chain {
            entered += 1;
            if let Err(failure) = run_hooks(&level.setup, &mut self.ctx) {
                outcome.fail(&failure, FailureSite::SetUp);
                setup_failed = true;
                break;
            }
        }

        if !setup_failed {
            let method = Arc::clone(&self.method);
            match guarded(|| method.body.invoke(&mut self.ctx)) {
                Ok(value) => outcome.check_expected(&method, value),
                Err(failure) => outcome.fail(&failure, FailureSite::Test),
            }
        }

        for level in self.chain[..entered].iter().rev() {
            for hook in &level.teardown {
                if let Err(failure) = run_hook(hook, &mut self.ctx) {
                    outcome.teardown_failures.push(failure);
                }
            }
        }

        outcome.output = self.ctx.take_output();
        outcome.assert_count = self.ctx.assert_count();
        outcome
    }
}

pub(super) fn run_hook(hook: &Hook, ctx: &mut TestContext) -> Result<(), Failure> {
    debug!(hook = hook.name(), test = ctx.full_name(), "running hook");
    guarded(|| hook.body.invoke(ctx).map(drop))
}

/// Run `hooks` in order, stopping at the first failure.
pub(super) fn run_hooks(hooks: &[Hook], ctx: &mut TestContext) -> Result<(), Failure> {
    hooks.iter().try_for_each(|hook| run_hook(hook, ctx))
}

/// What a leaf run produced, ready to be copied into its result.
#[derive(Debug)]
struct LeafOutcome {
    state: ResultState,
    message: Option<String>,
    stack_trace: Option<String>,
    teardown_failures: Vec<Failure>,
    output: String,
    assert_count: usize,
}

impl LeafOutcome {
    fn new(state: ResultState) -> Self {
        LeafOutcome {
            state,
            message: None,
            stack_trace: None,
            teardown_failures: Vec::new(),
            output: String::new(),
            assert_count: 0,
        }
    }

    fn interrupted(state: ResultState, message: String) -> Self {
        LeafOutcome {
            message: Some(message),
            ..LeafOutcome::new(state)
        }
    }

    fn fail(&mut self, failure: &Failure, site: FailureSite) {
        self.state = failure.state_at(site);
        self.message = Some(failure.message.clone());
        self.stack_trace = failure.stack_trace.clone();
    }

    fn check_expected(&mut self, method: &TestMethod, actual: Value) {
        let Some(expected) = &method.expected_result else {
            return;
        };
        if *expected != actual {
            self.state = ResultState::FAILURE;
            self.message = Some(format!("  Expected: {expected}\n  But was:  {actual}"));
        }
    }

    fn apply(self, result: &mut TestResult) {
        result.set_result(self.state, self.message, self.stack_trace);
        for failure in &self.teardown_failures {
            result.record_tear_down_failure(failure);
        }
        result.output = self.output;
        result.assert_count = self.assert_count;
    }
}

/// Run a leaf on a dedicated thread, giving up when its timeout expires or
/// the run is aborted.
fn run_on_own_thread(
    run: LeafRun,
    full_name: &str,
    timeout_ms: Option<u64>,
    status: &ExecutionStatus,
) -> LeafOutcome {
    let (tx, rx) = channel::bounded(1);
    let spawned = thread::Builder::new()
        .name(format!("rsunit:{full_name}"))
        .spawn(move || {
            let _ = tx.send(run.run());
        });
    if let Err(err) = spawned {
        return LeafOutcome::interrupted(
            ResultState::ERROR,
            format!("failed to start test thread: {err}"),
        );
    }
    debug!(test = full_name, timeout_ms = ?timeout_ms, "running on own thread");

    let deadline = timeout_ms.map(|ms| Instant::now() + Duration::from_millis(ms));
    loop {
        let wait = match deadline {
            Some(deadline) => deadline
                .saturating_duration_since(Instant::now())
                .min(WAIT_SLICE),
            None => WAIT_SLICE,
        };
        match rx.recv_timeout(wait) {
            Ok(_) if status.is_abort_requested() => {
                warn!(test = full_name, "test returned after the run was aborted");
                return LeafOutcome::interrupted(
                    ResultState::CANCELLED,
                    CANCELLED_MESSAGE.to_string(),
                );
            }
            Ok(outcome) => return outcome,
            Err(RecvTimeoutError::Disconnected) => {
                return LeafOutcome::interrupted(
                    ResultState::ERROR,
                    "test thread ended without reporting a result".to_string(),
                );
            }
            Err(RecvTimeoutError::Timeout) => {
                if status.is_abort_requested() {
                    warn!(test = full_name, "abandoning test thread, run aborted");
                    return LeafOutcome::interrupted(
                        ResultState::CANCELLED,
                        CANCELLED_MESSAGE.to_string(),
                    );
                }
                if let (Some(deadline), Some(ms)) = (deadline, timeout_ms) {
                    if Instant::now() >= deadline {
                        warn!(test = full_name, timeout_ms = ms, "test timed out");
                        return LeafOutcome::interrupted(
                            ResultState::CANCELLED,
                            format!("Test exceeded Timeout value of {ms}ms"),
                        );
                    }
                }
            }
        }
    }
}

/// Fixture for one-time hooks and for leaves sharing a single instance.
pub(super) fn shared_fixture(source: Option<&FixtureSource>) -> Option<Fixture> {
    match source {
        Some(FixtureSource::Shared(fixture)) => Some(fixture.clone()),
        _ => None,
    }
}
