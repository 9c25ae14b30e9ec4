//! Execution of suites: fixture lifetime, one-time hooks and child dispatch.

use std::sync::Arc;

use tracing::debug;

use crate::aggregate::roll_up;
use crate::filter::TestFilter;
use crate::properties::names;
use crate::result::{FailureSite, ResultState, TestStatus};
use crate::test_context::TestContext;
use crate::tree::{LifeCycle, TestRef};

use super::context::{FixtureSource, SetUpTearDownLevel};
use super::failure::{guarded, Failure};
use super::work_item::{
    run_hook, run_hooks, shared_fixture, skip_state, skipped_result, WorkItem, WorkItemState,
};

/// Children of `test` that pass `filter`, in dispatch order.
///
/// Children carrying an `Order` property move to the front, sorted by it;
/// the rest keep their relative order.
pub(crate) fn selected_children<'a>(test: TestRef<'a>, filter: &dyn TestFilter) -> Vec<TestRef<'a>> {
    let mut children: Vec<_> = test.children().filter(|c| filter.pass(*c)).collect();
    children.sort_by_key(|c| match c.properties().get_i64(names::ORDER) {
        Some(order) => (0, order),
        None => (1, 0),
    });
    children
}

pub(super) fn execute(item: &mut WorkItem, test: TestRef<'_>) {
    let filter = Arc::clone(&item.context.filter);
    let children = selected_children(test, &*filter);

    if let Some((state, reason)) = skip_state(test, &*filter) {
        debug!(test = test.full_name(), state = %state, "suite not runnable");
        item.result = skipped_result(test, &*filter, state, reason);
        return;
    }
    let Some(suite) = test.suite() else {
        return;
    };
    if children.is_empty() {
        roll_up(&mut item.result, false);
        return;
    }

    let mut child_context = item.context.clone();
    let mut setup_failure: Option<Failure> = None;
    match (&suite.fixture, suite.lifecycle) {
        (Some(factory), LifeCycle::InstancePerTestCase) => {
            child_context.fixture = Some(FixtureSource::PerTestCase(Arc::clone(factory)));
        }
        (Some(factory), LifeCycle::SingleInstance) => match guarded(|| factory()) {
            Ok(fixture) => child_context.fixture = Some(FixtureSource::Shared(fixture)),
            Err(failure) => setup_failure = Some(failure),
        },
        (None, _) => {}
    }

    let mut hook_ctx = TestContext::new(
        test.id(),
        test.name(),
        test.full_name(),
        shared_fixture(child_context.fixture.as_ref()),
        &suite.arguments,
        item.context.settings.random_seed,
        Arc::clone(&item.context.status),
    );

    if setup_failure.is_none() {
        setup_failure = run_hooks(&suite.one_time_setup, &mut hook_ctx).err();
    }
    // A pass signal ends the setup early but lets the children run.
    let setup_failure = setup_failure.filter(|failure| {
        if failure.state.status == TestStatus::Passed {
            debug!(test = test.full_name(), message = %failure.message, "one-time setup passed early");
            return false;
        }
        true
    });

    if let Some(failure) = setup_failure {
        debug!(test = test.full_name(), state = %failure.state, "one-time setup did not succeed");
        item.result.record_failure(&failure, FailureSite::SetUp);
        // Failures skip the children; ignore and inconclusive signals hand down their own state.
        let child_state = match failure.state.status {
            TestStatus::Failed => ResultState::SKIPPED,
            _ => failure.state.clone(),
        }
        .with_site(FailureSite::Parent);
        let message = format!("OneTimeSetUp: {}", failure.message);
        item.result.children = children
            .iter()
            .map(|child| skipped_result(*child, &*filter, child_state.clone(), Some(message.clone())))
            .collect();
        item.result.assert_count = hook_ctx.assert_count();
        roll_up(&mut item.result, true);
    } else {
        if suite.has_per_test_hooks() {
            child_context.setup_chain.push(SetUpTearDownLevel {
                setup: suite.setup.clone(),
                teardown: suite.teardown.clone(),
            });
        }
        let items = children
            .iter()
            .map(|child| WorkItem::new(*child, child_context.clone()))
            .collect();
        item.state = WorkItemState::WaitingForChildren;
        debug!(test = test.full_name(), children = children.len(), "waiting for children");
        item.result.children = item.context.dispatcher.run_children(items);
        item.result.assert_count = hook_ctx.assert_count();
        roll_up(&mut item.result, false);
    }

    let asserts_before = hook_ctx.assert_count();
    for hook in &suite.one_time_teardown {
        if let Err(failure) = run_hook(hook, &mut hook_ctx) {
            debug!(test = test.full_name(), message = %failure.message, "one-time teardown failed");
            item.result.record_tear_down_failure(&failure);
        }
    }
    item.result.assert_count += hook_ctx.assert_count() - asserts_before;
    item.result.output = hook_ctx.take_output();
}
