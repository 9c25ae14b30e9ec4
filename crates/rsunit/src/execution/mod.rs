//! The execution engine.
//!
//! [`Executor::execute`] wraps the root node in a work item and runs it on
//! the calling thread. Suites create work items for their selected children
//! and hand them to the dispatcher, which runs them inline or on a rayon pool
//! depending on the level of parallelism. Every node yields a result, and
//! suite results are rolled up from their children once all of them are
//! complete.

mod composite;
mod context;
mod dispatcher;
mod failure;
mod work_item;

use std::sync::Arc;

use tracing::info;

use crate::config::RunSettings;
use crate::error::{EngineError, Result};
use crate::filter::TestFilter;
use crate::listener::{NullListener, TestListener};
use crate::result::TestResult;
use crate::tree::{NodeIndex, TestRef, TestTree};

pub use context::{ExecutionStatus, StopHandle};
pub use failure::Failure;

use context::ExecutionContext;
use dispatcher::Dispatcher;
use work_item::WorkItem;

pub struct Executor {
    settings: RunSettings,
    listener: Arc<dyn TestListener>,
    status: Arc<ExecutionStatus>,
}

impl Executor {
    pub fn new(settings: RunSettings) -> Self {
        Executor {
            settings,
            listener: Arc::new(NullListener),
            status: Arc::new(ExecutionStatus::new()),
        }
    }

    pub fn with_listener(mut self, listener: impl TestListener + 'static) -> Self {
        self.listener = Arc::new(listener);
        self
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    /// Handle for stopping a run in progress from another thread.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(Arc::clone(&self.status))
    }

    /// Run `root` and everything below it that passes `filter`.
    ///
    /// Test failures are recorded in the returned tree; an error means the
    /// engine could not run at all.
    ///
    /// A stop requested before the call is honored: nothing is dispatched and
    /// every selected test is reported as cancelled. The stop flag is cleared
    /// when the run ends, so the executor can be reused.
    pub fn execute(
        &self,
        tree: &Arc<TestTree>,
        root: NodeIndex,
        filter: Arc<dyn TestFilter>,
    ) -> Result<TestResult> {
        let test = tree
            .test(root)
            .ok_or(EngineError::UnknownNode(root.index()))?;
        let dispatcher = Dispatcher::new(self.settings.level_of_parallelism)?;

        info!(
            root = test.full_name(),
            tests = self.count_test_cases(test, &*filter),
            workers = self.settings.level_of_parallelism,
            seed = self.settings.random_seed,
            "starting run"
        );
        let context = ExecutionContext {
            tree: Arc::clone(tree),
            filter,
            settings: Arc::new(self.settings.clone()),
            status: Arc::clone(&self.status),
            listener: Arc::clone(&self.listener),
            dispatcher: Arc::new(dispatcher),
            fixture: None,
            setup_chain: Vec::new(),
        };
        let result = WorkItem::new(test, context).execute();
        self.status.reset();
        info!(
            state = %result.state,
            total = result.total(),
            passed = result.pass_count(),
            failed = result.fail_count(),
            skipped = result.skip_count(),
            "run finished"
        );
        Ok(result)
    }

    /// Number of leaves below `test` that a run with `filter` would report.
    pub fn count_test_cases(&self, test: TestRef<'_>, filter: &dyn TestFilter) -> usize {
        if !test.is_suite() {
            return 1;
        }
        test.children()
            .filter(|child| filter.pass(*child))
            .map(|child| self.count_test_cases(child, filter))
            .sum()
    }
}

impl Default for Executor {
    fn default() -> Self {
        Executor::new(RunSettings::default())
    }
}
