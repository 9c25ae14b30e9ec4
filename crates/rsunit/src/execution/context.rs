//! State shared by the work items of one run.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::config::RunSettings;
use crate::filter::TestFilter;
use crate::listener::TestListener;
use crate::method::{Fixture, FixtureFactory, Hook};
use crate::tree::TestTree;

use super::dispatcher::Dispatcher;

const RUNNING: u8 = 0;
const STOP_REQUESTED: u8 = 1;
const ABORT_REQUESTED: u8 = 2;

/// Run-wide cancellation flag.
///
/// A stop lets running tests finish and skips everything not yet started.
/// An abort additionally abandons tests running on their own thread.
#[derive(Debug, Default)]
pub struct ExecutionStatus(AtomicU8);

impl ExecutionStatus {
    pub fn new() -> Self {
        ExecutionStatus(AtomicU8::new(RUNNING))
    }

    pub fn request_stop(&self) {
        let _ = self
            .0
            .compare_exchange(RUNNING, STOP_REQUESTED, Ordering::SeqCst, Ordering::SeqCst);
    }

    pub fn request_abort(&self) {
        self.0.store(ABORT_REQUESTED, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst) != RUNNING
    }

    pub fn is_abort_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst) == ABORT_REQUESTED
    }

    pub(crate) fn reset(&self) {
        self.0.store(RUNNING, Ordering::SeqCst);
    }
}

/// Clonable handle for stopping a run from another thread.
#[derive(Debug, Clone)]
pub struct StopHandle(pub(crate) Arc<ExecutionStatus>);

impl StopHandle {
    /// Request a stop. With `force`, tests running on their own thread are
    /// abandoned as well.
    pub fn stop(&self, force: bool) {
        tracing::warn!(force, "stop requested");
        if force {
            self.0.request_abort();
        } else {
            self.0.request_stop();
        }
    }

    pub fn is_stop_requested(&self) -> bool {
        self.0.is_stop_requested()
    }
}

/// Where leaves get their fixture instance from.
#[derive(Clone)]
pub(crate) enum FixtureSource {
    Shared(Fixture),
    PerTestCase(FixtureFactory),
}

/// Per-test hooks contributed by one enclosing suite.
#[derive(Clone)]
pub(crate) struct SetUpTearDownLevel {
    pub setup: Vec<Hook>,
    pub teardown: Vec<Hook>,
}

#[derive(Clone)]
pub(crate) struct ExecutionContext {
    pub tree: Arc<TestTree>,
    pub filter: Arc<dyn TestFilter>,
    pub settings: Arc<RunSettings>,
    pub status: Arc<ExecutionStatus>,
    pub listener: Arc<dyn TestListener>,
    pub dispatcher: Arc<Dispatcher>,
    pub fixture: Option<FixtureSource>,
    /// Outermost level first.
    pub setup_chain: Vec<SetUpTearDownLevel>,
}
