//! The handle a running test body receives.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::Value;

use crate::execution::ExecutionStatus;
use crate::method::Fixture;
use crate::result::ResultState;

/// Unwind payload used to end a test with a specific result state.
#[derive(Debug, Clone)]
pub(crate) struct ResultSignal {
    pub state: ResultState,
    pub message: String,
}

/// Per-execution view of the current test.
///
/// Cloning is cheap; clones share the captured output, assert counter and
/// cancellation flag.
#[derive(Clone)]
pub struct TestContext {
    id: String,
    name: String,
    full_name: String,
    fixture: Option<Fixture>,
    arguments: Arc<[Value]>,
    seed: u64,
    random: StdRng,
    output: Arc<Mutex<String>>,
    asserts: Arc<AtomicUsize>,
    status: Arc<ExecutionStatus>,
}

impl TestContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: &str,
        name: &str,
        full_name: &str,
        fixture: Option<Fixture>,
        arguments: &[Value],
        seed: u64,
        status: Arc<ExecutionStatus>,
    ) -> Self {
        TestContext {
            id: id.to_string(),
            name: name.to_string(),
            full_name: full_name.to_string(),
            fixture,
            arguments: Arc::from(arguments),
            seed,
            random: StdRng::seed_from_u64(seed),
            output: Arc::new(Mutex::new(String::new())),
            asserts: Arc::new(AtomicUsize::new(0)),
            status,
        }
    }

    /// A context that is not attached to any run. Useful for calling a body directly.
    pub fn detached(name: &str) -> Self {
        TestContext::new(name, name, name, None, &[], 0, Arc::new(ExecutionStatus::new()))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    /// The fixture instance, if one exists and is of type `T`.
    pub fn fixture<T: 'static>(&self) -> Option<&T> {
        self.fixture.as_ref()?.downcast_ref::<T>()
    }

    pub fn arguments(&self) -> &[Value] {
        &self.arguments
    }

    pub fn argument(&self, index: usize) -> Option<&Value> {
        self.arguments.get(index)
    }

    /// Seed of [`random`](Self::random); identical seeds replay identical sequences.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn random(&mut self) -> &mut StdRng {
        &mut self.random
    }

    /// Append text to the captured output of this test.
    pub fn write(&self, text: &str) {
        self.output
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_str(text);
    }

    pub fn writeln(&self, text: &str) {
        let mut out = self.output.lock().unwrap_or_else(PoisonError::into_inner);
        let _ = writeln!(out, "{text}");
    }

    pub(crate) fn take_output(&self) -> String {
        std::mem::take(&mut *self.output.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn increment_assert_count(&self) {
        self.asserts.fetch_add(1, Ordering::SeqCst);
    }

    pub fn assert_count(&self) -> usize {
        self.asserts.load(Ordering::SeqCst)
    }

    /// Whether a stop of the run was requested.
    pub fn is_cancelled(&self) -> bool {
        self.status.is_stop_requested()
    }

    /// End the test as ignored.
    pub fn ignore(&self, reason: impl Into<String>) -> ! {
        signal(ResultState::IGNORED, reason.into())
    }

    /// End the test as inconclusive.
    pub fn inconclusive(&self, message: impl Into<String>) -> ! {
        signal(ResultState::INCONCLUSIVE, message.into())
    }

    /// End the test as passed, skipping the rest of the body.
    pub fn pass(&self, message: impl Into<String>) -> ! {
        signal(ResultState::SUCCESS, message.into())
    }

    /// End the test as failed.
    pub fn fail(&self, message: impl Into<String>) -> ! {
        signal(ResultState::FAILURE, message.into())
    }
}

fn signal(state: ResultState, message: String) -> ! {
    std::panic::panic_any(ResultSignal { state, message })
}

impl std::fmt::Debug for TestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestContext")
            .field("id", &self.id)
            .field("full_name", &self.full_name)
            .field("seed", &self.seed)
            .finish_non_exhaustive()
    }
}
