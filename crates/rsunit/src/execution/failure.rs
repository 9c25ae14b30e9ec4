//! Turning panics, returned errors and result signals into result states.

use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::cell::{Cell, RefCell};
use std::error::Error;
use std::panic::{self, catch_unwind, AssertUnwindSafe};
use std::sync::Once;

use crate::error::BoxError;
use crate::result::{FailureSite, ResultState, TestStatus};
use crate::test_context::ResultSignal;

thread_local! {
    static CAPTURING: Cell<bool> = const { Cell::new(false) };
    static LAST_PANIC: RefCell<Option<String>> = const { RefCell::new(None) };
}

static HOOK: Once = Once::new();

/// An early end of user code: a panic, a returned error or a result signal.
#[derive(Debug, Clone, PartialEq)]
pub struct Failure {
    pub state: ResultState,
    pub message: String,
    pub stack_trace: Option<String>,
}

impl Failure {
    pub fn new(state: ResultState, message: impl Into<String>) -> Self {
        Failure {
            state,
            message: message.into(),
            stack_trace: None,
        }
    }

    /// Failed:Error with the full source chain of `err`.
    pub fn from_error(err: &(dyn Error + 'static)) -> Self {
        let mut message = err.to_string();
        let mut source = err.source();
        while let Some(cause) = source {
            message.push_str("\n  ----> ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        Failure::new(ResultState::ERROR, message)
    }

    fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let payload = match payload.downcast::<ResultSignal>() {
            Ok(signal) => return Failure::new(signal.state, signal.message),
            Err(other) => other,
        };
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        };
        Failure {
            state: ResultState::FAILURE,
            message,
            stack_trace: LAST_PANIC.with(|p| p.borrow_mut().take()),
        }
    }

    /// The state to record when this happened during `site`.
    ///
    /// Only failures move to another site; an ignore or inconclusive signal
    /// stays attached to the test.
    pub fn state_at(&self, site: FailureSite) -> ResultState {
        if self.state.status == TestStatus::Failed {
            self.state.clone().with_site(site)
        } else {
            self.state.clone()
        }
    }
}

fn install_panic_hook() {
    HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if !CAPTURING.with(Cell::get) {
                previous(info);
                return;
            }
            if info.payload().is::<ResultSignal>() {
                return;
            }
            let mut trace = info
                .location()
                .map(|l| format!("at {}:{}:{}", l.file(), l.line(), l.column()))
                .unwrap_or_default();
            let backtrace = Backtrace::capture();
            if backtrace.status() == BacktraceStatus::Captured {
                trace.push('\n');
                trace.push_str(&backtrace.to_string());
            }
            LAST_PANIC.with(|p| *p.borrow_mut() = Some(trace));
        }));
    });
}

/// Run user code, catching panics and mapping errors into a [`Failure`].
///
/// Panic output is suppressed while the closure runs; the location and
/// backtrace end up in the failure's stack trace instead.
pub(crate) fn guarded<T>(f: impl FnOnce() -> Result<T, BoxError>) -> Result<T, Failure> {
    install_panic_hook();
    let was_capturing = CAPTURING.with(|c| c.replace(true));
    let outcome = catch_unwind(AssertUnwindSafe(f));
    CAPTURING.with(|c| c.set(was_capturing));
    match outcome {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(Failure::from_error(&*err)),
        Err(payload) => Err(Failure::from_panic(payload)),
    }
}
