//! # rsunit: an xUnit-style test tree and execution engine
//!
//! Tests are declared as a tree of suites (namespaces, fixtures, setup
//! fixtures, parameterized methods) with leaf test methods. The engine runs a
//! filtered view of that tree, honoring one-time and per-test setup and
//! teardown, fixture instances, timeouts, cancellation and parallel dispatch,
//! and produces a result tree whose suite results are rolled up from their
//! children.
//!
//! ## Quick example
//!
//! ```rust,no_run
//! fn main() {
//!     rsunit::run(|ctx| {
//!         ctx.fixture("Calculator", |ctx| {
//!             ctx.one_time_setup(|ctx| ctx.writeln("starting"));
//!
//!             ctx.test("adds two numbers", |_| {
//!                 assert_eq!(2 + 3, 5);
//!             });
//!
//!             ctx.cases("add")
//!                 .case_expecting("small", (2, 3), 5)
//!                 .run(|(a, b): &(i32, i32), _| serde_json::json!(a + b));
//!         });
//!     });
//! }
//! ```
//!
//! ## Driving the engine directly
//!
//! ```rust
//! use std::sync::Arc;
//! use rsunit::{EmptyFilter, Executor, RunSettings, TestStatus};
//!
//! let (tree, root) = rsunit::build("demo", |ctx| {
//!     ctx.fixture("F", |ctx| {
//!         ctx.test("ok", |_| ());
//!     });
//! });
//! let result = Executor::new(RunSettings::new().with_workers(2))
//!     .execute(&Arc::new(tree), root, Arc::new(EmptyFilter))
//!     .unwrap();
//! assert_eq!(result.status(), TestStatus::Passed);
//! assert_eq!(result.total(), 1);
//! ```
//!
//! ## Features
//!
//! - `macros` (default): the `fixtures!` and `main!` DSL macros
//! - `googletest`: re-exports `googletest` matchers via `rsunit::matchers`

pub mod aggregate;
pub mod config;
mod context;
pub mod error;
pub mod execution;
pub mod filter;
pub mod listener;
pub mod method;
pub mod ordered;
pub mod properties;
pub mod result;
pub mod runner;
pub mod table;
pub mod test_context;
pub mod tree;
pub mod validation;

pub use aggregate::{merge_results, roll_up, summarize, Summary};
pub use config::RunSettings;
pub use context::{build, run, Context, HookKind, TestBuilder};
pub use error::{BoxError, EngineError, Result};
pub use execution::{Executor, Failure, StopHandle};
pub use filter::{
    AndFilter, CategoryFilter, EmptyFilter, FullNameFilter, IdFilter, NameFilter, NotFilter, OrFilter,
    PropertyFilter, TestFilter,
};
pub use listener::{NullListener, TestListener};
pub use method::{Body, Hook, IntoTestReturn, MethodSignature, ReturnKind, TestMethod, Visibility};
pub use properties::PropertyBag;
pub use result::{FailureSite, ResultCounts, ResultState, TestResult, TestStatus};
pub use test_context::TestContext;
pub use tree::{LifeCycle, NodeIndex, RunState, SuiteKind, TestRef, TestTree};

/// JSON value used for test arguments and expected results.
pub use serde_json::Value;

#[cfg(feature = "macros")]
pub use rsunit_macros::{fixtures, main};

/// Re-export of the [`googletest`] crate. Available with the `googletest` feature.
#[cfg(feature = "googletest")]
pub use googletest;

/// Composable matchers re-exported from [`googletest::prelude`].
#[cfg(feature = "googletest")]
pub mod matchers {
    pub use googletest::prelude::*;
}
