//! Closure-based builder API: `Context`, `TestBuilder`, `build()` and `run()`.

use std::any::Any;
use std::cell::RefCell;
use std::future::Future;
use std::sync::Arc;

use serde_json::Value;

use crate::error::BoxError;
use crate::method::{Body, Fixture, FixtureFactory, Hook, IntoTestReturn, MethodSignature, ReturnKind, TestMethod};
use crate::properties::{names, PropertyBag, NON_PARALLELIZABLE};
use crate::runner::{self, RunConfig};
use crate::table::TableBuilder;
use crate::test_context::TestContext;
use crate::tree::{LifeCycle, NodeIndex, RunState, SuiteKind, TestSuite, TestTree};
use crate::validation;

// ============================================================================
// Thread-local tree builder
// ============================================================================

thread_local! {
    static BUILDER: RefCell<Option<TreeBuilder>> = const { RefCell::new(None) };
}

pub(crate) struct TreeBuilder {
    tree: TestTree,
    root: NodeIndex,
    stack: Vec<NodeIndex>,
}

impl TreeBuilder {
    fn new(name: &str) -> Self {
        let mut tree = TestTree::new();
        let root = tree.add_suite(SuiteKind::Assembly, name);
        TreeBuilder {
            tree,
            root,
            stack: vec![root],
        }
    }

    fn current(&self) -> NodeIndex {
        self.stack.last().copied().unwrap_or(self.root)
    }

    fn attach(&mut self, child: NodeIndex) {
        let parent = self.current();
        self.tree
            .add(parent, child)
            .expect("rsunit: builder scopes are always suites");
    }

    pub(crate) fn push_suite(&mut self, kind: SuiteKind, name: &str) -> NodeIndex {
        let index = self.tree.add_suite(kind, name);
        self.attach(index);
        self.stack.push(index);
        index
    }

    pub(crate) fn pop_suite(&mut self) {
        assert!(self.stack.len() > 1, "rsunit: unbalanced suite push/pop");
        self.stack.pop();
    }

    pub(crate) fn add_leaf(
        &mut self,
        name: &str,
        method: TestMethod,
        properties: PropertyBag,
        run_state: RunState,
        reason: Option<&str>,
    ) -> NodeIndex {
        let index = self.tree.add_method(name, method);
        self.attach(index);
        self.apply(index, properties, run_state, reason);
        index
    }

    fn apply(&mut self, index: NodeIndex, properties: PropertyBag, run_state: RunState, reason: Option<&str>) {
        if let Ok(node) = self.tree.node_mut(index) {
            for (key, values) in properties.iter() {
                for value in values {
                    node.properties.add(key, value.as_str());
                }
            }
        }
        if run_state != RunState::Runnable || reason.is_some() {
            let _ = self.tree.set_run_state(index, run_state, reason);
        }
    }

    pub(crate) fn current_suite_mut(&mut self) -> &mut TestSuite {
        let current = self.current();
        self.tree
            .suite_mut(current)
            .expect("rsunit: builder scopes are always suites")
    }

    pub(crate) fn current_properties_mut(&mut self) -> &mut PropertyBag {
        let current = self.current();
        &mut self
            .tree
            .node_mut(current)
            .expect("rsunit: builder scopes are always in the tree")
            .properties
    }

    pub(crate) fn set_current_run_state(&mut self, state: RunState, reason: &str) {
        let current = self.current();
        let _ = self.tree.set_run_state(current, state, Some(reason));
    }

    fn finish(mut self) -> (TestTree, NodeIndex) {
        assert_eq!(
            self.stack.len(),
            1,
            "rsunit: unbalanced suite push/pop at finalization"
        );
        validation::validate(&mut self.tree, self.root)
            .expect("rsunit: builder root is part of its own tree");
        (self.tree, self.root)
    }
}

/// Access the thread-local builder.
pub(crate) fn with_builder<R>(f: impl FnOnce(&mut TreeBuilder) -> R) -> R {
    BUILDER.with(|cell| {
        let mut opt = cell.borrow_mut();
        let builder = opt
            .as_mut()
            .expect("rsunit: Context used outside of rsunit::build() or rsunit::run()");
        f(builder)
    })
}

/// Which hook list a [`Context::hook`] call targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    OneTimeSetUp,
    OneTimeTearDown,
    SetUp,
    TearDown,
}

// ============================================================================
// Context: the user-facing handle
// ============================================================================

/// A lightweight handle for declaring the test tree.
///
/// All methods delegate to a thread-local builder. `Context` is `Copy` so it
/// can be passed into nested closures without ceremony.
///
/// # Example
/// ```rust,no_run
/// fn main() {
///     rsunit::run(|ctx| {
///         ctx.fixture("Calculator", |ctx| {
///             ctx.test("adds", |_| assert_eq!(2 + 3, 5));
///         });
///     });
/// }
/// ```
#[derive(Copy, Clone)]
pub struct Context;

impl Context {
    // ---- Suites --------------------------------------------------------------

    pub fn namespace(&self, name: &str, body: impl FnOnce(Context)) {
        self.suite(SuiteKind::Namespace, name, body);
    }

    pub fn fixture(&self, name: &str, body: impl FnOnce(Context)) {
        self.suite(SuiteKind::Fixture, name, body);
    }

    /// A suite whose one-time hooks wrap every fixture declared inside it.
    pub fn setup_fixture(&self, name: &str, body: impl FnOnce(Context)) {
        self.suite(SuiteKind::SetUpFixture, name, body);
    }

    /// Container for several instances of one fixture, each declared with
    /// [`fixture_with_args`](Self::fixture_with_args).
    pub fn parameterized_fixture(&self, name: &str, body: impl FnOnce(Context)) {
        self.suite(SuiteKind::ParameterizedFixture, name, body);
    }

    /// Container for the type instantiations of a generic fixture.
    pub fn generic_fixture(&self, name: &str, body: impl FnOnce(Context)) {
        self.suite(SuiteKind::GenericFixture, name, body);
    }

    /// A fixture instance constructed with `args`.
    pub fn fixture_with_args(&self, name: &str, args: Vec<Value>, body: impl FnOnce(Context)) {
        with_builder(|b| {
            b.push_suite(SuiteKind::Fixture, name);
            b.current_suite_mut().arguments = args;
        });
        body(Context);
        with_builder(|b| b.pop_suite());
    }

    fn suite(&self, kind: SuiteKind, name: &str, body: impl FnOnce(Context)) {
        with_builder(|b| b.push_suite(kind, name));
        body(Context);
        with_builder(|b| b.pop_suite());
    }

    // ---- Fixture instances ---------------------------------------------------

    /// Construct the current suite's fixture with `factory`. Tests read it
    /// through [`TestContext::fixture`].
    pub fn fixture_instance<T>(&self, factory: impl Fn() -> T + Send + Sync + 'static)
    where
        T: Any + Send + Sync,
    {
        self.fixture_factory(move || Ok::<T, BoxError>(factory()));
    }

    /// Like [`fixture_instance`](Self::fixture_instance), for constructors
    /// that can fail. A failure is reported as a setup error.
    pub fn fixture_factory<T, E>(&self, factory: impl Fn() -> Result<T, E> + Send + Sync + 'static)
    where
        T: Any + Send + Sync,
        E: Into<BoxError>,
    {
        let factory: FixtureFactory = Arc::new(move || -> Result<Fixture, BoxError> {
            factory()
                .map(|value| Arc::new(value) as Fixture)
                .map_err(Into::into)
        });
        with_builder(|b| b.current_suite_mut().fixture = Some(factory));
    }

    /// Give every test of the current suite its own fixture instance.
    pub fn instance_per_test_case(&self) {
        with_builder(|b| b.current_suite_mut().lifecycle = LifeCycle::InstancePerTestCase);
    }

    // ---- Tests ---------------------------------------------------------------

    /// Define a test case. Returns a [`TestBuilder`] for optional decorators.
    ///
    /// ```rust,no_run
    /// # fn main() { rsunit::run(|ctx| {
    /// ctx.test("works", |_| assert!(true));
    ///
    /// ctx.test("slow test", |_| { /* ... */ })
    ///     .category("slow")
    ///     .timeout(5000);
    /// # }); }
    /// ```
    pub fn test<F, R>(&self, name: &str, body: F) -> TestBuilder
    where
        F: Fn(&mut TestContext) -> R + Send + Sync + 'static,
        R: IntoTestReturn,
    {
        let method = TestMethod::new(name, Body::from_fn(body)).with_return_kind(R::return_kind());
        TestBuilder::new(name.to_string(), method)
    }

    pub fn async_test<F, Fut, R>(&self, name: &str, body: F) -> TestBuilder
    where
        F: Fn(TestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: IntoTestReturn,
    {
        let return_kind = match R::return_kind() {
            ReturnKind::Void => ReturnKind::Awaitable,
            other => other,
        };
        let method = TestMethod::new(name, Body::from_async(body)).with_return_kind(return_kind);
        TestBuilder::new(name.to_string(), method)
    }

    /// Start a parameterized method: one test per case.
    ///
    /// ```rust,no_run
    /// # fn main() { rsunit::run(|ctx| {
    /// ctx.cases("add")
    ///     .case_expecting("small", (2i32, 3i32), 5)
    ///     .case_expecting("large", (100i32, 200i32), 300)
    ///     .run(|(a, b): &(i32, i32), _| serde_json::json!(a + b));
    /// # }); }
    /// ```
    pub fn cases(&self, name: &str) -> TableBuilder {
        TableBuilder::new(name.to_string(), SuiteKind::ParameterizedMethod)
    }

    /// Like [`cases`](Self::cases), reported as a theory.
    pub fn theory(&self, name: &str) -> TableBuilder {
        TableBuilder::new(name.to_string(), SuiteKind::Theory)
    }

    /// A fixture whose steps run one after another in declaration order.
    ///
    /// ```rust,no_run
    /// # fn main() { rsunit::run(|ctx| {
    /// ctx.ordered("user workflow", |oct| {
    ///     oct.step("create account", |_| { /* ... */ });
    ///     oct.step("login", |_| { /* ... */ });
    /// });
    /// # }); }
    /// ```
    pub fn ordered(&self, name: &str, body: impl FnOnce(&mut crate::ordered::OrderedContext)) {
        let mut oct = crate::ordered::OrderedContext::new(name.to_string());
        body(&mut oct);
        with_builder(|b| oct.register(b));
    }

    // ---- Hooks ---------------------------------------------------------------

    pub fn one_time_setup<R: IntoTestReturn>(&self, hook: impl Fn(&mut TestContext) -> R + Send + Sync + 'static) {
        self.push_hook(HookKind::OneTimeSetUp, Hook::new("OneTimeSetUp", Body::from_fn(hook)));
    }

    pub fn one_time_teardown<R: IntoTestReturn>(&self, hook: impl Fn(&mut TestContext) -> R + Send + Sync + 'static) {
        self.push_hook(HookKind::OneTimeTearDown, Hook::new("OneTimeTearDown", Body::from_fn(hook)));
    }

    pub fn setup<R: IntoTestReturn>(&self, hook: impl Fn(&mut TestContext) -> R + Send + Sync + 'static) {
        self.push_hook(HookKind::SetUp, Hook::new("SetUp", Body::from_fn(hook)));
    }

    pub fn teardown<R: IntoTestReturn>(&self, hook: impl Fn(&mut TestContext) -> R + Send + Sync + 'static) {
        self.push_hook(HookKind::TearDown, Hook::new("TearDown", Body::from_fn(hook)));
    }

    /// Register a hook with explicit signature metadata, as a discovery
    /// layer would. Invalid signatures make the suite not runnable.
    pub fn hook(&self, kind: HookKind, signature: MethodSignature, body: Body) {
        self.push_hook(kind, Hook::with_signature(signature, body));
    }

    fn push_hook(&self, kind: HookKind, hook: Hook) {
        with_builder(|b| {
            let suite = b.current_suite_mut();
            match kind {
                HookKind::OneTimeSetUp => suite.one_time_setup.push(hook),
                HookKind::OneTimeTearDown => suite.one_time_teardown.push(hook),
                HookKind::SetUp => suite.setup.push(hook),
                HookKind::TearDown => suite.teardown.push(hook),
            }
        });
    }

    // ---- Attributes of the current suite -------------------------------------

    pub fn categories(&self, categories: &[&str]) {
        with_builder(|b| {
            let props = b.current_properties_mut();
            for category in categories {
                props.add(names::CATEGORY, *category);
            }
        });
    }

    pub fn property(&self, key: &str, value: &str) {
        with_builder(|b| b.current_properties_mut().add(key, value));
    }

    pub fn ignore(&self, reason: &str) {
        with_builder(|b| b.set_current_run_state(RunState::Ignored, reason));
    }

    pub fn skip(&self, reason: &str) {
        with_builder(|b| b.set_current_run_state(RunState::Skipped, reason));
    }

    /// Run the current suite only when a filter selects it by name.
    pub fn explicit(&self, reason: &str) {
        with_builder(|b| b.set_current_run_state(RunState::Explicit, reason));
    }

    /// Keep declaration order when the tree is sorted.
    pub fn maintain_order(&self) {
        with_builder(|b| b.current_suite_mut().maintain_order = true);
    }

    pub fn non_parallelizable(&self) {
        with_builder(|b| {
            b.current_properties_mut()
                .set(names::PARALLEL_SCOPE, NON_PARALLELIZABLE)
        });
    }
}

// ============================================================================
// TestBuilder: fluent decorator API, registers test on Drop
// ============================================================================

/// Builder returned by [`Context::test`]. Supports chaining decorators and
/// registers the test node when dropped.
///
/// ```rust,no_run
/// # fn main() { rsunit::run(|ctx| {
/// // Simple (drops immediately, registered at semicolon):
/// ctx.test("simple", |_| assert!(true));
///
/// // With decorators:
/// ctx.test("complex", |_| { /* ... */ })
///     .category("integration")
///     .timeout(5000);
/// # }); }
/// ```
pub struct TestBuilder {
    name: String,
    method: Option<TestMethod>,
    properties: PropertyBag,
    run_state: RunState,
    reason: Option<String>,
}

impl TestBuilder {
    fn new(name: String, method: TestMethod) -> Self {
        TestBuilder {
            name,
            method: Some(method),
            properties: PropertyBag::new(),
            run_state: RunState::Runnable,
            reason: None,
        }
    }

    pub fn category(mut self, category: &str) -> Self {
        self.properties.add(names::CATEGORY, category);
        self
    }

    pub fn description(mut self, text: &str) -> Self {
        self.properties.set(names::DESCRIPTION, text);
        self
    }

    pub fn property(mut self, key: &str, value: &str) -> Self {
        self.properties.add(key, value);
        self
    }

    pub fn ignore(mut self, reason: &str) -> Self {
        self.run_state = RunState::Ignored;
        self.reason = Some(reason.to_string());
        self
    }

    pub fn skip(mut self, reason: &str) -> Self {
        self.run_state = RunState::Skipped;
        self.reason = Some(reason.to_string());
        self
    }

    /// Run only when a filter selects this test by name.
    pub fn explicit(mut self) -> Self {
        self.run_state = RunState::Explicit;
        self
    }

    /// Fail the test if it runs longer than `ms` milliseconds.
    pub fn timeout(mut self, ms: u64) -> Self {
        self.properties.set(names::TIMEOUT, ms.to_string());
        self
    }

    /// Position among siblings; ordered tests run before unordered ones.
    pub fn order(mut self, order: i64) -> Self {
        self.properties.set(names::ORDER, order.to_string());
        self
    }

    /// Compare the returned value against `expected`.
    pub fn expected(mut self, expected: impl Into<Value>) -> Self {
        self.method = self.method.take().map(|m| m.with_expected_result(expected.into()));
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.method = self.method.take().map(|m| m.with_seed(seed));
        self
    }

    pub fn non_parallelizable(mut self) -> Self {
        self.properties.set(names::PARALLEL_SCOPE, NON_PARALLELIZABLE);
        self
    }

    /// Run on a dedicated thread.
    pub fn requires_thread(mut self) -> Self {
        self.properties.set(names::REQUIRES_THREAD, "true");
        self
    }
}

impl Drop for TestBuilder {
    fn drop(&mut self) {
        let Some(method) = self.method.take() else {
            return;
        };
        let name = std::mem::take(&mut self.name);
        let properties = std::mem::take(&mut self.properties);
        let run_state = self.run_state;
        let reason = self.reason.take();
        with_builder(|b| {
            b.add_leaf(&name, method, properties, run_state, reason.as_deref());
        });
    }
}

// ============================================================================
// build() / run(): entry points
// ============================================================================

/// Build a test tree without running it.
///
/// The returned root is an assembly suite named `name`. The tree has been
/// validated: malformed nodes are already marked not runnable.
pub fn build(name: &str, body: impl FnOnce(Context)) -> (TestTree, NodeIndex) {
    BUILDER.with(|cell| {
        *cell.borrow_mut() = Some(TreeBuilder::new(name));
    });

    body(Context);

    BUILDER.with(|cell| {
        cell.borrow_mut()
            .take()
            .expect("rsunit: builder missing after build")
            .finish()
    })
}

/// Build and run a test tree, then exit the process.
///
/// This is the main entry point for rsunit. Call it from `fn main()` in a
/// test target with `harness = false`.
///
/// # Example
///
/// ```rust,no_run
/// fn main() {
///     rsunit::run(|ctx| {
///         ctx.fixture("Calculator", |ctx| {
///             ctx.test("adds", |_| assert_eq!(2 + 3, 5));
///         });
///     });
/// }
/// ```
pub fn run(body: impl FnOnce(Context)) -> ! {
    // Phase 1: build the tree
    let (tree, root) = build(&runner::assembly_name(), body);

    // Phase 2: execute it
    let code = match RunConfig::from_args() {
        Ok(config) => runner::run_tree(tree, root, &config),
        Err(err) => {
            eprintln!("rsunit: {err}");
            runner::EXIT_INVALID_ARG
        }
    };
    std::process::exit(code);
}
