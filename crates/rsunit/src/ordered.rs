//! Ordered test sequences: steps that run one after another.

use crate::context::TreeBuilder;
use crate::method::{Body, IntoTestReturn, TestMethod};
use crate::properties::{names, PropertyBag, NON_PARALLELIZABLE};
use crate::test_context::TestContext;
use crate::tree::{RunState, SuiteKind};

/// Context for defining the steps of an ordered fixture.
///
/// Each step is its own leaf, so a failing step is reported on its own and
/// later steps still run. Steps never run in parallel with each other.
///
/// ```rust,no_run
/// # fn main() { rsunit::run(|ctx| {
/// ctx.ordered("user workflow", |oct| {
///     oct.step("create account", |_| { /* ... */ });
///     oct.step("verify email", |_| { /* ... */ });
///     oct.step("login", |_| { /* ... */ });
/// });
/// # }); }
/// ```
pub struct OrderedContext {
    name: String,
    steps: Vec<TestMethod>,
    categories: Vec<String>,
}

impl OrderedContext {
    pub(crate) fn new(name: String) -> Self {
        OrderedContext {
            name,
            steps: Vec::new(),
            categories: Vec::new(),
        }
    }

    /// Add a named step to the sequence.
    pub fn step<R: IntoTestReturn>(
        &mut self,
        name: &str,
        body: impl Fn(&mut TestContext) -> R + Send + Sync + 'static,
    ) {
        self.steps
            .push(TestMethod::new(name, Body::from_fn(body)).with_return_kind(R::return_kind()));
    }

    pub fn category(&mut self, category: &str) {
        self.categories.push(category.to_string());
    }

    pub(crate) fn register(self, b: &mut TreeBuilder) {
        b.push_suite(SuiteKind::Fixture, &self.name);
        b.current_suite_mut().maintain_order = true;
        for category in &self.categories {
            b.current_properties_mut().add(names::CATEGORY, category.as_str());
        }
        for (i, step) in self.steps.into_iter().enumerate() {
            let mut properties = PropertyBag::new();
            properties.set(names::ORDER, (i + 1).to_string());
            properties.set(names::PARALLEL_SCOPE, NON_PARALLELIZABLE);
            let name = step.signature.name.clone();
            b.add_leaf(&name, step, properties, RunState::Runnable, None);
        }
        b.pop_suite();
    }
}
