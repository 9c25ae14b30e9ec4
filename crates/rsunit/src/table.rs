//! Table-driven tests: one parameterized suite, one leaf per case.

use std::any::Any;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::context::with_builder;
use crate::method::{Body, IntoTestReturn, TestMethod};
use crate::properties::{names, PropertyBag};
use crate::test_context::TestContext;
use crate::tree::{RunState, SuiteKind};

struct Case {
    label: String,
    data: Box<dyn Any + Send + Sync>,
    arguments: Result<Vec<Value>, String>,
    expected: Option<Value>,
}

/// Builder for a parameterized method or theory.
///
/// Each case becomes a leaf named `method(label)` under a suite named after
/// the method. The case data is also serialized into the leaf's arguments,
/// which is what result reports and filters see.
///
/// ```rust,no_run
/// # fn main() { rsunit::run(|ctx| {
/// ctx.cases("add")
///     .case_expecting("small", (2i32, 3i32), 5)
///     .case_expecting("large", (100i32, 200i32), 300)
///     .run(|(a, b): &(i32, i32), _| serde_json::json!(a + b));
/// # }); }
/// ```
pub struct TableBuilder {
    name: String,
    kind: SuiteKind,
    cases: Vec<Case>,
    categories: Vec<String>,
}

impl TableBuilder {
    pub(crate) fn new(name: String, kind: SuiteKind) -> Self {
        TableBuilder {
            name,
            kind,
            cases: Vec::new(),
            categories: Vec::new(),
        }
    }

    /// Add a named case.
    pub fn case<T: Serialize + Send + Sync + 'static>(mut self, label: &str, data: T) -> Self {
        self.push(Some(label), data, None);
        self
    }

    /// Add a named case whose return value must equal `expected`.
    pub fn case_expecting<T: Serialize + Send + Sync + 'static>(
        mut self,
        label: &str,
        data: T,
        expected: impl Into<Value>,
    ) -> Self {
        self.push(Some(label), data, Some(expected.into()));
        self
    }

    /// Add a case labelled by its arguments, e.g. `add(2,3)`.
    pub fn case_unnamed<T: Serialize + Send + Sync + 'static>(mut self, data: T) -> Self {
        self.push(None, data, None);
        self
    }

    /// Add a case labelled by its arguments whose return value must equal `expected`.
    pub fn case_unnamed_expecting<T: Serialize + Send + Sync + 'static>(
        mut self,
        data: T,
        expected: impl Into<Value>,
    ) -> Self {
        self.push(None, data, Some(expected.into()));
        self
    }

    pub fn category(mut self, category: &str) -> Self {
        self.categories.push(category.to_string());
        self
    }

    fn push<T: Serialize + Send + Sync + 'static>(
        &mut self,
        label: Option<&str>,
        data: T,
        expected: Option<Value>,
    ) {
        let arguments = serde_json::to_value(&data)
            .map(|value| match value {
                Value::Array(items) => items,
                other => vec![other],
            })
            .map_err(|err| format!("Arguments could not be serialized: {err}"));
        let label = match (label, &arguments) {
            (Some(label), _) => label.to_string(),
            (None, Ok(args)) => args.iter().map(Value::to_string).collect::<Vec<_>>().join(","),
            (None, Err(_)) => format!("case_{}", self.cases.len() + 1),
        };
        self.cases.push(Case {
            label,
            data: Box::new(data),
            arguments,
            expected,
        });
    }

    /// Register every case. `test_fn` receives the case data and the test
    /// context; a non-unit return value is compared with the case's expected
    /// result.
    pub fn run<T, R>(self, test_fn: impl Fn(&T, &mut TestContext) -> R + Send + Sync + 'static)
    where
        T: Send + Sync + 'static,
        R: IntoTestReturn,
    {
        let test_fn = Arc::new(test_fn);
        let TableBuilder {
            name,
            kind,
            cases,
            categories,
        } = self;

        with_builder(|b| {
            b.push_suite(kind, &name);
            for category in &categories {
                b.current_properties_mut().add(names::CATEGORY, category.as_str());
            }

            for case in cases {
                let leaf_name = format!("{name}({})", case.label);
                let data: Arc<T> = match case.data.downcast::<T>() {
                    Ok(data) => Arc::from(data),
                    Err(_) => panic!("rsunit: table case type mismatch in case '{}'", case.label),
                };
                let test_fn = Arc::clone(&test_fn);
                let body = Body::from_fn(move |ctx: &mut TestContext| test_fn(&data, ctx));

                let (arguments, invalid) = match case.arguments {
                    Ok(arguments) => (arguments, None),
                    Err(reason) => (Vec::new(), Some(reason)),
                };
                let mut method = TestMethod::new(leaf_name.as_str(), body)
                    .with_arguments(arguments)
                    .with_return_kind(R::return_kind());
                if let Some(expected) = case.expected {
                    method = method.with_expected_result(expected);
                }
                let run_state = if invalid.is_some() {
                    RunState::NotRunnable
                } else {
                    RunState::Runnable
                };
                b.add_leaf(&leaf_name, method, PropertyBag::new(), run_state, invalid.as_deref());
            }
            b.pop_suite();
        });
    }
}
