//! Test method payloads, hook bodies and method signature metadata.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::BoxError;
use crate::test_context::TestContext;

/// What a test body or hook hands back to the engine.
///
/// `Value::Null` stands for "no value" (a unit-returning body).
pub type TestReturn = Result<Value, BoxError>;

/// A fixture instance shared between the leaves of a fixture suite.
pub type Fixture = Arc<dyn Any + Send + Sync>;

/// Creates fixture instances.
pub type FixtureFactory = Arc<dyn Fn() -> Result<Fixture, BoxError> + Send + Sync>;

type SyncFn = dyn Fn(&mut TestContext) -> TestReturn + Send + Sync;
type AsyncFn = dyn Fn(TestContext) -> BoxFuture<'static, TestReturn> + Send + Sync;

/// Executable code of a test method or hook.
#[derive(Clone)]
pub enum Body {
    Sync(Arc<SyncFn>),
    Async(Arc<AsyncFn>),
}

impl Body {
    pub fn from_fn<F, R>(f: F) -> Self
    where
        F: Fn(&mut TestContext) -> R + Send + Sync + 'static,
        R: IntoTestReturn,
    {
        Body::Sync(Arc::new(move |ctx: &mut TestContext| f(ctx).into_test_return()))
    }

    pub fn from_async<F, Fut, R>(f: F) -> Self
    where
        F: Fn(TestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: IntoTestReturn,
    {
        Body::Async(Arc::new(move |ctx: TestContext| {
            let fut = f(ctx);
            Box::pin(async move { fut.await.into_test_return() })
        }))
    }

    pub fn is_async(&self) -> bool {
        matches!(self, Body::Async(_))
    }

    /// Run the body to completion on the current thread.
    ///
    /// Async bodies are driven with a local executor, so both shapes look
    /// like a blocking call to the caller.
    pub(crate) fn invoke(&self, ctx: &mut TestContext) -> TestReturn {
        match self {
            Body::Sync(f) => f(ctx),
            Body::Async(f) => futures::executor::block_on(f(ctx.clone())),
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Sync(_) => f.write_str("Body::Sync"),
            Body::Async(_) => f.write_str("Body::Async"),
        }
    }
}

/// Conversion from whatever a body returns into a [`TestReturn`].
pub trait IntoTestReturn {
    fn into_test_return(self) -> TestReturn;

    /// Signature shape used for validation.
    fn return_kind() -> ReturnKind;
}

impl IntoTestReturn for () {
    fn into_test_return(self) -> TestReturn {
        Ok(Value::Null)
    }

    fn return_kind() -> ReturnKind {
        ReturnKind::Void
    }
}

impl<E: Into<BoxError>> IntoTestReturn for Result<(), E> {
    fn into_test_return(self) -> TestReturn {
        self.map(|()| Value::Null).map_err(Into::into)
    }

    fn return_kind() -> ReturnKind {
        ReturnKind::Void
    }
}

impl IntoTestReturn for Value {
    fn into_test_return(self) -> TestReturn {
        Ok(self)
    }

    fn return_kind() -> ReturnKind {
        ReturnKind::Value("Value".to_string())
    }
}

impl<E: Into<BoxError>> IntoTestReturn for Result<Value, E> {
    fn into_test_return(self) -> TestReturn {
        self.map_err(Into::into)
    }

    fn return_kind() -> ReturnKind {
        ReturnKind::Value("Value".to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Visibility {
    Public,
    Protected,
    Internal,
    Private,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReturnKind {
    Void,
    /// An awaitable that yields nothing.
    Awaitable,
    /// Any other return type, by name.
    Value(String),
}

/// Declaration metadata for a test method or hook, as reported by discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodSignature {
    pub name: String,
    pub visibility: Visibility,
    pub is_abstract: bool,
    pub parameter_count: usize,
    pub return_kind: ReturnKind,
}

impl MethodSignature {
    /// A public, concrete, parameterless signature.
    pub fn new(name: impl Into<String>, return_kind: ReturnKind) -> Self {
        MethodSignature {
            name: name.into(),
            visibility: Visibility::Public,
            is_abstract: false,
            parameter_count: 0,
            return_kind,
        }
    }

    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn with_parameters(mut self, count: usize) -> Self {
        self.parameter_count = count;
        self
    }

    pub fn with_abstract(mut self, is_abstract: bool) -> Self {
        self.is_abstract = is_abstract;
        self
    }

    /// Whether this signature is acceptable for a setup or teardown hook.
    pub fn is_valid_hook(&self) -> bool {
        !self.is_abstract
            && matches!(self.visibility, Visibility::Public | Visibility::Protected)
            && self.parameter_count == 0
            && matches!(self.return_kind, ReturnKind::Void | ReturnKind::Awaitable)
    }

    pub fn returns_value(&self) -> bool {
        matches!(self.return_kind, ReturnKind::Value(_))
    }
}

/// A setup or teardown method.
#[derive(Debug, Clone)]
pub struct Hook {
    pub signature: MethodSignature,
    pub body: Body,
}

impl Hook {
    pub fn new(name: impl Into<String>, body: Body) -> Self {
        let return_kind = if body.is_async() {
            ReturnKind::Awaitable
        } else {
            ReturnKind::Void
        };
        Hook {
            signature: MethodSignature::new(name, return_kind),
            body,
        }
    }

    pub fn with_signature(signature: MethodSignature, body: Body) -> Self {
        Hook { signature, body }
    }

    pub fn name(&self) -> &str {
        &self.signature.name
    }
}

/// Leaf payload: everything needed to invoke one test case.
#[derive(Debug, Clone)]
pub struct TestMethod {
    pub body: Body,
    pub signature: MethodSignature,
    pub arguments: Vec<Value>,
    pub expected_result: Option<Value>,
    pub seed: u64,
}

impl TestMethod {
    pub fn new(name: impl Into<String>, body: Body) -> Self {
        let return_kind = if body.is_async() {
            ReturnKind::Awaitable
        } else {
            ReturnKind::Void
        };
        TestMethod {
            body,
            signature: MethodSignature::new(name, return_kind),
            arguments: Vec::new(),
            expected_result: None,
            seed: 0,
        }
    }

    pub fn with_arguments(mut self, arguments: Vec<Value>) -> Self {
        self.signature.parameter_count = arguments.len();
        self.arguments = arguments;
        self
    }

    /// Attach an expected result. The signature must return a value for the
    /// method to stay runnable.
    pub fn with_expected_result(mut self, expected: Value) -> Self {
        self.expected_result = Some(expected);
        self
    }

    pub fn with_return_kind(mut self, return_kind: ReturnKind) -> Self {
        self.signature.return_kind = return_kind;
        self
    }

    pub fn with_signature(mut self, signature: MethodSignature) -> Self {
        self.signature = signature;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn has_expected_result(&self) -> bool {
        self.expected_result.is_some()
    }
}
