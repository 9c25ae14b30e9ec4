//! Construction-time checks that mark malformed nodes NotRunnable.
//!
//! Runs once over a finished tree. Invalid nodes still produce a result; they
//! just never execute.

use crate::error::Result;
use crate::tree::{NodeIndex, NodeKind, RunState, SuiteKind, TestTree};

pub const NO_ARGUMENTS: &str = "No arguments were provided";
pub const NO_FIXTURE_ARGUMENTS: &str = "No fixture arguments were provided";
pub const SETUP_FIXTURE_PER_TEST_HOOKS: &str =
    "SetUpFixture cannot have SetUp or TearDown methods";
pub const NON_VOID_WITHOUT_RESULT: &str =
    "Method has non-void return value, but no result is expected";
pub const VOID_WITH_RESULT: &str = "Method returning void cannot have an expected result";
pub const WRONG_ARGUMENT_COUNT: &str = "Wrong number of arguments provided";

/// Validate `root` and everything below it.
pub fn validate(tree: &mut TestTree, root: NodeIndex) -> Result<()> {
    let mut stack = vec![root];
    while let Some(index) = stack.pop() {
        let node = tree.node(index)?;
        if node.run_state == RunState::NotRunnable {
            stack.extend(tree.children(index).iter().copied());
            continue;
        }
        let reason = match &node.kind {
            NodeKind::Suite(_) => suite_problem(tree, index),
            NodeKind::Method(_) => method_problem(tree, index),
        };
        if let Some(reason) = reason {
            tree.make_invalid(index, &reason)?;
        }
        stack.extend(tree.children(index).iter().copied());
    }
    Ok(())
}

/// Reason a hook list makes its suite invalid, if any.
pub fn check_setup_teardown_methods(tree: &TestTree, suite: NodeIndex) -> Option<String> {
    tree.hooks(suite)
        .into_iter()
        .find(|hook| !hook.signature.is_valid_hook())
        .map(|hook| format!("Invalid signature for SetUp or TearDown method: {}", hook.name()))
}

fn suite_problem(tree: &TestTree, index: NodeIndex) -> Option<String> {
    if let Some(reason) = check_setup_teardown_methods(tree, index) {
        return Some(reason);
    }
    let suite = tree.suite(index).ok()?;
    match suite.kind {
        SuiteKind::SetUpFixture if suite.has_per_test_hooks() => {
            Some(SETUP_FIXTURE_PER_TEST_HOOKS.to_string())
        }
        SuiteKind::ParameterizedMethod | SuiteKind::Theory if suite.children.is_empty() => {
            Some(NO_ARGUMENTS.to_string())
        }
        SuiteKind::ParameterizedFixture | SuiteKind::GenericFixture if suite.children.is_empty() => {
            Some(NO_FIXTURE_ARGUMENTS.to_string())
        }
        _ => None,
    }
}

fn method_problem(tree: &TestTree, index: NodeIndex) -> Option<String> {
    let method = tree.node(index).ok()?.method()?;
    let signature = &method.signature;
    if signature.returns_value() && !method.has_expected_result() {
        return Some(NON_VOID_WITHOUT_RESULT.to_string());
    }
    if !signature.returns_value() && method.has_expected_result() {
        return Some(VOID_WITH_RESULT.to_string());
    }
    if signature.parameter_count != method.arguments.len() {
        return Some(WRONG_ARGUMENT_COUNT.to_string());
    }
    None
}
