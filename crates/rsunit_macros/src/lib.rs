//! Proc macros for the `rsunit` test framework.

mod codegen;
mod dsl;

/// Declare a test tree with a compact DSL.
///
/// Expands to a builder closure accepted by `rsunit::build` and `rsunit::run`.
/// Inside test, hook and step bodies, `ctx` is the `&mut rsunit::TestContext`
/// of the running test.
///
/// # Example
///
/// ```text
/// let (tree, root) = rsunit::build("demo", rsunit::fixtures! {
///     fixture "Calculator" category("math") {
///         one_time_setup { ctx.writeln("warming up"); }
///         setup { }
///
///         test "adds two numbers" { assert_eq!(2 + 3, 5); }
///         test "returns its sum" expected(5) { 2 + 3 }
///         test "slow" timeout(1000) ignore("flaky on CI") { }
///
///         cases "add" (a: i32, b: i32) [
///             "small" (1, 2) => 3,
///             (40, 2) => 42,
///         ] { a + b }
///
///         ordered "workflow" {
///             step "create" { }
///             step "delete" { }
///         }
///     }
/// });
/// ```
///
/// # Supported DSL keywords
///
/// ## Suites
/// - `namespace "name" { ... }`
/// - `fixture "name" { ... }`
/// - `setup_fixture "name" { ... }`: one-time hooks wrap everything inside it
///
/// Suite attributes go between the name and the brace: `category("a", "b")`,
/// `ignore("reason")`, `skip("reason")`, `explicit`, `non_parallelizable`,
/// `instance_per_test_case`, `maintain_order`.
///
/// ## Tests
/// - `test "name" [decorators] { body }`
///
/// Decorators: `category(..)`, `description("..")`, `ignore("..")`,
/// `skip("..")`, `explicit`, `timeout(ms)`, `order(n)`, `expected(expr)`,
/// `seed(n)`, `non_parallelizable`, `requires_thread`. With `expected`, the
/// body's value is compared against the expression.
///
/// ## Hooks
/// - `one_time_setup { ... }` / `one_time_teardown { ... }`: once per suite
/// - `setup { ... }` / `teardown { ... }`: around every test below the suite
///
/// ## Fixture object
/// - `instance { expr }`: tests read it with `ctx.fixture::<T>()`
///
/// ## Parameterized methods
/// ```text
/// cases "name" (a: i32, b: i32) [ "label" (1, 2) => 3, (4, 5) ] { body }
/// theory "name" (...) [ ... ] { body }
/// ```
///
/// ## Ordered steps
/// ```text
/// ordered "name" { step "a" { ... } step "b" { ... } }
/// ```
#[proc_macro]
pub fn fixtures(input: proc_macro::TokenStream) -> proc_macro::TokenStream {
    let suite = syn::parse_macro_input!(input as dsl::Suite);
    codegen::generate_fixtures(suite).into()
}

/// Like [`fixtures!`], but generates `fn main()` that builds and runs the tree.
///
/// Use it in a test target with `harness = false`.
///
/// # Setup
///
/// In `Cargo.toml`:
/// ```toml
/// [[test]]
/// name = "my_tests"
/// harness = false
/// ```
///
/// In your test file:
/// ```text
/// rsunit::main! {
///     fixture "Calculator" {
///         test "adds" { assert_eq!(2 + 3, 5); }
///     }
/// }
/// ```
///
/// Run with:
/// ```sh
/// cargo test --test my_tests -- --labels:All
/// ```
#[proc_macro]
pub fn main(input: proc_macro::TokenStream) -> proc_macro::TokenStream {
    let suite = syn::parse_macro_input!(input as dsl::Suite);
    codegen::generate_main(suite).into()
}
