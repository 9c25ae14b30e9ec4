//! DSL AST types and `syn::parse::Parse` implementations.

use proc_macro2::TokenStream;
use syn::parse::{Parse, ParseStream};
use syn::{braced, bracketed, parenthesized, Expr, Ident, LitInt, LitStr, Result, Token, Type};

// ============================================================================
// AST types
// ============================================================================

/// Top-level item list.
#[derive(Debug)]
pub struct Suite {
    pub items: Vec<DslItem>,
}

#[derive(Debug)]
pub enum DslItem {
    Suite(SuiteBlock),
    Test(TestBlock),
    Hook(HookBlock),
    Table(TableBlock),
    Ordered(OrderedBlock),
    Instance(InstanceBlock),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuiteKeyword {
    Namespace,
    Fixture,
    SetUpFixture,
}

/// `fixture "name" [attrs] { ... }` and friends.
#[derive(Debug)]
pub struct SuiteBlock {
    pub keyword: SuiteKeyword,
    pub name: LitStr,
    pub attrs: Vec<Decorator>,
    pub items: Vec<DslItem>,
}

/// `test "name" [decorators] { body }`
#[derive(Debug)]
pub struct TestBlock {
    pub name: LitStr,
    pub decorators: Vec<Decorator>,
    pub body: TokenStream,
}

#[derive(Debug)]
pub enum Decorator {
    Category(Vec<LitStr>),
    Description(LitStr),
    Ignore(LitStr),
    Skip(LitStr),
    Explicit,
    Timeout(u64),
    Order(i64),
    Expected(Expr),
    Seed(u64),
    NonParallelizable,
    RequiresThread,
    InstancePerTestCase,
    MaintainOrder,
}

impl Decorator {
    pub fn name(&self) -> &'static str {
        match self {
            Decorator::Category(_) => "category",
            Decorator::Description(_) => "description",
            Decorator::Ignore(_) => "ignore",
            Decorator::Skip(_) => "skip",
            Decorator::Explicit => "explicit",
            Decorator::Timeout(_) => "timeout",
            Decorator::Order(_) => "order",
            Decorator::Expected(_) => "expected",
            Decorator::Seed(_) => "seed",
            Decorator::NonParallelizable => "non_parallelizable",
            Decorator::RequiresThread => "requires_thread",
            Decorator::InstancePerTestCase => "instance_per_test_case",
            Decorator::MaintainOrder => "maintain_order",
        }
    }

    /// Decorators that only make sense on a test.
    pub fn is_test_only(&self) -> bool {
        matches!(
            self,
            Decorator::Description(_)
                | Decorator::Timeout(_)
                | Decorator::Order(_)
                | Decorator::Expected(_)
                | Decorator::Seed(_)
                | Decorator::RequiresThread
        )
    }

    /// Decorators that only make sense on a suite.
    pub fn is_suite_only(&self) -> bool {
        matches!(self, Decorator::InstancePerTestCase | Decorator::MaintainOrder)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKeyword {
    OneTimeSetUp,
    OneTimeTearDown,
    SetUp,
    TearDown,
}

/// `setup { ... }`, `teardown { ... }`, `one_time_setup { ... }`, `one_time_teardown { ... }`
#[derive(Debug)]
pub struct HookBlock {
    pub keyword: HookKeyword,
    pub body: TokenStream,
}

/// `cases "name" (a: Type, ...) [ "label" (v, ...) => expected, ... ] { body }`
///
/// `theory` has the same shape.
#[derive(Debug)]
pub struct TableBlock {
    pub theory: bool,
    pub name: LitStr,
    pub params: Vec<TableParam>,
    pub entries: Vec<TableEntry>,
    pub body: TokenStream,
}

#[derive(Debug)]
pub struct TableParam {
    pub name: Ident,
    pub ty: Type,
}

#[derive(Debug)]
pub struct TableEntry {
    pub label: Option<LitStr>,
    pub values: TokenStream,
    pub expected: Option<Expr>,
}

/// `ordered "name" { step "a" { ... } step "b" { ... } }`
#[derive(Debug)]
pub struct OrderedBlock {
    pub name: LitStr,
    pub steps: Vec<(LitStr, TokenStream)>,
}

/// `instance { expr }`: the fixture object for the enclosing suite.
#[derive(Debug)]
pub struct InstanceBlock {
    pub body: TokenStream,
}

// ============================================================================
// Parsing
// ============================================================================

impl Parse for Suite {
    fn parse(input: ParseStream) -> Result<Self> {
        let items = parse_items(input)?;
        Ok(Suite { items })
    }
}

fn parse_items(input: ParseStream) -> Result<Vec<DslItem>> {
    let mut items = Vec::new();
    while !input.is_empty() {
        items.push(input.parse::<DslItem>()?);
    }
    Ok(items)
}

impl Parse for DslItem {
    fn parse(input: ParseStream) -> Result<Self> {
        let ident: Ident = input.parse()?;
        let name = ident.to_string();

        match name.as_str() {
            "namespace" => Ok(DslItem::Suite(parse_suite_block(input, SuiteKeyword::Namespace)?)),
            "fixture" => Ok(DslItem::Suite(parse_suite_block(input, SuiteKeyword::Fixture)?)),
            "setup_fixture" => Ok(DslItem::Suite(parse_suite_block(
                input,
                SuiteKeyword::SetUpFixture,
            )?)),

            "test" => Ok(DslItem::Test(parse_test_block(input)?)),

            "one_time_setup" => Ok(DslItem::Hook(parse_hook_block(input, HookKeyword::OneTimeSetUp)?)),
            "one_time_teardown" => Ok(DslItem::Hook(parse_hook_block(
                input,
                HookKeyword::OneTimeTearDown,
            )?)),
            "setup" => Ok(DslItem::Hook(parse_hook_block(input, HookKeyword::SetUp)?)),
            "teardown" => Ok(DslItem::Hook(parse_hook_block(input, HookKeyword::TearDown)?)),

            "cases" => Ok(DslItem::Table(parse_table(input, false)?)),
            "theory" => Ok(DslItem::Table(parse_table(input, true)?)),

            "ordered" => Ok(DslItem::Ordered(parse_ordered_block(input)?)),

            "instance" => {
                let content;
                braced!(content in input);
                Ok(DslItem::Instance(InstanceBlock {
                    body: content.parse()?,
                }))
            }

            _ => Err(syn::Error::new(
                ident.span(),
                format!(
                    "unknown DSL keyword `{name}`. Expected one of: \
                     namespace, fixture, setup_fixture, test, one_time_setup, \
                     one_time_teardown, setup, teardown, cases, theory, ordered, instance"
                ),
            )),
        }
    }
}

// ============================================================================
// Block parsers
// ============================================================================

/// Parse: `"name" [attrs] { items... }`
fn parse_suite_block(input: ParseStream, keyword: SuiteKeyword) -> Result<SuiteBlock> {
    let name: LitStr = input.parse()?;
    let attrs = parse_decorators(input)?;
    if let Some(bad) = attrs.iter().find(|d| d.is_test_only()) {
        return Err(syn::Error::new(
            name.span(),
            format!("decorator `{}` is only valid on a test", bad.name()),
        ));
    }
    let content;
    braced!(content in input);
    let items = parse_items(&content)?;
    Ok(SuiteBlock {
        keyword,
        name,
        attrs,
        items,
    })
}

/// Parse: `"name" [decorators] { body }`
fn parse_test_block(input: ParseStream) -> Result<TestBlock> {
    let name: LitStr = input.parse()?;
    let decorators = parse_decorators(input)?;
    if let Some(bad) = decorators.iter().find(|d| d.is_suite_only()) {
        return Err(syn::Error::new(
            name.span(),
            format!("decorator `{}` is only valid on a fixture", bad.name()),
        ));
    }
    let body_content;
    braced!(body_content in input);
    let body: TokenStream = body_content.parse()?;
    Ok(TestBlock {
        name,
        decorators,
        body,
    })
}

/// Parse decorators up to the opening brace of the body.
fn parse_decorators(input: ParseStream) -> Result<Vec<Decorator>> {
    let mut decorators = Vec::new();
    while !input.peek(syn::token::Brace) {
        let decorator: Ident = input.parse()?;
        let parsed = match decorator.to_string().as_str() {
            "category" => {
                let content;
                parenthesized!(content in input);
                let mut names = Vec::new();
                while !content.is_empty() {
                    names.push(content.parse::<LitStr>()?);
                    if !content.is_empty() {
                        content.parse::<Token![,]>()?;
                    }
                }
                Decorator::Category(names)
            }
            "description" => Decorator::Description(parse_paren(input)?),
            "ignore" => Decorator::Ignore(parse_paren(input)?),
            "skip" => Decorator::Skip(parse_paren(input)?),
            "explicit" => Decorator::Explicit,
            "timeout" => Decorator::Timeout(parse_paren::<LitInt>(input)?.base10_parse()?),
            "order" => Decorator::Order(parse_paren::<LitInt>(input)?.base10_parse()?),
            "seed" => Decorator::Seed(parse_paren::<LitInt>(input)?.base10_parse()?),
            "expected" => Decorator::Expected(parse_paren(input)?),
            "non_parallelizable" => Decorator::NonParallelizable,
            "requires_thread" => Decorator::RequiresThread,
            "instance_per_test_case" => Decorator::InstancePerTestCase,
            "maintain_order" => Decorator::MaintainOrder,
            other => {
                return Err(syn::Error::new(
                    decorator.span(),
                    format!(
                        "unknown decorator `{other}`. Expected `category`, `description`, \
                         `ignore`, `skip`, `explicit`, `timeout`, `order`, `seed`, `expected`, \
                         `non_parallelizable`, `requires_thread`, `instance_per_test_case` \
                         or `maintain_order`"
                    ),
                ));
            }
        };
        decorators.push(parsed);
    }
    Ok(decorators)
}

fn parse_paren<T: Parse>(input: ParseStream) -> Result<T> {
    let content;
    parenthesized!(content in input);
    content.parse()
}

/// Parse: `{ body }`
fn parse_hook_block(input: ParseStream, keyword: HookKeyword) -> Result<HookBlock> {
    let content;
    braced!(content in input);
    let body: TokenStream = content.parse()?;
    Ok(HookBlock { keyword, body })
}

/// Parse: `"name" (param: Type, ...) [ ["label"] (val, ...) [=> expected], ... ] { body }`
fn parse_table(input: ParseStream, theory: bool) -> Result<TableBlock> {
    let name: LitStr = input.parse()?;

    let params_content;
    parenthesized!(params_content in input);
    let mut params = Vec::new();
    while !params_content.is_empty() {
        let param_name: Ident = params_content.parse()?;
        params_content.parse::<Token![:]>()?;
        let param_type: Type = params_content.parse()?;
        params.push(TableParam {
            name: param_name,
            ty: param_type,
        });
        if !params_content.is_empty() {
            params_content.parse::<Token![,]>()?;
        }
    }

    let entries_content;
    bracketed!(entries_content in input);
    let mut entries = Vec::new();
    while !entries_content.is_empty() {
        let label = if entries_content.peek(LitStr) {
            Some(entries_content.parse::<LitStr>()?)
        } else {
            None
        };
        let values_content;
        parenthesized!(values_content in entries_content);
        let values: TokenStream = values_content.parse()?;
        let expected = if entries_content.peek(Token![=>]) {
            entries_content.parse::<Token![=>]>()?;
            Some(entries_content.parse::<Expr>()?)
        } else {
            None
        };
        entries.push(TableEntry {
            label,
            values,
            expected,
        });
        if !entries_content.is_empty() {
            entries_content.parse::<Token![,]>()?;
        }
    }

    let body_content;
    braced!(body_content in input);
    let body: TokenStream = body_content.parse()?;

    Ok(TableBlock {
        theory,
        name,
        params,
        entries,
        body,
    })
}

/// Parse: `"name" { step "a" { ... } ... }`
fn parse_ordered_block(input: ParseStream) -> Result<OrderedBlock> {
    let name: LitStr = input.parse()?;
    let content;
    braced!(content in input);
    let mut steps = Vec::new();
    while !content.is_empty() {
        let keyword: Ident = content.parse()?;
        if keyword != "step" {
            return Err(syn::Error::new(
                keyword.span(),
                "only `step \"name\" { ... }` is allowed inside `ordered`",
            ));
        }
        let step_name: LitStr = content.parse()?;
        let body_content;
        braced!(body_content in content);
        steps.push((step_name, body_content.parse()?));
    }
    Ok(OrderedBlock { name, steps })
}
