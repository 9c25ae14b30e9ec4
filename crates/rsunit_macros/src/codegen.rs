//! Code generation: lowers the DSL AST onto `rsunit::Context` builder calls.

use proc_macro2::TokenStream;
use quote::quote;

use crate::dsl::*;

// ============================================================================
// Public entry points
// ============================================================================

/// A builder closure `|ctx: rsunit::Context| { ... }` for `rsunit::build`/`run`.
pub fn generate_fixtures(suite: Suite) -> TokenStream {
    let body = generate_items(&suite.items);
    quote! {
        |ctx: ::rsunit::Context| {
            let _ = ctx;
            #body
        }
    }
}

/// `fn main()` that builds and runs the tree.
pub fn generate_main(suite: Suite) -> TokenStream {
    let builder = generate_fixtures(suite);
    quote! {
        fn main() {
            ::rsunit::run(#builder)
        }
    }
}

// ============================================================================
// Items
// ============================================================================

fn generate_items(items: &[DslItem]) -> TokenStream {
    let mut output = TokenStream::new();
    for item in items {
        output.extend(match item {
            DslItem::Suite(block) => generate_suite(block),
            DslItem::Test(block) => generate_test(block),
            DslItem::Hook(block) => generate_hook(block),
            DslItem::Table(block) => generate_table(block),
            DslItem::Ordered(block) => generate_ordered(block),
            DslItem::Instance(block) => {
                let body = &block.body;
                quote! { ctx.fixture_instance(move || { #body }); }
            }
        });
    }
    output
}

/// Closure with the `&mut TestContext` parameter bound as `ctx`.
fn test_closure(body: TokenStream) -> TokenStream {
    quote! {
        |ctx: &mut ::rsunit::TestContext| {
            let _ = &ctx;
            #body
        }
    }
}

/// Wrap a value-returning body so the engine can compare it to an expected result.
fn value_body(body: &TokenStream) -> TokenStream {
    quote! { ::std::convert::Into::<::rsunit::Value>::into({ #body }) }
}

// ============================================================================
// namespace / fixture / setup_fixture
// ============================================================================

fn generate_suite(block: &SuiteBlock) -> TokenStream {
    let name = &block.name;
    let method = match block.keyword {
        SuiteKeyword::Namespace => quote! { namespace },
        SuiteKeyword::Fixture => quote! { fixture },
        SuiteKeyword::SetUpFixture => quote! { setup_fixture },
    };
    let attrs: Vec<TokenStream> = block.attrs.iter().map(suite_attr).collect();
    let items = generate_items(&block.items);
    quote! {
        ctx.#method(#name, |ctx: ::rsunit::Context| {
            let _ = ctx;
            #(#attrs)*
            #items
        });
    }
}

fn suite_attr(attr: &Decorator) -> TokenStream {
    match attr {
        Decorator::Category(names) => quote! { ctx.categories(&[#(#names),*]); },
        Decorator::Ignore(reason) => quote! { ctx.ignore(#reason); },
        Decorator::Skip(reason) => quote! { ctx.skip(#reason); },
        Decorator::Explicit => quote! { ctx.explicit("Explicit"); },
        Decorator::NonParallelizable => quote! { ctx.non_parallelizable(); },
        Decorator::InstancePerTestCase => quote! { ctx.instance_per_test_case(); },
        Decorator::MaintainOrder => quote! { ctx.maintain_order(); },
        // Rejected by the parser.
        _ => TokenStream::new(),
    }
}

// ============================================================================
// test
// ============================================================================

fn generate_test(block: &TestBlock) -> TokenStream {
    let name = &block.name;
    let expects_value = block
        .decorators
        .iter()
        .any(|d| matches!(d, Decorator::Expected(_)));
    let body = if expects_value {
        test_closure(value_body(&block.body))
    } else {
        test_closure(block.body.clone())
    };

    let chain: Vec<TokenStream> = block
        .decorators
        .iter()
        .map(|decorator| match decorator {
            Decorator::Category(names) => quote! { #(.category(#names))* },
            Decorator::Description(text) => quote! { .description(#text) },
            Decorator::Ignore(reason) => quote! { .ignore(#reason) },
            Decorator::Skip(reason) => quote! { .skip(#reason) },
            Decorator::Explicit => quote! { .explicit() },
            Decorator::Timeout(ms) => quote! { .timeout(#ms) },
            Decorator::Order(order) => quote! { .order(#order) },
            Decorator::Expected(expr) => quote! { .expected(#expr) },
            Decorator::Seed(seed) => quote! { .seed(#seed) },
            Decorator::NonParallelizable => quote! { .non_parallelizable() },
            Decorator::RequiresThread => quote! { .requires_thread() },
            // Rejected by the parser.
            Decorator::InstancePerTestCase | Decorator::MaintainOrder => TokenStream::new(),
        })
        .collect();

    quote! {
        ctx.test(#name, #body) #(#chain)*;
    }
}

// ============================================================================
// Hooks
// ============================================================================

fn generate_hook(block: &HookBlock) -> TokenStream {
    let method = match block.keyword {
        HookKeyword::OneTimeSetUp => quote! { one_time_setup },
        HookKeyword::OneTimeTearDown => quote! { one_time_teardown },
        HookKeyword::SetUp => quote! { setup },
        HookKeyword::TearDown => quote! { teardown },
    };
    let body = test_closure(block.body.clone());
    quote! { ctx.#method(#body); }
}

// ============================================================================
// cases / theory
// ============================================================================

fn generate_table(block: &TableBlock) -> TokenStream {
    let name = &block.name;
    let start = if block.theory {
        quote! { theory }
    } else {
        quote! { cases }
    };
    let param_types: Vec<_> = block.params.iter().map(|p| &p.ty).collect();
    let entry_type = quote! { (#(#param_types,)*) };

    let cases: Vec<TokenStream> = block
        .entries
        .iter()
        .map(|entry| {
            let values = &entry.values;
            let data = quote! { { let entry: #entry_type = (#values,); entry } };
            match (&entry.label, &entry.expected) {
                (Some(label), Some(expected)) => quote! { .case_expecting(#label, #data, #expected) },
                (Some(label), None) => quote! { .case(#label, #data) },
                (None, Some(expected)) => quote! { .case_unnamed_expecting(#data, #expected) },
                (None, None) => quote! { .case_unnamed(#data) },
            }
        })
        .collect();

    // Parameters are cloned out of the shared case data.
    let bindings: Vec<TokenStream> = block
        .params
        .iter()
        .enumerate()
        .map(|(i, param)| {
            let param_name = &param.name;
            let param_type = &param.ty;
            let idx = syn::Index::from(i);
            quote! {
                let #param_name: #param_type = ::std::clone::Clone::clone(&__rsunit_entry.#idx);
            }
        })
        .collect();

    let expects_value = block.entries.iter().any(|e| e.expected.is_some());
    let body = if expects_value {
        value_body(&block.body)
    } else {
        block.body.clone()
    };

    quote! {
        ctx.#start(#name)
            #(#cases)*
            .run(|__rsunit_entry: &#entry_type, ctx: &mut ::rsunit::TestContext| {
                let _ = &ctx;
                #(#bindings)*
                #body
            });
    }
}

// ============================================================================
// ordered
// ============================================================================

fn generate_ordered(block: &OrderedBlock) -> TokenStream {
    let name = &block.name;
    let steps: Vec<TokenStream> = block
        .steps
        .iter()
        .map(|(step_name, body)| {
            let body = test_closure(body.clone());
            quote! { oct.step(#step_name, #body); }
        })
        .collect();
    quote! {
        ctx.ordered(#name, |oct| {
            #(#steps)*
        });
    }
}
