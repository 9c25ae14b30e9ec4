use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use pretty_assertions::assert_eq;
use rand::Rng;
use serde_json::json;

use rsunit::{
    BoxError, EmptyFilter, Executor, MethodSignature, ReturnKind, RunSettings, RunState,
    TestResult, TestStatus, TestTree, Visibility,
};

fn run(tree: TestTree, root: rsunit::NodeIndex) -> TestResult {
    Executor::new(RunSettings::new().with_seed(7))
        .execute(&Arc::new(tree), root, Arc::new(EmptyFilter))
        .unwrap()
}

// =================================================================
// Fixtures
// =================================================================

#[derive(Default)]
struct Counter(AtomicUsize);

#[test]
fn test_single_instance_fixture_is_shared() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = Arc::clone(&seen);
    let (tree, root) = rsunit::build("api", move |ctx| {
        ctx.fixture("Shared", |ctx| {
            ctx.fixture_instance(Counter::default);
            for name in ["a", "b", "c"] {
                let s = Arc::clone(&s);
                ctx.test(name, move |ctx| {
                    let counter = ctx.fixture::<Counter>().unwrap();
                    s.lock().unwrap().push(counter.0.fetch_add(1, Ordering::SeqCst));
                });
            }
        });
    });

    let result = run(tree, root);
    assert_eq!(result.status(), TestStatus::Passed);
    assert_eq!(*seen.lock().unwrap(), [0, 1, 2]);
}

#[test]
fn test_instance_per_test_case_builds_fresh_fixtures() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = Arc::clone(&seen);
    let (tree, root) = rsunit::build("api", move |ctx| {
        ctx.fixture("Fresh", |ctx| {
            ctx.fixture_instance(Counter::default);
            ctx.instance_per_test_case();
            for name in ["a", "b"] {
                let s = Arc::clone(&s);
                ctx.test(name, move |ctx| {
                    let counter = ctx.fixture::<Counter>().unwrap();
                    s.lock().unwrap().push(counter.0.fetch_add(1, Ordering::SeqCst));
                });
            }
        });
    });

    run(tree, root);
    assert_eq!(*seen.lock().unwrap(), [0, 0]);
}

#[test]
fn test_failing_fixture_factory_is_a_setup_error() {
    let (tree, root) = rsunit::build("api", |ctx| {
        ctx.fixture("Broken", |ctx| {
            ctx.fixture_factory(|| -> Result<Counter, BoxError> { Err("no database".into()) });
            ctx.test("a", |_| ());
        });
    });

    let result = run(tree, root);
    let suite = result.find("Broken").unwrap();
    assert_eq!(suite.status(), TestStatus::Failed);
    assert_eq!(suite.message.as_deref(), Some("no database"));
    assert_eq!(suite.skip_count(), 1);
}

#[test]
fn test_parameterized_fixture_instances_see_their_arguments() {
    let (tree, root) = rsunit::build("api", |ctx| {
        ctx.parameterized_fixture("Conn", |ctx| {
            for port in [80, 443] {
                ctx.fixture_with_args(&format!("Conn({port})"), vec![json!(port)], |ctx| {
                    ctx.one_time_setup(|ctx| ctx.writeln(&ctx.arguments()[0].to_string()));
                    ctx.test("opens", |_| ());
                });
            }
        });
        ctx.generic_fixture("Empty", |_| {});
    });

    let result = run(tree, root);
    assert_eq!(result.find("Conn.Conn(80)").unwrap().output, "80\n");
    assert_eq!(result.find("Conn.Conn(443)").unwrap().output, "443\n");
    assert_eq!(result.find("Conn").unwrap().pass_count(), 2);

    let empty = result.find("Empty").unwrap();
    assert_eq!(empty.state.label, "Invalid");
    assert_eq!(empty.message.as_deref(), Some("No fixture arguments were provided"));
}

// =================================================================
// Hooks
// =================================================================

#[test]
fn test_hooks_run_around_each_test_in_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let l = Arc::clone(&log);
    let (tree, root) = rsunit::build("api", move |ctx| {
        let push = |l: &Arc<Mutex<Vec<String>>>, entry: &'static str| {
            let l = Arc::clone(l);
            move |_: &mut rsunit::TestContext| l.lock().unwrap().push(entry.to_string())
        };
        ctx.setup_fixture("Env", |ctx| {
            ctx.one_time_setup(push(&l, "env:start"));
            ctx.one_time_teardown(push(&l, "env:stop"));
            ctx.fixture("Outer", |ctx| {
                ctx.setup(push(&l, "outer:setup"));
                ctx.teardown(push(&l, "outer:teardown"));
                ctx.fixture("Inner", |ctx| {
                    ctx.setup(push(&l, "inner:setup"));
                    ctx.teardown(push(&l, "inner:teardown"));
                    ctx.test("t", push(&l, "test"));
                });
            });
        });
    });

    let result = run(tree, root);
    assert_eq!(result.status(), TestStatus::Passed);
    assert_eq!(
        *log.lock().unwrap(),
        [
            "env:start",
            "outer:setup",
            "inner:setup",
            "test",
            "inner:teardown",
            "outer:teardown",
            "env:stop",
        ]
    );
}

#[test]
fn test_invalid_hook_signature_makes_suite_not_runnable() {
    let (tree, root) = rsunit::build("api", |ctx| {
        ctx.fixture("Bad", |ctx| {
            ctx.hook(
                rsunit::HookKind::SetUp,
                MethodSignature::new("Prepare", ReturnKind::Void).with_visibility(Visibility::Private),
                rsunit::Body::from_fn(|_| ()),
            );
            ctx.test("a", |_| ());
        });
    });

    let bad = tree.find("Bad").unwrap();
    assert_eq!(tree.node(bad).unwrap().run_state, RunState::NotRunnable);

    let result = run(tree, root);
    let suite = result.find("Bad").unwrap();
    assert_eq!(suite.state.label, "Invalid");
    assert_eq!(
        suite.message.as_deref(),
        Some("Invalid signature for SetUp or TearDown method: Prepare")
    );
    assert_eq!(suite.children.len(), 1);
}

// =================================================================
// Results reported by the body
// =================================================================

#[test]
fn test_context_signals_and_output() {
    let (tree, root) = rsunit::build("api", |ctx| {
        ctx.fixture("Signals", |ctx| {
            ctx.test("ignored", |ctx| -> Result<(), BoxError> { ctx.ignore("not today") });
            ctx.test("passes early", |ctx| -> Result<(), BoxError> { ctx.pass("done") });
            ctx.test("talks", |ctx| {
                ctx.writeln("hello");
                ctx.increment_assert_count();
                ctx.increment_assert_count();
            });
        });
    });

    let result = run(tree, root);
    let ignored = result.find("Signals.ignored").unwrap();
    assert!(ignored.state.is_ignored());
    assert_eq!(ignored.message.as_deref(), Some("not today"));

    let early = result.find("Signals.passes early").unwrap();
    assert_eq!(early.status(), TestStatus::Passed);
    assert_eq!(early.message.as_deref(), Some("done"));

    let talks = result.find("Signals.talks").unwrap();
    assert_eq!(talks.output, "hello\n");
    assert_eq!(talks.assert_count, 2);
    assert_eq!(result.find("Signals").unwrap().assert_count, 2);
}

#[test]
fn test_expected_result_is_compared() {
    let (tree, root) = rsunit::build("api", |ctx| {
        ctx.fixture("Values", |ctx| {
            ctx.test("right", |_| json!(4)).expected(4);
            ctx.test("wrong", |_| json!(5)).expected(4);
            ctx.test("unchecked", |_| json!(5));
        });
    });

    let result = run(tree, root);
    assert_eq!(result.find("Values.right").unwrap().status(), TestStatus::Passed);
    assert_eq!(
        result.find("Values.wrong").unwrap().message.as_deref(),
        Some("  Expected: 4\n  But was:  5")
    );
    let unchecked = result.find("Values.unchecked").unwrap();
    assert_eq!(unchecked.state.label, "Invalid");
}

#[test]
fn test_async_tests_are_driven_to_completion() {
    let (tree, root) = rsunit::build("api", |ctx| {
        ctx.fixture("Async", |ctx| {
            ctx.async_test("awaits", |ctx| async move {
                let value = futures::future::ready(21).await;
                ctx.writeln(&format!("{}", value * 2));
            });
        });
    });

    let result = run(tree, root);
    let leaf = result.find("Async.awaits").unwrap();
    assert_eq!(leaf.status(), TestStatus::Passed);
    assert_eq!(leaf.output, "42\n");
}

#[test]
fn test_random_is_reproducible_for_a_seed() {
    let draws = Arc::new(Mutex::new(Vec::new()));
    let build = |draws: Arc<Mutex<Vec<u64>>>| {
        rsunit::build("api", move |ctx| {
            ctx.fixture("Random", |ctx| {
                ctx.test("draw", move |ctx| {
                    let n: u64 = ctx.random().gen();
                    draws.lock().unwrap().push(n);
                });
            });
        })
    };

    let (tree, root) = build(Arc::clone(&draws));
    run(tree, root);
    let (tree, root) = build(Arc::clone(&draws));
    run(tree, root);

    let draws = draws.lock().unwrap();
    assert_eq!(draws.len(), 2);
    assert_eq!(draws[0], draws[1]);
}

// =================================================================
// Tables and ordered steps
// =================================================================

#[test]
fn test_table_cases_become_leaves() {
    let (tree, root) = rsunit::build("api", |ctx| {
        ctx.fixture("Calc", |ctx| {
            ctx.cases("Sum")
                .case_expecting("small", (1i64, 2i64), 3)
                .case_unnamed_expecting((40i64, 2i64), 42)
                .case_expecting("wrong", (1i64, 1i64), 3)
                .run(|(a, b): &(i64, i64), _| json!(a + b));
        });
    });

    let sum = tree.find("Calc.Sum").unwrap();
    let names: Vec<&str> = tree
        .children(sum)
        .iter()
        .map(|c| tree.node(*c).unwrap().full_name.as_str())
        .collect();
    assert_eq!(names, ["Calc.Sum(small)", "Calc.Sum(40,2)", "Calc.Sum(wrong)"]);

    let result = run(tree, root);
    let sum = result.find("Calc.Sum").unwrap();
    assert_eq!(sum.pass_count(), 2);
    assert_eq!(sum.fail_count(), 1);
}

#[test]
fn test_empty_table_is_not_runnable() {
    let (tree, root) = rsunit::build("api", |ctx| {
        ctx.fixture("Calc", |ctx| {
            ctx.theory("Nothing").run(|_: &(i32,), _| ());
        });
    });

    let result = run(tree, root);
    let theory = result.find("Calc.Nothing").unwrap();
    assert_eq!(theory.state.label, "Invalid");
    assert_eq!(theory.message.as_deref(), Some("No arguments were provided"));
}

#[test]
fn test_ordered_steps_run_in_sequence() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let l = Arc::clone(&log);
    let (tree, root) = rsunit::build("api", move |ctx| {
        ctx.ordered("Workflow", |oct| {
            for step in ["create", "verify", "delete"] {
                let l = Arc::clone(&l);
                oct.step(step, move |_| l.lock().unwrap().push(step));
            }
        });
    });

    let result = Executor::new(RunSettings::new().with_workers(4))
        .execute(&Arc::new(tree), root, Arc::new(EmptyFilter))
        .unwrap();
    assert_eq!(result.find("Workflow").unwrap().pass_count(), 3);
    assert_eq!(*log.lock().unwrap(), ["create", "verify", "delete"]);
}

// =================================================================
// Macro DSL
// =================================================================

static DSL_TEARDOWNS: AtomicUsize = AtomicUsize::new(0);

#[test]
fn test_fixtures_macro_builds_a_runnable_tree() {
    let (tree, root) = rsunit::build(
        "dsl",
        rsunit::fixtures! {
            fixture "Calculator" category("math") {
                teardown { DSL_TEARDOWNS.fetch_add(1, Ordering::SeqCst); }

                test "adds" { assert_eq!(2 + 3, 5); }
                test "sums" expected(5) { 2 + 3 }
                test "later" ignore("not yet") { }

                cases "Mul" (a: i64, b: i64) [
                    "small" (2, 3) => 6,
                    (4, 5) => 20,
                ] { a * b }

                ordered "Flow" {
                    step "one" { ctx.writeln("1"); }
                    step "two" { }
                }
            }
        },
    );

    let calculator = tree.find("Calculator").unwrap();
    assert!(tree
        .node(calculator)
        .unwrap()
        .properties
        .contains("Category", "math"));

    let result = run(tree, root);
    let calculator = result.find("Calculator").unwrap();
    assert_eq!(calculator.total(), 7);
    assert_eq!(calculator.pass_count(), 6);
    assert_eq!(calculator.skip_count(), 1);
    assert_eq!(DSL_TEARDOWNS.load(Ordering::SeqCst), 6);
    assert_eq!(result.find("Calculator.Flow.one").unwrap().output, "1\n");
}

// =================================================================
// Results and listeners
// =================================================================

fn small_run(name: &str) -> TestResult {
    let (tree, root) = rsunit::build(name, |ctx| {
        ctx.fixture("F", |ctx| {
            ctx.test("ok", |ctx| ctx.writeln("out"));
            ctx.test("bad", |_| -> Result<(), BoxError> { Err("broken".into()) });
        });
    });
    run(tree, root)
}

#[test]
fn test_result_serializes_to_json_and_back() {
    let result = small_run("json");
    let text = serde_json::to_string(&result).unwrap();
    let back: TestResult = serde_json::from_str(&text).unwrap();

    assert_eq!(back.full_name, result.full_name);
    assert_eq!(back.fail_count(), 1);
    assert_eq!(back.find("F.ok").unwrap().output, "out\n");
    assert_eq!(back.find("F.bad").unwrap().message.as_deref(), Some("broken"));
}

#[test]
fn test_merged_results_sum_their_parts() {
    let merged = rsunit::merge_results(vec![small_run("one"), small_run("two")]);
    assert_eq!(merged.children.len(), 2);
    assert_eq!(merged.total(), 4);
    assert_eq!(merged.pass_count(), 2);
    assert_eq!(merged.status(), TestStatus::Failed);
}

#[derive(Clone, Default)]
struct Recorder(Arc<Mutex<Vec<String>>>);

impl rsunit::TestListener for Recorder {
    fn test_started(&self, test: rsunit::TestRef<'_>) {
        self.0.lock().unwrap().push(format!("start {}", test.full_name()));
    }

    fn test_finished(&self, result: &TestResult) {
        self.0.lock().unwrap().push(format!("finish {}", result.full_name));
    }
}

#[test]
fn test_listener_sees_every_node_in_order() {
    let recorder = Recorder::default();
    let (tree, root) = rsunit::build("events", |ctx| {
        ctx.fixture("F", |ctx| {
            ctx.test("a", |_| ());
        });
    });
    Executor::new(RunSettings::new())
        .with_listener(recorder.clone())
        .execute(&Arc::new(tree), root, Arc::new(EmptyFilter))
        .unwrap();

    assert_eq!(
        *recorder.0.lock().unwrap(),
        ["start events", "start F", "start F.a", "finish F.a", "finish F", "finish events"]
    );
}
