use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;
use proptest::prelude::*;
use rstest::rstest;

use rsunit::{
    BoxError, EmptyFilter, Executor, FailureSite, NameFilter, ResultState, RunSettings, SuiteKind,
    TestContext, TestMethod, TestResult, TestStatus, TestTree,
};

fn execute(tree: TestTree, root: rsunit::NodeIndex, workers: usize) -> TestResult {
    Executor::new(RunSettings::new().with_workers(workers))
        .execute(&Arc::new(tree), root, Arc::new(EmptyFilter))
        .unwrap()
}

fn names(result: &TestResult) -> Vec<&str> {
    result.children.iter().map(|c| c.name.as_str()).collect()
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn test_one_erroring_leaf_fails_the_suite() {
    let (tree, root) = rsunit::build("engine", |ctx| {
        ctx.fixture("S", |ctx| {
            ctx.test("one", |_| ());
            ctx.test("two", |_| -> Result<(), BoxError> { Err("boom".into()) });
            ctx.test("three", |_| ());
        });
    });

    let result = execute(tree, root, 0);
    let suite = result.find("S").unwrap();

    assert_eq!(suite.status(), TestStatus::Failed);
    assert_eq!(suite.site(), FailureSite::Child);
    assert_eq!(suite.message.as_deref(), Some("One or more child tests had errors"));
    assert_eq!(suite.total(), 3);
    assert_eq!(suite.pass_count(), 2);
    assert_eq!(suite.fail_count(), 1);

    let failed = suite.find("S.two").unwrap();
    assert_eq!(failed.state.label, "Error");
    assert_eq!(failed.message.as_deref(), Some("boom"));
}

#[test]
fn test_one_time_setup_error_skips_children() {
    let (tree, root) = rsunit::build("engine", |ctx| {
        ctx.fixture("S", |ctx| {
            ctx.one_time_setup(|_| -> Result<(), BoxError> { Err("setup failed".into()) });
            ctx.test("a", |_| ());
            ctx.test("b", |_| ());
        });
    });

    let result = execute(tree, root, 0);
    let suite = result.find("S").unwrap();

    assert_eq!(suite.status(), TestStatus::Failed);
    assert_eq!(suite.site(), FailureSite::SetUp);
    assert_eq!(suite.message.as_deref(), Some("setup failed"));
    assert_eq!(suite.total(), 2);
    assert_eq!(suite.pass_count(), 0);
    assert_eq!(suite.fail_count(), 0);
    assert_eq!(suite.skip_count(), 2);
    for child in &suite.children {
        assert_eq!(child.status(), TestStatus::Skipped);
        assert_eq!(child.site(), FailureSite::Parent);
        assert_eq!(child.message.as_deref(), Some("OneTimeSetUp: setup failed"));
    }
}

#[test]
fn test_empty_suite_is_inconclusive() {
    let (tree, root) = rsunit::build("engine", |ctx| {
        ctx.fixture("Empty", |_| {});
    });

    let result = execute(tree, root, 0);
    let suite = result.find("Empty").unwrap();

    assert_eq!(suite.total(), 0);
    assert_eq!(suite.status(), TestStatus::Inconclusive);
}

#[test]
fn test_copy_keeps_selected_children_in_order() {
    let mut tree = TestTree::new();
    let suite = tree.add_suite(SuiteKind::Fixture, "S");
    for name in ["A", "B", "C", "D", "E"] {
        let leaf = tree.add_method(name, TestMethod::new(name, rsunit::Body::from_fn(|_| ())));
        tree.add(suite, leaf).unwrap();
    }

    let copy = tree.copy(suite, &NameFilter::new(["C", "A"])).unwrap();

    let kept: Vec<&str> = tree
        .children(copy)
        .iter()
        .map(|c| tree.node(*c).unwrap().name.as_str())
        .collect();
    assert_eq!(kept, ["A", "C"]);
    assert_ne!(tree.node(copy).unwrap().id, tree.node(suite).unwrap().id);
    assert_eq!(tree.children(suite).len(), 5);
}

fn mixed_tree() -> (TestTree, rsunit::NodeIndex) {
    rsunit::build("engine", |ctx| {
        ctx.namespace("App", |ctx| {
            ctx.fixture("Math", |ctx| {
                for i in 0..8 {
                    ctx.test(&format!("pass{i}"), |_| thread::sleep(Duration::from_millis(2)));
                }
                ctx.test("fails", |_| -> Result<(), BoxError> { panic!("nope") });
                ctx.test("ignored", |_| ()).ignore("later");
            });
            ctx.fixture("Strings", |ctx| {
                ctx.setup(|ctx| ctx.increment_assert_count());
                for i in 0..6 {
                    ctx.test(&format!("s{i}"), |_| ());
                }
                ctx.test("unsure", |ctx| -> Result<(), BoxError> { ctx.inconclusive("no data") });
            });
            ctx.fixture("Serial", |ctx| {
                ctx.non_parallelizable();
                ctx.test("x", |_| ());
                ctx.test("y", |_| ()).non_parallelizable();
            });
        });
    })
}

#[test]
fn test_parallel_run_matches_serial_run() {
    let (tree, root) = mixed_tree();
    let serial = execute(tree, root, 0);
    let (tree, root) = mixed_tree();
    let parallel = execute(tree, root, 4);

    assert_eq!(serial.counts(), parallel.counts());
    assert_eq!(serial.state, parallel.state);
    assert_eq!(serial.assert_count, parallel.assert_count);
    for (a, b) in serial.leaves().iter().zip(parallel.leaves()) {
        assert_eq!(a.full_name, b.full_name);
        assert_eq!(a.state, b.state);
    }
    let math = parallel.find("App.Math").unwrap();
    assert_eq!(names(math)[..3], ["pass0", "pass1", "pass2"]);
}

// ============================================================================
// Properties
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
enum Outcome {
    Pass,
    Fail,
    Error,
    Ignore,
    Inconclusive,
}

impl Outcome {
    fn act(self, ctx: &mut TestContext) -> Result<(), BoxError> {
        match self {
            Outcome::Pass | Outcome::Ignore => Ok(()),
            Outcome::Fail => ctx.fail("failed on purpose"),
            Outcome::Error => Err("error on purpose".into()),
            Outcome::Inconclusive => ctx.inconclusive("unknown"),
        }
    }

    fn status(self) -> TestStatus {
        match self {
            Outcome::Pass => TestStatus::Passed,
            Outcome::Fail | Outcome::Error => TestStatus::Failed,
            Outcome::Ignore => TestStatus::Skipped,
            Outcome::Inconclusive => TestStatus::Inconclusive,
        }
    }
}

fn outcome() -> impl Strategy<Value = Outcome> {
    prop_oneof![
        4 => Just(Outcome::Pass),
        1 => Just(Outcome::Fail),
        1 => Just(Outcome::Error),
        1 => Just(Outcome::Ignore),
        1 => Just(Outcome::Inconclusive),
    ]
}

fn shaped_tree(shape: &[Vec<Outcome>]) -> (TestTree, rsunit::NodeIndex) {
    rsunit::build("prop", |ctx| {
        for (i, leaves) in shape.iter().enumerate() {
            ctx.fixture(&format!("F{i}"), |ctx| {
                for (j, outcome) in leaves.iter().copied().enumerate() {
                    let test = ctx.test(&format!("t{j}"), move |ctx| outcome.act(ctx));
                    if outcome == Outcome::Ignore {
                        test.ignore("ignored on purpose");
                    }
                }
            });
        }
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_counts_and_status_roll_up(
        shape in prop::collection::vec(prop::collection::vec(outcome(), 0..6), 0..5),
        workers in prop_oneof![Just(0usize), Just(3usize)],
    ) {
        let (tree, root) = shaped_tree(&shape);
        let result = execute(tree, root, workers);
        let all: Vec<Outcome> = shape.iter().flatten().copied().collect();

        let count = |status| all.iter().filter(|o| o.status() == status).count();
        prop_assert_eq!(result.total(), all.len());
        prop_assert_eq!(result.pass_count(), count(TestStatus::Passed));
        prop_assert_eq!(result.fail_count(), count(TestStatus::Failed));
        prop_assert_eq!(result.skip_count(), count(TestStatus::Skipped));
        prop_assert_eq!(result.inconclusive_count(), count(TestStatus::Inconclusive));

        let expected = all
            .iter()
            .map(|o| o.status())
            .max()
            .unwrap_or(TestStatus::Inconclusive);
        prop_assert_eq!(result.status(), expected);
    }

    #[test]
    fn prop_copy_is_idempotent_and_ids_stay_unique(
        selected in prop::collection::btree_set(0usize..8, 0..8),
    ) {
        let mut tree = TestTree::new();
        let suite = tree.add_suite(SuiteKind::Fixture, "S");
        for i in 0..8 {
            let name = format!("t{i}");
            let leaf = tree.add_method(name.as_str(), TestMethod::new(name.as_str(), rsunit::Body::from_fn(|_| ())));
            tree.add(suite, leaf).unwrap();
        }
        let filter = NameFilter::new(selected.iter().map(|i| format!("t{i}")));

        let once = tree.copy(suite, &filter).unwrap();
        let twice = tree.copy(once, &filter).unwrap();
        prop_assert_eq!(tree.children(once), tree.children(twice));
        prop_assert_eq!(tree.children(once).len(), selected.len());

        let ids: HashSet<&str> = tree.iter().map(|t| t.id()).collect();
        prop_assert_eq!(ids.len(), tree.len());
    }
}

// ============================================================================
// Setup and teardown guarantees
// ============================================================================

#[test]
fn test_failed_setup_skips_body_but_runs_teardown() {
    let body_runs = Arc::new(AtomicUsize::new(0));
    let teardowns = Arc::new(AtomicUsize::new(0));
    let (b, t) = (Arc::clone(&body_runs), Arc::clone(&teardowns));

    let (tree, root) = rsunit::build("engine", move |ctx| {
        ctx.fixture("S", |ctx| {
            ctx.setup(|ctx| -> Result<(), BoxError> { ctx.fail("setup broke") });
            ctx.teardown(move |_| {
                t.fetch_add(1, Ordering::SeqCst);
            });
            ctx.test("a", move |_| {
                b.fetch_add(1, Ordering::SeqCst);
            });
        });
    });

    let result = execute(tree, root, 0);
    let leaf = result.find("S.a").unwrap();

    assert_eq!(body_runs.load(Ordering::SeqCst), 0);
    assert_eq!(teardowns.load(Ordering::SeqCst), 1);
    assert_eq!(leaf.status(), TestStatus::Failed);
    assert_eq!(leaf.site(), FailureSite::SetUp);
    assert_eq!(leaf.message.as_deref(), Some("setup broke"));
}

#[test]
fn test_teardown_failure_is_appended_to_the_result() {
    let (tree, root) = rsunit::build("engine", |ctx| {
        ctx.fixture("S", |ctx| {
            ctx.teardown(|_| -> Result<(), BoxError> { Err("cleanup failed".into()) });
            ctx.test("a", |_| -> Result<(), BoxError> { panic!("body failed") });
        });
    });

    let result = execute(tree, root, 0);
    let leaf = result.find("S.a").unwrap();

    assert_eq!(leaf.site(), FailureSite::TearDown);
    assert_eq!(
        leaf.message.as_deref(),
        Some("body failed\nTearDown : cleanup failed")
    );
}

#[test]
fn test_forced_stop_cancels_and_still_runs_one_time_teardown() {
    let started = Arc::new(AtomicBool::new(false));
    let torn_down = Arc::new(AtomicUsize::new(0));
    let (s, t) = (Arc::clone(&started), Arc::clone(&torn_down));

    let (tree, root) = rsunit::build("engine", move |ctx| {
        ctx.fixture("Cancel", |ctx| {
            ctx.one_time_teardown(move |_| {
                t.fetch_add(1, Ordering::SeqCst);
            });
            ctx.test("long", move |ctx| {
                s.store(true, Ordering::SeqCst);
                let deadline = Instant::now() + Duration::from_secs(10);
                while !ctx.is_cancelled() && Instant::now() < deadline {
                    thread::sleep(Duration::from_millis(5));
                }
            })
            .requires_thread();
            ctx.test("after", |_| ());
        });
    });

    let executor = Executor::new(RunSettings::new());
    let handle = executor.stop_handle();
    let tree = Arc::new(tree);
    let run = thread::spawn(move || executor.execute(&tree, root, Arc::new(EmptyFilter)));

    while !started.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(1));
    }
    handle.stop(true);
    let result = run.join().unwrap().unwrap();

    let long = result.find("Cancel.long").unwrap();
    assert_eq!(long.status(), TestStatus::Failed);
    assert!(long.state.is_cancelled());
    assert_eq!(long.message.as_deref(), Some("Test cancelled by user"));

    let after = result.find("Cancel.after").unwrap();
    assert_eq!(after.status(), TestStatus::Skipped);
    assert!(after.state.is_cancelled());

    let suite = result.find("Cancel").unwrap();
    assert!(suite.state.is_cancelled());
    assert_eq!(suite.site(), FailureSite::Child);
    assert_eq!(torn_down.load(Ordering::SeqCst), 1);
}

#[test]
fn test_stop_before_execute_cancels_the_run_once() {
    let build = || {
        rsunit::build("engine", |ctx| {
            ctx.fixture("S", |ctx| {
                ctx.test("a", |_| ());
            });
        })
    };
    let executor = Executor::new(RunSettings::new());
    executor.stop_handle().stop(false);

    let (tree, root) = build();
    let stopped = executor
        .execute(&Arc::new(tree), root, Arc::new(EmptyFilter))
        .unwrap();
    let a = stopped.find("S.a").unwrap();
    assert_eq!(a.status(), TestStatus::Skipped);
    assert!(a.state.is_cancelled());

    let (tree, root) = build();
    let rerun = executor
        .execute(&Arc::new(tree), root, Arc::new(EmptyFilter))
        .unwrap();
    assert_eq!(rerun.find("S.a").unwrap().status(), TestStatus::Passed);
}

#[test]
fn test_timeout_cancels_only_the_slow_test() {
    let (tree, root) = rsunit::build("engine", |ctx| {
        ctx.fixture("T", |ctx| {
            ctx.test("slow", |_| thread::sleep(Duration::from_millis(500)))
                .timeout(20);
            ctx.test("fast", |_| ());
        });
    });

    let result = execute(tree, root, 0);
    let slow = result.find("T.slow").unwrap();
    assert!(slow.state.is_cancelled());
    assert_eq!(slow.message.as_deref(), Some("Test exceeded Timeout value of 20ms"));
    assert_eq!(result.find("T.fast").unwrap().status(), TestStatus::Passed);

    // A timeout is a failure, not a user cancellation.
    let suite = result.find("T").unwrap();
    assert_eq!(suite.state, ResultState::CHILD_FAILURE);
}

#[test]
fn test_stop_on_error_skips_remaining_tests() {
    let (tree, root) = rsunit::build("engine", |ctx| {
        ctx.fixture("S", |ctx| {
            ctx.test("a", |_| -> Result<(), BoxError> { panic!("first failure") });
            ctx.test("b", |_| ());
        });
    });
    let result = Executor::new(RunSettings::new().with_stop_on_error(true))
        .execute(&Arc::new(tree), root, Arc::new(EmptyFilter))
        .unwrap();

    let b = result.find("S.b").unwrap();
    assert_eq!(b.status(), TestStatus::Skipped);
    assert!(b.state.is_cancelled());
}

// ============================================================================
// One-time hooks
// ============================================================================

#[rstest]
fn test_one_time_setup_failure_runs_no_child_body(#[values(0, 4)] workers: usize) {
    let body_runs = Arc::new(AtomicUsize::new(0));
    let runs = Arc::clone(&body_runs);
    let (tree, root) = rsunit::build("engine", move |ctx| {
        ctx.fixture("S", |ctx| {
            ctx.one_time_setup(|_| -> Result<(), BoxError> { Err("no server".into()) });
            for name in ["a", "b", "c"] {
                let runs = Arc::clone(&runs);
                ctx.test(name, move |_| {
                    runs.fetch_add(1, Ordering::SeqCst);
                });
            }
        });
    });

    let result = execute(tree, root, workers);
    assert_eq!(body_runs.load(Ordering::SeqCst), 0);
    assert_eq!(result.find("S").unwrap().skip_count(), 3);
}

#[rstest]
fn test_one_time_teardown_error_joins_child_failures(#[values(0, 4)] workers: usize) {
    let teardowns = Arc::new(AtomicUsize::new(0));
    let count = Arc::clone(&teardowns);
    let (tree, root) = rsunit::build("engine", move |ctx| {
        ctx.fixture("S", |ctx| {
            ctx.one_time_teardown(move |_| -> Result<(), BoxError> {
                count.fetch_add(1, Ordering::SeqCst);
                Err("td".into())
            });
            ctx.test("ok", |_| ());
            ctx.test("bad", |_| -> Result<(), BoxError> { Err("broken".into()) });
        });
    });

    let result = execute(tree, root, workers);
    let suite = result.find("S").unwrap();

    assert_eq!(teardowns.load(Ordering::SeqCst), 1);
    assert_eq!(suite.state, ResultState::TEAR_DOWN_ERROR);
    assert_eq!(
        suite.message.as_deref(),
        Some("One or more child tests had errors\nTearDown : td")
    );
    assert_eq!(suite.fail_count(), 1);
    assert_eq!(suite.pass_count(), 1);
}

#[rstest]
fn test_one_time_setup_pass_signal_still_runs_children(#[values(0, 4)] workers: usize) {
    let body_runs = Arc::new(AtomicUsize::new(0));
    let runs = Arc::clone(&body_runs);
    let (tree, root) = rsunit::build("engine", move |ctx| {
        ctx.fixture("S", |ctx| {
            ctx.one_time_setup(|ctx| -> Result<(), BoxError> { ctx.pass("ready") });
            ctx.test("a", move |_| {
                runs.fetch_add(1, Ordering::SeqCst);
            });
        });
    });

    let result = execute(tree, root, workers);
    assert_eq!(body_runs.load(Ordering::SeqCst), 1);
    assert_eq!(result.find("S.a").unwrap().status(), TestStatus::Passed);
    assert_eq!(result.find("S").unwrap().status(), TestStatus::Passed);
}

#[test]
fn test_one_time_setup_ignore_signal_is_handed_to_children() {
    let (tree, root) = rsunit::build("engine", |ctx| {
        ctx.fixture("S", |ctx| {
            ctx.one_time_setup(|ctx| -> Result<(), BoxError> { ctx.ignore("not on this platform") });
            ctx.test("a", |_| ());
        });
    });

    let result = execute(tree, root, 0);
    let suite = result.find("S").unwrap();
    assert!(suite.state.is_ignored());

    let a = suite.find("S.a").unwrap();
    assert!(a.state.is_ignored());
    assert_eq!(a.site(), FailureSite::Parent);
    assert_eq!(a.message.as_deref(), Some("OneTimeSetUp: not on this platform"));
}
