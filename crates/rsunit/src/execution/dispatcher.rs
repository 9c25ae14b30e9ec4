//! Runs the child work items of a suite, inline or on the worker pool.

use crossbeam::channel;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::properties::{names, NON_PARALLELIZABLE};
use crate::result::TestResult;

use super::work_item::WorkItem;

pub(crate) struct Dispatcher {
    pool: Option<ThreadPool>,
}

impl Dispatcher {
    /// `workers == 0` runs every child inline on the suite's thread.
    pub fn new(workers: usize) -> Result<Self> {
        if workers == 0 {
            return Ok(Dispatcher { pool: None });
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("rsunit-worker-{i}"))
            .build()
            .map_err(|source| EngineError::ThreadPool { workers, source })?;
        Ok(Dispatcher { pool: Some(pool) })
    }

    /// Execute `items` and return their results in the order given.
    ///
    /// Blocks until every item is complete. On the pool, parallelizable items
    /// run concurrently first; items opted out of parallel execution then run
    /// one at a time on the calling thread.
    pub fn run_children(&self, items: Vec<WorkItem>) -> Vec<TestResult> {
        let Some(pool) = &self.pool else {
            return items.into_iter().map(WorkItem::execute).collect();
        };

        let (parallel, serial): (Vec<_>, Vec<_>) = items
            .into_iter()
            .enumerate()
            .partition(|(_, item)| is_parallelizable(item));
        debug!(
            parallel = parallel.len(),
            serial = serial.len(),
            "dispatching children"
        );

        let (tx, rx) = channel::unbounded();
        pool.scope(|scope| {
            for (position, item) in parallel {
                let tx = tx.clone();
                scope.spawn(move |_| {
                    let _ = tx.send((position, item.execute()));
                });
            }
        });
        drop(tx);

        let mut results: Vec<(usize, TestResult)> = rx.iter().collect();
        results.extend(
            serial
                .into_iter()
                .map(|(position, item)| (position, item.execute())),
        );
        results.sort_by_key(|(position, _)| *position);
        results.into_iter().map(|(_, result)| result).collect()
    }
}

fn is_parallelizable(item: &WorkItem) -> bool {
    item.test()
        .map(|t| t.properties().get(names::PARALLEL_SCOPE) != Some(NON_PARALLELIZABLE))
        .unwrap_or(true)
}
