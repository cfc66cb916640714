use std::future::Future;

use anyhow::Context;

use crate::config::SimulationConfig;

/// The shared worker pool that runner tasks execute on.
///
/// One executor is created per batch and reused by every simulation in it;
/// simulations run sequentially, but one simulation's runners run in
/// parallel on this pool.
#[derive(Debug)]
pub struct Executor {
    runtime: tokio::runtime::Runtime,
}

impl Executor {
    pub fn new(worker_threads: usize) -> anyhow::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(worker_threads.max(1))
            .thread_name("gust-runner")
            .enable_all()
            .build()
            .context("Failed to create Tokio runtime")?;
        Ok(Self { runtime })
    }

    pub fn handle(&self) -> &tokio::runtime::Handle {
        self.runtime.handle()
    }

    /// Run async code in place, blocking until it completes.
    pub fn block_on<T>(&self, fut: impl Future<Output = T>) -> T {
        self.runtime.block_on(fut)
    }
}

/// Pool size for a batch: the maximum concurrency requested across its
/// enabled simulations.
pub fn pool_size(simulations: &[SimulationConfig]) -> usize {
    simulations
        .iter()
        .filter(|s| s.enabled)
        .map(|s| s.concurrency)
        .max()
        .unwrap_or(1)
}
