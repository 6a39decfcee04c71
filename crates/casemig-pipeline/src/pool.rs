use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, Instrument, Span};

/// Runs units of work with at most `concurrency` in flight, then waits for all of them.
pub struct WorkerPool {
    stage: &'static str,
    permits: Arc<Semaphore>,
    tasks: JoinSet<()>,
    failed: usize,
}

impl WorkerPool {
    pub fn new(stage: &'static str, concurrency: usize) -> Self {
        Self {
            stage,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            tasks: JoinSet::new(),
            failed: 0,
        }
    }

    pub async fn spawn<F>(&mut self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permit = match Arc::clone(&self.permits).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                error!(stage = self.stage, "worker pool semaphore closed");
                return;
            }
        };
        self.tasks.spawn(
            async move {
                work.await;
                drop(permit);
            }
            .instrument(Span::current()),
        );
        while let Some(joined) = self.tasks.try_join_next() {
            self.record(joined);
        }
    }

    /// Barrier: returns once every spawned unit has finished. Yields the number of panicked units.
    pub async fn finish(mut self) -> usize {
        while let Some(joined) = self.tasks.join_next().await {
            self.record(joined);
        }
        self.failed
    }

    fn record(&mut self, joined: Result<(), tokio::task::JoinError>) {
        if let Err(err) = joined {
            self.failed += 1;
            error!(stage = self.stage, error = %err, "worker task failed");
        }
    }
}
