use std::sync::Arc;

use casemig_remote::RemoteSession;
use casemig_source::SourceQuery;
use serde::Serialize;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::{ImportConfig, RunOptions};
use crate::correlation::CorrelationTable;
use crate::resolver::ReferenceResolver;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub created: usize,
    pub skipped: usize,
    pub files_attached: usize,
}

#[derive(Debug, Default)]
pub struct Counters {
    inner: Mutex<CounterSnapshot>,
}

impl Counters {
    pub async fn record_created(&self) {
        self.inner.lock().await.created += 1;
    }

    pub async fn record_skipped(&self) {
        self.inner.lock().await.skipped += 1;
    }

    pub async fn record_file_attached(&self) {
        self.inner.lock().await.files_attached += 1;
    }

    pub async fn snapshot(&self) -> CounterSnapshot {
        *self.inner.lock().await
    }
}

pub struct MigrationContext {
    pub run_id: Uuid,
    pub config: ImportConfig,
    pub options: RunOptions,
    pub remote: Arc<dyn RemoteSession>,
    pub source: Arc<dyn SourceQuery>,
    pub resolver: ReferenceResolver,
    pub correlation: CorrelationTable,
    pub counters: Counters,
}

impl MigrationContext {
    pub fn new(
        config: ImportConfig,
        options: RunOptions,
        remote: Arc<dyn RemoteSession>,
        source: Arc<dyn SourceQuery>,
    ) -> Self {
        let resolver = ReferenceResolver::new(Arc::clone(&remote), config.customer_type);
        Self {
            run_id: Uuid::new_v4(),
            config,
            options,
            remote,
            source,
            resolver,
            correlation: CorrelationTable::new(),
            counters: Counters::default(),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.options.concurrency
    }

    pub fn dry_run(&self) -> bool {
        self.options.dry_run
    }
}
