//! Staged migration of legacy ticket records into the case-management instance.

use std::sync::Arc;

use anyhow::{Context, Result};
use casemig_remote::{XmlmcClient, XmlmcConfig};
use casemig_source::SqlSource;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

pub mod activities;
pub mod associations;
pub mod attachments;
pub mod cache;
pub mod config;
pub mod context;
pub mod correlation;
pub mod history;
pub mod pool;
pub mod primary;
pub mod resolver;
pub mod users;

pub use config::{ConfigError, ImportConfig, RunOptions};
pub use context::{CounterSnapshot, MigrationContext};
pub use primary::{ClassImportState, ClassReport};
pub use users::PreloadReport;

pub const CRATE_NAME: &str = "casemig-pipeline";

#[derive(Debug, Clone, Serialize)]
pub struct MigrationSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_ms: i64,
    pub dry_run: bool,
    pub preload: PreloadReport,
    pub classes: Vec<ClassReport>,
    pub counters: CounterSnapshot,
    pub activities_raised: usize,
    pub associations_created: usize,
}

/// Runs every stage in order: user preload, primary import per class, then
/// attachments, activities and associations once the correlation table is complete.
pub struct MigrationPipeline {
    ctx: Arc<MigrationContext>,
}

impl MigrationPipeline {
    pub fn new(ctx: Arc<MigrationContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &Arc<MigrationContext> {
        &self.ctx
    }

    pub async fn run(&self) -> MigrationSummary {
        let span = info_span!("migration", run_id = %self.ctx.run_id);
        self.run_stages().instrument(span).await
    }

    async fn run_stages(&self) -> MigrationSummary {
        let ctx = &self.ctx;
        let started_at = Utc::now();
        info!(
            concurrency = ctx.concurrency(),
            dry_run = ctx.dry_run(),
            "migration started"
        );

        let preload = users::preload_users(
            ctx.remote.as_ref(),
            ctx.resolver.caches(),
            &ctx.config.customer_unique_column,
            &ctx.config.analyst_unique_column,
        )
        .await;

        let mut classes = Vec::new();
        for class in ctx.config.enabled_classes() {
            classes.push(primary::import_class(ctx, class).await);
        }

        let mut activities_raised = 0;
        let mut associations_created = 0;
        if ctx.correlation.is_empty().await {
            info!("no records were imported; dependent stages skipped");
        } else {
            if ctx.options.attachments {
                attachments::import_attachments(ctx).await;
            }
            activities_raised = activities::import_activities(ctx).await;
            associations_created = associations::import_associations(ctx).await;
        }

        let counters = ctx.counters.snapshot().await;
        let finished_at = Utc::now();
        let summary = MigrationSummary {
            run_id: ctx.run_id,
            started_at,
            finished_at,
            elapsed_ms: (finished_at - started_at).num_milliseconds(),
            dry_run: ctx.dry_run(),
            preload,
            classes,
            counters,
            activities_raised,
            associations_created,
        };
        for report in &summary.classes {
            info!(
                class = %report.class,
                state = ?report.state,
                imported = report.imported,
                skipped = report.skipped,
                "class summary"
            );
        }
        info!(
            created = counters.created,
            skipped = counters.skipped,
            files_attached = counters.files_attached,
            activities_raised,
            associations_created,
            elapsed_ms = summary.elapsed_ms,
            "migration finished"
        );
        summary
    }
}

pub async fn run_from_config_file(options: RunOptions) -> Result<MigrationSummary> {
    options.validate()?;
    let config = ImportConfig::load(&options.config_path)
        .with_context(|| format!("loading {}", options.config_path.display()))?;
    config.validate().context("validating import configuration")?;

    let endpoint = config.instance.endpoint(&options.zone);
    let client = XmlmcClient::new(
        XmlmcConfig::new(endpoint.clone(), config.instance.api_key.clone())
            .with_call_delay(options.call_delay),
    )
    .context("building instance client")?;
    let max_connections = u32::try_from(options.concurrency).context("concurrency exceeds connection limit")?;
    let source = SqlSource::connect(&config.source_db, max_connections)
        .await
        .context("connecting to source database")?;
    info!(endpoint = %endpoint, "connected");

    let ctx = MigrationContext::new(config, options, Arc::new(client), Arc::new(source));
    Ok(MigrationPipeline::new(Arc::new(ctx)).run().await)
}
