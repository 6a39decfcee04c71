//! Activity pass: raise tasks against imported requests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use casemig_core::SourceRow;
use casemig_remote::{request_urn, TaskOutcome, TaskRequest};
use casemig_source::assemble_statement;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::ActivityConfig;
use crate::context::MigrationContext;
use crate::pool::WorkerPool;

pub const AUTHORISATION_CATEGORY: &str = "BPM Authorisation";
const COMPLETED_STATUSES: [&str; 2] = ["Closed Complete", "Closed Incomplete"];

pub fn outcomes_for(category: &str) -> Vec<TaskOutcome> {
    if category == AUTHORISATION_CATEGORY {
        vec![
            TaskOutcome::new("accept", "Authorise", false),
            TaskOutcome::new("refuse", "Rejected", true),
        ]
    } else {
        vec![TaskOutcome::new("done", "Done", false)]
    }
}

fn non_empty(value: String) -> Option<String> {
    (!value.is_empty()).then_some(value)
}

/// Raise one task per activity row whose parent was imported. Returns tasks raised.
pub async fn import_activities(ctx: &Arc<MigrationContext>) -> usize {
    let conf = &ctx.config.conf_activities;
    if !conf.import {
        debug!("activity import disabled");
        return 0;
    }

    let span = info_span!("activities", run_id = %ctx.run_id);
    async {
        let statement = assemble_statement(&conf.sql_statement);
        if statement.is_empty() {
            warn!("no activity statement configured");
            return 0;
        }
        let rows = match ctx.source.extract(&statement).await {
            Ok(rows) => rows,
            Err(err) => {
                error!(error = %err, "activity query failed");
                return 0;
            }
        };
        info!(rows = rows.len(), "importing activities");

        let raised = Arc::new(AtomicUsize::new(0));
        let mut pool = WorkerPool::new("activities", ctx.concurrency());
        for row in rows {
            let ctx = Arc::clone(ctx);
            let raised = Arc::clone(&raised);
            pool.spawn(async move {
                if raise_activity(&ctx, &row).await {
                    raised.fetch_add(1, Ordering::Relaxed);
                }
            })
            .await;
        }
        let panicked = pool.finish().await;

        let raised = raised.load(Ordering::Relaxed);
        info!(raised, panicked, "activities complete");
        raised
    }
    .instrument(span)
    .await
}

async fn raise_activity(ctx: &MigrationContext, row: &SourceRow) -> bool {
    let conf = &ctx.config.conf_activities;
    let parent_key = conf.parent_ref.resolve(row);
    let Some(target_ref) = ctx.correlation.target_ref(&parent_key).await else {
        return false;
    };

    let task = build_task(ctx, conf, row, &target_ref).await;
    let task_id = match ctx.remote.create_task(&task).await {
        Ok(task_id) => task_id,
        Err(err) => {
            warn!(target_ref = %target_ref, title = %task.title, error = %err, "unable to create task");
            return false;
        }
    };
    debug!(target_ref = %target_ref, task_id = %task_id, "task created");

    let status = conf.status.resolve(row);
    if COMPLETED_STATUSES.contains(&status.as_str()) {
        let outcome = format!("{}\n{}", conf.decision.resolve(row), conf.reason.resolve(row));
        if let Err(err) = ctx.remote.complete_task(&task_id, &outcome).await {
            warn!(task_id = %task_id, error = %err, "unable to complete task");
        }
    }
    true
}

async fn build_task(ctx: &MigrationContext, conf: &ActivityConfig, row: &SourceRow, target_ref: &str) -> TaskRequest {
    let category = conf.category.resolve(row);
    let assignee = conf.assign_to.resolve(row);
    let assign_to = match ctx.resolver.analyst(&assignee).await {
        Some(analyst) => Some(analyst.handle),
        None => ctx.resolver.customer(&assignee).await.map(|customer| customer.handle),
    }
    .map(|handle| format!("urn:sys:user:{handle}"));

    TaskRequest {
        title: conf.title.resolve(row),
        details: non_empty(conf.description.resolve(row)),
        outcomes: outcomes_for(&category),
        category,
        start_date: non_empty(conf.start_date.resolve(row)),
        due_date: non_empty(conf.due_date.resolve(row)),
        assign_to,
        object_ref_urn: request_urn(target_ref),
    }
}
