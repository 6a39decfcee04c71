use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use casemig_remote::{EntityRecord, Fields};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::context::MigrationContext;
use crate::pool::WorkerPool;

pub const ASSOCIATION_ENTITY: &str = "RelatedRequests";

/// Link every imported child to its imported parent. Returns links created.
pub async fn import_associations(ctx: &Arc<MigrationContext>) -> usize {
    let span = info_span!("associations", run_id = %ctx.run_id);
    async {
        let children: Vec<_> = ctx
            .correlation
            .snapshot()
            .await
            .into_iter()
            .filter(|(_, entry)| entry.has_parent() && entry.has_target())
            .collect();
        info!(children = children.len(), "linking related requests");

        let linked = Arc::new(AtomicUsize::new(0));
        let mut pool = WorkerPool::new("associations", ctx.concurrency());
        for (source_key, entry) in children {
            if entry.parent_key == source_key {
                debug!(source_key = %source_key, "record names itself as parent");
                continue;
            }
            let ctx = Arc::clone(ctx);
            let linked = Arc::clone(&linked);
            pool.spawn(async move {
                let Some(parent_ref) = ctx.correlation.target_ref(&entry.parent_key).await else {
                    debug!(source_key = %source_key, parent_key = %entry.parent_key, "parent was not imported");
                    return;
                };
                if parent_ref == entry.target_ref {
                    return;
                }
                let mut fields = Fields::new();
                fields.insert("h_fk_parentrequestid".into(), parent_ref.clone());
                fields.insert("h_fk_childrequestid".into(), entry.target_ref.clone());
                let record = EntityRecord {
                    primary: fields,
                    related: Vec::new(),
                };
                match ctx.remote.create(ASSOCIATION_ENTITY, &record).await {
                    Ok(_) => {
                        linked.fetch_add(1, Ordering::Relaxed);
                        debug!(parent = %parent_ref, child = %entry.target_ref, "requests linked");
                    }
                    Err(err) => warn!(parent = %parent_ref, child = %entry.target_ref, error = %err, "unable to link requests"),
                }
            })
            .await;
        }
        let panicked = pool.finish().await;

        let linked = linked.load(Ordering::Relaxed);
        info!(linked, panicked, "associations complete");
        linked
    }
    .instrument(span)
    .await
}
