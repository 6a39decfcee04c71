//! Bulk preload of user accounts into the analyst and customer caches.

use casemig_remote::RemoteSession;
use serde::Serialize;
use tracing::{info, warn};

use crate::cache::{PersonRef, ReferenceCaches};

pub const USER_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PreloadReport {
    pub accounts: usize,
    pub analysts: usize,
}

/// Page through every account until an empty page comes back.
pub async fn preload_users(
    remote: &dyn RemoteSession,
    caches: &ReferenceCaches,
    customer_column: &str,
    analyst_column: &str,
) -> PreloadReport {
    let mut report = PreloadReport::default();
    let mut offset = 0;

    loop {
        let page = match remote.user_list_page(offset, USER_PAGE_SIZE).await {
            Ok(page) => page,
            Err(err) => {
                warn!(offset, error = %err, "unable to load user account page");
                break;
            }
        };
        if page.is_empty() {
            break;
        }

        for account in &page {
            report.accounts += 1;
            let customer_key = account.unique_value(customer_column);
            if !customer_key.is_empty() {
                let customer = PersonRef {
                    handle: account.user_id.clone(),
                    name: account.full_name(),
                };
                caches.customers.insert(customer_key, customer).await;
            }

            let analyst_key = account.unique_value(analyst_column);
            if account.is_analyst() && !analyst_key.is_empty() {
                let analyst = PersonRef {
                    handle: account.user_id.clone(),
                    name: account.name.clone(),
                };
                caches.analysts.insert(analyst_key, analyst).await;
                report.analysts += 1;
            }
        }
        offset += USER_PAGE_SIZE;
    }

    info!(accounts = report.accounts, analysts = report.analysts, "user accounts loaded");
    report
}
