//! Cache-aside resolution of reference data against the target system.

use std::sync::Arc;

use casemig_core::RequestClass;
use casemig_remote::{CustomerKind, Fields, RemoteSession};
use tracing::{debug, warn};

use crate::cache::{PersonRef, ReferenceCache, ReferenceCaches, ResolvedRef, ServiceRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CategoryGroup {
    Request,
    Closure,
}

impl CategoryGroup {
    pub fn as_str(self) -> &'static str {
        match self {
            CategoryGroup::Request => "Request",
            CategoryGroup::Closure => "Closure",
        }
    }
}

struct SearchTarget {
    entity: &'static str,
    name_column: &'static str,
    id_column: &'static str,
}

const PRIORITY: SearchTarget = SearchTarget {
    entity: "Priority",
    name_column: "h_priorityname",
    id_column: "h_pk_priorityid",
};
const TEAM: SearchTarget = SearchTarget {
    entity: "Groups",
    name_column: "h_name",
    id_column: "h_id",
};
const SITE: SearchTarget = SearchTarget {
    entity: "Site",
    name_column: "h_site_name",
    id_column: "h_id",
};
const SERVICE: SearchTarget = SearchTarget {
    entity: "Services",
    name_column: "h_servicename",
    id_column: "h_pk_serviceid",
};

const SERVICE_WORKFLOW_COLUMNS: [(RequestClass, &str); 6] = [
    (RequestClass::Incident, "h_incident_bpm_name"),
    (RequestClass::ServiceRequest, "h_service_bpm_name"),
    (RequestClass::ChangeRequest, "h_change_bpm_name"),
    (RequestClass::Problem, "h_problem_bpm_name"),
    (RequestClass::KnownError, "h_knownerror_bpm_name"),
    (RequestClass::Release, "h_release_bpm_name"),
];

/// Resolves natural keys to target identifiers, caching every hit for the run.
///
/// Cache locks are released before any remote call. Remote failures are logged
/// and reported as "not found"; nothing is retried.
pub struct ReferenceResolver {
    remote: Arc<dyn RemoteSession>,
    caches: ReferenceCaches,
    customer_kind: CustomerKind,
}

impl ReferenceResolver {
    pub fn new(remote: Arc<dyn RemoteSession>, customer_kind: CustomerKind) -> Self {
        Self {
            remote,
            caches: ReferenceCaches::default(),
            customer_kind,
        }
    }

    pub fn caches(&self) -> &ReferenceCaches {
        &self.caches
    }

    pub async fn priority(&self, name: &str) -> Option<ResolvedRef> {
        self.resolve_named(&self.caches.priorities, &PRIORITY, name).await
    }

    pub async fn team(&self, name: &str) -> Option<ResolvedRef> {
        self.resolve_named(&self.caches.teams, &TEAM, name).await
    }

    pub async fn site(&self, name: &str) -> Option<ResolvedRef> {
        self.resolve_named(&self.caches.sites, &SITE, name).await
    }

    pub async fn service(&self, name: &str) -> Option<ServiceRef> {
        if name.is_empty() {
            return None;
        }
        if let Some(hit) = self.caches.services.get(name).await {
            return Some(hit);
        }
        let row = self.search(&SERVICE, name).await?;
        let (id, display) = matched_identity(&row, &SERVICE, name)?;
        let workflows = SERVICE_WORKFLOW_COLUMNS
            .iter()
            .filter_map(|(class, column)| row.get(*column).map(|flow| (*class, flow.clone())))
            .collect();
        let service = ServiceRef {
            id,
            name: display,
            workflows,
        };
        Some(self.caches.services.insert(name, service).await)
    }

    pub async fn category(&self, group: CategoryGroup, code: &str) -> Option<ResolvedRef> {
        if code.is_empty() {
            return None;
        }
        let cache = match group {
            CategoryGroup::Request => &self.caches.request_categories,
            CategoryGroup::Closure => &self.caches.closure_categories,
        };
        if let Some(hit) = cache.get(code).await {
            return Some(hit);
        }
        match self.remote.code_lookup(group.as_str(), code).await {
            Ok(Some(found)) => {
                let category = ResolvedRef {
                    id: found.id,
                    name: found.name,
                };
                Some(cache.insert(code, category).await)
            }
            Ok(None) => {
                warn!(group = group.as_str(), code, "category is not on the instance");
                None
            }
            Err(err) => {
                warn!(group = group.as_str(), code, error = %err, "category lookup failed");
                None
            }
        }
    }

    /// Analysts come from the bulk preload; a miss falls back to an account existence check.
    pub async fn analyst(&self, user_id: &str) -> Option<PersonRef> {
        if user_id.is_empty() {
            return None;
        }
        if let Some(hit) = self.caches.analysts.get(user_id).await {
            return Some(hit);
        }
        match self.remote.user_info(user_id).await {
            Ok(Some(name)) => {
                let person = PersonRef {
                    handle: user_id.to_string(),
                    name,
                };
                Some(self.caches.analysts.insert(user_id, person).await)
            }
            Ok(None) => None,
            Err(err) => {
                debug!(user_id, error = %err, "analyst not found");
                None
            }
        }
    }

    pub async fn customer(&self, customer_id: &str) -> Option<PersonRef> {
        if customer_id.is_empty() {
            return None;
        }
        if let Some(hit) = self.caches.customers.get(customer_id).await {
            return Some(hit);
        }
        match self.remote.customer_info(customer_id, self.customer_kind).await {
            Ok(Some(name)) => {
                let person = PersonRef {
                    handle: customer_id.to_string(),
                    name,
                };
                Some(self.caches.customers.insert(customer_id, person).await)
            }
            Ok(None) => None,
            Err(err) => {
                debug!(customer_id, error = %err, "customer not found");
                None
            }
        }
    }

    async fn resolve_named(
        &self,
        cache: &ReferenceCache<ResolvedRef>,
        target: &SearchTarget,
        name: &str,
    ) -> Option<ResolvedRef> {
        if name.is_empty() {
            return None;
        }
        if let Some(hit) = cache.get(name).await {
            return Some(hit);
        }
        let row = self.search(target, name).await?;
        let (id, display) = matched_identity(&row, target, name)?;
        Some(cache.insert(name, ResolvedRef { id, name: display }).await)
    }

    async fn search(&self, target: &SearchTarget, name: &str) -> Option<Fields> {
        match self.remote.search(target.entity, target.name_column, name).await {
            Ok(row) => row,
            Err(err) => {
                warn!(entity = target.entity, name, error = %err, "reference search failed");
                None
            }
        }
    }
}

fn matched_identity(row: &Fields, target: &SearchTarget, name: &str) -> Option<(String, String)> {
    let found_name = row.get(target.name_column).filter(|found| !found.is_empty())?;
    if found_name.to_lowercase() != name.to_lowercase() {
        debug!(entity = target.entity, name, found = %found_name, "search returned a different record");
        return None;
    }
    let id = row.get(target.id_column).filter(|id| !id.is_empty())?;
    Some((id.clone(), found_name.clone()))
}
