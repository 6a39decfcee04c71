//! Run-scoped reference-data caches.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use casemig_core::RequestClass;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferenceKind {
    Service,
    Priority,
    Team,
    Site,
    RequestCategory,
    ClosureCategory,
    Analyst,
    Customer,
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReferenceKind::Service => "service",
            ReferenceKind::Priority => "priority",
            ReferenceKind::Team => "team",
            ReferenceKind::Site => "site",
            ReferenceKind::RequestCategory => "request category",
            ReferenceKind::ClosureCategory => "closure category",
            ReferenceKind::Analyst => "analyst",
            ReferenceKind::Customer => "customer",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRef {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRef {
    pub id: String,
    pub name: String,
    pub workflows: BTreeMap<RequestClass, String>,
}

impl ServiceRef {
    pub fn workflow_for(&self, class: RequestClass) -> Option<&str> {
        self.workflows
            .get(&class)
            .map(String::as_str)
            .filter(|name| !name.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonRef {
    pub handle: String,
    pub name: String,
}

/// Append-only map keyed by case-insensitive natural key.
///
/// The lock is only ever held for a single read or insert.
#[derive(Debug)]
pub struct ReferenceCache<V> {
    kind: ReferenceKind,
    entries: Mutex<HashMap<String, V>>,
}

fn normalize(key: &str) -> String {
    key.to_lowercase()
}

impl<V: Clone> ReferenceCache<V> {
    pub fn new(kind: ReferenceKind) -> Self {
        Self {
            kind,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn kind(&self) -> ReferenceKind {
        self.kind
    }

    pub async fn get(&self, key: &str) -> Option<V> {
        self.entries.lock().await.get(&normalize(key)).cloned()
    }

    /// Insert unless an entry already exists; returns the entry that is now cached.
    pub async fn insert(&self, key: &str, value: V) -> V {
        self.entries
            .lock()
            .await
            .entry(normalize(key))
            .or_insert(value)
            .clone()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[derive(Debug)]
pub struct ReferenceCaches {
    pub services: ReferenceCache<ServiceRef>,
    pub priorities: ReferenceCache<ResolvedRef>,
    pub teams: ReferenceCache<ResolvedRef>,
    pub sites: ReferenceCache<ResolvedRef>,
    pub request_categories: ReferenceCache<ResolvedRef>,
    pub closure_categories: ReferenceCache<ResolvedRef>,
    pub analysts: ReferenceCache<PersonRef>,
    pub customers: ReferenceCache<PersonRef>,
}

impl Default for ReferenceCaches {
    fn default() -> Self {
        Self {
            services: ReferenceCache::new(ReferenceKind::Service),
            priorities: ReferenceCache::new(ReferenceKind::Priority),
            teams: ReferenceCache::new(ReferenceKind::Team),
            sites: ReferenceCache::new(ReferenceKind::Site),
            request_categories: ReferenceCache::new(ReferenceKind::RequestCategory),
            closure_categories: ReferenceCache::new(ReferenceKind::ClosureCategory),
            analysts: ReferenceCache::new(ReferenceKind::Analyst),
            customers: ReferenceCache::new(ReferenceKind::Customer),
        }
    }
}
