use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding};
use tokio::sync::mpsc;

use crate::auth_cache::{AuthCache, ReviewRequest};
use crate::reviewer::Reviewer;
use crate::selector::LabelSelector;
use crate::store::{LastSyncResourceVersioner, Store};
use crate::types::{TargetResource, UserInfo};
use crate::watcher::{ConvertResource, WatchEvent};

/// Binds an AuthCache to a concrete resource kind: the cache decides which
/// names a user may see, this layer materializes them from the kind's lister.
pub struct ResourceCache<T: TargetResource> {
    store: Arc<Store<T>>,
    auth_cache: Arc<AuthCache>,
}

impl<T: TargetResource> ResourceCache<T> {
    pub fn new(
        reviewer: Arc<dyn Reviewer>,
        store: Arc<Store<T>>,
        cluster_roles: Arc<Store<ClusterRole>>,
        cluster_role_bindings: Arc<Store<ClusterRoleBinding>>,
    ) -> Self {
        let target = store.clone();
        let list_requests: Box<dyn Fn() -> anyhow::Result<Vec<ReviewRequest>> + Send + Sync> =
            Box::new(move || {
                Ok(target
                    .list()
                    .iter()
                    .map(|obj| ReviewRequest::for_target(obj.name(), obj.resource_version()))
                    .collect())
            });

        let auth_cache = Arc::new(AuthCache::new(
            reviewer,
            cluster_roles,
            cluster_role_bindings,
            T::GROUP,
            T::RESOURCE,
            store.clone() as Arc<dyn LastSyncResourceVersioner>,
            list_requests,
        ));

        Self { store, auth_cache }
    }

    pub fn auth_cache(&self) -> &Arc<AuthCache> {
        &self.auth_cache
    }

    /// Objects visible to the user, filtered by label selector and sorted by
    /// name. Names that vanished from the lister since the last sync are
    /// silently skipped.
    pub fn list(&self, user: &UserInfo, selector: &LabelSelector) -> Vec<Arc<T>> {
        let names = self.auth_cache.list_names(&user.name, &user.groups);
        let mut items: Vec<Arc<T>> = names
            .iter()
            .filter_map(|name| self.store.get(name))
            .filter(|obj| selector.matches(obj.labels()))
            .collect();
        items.sort_by(|a, b| a.name().cmp(b.name()));
        items
    }

    pub fn get(&self, name: &str) -> Option<Arc<T>> {
        self.store.get(name)
    }

    /// The object for a name, or a metadata-only stand-in if it has already
    /// been deleted upstream.
    pub fn convert_resource(&self, name: &str) -> serde_json::Value {
        convert_from_store(&self.store, name)
    }

    /// Registers a filtered watch stream for this user.
    pub fn watch(
        &self,
        user: &UserInfo,
        allowed_names: HashSet<String>,
        include_all_existing: bool,
    ) -> mpsc::Receiver<WatchEvent> {
        let store = self.store.clone();
        let convert: ConvertResource = Box::new(move |name| convert_from_store(&store, name));
        self.auth_cache
            .watch(user, allowed_names, include_all_existing, convert)
    }

    /// Begins periodic cache synchronization.
    pub fn run(&self, period: Duration) -> tokio::task::JoinHandle<()> {
        self.auth_cache.clone().run(period)
    }
}

fn convert_from_store<T: TargetResource>(store: &Store<T>, name: &str) -> serde_json::Value {
    let value = match store.get(name) {
        Some(obj) => serde_json::to_value(obj.as_ref()),
        None => serde_json::to_value(T::synthetic(name)),
    };
    value.unwrap_or_else(|_| serde_json::json!({ "metadata": { "name": name } }))
}
