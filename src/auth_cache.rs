use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding};
use log::*;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::rbac;
use crate::reviewer::Reviewer;
use crate::store::{LastSyncResourceVersioner, Store, UnionVersioner};
use crate::types::UserInfo;
use crate::watcher::{CacheWatcher, ConvertResource, WatchEvent, INCOMING_BUFFER, OUTGOING_BUFFER};

/// What we want reviewed, together with everything we observed about the
/// inputs that drove the request. The version maps let a later cycle tell
/// whether a cached result is still current.
#[derive(Clone, Debug, Default)]
pub(crate) struct ReviewRequest {
    pub name: String,
    pub resource_version: String,
    pub role_uid_to_resource_version: HashMap<String, String>,
    pub role_binding_uid_to_resource_version: HashMap<String, String>,
}

impl ReviewRequest {
    pub(crate) fn for_target(name: &str, resource_version: &str) -> Self {
        Self {
            name: name.to_string(),
            resource_version: resource_version.to_string(),
            ..Default::default()
        }
    }
}

/// The cached result of one review, keyed by resource name.
#[derive(Clone, Debug)]
struct ReviewRecord {
    name: String,
    resource_version: String,
    role_uid_to_resource_version: HashMap<String, String>,
    role_binding_uid_to_resource_version: HashMap<String, String>,
    users: Vec<String>,
    groups: Vec<String>,
}

#[derive(Default)]
struct Indexes {
    review_records: HashMap<String, ReviewRecord>,
    user_subjects: HashMap<String, HashSet<String>>,
    group_subjects: HashMap<String, HashSet<String>>,
    all_known_names: HashSet<String>,
}

#[derive(Default)]
struct SyncState {
    last_state: String,
    synced_once: bool,
    // the resource versions of every role/binding seen last cycle; any
    // difference (including a deletion) invalidates cached reviews
    cluster_role_versions: HashSet<String>,
    cluster_role_binding_versions: HashSet<String>,
}

struct WatcherEntry {
    watcher: Arc<CacheWatcher>,
    sender: mpsc::Sender<WatchEvent>,
}

/// The authorization projection for one `(group, resource)` kind: who can
/// see which names, kept current by periodic synchronization against the
/// RBAC listers and the target-resource lister.
///
/// The synchronizer is the sole writer of the indexes; `list_names` and
/// watcher registration read concurrently.
pub struct AuthCache {
    group: String,
    resource: String,

    reviewer: Arc<dyn Reviewer>,
    cluster_roles: Arc<Store<ClusterRole>>,
    cluster_role_bindings: Arc<Store<ClusterRoleBinding>>,

    target_versioner: Arc<dyn LastSyncResourceVersioner>,
    policy_versioner: UnionVersioner,

    list_requests: Box<dyn Fn() -> Result<Vec<ReviewRequest>> + Send + Sync>,

    indexes: RwLock<Indexes>,
    sync_state: Mutex<SyncState>,

    watchers: Mutex<HashMap<u64, WatcherEntry>>,
    next_watcher_id: AtomicU64,
    // set when a watcher registers so the next tick runs a full cycle even
    // if no resource version moved
    watcher_registered: AtomicBool,
}

impl AuthCache {
    pub(crate) fn new(
        reviewer: Arc<dyn Reviewer>,
        cluster_roles: Arc<Store<ClusterRole>>,
        cluster_role_bindings: Arc<Store<ClusterRoleBinding>>,
        group: &str,
        resource: &str,
        target_versioner: Arc<dyn LastSyncResourceVersioner>,
        list_requests: Box<dyn Fn() -> Result<Vec<ReviewRequest>> + Send + Sync>,
    ) -> Self {
        let policy_versioner = UnionVersioner::new(vec![
            cluster_roles.clone() as Arc<dyn LastSyncResourceVersioner>,
            cluster_role_bindings.clone() as Arc<dyn LastSyncResourceVersioner>,
        ]);
        Self {
            group: group.to_string(),
            resource: resource.to_string(),
            reviewer,
            cluster_roles,
            cluster_role_bindings,
            target_versioner,
            policy_versioner,
            list_requests,
            indexes: RwLock::new(Indexes::default()),
            sync_state: Mutex::new(SyncState::default()),
            watchers: Mutex::new(HashMap::new()),
            next_watcher_id: AtomicU64::new(0),
            watcher_registered: AtomicBool::new(false),
        }
    }

    /// Records the resource versions of all roles and bindings, reporting
    /// whether the sets differ from the previous cycle.
    fn refresh_policy_versions(&self, state: &mut SyncState) -> bool {
        let role_versions: HashSet<String> = self
            .cluster_roles
            .list()
            .iter()
            .map(|role| role.metadata.resource_version.clone().unwrap_or_default())
            .collect();
        let binding_versions: HashSet<String> = self
            .cluster_role_bindings
            .list()
            .iter()
            .map(|binding| binding.metadata.resource_version.clone().unwrap_or_default())
            .collect();

        let invalidate = role_versions != state.cluster_role_versions
            || binding_versions != state.cluster_role_binding_versions;
        state.cluster_role_versions = role_versions;
        state.cluster_role_binding_versions = binding_versions;
        invalidate
    }

    fn current_state(&self) -> String {
        format!(
            "{},{}",
            self.target_versioner.last_sync_resource_version(),
            self.policy_versioner.last_sync_resource_version()
        )
    }

    /// Runs a full synchronization over the cache data. Single-writer: only
    /// the background loop (or a test) may call this.
    pub fn synchronize(&self) {
        let mut state = self.sync_state.lock();

        let current_state = self.current_state();
        let force = self.watcher_registered.swap(false, Ordering::SeqCst);
        if state.synced_once && !force && current_state == state.last_state {
            debug!(
                "{}/{}: no observed inputs changed, skipping synchronization",
                self.group, self.resource
            );
            return;
        }

        let requests = match (self.list_requests)() {
            Ok(requests) => requests,
            Err(err) => {
                error!(
                    "{}/{}: listing resources for synchronization: {}",
                    self.group, self.resource, err
                );
                if force {
                    // don't lose the forced cycle a new watcher asked for
                    self.watcher_registered.store(true, Ordering::SeqCst);
                }
                return;
            }
        };

        // a changed or deleted role/binding may silently retract access, so
        // the per-name staleness check cannot be trusted; drop every cached
        // review and rebuild
        if self.refresh_policy_versions(&mut state) {
            debug!(
                "{}/{}: policy changed, invalidating cached reviews",
                self.group, self.resource
            );
            let mut indexes = self.indexes.write();
            indexes.review_records.clear();
            indexes.user_subjects.clear();
            indexes.group_subjects.clear();
        }

        let mut new_known_names = HashSet::with_capacity(requests.len());
        for request in &requests {
            new_known_names.insert(request.name.clone());
            self.sync_request(request);
        }

        self.synchronize_cluster_role_bindings(&new_known_names);
        self.purge_deleted_resources(&new_known_names);

        self.indexes.write().all_known_names = new_known_names;

        state.last_state = current_state;
        state.synced_once = true;
    }

    /// Re-reviews one name unless the cached record already covers every
    /// version this request observed. Applies index updates, then notifies
    /// watchers of the new subject sets.
    fn sync_request(&self, request: &ReviewRequest) {
        let last_known = self.indexes.read().review_records.get(&request.name).cloned();

        if skip_review(request, last_known.as_ref()) {
            return;
        }

        let review = self
            .reviewer
            .review(&self.group, &self.resource, &request.name);
        if let Some(err) = review.evaluation_error() {
            warn!(
                "{}/{}: review of {:?} was partial: {}",
                self.group, self.resource, request.name, err
            );
        }

        let users: HashSet<String> = review.users().iter().cloned().collect();
        let groups: HashSet<String> = review.groups().iter().cloned().collect();

        {
            let mut indexes = self.indexes.write();
            if let Some(last) = &last_known {
                for user in last.users.iter().filter(|u| !users.contains(*u)) {
                    remove_name_from_subject(&mut indexes.user_subjects, user, &request.name);
                }
                for group in last.groups.iter().filter(|g| !groups.contains(*g)) {
                    remove_name_from_subject(&mut indexes.group_subjects, group, &request.name);
                }
            }
            for user in &users {
                indexes
                    .user_subjects
                    .entry(user.clone())
                    .or_default()
                    .insert(request.name.clone());
            }
            for group in &groups {
                indexes
                    .group_subjects
                    .entry(group.clone())
                    .or_default()
                    .insert(request.name.clone());
            }
            indexes.review_records.insert(
                request.name.clone(),
                merge_review_record(request, last_known.as_ref(), review.users(), review.groups()),
            );
        }

        self.notify_watchers(&request.name, &users, &groups);
    }

    /// Reviews every name each binding's role could grant, carrying the
    /// role/binding versions so an unchanged pair is skipped next cycle. A
    /// role that grants the whole kind stands in for every known name.
    fn synchronize_cluster_role_bindings(&self, all_known_names: &HashSet<String>) {
        for binding in self.cluster_role_bindings.list() {
            let Some(role) = self.cluster_roles.get(&binding.role_ref.name) else {
                continue;
            };

            let (mut names, all) =
                resource_names_from_cluster_role(&role, &self.group, &self.resource);
            if all {
                names = all_known_names.clone();
            }

            let role_uid = role.metadata.uid.clone().unwrap_or_default();
            let role_rv = role.metadata.resource_version.clone().unwrap_or_default();
            let binding_uid = binding.metadata.uid.clone().unwrap_or_default();
            let binding_rv = binding.metadata.resource_version.clone().unwrap_or_default();

            for name in names {
                let request = ReviewRequest {
                    name,
                    resource_version: String::new(),
                    role_uid_to_resource_version: HashMap::from([(
                        role_uid.clone(),
                        role_rv.clone(),
                    )]),
                    role_binding_uid_to_resource_version: HashMap::from([(
                        binding_uid.clone(),
                        binding_rv.clone(),
                    )]),
                };
                self.sync_request(&request);
            }
        }
    }

    /// Drops every record whose name vanished from the target lister and
    /// tells watchers those names are gone for everyone.
    fn purge_deleted_resources(&self, new_names: &HashSet<String>) {
        let purged: HashSet<String> = {
            let mut indexes = self.indexes.write();
            let stale: Vec<String> = indexes
                .review_records
                .keys()
                .filter(|name| !new_names.contains(*name))
                .cloned()
                .collect();
            for name in &stale {
                if let Some(record) = indexes.review_records.remove(name) {
                    for user in &record.users {
                        remove_name_from_subject(&mut indexes.user_subjects, user, name);
                    }
                    for group in &record.groups {
                        remove_name_from_subject(&mut indexes.group_subjects, group, name);
                    }
                }
            }
            // previously known names may have no record left (an invalidation
            // cleared it), but their watchers still need the removal
            stale
                .into_iter()
                .chain(
                    indexes
                        .all_known_names
                        .difference(new_names)
                        .cloned(),
                )
                .collect()
        };

        let empty = HashSet::new();
        for name in &purged {
            self.notify_watchers(name, &empty, &empty);
        }
    }

    /// The names this user may see: the union of their user record and each
    /// of their group records.
    pub fn list_names(&self, user: &str, groups: &[String]) -> HashSet<String> {
        let indexes = self.indexes.read();
        let mut names = HashSet::new();
        if let Some(record) = indexes.user_subjects.get(user) {
            names.extend(record.iter().cloned());
        }
        for group in groups {
            if let Some(record) = indexes.group_subjects.get(group) {
                names.extend(record.iter().cloned());
            }
        }
        names
    }

    /// Registers a watch for this user and returns the event stream.
    ///
    /// The priming burst (when the client asked for everything existing) is
    /// snapshotted and enqueued under the same lock the fan-out takes, so it
    /// and all later live events are linearized.
    pub fn watch(
        self: &Arc<Self>,
        user: &UserInfo,
        allowed_names: HashSet<String>,
        include_all_existing: bool,
        convert: ConvertResource,
    ) -> mpsc::Receiver<WatchEvent> {
        let (incoming_tx, mut incoming_rx) = mpsc::channel::<WatchEvent>(INCOMING_BUFFER);
        let (outgoing_tx, outgoing_rx) = mpsc::channel::<WatchEvent>(OUTGOING_BUFFER);
        let watcher = Arc::new(CacheWatcher::new(user, allowed_names, convert));
        let id = self.next_watcher_id.fetch_add(1, Ordering::SeqCst);

        {
            let mut watchers = self.watchers.lock();
            if include_all_existing {
                let entitled = self.list_names(&user.name, &user.groups);
                for event in watcher.initial_events(&entitled) {
                    if incoming_tx.try_send(event).is_err() {
                        warn!(
                            "{}/{}: initial watch burst overflowed for user {:?}",
                            self.group, self.resource, user.name
                        );
                        break;
                    }
                }
            }
            watchers.insert(
                id,
                WatcherEntry {
                    watcher,
                    sender: incoming_tx,
                },
            );
        }
        self.watcher_registered.store(true, Ordering::SeqCst);
        debug!(
            "{}/{}: watcher {} registered for user {:?}",
            self.group, self.resource, id, user.name
        );

        let cache = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = incoming_rx.recv().await {
                if outgoing_tx.send(event).await.is_err() {
                    // client went away
                    break;
                }
            }
            cache.remove_watcher(id);
        });

        outgoing_rx
    }

    pub fn remove_watcher(&self, id: u64) {
        if self.watchers.lock().remove(&id).is_some() {
            debug!("{}/{}: watcher {} removed", self.group, self.resource, id);
        }
    }

    pub fn watcher_count(&self) -> usize {
        self.watchers.lock().len()
    }

    /// Fans one membership change out to every registered watcher. Holds the
    /// watcher lock only to enqueue; a full or closed buffer drops that
    /// watcher so one slow client cannot stall the synchronizer.
    fn notify_watchers(&self, name: &str, users: &HashSet<String>, groups: &HashSet<String>) {
        let mut watchers = self.watchers.lock();
        let mut dead = Vec::new();
        for (id, entry) in watchers.iter() {
            let Some(event) = entry.watcher.group_membership_changed(name, users, groups) else {
                continue;
            };
            match entry.sender.try_send(event) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(
                        "{}/{}: watcher {} buffer full, dropping watch",
                        self.group, self.resource, id
                    );
                    dead.push(*id);
                }
                Err(TrySendError::Closed(_)) => dead.push(*id),
            }
        }
        for id in dead {
            watchers.remove(&id);
        }
    }

    /// Starts the synchronization loop. The first cycle runs immediately so
    /// callers observe a populated cache shortly after startup.
    pub fn run(self: Arc<Self>, period: Duration) -> tokio::task::JoinHandle<()> {
        info!(
            "{}/{}: starting synchronization every {:?}",
            self.group, self.resource, period
        );
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.synchronize();
            }
        })
    }
}

fn remove_name_from_subject(
    subjects: &mut HashMap<String, HashSet<String>>,
    subject: &str,
    name: &str,
) {
    if let Some(names) = subjects.get_mut(subject) {
        names.remove(name);
        // an empty record means the subject sees nothing and is dropped
        if names.is_empty() {
            subjects.remove(subject);
        }
    }
}

/// Builds the record to cache for a processed request, keeping the version
/// observations from the prior record so partial triggers don't lose history.
fn merge_review_record(
    request: &ReviewRequest,
    last_known: Option<&ReviewRecord>,
    users: &[String],
    groups: &[String],
) -> ReviewRecord {
    let mut record = ReviewRecord {
        name: request.name.clone(),
        resource_version: String::new(),
        role_uid_to_resource_version: HashMap::new(),
        role_binding_uid_to_resource_version: HashMap::new(),
        users: users.to_vec(),
        groups: groups.to_vec(),
    };

    if let Some(last) = last_known {
        record.resource_version = last.resource_version.clone();
        record
            .role_uid_to_resource_version
            .extend(last.role_uid_to_resource_version.clone());
        record
            .role_binding_uid_to_resource_version
            .extend(last.role_binding_uid_to_resource_version.clone());
    }

    if !request.resource_version.is_empty() {
        record.resource_version = request.resource_version.clone();
    }
    record
        .role_uid_to_resource_version
        .extend(request.role_uid_to_resource_version.clone());
    record
        .role_binding_uid_to_resource_version
        .extend(request.role_binding_uid_to_resource_version.clone());

    record
}

/// True when the cached record already reflects every version observation the
/// request carries, so re-reviewing would yield the same answer.
fn skip_review(request: &ReviewRequest, last_known: Option<&ReviewRecord>) -> bool {
    let Some(last) = last_known else {
        return false;
    };
    if request.name != last.name {
        return false;
    }
    if !request.resource_version.is_empty() && request.resource_version != last.resource_version {
        return false;
    }
    for (uid, rv) in &request.role_binding_uid_to_resource_version {
        if last.role_binding_uid_to_resource_version.get(uid) != Some(rv) {
            return false;
        }
    }
    for (uid, rv) in &request.role_uid_to_resource_version {
        if last.role_uid_to_resource_version.get(uid) != Some(rv) {
            return false;
        }
    }
    true
}

/// The names a role grants for the kind, plus whether it grants the whole
/// kind with no name restriction.
fn resource_names_from_cluster_role(
    role: &ClusterRole,
    group: &str,
    resource: &str,
) -> (HashSet<String>, bool) {
    let mut names = HashSet::new();
    let mut all = false;
    for rule in role.rules.as_deref().unwrap_or_default() {
        if !rbac::api_group_matches(rule, group) {
            continue;
        }
        if !rbac::resource_matches(rule, resource, "") {
            continue;
        }
        match rule.resource_names.as_deref() {
            None => all = true,
            Some(resource_names) if resource_names.is_empty() => all = true,
            Some(resource_names) => names.extend(resource_names.iter().cloned()),
        }
    }
    (names, all)
}
