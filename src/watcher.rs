use std::collections::HashSet;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::types::UserInfo;

/// How many cache notifications may queue up for one client before the
/// watcher is dropped and the client has to re-list.
pub const INCOMING_BUFFER: usize = 1000;

/// Outbound buffer between the watcher task and the HTTP response body.
pub const OUTGOING_BUFFER: usize = 100;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Added,
    Modified,
    Deleted,
    Error,
}

/// One frame of a watch stream, shaped like the Kubernetes watch protocol.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct WatchEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub object: serde_json::Value,
}

/// Materializes the full object for a name, used when turning a visibility
/// change into a streamable event.
pub type ConvertResource = Box<dyn Fn(&str) -> serde_json::Value + Send + Sync>;

/// Per-client view of one AuthCache.
///
/// The cache fan-out calls [`CacheWatcher::group_membership_changed`] under
/// its watcher lock; everything here is quick, lock-scoped bookkeeping that
/// turns subject-set changes into ADDED/DELETED events for exactly this
/// client.
pub struct CacheWatcher {
    username: String,
    groups: Vec<String>,
    // names the client's scopes allow, possibly the "*" wildcard
    allowed_names: HashSet<String>,
    // names this client currently observes as existing
    visible: Mutex<HashSet<String>>,
    convert: ConvertResource,
}

impl CacheWatcher {
    pub fn new(user: &UserInfo, allowed_names: HashSet<String>, convert: ConvertResource) -> Self {
        Self {
            username: user.name.clone(),
            groups: user.groups.clone(),
            allowed_names,
            visible: Mutex::new(HashSet::new()),
            convert,
        }
    }

    fn allows(&self, name: &str) -> bool {
        self.allowed_names.contains(crate::scope::ALL_NAMESPACES)
            || self.allowed_names.contains(name)
    }

    /// The priming burst: one ADDED per name the user is entitled to right
    /// now, filtered by scope. Sorted so the stream is deterministic.
    pub(crate) fn initial_events(&self, entitled: &HashSet<String>) -> Vec<WatchEvent> {
        let mut names: Vec<&String> = entitled.iter().filter(|n| self.allows(n)).collect();
        names.sort();

        let mut visible = self.visible.lock();
        names
            .into_iter()
            .map(|name| {
                visible.insert(name.clone());
                WatchEvent {
                    event_type: EventType::Added,
                    object: (self.convert)(name),
                }
            })
            .collect()
    }

    /// Converts one cache notification into at most one event for this
    /// client, tracking which names the client has already seen.
    pub(crate) fn group_membership_changed(
        &self,
        name: &str,
        users: &HashSet<String>,
        groups: &HashSet<String>,
    ) -> Option<WatchEvent> {
        if !self.allows(name) {
            return None;
        }

        let has_access =
            users.contains(&self.username) || self.groups.iter().any(|g| groups.contains(g));

        let mut visible = self.visible.lock();
        match (visible.contains(name), has_access) {
            // membership may have shifted, but the object neither appeared
            // nor disappeared for this client
            (true, true) | (false, false) => None,
            (false, true) => {
                visible.insert(name.to_string());
                Some(WatchEvent {
                    event_type: EventType::Added,
                    object: (self.convert)(name),
                })
            }
            (true, false) => {
                visible.remove(name);
                Some(WatchEvent {
                    event_type: EventType::Deleted,
                    object: (self.convert)(name),
                })
            }
        }
    }
}
