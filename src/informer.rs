use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use futures::{StreamExt, TryStreamExt};
use kube::api::{Api, ListParams, WatchEvent, WatchParams};
use kube::ResourceExt;
use log::*;
use serde::de::DeserializeOwned;

const RELIST_DELAY: Duration = Duration::from_secs(5);

/// Keeps one store synchronized with the cluster through a list+watch loop,
/// the stand-in for a shared informer. Restarted from a fresh LIST whenever
/// the watch stream drops.
pub fn start<K>(
    api: Api<K>,
    store: Arc<crate::store::Store<K>>,
    kind: &'static str,
) -> tokio::task::JoinHandle<()>
where
    K: kube::Resource<DynamicType = ()>
        + Clone
        + DeserializeOwned
        + Debug
        + Send
        + Sync
        + 'static,
{
    tokio::spawn(async move {
        loop {
            if let Err(err) = list_and_watch(&api, &store, kind).await {
                warn!("{}: list/watch interrupted: {}", kind, err);
            }
            tokio::time::sleep(RELIST_DELAY).await;
        }
    })
}

async fn list_and_watch<K>(
    api: &Api<K>,
    store: &crate::store::Store<K>,
    kind: &'static str,
) -> Result<()>
where
    K: kube::Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync,
{
    let list = api.list(&ListParams::default()).await?;
    let resource_version = list.metadata.resource_version.clone().unwrap_or_default();
    store.replace(
        list.items
            .into_iter()
            .map(|obj| (obj.name_any(), obj))
            .collect(),
        resource_version.clone(),
    );
    debug!(
        "{}: listed {} objects at resource version {:?}",
        kind,
        store.len(),
        resource_version
    );

    let params = WatchParams::default();
    let mut stream = api.watch(&params, &resource_version).await?.boxed();
    while let Some(event) = stream.try_next().await? {
        match event {
            WatchEvent::Added(obj) | WatchEvent::Modified(obj) => {
                let rv = obj.resource_version();
                store.apply(obj.name_any(), obj, rv);
            }
            WatchEvent::Deleted(obj) => {
                store.delete(&obj.name_any(), obj.resource_version());
            }
            WatchEvent::Bookmark(bookmark) => {
                store.set_resource_version(bookmark.metadata.resource_version.clone());
            }
            WatchEvent::Error(status) => {
                return Err(anyhow!("watch error {}: {}", status.code, status.message));
            }
        }
    }

    // the server closed the stream; the caller relists
    Ok(())
}
