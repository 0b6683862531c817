use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::StreamExt;
use k8s_openapi::api::rbac::v1::ClusterRole;
use kube::Api;
use log::*;
use serde::Deserialize;
use tokio_stream::wrappers::ReceiverStream;

use crate::cluster_cache::ResourceCache;
use crate::errors::ApiError;
use crate::scope;
use crate::selector::LabelSelector;
use crate::store::Store;
use crate::types::{ManagedCluster, ManagedClusterSet, TargetResource, UserInfo};

/// Identity headers set by the delegating front proxy.
const USER_HEADER: &str = "x-remote-user";
const GROUP_HEADER: &str = "x-remote-group";
const EXTRA_HEADER_PREFIX: &str = "x-remote-extra-";

#[derive(Clone)]
pub struct ApiState {
    pub clusters: Arc<ResourceCache<ManagedCluster>>,
    pub cluster_sets: Arc<ResourceCache<ManagedClusterSet>>,
    pub cluster_roles: Arc<Store<ClusterRole>>,
    pub client: kube::Client,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route(
            "/apis/cluster.open-cluster-management.io/v1/managedclusters",
            get(list_or_watch_clusters),
        )
        .route(
            "/apis/cluster.open-cluster-management.io/v1/managedclusters/:name",
            get(get_cluster),
        )
        .route(
            "/apis/cluster.open-cluster-management.io/v1alpha1/managedclustersets",
            get(list_or_watch_cluster_sets),
        )
        .route(
            "/apis/cluster.open-cluster-management.io/v1alpha1/managedclustersets/:name",
            get(get_cluster_set),
        )
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    watch: Option<String>,
    #[serde(default, rename = "resourceVersion")]
    resource_version: Option<String>,
    #[serde(default, rename = "labelSelector")]
    label_selector: Option<String>,
}

impl ListQuery {
    fn is_watch(&self) -> bool {
        matches!(self.watch.as_deref(), Some("true") | Some("1"))
    }
}

/// Reconstructs the caller identity from the front-proxy headers. A request
/// without one cannot be ACLed and is rejected.
pub fn user_from_headers(headers: &HeaderMap) -> Result<UserInfo, ApiError> {
    let name = headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::Forbidden("no user on request".to_string()))?
        .to_string();

    let groups = headers
        .get_all(GROUP_HEADER)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(|v| v.to_string())
        .collect();

    let mut user = UserInfo {
        name,
        groups,
        extra: Default::default(),
    };
    for (header_name, value) in headers.iter() {
        let Some(key) = header_name.as_str().strip_prefix(EXTRA_HEADER_PREFIX) else {
            continue;
        };
        let Ok(value) = value.to_str() else { continue };
        user.extra
            .entry(key.to_string())
            .or_default()
            .push(value.to_string());
    }

    Ok(user)
}

async fn list_or_watch_clusters(
    State(state): State<ApiState>,
    Query(query): Query<ListQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    list_or_watch(&state.clusters, &state.cluster_roles, &headers, &query)
}

async fn list_or_watch_cluster_sets(
    State(state): State<ApiState>,
    Query(query): Query<ListQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    list_or_watch(&state.cluster_sets, &state.cluster_roles, &headers, &query)
}

fn list_or_watch<T: TargetResource>(
    cache: &Arc<ResourceCache<T>>,
    cluster_roles: &Store<ClusterRole>,
    headers: &HeaderMap,
    query: &ListQuery,
) -> Result<Response, ApiError> {
    let user = user_from_headers(headers)?;

    if query.is_watch() {
        return watch(cache, cluster_roles, &user, query);
    }

    let selector = LabelSelector::parse(query.label_selector.as_deref().unwrap_or_default())
        .map_err(|err| ApiError::BadRequest(err.to_string()))?;

    debug!("{} list for user {:?}", T::RESOURCE, user.name);
    let items: Vec<serde_json::Value> = cache
        .list(&user, &selector)
        .iter()
        .filter_map(|obj| serde_json::to_value(obj.as_ref()).ok())
        .collect();

    let body = serde_json::json!({
        "apiVersion": T::api_version(),
        "kind": format!("{}List", T::KIND),
        "metadata": {},
        "items": items,
    });
    Ok(Json(body).into_response())
}

fn watch<T: TargetResource>(
    cache: &Arc<ResourceCache<T>>,
    cluster_roles: &Store<ClusterRole>,
    user: &UserInfo,
    query: &ListQuery,
) -> Result<Response, ApiError> {
    // scopes narrow which names this token may see before any RBAC filtering
    let (allowed_names, errors) =
        scope::scopes_to_visible_namespaces(user.scopes(), cluster_roles, true);
    if !errors.is_empty() {
        return Err(ApiError::Internal(errors.join("; ")));
    }

    let include_all_existing = query.resource_version.as_deref() == Some("0");
    debug!(
        "{} watch for user {:?} (initial burst: {})",
        T::RESOURCE,
        user.name,
        include_all_existing
    );

    let receiver = cache.watch(user, allowed_names, include_all_existing);
    let stream = ReceiverStream::new(receiver).map(|event| {
        let mut frame = serde_json::to_vec(&event).unwrap_or_default();
        frame.push(b'\n');
        Ok::<_, std::convert::Infallible>(Bytes::from(frame))
    });

    Response::builder()
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from_stream(stream))
        .map_err(|err| ApiError::Internal(err.to_string()))
}

async fn get_cluster(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ManagedCluster>, ApiError> {
    let _user = user_from_headers(&headers)?;
    let api: Api<ManagedCluster> = Api::all(state.client.clone());
    Ok(Json(api.get(&name).await?))
}

async fn get_cluster_set(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ManagedClusterSet>, ApiError> {
    let _user = user_from_headers(&headers)?;
    let api: Api<ManagedClusterSet> = Api::all(state.client.clone());
    Ok(Json(api.get(&name).await?))
}
