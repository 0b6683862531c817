use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding};
use kube::Api;
use log::*;
use tokio::net::TcpListener;

use clusterset_server::cluster_cache::ResourceCache;
use clusterset_server::config::Args;
use clusterset_server::handlers::{self, ApiState};
use clusterset_server::informer;
use clusterset_server::reviewer::{Reviewer, SubjectAccessReviewer};
use clusterset_server::store::Store;
use clusterset_server::subject_locator::SubjectAccessEvaluator;
use clusterset_server::types::{ManagedCluster, ManagedClusterSet};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();
    args.validate()?;

    info!("starting clusterset-server on {}", args.bind_addr);
    let client = args.kube_client().await?;

    let cluster_roles = Arc::new(Store::<ClusterRole>::new());
    let cluster_role_bindings = Arc::new(Store::<ClusterRoleBinding>::new());
    let clusters = Arc::new(Store::<ManagedCluster>::new());
    let cluster_sets = Arc::new(Store::<ManagedClusterSet>::new());

    let _informers = [
        informer::start(
            Api::<ClusterRole>::all(client.clone()),
            cluster_roles.clone(),
            "clusterroles",
        ),
        informer::start(
            Api::<ClusterRoleBinding>::all(client.clone()),
            cluster_role_bindings.clone(),
            "clusterrolebindings",
        ),
        informer::start(
            Api::<ManagedCluster>::all(client.clone()),
            clusters.clone(),
            "managedclusters",
        ),
        informer::start(
            Api::<ManagedClusterSet>::all(client.clone()),
            cluster_sets.clone(),
            "managedclustersets",
        ),
    ];

    let evaluator = Arc::new(SubjectAccessEvaluator::new(
        cluster_roles.clone(),
        cluster_role_bindings.clone(),
        args.super_user.clone(),
    ));
    let reviewer: Arc<dyn Reviewer> = Arc::new(SubjectAccessReviewer::new(evaluator));

    let cluster_cache = Arc::new(ResourceCache::new(
        reviewer.clone(),
        clusters,
        cluster_roles.clone(),
        cluster_role_bindings.clone(),
    ));
    let cluster_set_cache = Arc::new(ResourceCache::new(
        reviewer,
        cluster_sets,
        cluster_roles.clone(),
        cluster_role_bindings,
    ));

    let _cluster_sync = cluster_cache.run(args.sync_period());
    let _cluster_set_sync = cluster_set_cache.run(args.sync_period());

    let app = handlers::router(ApiState {
        clusters: cluster_cache,
        cluster_sets: cluster_set_cache,
        cluster_roles,
        client,
    });

    let listener = TcpListener::bind(args.bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await?;

    Ok(())
}
