use std::collections::{BTreeMap, HashMap};

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A ManagedCluster represents a cluster joined to the hub. Only the fields
/// the filter server serves back are modeled; the spec is owned upstream.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "cluster.open-cluster-management.io",
    version = "v1",
    kind = "ManagedCluster",
    plural = "managedclusters"
)]
#[serde(rename_all = "camelCase")]
pub struct ManagedClusterSpec {
    /// Whether the hub has accepted the cluster's join request
    #[serde(default)]
    pub hub_accepts_client: bool,

    /// Endpoints the hub may use to reach the cluster's apiserver
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub managed_cluster_client_configs: Vec<ClientConfig>,

    /// Lease renewal period for the cluster's agent, in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_duration_seconds: Option<i32>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_bundle: Option<String>,
}

/// A ManagedClusterSet groups managed clusters; membership is expressed on
/// the clusters themselves, so the set spec carries nothing yet.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "cluster.open-cluster-management.io",
    version = "v1alpha1",
    kind = "ManagedClusterSet",
    plural = "managedclustersets"
)]
#[serde(rename_all = "camelCase")]
pub struct ManagedClusterSetSpec {}

/// The authenticated identity of a request, as delivered by the delegating
/// front proxy.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UserInfo {
    pub name: String,
    pub groups: Vec<String>,
    pub extra: HashMap<String, Vec<String>>,
}

impl UserInfo {
    pub fn new(name: &str, groups: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            groups: groups.iter().map(|g| g.to_string()).collect(),
            extra: HashMap::new(),
        }
    }

    pub fn scopes(&self) -> &[String] {
        self.extra
            .get(crate::scope::SCOPES_KEY)
            .map(|v| v.as_slice())
            .unwrap_or_default()
    }
}

/// One of the cluster-scoped kinds this server fronts.
pub trait TargetResource: Clone + Serialize + Send + Sync + 'static {
    const GROUP: &'static str;
    const VERSION: &'static str;
    const KIND: &'static str;
    const RESOURCE: &'static str;

    fn name(&self) -> &str;
    fn resource_version(&self) -> &str;
    fn labels(&self) -> Option<&BTreeMap<String, String>>;
    /// A metadata-only stand-in for an object already deleted upstream
    fn synthetic(name: &str) -> Self;

    fn api_version() -> String {
        format!("{}/{}", Self::GROUP, Self::VERSION)
    }
}

impl TargetResource for ManagedCluster {
    const GROUP: &'static str = "cluster.open-cluster-management.io";
    const VERSION: &'static str = "v1";
    const KIND: &'static str = "ManagedCluster";
    const RESOURCE: &'static str = "managedclusters";

    fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    fn resource_version(&self) -> &str {
        self.metadata.resource_version.as_deref().unwrap_or_default()
    }

    fn labels(&self) -> Option<&BTreeMap<String, String>> {
        self.metadata.labels.as_ref()
    }

    fn synthetic(name: &str) -> Self {
        ManagedCluster::new(name, ManagedClusterSpec::default())
    }
}

impl TargetResource for ManagedClusterSet {
    const GROUP: &'static str = "cluster.open-cluster-management.io";
    const VERSION: &'static str = "v1alpha1";
    const KIND: &'static str = "ManagedClusterSet";
    const RESOURCE: &'static str = "managedclustersets";

    fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    fn resource_version(&self) -> &str {
        self.metadata.resource_version.as_deref().unwrap_or_default()
    }

    fn labels(&self) -> Option<&BTreeMap<String, String>> {
        self.metadata.labels.as_ref()
    }

    fn synthetic(name: &str) -> Self {
        ManagedClusterSet::new(name, ManagedClusterSetSpec::default())
    }
}
