use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use kube::config::{KubeConfigOptions, Kubeconfig};

/// Serves ManagedCluster and ManagedClusterSet lists filtered to what each
/// caller may see under RBAC.
#[derive(Parser, Debug, Clone)]
#[command(name = "clusterset-server")]
pub struct Args {
    /// Kubernetes configuration file to connect to kube-apiserver; in-cluster
    /// or environment configuration is used when omitted
    #[arg(long = "kube-config-file", value_name = "PATH")]
    pub kube_config_file: Option<PathBuf>,

    /// Address to serve on
    #[arg(long = "bind-addr", default_value = "0.0.0.0:8443")]
    pub bind_addr: SocketAddr,

    /// How often to resynchronize the authorization caches, in seconds
    #[arg(long = "sync-period-seconds", default_value_t = 600)]
    pub sync_period_seconds: u64,

    /// User granted access in every review, regardless of policy
    #[arg(long = "super-user")]
    pub super_user: Option<String>,
}

impl Args {
    pub fn validate(&self) -> Result<()> {
        if self.sync_period_seconds == 0 {
            bail!("--sync-period-seconds must be greater than 0");
        }
        Ok(())
    }

    pub fn sync_period(&self) -> Duration {
        Duration::from_secs(self.sync_period_seconds)
    }

    pub async fn kube_client(&self) -> Result<kube::Client> {
        let config = match &self.kube_config_file {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path)
                    .with_context(|| format!("reading kubeconfig {:?}", path))?;
                kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await
                    .context("loading kubeconfig")?
            }
            None => kube::Config::infer().await.context("inferring kube config")?,
        };
        kube::Client::try_from(config).context("building kube client")
    }
}
