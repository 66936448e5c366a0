mod aws;
mod mock;

use async_trait::async_trait;

pub use aws::AwsCli;
pub use mock::{InstanceState, MockCloud};

use crate::error::Result;

/// A firewall group the cluster machines are launched in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityGroup {
    pub id: String,
    pub name: String,
}

/// A request to launch `count` identical machines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub image_id: String,
    pub instance_type: String,
    pub count: usize,
    pub security_group_id: String,
    pub key_name: String,
    pub iam_profile: String,
    /// Root volume size in GiB, the image default if `None`.
    pub volume_size: Option<u32>,
}

/// The cloud provider the cluster is provisioned on.
///
/// Every call is a single request against the provider; nothing is retried.
#[async_trait]
pub trait Cloud: Send + Sync {
    /// Looks up a security group by name.
    async fn find_security_group(&self, name: &str) -> Result<Option<SecurityGroup>>;

    async fn create_security_group(&self, name: &str, description: &str) -> Result<SecurityGroup>;

    /// Opens every protocol and port of the group to every address.
    async fn authorize_all_ingress(&self, group_id: &str) -> Result<()>;

    async fn key_pair_exists(&self, name: &str) -> Result<bool>;

    async fn delete_key_pair(&self, name: &str) -> Result<()>;

    /// Creates a key pair.
    ///
    /// # Returns
    /// The private key material, the only copy there will ever be.
    async fn create_key_pair(&self, name: &str) -> Result<String>;

    /// The most recently created image whose name matches `name_filter`.
    async fn latest_image(&self, name_filter: &str) -> Result<String>;

    /// Launches machines.
    ///
    /// # Returns
    /// The instance ids, in launch order.
    async fn run_instances(&self, request: &LaunchRequest) -> Result<Vec<String>>;

    async fn wait_until_running(&self, ids: &[String]) -> Result<()>;

    /// The public DNS name of every instance, as `(id, address)` pairs.
    async fn public_addresses(&self, ids: &[String]) -> Result<Vec<(String, String)>>;

    async fn terminate_instances(&self, ids: &[String]) -> Result<()>;

    async fn wait_until_terminated(&self, ids: &[String]) -> Result<()>;
}
