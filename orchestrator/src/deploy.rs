use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use comms::RemoteShell;
use log::{info, warn};

use crate::{
    cloud::{Cloud, LaunchRequest, SecurityGroup},
    configs::{Adapter, DeployConfig},
    error::{OrchestratorError, Result},
    manifest::Manifest,
    report::HostReport,
};

const GROUP_DESCRIPTION: &str = "easydist security group";

/// Where a deployment is in its lifecycle. States only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DeployState {
    Unprovisioned,
    SecurityGroupReady,
    KeyReady,
    InstancesLaunching,
    InstancesRunning,
    ManifestWritten,
    Terminated,
}

/// Provisions, reaches and tears down the machines of one experiment.
///
/// The first machine is always the parameter server, the rest are workers.
pub struct Deployment<C: Cloud, S: RemoteShell> {
    config: DeployConfig,
    cloud: C,
    shell: S,
    state: DeployState,
    security_group: Option<SecurityGroup>,
    manifest: Option<Manifest>,
}

impl<C: Cloud, S: RemoteShell> Deployment<C, S> {
    /// Creates a new `Deployment` with nothing provisioned yet.
    ///
    /// # Errors
    /// `OrchestratorError::InvalidConfig` if the config is invalid.
    pub fn new(config: DeployConfig, cloud: C, shell: S) -> Result<Self> {
        Adapter::new().validate_deploy(&config)?;

        Ok(Self {
            config,
            cloud,
            shell,
            state: DeployState::Unprovisioned,
            security_group: None,
            manifest: None,
        })
    }

    /// Picks up a deployment whose manifest was written by an earlier `launch`.
    ///
    /// # Errors
    /// `OrchestratorError::InvalidManifest` if the manifest can't be read.
    pub async fn resume(config: DeployConfig, cloud: C, shell: S) -> Result<Self> {
        let mut deployment = Self::new(config, cloud, shell)?;
        let manifest = Manifest::read(&deployment.config.manifest_path()).await?;

        deployment.manifest = Some(manifest);
        deployment.state = DeployState::ManifestWritten;
        Ok(deployment)
    }

    pub fn state(&self) -> DeployState {
        self.state
    }

    pub fn config(&self) -> &DeployConfig {
        &self.config
    }

    pub fn cloud(&self) -> &C {
        &self.cloud
    }

    pub fn shell(&self) -> &S {
        &self.shell
    }

    pub fn manifest(&self) -> Option<&Manifest> {
        self.manifest.as_ref()
    }

    fn advance(&mut self, to: DeployState) {
        if to > self.state {
            self.state = to;
        }
    }

    fn require(&self, operation: &'static str, allowed: bool) -> Result<()> {
        if allowed {
            Ok(())
        } else {
            Err(OrchestratorError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    fn require_manifest(&self, operation: &'static str) -> Result<&Manifest> {
        match (&self.manifest, self.state) {
            (Some(manifest), DeployState::ManifestWritten) => Ok(manifest),
            _ => Err(OrchestratorError::InvalidState {
                operation,
                state: self.state,
            }),
        }
    }

    // -------------------------------------------------------------------------
    // Setup
    // -------------------------------------------------------------------------

    /// Reuses the security group with the configured name or creates it, open to
    /// all inbound traffic.
    pub async fn ensure_security_group(&mut self) -> Result<SecurityGroup> {
        self.require(
            "ensure the security group",
            self.state != DeployState::Terminated,
        )?;

        let name = self.config.security_group.clone();
        let group = match self.cloud.find_security_group(&name).await? {
            Some(group) => {
                info!(group = group.id.as_str(); "reusing security group {name}");
                group
            }
            None => {
                info!("creating security group {name}");
                let group = self.cloud.create_security_group(&name, GROUP_DESCRIPTION).await?;
                self.cloud.authorize_all_ingress(&group.id).await?;
                group
            }
        };

        self.security_group = Some(group.clone());
        self.advance(DeployState::SecurityGroupReady);
        Ok(group)
    }

    /// Makes sure the key file exists locally and its key pair exists in the cloud.
    ///
    /// An existing key file is left untouched. A missing one means the private key
    /// is lost, so a same-named key pair in the cloud is deleted and recreated.
    pub async fn ensure_key(&mut self) -> Result<()> {
        self.require(
            "ensure the key pair",
            self.state >= DeployState::SecurityGroupReady && self.state != DeployState::Terminated,
        )?;

        let key_path = self.config.ssh.key_path.clone();
        let key_name = self.config.key_name.clone();

        if tokio::fs::try_exists(&key_path).await? {
            info!("reusing key file {}", key_path.display());
            self.advance(DeployState::KeyReady);
            return Ok(());
        }

        if self.cloud.key_pair_exists(&key_name).await? {
            warn!(
                "key pair {key_name} exists but {} is missing, recreating it; \
                 copies of the old key held elsewhere stop working",
                key_path.display()
            );
            self.cloud.delete_key_pair(&key_name).await?;
        }

        let material = self.cloud.create_key_pair(&key_name).await?;
        write_private_key(&key_path, &material).await?;

        info!("created key pair {key_name} at {}", key_path.display());
        self.advance(DeployState::KeyReady);
        Ok(())
    }

    /// Launches the parameter server and the workers, waits for all of them and
    /// writes the manifest.
    ///
    /// Resources created before a failure are left in place.
    ///
    /// # Returns
    /// The written manifest.
    pub async fn launch(&mut self) -> Result<&Manifest> {
        self.require("launch", self.state < DeployState::InstancesLaunching)?;

        let group = self.ensure_security_group().await?;
        self.ensure_key().await?;

        let image_id = self.cloud.latest_image(&self.config.ami_filter).await?;
        self.advance(DeployState::InstancesLaunching);

        let ps_request = LaunchRequest {
            image_id: image_id.clone(),
            instance_type: self.config.ps_type.clone(),
            count: 1,
            security_group_id: group.id.clone(),
            key_name: self.config.key_name.clone(),
            iam_profile: self.config.iam_role.clone(),
            volume_size: None,
        };
        let worker_request = LaunchRequest {
            image_id,
            instance_type: self.config.worker_type.clone(),
            count: self.config.worker_num,
            volume_size: Some(self.config.worker_size),
            ..ps_request.clone()
        };

        info!(instance_type = ps_request.instance_type.as_str(); "launching the parameter server");
        let mut ids = self.cloud.run_instances(&ps_request).await?;

        info!(
            instance_type = worker_request.instance_type.as_str(), workers = worker_request.count;
            "launching workers"
        );
        ids.extend(self.cloud.run_instances(&worker_request).await?);

        info!("waiting until {} instance(s) are running", ids.len());
        self.cloud.wait_until_running(&ids).await?;
        self.advance(DeployState::InstancesRunning);

        let mut by_id: HashMap<_, _> = self.cloud.public_addresses(&ids).await?.into_iter().collect();
        let addresses = ids
            .iter()
            .map(|id| {
                by_id
                    .remove(id)
                    .filter(|address| !address.is_empty())
                    .ok_or_else(|| {
                        OrchestratorError::Cloud(format!("instance {id} has no public address"))
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        self.write_manifest(ids, addresses).await
    }

    /// Records the given machines as this experiment's cluster.
    pub async fn write_manifest(
        &mut self,
        instance_ids: Vec<String>,
        addresses: Vec<String>,
    ) -> Result<&Manifest> {
        self.require("write the manifest", self.state != DeployState::Terminated)?;

        let manifest = Manifest::new(instance_ids, addresses)?;
        let path = self.config.manifest_path();
        manifest.write(&path).await?;
        info!("wrote manifest {}", path.display());

        self.advance(DeployState::ManifestWritten);
        Ok(self.manifest.insert(manifest))
    }

    // -------------------------------------------------------------------------
    // Running cluster
    // -------------------------------------------------------------------------

    /// Opens an interactive shell on the parameter server.
    pub async fn login(&self) -> Result<()> {
        let manifest = self.require_manifest("log in")?;
        self.shell.login(manifest.parameter_server()).await?;
        Ok(())
    }

    /// Copies the key directory, the manifest and the configured extra files to
    /// every machine of the cluster.
    ///
    /// # Returns
    /// Which machines received the files.
    pub async fn transfer(&self) -> Result<HostReport> {
        let manifest = self.require_manifest("transfer files")?;

        let mut sources = vec![key_dir(&self.config.ssh.key_path), self.config.manifest_path()];
        sources.extend(self.config.transfer_files.iter().cloned());

        let mut report = HostReport::new();
        for host in manifest.addresses() {
            let output = self.shell.copy_to(host, &sources, ".", true).await?;
            if output.success() {
                info!(host = host.as_str(); "transferred files");
            } else {
                warn!(host = host.as_str(); "failed to transfer files: {}", output.stderr.trim());
            }
            report.record(host, output.success());
        }

        Ok(report)
    }

    /// Terminates every machine and waits until they are gone.
    pub async fn terminate(&mut self) -> Result<()> {
        let ids = self.require_manifest("terminate")?.instance_ids().to_vec();

        info!("terminating {} instance(s)", ids.len());
        self.cloud.terminate_instances(&ids).await?;
        self.cloud.wait_until_terminated(&ids).await?;
        info!("all instances terminated");

        self.advance(DeployState::Terminated);
        Ok(())
    }
}

/// The directory holding the key file, or the file itself if it has no parent.
fn key_dir(key_path: &Path) -> PathBuf {
    match key_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => key_path.to_path_buf(),
    }
}

async fn write_private_key(path: &Path, material: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, material).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    }

    Ok(())
}
