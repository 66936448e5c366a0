use std::path::Path;

use crate::error::{OrchestratorError, Result};

/// The provisioned machines of a cluster, in provisioning order.
///
/// The first machine is the parameter server, the rest are workers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    instance_ids: Vec<String>,
    addresses: Vec<String>,
}

impl Manifest {
    /// Creates a new `Manifest`.
    ///
    /// # Errors
    /// `OrchestratorError::InvalidManifest` if there are no machines or the ids and
    /// addresses don't pair up.
    pub fn new(instance_ids: Vec<String>, addresses: Vec<String>) -> Result<Self> {
        if addresses.is_empty() {
            return Err(OrchestratorError::InvalidManifest(
                "the manifest lists no machines".into(),
            ));
        }
        if instance_ids.len() != addresses.len() {
            return Err(OrchestratorError::InvalidManifest(format!(
                "{} instance id(s) for {} address(es)",
                instance_ids.len(),
                addresses.len()
            )));
        }

        Ok(Self {
            instance_ids,
            addresses,
        })
    }

    /// Parses the two line manifest format: instance ids, then addresses, each
    /// space separated.
    pub fn parse(contents: &str) -> Result<Self> {
        let lines: Vec<&str> = contents.lines().collect();
        let [ids, addresses] = lines.as_slice() else {
            return Err(OrchestratorError::InvalidManifest(format!(
                "expected 2 lines, found {}",
                lines.len()
            )));
        };

        let split = |line: &str| -> Vec<String> {
            line.split_whitespace().map(str::to_string).collect()
        };
        Self::new(split(*ids), split(*addresses))
    }

    /// Renders the manifest, every line joined by a single space and newline terminated.
    pub fn render(&self) -> String {
        format!(
            "{}\n{}\n",
            self.instance_ids.join(" "),
            self.addresses.join(" ")
        )
    }

    /// Reads a manifest file.
    pub async fn read(path: &Path) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
            OrchestratorError::InvalidManifest(format!("cannot read '{}': {e}", path.display()))
        })?;
        Self::parse(&contents)
    }

    /// Writes the manifest to `path`, creating parent directories.
    pub async fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, self.render()).await?;
        Ok(())
    }

    pub fn instance_ids(&self) -> &[String] {
        &self.instance_ids
    }

    pub fn addresses(&self) -> &[String] {
        &self.addresses
    }

    /// The parameter server's address.
    pub fn parameter_server(&self) -> &str {
        &self.addresses[0]
    }

    /// The parameter server's instance id.
    pub fn parameter_server_id(&self) -> &str {
        &self.instance_ids[0]
    }

    /// The worker addresses, in provisioning order.
    pub fn workers(&self) -> &[String] {
        &self.addresses[1..]
    }

    /// The worker instance ids, in provisioning order.
    pub fn worker_ids(&self) -> &[String] {
        &self.instance_ids[1..]
    }
}
