use std::{
    io,
    path::{Component, Path, PathBuf},
};

use async_trait::async_trait;
use log::debug;
use serde::Deserialize;

use crate::{
    command::CommandRunner,
    error::{CommsErr, Result},
};

/// Flat key/value object storage holding the data chunks.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Lists the keys under `prefix` in `bucket`, sorted.
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>>;

    /// Fetches the full contents of `key`.
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>>;
}

/// `ObjectStore` backed by the `aws` command line client.
#[derive(Debug, Clone, Default)]
pub struct S3Cli {
    runner: CommandRunner,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListObjects {
    #[serde(default)]
    contents: Vec<ObjectEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ObjectEntry {
    key: String,
}

impl S3Cli {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_runner(runner: CommandRunner) -> Self {
        Self { runner }
    }

    /// Parses the json `aws s3api list-objects-v2` prints, which is empty when
    /// nothing matches.
    fn parse_listing(stdout: &str) -> Result<Vec<String>> {
        if stdout.trim().is_empty() {
            return Ok(Vec::new());
        }

        let listing: ListObjects = serde_json::from_str(stdout)?;
        let mut keys: Vec<String> = listing.contents.into_iter().map(|e| e.key).collect();
        keys.sort();
        Ok(keys)
    }
}

#[async_trait]
impl ObjectStore for S3Cli {
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        let output = self
            .runner
            .run_checked(
                "aws",
                [
                    "s3api",
                    "list-objects-v2",
                    "--bucket",
                    bucket,
                    "--prefix",
                    prefix,
                    "--output",
                    "json",
                ],
            )
            .await?;

        let keys = Self::parse_listing(&output.stdout_str())?;
        debug!(bucket = bucket, prefix = prefix; "listed {} object(s)", keys.len());
        Ok(keys)
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let uri = format!("s3://{bucket}/{key}");
        let output = self.runner.run("aws", ["s3", "cp", uri.as_str(), "-"]).await?;

        if !output.success() {
            return Err(CommsErr::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }

        Ok(output.stdout)
    }
}

/// `ObjectStore` over a local directory: buckets are directories under `root` and
/// keys are `/` separated paths inside them.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stores `contents` under `key`, creating parent directories.
    pub async fn put(&self, bucket: &str, key: &str, contents: &[u8]) -> Result<()> {
        let path = self.object_path(bucket, key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, contents).await?;
        Ok(())
    }

    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));

        if key.is_empty() || escapes {
            return Err(CommsErr::InvalidSpec(format!("invalid object key `{key}`")));
        }

        Ok(self.root.join(bucket).join(relative))
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        let bucket_dir = self.root.join(bucket);
        let mut keys = Vec::new();
        let mut pending = vec![bucket_dir.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                    continue;
                }

                let Ok(relative) = path.strip_prefix(&bucket_dir) else {
                    continue;
                };
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");

                if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let path = self.object_path(bucket, key)?;
        match tokio::fs::read(&path).await {
            Ok(contents) => Ok(contents),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(CommsErr::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s3_listing_parses_contents() {
        let stdout = r#"{
            "Contents": [
                {"Key": "rnnData/b.csv", "Size": 10},
                {"Key": "rnnData/a.csv", "Size": 12}
            ],
            "KeyCount": 2
        }"#;

        let keys = S3Cli::parse_listing(stdout).unwrap();
        assert_eq!(keys, vec!["rnnData/a.csv", "rnnData/b.csv"]);
    }

    #[test]
    fn s3_listing_of_nothing_is_empty() {
        assert!(S3Cli::parse_listing("").unwrap().is_empty());
        assert!(S3Cli::parse_listing("{}").unwrap().is_empty());
    }

    #[tokio::test]
    async fn local_store_lists_by_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());

        store.put("data", "rnnData/1.csv", b"a").await.unwrap();
        store.put("data", "rnnData/0.csv", b"b").await.unwrap();
        store.put("data", "other/2.csv", b"c").await.unwrap();

        let keys = store.list("data", "rnnData/").await.unwrap();
        assert_eq!(keys, vec!["rnnData/0.csv", "rnnData/1.csv"]);

        let all = store.list("data", "").await.unwrap();
        assert_eq!(all.len(), 3);

        assert!(store.list("missing", "").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn local_store_get_by_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());
        store.put("data", "k/v.csv", b"x1,y\n").await.unwrap();

        assert_eq!(store.get("data", "k/v.csv").await.unwrap(), b"x1,y\n");

        let err = store.get("data", "k/missing.csv").await.unwrap_err();
        assert!(matches!(err, CommsErr::ObjectNotFound { .. }));
    }

    #[tokio::test]
    async fn local_store_rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());

        assert!(store.get("data", "../secret").await.is_err());
        assert!(store.put("data", "/abs", b"").await.is_err());
    }
}
