use async_trait::async_trait;
use comms::{CommandOutput, CommandRunner};
use log::{debug, info};
use serde::{Deserialize, de::DeserializeOwned};

use super::{Cloud, LaunchRequest, SecurityGroup};
use crate::error::{OrchestratorError, Result};

/// `Cloud` backed by the `aws` command line client, talking to EC2.
///
/// Credentials and the default region come from the usual `aws` configuration.
#[derive(Debug, Clone, Default)]
pub struct AwsCli {
    runner: CommandRunner,
    region: Option<String>,
}

impl AwsCli {
    pub fn new(region: Option<String>) -> Self {
        Self {
            runner: CommandRunner::new(),
            region,
        }
    }

    async fn ec2(&self, args: Vec<String>) -> Result<CommandOutput> {
        let mut full = vec!["ec2".to_string()];
        full.extend(args);
        if let Some(region) = &self.region {
            full.push("--region".into());
            full.push(region.clone());
        }
        full.push("--output".into());
        full.push("json".into());

        debug!("aws {}", full.join(" "));
        Ok(self.runner.run_checked("aws", &full).await?)
    }

    async fn ec2_json<T: DeserializeOwned>(&self, args: Vec<String>) -> Result<T> {
        let output = self.ec2(args).await?;
        decode(&output.stdout_str())
    }
}

fn decode<T: DeserializeOwned>(stdout: &str) -> Result<T> {
    serde_json::from_str(stdout)
        .map_err(|e| OrchestratorError::Cloud(format!("unexpected aws response: {e}")))
}

fn strings<const N: usize>(args: [&str; N]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SecurityGroups {
    #[serde(default)]
    security_groups: Vec<GroupEntry>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GroupEntry {
    group_id: String,
    group_name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreatedGroup {
    group_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct KeyPairs {
    #[serde(default)]
    key_pairs: Vec<KeyPairEntry>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct KeyPairEntry {
    key_name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreatedKey {
    key_material: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Images {
    #[serde(default)]
    images: Vec<ImageEntry>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ImageEntry {
    image_id: String,
    #[serde(default)]
    creation_date: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Launched {
    #[serde(default)]
    instances: Vec<InstanceEntry>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Reservations {
    #[serde(default)]
    reservations: Vec<Launched>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InstanceEntry {
    instance_id: String,
    #[serde(default)]
    public_dns_name: String,
}

/// Picks the newest image; ISO 8601 creation dates sort lexicographically.
fn newest_image(images: Images) -> Option<String> {
    images
        .images
        .into_iter()
        .max_by(|a, b| a.creation_date.cmp(&b.creation_date))
        .map(|image| image.image_id)
}

fn run_instances_args(request: &LaunchRequest) -> Vec<String> {
    let mut args = strings(["run-instances", "--image-id"]);
    args.push(request.image_id.clone());
    args.push("--instance-type".into());
    args.push(request.instance_type.clone());
    args.push("--count".into());
    args.push(request.count.to_string());
    args.push("--security-group-ids".into());
    args.push(request.security_group_id.clone());
    args.push("--key-name".into());
    args.push(request.key_name.clone());
    args.push("--iam-instance-profile".into());
    args.push(format!("Name={}", request.iam_profile));

    if let Some(size) = request.volume_size {
        let mapping = serde_json::json!([{
            "DeviceName": "/dev/xvda",
            "Ebs": {
                "DeleteOnTermination": true,
                "VolumeSize": size,
                "VolumeType": "gp2",
            },
        }]);
        args.push("--block-device-mappings".into());
        args.push(mapping.to_string());
    }

    args
}

#[async_trait]
impl Cloud for AwsCli {
    async fn find_security_group(&self, name: &str) -> Result<Option<SecurityGroup>> {
        let mut args = strings(["describe-security-groups", "--filters"]);
        args.push(format!("Name=group-name,Values={name}"));

        let groups: SecurityGroups = self.ec2_json(args).await?;
        Ok(groups
            .security_groups
            .into_iter()
            .find(|group| group.group_name == name)
            .map(|group| SecurityGroup {
                id: group.group_id,
                name: group.group_name,
            }))
    }

    async fn create_security_group(&self, name: &str, description: &str) -> Result<SecurityGroup> {
        let args = strings([
            "create-security-group",
            "--group-name",
            name,
            "--description",
            description,
        ]);

        let created: CreatedGroup = self.ec2_json(args).await?;
        info!(group = created.group_id.as_str(); "created security group {name}");
        Ok(SecurityGroup {
            id: created.group_id,
            name: name.to_string(),
        })
    }

    async fn authorize_all_ingress(&self, group_id: &str) -> Result<()> {
        let args = strings([
            "authorize-security-group-ingress",
            "--group-id",
            group_id,
            "--protocol",
            "all",
            "--cidr",
            "0.0.0.0/0",
        ]);
        self.ec2(args).await?;
        Ok(())
    }

    async fn key_pair_exists(&self, name: &str) -> Result<bool> {
        let mut args = strings(["describe-key-pairs", "--filters"]);
        args.push(format!("Name=key-name,Values={name}"));

        let keys: KeyPairs = self.ec2_json(args).await?;
        Ok(keys.key_pairs.iter().any(|key| key.key_name == name))
    }

    async fn delete_key_pair(&self, name: &str) -> Result<()> {
        self.ec2(strings(["delete-key-pair", "--key-name", name]))
            .await?;
        Ok(())
    }

    async fn create_key_pair(&self, name: &str) -> Result<String> {
        let created: CreatedKey = self
            .ec2_json(strings(["create-key-pair", "--key-name", name]))
            .await?;
        Ok(created.key_material)
    }

    async fn latest_image(&self, name_filter: &str) -> Result<String> {
        let mut args = strings(["describe-images", "--filters"]);
        args.push(format!("Name=name,Values={name_filter}"));

        let images: Images = self.ec2_json(args).await?;
        newest_image(images).ok_or_else(|| {
            OrchestratorError::Cloud(format!("no image matches `{name_filter}`"))
        })
    }

    async fn run_instances(&self, request: &LaunchRequest) -> Result<Vec<String>> {
        let launched: Launched = self.ec2_json(run_instances_args(request)).await?;
        let ids: Vec<_> = launched
            .instances
            .into_iter()
            .map(|instance| instance.instance_id)
            .collect();

        if ids.len() != request.count {
            return Err(OrchestratorError::Cloud(format!(
                "requested {} instance(s), got {}",
                request.count,
                ids.len()
            )));
        }

        Ok(ids)
    }

    async fn wait_until_running(&self, ids: &[String]) -> Result<()> {
        let mut args = strings(["wait", "instance-running", "--instance-ids"]);
        args.extend(ids.iter().cloned());
        self.ec2(args).await?;
        Ok(())
    }

    async fn public_addresses(&self, ids: &[String]) -> Result<Vec<(String, String)>> {
        let mut args = strings(["describe-instances", "--instance-ids"]);
        args.extend(ids.iter().cloned());

        let described: Reservations = self.ec2_json(args).await?;
        Ok(described
            .reservations
            .into_iter()
            .flat_map(|reservation| reservation.instances)
            .map(|instance| (instance.instance_id, instance.public_dns_name))
            .collect())
    }

    async fn terminate_instances(&self, ids: &[String]) -> Result<()> {
        let mut args = strings(["terminate-instances", "--instance-ids"]);
        args.extend(ids.iter().cloned());
        self.ec2(args).await?;
        Ok(())
    }

    async fn wait_until_terminated(&self, ids: &[String]) -> Result<()> {
        let mut args = strings(["wait", "instance-terminated", "--instance-ids"]);
        args.extend(ids.iter().cloned());
        self.ec2(args).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newest_image_wins() {
        let images: Images = decode(
            r#"{"Images": [
                {"ImageId": "ami-old", "CreationDate": "2019-01-02T10:00:00.000Z"},
                {"ImageId": "ami-new", "CreationDate": "2019-06-11T10:00:00.000Z"},
                {"ImageId": "ami-mid", "CreationDate": "2019-03-01T10:00:00.000Z"}
            ]}"#,
        )
        .unwrap();

        assert_eq!(newest_image(images).as_deref(), Some("ami-new"));
        assert_eq!(newest_image(Images { images: vec![] }), None);
    }

    #[test]
    fn reservations_flatten_in_order() {
        let described: Reservations = decode(
            r#"{"Reservations": [
                {"Instances": [{"InstanceId": "i-ps", "PublicDnsName": "ps.aws"}]},
                {"Instances": [
                    {"InstanceId": "i-w0", "PublicDnsName": "w0.aws"},
                    {"InstanceId": "i-w1", "PublicDnsName": "w1.aws"}
                ]}
            ]}"#,
        )
        .unwrap();

        let pairs: Vec<_> = described
            .reservations
            .into_iter()
            .flat_map(|r| r.instances)
            .map(|i| i.instance_id)
            .collect();
        assert_eq!(pairs, ["i-ps", "i-w0", "i-w1"]);
    }

    #[test]
    fn garbage_is_a_cloud_error() {
        let result: Result<CreatedKey> = decode("not json");
        assert!(matches!(result, Err(OrchestratorError::Cloud(_))));
    }

    #[test]
    fn workers_get_a_root_volume() {
        let mut request = LaunchRequest {
            image_id: "ami-1".into(),
            instance_type: "p2.xlarge".into(),
            count: 4,
            security_group_id: "sg-1".into(),
            key_name: "easyDist".into(),
            iam_profile: "easyDistRole".into(),
            volume_size: Some(100),
        };

        let args = run_instances_args(&request);
        assert!(args.windows(2).any(|w| w[0] == "--count" && w[1] == "4"));
        assert!(args.contains(&"Name=easyDistRole".to_string()));
        let mapping = args.last().unwrap();
        assert!(mapping.contains("\"VolumeSize\":100"));

        request.volume_size = None;
        assert!(!run_instances_args(&request).contains(&"--block-device-mappings".to_string()));
    }
}
