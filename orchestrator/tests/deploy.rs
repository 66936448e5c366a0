use std::path::Path;

use comms::{RecordingShell, RemoteCall};
use orchestrator::{
    DeployConfig, DeployState, Deployment, MockCloud, OrchestratorError, cloud::InstanceState,
};

fn config(root: &Path, workers: usize) -> DeployConfig {
    let mut config = DeployConfig::new("rnn", "easyDistRole", "p2.xlarge", workers);
    config.ssh.key_path = root.join("aux/easyDist.pem");
    config.experiments_dir = root.join("experiments");
    config.transfer_files = vec![root.join("trainer")];
    config
}

fn deployment(root: &Path, workers: usize) -> Deployment<MockCloud, RecordingShell> {
    Deployment::new(config(root, workers), MockCloud::new(), RecordingShell::new()).unwrap()
}

#[tokio::test]
async fn security_group_is_created_once() {
    let dir = tempfile::tempdir().unwrap();
    let mut deployment = deployment(dir.path(), 2);

    let first = deployment.ensure_security_group().await.unwrap();
    let second = deployment.ensure_security_group().await.unwrap();
    let third = deployment.ensure_security_group().await.unwrap();

    assert_eq!(first, second);
    assert_eq!(second, third);
    assert_eq!(deployment.cloud().group_creates(), 1);
    assert_eq!(deployment.cloud().security_groups().len(), 1);
    assert!(deployment.cloud().is_open(&first.id));
    assert_eq!(deployment.state(), DeployState::SecurityGroupReady);
}

#[tokio::test]
async fn existing_key_file_is_left_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let mut deployment = deployment(dir.path(), 2);
    let key_path = dir.path().join("aux/easyDist.pem");

    deployment.ensure_security_group().await.unwrap();
    deployment.ensure_key().await.unwrap();
    let before = std::fs::read(&key_path).unwrap();

    deployment.ensure_key().await.unwrap();
    let after = std::fs::read(&key_path).unwrap();

    assert_eq!(before, after);
    assert_eq!(deployment.cloud().key_creates(), 1);
    assert_eq!(deployment.state(), DeployState::KeyReady);

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&key_path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}

#[tokio::test]
async fn lost_key_file_recreates_the_key_pair() {
    let dir = tempfile::tempdir().unwrap();
    let cloud = MockCloud::new().with_key_pair("easyDist");
    let mut deployment =
        Deployment::new(config(dir.path(), 1), cloud, RecordingShell::new()).unwrap();

    deployment.ensure_security_group().await.unwrap();
    deployment.ensure_key().await.unwrap();

    assert_eq!(deployment.cloud().key_deletes(), 1);
    assert_eq!(deployment.cloud().key_creates(), 1);
    assert_eq!(deployment.cloud().key_pairs(), ["easyDist"]);
    assert!(dir.path().join("aux/easyDist.pem").exists());
}

#[tokio::test]
async fn key_before_group_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut deployment = deployment(dir.path(), 1);

    let err = deployment.ensure_key().await.unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::InvalidState {
            state: DeployState::Unprovisioned,
            ..
        }
    ));
}

#[tokio::test]
async fn launch_writes_ps_then_workers() {
    let dir = tempfile::tempdir().unwrap();
    let mut deployment = deployment(dir.path(), 3);

    let manifest = deployment.launch().await.unwrap().clone();
    assert_eq!(manifest.instance_ids(), ["i-0000", "i-0001", "i-0002", "i-0003"]);
    assert_eq!(manifest.parameter_server(), "ec2-0.mock.internal");
    assert_eq!(manifest.workers().len(), 3);
    assert_eq!(deployment.state(), DeployState::ManifestWritten);

    let launches = deployment.cloud().launches();
    assert_eq!(launches.len(), 2);
    assert_eq!(launches[0].instance_type, "t2.nano");
    assert_eq!(launches[0].count, 1);
    assert_eq!(launches[0].volume_size, None);
    assert_eq!(launches[1].instance_type, "p2.xlarge");
    assert_eq!(launches[1].count, 3);
    assert_eq!(launches[1].volume_size, Some(100));

    let written =
        std::fs::read_to_string(dir.path().join("experiments/rnn/resources.txt")).unwrap();
    assert_eq!(
        written,
        "i-0000 i-0001 i-0002 i-0003\n\
         ec2-0.mock.internal ec2-1.mock.internal ec2-2.mock.internal ec2-3.mock.internal\n"
    );
}

#[tokio::test]
async fn launch_twice_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut deployment = deployment(dir.path(), 1);

    deployment.launch().await.unwrap();
    assert!(deployment.launch().await.is_err());
    assert_eq!(deployment.cloud().launches().len(), 2);
}

#[tokio::test]
async fn failed_launch_keeps_the_security_group() {
    let dir = tempfile::tempdir().unwrap();
    let mut deployment = deployment(dir.path(), 2);
    deployment.cloud().fail_launches();

    let err = deployment.launch().await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Cloud(_)));
    assert_eq!(deployment.cloud().security_groups().len(), 1);
    assert_eq!(deployment.state(), DeployState::InstancesLaunching);
    assert!(!dir.path().join("experiments/rnn/resources.txt").exists());
}

#[tokio::test]
async fn write_manifest_is_exact() {
    let dir = tempfile::tempdir().unwrap();
    let mut deployment = deployment(dir.path(), 2);

    deployment
        .write_manifest(
            vec!["sample_ps".into(), "samplew0".into(), "samplew1".into()],
            vec!["psip1".into(), "psip2".into(), "psip3".into()],
        )
        .await
        .unwrap();

    let written =
        std::fs::read_to_string(dir.path().join("experiments/rnn/resources.txt")).unwrap();
    assert_eq!(written, "sample_ps samplew0 samplew1\npsip1 psip2 psip3\n");
}

#[tokio::test]
async fn transfer_reaches_every_machine() {
    let dir = tempfile::tempdir().unwrap();
    let mut deployment = deployment(dir.path(), 2);
    deployment.launch().await.unwrap();
    deployment.shell().fail_host("ec2-2.mock.internal");

    let report = deployment.transfer().await.unwrap();
    assert_eq!(report.succeeded, ["ec2-0.mock.internal", "ec2-1.mock.internal"]);
    assert_eq!(report.failed, ["ec2-2.mock.internal"]);

    let calls = deployment.shell().calls_to("ec2-1.mock.internal");
    let RemoteCall::Copy {
        sources, recursive, ..
    } = &calls[0]
    else {
        panic!("expected a copy, got {calls:?}");
    };
    assert!(*recursive);
    assert_eq!(
        sources,
        &[
            dir.path().join("aux"),
            dir.path().join("experiments/rnn/resources.txt"),
            dir.path().join("trainer"),
        ]
    );
}

#[tokio::test]
async fn login_targets_the_parameter_server() {
    let dir = tempfile::tempdir().unwrap();
    let mut deployment = deployment(dir.path(), 1);
    assert!(deployment.login().await.is_err());

    deployment.launch().await.unwrap();
    deployment.login().await.unwrap();

    assert_eq!(
        deployment.shell().calls(),
        [RemoteCall::Login {
            host: "ec2-0.mock.internal".into()
        }]
    );
}

#[tokio::test]
async fn terminate_stops_everything() {
    let dir = tempfile::tempdir().unwrap();
    let mut deployment = deployment(dir.path(), 2);
    deployment.launch().await.unwrap();

    deployment.terminate().await.unwrap();

    assert_eq!(deployment.state(), DeployState::Terminated);
    for id in ["i-0000", "i-0001", "i-0002"] {
        assert_eq!(
            deployment.cloud().instance_state(id),
            Some(InstanceState::Terminated)
        );
    }
    assert!(deployment.transfer().await.is_err());
}

#[tokio::test]
async fn resume_reads_the_manifest() {
    let dir = tempfile::tempdir().unwrap();
    let mut first = deployment(dir.path(), 2);
    let manifest = first.launch().await.unwrap().clone();

    let resumed = Deployment::resume(config(dir.path(), 2), MockCloud::new(), RecordingShell::new())
        .await
        .unwrap();
    assert_eq!(resumed.manifest(), Some(&manifest));
    assert_eq!(resumed.state(), DeployState::ManifestWritten);
}

#[test]
fn invalid_config_is_rejected_before_anything_happens() {
    let dir = tempfile::tempdir().unwrap();
    let result = Deployment::new(config(dir.path(), 0), MockCloud::new(), RecordingShell::new());
    assert!(matches!(result, Err(OrchestratorError::InvalidConfig(_))));
}
