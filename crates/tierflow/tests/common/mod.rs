use assert_cmd::Command;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

pub const STACK: &str = r#"
project: demo
region: ap-northeast-2
network:
  cidr: 10.0.0.0/16
bastion:
  instance_type: t3.micro
  public_key: ssh-ed25519 AAAAC3Nza demo@example
database:
  instance_class: db.t3.micro
  engine: mysql
  engine_version: "8.0"
  username: admin
  password:
    env: TIERFLOW_CLI_TEST_DB_PASSWORD
  db_name: app
  allocated_storage: 20
  storage_type: gp2
  storage_encrypted: true
cluster:
  name: demo-eks
  node_group_name: workers
  node_instance_type: t3.medium
  desired_capacity: 2
  min_size: 1
  max_size: 3
"#;

pub struct TestProject {
    pub root: TempDir,
}

impl TestProject {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        Self { root }
    }

    pub fn write_stack(&self, content: &str) {
        let path = self.root.path().join("tierflow.yaml");
        fs::write(path, content).unwrap();
    }

    pub fn path(&self) -> PathBuf {
        self.root.path().to_path_buf()
    }

    /// `tier` をプロジェクトディレクトリで実行するコマンド
    #[allow(deprecated)]
    pub fn tier(&self) -> Command {
        let mut cmd = Command::cargo_bin("tier").unwrap();
        cmd.current_dir(self.path())
            .env_remove("TIERFLOW_STACK_PATH")
            .env_remove("RUST_LOG")
            .env("XDG_CONFIG_HOME", self.path())
            .env("NO_COLOR", "1")
            .env("TIERFLOW_CLI_TEST_DB_PASSWORD", "hunter22-secret");
        cmd
    }
}
