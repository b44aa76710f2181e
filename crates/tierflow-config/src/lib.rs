pub mod error;

pub use error::*;

use serde_yaml::{Mapping, Value};
use std::path::{Path, PathBuf};
use tierflow_cloud::StackSpec;

/// スタックファイルのパスを直接指定する環境変数
pub const STACK_PATH_ENV: &str = "TIERFLOW_STACK_PATH";

const CANDIDATES: [&str; 4] = [
    "tierflow.local.yaml",
    ".tierflow.local.yaml",
    "tierflow.yaml",
    ".tierflow.yaml",
];

/// Tierflowの設定ディレクトリを取得
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join("tierflow");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
    }

    Ok(config_dir)
}

/// プロジェクトのスタックファイルを探す
///
/// 以下の優先順位で検索:
/// 1. 環境変数 TIERFLOW_STACK_PATH (直接パス指定)
/// 2. カレントディレクトリ: tierflow.local.yaml, .tierflow.local.yaml, tierflow.yaml, .tierflow.yaml
/// 3. ./.tierflow/ ディレクトリ内: 同様の順序
/// 4. ~/.config/tierflow/tierflow.yaml (グローバル設定)
pub fn find_stack_file() -> Result<PathBuf> {
    if let Ok(stack_path) = std::env::var(STACK_PATH_ENV) {
        let path = PathBuf::from(stack_path);
        if path.exists() {
            return Ok(path);
        }
        tracing::warn!("{} points to a missing file: {}", STACK_PATH_ENV, path.display());
    }

    let current_dir = std::env::current_dir()?;

    for filename in &CANDIDATES {
        let path = current_dir.join(filename);
        if path.exists() {
            return Ok(path);
        }
    }

    let state_dir = current_dir.join(".tierflow");
    if state_dir.is_dir() {
        for filename in &CANDIDATES {
            let path = state_dir.join(filename);
            if path.exists() {
                return Ok(path);
            }
        }
    }

    if let Some(config_dir) = dirs::config_dir() {
        let global = config_dir.join("tierflow").join("tierflow.yaml");
        if global.exists() {
            return Ok(global);
        }
    }

    Err(ConfigError::StackFileNotFound)
}

/// スタックファイルを読み込み、検証済みの StackSpec を返す
pub fn load_stack(path: impl AsRef<Path>) -> Result<StackSpec> {
    let path = path.as_ref();
    tracing::debug!("Loading stack file: {}", path.display());
    let content = std::fs::read_to_string(path)?;
    parse_stack(&content)
}

/// YAML 文字列から StackSpec を構築
///
/// `{ env: NAME }` の形をした値は環境変数 NAME の内容に置き換える。
pub fn parse_stack(content: &str) -> Result<StackSpec> {
    let raw: Value = serde_yaml::from_str(content)?;
    if !raw.is_mapping() {
        return Err(ConfigError::Invalid(
            "トップレベルはマッピングである必要があります".into(),
        ));
    }

    let expanded = expand_env(raw)?;
    let spec: StackSpec = serde_yaml::from_value(expanded)?;
    spec.validate()?;
    Ok(spec)
}

/// `{ env: NAME }` なら NAME を返す
fn env_reference(mapping: &Mapping) -> Option<&str> {
    if mapping.len() != 1 {
        return None;
    }
    mapping.get("env").and_then(Value::as_str)
}

fn expand_env(value: Value) -> Result<Value> {
    match value {
        Value::Mapping(mapping) => {
            if let Some(name) = env_reference(&mapping) {
                return std::env::var(name)
                    .map(Value::String)
                    .map_err(|_| ConfigError::MissingSecret(name.to_string()));
            }
            mapping
                .into_iter()
                .map(|(k, v)| Ok((k, expand_env(v)?)))
                .collect::<Result<Mapping>>()
                .map(Value::Mapping)
        }
        Value::Sequence(items) => items
            .into_iter()
            .map(expand_env)
            .collect::<Result<Vec<_>>>()
            .map(Value::Sequence),
        other => Ok(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;

    const STACK: &str = r#"
project: demo
region: ap-northeast-2
network:
  cidr: 10.0.0.0/16
  zones: 2
bastion:
  instance_type: t3.micro
  public_key: ssh-ed25519 AAAA
database:
  instance_class: db.t3.micro
  engine: postgres
  engine_version: "15"
  username: admin
  password:
    env: TIERFLOW_TEST_DB_PASSWORD
  db_name: app
  allocated_storage: 20
  storage_type: gp2
"#;

    #[test]
    fn test_get_config_dir() {
        let result = get_config_dir();
        assert!(result.is_ok());

        let config_dir = result.unwrap();
        assert!(config_dir.ends_with("tierflow"));
        assert!(config_dir.exists());
    }

    #[test]
    #[serial]
    fn test_find_stack_file_in_current_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();

        fs::write(temp_dir.path().join("tierflow.yaml"), "# test").unwrap();
        std::env::set_current_dir(&temp_dir).unwrap();

        let result = temp_env::with_var_unset(STACK_PATH_ENV, find_stack_file);
        std::env::set_current_dir(original_dir).unwrap();

        assert!(result.unwrap().ends_with("tierflow.yaml"));
    }

    #[test]
    #[serial]
    fn test_find_stack_file_local_priority() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();

        fs::write(temp_dir.path().join("tierflow.yaml"), "# shared").unwrap();
        fs::write(temp_dir.path().join(".tierflow.local.yaml"), "# local").unwrap();
        std::env::set_current_dir(&temp_dir).unwrap();

        let result = temp_env::with_var_unset(STACK_PATH_ENV, find_stack_file);
        std::env::set_current_dir(original_dir).unwrap();

        // local ファイルが優先される
        assert!(result.unwrap().ends_with(".tierflow.local.yaml"));
    }

    #[test]
    #[serial]
    fn test_find_stack_file_in_state_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();

        let state_dir = temp_dir.path().join(".tierflow");
        fs::create_dir(&state_dir).unwrap();
        fs::write(state_dir.join("tierflow.yaml"), "# nested").unwrap();
        std::env::set_current_dir(&temp_dir).unwrap();

        let result = temp_env::with_var_unset(STACK_PATH_ENV, find_stack_file);
        std::env::set_current_dir(original_dir).unwrap();

        assert!(result.unwrap().ends_with(".tierflow/tierflow.yaml"));
    }

    #[test]
    #[serial]
    fn test_find_stack_file_env_var() {
        let temp_dir = tempfile::tempdir().unwrap();
        let stack_path = temp_dir.path().join("custom.yaml");
        fs::write(&stack_path, "# custom").unwrap();

        let result = temp_env::with_var(STACK_PATH_ENV, Some(&stack_path), find_stack_file);
        assert_eq!(result.unwrap(), stack_path);
    }

    #[test]
    #[serial]
    fn test_find_stack_file_not_found() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();
        std::env::set_current_dir(&temp_dir).unwrap();

        // グローバル設定の影響を受けないよう XDG_CONFIG_HOME も差し替える
        let result = temp_env::with_vars(
            [
                (STACK_PATH_ENV, None),
                ("XDG_CONFIG_HOME", Some(temp_dir.path().as_os_str())),
            ],
            find_stack_file,
        );
        std::env::set_current_dir(original_dir).unwrap();

        assert!(matches!(result, Err(ConfigError::StackFileNotFound)));
    }

    #[test]
    #[serial]
    fn test_load_stack_expands_env_secret() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("tierflow.yaml");
        fs::write(&path, STACK).unwrap();

        let spec = temp_env::with_var("TIERFLOW_TEST_DB_PASSWORD", Some("s3cret-pw"), || {
            load_stack(&path)
        })
        .unwrap();

        assert_eq!(spec.project, "demo");
        assert_eq!(spec.network.zones, 2);
        let database = spec.database.unwrap();
        assert_eq!(database.password.expose(), "s3cret-pw");
        assert_eq!(database.port().unwrap(), 5432);
        assert!(spec.cluster.is_none());
    }

    #[test]
    #[serial]
    fn test_missing_secret() {
        let result = temp_env::with_var_unset("TIERFLOW_TEST_DB_PASSWORD", || parse_stack(STACK));
        match result {
            Err(ConfigError::MissingSecret(name)) => assert_eq!(name, "TIERFLOW_TEST_DB_PASSWORD"),
            other => panic!("Expected MissingSecret, got {:?}", other.map(|s| s.project)),
        }
    }

    #[test]
    fn test_invalid_stack_is_rejected() {
        let result = parse_stack("project: Bad_Name\nnetwork:\n  cidr: 10.0.0.0/16\n");
        assert!(matches!(result, Err(ConfigError::Topology(_))));

        let result = parse_stack("- just\n- a list\n");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));

        let result = parse_stack("project: demo\n");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_defaults_apply() {
        let spec = parse_stack("project: demo\nnetwork:\n  cidr: 10.0.0.0/16\n").unwrap();
        assert_eq!(spec.region, "ap-northeast-2");
        assert_eq!(spec.network.zones, 3);
        assert!(spec.bastion.is_none());
    }
}
