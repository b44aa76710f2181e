use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("設定ディレクトリが見つかりません")]
    ConfigDirNotFound,

    #[error(
        "スタックファイルが見つかりません。以下の場所を確認してください:\n\
        - カレントディレクトリ: tierflow.local.yaml, .tierflow.local.yaml, tierflow.yaml, .tierflow.yaml\n\
        - ./.tierflow/ ディレクトリ\n\
        - ~/.config/tierflow/tierflow.yaml\n\
        または TIERFLOW_STACK_PATH 環境変数で直接指定できます"
    )]
    StackFileNotFound,

    #[error("環境変数 {0} が設定されていません (secret の参照先)")]
    MissingSecret(String),

    #[error("スタックファイルの解析に失敗しました: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("スタック定義が不正です: {0}")]
    Invalid(String),

    #[error("スタックの検証に失敗しました: {0}")]
    Topology(#[from] tierflow_cloud::TopologyError),

    #[error("IO エラー: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
