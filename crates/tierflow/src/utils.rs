use anyhow::Context;
use colored::Colorize;
use serde_json::Value;
use std::path::PathBuf;
use tierflow_cloud::{
    DependencyGraph, ProviderState, Provisioner, Stack, StackSpec, ValueCell,
};
use tracing_subscriber::EnvFilter;

/// ログ出力を初期化 (stderr)
///
/// `-v` の指定があれば RUST_LOG より優先する。
pub fn init_logging(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        _ => EnvFilter::new("debug"),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// スタックファイルを探して読み込む
pub fn load_stack(file: Option<PathBuf>) -> anyhow::Result<StackSpec> {
    let path = match file {
        Some(path) => path,
        None => tierflow_config::find_stack_file()?,
    };

    println!("📄 スタックファイル: {}", path.display().to_string().cyan());

    tierflow_config::load_stack(&path)
        .with_context(|| format!("{} の読み込みに失敗しました", path.display()))
}

/// プロバイダーのゾーン一覧を使ってスタックを宣言
pub async fn declare(
    spec: &StackSpec,
    provider: &dyn Provisioner,
) -> anyhow::Result<(DependencyGraph, Stack)> {
    let zones = provider.availability_zones().await?;
    let mut graph = DependencyGraph::new();
    let stack = Stack::declare(&mut graph, spec, &zones)?;
    Ok((graph, stack))
}

/// 未解決のセルを記録済みの状態から引く
pub fn state_lookup(state: &ProviderState) -> impl Fn(&ValueCell) -> Option<Value> + '_ {
    move |cell| {
        let source = cell.source()?;
        state.output(&source.node, &source.output).cloned()
    }
}

/// 出力値を1行で表示できる形にする
pub fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
