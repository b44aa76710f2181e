use crate::utils;
use colored::Colorize;
use std::path::Path;
use std::sync::Arc;
use tierflow_cloud::{ActionType, ApplyResult, ProvisioningEngine, Provisioner, StackSpec};
use tierflow_cloud_sim::{SimulatedProvider, StateManager};

fn print_result(result: &ApplyResult) {
    for outcome in &result.applied {
        let marker = match outcome.action {
            ActionType::Create => "+".green(),
            ActionType::Update => "~".yellow(),
            ActionType::NoOp => "=".dimmed(),
        };
        println!(
            "  {} {} ({}, {}ms)",
            marker, outcome.name, outcome.kind, outcome.duration_ms
        );
    }

    for failure in &result.failed {
        println!("  {} {} ({})", "✗".red(), failure.name.red(), failure.kind);
        println!("      {}", failure.error);
    }

    for skipped in &result.skipped {
        println!(
            "  {} {} ({} の失敗によりスキップ)",
            "-".yellow(),
            skipped.name,
            skipped.failed_dependency
        );
    }

    for name in &result.cancelled {
        println!("  {} {} (キャンセル)", "-".dimmed(), name.dimmed());
    }
}

pub async fn handle(
    spec: StackSpec,
    project_root: &Path,
    fail_fast: bool,
    parallelism: Option<usize>,
) -> anyhow::Result<()> {
    let manager = StateManager::new(project_root);
    let lock = manager.acquire_lock().await?;

    let provider = Arc::new(SimulatedProvider::open(&spec.region, project_root).await?);

    let auth = provider.check_auth().await?;
    if !auth.authenticated {
        anyhow::bail!(
            "プロバイダーの認証に失敗しました: {}",
            auth.error.unwrap_or_default()
        );
    }
    println!(
        "プロバイダー: {} ({})",
        provider.display_name().cyan(),
        auth.account_info.unwrap_or_default()
    );

    let (graph, stack) = utils::declare(&spec, &*provider).await?;

    let mut config = spec.engine.clone();
    config.fail_fast |= fail_fast;
    if let Some(parallelism) = parallelism {
        config.parallelism = parallelism.max(1);
    }

    let engine = ProvisioningEngine::new(provider.clone(), config);

    // Ctrl-C で新しいリソースの作成を止める (実行中のものは完了を待つ)
    let stop = engine.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stop.stop();
        }
    });

    println!();
    println!(
        "{}",
        format!("🚀 {} 個のリソースを構築中...", graph.len()).bold()
    );

    let run = engine.run(&graph).await;

    // 失敗した場合も作成済みのリソースは記録する
    provider.persist(project_root).await?;
    lock.release().await?;

    let result = run?;
    print_result(&result);

    println!();
    println!("{}", result);

    if !result.is_success() {
        anyhow::bail!(
            "{}個のリソースの構築に失敗しました ({}個スキップ, {}個キャンセル)",
            result.failed.len(),
            result.skipped.len(),
            result.cancelled.len()
        );
    }

    println!("{}", "✓ 構築が完了しました！".green().bold());
    println!();
    println!("{}", "出力:".bold());
    for output in stack.outputs() {
        println!("  {} = {}", output.name.cyan(), output.display(&|_| None));
    }

    Ok(())
}
