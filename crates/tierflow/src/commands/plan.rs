use crate::utils;
use colored::Colorize;
use std::path::Path;
use tierflow_cloud::{ActionType, Plan, Provisioner, StackSpec};
use tierflow_cloud_sim::SimulatedProvider;

pub async fn handle(spec: &StackSpec, project_root: &Path) -> anyhow::Result<()> {
    let provider = SimulatedProvider::open(&spec.region, project_root).await?;
    let state = provider.get_state().await?;
    let (graph, _stack) = utils::declare(spec, &provider).await?;

    let plan = Plan::from_state(&graph, &state)?;

    println!();
    println!("{}", "実行計画:".bold());
    for action in &plan.actions {
        let marker = match action.action_type {
            ActionType::Create => "+".green(),
            ActionType::Update => "~".yellow(),
            ActionType::NoOp => "=".dimmed(),
        };
        let name = match action.action_type {
            ActionType::NoOp => action.resource.dimmed(),
            _ => action.resource.normal(),
        };
        println!("  {} {} ({})", marker, name, action.kind);
    }

    let summary = plan.summary();
    println!();
    println!(
        "作成: {}  更新: {}  変更なし: {}",
        summary.create.to_string().green(),
        summary.update.to_string().yellow(),
        summary.no_change
    );

    if !plan.has_changes {
        println!("{}", "✓ 変更はありません".green());
    }

    Ok(())
}
