use crate::utils;
use colored::Colorize;
use std::path::Path;
use tierflow_cloud::{Provisioner, StackSpec};
use tierflow_cloud_sim::SimulatedProvider;

pub async fn handle(spec: &StackSpec, project_root: &Path, show_secrets: bool) -> anyhow::Result<()> {
    let provider = SimulatedProvider::open(&spec.region, project_root).await?;
    let state = provider.get_state().await?;

    if state.is_empty() {
        println!("{}", "まだ構築されていません。`tier up` を実行してください".yellow());
        return Ok(());
    }

    let (_graph, stack) = utils::declare(spec, &provider).await?;
    let lookup = utils::state_lookup(&state);

    println!();
    println!("{}", "出力:".bold());
    for output in stack.outputs() {
        let shown = if show_secrets {
            output
                .lookup(&lookup)
                .map(|v| utils::format_value(&v))
                .unwrap_or_else(|| "<unknown>".to_string())
        } else {
            output.display(&lookup)
        };
        println!("  {} = {}", output.name.cyan(), shown);
    }

    Ok(())
}
