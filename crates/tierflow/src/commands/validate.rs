use crate::utils;
use colored::Colorize;
use tierflow_cloud::StackSpec;
use tierflow_cloud_sim::SimulatedProvider;

pub async fn handle(spec: &StackSpec) -> anyhow::Result<()> {
    println!("{}", "スタックを検証中...".blue());

    let provider = SimulatedProvider::new(&spec.region);
    let checked = match utils::declare(spec, &provider).await {
        Ok((graph, stack)) => graph.validate().map(|order| (graph, stack, order)),
        Err(e) => {
            eprintln!();
            eprintln!("{}", "✗ スタック定義エラー".red().bold());
            eprintln!("  {}", e);
            std::process::exit(1);
        }
    };

    let (graph, stack, order) = match checked {
        Ok(checked) => checked,
        Err(e) => {
            eprintln!();
            eprintln!("{}", "✗ 依存グラフエラー".red().bold());
            eprintln!("  {}", e);
            std::process::exit(1);
        }
    };

    println!("{}", "✓ スタック定義は正常です！".green().bold());
    println!();
    println!("サマリー:");
    println!("  プロジェクト: {}", spec.project.cyan());
    println!("  リージョン: {}", spec.region);
    println!("  ネットワーク: {}", spec.network.cidr.to_string().cyan());

    let topology = &stack.topology;
    println!("  ゾーン: {}個", topology.zones.len());
    for ((zone, public), private) in topology
        .zones
        .iter()
        .zip(&topology.public_blocks)
        .zip(&topology.private_blocks)
    {
        println!(
            "    - {} (public {}, private {})",
            zone.name.cyan(),
            public,
            private
        );
    }

    let mut consumers = Vec::new();
    if stack.bastion.is_some() {
        consumers.push("bastion");
    }
    if stack.database.is_some() {
        consumers.push("database");
    }
    if stack.cluster.is_some() {
        consumers.push("cluster");
    }
    if !consumers.is_empty() {
        println!("  利用リソース: {}", consumers.join(", "));
    }

    println!("  リソース: {}個", graph.len());
    for id in order {
        if let Some(node) = graph.node(id) {
            println!("    - {} ({})", node.name(), node.kind());
        }
    }

    Ok(())
}
