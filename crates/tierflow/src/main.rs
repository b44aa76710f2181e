mod commands;
mod utils;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "tier")]
#[command(about = "宣言したネットワークを、依存グラフのまま組み上げる。", long_about = None)]
struct Cli {
    /// スタックファイル (省略時は TIERFLOW_STACK_PATH またはカレントディレクトリから検索)
    #[arg(short, long, global = true)]
    file: Option<PathBuf>,

    /// ログを詳細に出力 (-v: info, -vv: debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// スタック定義と依存グラフを検証
    Validate,
    /// 記録済みの状態と比較して変更内容を表示
    Plan,
    /// スタックを構築
    Up {
        /// 最初の失敗で新しいリソースの作成を止める
        #[arg(long)]
        fail_fast: bool,
        /// 同時に作成するリソース数の上限
        #[arg(short = 'j', long)]
        parallelism: Option<usize>,
    },
    /// スタックの出力値を表示
    Outputs {
        /// 機密値を伏せずに表示
        #[arg(long)]
        show_secrets: bool,
    },
    /// バージョン情報を表示
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    utils::init_logging(cli.verbose);

    // Versionコマンドはスタックファイル不要
    if matches!(cli.command, Commands::Version) {
        println!("tierflow {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let project_root = std::env::current_dir()?;
    let spec = utils::load_stack(cli.file)?;

    match cli.command {
        Commands::Validate => commands::validate::handle(&spec).await,
        Commands::Plan => commands::plan::handle(&spec, &project_root).await,
        Commands::Up {
            fail_fast,
            parallelism,
        } => commands::up::handle(spec, &project_root, fail_fast, parallelism).await,
        Commands::Outputs { show_secrets } => {
            commands::outputs::handle(&spec, &project_root, show_secrets).await
        }
        Commands::Version => Ok(()),
    }
}
