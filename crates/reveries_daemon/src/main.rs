use clap::Parser;
use reveries_core::ReveriesConfig;
use reveries_daemon::Daemon;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Reveries daemon: persistent memory and inner monologue")]
struct Args {
    /// Path to config.json (default: ~/.reveries/config.json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the data directory (default: ~/.reveries)
    #[arg(short, long)]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ReveriesConfig::load_or_default(path),
        None => {
            let default_path = ReveriesConfig::default().paths().config;
            ReveriesConfig::load_or_default(default_path)
        }
    };
    if let Some(dir) = args.data_dir {
        config.data_dir = Some(dir);
    }

    let daemon = Daemon::wake(config).await?;
    daemon.run().await
}
