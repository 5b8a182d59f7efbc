use clap::Parser;
use std::path::PathBuf;

use vocalbridge_server::ServerConfig;
use vocalbridge_server::bootstrap;

#[derive(Parser)]
#[command(name = "vocalbridge-server", about = "Multi-tenant AI agent gateway")]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listen port
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ServerConfig::from_file(path)?,
        None => ServerConfig::default(),
    };
    config.merge_env();
    if let Some(port) = args.port {
        config.port = port;
    }

    bootstrap::init_tracing(&config.logging.level);
    bootstrap::run(config).await
}
