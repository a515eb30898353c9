use std::path::PathBuf;

use clap::Parser;
use mcpproxy_server::ServerArgs;
use mcpproxy_server::run_main;
use tracing_subscriber::EnvFilter;

/// Aggregating MCP proxy: one MCP server downstream, many upstreams.
#[derive(Parser)]
#[command(name = "mcpproxy-server", version)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Path to the SQLite state database.
    #[arg(long, default_value = "mcpproxy.sqlite")]
    db: PathBuf,

    /// Log filter, e.g. `info,mcpproxy_core=debug`. Overrides RUST_LOG.
    #[arg(long)]
    log: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = match &cli.log {
        Some(directives) => EnvFilter::new(directives),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    // Logs go to stderr; stdout belongs to the MCP transport.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run_main(ServerArgs {
        config_path: cli.config,
        db_path: cli.db,
    }))
}
