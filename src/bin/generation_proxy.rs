use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

use livechat::generation::{ProxyConfig, server};
use livechat::init_tracing;

/// Serves the reply generation route
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Directory for application logs
    #[clap(long, value_name = "PATH", default_value = "./logs")]
    logs_dir: PathBuf,

    /// Address to listen on, overrides GENERATION_PROXY_ADDR
    #[clap(long, value_name = "ADDR")]
    addr: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    std::fs::create_dir_all(&args.logs_dir)?;
    init_tracing(&args.logs_dir);

    let mut config = ProxyConfig::from_env()?;
    if let Some(addr) = args.addr {
        config.bind_addr = addr;
    }
    tracing::debug!(target: "livechat::generation_proxy", "Starting with {:?}", config);

    server::serve(config).await
}
