#[path = "cwmp-simd/bootstrap.rs"]
mod bootstrap;

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "cwmp-simd", about = "Simulated CWMP (TR-069) devices for exercising an ACS")]
struct Args {
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    acs_url: Option<String>,
    #[arg(long)]
    serial_number: Option<String>,
    #[arg(long)]
    data_model: Option<PathBuf>,
    #[arg(long)]
    devices: Option<u32>,
    #[arg(long)]
    request_timeout_secs: Option<u64>,
    #[arg(long)]
    default_inform_interval_secs: Option<u64>,
    #[arg(long)]
    ca_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let context = bootstrap::bootstrap(args).await;

    if let Err(err) = tokio::signal::ctrl_c().await {
        log::error!("failed to wait for ctrl-c: {err}");
    }
    log::info!("shutting down {} simulated device(s)", context.simulators.len());
    for simulator in context.simulators {
        simulator.shutdown().await;
    }
}
