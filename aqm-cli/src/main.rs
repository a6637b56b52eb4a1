//! AQM CLI - Command line tool for live air quality and fire monitoring data.

use clap::Parser;

#[derive(Parser)]
#[command(
    name = "aqm-cli",
    version,
    about = "Live air quality and fire monitoring data toolkit"
)]
struct Cli {
    #[command(subcommand)]
    command: aqm_cmd::Command,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    aqm_cmd::run(cli.command).await
}
