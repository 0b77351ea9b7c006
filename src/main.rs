mod cli;
mod output;

use anyhow::Result;
use ci_sentinel::config::Config;
use ci_sentinel::logging;
use clap::Parser;
use cli::Cli;
use log::info;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config_path())?;
    logging::init(&config.logging_level, config.log_file.as_deref())?;

    output::print_banner();

    info!("Starting ci-sentinel");
    cli.execute(config).await?;

    Ok(())
}
