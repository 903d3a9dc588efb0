use anyhow::Result;
use clap::Parser;

mod batch;
mod cli;
mod config;
mod logging;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::CliArgs::parse();
    logging::init_logging(args.log_level)?;

    let config = config::resolve(&args)?;
    tracing::debug!(?config, "resolved config");

    let report = batch::run(config).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
