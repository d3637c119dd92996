use anyhow::Context;
use tonutils_boc::cli::Cli;
use tonutils_boc::utils::{init_logger, verbosity_filter};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse_args();
    init_logger(verbosity_filter(cli.verbose)).context("Failed to initialise logger")?;
    cli.execute()?;
    Ok(())
}
