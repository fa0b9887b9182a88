//! ledgermerge CLI - the main entry point for the `ledgermerge` binary.

use anyhow::Result;
use clap::Parser;

use ledgermerge_core::observability::init_logging;
use ledgermerge_ingest::cli::{self, Cli};

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.config()?;
    init_logging(config.log_format);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(cli::execute(cli, &config))
}
