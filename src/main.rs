use clap::Parser;
use colored::Colorize;
use hlsget::{
    commands::{Args, Commands},
    logger::Logger,
};
use log::LevelFilter;
use std::process;

static LOGGER: Logger = Logger;

async fn run() -> anyhow::Result<()> {
    let args = Args::parse();

    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(if args.verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        });
    }

    match args.command {
        Commands::Merge(args) => args.execute()?,
        Commands::Save(args) => args.execute().await?,
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("{}: {:#}", "error".bold().red(), e);
        process::exit(1);
    }
}
