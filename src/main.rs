mod api_client;
mod auth;
mod catalog;
mod config;
mod error;
mod fault;
mod postprocess;
mod report_job;
mod runner;
mod token_store;
mod uploader;

use clap::{Parser, Subcommand};
use config::Config;
use error::Error;
use log::error;

#[derive(Parser)]
struct Args {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    command: Extract,
}

#[derive(Subcommand)]
enum Extract {
    /// Downloads the configured reports for every reachable account and loads them.
    Extract {
        #[arg(
            short = 'd',
            long = "days_back",
            help = "Number of days covered by the report window"
        )]
        days_back: u32,

        #[arg(
            short = 's',
            long = "days_skip",
            default_value_t = 0,
            help = "Number of most recent days left out of the window, today excluded"
        )]
        days_skip: u32,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    env_logger::init();

    match &args.command {
        Extract::Extract {
            days_back,
            days_skip,
        } => {
            if let Err(err) = runner::extract_and_load(args.config, *days_back, *days_skip).await {
                error!("failed to extract and load reports: {}", err);
                std::process::exit(1);
            }
        }
    };

    Ok(())
}
