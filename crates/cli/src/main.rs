use std::process::ExitCode;

use clap::Parser;
use tracing::error;

mod args;
mod commands;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = args::Args::parse();

    tracing_subscriber::fmt().with_max_level(tracing::level_filters::LevelFilter::from(args.log_level)).init();

    match args.execute().await {
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}
