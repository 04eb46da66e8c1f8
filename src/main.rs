use clap::Parser;

use suga::{cli::CliArgs, commands, telemetry};

#[tokio::main]
async fn main() {
    let cli = CliArgs::parse();
    telemetry::init();
    if let Err(err) = commands::run(cli).await {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
