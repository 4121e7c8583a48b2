//! stackform CLI: load and inspect stack configuration trees.

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "stackform",
    version,
    about = "Load, resolve, and validate nested stack configurations"
)]
struct Cli {
    /// Log filter, e.g. "debug" or "stackform=trace" (overrides STACKFORM_LOG)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: stackform::cli::Commands,
}

fn main() {
    let cli = Cli::parse();
    stackform::cli::init_logging(cli.log_level.as_deref());
    if let Err(e) = stackform::cli::dispatch(cli.command) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
