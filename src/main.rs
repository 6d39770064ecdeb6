use anyhow::Result;
use clap::Parser;
use invite_merge::cli;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = cli::Cli::parse();
    let is_non_tui = args.is_non_tui();

    let res = cli::run(args).await;
    // Explicitly exit with code 0 on success, especially for non-TUI modes
    if res.is_ok() && is_non_tui {
        std::process::exit(0);
    }
    res
}
