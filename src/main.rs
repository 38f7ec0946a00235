mod cli;

use clap::Parser;
use cli::Cli;

use anyhow::Result;
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    let args = Cli::parse();
    TermLogger::init(
        args.log_level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )?;

    cli::handle(args).await
}
