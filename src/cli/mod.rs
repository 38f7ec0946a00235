mod ingest;

use anyhow::Result;
use clap::Parser;
use log::LevelFilter;

use self::ingest::IngestArgs;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Import ManicTime CSV exports into ActivityWatch", long_about = None)]
pub(crate) struct Cli {
    #[command(flatten)]
    ingest: IngestArgs,

    #[clap(
        long,
        env = "AW_LOG_LEVEL",
        default_value = "info",
        help = "off, error, warn, info, debug or trace"
    )]
    pub log_level: LevelFilter,
}

pub(crate) async fn handle(args: Cli) -> Result<()> {
    ingest::handle(args.ingest).await
}
