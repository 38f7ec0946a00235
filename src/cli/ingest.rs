use std::{
    io::{stdin, stdout},
    path::PathBuf,
};

use anyhow::{anyhow, Result};
use aw_from_manictime::{
    bucket_name,
    client::{DEFAULT_HOST, DEFAULT_PORT, TESTING_PORT},
    import,
    upload::CHUNK_SIZE,
    AwClient, ImportOptions, Outcome,
};
use clap::{builder::FalseyValueParser, ArgAction, Args};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info};
use sysinfo::System;

#[derive(Debug, Args, Clone)]
pub struct IngestArgs {
    /// ManicTime CSV export
    file: PathBuf,

    #[clap(long, env = "AW_SERVER_HOST", default_value = DEFAULT_HOST)]
    host: String,

    #[clap(
        long,
        env = "AW_SERVER_PORT",
        help = "Server port. Defaults to 5600, or 5666 with --testing"
    )]
    port: Option<u16>,

    #[clap(
        long,
        env = "AW_TESTING",
        action = ArgAction::SetTrue,
        value_parser = FalseyValueParser::new(),
        help = "Talk to a testing instance of the AW server"
    )]
    testing: bool,

    #[clap(
        long,
        env = "AW_HOSTNAME",
        help = "Host whose aw-watcher-window bucket receives the events. Defaults to this machine"
    )]
    hostname: Option<String>,

    #[clap(long, default_value_t = CHUNK_SIZE, help = "Events per insert request")]
    chunk_size: usize,
}

impl IngestArgs {
    fn port(&self) -> u16 {
        match (self.port, self.testing) {
            (Some(port), _) => port,
            (None, true) => TESTING_PORT,
            (None, false) => DEFAULT_PORT,
        }
    }
}

pub(crate) async fn handle(args: IngestArgs) -> Result<()> {
    info!("Ingesting {:?}", args.file);

    let hostname = args
        .hostname
        .clone()
        .or_else(System::host_name)
        .ok_or_else(|| anyhow!("Failed to determine the local host name, pass --hostname"))?;
    let options = ImportOptions {
        file: args.file.clone(),
        bucket: bucket_name(&hostname),
        chunk_size: args.chunk_size,
    };
    debug!("Import options: {:?}", options);

    let client = AwClient::new(&args.host, args.port())?;
    let progress = ProgressBar::new(0).with_style(ProgressStyle::with_template(
        "{bar:40} {pos}/{len} events [{elapsed_precise}]",
    )?);

    match import(&client, &options, stdin().lock(), stdout(), &progress).await? {
        Outcome::Done { inserted } => info!("Inserted {} events into {}", inserted, options.bucket),
        Outcome::Aborted => debug!("Operator declined the import"),
    }

    Ok(())
}
