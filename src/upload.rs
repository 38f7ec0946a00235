use std::{
    io::{BufRead, Write},
    path::PathBuf,
};

use anyhow::{bail, ensure, Context, Result};
use indicatif::ProgressBar;
use itertools::Itertools;
use log::{debug, info};

use crate::{parse_records, to_window_events, EventStore, WindowEvent};

/// Events per insert request.
pub const CHUNK_SIZE: usize = 100;

const BUCKET_PREFIX: &str = "aw-watcher-window_";

/// Name of the window watcher bucket the server keeps for `hostname`.
pub fn bucket_name(hostname: &str) -> String {
    format!("{}{}", BUCKET_PREFIX, hostname)
}

#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub file: PathBuf,
    pub bucket: String,
    pub chunk_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Done { inserted: usize },
    Aborted,
}

/// Fails unless `bucket` already exists. Buckets are never created here.
pub async fn ensure_bucket<S: EventStore>(store: &S, bucket: &str) -> Result<()> {
    let existing = store.buckets().await?;
    if !existing.contains_key(bucket) {
        bail!(
            "Bucket {} doesn't already exist, aborting. Existing buckets: [{}]",
            bucket,
            existing.keys().sorted().join(", ")
        );
    }
    debug!("Found bucket {}", bucket);

    Ok(())
}

/// Asks the operator to type `yes`. Anything else, including EOF, declines.
pub fn confirm<R: BufRead, W: Write>(mut input: R, mut output: W, bucket: &str) -> Result<bool> {
    write!(
        output,
        "These events will now be submitted to the AW server into bucket '{}'. Type 'yes' to confirm: ",
        bucket
    )?;
    output.flush()?;

    let mut answer = String::new();
    input
        .read_line(&mut answer)
        .context("Failed to read confirmation")?;

    Ok(answer.trim().eq_ignore_ascii_case("yes"))
}

/// Inserts `events` in order, `chunk_size` at a time. Stops at the first
/// failed request; chunks sent before it stay on the server.
pub async fn upload_events<S: EventStore>(
    store: &S,
    bucket: &str,
    events: &[WindowEvent],
    chunk_size: usize,
    progress: &ProgressBar,
) -> Result<usize> {
    ensure!(chunk_size > 0, "Chunk size must be positive");
    progress.set_length(events.len() as u64);

    let mut inserted = 0;
    for (i, chunk) in events.chunks(chunk_size).enumerate() {
        store
            .insert_events(bucket, chunk)
            .await
            .with_context(|| format!("Chunk {} failed after {} inserted events", i + 1, inserted))?;
        inserted += chunk.len();
        progress.inc(chunk.len() as u64);
    }
    progress.finish();

    Ok(inserted)
}

/// Runs a full import: load and convert the file, check the server, ask for
/// confirmation, then upload. Input errors surface before any request.
pub async fn import<S, R, W>(
    store: &S,
    options: &ImportOptions,
    input: R,
    mut output: W,
    progress: &ProgressBar,
) -> Result<Outcome>
where
    S: EventStore,
    R: BufRead,
    W: Write,
{
    info!("Reading input file...");
    let records = parse_records(&options.file)?;
    let events = to_window_events(&records)?;

    info!("Connecting to AW server...");
    store.connect().await?;
    ensure_bucket(store, &options.bucket).await?;

    if !confirm(input, &mut output, &options.bucket)? {
        info!("Aborted.");
        return Ok(Outcome::Aborted);
    }

    info!("Inserting {} events...", events.len());
    let inserted = upload_events(store, &options.bucket, &events, options.chunk_size, progress).await?;
    info!("Done.");

    Ok(Outcome::Done { inserted })
}
