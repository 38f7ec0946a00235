use std::collections::HashMap;

use anyhow::{anyhow, bail, Context, Result};
use log::{debug, info};
use reqwest::{Response, Url};
use serde::Deserialize;

use crate::WindowEvent;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 5600;
pub const TESTING_PORT: u16 = 5666;

/// The operations the importer needs from an ActivityWatch server.
#[allow(async_fn_in_trait)]
pub trait EventStore {
    /// Checks that the server answers before anything else is attempted.
    async fn connect(&self) -> Result<()>;

    /// Existing buckets, keyed by bucket id.
    async fn buckets(&self) -> Result<HashMap<String, Bucket>>;

    /// Appends `events` to an existing bucket in a single request.
    async fn insert_events(&self, bucket: &str, events: &[WindowEvent]) -> Result<()>;
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct Bucket {
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub client: Option<String>,
    pub hostname: Option<String>,
    pub created: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ServerInfo {
    hostname: Option<String>,
    version: Option<String>,
    #[serde(default)]
    testing: bool,
}

/// REST client for `aw-server`.
#[derive(Debug, Clone)]
pub struct AwClient {
    client: reqwest::Client,
    base_url: Url,
}

impl AwClient {
    pub fn new(host: &str, port: u16) -> Result<Self> {
        let base_url = Url::parse(&format!("http://{}:{}/api/0/", host, port))
            .with_context(|| format!("Invalid server address {}:{}", host, port))?;
        let client = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("Server URL {} cannot be a base", self.base_url))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

async fn check(res: Response) -> Result<Response> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let url = res.url().clone();
    let body = res.text().await.unwrap_or_default();
    bail!("{} returned {}: {}", url, status, body.trim())
}

impl EventStore for AwClient {
    async fn connect(&self) -> Result<()> {
        let url = self.endpoint(&["info"])?;
        debug!("Connecting to {}", url);
        let res = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to reach the AW server at {}", self.base_url))?;
        let info: ServerInfo = check(res).await?.json().await?;
        info!(
            "Connected to AW server {} on {} (testing: {})",
            info.version.as_deref().unwrap_or("unknown version"),
            info.hostname.as_deref().unwrap_or("unknown host"),
            info.testing
        );

        Ok(())
    }

    async fn buckets(&self) -> Result<HashMap<String, Bucket>> {
        // aw-server only routes the listing with the trailing slash.
        let url = self.endpoint(&["buckets", ""])?;
        let res = self.client.get(url).send().await?;
        let buckets: HashMap<String, Bucket> = check(res).await?.json().await?;
        debug!("Server reports {} buckets", buckets.len());

        Ok(buckets)
    }

    async fn insert_events(&self, bucket: &str, events: &[WindowEvent]) -> Result<()> {
        let url = self.endpoint(&["buckets", bucket, "events"])?;
        debug!("Posting {} events to {}", events.len(), url);
        let res = self
            .client
            .post(url)
            .json(events)
            .send()
            .await
            .with_context(|| format!("Failed to insert events into {}", bucket))?;
        check(res).await?;

        Ok(())
    }
}
