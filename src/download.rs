//! Rule-list downloads.
//!
//! Fetches a list's URL and atomically replaces its local file: the body
//! streams into a uniquely named `download-*.tmp` under the working
//! directory, which is renamed over `<id>.rules` only on success and
//! removed on every failure path. A successful download advances the
//! list's `last_updated` and persists the manifest.

use crate::filter::{RuleFilter, DOWNLOAD_TIMEOUT};
use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use futures::StreamExt;
use reqwest::StatusCode;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::info;
use uuid::Uuid;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Builds the shared HTTP client.
///
/// Without a proxy, the process environment's proxy variables apply.
/// With one, all outbound connections go through SOCKS5 (`socks5h`, so
/// name resolution also happens proxy-side).
///
/// # Errors
///
/// An unusable SOCKS5 address is fatal at init.
pub(crate) fn build_http_client(socks5: Option<&str>) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .timeout(DOWNLOAD_TIMEOUT)
        .connect_timeout(CONNECT_TIMEOUT);

    if let Some(addr) = socks5 {
        info!(proxy = addr, "using SOCKS5 proxy for rule downloads");
        let proxy = reqwest::Proxy::all(format!("socks5h://{addr}"))
            .context("failed to configure SOCKS5 proxy")?;
        builder = builder.proxy(proxy);
    }

    builder.build().context("failed to build HTTP client")
}

impl RuleFilter {
    /// Downloads one list, racing the shutdown signal and a 30 s
    /// deadline. No download starts after shutdown.
    pub(crate) async fn download_guarded(&self, id: &str) -> Result<()> {
        if self.inner.shutdown.is_cancelled() {
            bail!("plugin is shutting down");
        }
        tokio::select! {
            _ = self.inner.shutdown.cancelled() => bail!("download aborted by shutdown"),
            res = tokio::time::timeout(DOWNLOAD_TIMEOUT, self.download_list(id)) => {
                res.map_err(|_| anyhow!("download timed out for rule list {id}"))?
            }
        }
    }

    /// Fetches the list's URL and atomically replaces its local file.
    pub(crate) async fn download_list(&self, id: &str) -> Result<()> {
        let (name, url, local_path) = {
            let rules = self.inner.rules.read().unwrap();
            let list = rules
                .get(id)
                .ok_or_else(|| anyhow!("rule list with id {id} not found"))?;
            (list.name.clone(), list.url.clone(), list.local_path.clone())
        };

        info!(list = %name, url = %url, "downloading rule list");

        let resp = self
            .inner
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("http request failed for rule list '{name}'"))?;
        if resp.status() != StatusCode::OK {
            bail!(
                "bad status code {} for rule list '{}'",
                resp.status().as_u16(),
                name
            );
        }

        let tmp = self.inner.dir.join(format!("download-{}.tmp", Uuid::new_v4()));
        if let Err(err) = stream_to_file(resp, &tmp).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(err)
                .with_context(|| format!("failed to write temp file for rule list '{name}'"));
        }
        if let Err(err) = tokio::fs::rename(&tmp, &local_path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(err)
                .with_context(|| format!("failed to move temp file for rule list '{name}'"));
        }

        {
            let mut rules = self.inner.rules.write().unwrap();
            if let Some(list) = rules.get_mut(id) {
                list.last_updated = Some(Utc::now());
            }
        }

        info!(list = %name, "rule list downloaded and saved");
        self.save_manifest().await
    }
}

/// Streams a response body into `path`, closing the file before return
/// so the caller can rename it.
async fn stream_to_file(resp: reqwest::Response, path: &Path) -> Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut body = resp.bytes_stream();
    while let Some(chunk) = body.next().await {
        file.write_all(&chunk?).await?;
    }
    file.flush().await?;
    Ok(())
}
