//! `mc publish`: push one frame through a hub's HTTP route.

use anyhow::{Context, Result, anyhow};
use serde_json::Value;

use crate::hub::PublishResponse;

/// Post `data` on `topic` to the hub at `base_url`. Returns how many
/// connections the hub queued it for.
pub async fn publish(base_url: &str, topic: &str, data: &Value) -> Result<usize> {
    let mut url = reqwest::Url::parse(base_url).with_context(|| format!("invalid hub url {base_url}"))?;
    url.path_segments_mut()
        .map_err(|_| anyhow!("hub url {base_url} cannot take a path"))?
        .pop_if_empty()
        .extend(["api", "live", topic]);

    let resp = reqwest::Client::new()
        .post(url.clone())
        .json(data)
        .send()
        .await
        .with_context(|| format!("failed to reach hub at {url}"))?
        .error_for_status()
        .context("hub rejected the frame")?;

    let body: PublishResponse = resp.json().await.context("unexpected hub response")?;
    Ok(body.delivered)
}
