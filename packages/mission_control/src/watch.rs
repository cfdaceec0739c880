//! `mc watch`: tail live topics through the shared client.

use std::future::Future;
use std::io::Write;

use anyhow::{Context, Result};
use live_mux::{DataFrame, LiveClient, Subscription};
use tokio::sync::mpsc;
use tracing::info;

/// Subscribe to `topics` and write each frame to `out` as one JSON line
/// until `shutdown` resolves. Returns the number of lines written.
///
/// The consumer and its subscriptions are released before returning.
pub async fn tail<W, S>(client: &LiveClient, topics: &[String], mut out: W, shutdown: S) -> Result<u64>
where
    W: Write,
    S: Future<Output = ()>,
{
    let live = client.consumer();
    let (tx, mut frames) = mpsc::unbounded_channel::<DataFrame>();

    let subscriptions: Vec<Subscription> = topics
        .iter()
        .map(|topic| {
            let tx = tx.clone();
            let name = topic.clone();
            live.subscribe(topic.clone(), move |data| {
                let _ = tx.send(DataFrame::new(name.clone(), data.clone()));
            })
        })
        .collect();
    drop(tx);

    let mut connectivity = live.connectivity();
    let mut written = 0u64;
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            changed = connectivity.changed() => {
                if changed.is_err() {
                    break;
                }
                let connected = *connectivity.borrow_and_update();
                info!(connected, "live connectivity changed");
            }
            Some(frame) = frames.recv() => {
                let line = frame.encode().context("failed to encode frame")?;
                writeln!(out, "{line}").context("failed to write frame")?;
                out.flush().context("failed to flush output")?;
                written += 1;
            }
        }
    }

    drop(subscriptions);
    live.dispose();
    info!(written, metrics = ?client.metrics(), "watch finished");
    Ok(written)
}
