// ===============================
// src/recorder.rs
// ===============================
//
// Append-only JSONL sink for market/order/fill events, enabled by setting
// `RECORD_FILE`. Buffered, flushed once per second; a failed write reopens
// the file once and otherwise drops the line. The engine sends with
// `try_send`, so a slow disk sheds records instead of stalling trading.
//

use std::path::Path;

use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info};

use crate::domain::Event;

type Writer = BufWriter<tokio::fs::File>;

async fn open_writer(path: &str) -> Writer {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(e) = fs::create_dir_all(parent).await {
                error!(?e, %path, "recorder: create_dir_all failed");
            }
        }
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .unwrap_or_else(|e| panic!("recorder: open {} failed: {}", path, e));
    BufWriter::new(file)
}

async fn write_line(writer: &mut Writer, path: &str, line: &str) {
    if writer.write_all(line.as_bytes()).await.is_ok()
        && writer.write_all(b"\n").await.is_ok()
    {
        return;
    }
    error!(%path, "recorder: write failed, reopening file");
    *writer = open_writer(path).await;
    if writer.write_all(line.as_bytes()).await.is_err()
        || writer.write_all(b"\n").await.is_err()
    {
        error!(%path, "recorder: write failed after reopen, event dropped");
    }
}

pub async fn run(mut rx: mpsc::Receiver<Event>, path: String) {
    info!(%path, "recorder: started");
    let mut writer = open_writer(&path).await;

    let mut flush_tick = interval(Duration::from_secs(1));
    flush_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            maybe_ev = rx.recv() => {
                let Some(ev) = maybe_ev else {
                    let _ = writer.flush().await;
                    info!("recorder: channel closed, stopped");
                    return;
                };
                match serde_json::to_string(&ev) {
                    Ok(line) => write_line(&mut writer, &path, &line).await,
                    Err(e) => error!(?e, "recorder: serialize error, skip event"),
                }
            }
            _ = flush_tick.tick() => {
                let _ = writer.flush().await;
            }
        }
    }
}
