use std::io::Write;
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::task;
use tokio::time::{self, Duration};
use tracing_appender::rolling::{self, RollingFileAppender};
use tracing_subscriber::fmt::MakeWriter;

/// One auction-trail entry.
pub struct LogEntry {
    pub level: String,
    pub content: String,
}

/// Batched auction-trail logger.
///
/// Entries are queued on an mpsc channel and flushed to an hourly rolling
/// file either when the batch fills or on the flush interval, whichever
/// comes first. Old files are removed after the retention window.
pub struct RuntimeLogger {
    sender: Sender<LogEntry>,
}

impl RuntimeLogger {
    /// - `log_dir`: directory the trail files land in
    /// - `file_prefix`: file name prefix, e.g. "auction" -> auction_trail.json
    /// - `buffer_size`: mpsc channel capacity
    /// - `batch_size`: entries per write
    /// - `flush_interval`: flush cadence in milliseconds
    pub fn new(
        log_dir: &str,
        file_prefix: &str,
        buffer_size: usize,
        batch_size: usize,
        flush_interval: u64,
    ) -> Arc<Self> {
        let (sender, receiver) = mpsc::channel(buffer_size);
        let file_name = format!("{file_prefix}_trail.json");
        let appender = Arc::new(rolling::hourly(log_dir, &file_name));

        tokio::spawn(Self::background_writer(
            appender,
            receiver,
            batch_size,
            flush_interval,
        ));
        {
            let log_dir = log_dir.to_string();
            tokio::spawn(async move {
                let retention_hours = 72;
                let cleanup_interval = Duration::from_secs(3600);
                loop {
                    Self::cleanup_old_logs(&log_dir, retention_hours).await;
                    time::sleep(cleanup_interval).await;
                }
            });
        }

        Arc::new(Self { sender })
    }

    pub async fn log(&self, level: &str, message: &str) {
        let entry = LogEntry {
            level: level.to_string(),
            content: json!({
                "timestamp": Utc::now().to_rfc3339(),
                "level": level,
                "message": message,
            })
            .to_string(),
        };
        if let Err(err) = self.sender.send(entry).await {
            eprintln!("Failed to queue trail log message: {err}");
        }
    }

    async fn background_writer(
        appender: Arc<RollingFileAppender>,
        mut receiver: Receiver<LogEntry>,
        batch_size: usize,
        flush_interval: u64,
    ) {
        let mut buffer: Vec<String> = Vec::new();
        let mut interval = time::interval(Duration::from_millis(flush_interval));
        loop {
            tokio::select! {
                entry = receiver.recv() => {
                    match entry {
                        Some(entry) => {
                            buffer.push(entry.content);
                            if buffer.len() >= batch_size {
                                Self::write_to_disk(Arc::clone(&appender), std::mem::take(&mut buffer)).await;
                            }
                        }
                        // Channel closed: flush what is left and stop.
                        None => {
                            if !buffer.is_empty() {
                                Self::write_to_disk(appender, buffer).await;
                            }
                            return;
                        }
                    }
                },
                _ = interval.tick() => {
                    if !buffer.is_empty() {
                        Self::write_to_disk(Arc::clone(&appender), std::mem::take(&mut buffer)).await;
                    }
                }
            }
        }
    }

    async fn write_to_disk(appender: Arc<RollingFileAppender>, buffer: Vec<String>) {
        let content = buffer.join("\n") + "\n";
        let result = task::spawn_blocking(move || {
            let mut writer = appender.make_writer();
            writer.write_all(content.as_bytes())
        })
        .await;
        match result {
            Ok(Err(err)) => eprintln!("Failed to write trail logs: {err}"),
            Err(err) => eprintln!("Trail log writer task failed: {err}"),
            Ok(Ok(())) => {}
        }
    }

    async fn cleanup_old_logs(log_dir: &str, retention_hours: u64) {
        use std::time::{Duration as StdDuration, SystemTime};
        let retention = StdDuration::from_secs(retention_hours * 3600);
        let now = SystemTime::now();
        let Ok(mut dir) = tokio::fs::read_dir(log_dir).await else {
            return;
        };
        while let Ok(Some(entry)) = dir.next_entry().await {
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            let Ok(modified) = metadata.modified() else {
                continue;
            };
            if now.duration_since(modified).unwrap_or_default() > retention {
                if let Err(err) = tokio::fs::remove_file(entry.path()).await {
                    eprintln!("Failed to delete old trail log {:?}: {err}", entry.path());
                }
            }
        }
    }

    pub async fn shutdown(&self) {
        // Give the background writer a moment to drain the channel.
        time::sleep(Duration::from_secs(1)).await;
    }
}
