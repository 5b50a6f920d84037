//! Buffered ingestion
//!
//! Submissions are collected by a single task and flushed through
//! [`IngestionService::ingest_batch`] when the buffer reaches the batch size
//! or the flush window since the first buffered event elapses, whichever
//! comes first. Each submitter gets its own result back.

use crate::{IngestionResult, IngestionService, RawEvent};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Ingestion queue is closed")]
    Closed,
}

struct Submission {
    event: RawEvent,
    reply: oneshot::Sender<IngestionResult>,
}

pub struct IngestionQueue {
    tx: mpsc::Sender<Submission>,
    worker: JoinHandle<()>,
}

impl IngestionQueue {
    /// Start the buffering task. Must be called inside a tokio runtime.
    pub fn spawn(service: Arc<IngestionService>) -> Self {
        let batch_size = service.config().batch_size.max(1);
        let flush_window = service.config().flush_window;
        let (tx, rx) = mpsc::channel(batch_size * 4);
        let worker = tokio::spawn(run(service, rx, batch_size, flush_window));
        Self { tx, worker }
    }

    /// Queue one event. The receiver resolves once its batch has been flushed.
    pub async fn submit(&self, event: RawEvent) -> Result<oneshot::Receiver<IngestionResult>, QueueError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Submission { event, reply })
            .await
            .map_err(|_| QueueError::Closed)?;
        Ok(rx)
    }

    /// Stop accepting events and flush whatever is buffered.
    pub async fn close(self) {
        drop(self.tx);
        if let Err(e) = self.worker.await {
            warn!("ingestion queue worker ended abnormally: {}", e);
        }
    }
}

async fn run(
    service: Arc<IngestionService>,
    mut rx: mpsc::Receiver<Submission>,
    batch_size: usize,
    flush_window: Duration,
) {
    let mut buffer: Vec<Submission> = Vec::with_capacity(batch_size);
    let mut deadline: Option<Instant> = None;

    loop {
        let Some(flush_at) = deadline else {
            match rx.recv().await {
                Some(submission) => {
                    buffer.push(submission);
                    deadline = Some(Instant::now() + flush_window);
                    if buffer.len() >= batch_size {
                        flush(&service, &mut buffer).await;
                        deadline = None;
                    }
                    continue;
                }
                None => break,
            }
        };

        tokio::select! {
            received = rx.recv() => match received {
                Some(submission) => {
                    buffer.push(submission);
                    if buffer.len() >= batch_size {
                        flush(&service, &mut buffer).await;
                        deadline = None;
                    }
                }
                None => break,
            },
            _ = tokio::time::sleep_until(flush_at) => {
                flush(&service, &mut buffer).await;
                deadline = None;
            }
        }
    }

    if !buffer.is_empty() {
        flush(&service, &mut buffer).await;
    }
    debug!("ingestion queue drained");
}

async fn flush(service: &IngestionService, buffer: &mut Vec<Submission>) {
    let (events, replies): (Vec<RawEvent>, Vec<oneshot::Sender<IngestionResult>>) =
        buffer.drain(..).map(|s| (s.event, s.reply)).unzip();

    let results = service.ingest_batch(events).await;
    for (reply, result) in replies.into_iter().zip(results) {
        // Submitter may have stopped waiting
        let _ = reply.send(result);
    }
}
