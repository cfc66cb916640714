use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::Context;
use gust_core::prelude::RawReport;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// The persistence backend behind a [ReportSink]. Writes are synchronous from
/// the subscriber task's point of view and best effort: a failed batch is
/// logged and dropped, never surfaced to the runners.
pub trait ReportWriter: Send + 'static {
    fn write_batch(&mut self, batch: &[RawReport]) -> anyhow::Result<()>;
}

/// Sized generously so that a briefly stalled writer does not exert
/// backpressure on the runners publishing leaf reports.
const CHANNEL_CAPACITY: usize = 16 * 1024;

enum SinkState {
    Idle { writer: Box<dyn ReportWriter> },
    Registered { close_tx: oneshot::Sender<()>, task: JoinHandle<()> },
    Closed,
}

/// Batching consumer of leaf-level raw reports, decoupled from the runners'
/// synchronous return path.
///
/// Runners publish each leaf report the instant the leaf finishes, onto a
/// bounded channel. A dedicated subscriber task accumulates them and writes a
/// batch once it reaches the configured size, or when the stream ends.
///
/// A sink accepts exactly one publisher per lifecycle. Registering twice, or
/// after [ReportSink::close], is a programming error and panics.
pub struct ReportSink {
    batch_size: usize,
    state: Mutex<SinkState>,
}

impl ReportSink {
    pub fn new(writer: impl ReportWriter, batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            state: Mutex::new(SinkState::Idle {
                writer: Box::new(writer),
            }),
        }
    }

    /// Spawn the subscriber task and hand out the publisher side of the
    /// channel. Clones of the sender may be shared across runners.
    pub fn register_publisher(&self, handle: &tokio::runtime::Handle) -> mpsc::Sender<RawReport> {
        let mut state = self.state.lock();
        match &*state {
            SinkState::Registered { .. } => panic!("Sink already has a registered publisher"),
            SinkState::Closed => panic!("Can't register a publisher on a closed sink"),
            SinkState::Idle { .. } => {}
        }

        let writer = match std::mem::replace(&mut *state, SinkState::Closed) {
            SinkState::Idle { writer } => writer,
            _ => unreachable!("state checked above"),
        };

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (close_tx, close_rx) = oneshot::channel();
        let task = handle.spawn(run_subscriber(rx, close_rx, writer, self.batch_size));
        *state = SinkState::Registered { close_tx, task };
        tx
    }

    /// Stop the subscriber, drain anything still queued and flush the final
    /// partial batch. No reports are lost on a normal shutdown.
    pub async fn close(&self) {
        let state = std::mem::replace(&mut *self.state.lock(), SinkState::Closed);
        if let SinkState::Registered { close_tx, task } = state {
            // The subscriber may already have exited if every publisher was
            // dropped, in which case the close signal has nowhere to go.
            let _ = close_tx.send(());
            if let Err(e) = task.await {
                log::error!("Sink subscriber task failed: {e:?}");
            }
        }
    }
}

async fn run_subscriber(
    mut rx: mpsc::Receiver<RawReport>,
    mut close_rx: oneshot::Receiver<()>,
    mut writer: Box<dyn ReportWriter>,
    batch_size: usize,
) {
    let mut batch = Vec::with_capacity(batch_size);
    loop {
        tokio::select! {
            report = rx.recv() => {
                match report {
                    Some(report) => {
                        batch.push(report);
                        if batch.len() >= batch_size {
                            flush(writer.as_mut(), &mut batch);
                        }
                    }
                    // Every publisher has been dropped.
                    None => break,
                }
            }
            _ = &mut close_rx => break,
        }
    }

    // Drain whatever was still queued when the stream ended.
    while let Ok(report) = rx.try_recv() {
        batch.push(report);
        if batch.len() >= batch_size {
            flush(writer.as_mut(), &mut batch);
        }
    }
    flush(writer.as_mut(), &mut batch);

    log::debug!("Sink subscriber finished");
}

fn flush(writer: &mut dyn ReportWriter, batch: &mut Vec<RawReport>) {
    if batch.is_empty() {
        return;
    }
    // Hand the batch off before writing so the channel keeps filling a fresh
    // buffer while the write is in progress.
    let pending = std::mem::take(batch);
    if let Err(e) = writer.write_batch(&pending) {
        log::error!(
            "Failed to write a batch of {} raw reports: {e:?}",
            pending.len()
        );
    }
}

/// Appends raw reports as newline-delimited JSON. This is the durable,
/// incremental persistence path that survives even if the process dies before
/// the in-memory aggregate is produced.
pub struct JsonlWriter {
    out: BufWriter<File>,
}

impl JsonlWriter {
    pub fn create(path: &Path) -> anyhow::Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create raw report file {}", path.display()))?;
        Ok(Self {
            out: BufWriter::new(file),
        })
    }
}

impl ReportWriter for JsonlWriter {
    fn write_batch(&mut self, batch: &[RawReport]) -> anyhow::Result<()> {
        for report in batch {
            serde_json::to_writer(&mut self.out, report)?;
            self.out.write_all(b"\n")?;
        }
        self.out.flush()?;
        Ok(())
    }
}
