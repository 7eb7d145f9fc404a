//! The audit buffer itself: a bounded ring queue that never
//! blocks the request path, flushed on a timer, with spill-to-disk on
//! overflow.

use std::collections::VecDeque;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex as SyncMutex;
use serde::Serialize;
use shared::error::CommonError;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, warn};

use crate::event::AuditEvent;
use crate::repository::AuditRepositoryLike;

#[derive(Debug, Clone)]
pub struct AuditBufferConfig {
    pub size: usize,
    pub flush_interval_ms: u64,
    pub spill_to_disk: bool,
    pub spill_path: PathBuf,
}

impl Default for AuditBufferConfig {
    fn default() -> Self {
        Self {
            size: 10_000,
            flush_interval_ms: 5_000,
            spill_to_disk: true,
            spill_path: PathBuf::from("audit-spill.jsonl"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditStats {
    pub received: u64,
    pub flushed: u64,
    pub dropped: u64,
    pub spilled: u64,
    pub overflow_events: u64,
    pub current_size: u64,
}

#[derive(Default)]
struct Counters {
    received: AtomicU64,
    flushed: AtomicU64,
    dropped: AtomicU64,
    spilled: AtomicU64,
    overflow_events: AtomicU64,
}

/// A sink that accepts a batch of flushed events. `SqliteAuditRepository`
/// (via [`RepositorySink`]) is the production implementation; tests use
/// in-memory fakes.
#[async_trait]
pub trait AuditSinkLike: Send + Sync {
    async fn write_batch(&self, events: &[AuditEvent]) -> Result<(), CommonError>;
}

pub struct RepositorySink<R: AuditRepositoryLike> {
    repo: R,
}

impl<R: AuditRepositoryLike> RepositorySink<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl<R: AuditRepositoryLike> AuditSinkLike for RepositorySink<R> {
    async fn write_batch(&self, events: &[AuditEvent]) -> Result<(), CommonError> {
        self.repo.insert_batch(events).await
    }
}

pub struct AuditBuffer {
    config: AuditBufferConfig,
    queue: SyncMutex<VecDeque<AuditEvent>>,
    counters: Counters,
    sink: Arc<dyn AuditSinkLike>,
    spill_tx: Option<mpsc::UnboundedSender<AuditEvent>>,
    flush_task: AsyncMutex<Option<JoinHandle<()>>>,
    flush_stop: Arc<tokio::sync::Notify>,
}

impl AuditBuffer {
    pub fn new(config: AuditBufferConfig, sink: Arc<dyn AuditSinkLike>) -> Arc<Self> {
        let spill_tx = if config.spill_to_disk {
            Some(Self::spawn_spill_writer(config.spill_path.clone()))
        } else {
            None
        };

        Arc::new(Self {
            config,
            queue: SyncMutex::new(VecDeque::new()),
            counters: Counters::default(),
            sink,
            spill_tx: spill_tx.map(|(tx, _handle)| tx),
            flush_task: AsyncMutex::new(None),
            flush_stop: Arc::new(tokio::sync::Notify::new()),
        })
    }

    /// Spawns the single-writer spill task. The spill file is opened
    /// append-only exactly once; every displaced event crosses an
    /// unbounded channel to this task so `add` never touches the
    /// filesystem itself.
    fn spawn_spill_writer(
        path: PathBuf,
    ) -> (mpsc::UnboundedSender<AuditEvent>, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<AuditEvent>();
        let handle = tokio::spawn(async move {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path);

            let mut file = match file {
                Ok(f) => f,
                Err(e) => {
                    error!(error = ?e, path = %path.display(), "failed to open audit spill file");
                    return;
                }
            };

            while let Some(event) = rx.recv().await {
                match serde_json::to_string(&event) {
                    Ok(line) => {
                        if let Err(e) = writeln!(file, "{line}") {
                            error!(error = ?e, "failed to append to audit spill file");
                        }
                    }
                    Err(e) => error!(error = ?e, "failed to serialize spilled audit event"),
                }
            }
        });
        (tx, handle)
    }

    /// Non-blocking from the caller's perspective: the event is
    /// always accepted, buffered, dropped, or spilled, but `add` never
    /// awaits I/O itself.
    pub fn add(&self, event: AuditEvent) {
        self.counters.received.fetch_add(1, Ordering::Relaxed);

        let displaced = {
            let mut queue = self.queue.lock();
            let displaced = if queue.len() >= self.config.size {
                queue.pop_front()
            } else {
                None
            };
            queue.push_back(event);
            displaced
        };

        if let Some(displaced) = displaced {
            self.counters.overflow_events.fetch_add(1, Ordering::Relaxed);
            if let Some(tx) = &self.spill_tx {
                if tx.send(displaced).is_ok() {
                    self.counters.spilled.fetch_add(1, Ordering::Relaxed);
                } else {
                    warn!("audit spill channel closed, dropping displaced event");
                    self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                }
            } else {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Atomically snapshots the queue and hands it to the sink. On sink
    /// failure the events are re-buffered at the head (preserving order)
    /// and the error is returned to the caller (the flush-timer loop),
    /// never to `add`'s caller.
    pub async fn flush(&self) -> Result<(), CommonError> {
        let snapshot: Vec<AuditEvent> = {
            let mut queue = self.queue.lock();
            queue.drain(..).collect()
        };

        if snapshot.is_empty() {
            return Ok(());
        }

        match self.sink.write_batch(&snapshot).await {
            Ok(()) => {
                self.counters
                    .flushed
                    .fetch_add(snapshot.len() as u64, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                let mut queue = self.queue.lock();
                for event in snapshot.into_iter().rev() {
                    queue.push_front(event);
                }
                Err(e)
            }
        }
    }

    /// Begins periodic flushing on `flush_interval_ms`.
    pub async fn start(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let stop = Arc::clone(&self.flush_stop);
        let interval_ms = self.config.flush_interval_ms;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_millis(interval_ms));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = this.flush().await {
                            error!(error = ?e, "audit buffer flush failed, events re-buffered");
                        }
                    }
                    _ = stop.notified() => break,
                }
            }
        });

        *self.flush_task.lock().await = Some(handle);
    }

    /// Stops the timer, drains once, and closes the spill writer.
    pub async fn shutdown(self: &Arc<Self>) {
        self.flush_stop.notify_one();
        if let Some(handle) = self.flush_task.lock().await.take() {
            let _ = handle.await;
        }

        if let Err(e) = self.flush().await {
            error!(error = ?e, "final audit buffer drain on shutdown failed");
        }

        // The spill writer task exits once its sender is dropped, which
        // happens when this `Arc<AuditBuffer>` itself is dropped by the
        // caller after `shutdown` returns.
    }

    pub fn stats(&self) -> AuditStats {
        let current_size = self.queue.lock().len() as u64;
        AuditStats {
            received: self.counters.received.load(Ordering::Relaxed),
            flushed: self.counters.flushed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            spilled: self.counters.spilled.load(Ordering::Relaxed),
            overflow_events: self.counters.overflow_events.load(Ordering::Relaxed),
            current_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{AuditEventBuilder, EventType};
    use std::sync::Mutex;

    struct CollectingSink {
        batches: Mutex<Vec<Vec<AuditEvent>>>,
    }

    impl CollectingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                batches: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl AuditSinkLike for CollectingSink {
        async fn write_batch(&self, events: &[AuditEvent]) -> Result<(), CommonError> {
            self.batches.lock().unwrap().push(events.to_vec());
            Ok(())
        }
    }

    struct FailingSink;

    #[async_trait]
    impl AuditSinkLike for FailingSink {
        async fn write_batch(&self, _events: &[AuditEvent]) -> Result<(), CommonError> {
            Err(CommonError::Internal {
                source: anyhow::anyhow!("simulated sink failure"),
            })
        }
    }

    fn event(action: &str) -> AuditEvent {
        AuditEventBuilder::new(EventType::AuthSuccess, action).build()
    }

    #[tokio::test]
    async fn add_then_flush_roundtrips() {
        let sink = CollectingSink::new();
        let buffer = AuditBuffer::new(
            AuditBufferConfig {
                size: 10,
                spill_to_disk: false,
                ..Default::default()
            },
            sink.clone(),
        );

        buffer.add(event("a"));
        buffer.add(event("b"));
        assert_eq!(buffer.stats().current_size, 2);

        buffer.flush().await.unwrap();
        let stats = buffer.stats();
        assert_eq!(stats.flushed, 2);
        assert_eq!(stats.current_size, 0);
        assert_eq!(sink.batches.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn overflow_without_spill_drops_oldest() {
        let sink = CollectingSink::new();
        let buffer = AuditBuffer::new(
            AuditBufferConfig {
                size: 2,
                spill_to_disk: false,
                ..Default::default()
            },
            sink,
        );

        buffer.add(event("a"));
        buffer.add(event("b"));
        buffer.add(event("c"));

        let stats = buffer.stats();
        assert_eq!(stats.received, 3);
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.current_size, 2);
        assert_eq!(stats.received, stats.flushed + stats.dropped + stats.spilled + stats.current_size);
    }

    #[tokio::test]
    async fn overflow_with_spill_writes_displaced_event() {
        let dir = tempfile::tempdir().unwrap();
        let spill_path = dir.path().join("spill.jsonl");
        let sink = CollectingSink::new();
        let buffer = AuditBuffer::new(
            AuditBufferConfig {
                size: 1,
                spill_to_disk: true,
                spill_path: spill_path.clone(),
                ..Default::default()
            },
            sink,
        );

        buffer.add(event("a"));
        buffer.add(event("b"));

        // give the spill task a chance to run
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let stats = buffer.stats();
        assert_eq!(stats.spilled, 1);
        assert_eq!(stats.current_size, 1);

        let contents = std::fs::read_to_string(&spill_path).unwrap();
        assert!(contents.contains("\"action\":\"a\""));
    }

    #[tokio::test]
    async fn failed_flush_rebuffers_events() {
        let buffer = AuditBuffer::new(
            AuditBufferConfig {
                size: 10,
                spill_to_disk: false,
                ..Default::default()
            },
            Arc::new(FailingSink),
        );

        buffer.add(event("a"));
        let result = buffer.flush().await;
        assert!(result.is_err());
        assert_eq!(buffer.stats().current_size, 1);
        assert_eq!(buffer.stats().flushed, 0);
    }

    #[tokio::test]
    async fn start_and_shutdown_drains_queue() {
        let sink = CollectingSink::new();
        let buffer = AuditBuffer::new(
            AuditBufferConfig {
                size: 10,
                flush_interval_ms: 20,
                spill_to_disk: false,
                ..Default::default()
            },
            sink.clone(),
        );

        buffer.start().await;
        buffer.add(event("a"));
        tokio::time::sleep(std::time::Duration::from_millis(60)).await;
        buffer.shutdown().await;

        assert_eq!(buffer.stats().flushed, 1);
    }
}
