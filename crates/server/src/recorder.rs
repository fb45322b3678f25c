//! Append-only audit recorders.
//!
//! Request handlers hand records to a [`RecordQueue`] and return immediately.
//! A single writer thread drains the queue into a [`RecordSink`], so records
//! reach the sink whole and in completion order no matter how many handlers
//! append at once.
//!
//! The queue is bounded. When it is full the oldest pending record is
//! dropped and counted, which keeps memory flat if the sink stalls. Sink
//! failures are logged and counted; they never travel back to the caller.

use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use data_loader::{ExposureLogEntry, ProvenanceRecord};

/// Default number of records a queue holds before dropping the oldest
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Durable sink for provenance records
pub type ProvenanceRecorder = RecordQueue<ProvenanceRecord>;

/// Sink for per-request genre exposures
pub type ExposureRecorder = RecordQueue<ExposureLogEntry>;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("I/O error writing {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Recorder {0} is shut down")]
    Closed(&'static str),

    #[error("Failed to start recorder {name}: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Destination for one kind of record
pub trait RecordSink<T>: Send + 'static {
    fn append(&mut self, record: &T) -> Result<(), SinkError>;

    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

// =============================================================================
// Sinks
// =============================================================================

/// JSON Lines file opened in append mode
pub struct JsonlFileSink<T> {
    path: PathBuf,
    file: File,
    _record: PhantomData<fn(&T)>,
}

impl<T> JsonlFileSink<T> {
    /// Open (creating parent directories and the file if needed)
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        let io_err = |source| SinkError::Io {
            path: path.display().to_string(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(io_err)?;

        Ok(Self {
            path,
            file,
            _record: PhantomData,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> SinkError {
        SinkError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }
}

impl<T: Serialize + 'static> RecordSink<T> for JsonlFileSink<T> {
    fn append(&mut self, record: &T) -> Result<(), SinkError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        self.file.write_all(&line).map_err(|e| self.io_error(e))
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.file.sync_data().map_err(|e| self.io_error(e))
    }
}

/// Keeps records in memory; the handle returned by [`MemorySink::records`]
/// stays readable after the sink has moved into a queue.
pub struct MemorySink<T> {
    records: Arc<Mutex<Vec<T>>>,
}

impl<T> MemorySink<T> {
    pub fn new() -> Self {
        Self {
            records: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn records(&self) -> Arc<Mutex<Vec<T>>> {
        Arc::clone(&self.records)
    }
}

impl<T> Default for MemorySink<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> RecordSink<T> for MemorySink<T> {
    fn append(&mut self, record: &T) -> Result<(), SinkError> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}

// =============================================================================
// Queue
// =============================================================================

/// Counters describing a queue's lifetime so far
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub submitted: u64,
    pub written: u64,
    pub dropped: u64,
    pub failed: u64,
}

struct QueueState<T> {
    pending: VecDeque<T>,
    closed: bool,
}

struct Shared<T> {
    state: Mutex<QueueState<T>>,
    ready: Condvar,
    submitted: AtomicU64,
    written: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
}

impl<T> Shared<T> {
    fn stats(&self) -> QueueStats {
        QueueStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            written: self.written.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Bounded, drop-oldest queue in front of a [`RecordSink`]
pub struct RecordQueue<T> {
    name: &'static str,
    capacity: usize,
    shared: Arc<Shared<T>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Send + 'static> RecordQueue<T> {
    /// Start the writer thread for `sink`
    ///
    /// # Arguments
    /// * `name` - Used in logs and as the thread name
    /// * `sink` - Where records end up
    /// * `capacity` - Pending records kept before the oldest is dropped (min 1)
    pub fn spawn(
        name: &'static str,
        sink: impl RecordSink<T>,
        capacity: usize,
    ) -> Result<Self, SinkError> {
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState {
                pending: VecDeque::new(),
                closed: false,
            }),
            ready: Condvar::new(),
            submitted: AtomicU64::new(0),
            written: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name(format!("{}-writer", name))
            .spawn(move || write_loop(name, worker_shared, sink))
            .map_err(|source| SinkError::Spawn { name, source })?;

        Ok(Self {
            name,
            capacity: capacity.max(1),
            shared,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Queue `record` for writing. Never blocks on the sink.
    ///
    /// Fails only after [`shutdown`](Self::shutdown).
    pub fn append(&self, record: T) -> Result<(), SinkError> {
        let mut state = self.shared.state.lock();
        if state.closed {
            return Err(SinkError::Closed(self.name));
        }

        if state.pending.len() >= self.capacity {
            state.pending.pop_front();
            let dropped = self.shared.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(
                "{} queue full ({} pending), dropped oldest record ({} dropped so far)",
                self.name, self.capacity, dropped
            );
        }
        state.pending.push_back(record);
        self.shared.submitted.fetch_add(1, Ordering::Relaxed);
        drop(state);

        self.shared.ready.notify_one();
        Ok(())
    }

    pub fn stats(&self) -> QueueStats {
        self.shared.stats()
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Stop accepting records, write everything still pending, flush the
    /// sink and join the writer. Blocks; idempotent.
    pub fn shutdown(&self) -> QueueStats {
        self.shared.state.lock().closed = true;
        self.shared.ready.notify_all();

        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                warn!("{} writer thread panicked", self.name);
            }
        }

        let stats = self.stats();
        info!(
            "{} recorder stopped: submitted={} written={} dropped={} failed={}",
            self.name, stats.submitted, stats.written, stats.dropped, stats.failed
        );
        stats
    }
}

impl<T> Drop for RecordQueue<T> {
    fn drop(&mut self) {
        self.shared.state.lock().closed = true;
        self.shared.ready.notify_all();
    }
}

fn write_loop<T>(name: &'static str, shared: Arc<Shared<T>>, mut sink: impl RecordSink<T>) {
    loop {
        let batch: Vec<T> = {
            let mut state = shared.state.lock();
            while state.pending.is_empty() && !state.closed {
                shared.ready.wait(&mut state);
            }
            if state.pending.is_empty() {
                break;
            }
            state.pending.drain(..).collect()
        };

        debug!("{} writer draining {} records", name, batch.len());
        for record in &batch {
            match sink.append(record) {
                Ok(()) => {
                    shared.written.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    shared.failed.fetch_add(1, Ordering::Relaxed);
                    warn!("{} write failed: {}", name, e);
                }
            }
        }
    }

    if let Err(e) = sink.flush() {
        warn!("{} flush failed: {}", name, e);
    }
}
