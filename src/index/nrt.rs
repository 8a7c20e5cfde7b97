//! Near-real-time reader management.
//!
//! One background thread owns reopening. Searchers `acquire()` a lease on
//! the current snapshot and drop it when done. A caller that needs a
//! just-written document to become visible calls `refresh()`, which nudges
//! the reopen thread onto its short interval and waits for the new
//! snapshot.

use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::JoinHandle;
use std::time::Instant;

use crossbeam_channel::{RecvTimeoutError, Sender};
use log::{debug, warn};
use parking_lot::{Condvar, Mutex, RwLock};

use crate::config::NrtConfig;
use crate::error::{LindenError, Result};
use crate::index::backend::{IndexReader, IndexWriter};

#[derive(Debug)]
enum Signal {
    /// A caller is blocked in `refresh()`.
    Wake,
    Stop,
}

#[derive(Debug)]
struct Shared {
    writer: Arc<dyn IndexWriter>,
    current: RwLock<Arc<dyn IndexReader>>,
    /// Version of `current`, guarded for the refresh condvar.
    visible: Mutex<u64>,
    reopened: Condvar,
    outstanding: AtomicUsize,
    waiters: AtomicUsize,
    closed: AtomicBool,
}

impl Shared {
    fn reopen(&self) -> Result<bool> {
        let target = self.writer.version();
        if *self.visible.lock() >= target {
            return Ok(false);
        }
        let reader = self.writer.open_reader()?;
        let version = reader.version();

        // The reopen thread and `reopen_now` may race; never go backwards.
        let mut visible = self.visible.lock();
        if version <= *visible {
            return Ok(false);
        }
        *self.current.write() = reader;
        *visible = version;
        self.reopened.notify_all();
        Ok(true)
    }
}

/// A leased snapshot. Dropping the lease releases it.
#[derive(Debug)]
pub struct ReaderLease {
    reader: Arc<dyn IndexReader>,
    shared: Arc<Shared>,
}

impl Deref for ReaderLease {
    type Target = dyn IndexReader;

    fn deref(&self) -> &Self::Target {
        self.reader.as_ref()
    }
}

impl Drop for ReaderLease {
    fn drop(&mut self) {
        self.shared.outstanding.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Owns the shared read snapshot of one index generation.
#[derive(Debug)]
pub struct NrtReaderManager {
    shared: Arc<Shared>,
    signals: Sender<Signal>,
    handle: Mutex<Option<JoinHandle<()>>>,
    config: NrtConfig,
}

impl NrtReaderManager {
    /// Open the first snapshot and start the reopen thread.
    pub fn start(writer: Arc<dyn IndexWriter>, config: NrtConfig) -> Result<Self> {
        let reader = writer.open_reader()?;
        let shared = Arc::new(Shared {
            writer,
            visible: Mutex::new(reader.version()),
            current: RwLock::new(reader),
            reopened: Condvar::new(),
            outstanding: AtomicUsize::new(0),
            waiters: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        });

        let (tx, rx) = crossbeam_channel::unbounded();
        let loop_shared = shared.clone();
        let loop_config = config.clone();
        let handle = std::thread::Builder::new()
            .name("linden-nrt".to_string())
            .spawn(move || {
                loop {
                    let interval = if loop_shared.waiters.load(Ordering::Acquire) > 0 {
                        loop_config.min_refresh()
                    } else {
                        loop_config.max_refresh()
                    };
                    match rx.recv_timeout(interval) {
                        Ok(Signal::Wake) | Err(RecvTimeoutError::Timeout) => {}
                        Ok(Signal::Stop) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                    if let Err(e) = loop_shared.reopen() {
                        warn!("failed to reopen reader: {e}");
                    }
                }
                debug!("reopen loop stopped");
            })?;

        Ok(Self {
            shared,
            signals: tx,
            handle: Mutex::new(Some(handle)),
            config,
        })
    }

    /// Lease the current snapshot.
    pub fn acquire(&self) -> Result<ReaderLease> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(LindenError::closed("reader manager is closed"));
        }
        self.shared.outstanding.fetch_add(1, Ordering::AcqRel);
        Ok(ReaderLease {
            reader: self.shared.current.read().clone(),
            shared: self.shared.clone(),
        })
    }

    /// Number of leases not yet released.
    pub fn outstanding(&self) -> usize {
        self.shared.outstanding.load(Ordering::Acquire)
    }

    /// Version of the snapshot handed out by `acquire()`.
    pub fn visible_version(&self) -> u64 {
        *self.shared.visible.lock()
    }

    /// Block until every write made before this call is visible to `acquire()`.
    pub fn refresh(&self) -> Result<()> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(LindenError::closed("reader manager is closed"));
        }
        let target = self.shared.writer.version();
        let deadline = Instant::now() + self.config.refresh_wait();

        self.shared.waiters.fetch_add(1, Ordering::AcqRel);
        // The loop may be parked on its long interval.
        let _ = self.signals.send(Signal::Wake);

        let mut visible = self.shared.visible.lock();
        while *visible < target {
            if self
                .shared
                .reopened
                .wait_until(&mut visible, deadline)
                .timed_out()
            {
                break;
            }
        }
        let reached = *visible >= target;
        drop(visible);
        self.shared.waiters.fetch_sub(1, Ordering::AcqRel);

        if reached {
            Ok(())
        } else {
            Err(LindenError::timeout(format!(
                "version {target} not visible after {:?}",
                self.config.refresh_wait()
            )))
        }
    }

    /// Reopen on the calling thread.
    pub fn reopen_now(&self) -> Result<bool> {
        self.shared.reopen()
    }

    /// Stop the reopen thread. Outstanding leases stay valid.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.signals.send(Signal::Stop);
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                warn!("reopen thread panicked");
            }
        }
    }
}

impl Drop for NrtReaderManager {
    fn drop(&mut self) {
        self.close();
    }
}
