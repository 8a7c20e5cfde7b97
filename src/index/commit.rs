//! Background commits of one index generation.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use crossbeam_channel::{RecvTimeoutError, Sender};
use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::config::CommitPolicy;
use crate::error::Result;
use crate::index::backend::IndexWriter;

#[derive(Debug)]
struct CommitState {
    docs_at_last_commit: u64,
    last_commit: Instant,
    commits: u64,
}

#[derive(Debug)]
struct Committer {
    writer: Arc<dyn IndexWriter>,
    policy: CommitPolicy,
    state: Mutex<CommitState>,
}

impl Committer {
    fn due(&self) -> bool {
        let state = self.state.lock();
        let delta = self
            .writer
            .docs_written()
            .saturating_sub(state.docs_at_last_commit);
        if delta == 0 && !self.writer.has_uncommitted_changes() {
            return false;
        }
        delta >= self.policy.max_pending_docs
            || state.last_commit.elapsed() >= self.policy.max_interval()
    }

    fn commit(&self) -> Result<u64> {
        let mut state = self.state.lock();
        let written = self.writer.docs_written();
        let version = self.writer.commit()?;
        state.docs_at_last_commit = written;
        state.last_commit = Instant::now();
        state.commits += 1;
        Ok(version)
    }
}

/// Commits when enough documents were written or enough time passed since
/// the last commit, whichever comes first. Stopping performs one final commit.
#[derive(Debug)]
pub struct CommitScheduler {
    committer: Arc<Committer>,
    stop: Sender<()>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl CommitScheduler {
    pub fn start(writer: Arc<dyn IndexWriter>, policy: CommitPolicy) -> Result<Self> {
        let committer = Arc::new(Committer {
            state: Mutex::new(CommitState {
                docs_at_last_commit: writer.docs_written(),
                last_commit: Instant::now(),
                commits: 0,
            }),
            writer,
            policy,
        });

        let (tx, rx) = crossbeam_channel::bounded::<()>(1);
        let worker = committer.clone();
        let handle = std::thread::Builder::new()
            .name("linden-commit".to_string())
            .spawn(move || {
                loop {
                    match rx.recv_timeout(worker.policy.poll_interval()) {
                        Err(RecvTimeoutError::Timeout) => {
                            if worker.due() {
                                match worker.commit() {
                                    Ok(version) => debug!("committed version {version}"),
                                    Err(e) => warn!("scheduled commit failed: {e}"),
                                }
                            }
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                if let Err(e) = worker.commit() {
                    warn!("final commit failed: {e}");
                } else {
                    info!("commit loop drained");
                }
            })?;

        Ok(Self {
            committer,
            stop: tx,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Commit immediately and reset both thresholds.
    pub fn commit_now(&self) -> Result<u64> {
        self.committer.commit()
    }

    /// Commits performed so far, scheduled and explicit.
    pub fn commits(&self) -> u64 {
        self.committer.state.lock().commits
    }

    /// Stop the loop after its final commit. Idempotent.
    pub fn stop(&self) {
        let Some(handle) = self.handle.lock().take() else {
            return;
        };
        let _ = self.stop.try_send(());
        if handle.join().is_err() {
            warn!("commit thread panicked");
        }
    }
}

impl Drop for CommitScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Document;
    use crate::index::memory::MemoryIndexWriter;
    use std::time::Duration;
    use tempfile::TempDir;

    fn make_writer(dir: &TempDir) -> Arc<dyn IndexWriter> {
        Arc::new(MemoryIndexWriter::open(dir.path()).unwrap())
    }

    fn add(writer: &Arc<dyn IndexWriter>, id: &str) {
        writer
            .add_document(id, Document::new().add_text("title", id))
            .unwrap();
    }

    #[test]
    fn test_commits_on_doc_delta() {
        let dir = TempDir::new().unwrap();
        let writer = make_writer(&dir);
        let policy = CommitPolicy {
            max_pending_docs: 2,
            max_interval_secs: 3_600,
            poll_interval_ms: 10,
        };
        let scheduler = CommitScheduler::start(writer.clone(), policy).unwrap();

        add(&writer, "a");
        add(&writer, "b");
        let deadline = Instant::now() + Duration::from_secs(5);
        while writer.has_uncommitted_changes() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(!writer.has_uncommitted_changes());
        assert!(scheduler.commits() >= 1);
        scheduler.stop();
    }

    #[test]
    fn test_commits_on_elapsed_time() {
        let dir = TempDir::new().unwrap();
        let writer = make_writer(&dir);
        let policy = CommitPolicy {
            max_pending_docs: 1_000_000,
            max_interval_secs: 1,
            poll_interval_ms: 10,
        };
        let scheduler = CommitScheduler::start(writer.clone(), policy).unwrap();

        add(&writer, "a");
        assert!(writer.has_uncommitted_changes());
        let deadline = Instant::now() + Duration::from_secs(10);
        while writer.has_uncommitted_changes() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        assert!(!writer.has_uncommitted_changes());
        assert_eq!(scheduler.commits(), 1);
        scheduler.stop();
    }

    #[test]
    fn test_below_thresholds_waits_for_final_commit() {
        let dir = TempDir::new().unwrap();
        let writer = make_writer(&dir);
        let policy = CommitPolicy {
            max_pending_docs: 100,
            max_interval_secs: 3_600,
            poll_interval_ms: 10,
        };
        let scheduler = CommitScheduler::start(writer.clone(), policy).unwrap();

        add(&writer, "a");
        std::thread::sleep(Duration::from_millis(50));
        assert!(writer.has_uncommitted_changes());

        scheduler.stop();
        assert!(!writer.has_uncommitted_changes());
        scheduler.stop();
    }
}
