use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info};
use parking_lot::Mutex;

use crate::config::LindenConfig;
use crate::data::Document;
use crate::error::{LindenError, Result};
use crate::index::backend::IndexWriter;
use crate::index::commit::CommitScheduler;
use crate::index::nrt::{NrtReaderManager, ReaderLease};
use crate::index::registry::BackendRegistry;
use crate::index::schema::Schema;
use crate::index::{GenerationState, IndexStats};
use crate::search::query::Query;
use crate::search::request::SearchRequest;
use crate::search::result::ShardResult;
use crate::util::dir_size;

/// Which path an [`IndexCore::update`] took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    /// Only doc-values fields changed; written in place.
    DocValues,
    /// The stored document was fetched, merged and indexed again.
    Rewrite,
}

/// Everything one index generation can do: a writer, its NRT reader manager
/// and its commit loop.
#[derive(Debug)]
pub struct IndexCore {
    name: String,
    path: PathBuf,
    schema: Schema,
    writer: Arc<dyn IndexWriter>,
    readers: NrtReaderManager,
    commits: CommitScheduler,
    state: Mutex<GenerationState>,
}

impl IndexCore {
    /// Open (or create) the generation stored in `path`.
    pub fn open(
        name: impl Into<String>,
        path: impl AsRef<Path>,
        backends: &BackendRegistry,
        config: &LindenConfig,
    ) -> Result<Self> {
        let name = name.into();
        let path = path.as_ref().to_path_buf();
        let writer = backends.open(&config.backend, &path, &config.schema)?;
        let readers = NrtReaderManager::start(writer.clone(), config.nrt.clone())?;
        let commits = CommitScheduler::start(writer.clone(), config.commit.clone())?;
        info!("opened index {} at {}", name, path.display());
        Ok(Self {
            name,
            path,
            schema: config.schema.clone(),
            writer,
            readers,
            commits,
            state: Mutex::new(GenerationState::Live),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> GenerationState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: GenerationState) {
        *self.state.lock() = state;
    }

    fn check_open(&self) -> Result<()> {
        if self.state() == GenerationState::Closed {
            return Err(LindenError::closed(format!("index {} is closed", self.name)));
        }
        Ok(())
    }

    /// Lease the current snapshot directly.
    pub fn acquire(&self) -> Result<ReaderLease> {
        self.check_open()?;
        self.readers.acquire()
    }

    /// Search the current snapshot. The lease is released on every exit path.
    pub fn search(&self, request: &SearchRequest) -> Result<ShardResult> {
        let lease = self.acquire()?;
        lease.search(request)
    }

    pub fn index_doc(&self, id: &str, doc: Document) -> Result<()> {
        self.check_open()?;
        if id.is_empty() {
            return Err(LindenError::invalid_argument("document id must not be empty"));
        }
        self.writer.add_document(id, doc)
    }

    pub fn delete_by_query(&self, query: &Query) -> Result<u64> {
        self.check_open()?;
        let removed = self.writer.delete_by_query(query)?;
        debug!("deleted {} documents from {}", removed, self.name);
        Ok(removed)
    }

    /// Apply `fields` to the document stored under `id`.
    ///
    /// When every field is doc-values only the change is written in place,
    /// otherwise the stored document is merged with `fields` and re-indexed.
    pub fn update(&self, id: &str, fields: Document) -> Result<UpdateMode> {
        self.check_open()?;
        if self.schema.all_doc_values_only(fields.fields.keys()) {
            if self.writer.update_doc_values(id, fields)? {
                return Ok(UpdateMode::DocValues);
            }
            return Err(LindenError::not_found(format!(
                "no document {id} in {}",
                self.name
            )));
        }

        let mut existing = self.writer.get_document(id)?.ok_or_else(|| {
            LindenError::not_found(format!("no document {id} in {}", self.name))
        })?;
        existing.merge_from(fields);
        self.writer.add_document(id, existing)?;
        Ok(UpdateMode::Rewrite)
    }

    pub fn get(&self, id: &str) -> Result<Option<Document>> {
        self.check_open()?;
        self.writer.get_document(id)
    }

    pub fn commit(&self) -> Result<u64> {
        self.check_open()?;
        self.commits.commit_now()
    }

    /// Wait until earlier writes are visible to searches.
    pub fn refresh(&self) -> Result<()> {
        self.check_open()?;
        self.readers.refresh()
    }

    pub fn merge_segments(&self, max_segments: usize) -> Result<()> {
        self.check_open()?;
        if max_segments == 0 {
            return Err(LindenError::invalid_argument(
                "max_segments must be at least 1",
            ));
        }
        self.writer.merge_segments(max_segments)?;
        self.commits.commit_now()?;
        Ok(())
    }

    /// Number of documents in the current snapshot.
    pub fn num_docs(&self) -> u64 {
        self.readers
            .acquire()
            .map(|lease| lease.num_docs())
            .unwrap_or(0)
    }

    /// Number of documents held by the writer, including unrefreshed ones.
    pub fn writer_docs(&self) -> u64 {
        self.writer.num_docs()
    }

    pub fn has_uncommitted_changes(&self) -> bool {
        self.writer.has_uncommitted_changes()
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            name: self.name.clone(),
            state: self.state(),
            doc_count: self.num_docs(),
            version: self.writer.version(),
            pending_changes: self.writer.has_uncommitted_changes(),
            segments: self.writer.segment_count(),
            ram_bytes: self.writer.ram_bytes(),
            disk_bytes: dir_size(&self.path),
            open_leases: self.readers.outstanding(),
        }
    }

    /// Drain the commit loop, stop reopening and close the writer.
    pub fn close(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            if *state == GenerationState::Closed {
                return Ok(());
            }
            *state = GenerationState::Closed;
        }
        self.commits.stop();
        self.readers.close();
        self.writer.close()?;
        info!("closed index {}", self.name);
        Ok(())
    }
}

impl Drop for IndexCore {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("failed to close index {}: {e}", self.name);
        }
    }
}
