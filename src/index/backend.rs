//! The capability Linden needs from a single-node indexing engine.
//!
//! Token matching, scoring and the on-disk format belong to the engine.
//! Linden only drives it through these two traits: an [`IndexWriter`] per
//! generation and the immutable [`IndexReader`] snapshots it opens.

use std::fmt::Debug;
use std::sync::Arc;

use crate::data::Document;
use crate::error::Result;
use crate::search::query::Query;
use crate::search::request::SearchRequest;
use crate::search::result::ShardResult;

/// The writable side of one index generation.
pub trait IndexWriter: Send + Sync + Debug {
    /// Insert or replace the document stored under `id`.
    fn add_document(&self, id: &str, doc: Document) -> Result<()>;

    /// Delete every document matching `query`; returns how many were removed.
    fn delete_by_query(&self, query: &Query) -> Result<u64>;

    /// Overwrite doc-values fields of an existing document in place.
    /// Returns `false` when no document is stored under `id`.
    fn update_doc_values(&self, id: &str, fields: Document) -> Result<bool>;

    /// Latest version of a document, including uncommitted changes.
    fn get_document(&self, id: &str) -> Result<Option<Document>>;

    /// Persist everything written so far. Returns the committed version.
    fn commit(&self) -> Result<u64>;

    /// Merge the index down to at most `max_segments` segments.
    fn merge_segments(&self, max_segments: usize) -> Result<()>;

    /// Open a point-in-time snapshot reflecting every write so far.
    fn open_reader(&self) -> Result<Arc<dyn IndexReader>>;

    /// Documents currently held, uncommitted ones included.
    fn num_docs(&self) -> u64;

    /// Version of the newest write; bumps on every change.
    fn version(&self) -> u64;

    /// Monotonic count of documents written (added, updated or deleted).
    fn docs_written(&self) -> u64;

    fn has_uncommitted_changes(&self) -> bool;

    fn segment_count(&self) -> usize;

    /// Approximate heap held by the writer.
    fn ram_bytes(&self) -> u64;

    fn close(&self) -> Result<()>;
}

/// An immutable point-in-time view of an index.
pub trait IndexReader: Send + Sync + Debug {
    /// Writer version this snapshot reflects.
    fn version(&self) -> u64;

    fn num_docs(&self) -> u64;

    /// Execute `request` and return at most `offset + length` hits.
    fn search(&self, request: &SearchRequest) -> Result<ShardResult>;

    fn get(&self, id: &str) -> Option<Document>;
}
