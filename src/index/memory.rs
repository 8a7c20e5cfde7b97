//! In-memory reference backend.
//!
//! Documents live in a `BTreeMap` keyed by document number, so iteration
//! order is index order. A commit writes a JSON snapshot next to the index
//! (`snapshot.json`, replaced atomically through a temporary file) and
//! opening a directory loads the last snapshot back.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ahash::AHashMap;
use log::debug;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::data::Document;
use crate::error::{LindenError, Result};
use crate::index::backend::{IndexReader, IndexWriter};
use crate::index::collector::{self, DocEntry};
use crate::search::query::Query;
use crate::search::request::SearchRequest;
use crate::search::result::ShardResult;

pub const SNAPSHOT_FILE: &str = "snapshot.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredDoc {
    doc: u64,
    id: String,
    fields: Document,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    version: u64,
    next_doc: u64,
    segments: usize,
    docs: Vec<StoredDoc>,
}

#[derive(Debug, Default)]
struct MemoryState {
    docs: BTreeMap<u64, (String, Document)>,
    ids: AHashMap<String, u64>,
    next_doc: u64,
    version: u64,
    committed_version: u64,
    docs_written: u64,
    segments: usize,
    /// Whether a write landed since the last commit started a new segment.
    segment_open: bool,
    reader: Option<Arc<MemoryIndexReader>>,
    closed: bool,
}

impl MemoryState {
    fn touch(&mut self) {
        self.version += 1;
        self.docs_written += 1;
        self.reader = None;
        if !self.segment_open {
            self.segment_open = true;
            self.segments += 1;
        }
    }

    fn remove(&mut self, id: &str) -> Option<Document> {
        let doc = self.ids.remove(id)?;
        self.docs.remove(&doc).map(|(_, fields)| fields)
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            Err(LindenError::closed("index writer is closed"))
        } else {
            Ok(())
        }
    }
}

/// Writer of the in-memory backend.
#[derive(Debug)]
pub struct MemoryIndexWriter {
    path: PathBuf,
    state: RwLock<MemoryState>,
}

impl MemoryIndexWriter {
    /// Open the index stored in `path`, creating the directory if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        fs::create_dir_all(&path)?;

        let mut state = MemoryState::default();
        let snapshot_path = path.join(SNAPSHOT_FILE);
        if snapshot_path.exists() {
            let snapshot: Snapshot = serde_json::from_slice(&fs::read(&snapshot_path)?)?;
            debug!(
                "loaded {} documents at version {} from {}",
                snapshot.docs.len(),
                snapshot.version,
                path.display()
            );
            for stored in snapshot.docs {
                state.ids.insert(stored.id.clone(), stored.doc);
                state.docs.insert(stored.doc, (stored.id, stored.fields));
            }
            state.next_doc = snapshot.next_doc;
            state.version = snapshot.version;
            state.committed_version = snapshot.version;
            state.segments = snapshot.segments;
        }

        Ok(Self {
            path,
            state: RwLock::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_snapshot(&self, state: &MemoryState) -> Result<()> {
        let snapshot = Snapshot {
            version: state.version,
            next_doc: state.next_doc,
            segments: state.segments,
            docs: state
                .docs
                .iter()
                .map(|(doc, (id, fields))| StoredDoc {
                    doc: *doc,
                    id: id.clone(),
                    fields: fields.clone(),
                })
                .collect(),
        };
        let tmp = self.path.join(format!("{SNAPSHOT_FILE}.tmp"));
        fs::write(&tmp, serde_json::to_vec(&snapshot)?)?;
        fs::rename(&tmp, self.path.join(SNAPSHOT_FILE))?;
        Ok(())
    }
}

impl IndexWriter for MemoryIndexWriter {
    fn add_document(&self, id: &str, doc: Document) -> Result<()> {
        let mut state = self.state.write();
        state.check_open()?;
        state.remove(id);
        let number = state.next_doc;
        state.next_doc += 1;
        state.ids.insert(id.to_string(), number);
        state.docs.insert(number, (id.to_string(), doc));
        state.touch();
        Ok(())
    }

    fn delete_by_query(&self, query: &Query) -> Result<u64> {
        let mut state = self.state.write();
        state.check_open()?;
        let doomed: Vec<String> = state
            .docs
            .values()
            .filter(|(_, fields)| collector::score_query(query, fields).is_some())
            .map(|(id, _)| id.clone())
            .collect();
        for id in &doomed {
            state.remove(id);
        }
        if !doomed.is_empty() {
            state.touch();
        }
        Ok(doomed.len() as u64)
    }

    fn update_doc_values(&self, id: &str, fields: Document) -> Result<bool> {
        let mut state = self.state.write();
        state.check_open()?;
        let Some(number) = state.ids.get(id).copied() else {
            return Ok(false);
        };
        if let Some((_, existing)) = state.docs.get_mut(&number) {
            existing.merge_from(fields);
        }
        state.touch();
        Ok(true)
    }

    fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let state = self.state.read();
        state.check_open()?;
        Ok(state
            .ids
            .get(id)
            .and_then(|n| state.docs.get(n))
            .map(|(_, fields)| fields.clone()))
    }

    fn commit(&self) -> Result<u64> {
        let mut state = self.state.write();
        state.check_open()?;
        if state.version != state.committed_version {
            self.write_snapshot(&state)?;
            state.committed_version = state.version;
            state.segment_open = false;
        }
        Ok(state.committed_version)
    }

    fn merge_segments(&self, max_segments: usize) -> Result<()> {
        let mut state = self.state.write();
        state.check_open()?;
        let target = max_segments.max(1);
        if state.segments > target {
            debug!(
                "merging {} segments down to {} in {}",
                state.segments,
                target,
                self.path.display()
            );
            state.segments = target;
            state.segment_open = false;
        }
        Ok(())
    }

    fn open_reader(&self) -> Result<Arc<dyn IndexReader>> {
        if let Some(reader) = self.state.read().reader.clone() {
            return Ok(reader);
        }
        let mut state = self.state.write();
        state.check_open()?;
        let reader = Arc::new(MemoryIndexReader {
            version: state.version,
            docs: Arc::new(
                state
                    .docs
                    .iter()
                    .map(|(doc, (id, fields))| StoredDoc {
                        doc: *doc,
                        id: id.clone(),
                        fields: fields.clone(),
                    })
                    .collect(),
            ),
        });
        state.reader = Some(reader.clone());
        Ok(reader)
    }

    fn num_docs(&self) -> u64 {
        self.state.read().docs.len() as u64
    }

    fn version(&self) -> u64 {
        self.state.read().version
    }

    fn docs_written(&self) -> u64 {
        self.state.read().docs_written
    }

    fn has_uncommitted_changes(&self) -> bool {
        let state = self.state.read();
        state.version != state.committed_version
    }

    fn segment_count(&self) -> usize {
        self.state.read().segments
    }

    fn ram_bytes(&self) -> u64 {
        let state = self.state.read();
        state
            .docs
            .values()
            .map(|(id, fields)| {
                id.len() as u64
                    + fields
                        .fields
                        .iter()
                        .map(|(name, value)| {
                            name.len() as u64
                                + value.labels().iter().map(|l| l.len() as u64).sum::<u64>()
                        })
                        .sum::<u64>()
            })
            .sum()
    }

    fn close(&self) -> Result<()> {
        let mut state = self.state.write();
        if state.closed {
            return Ok(());
        }
        if state.version != state.committed_version {
            self.write_snapshot(&state)?;
            state.committed_version = state.version;
        }
        state.closed = true;
        state.reader = None;
        Ok(())
    }
}

/// Immutable snapshot of a [`MemoryIndexWriter`].
#[derive(Debug)]
pub struct MemoryIndexReader {
    version: u64,
    docs: Arc<Vec<StoredDoc>>,
}

impl IndexReader for MemoryIndexReader {
    fn version(&self) -> u64 {
        self.version
    }

    fn num_docs(&self) -> u64 {
        self.docs.len() as u64
    }

    fn search(&self, request: &SearchRequest) -> Result<ShardResult> {
        Ok(collector::collect(
            0,
            request,
            self.docs.iter().map(|stored| DocEntry {
                doc: stored.doc,
                id: &stored.id,
                fields: &stored.fields,
            }),
        ))
    }

    fn get(&self, id: &str) -> Option<Document> {
        self.docs
            .iter()
            .find(|stored| stored.id == id)
            .map(|stored| stored.fields.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_doc(title: &str) -> Document {
        Document::new().add_text("title", title)
    }

    #[test]
    fn test_reader_is_a_point_in_time_view() {
        let dir = TempDir::new().unwrap();
        let writer = MemoryIndexWriter::open(dir.path()).unwrap();
        writer.add_document("a", make_doc("one")).unwrap();
        let before = writer.open_reader().unwrap();
        writer.add_document("b", make_doc("two")).unwrap();
        let after = writer.open_reader().unwrap();

        assert_eq!(before.num_docs(), 1);
        assert_eq!(after.num_docs(), 2);
        assert!(after.version() > before.version());
    }

    #[test]
    fn test_add_replaces_existing_id() {
        let dir = TempDir::new().unwrap();
        let writer = MemoryIndexWriter::open(dir.path()).unwrap();
        writer.add_document("a", make_doc("old")).unwrap();
        writer.add_document("a", make_doc("new")).unwrap();

        let reader = writer.open_reader().unwrap();
        assert_eq!(reader.num_docs(), 1);
        assert_eq!(
            reader.get("a").unwrap().get("title").unwrap().as_text(),
            Some("new")
        );
    }

    #[test]
    fn test_commit_persists_and_reopens() {
        let dir = TempDir::new().unwrap();
        {
            let writer = MemoryIndexWriter::open(dir.path()).unwrap();
            writer.add_document("a", make_doc("kept")).unwrap();
            writer.add_document("b", make_doc("dropped")).unwrap();
            assert!(writer.has_uncommitted_changes());
            writer.commit().unwrap();
            assert!(!writer.has_uncommitted_changes());
            let removed = writer
                .delete_by_query(&Query::term("title", "dropped"))
                .unwrap();
            assert_eq!(removed, 1);
            writer.close().unwrap();
            assert!(writer.add_document("c", make_doc("late")).is_err());
        }

        let writer = MemoryIndexWriter::open(dir.path()).unwrap();
        let reader = writer.open_reader().unwrap();
        assert_eq!(reader.num_docs(), 1);
        assert!(reader.get("a").is_some());
    }

    #[test]
    fn test_doc_values_update_and_segments() {
        let dir = TempDir::new().unwrap();
        let writer = MemoryIndexWriter::open(dir.path()).unwrap();
        writer.add_document("a", make_doc("x")).unwrap();
        writer.commit().unwrap();
        writer.add_document("b", make_doc("y")).unwrap();
        writer.commit().unwrap();
        assert_eq!(writer.segment_count(), 2);

        writer.merge_segments(1).unwrap();
        assert_eq!(writer.segment_count(), 1);

        let updated = writer
            .update_doc_values("a", Document::new().add_integer("rank", 5))
            .unwrap();
        assert!(updated);
        assert!(!writer
            .update_doc_values("missing", Document::new().add_integer("rank", 1))
            .unwrap());
        let doc = writer.get_document("a").unwrap().unwrap();
        assert_eq!(doc.get("rank").unwrap().as_integer(), Some(5));
        assert!(doc.has_field("title"));
    }
}
