//! Per-document history of applied operations, the basis for undo and for
//! snapshot staleness checks.
//!
//! Records are append-only. Undoing never removes the original records; the
//! undo batch appends its own records (tagged with the records they revert),
//! so an undo can itself be undone.

use std::collections::HashMap;
use std::time::SystemTime;

use serde::Serialize;
use uuid::Uuid;

use crate::error::EngineError;
use crate::ops::{Operation, Range};
use crate::snapshot::DocumentSnapshot;

const DEFAULT_HISTORY_LIMIT: usize = 50;

/// How completely an applied operation can be reverted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UndoCapability {
    /// The inverse restores both text and formatting exactly.
    Full,
    /// The inverse restores text; some formatting context was not captured.
    Partial,
    /// No inverse exists; the operation cannot be undone.
    None,
}

/// One operation as it was actually applied, with everything needed to
/// revert it later.
#[derive(Debug, Clone, Serialize)]
pub struct AppliedOperationRecord {
    pub record_id: Uuid,
    pub batch_id: Uuid,
    pub kind: String,
    pub tab_id: String,
    /// Span the operation's result occupies in post-batch coordinates.
    pub applied_range: Range,
    /// Net offset shift this operation imposed on later content.
    pub position_shift: i64,
    pub removed_blank_lines: usize,
    /// Pre-resolved inverse, in the coordinates the document has when the
    /// inverse applies during a reverse-order undo of its batch.
    pub inverse: Option<Operation>,
    pub capability: UndoCapability,
    pub applied_at: SystemTime,
    pub undone: bool,
    pub undone_at: Option<SystemTime>,
    /// When this record was produced by an undo, the record it reverts.
    pub undo_of: Option<Uuid>,
}

/// Whether a document has unreverted edits from this engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentState {
    Clean,
    Dirty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HistoryStats {
    pub total_records: usize,
    pub undoable: usize,
    pub undone: usize,
    pub batches: usize,
}

#[derive(Debug, Default)]
struct DocumentHistory {
    records: Vec<AppliedOperationRecord>,
}

/// Append-only operation history, capped per document.
#[derive(Debug)]
pub struct HistoryStore {
    documents: HashMap<String, DocumentHistory>,
    max_per_document: usize,
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_HISTORY_LIMIT)
    }

    pub fn with_limit(max_per_document: usize) -> Self {
        Self {
            documents: HashMap::new(),
            max_per_document,
        }
    }

    /// Append a batch's records, evicting the oldest past the cap.
    pub fn record(&mut self, document_id: &str, records: Vec<AppliedOperationRecord>) {
        let history = self.documents.entry(document_id.to_string()).or_default();
        history.records.extend(records);
        if history.records.len() > self.max_per_document {
            let excess = history.records.len() - self.max_per_document;
            history.records.drain(..excess);
        }
    }

    pub fn last_applied_at(&self, document_id: &str) -> Option<SystemTime> {
        self.documents
            .get(document_id)?
            .records
            .last()
            .map(|r| r.applied_at)
    }

    /// Reject a snapshot fetched before the last batch applied to the
    /// document. Resolution against such a snapshot would target offsets
    /// that no longer exist.
    pub fn ensure_fresh(&self, snapshot: &DocumentSnapshot) -> Result<(), EngineError> {
        if let Some(last) = self.last_applied_at(&snapshot.document_id) {
            if snapshot.fetched_at < last {
                return Err(EngineError::StaleSnapshot {
                    fetched_at: snapshot.fetched_at,
                });
            }
        }
        Ok(())
    }

    /// Records for a document, most recent first, optionally limited.
    pub fn history(&self, document_id: &str, limit: Option<usize>) -> Vec<&AppliedOperationRecord> {
        let records = match self.documents.get(document_id) {
            Some(history) => &history.records,
            None => return Vec::new(),
        };
        let iter = records.iter().rev();
        match limit {
            Some(n) => iter.take(n).collect(),
            None => iter.collect(),
        }
    }

    pub fn clear(&mut self, document_id: &str) {
        self.documents.remove(document_id);
    }

    pub fn stats(&self, document_id: &str) -> HistoryStats {
        let records = self
            .documents
            .get(document_id)
            .map(|h| h.records.as_slice())
            .unwrap_or_default();
        let mut batches: Vec<Uuid> = records.iter().map(|r| r.batch_id).collect();
        batches.dedup();
        HistoryStats {
            total_records: records.len(),
            undoable: records
                .iter()
                .filter(|r| !r.undone && r.inverse.is_some())
                .count(),
            undone: records.iter().filter(|r| r.undone).count(),
            batches: batches.len(),
        }
    }

    /// Dirty while any unreverted record puts an edit into effect. A record
    /// at even depth in its undo chain (an original edit, or an undo of an
    /// undo) applies an edit; odd depths revert one.
    pub fn state(&self, document_id: &str) -> DocumentState {
        let records = match self.documents.get(document_id) {
            Some(history) => history.records.as_slice(),
            None => return DocumentState::Clean,
        };
        let dirty = records
            .iter()
            .filter(|r| !r.undone)
            .any(|r| undo_chain_depth(records, r) % 2 == 0);
        if dirty {
            DocumentState::Dirty
        } else {
            DocumentState::Clean
        }
    }

    /// The most recent batch with at least one unreverted record.
    pub fn last_active_batch(&self, document_id: &str) -> Option<Uuid> {
        self.documents
            .get(document_id)?
            .records
            .iter()
            .rev()
            .find(|r| !r.undone)
            .map(|r| r.batch_id)
    }

    /// Unreverted records of one batch, in application order.
    pub fn batch_records(&self, document_id: &str, batch_id: Uuid) -> Vec<&AppliedOperationRecord> {
        self.documents
            .get(document_id)
            .map(|h| {
                h.records
                    .iter()
                    .filter(|r| r.batch_id == batch_id && !r.undone)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn find_record(
        &self,
        document_id: &str,
        record_id: Uuid,
    ) -> Option<&AppliedOperationRecord> {
        self.documents
            .get(document_id)?
            .records
            .iter()
            .find(|r| r.record_id == record_id)
    }

    pub fn mark_undone(&mut self, document_id: &str, record_id: Uuid, at: SystemTime) {
        if let Some(history) = self.documents.get_mut(document_id) {
            if let Some(record) = history
                .records
                .iter_mut()
                .find(|r| r.record_id == record_id)
            {
                record.undone = true;
                record.undone_at = Some(at);
            }
        }
    }
}

/// Steps from a record back to the original edit it descends from. A chain
/// member evicted by the history cap ends the walk.
fn undo_chain_depth(
    records: &[AppliedOperationRecord],
    record: &AppliedOperationRecord,
) -> usize {
    let mut depth = 0;
    let mut current = record;
    while let Some(target) = current.undo_of {
        depth += 1;
        match records.iter().find(|r| r.record_id == target) {
            Some(parent) => current = parent,
            None => break,
        }
    }
    depth
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn record(batch_id: Uuid, undo_of: Option<Uuid>) -> AppliedOperationRecord {
        AppliedOperationRecord {
            record_id: Uuid::new_v4(),
            batch_id,
            kind: "insert_text".to_string(),
            tab_id: "t0".to_string(),
            applied_range: Range::new(1, 4),
            position_shift: 3,
            removed_blank_lines: 0,
            inverse: Some(Operation::at_range(
                crate::ops::OpKind::DeleteRange,
                Range::new(1, 4),
            )),
            capability: UndoCapability::Full,
            applied_at: SystemTime::now(),
            undone: false,
            undone_at: None,
            undo_of,
        }
    }

    #[test]
    fn test_history_capped_to_limit() {
        let mut store = HistoryStore::with_limit(3);
        for _ in 0..5 {
            store.record("doc", vec![record(Uuid::new_v4(), None)]);
        }
        assert_eq!(store.history("doc", None).len(), 3);
    }

    #[test]
    fn test_stale_snapshot_rejected() {
        let mut store = HistoryStore::new();
        let fetched_at = SystemTime::now() - Duration::from_secs(60);
        store.record("doc", vec![record(Uuid::new_v4(), None)]);

        let stale = DocumentSnapshot::new("doc", vec![], fetched_at);
        let err = store.ensure_fresh(&stale).unwrap_err();
        assert!(matches!(err, EngineError::StaleSnapshot { .. }));

        let fresh = DocumentSnapshot::new("doc", vec![], SystemTime::now());
        assert!(store.ensure_fresh(&fresh).is_ok());
    }

    #[test]
    fn test_snapshot_of_untouched_document_is_fresh() {
        let store = HistoryStore::new();
        let old = SystemTime::now() - Duration::from_secs(3600);
        let snapshot = DocumentSnapshot::new("doc", vec![], old);
        assert!(store.ensure_fresh(&snapshot).is_ok());
    }

    #[test]
    fn test_state_tracks_unreverted_records() {
        let mut store = HistoryStore::new();
        assert_eq!(store.state("doc"), DocumentState::Clean);

        let rec = record(Uuid::new_v4(), None);
        let record_id = rec.record_id;
        store.record("doc", vec![rec]);
        assert_eq!(store.state("doc"), DocumentState::Dirty);

        store.mark_undone("doc", record_id, SystemTime::now());
        // the undo batch's own record does not dirty the document
        store.record("doc", vec![record(Uuid::new_v4(), Some(record_id))]);
        assert_eq!(store.state("doc"), DocumentState::Clean);
    }

    #[test]
    fn test_redo_record_dirties_the_document() {
        let mut store = HistoryStore::new();
        let original = record(Uuid::new_v4(), None);
        let original_id = original.record_id;
        store.record("doc", vec![original]);

        let undo = record(Uuid::new_v4(), Some(original_id));
        let undo_id = undo.record_id;
        store.mark_undone("doc", original_id, SystemTime::now());
        store.record("doc", vec![undo]);
        assert_eq!(store.state("doc"), DocumentState::Clean);

        // undoing the undo puts the original edit back into effect
        store.mark_undone("doc", undo_id, SystemTime::now());
        store.record("doc", vec![record(Uuid::new_v4(), Some(undo_id))]);
        assert_eq!(store.state("doc"), DocumentState::Dirty);
    }

    #[test]
    fn test_last_active_batch_skips_undone() {
        let mut store = HistoryStore::new();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        let rec_a = record(first, None);
        let rec_b = record(second, None);
        let undone_id = rec_b.record_id;
        store.record("doc", vec![rec_a]);
        store.record("doc", vec![rec_b]);

        assert_eq!(store.last_active_batch("doc"), Some(second));
        store.mark_undone("doc", undone_id, SystemTime::now());
        assert_eq!(store.last_active_batch("doc"), Some(first));
    }

    #[test]
    fn test_stats() {
        let mut store = HistoryStore::new();
        let batch = Uuid::new_v4();
        let mut no_inverse = record(batch, None);
        no_inverse.inverse = None;
        no_inverse.capability = UndoCapability::None;
        store.record("doc", vec![record(batch, None), no_inverse]);

        let stats = store.stats("doc");
        assert_eq!(stats.total_records, 2);
        assert_eq!(stats.undoable, 1);
        assert_eq!(stats.undone, 0);
        assert_eq!(stats.batches, 1);
    }

    #[test]
    fn test_history_most_recent_first_with_limit() {
        let mut store = HistoryStore::new();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        store.record("doc", vec![record(first, None)]);
        store.record("doc", vec![record(second, None)]);

        let recent = store.history("doc", Some(1));
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].batch_id, second);
    }
}
