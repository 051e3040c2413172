//! Document transport: the seam between the engine and whatever actually
//! stores documents.
//!
//! The engine never talks to a backend directly. It fetches a
//! [`DocumentSnapshot`], plans a batch against it, and submits a flat list
//! of [`DocRequest`]s whose offsets are already adjusted to apply in order.
//! [`InMemoryTransport`] is the reference backend used by the test suite
//! and the local CLI.

use std::collections::HashMap;
use std::time::SystemTime;

use serde::Serialize;
use thiserror::Error;
use xi_rope::Rope;

use crate::ops::{ListStyle, Range, TextStyle};
use crate::snapshot::{DocumentSnapshot, Heading, Tab};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("document '{document_id}' not found")]
    DocumentNotFound { document_id: String },

    #[error("backend rejected the batch: {message}")]
    Rejected { message: String },

    #[error("network failure: {message}")]
    Network { message: String },
}

/// One backend mutation. Offsets are in the coordinates the document has at
/// the moment this request applies, assuming every earlier request in the
/// same submission has already applied.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "request", rename_all = "snake_case")]
pub enum DocRequest {
    InsertText {
        tab_id: String,
        offset: usize,
        text: String,
    },
    DeleteRange {
        tab_id: String,
        range: Range,
    },
    UpdateTextStyle {
        tab_id: String,
        range: Range,
        style: TextStyle,
    },
    CreateParagraphBullets {
        tab_id: String,
        range: Range,
        style: ListStyle,
    },
    DeleteParagraphBullets {
        tab_id: String,
        range: Range,
    },
    InsertTableRow {
        tab_id: String,
        offset: usize,
        cells: Vec<String>,
        below: bool,
    },
    MergeTableCells {
        tab_id: String,
        offset: usize,
        rows: usize,
        columns: usize,
    },
}

impl DocRequest {
    pub fn tab_id(&self) -> &str {
        match self {
            DocRequest::InsertText { tab_id, .. }
            | DocRequest::DeleteRange { tab_id, .. }
            | DocRequest::UpdateTextStyle { tab_id, .. }
            | DocRequest::CreateParagraphBullets { tab_id, .. }
            | DocRequest::DeleteParagraphBullets { tab_id, .. }
            | DocRequest::InsertTableRow { tab_id, .. }
            | DocRequest::MergeTableCells { tab_id, .. } => tab_id,
        }
    }
}

/// Result of a submission. A healthy backend applies everything or nothing;
/// `applied < total` signals a backend that stopped part-way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitOutcome {
    pub applied: usize,
    pub total: usize,
}

impl SubmitOutcome {
    pub fn is_complete(&self) -> bool {
        self.applied == self.total
    }
}

/// Backend abstraction the executor is generic over.
pub trait DocumentTransport {
    fn fetch_snapshot(&mut self, document_id: &str) -> Result<DocumentSnapshot, TransportError>;

    /// Apply a batch of requests atomically, in order.
    fn submit(
        &mut self,
        document_id: &str,
        requests: &[DocRequest],
    ) -> Result<SubmitOutcome, TransportError>;
}

#[derive(Debug, Clone)]
struct StoredTab {
    tab_id: String,
    title: String,
    buffer: Rope,
    lists: Vec<(Range, ListStyle)>,
    styles: Vec<(Range, TextStyle)>,
}

#[derive(Debug, Clone, Default)]
struct StoredDocument {
    tabs: Vec<StoredTab>,
}

/// In-process backend holding documents as rope buffers.
///
/// Submission is atomic: requests apply to a scratch copy and the stored
/// document is replaced only when every request succeeds. Table requests
/// are accepted and logged but have no text-projection effect.
#[derive(Debug, Default)]
pub struct InMemoryTransport {
    documents: HashMap<String, StoredDocument>,
    table_log: Vec<DocRequest>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a single-tab document. The tab id is `t0`.
    pub fn insert_document(&mut self, document_id: impl Into<String>, text: &str) {
        self.insert_document_with_tabs(document_id, vec![("t0", "Body", text)]);
    }

    pub fn insert_document_with_tabs(
        &mut self,
        document_id: impl Into<String>,
        tabs: Vec<(&str, &str, &str)>,
    ) {
        let tabs = tabs
            .into_iter()
            .map(|(tab_id, title, text)| {
                let mut body = text.to_string();
                if !body.ends_with('\n') {
                    body.push('\n');
                }
                StoredTab {
                    tab_id: tab_id.to_string(),
                    title: title.to_string(),
                    buffer: Rope::from(body.as_str()),
                    lists: Vec::new(),
                    styles: Vec::new(),
                }
            })
            .collect();
        self.documents
            .insert(document_id.into(), StoredDocument { tabs });
    }

    /// Current text projection of a tab, terminal break included.
    pub fn document_text(&self, document_id: &str, tab_id: &str) -> Option<String> {
        self.documents
            .get(document_id)?
            .tabs
            .iter()
            .find(|t| t.tab_id == tab_id)
            .map(|t| t.buffer.to_string())
    }

    /// Table requests applied so far, oldest first.
    pub fn table_requests(&self) -> &[DocRequest] {
        &self.table_log
    }

    pub fn list_ranges(&self, document_id: &str, tab_id: &str) -> Vec<(Range, ListStyle)> {
        self.documents
            .get(document_id)
            .and_then(|doc| doc.tabs.iter().find(|t| t.tab_id == tab_id))
            .map(|t| t.lists.clone())
            .unwrap_or_default()
    }
}

impl DocumentTransport for InMemoryTransport {
    fn fetch_snapshot(&mut self, document_id: &str) -> Result<DocumentSnapshot, TransportError> {
        let doc = self
            .documents
            .get(document_id)
            .ok_or_else(|| TransportError::DocumentNotFound {
                document_id: document_id.to_string(),
            })?;

        let tabs = doc
            .tabs
            .iter()
            .map(|stored| {
                let text = stored.buffer.to_string();
                Tab::new(&stored.tab_id, &stored.title, &text)
                    .with_headings(derive_headings(&text))
                    .with_lists(stored.lists.clone())
                    .with_styles(stored.styles.clone())
            })
            .collect();

        Ok(DocumentSnapshot::new(document_id, tabs, SystemTime::now()))
    }

    fn submit(
        &mut self,
        document_id: &str,
        requests: &[DocRequest],
    ) -> Result<SubmitOutcome, TransportError> {
        let doc = self
            .documents
            .get(document_id)
            .ok_or_else(|| TransportError::DocumentNotFound {
                document_id: document_id.to_string(),
            })?;

        // All-or-nothing: mutate a scratch copy, commit only on full success.
        let mut scratch = doc.clone();
        let mut tables = Vec::new();
        for request in requests {
            apply_request(&mut scratch, request, &mut tables)?;
        }

        self.documents.insert(document_id.to_string(), scratch);
        self.table_log.extend(tables);
        tracing::debug!(
            document = document_id,
            requests = requests.len(),
            "batch applied"
        );
        Ok(SubmitOutcome {
            applied: requests.len(),
            total: requests.len(),
        })
    }
}

fn apply_request(
    doc: &mut StoredDocument,
    request: &DocRequest,
    tables: &mut Vec<DocRequest>,
) -> Result<(), TransportError> {
    let tab = doc
        .tabs
        .iter_mut()
        .find(|t| t.tab_id == request.tab_id())
        .ok_or_else(|| TransportError::Rejected {
            message: format!("unknown tab '{}'", request.tab_id()),
        })?;

    match request {
        DocRequest::InsertText { offset, text, .. } => {
            // Valid insertion offsets run from 1 to the terminal break.
            if *offset < 1 || *offset > tab.buffer.len() {
                return Err(TransportError::Rejected {
                    message: format!("insertion offset {offset} out of bounds"),
                });
            }
            let pos = offset - 1;
            tab.buffer.edit(pos..pos, text.as_str());
            shift_ranges(&mut tab.lists, *offset, *offset, text.len() as i64);
            shift_ranges(&mut tab.styles, *offset, *offset, text.len() as i64);
        }
        DocRequest::DeleteRange { range, .. } => {
            // The terminal break is structural and cannot be deleted.
            if range.start < 1 || range.end > tab.buffer.len() || range.start >= range.end {
                return Err(TransportError::Rejected {
                    message: format!("deletion range {}..{} out of bounds", range.start, range.end),
                });
            }
            tab.buffer.edit(range.start - 1..range.end - 1, "");
            let delta = -(range.len() as i64);
            shift_ranges(&mut tab.lists, range.start, range.end, delta);
            shift_ranges(&mut tab.styles, range.start, range.end, delta);
        }
        DocRequest::UpdateTextStyle { range, style, .. } => {
            if range.end > tab.buffer.len() + 1 {
                return Err(TransportError::Rejected {
                    message: format!("style range {}..{} out of bounds", range.start, range.end),
                });
            }
            // Runs are layered newest-first; lookup returns the latest run
            // covering an offset.
            tab.styles.insert(0, (*range, style.clone()));
        }
        DocRequest::CreateParagraphBullets { range, style, .. } => {
            tab.lists.insert(0, (*range, *style));
        }
        DocRequest::DeleteParagraphBullets { range, .. } => {
            tab.lists.retain(|(list_range, _)| !list_range.conflicts_with(range));
        }
        DocRequest::InsertTableRow { .. } | DocRequest::MergeTableCells { .. } => {
            tables.push(request.clone());
        }
    }
    Ok(())
}

/// Shift stored metadata ranges to track a text edit. For an insertion,
/// `edit_start == edit_end` and boundaries at or after the point move right.
/// For a deletion of `[edit_start, edit_end)`, boundaries past the removed
/// span move left and boundaries inside it collapse onto its start. Ranges
/// left empty are dropped.
fn shift_ranges<T>(ranges: &mut Vec<(Range, T)>, edit_start: usize, edit_end: usize, delta: i64) {
    let map = |boundary: usize| -> usize {
        if boundary >= edit_end {
            ((boundary as i64 + delta).max(1)) as usize
        } else if boundary > edit_start {
            edit_start
        } else {
            boundary
        }
    };
    for (range, _) in ranges.iter_mut() {
        range.start = map(range.start);
        range.end = map(range.end);
    }
    ranges.retain(|(range, _)| range.start < range.end);
}

/// Derive heading metadata from `#`-prefixed lines in the text projection.
fn derive_headings(text: &str) -> Vec<Heading> {
    let mut headings = Vec::new();
    let mut line_start = 0usize;
    for line in text.split_inclusive('\n') {
        let trimmed = line.trim_end_matches('\n');
        let level = trimmed.bytes().take_while(|b| *b == b'#').count();
        if level >= 1 && level <= 6 {
            if let Some(title) = trimmed[level..].strip_prefix(' ') {
                headings.push(Heading {
                    title: title.to_string(),
                    level: level as u8,
                    start: line_start + 1,
                    end: line_start + line.len() + 1,
                });
            }
        }
        line_start += line.len();
    }
    headings
}
