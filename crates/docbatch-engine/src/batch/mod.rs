//! Batch planning and execution.
//!
//! A batch is planned entirely against one snapshot: locators resolve,
//! operations validate, marked text normalizes, and ranges adjust for the
//! cumulative length changes of earlier operations. Only then does anything
//! reach the transport, as one atomic submission. Preview mode runs the same
//! pipeline but simulates the text edits locally instead of submitting.

pub mod history;

use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use xi_rope::Rope;

use crate::error::EngineError;
use crate::ops::adjust::{AdjustedOp, adjust};
use crate::ops::locator::{self, ResolveError};
use crate::ops::normalize::normalize_for_list;
use crate::ops::validate::{ResolvedOp, ValidatedOp, validate};
use crate::ops::{OpKind, Operation, Range, Target, TextStyle};
use crate::snapshot::DocumentSnapshot;
use crate::transport::{DocRequest, DocumentTransport};
use history::{AppliedOperationRecord, HistoryStore, UndoCapability};

/// A caller-supplied batch of operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequest {
    pub operations: Vec<Operation>,
    /// Dry-run flag: plan and diff, change nothing.
    #[serde(default)]
    pub preview: bool,
    /// Shift each operation's range by the cumulative length change of the
    /// operations before it. Callers that pre-compute per-application
    /// coordinates turn this off.
    #[serde(default = "default_auto_adjust")]
    pub auto_adjust: bool,
}

fn default_auto_adjust() -> bool {
    true
}

impl BatchRequest {
    pub fn new(operations: Vec<Operation>) -> Self {
        Self {
            operations,
            preview: false,
            auto_adjust: true,
        }
    }

    pub fn mode(&self) -> ExecutionMode {
        if self.preview {
            ExecutionMode::Preview
        } else {
            ExecutionMode::Apply
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Apply,
    Preview,
}

/// Per-operation result reported back to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct OperationOutcome {
    pub index: usize,
    pub kind: &'static str,
    pub tab_id: String,
    /// Where the operation's result sits once the whole batch has applied.
    pub applied_range: Range,
    pub position_shift: i64,
    pub removed_blank_lines: usize,
    pub capability: UndoCapability,
}

#[derive(Debug, Clone, Serialize)]
pub struct TabDiff {
    pub tab_id: String,
    pub diff: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PreviewReport {
    pub would_modify: bool,
    /// Unified diffs per tab whose text projection would change.
    pub diffs: Vec<TabDiff>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub batch_id: Uuid,
    pub success: bool,
    pub operations: Vec<OperationOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<PreviewReport>,
}

/// Plans batches against snapshots and drives them through a transport,
/// recording applied operations for undo.
pub struct BatchExecutor<'a, T: DocumentTransport> {
    transport: &'a mut T,
    history: &'a mut HistoryStore,
}

impl<'a, T: DocumentTransport> BatchExecutor<'a, T> {
    pub fn new(transport: &'a mut T, history: &'a mut HistoryStore) -> Self {
        Self { transport, history }
    }

    /// Execute a batch against an already-fetched snapshot.
    pub fn execute(
        &mut self,
        snapshot: &DocumentSnapshot,
        request: &BatchRequest,
        mode: ExecutionMode,
    ) -> Result<BatchResult, EngineError> {
        let tags = vec![None; request.operations.len()];
        self.run(
            snapshot,
            request.operations.clone(),
            mode,
            request.auto_adjust,
            tags,
        )
    }

    /// Fetch a fresh snapshot and execute against it.
    pub fn execute_fresh(
        &mut self,
        document_id: &str,
        request: &BatchRequest,
        mode: ExecutionMode,
    ) -> Result<BatchResult, EngineError> {
        let snapshot = self.transport.fetch_snapshot(document_id)?;
        self.execute(&snapshot, request, mode)
    }

    /// Revert the most recent batch that still has unreverted operations.
    pub fn undo_last(&mut self, document_id: &str) -> Result<BatchResult, EngineError> {
        let batch_id = self
            .history
            .last_active_batch(document_id)
            .ok_or_else(|| EngineError::UndoNotAvailable {
                message: format!("no applied batches recorded for document '{document_id}'"),
            })?;
        self.undo_batch(document_id, batch_id)
    }

    /// Revert every unreverted operation of one batch, as a new batch of
    /// inverse operations applied in reverse order.
    pub fn undo_batch(
        &mut self,
        document_id: &str,
        batch_id: Uuid,
    ) -> Result<BatchResult, EngineError> {
        let records = self.history.batch_records(document_id, batch_id);
        if records.is_empty() {
            return Err(EngineError::UndoNotAvailable {
                message: format!("batch {batch_id} has no unreverted operations"),
            });
        }
        let planned: Vec<(Uuid, Operation)> = records
            .iter()
            .rev()
            .map(|record| match &record.inverse {
                Some(inverse) => Ok((record.record_id, inverse.clone())),
                None => Err(EngineError::UndoNotAvailable {
                    message: format!("operation '{}' cannot be undone", record.kind),
                }),
            })
            .collect::<Result<_, _>>()?;

        self.apply_inverses(document_id, planned)
    }

    /// Revert a single operation. Restricted to the most recent active
    /// batch: older inverses are expressed in coordinates that later
    /// batches may have shifted.
    pub fn undo_operation(
        &mut self,
        document_id: &str,
        record_id: Uuid,
    ) -> Result<BatchResult, EngineError> {
        let last_batch = self.history.last_active_batch(document_id);
        let record = self
            .history
            .find_record(document_id, record_id)
            .ok_or_else(|| EngineError::UndoNotAvailable {
                message: format!("no record {record_id} for document '{document_id}'"),
            })?;
        if record.undone {
            return Err(EngineError::UndoNotAvailable {
                message: format!("record {record_id} is already undone"),
            });
        }
        if last_batch != Some(record.batch_id) {
            return Err(EngineError::UndoNotAvailable {
                message: "only operations in the most recent batch can be undone individually"
                    .to_string(),
            });
        }
        let inverse = record
            .inverse
            .clone()
            .ok_or_else(|| EngineError::UndoNotAvailable {
                message: format!("operation '{}' cannot be undone", record.kind),
            })?;

        self.apply_inverses(document_id, vec![(record_id, inverse)])
    }

    fn apply_inverses(
        &mut self,
        document_id: &str,
        planned: Vec<(Uuid, Operation)>,
    ) -> Result<BatchResult, EngineError> {
        let (reverted, operations): (Vec<Uuid>, Vec<Operation>) = planned.into_iter().unzip();
        let tags = reverted.iter().copied().map(Some).collect();

        // Inverses are recorded in the coordinates the document has when
        // each one applies (reverse order), so no shifting is wanted here.
        let snapshot = self.transport.fetch_snapshot(document_id)?;
        let result = self.run(&snapshot, operations, ExecutionMode::Apply, false, tags)?;

        let now = SystemTime::now();
        for record_id in reverted {
            self.history.mark_undone(document_id, record_id, now);
        }
        Ok(result)
    }

    fn run(
        &mut self,
        snapshot: &DocumentSnapshot,
        operations: Vec<Operation>,
        mode: ExecutionMode,
        auto_adjust: bool,
        undo_tags: Vec<Option<Uuid>>,
    ) -> Result<BatchResult, EngineError> {
        self.history.ensure_fresh(snapshot)?;
        let batch_id = Uuid::new_v4();
        tracing::debug!(
            batch = %batch_id,
            document = snapshot.document_id,
            operations = operations.len(),
            preview = (mode == ExecutionMode::Preview),
            "executing batch"
        );

        let resolved = resolve_batch(snapshot, operations)?;
        let mut validated = validate(snapshot, resolved)?;
        let removed_counts = normalize_marked(&mut validated);
        let mut adjusted = adjust(snapshot, validated, auto_adjust)?;

        // A folded conversion bullets exactly the text its insert produced;
        // its reported spans are the insert's, not its notional range.
        for i in 0..adjusted.len() {
            if let Some(partner) = adjusted[i].validated.merged_into {
                let (effective, span, final_span) = (
                    adjusted[partner].applied_span,
                    adjusted[partner].applied_span,
                    adjusted[partner].final_span,
                );
                adjusted[i].effective = effective;
                adjusted[i].applied_span = span;
                adjusted[i].final_span = final_span;
            }
        }

        let inverses: Vec<(Option<Operation>, UndoCapability)> = adjusted
            .iter()
            .map(|op| compute_inverse(snapshot, op))
            .collect();
        let requests = translate(&adjusted);

        let outcomes: Vec<OperationOutcome> = adjusted
            .iter()
            .zip(&inverses)
            .map(|(op, (_, capability))| OperationOutcome {
                index: op.validated.index,
                kind: op.validated.op.kind.name(),
                tab_id: op.validated.tab_id.clone(),
                applied_range: op.final_span,
                position_shift: op.delta,
                removed_blank_lines: removed_counts[op.validated.index],
                capability: *capability,
            })
            .collect();

        match mode {
            ExecutionMode::Preview => Ok(BatchResult {
                batch_id,
                success: true,
                operations: outcomes,
                preview: Some(simulate(snapshot, &requests)),
            }),
            ExecutionMode::Apply => {
                let outcome = self.transport.submit(&snapshot.document_id, &requests)?;
                if !outcome.is_complete() {
                    return Err(EngineError::PartialApplyUnsupported {
                        applied: outcome.applied,
                        total: outcome.total,
                    });
                }

                let applied_at = SystemTime::now();
                let records = adjusted
                    .iter()
                    .zip(inverses)
                    .map(|(op, (inverse, capability))| AppliedOperationRecord {
                        record_id: Uuid::new_v4(),
                        batch_id,
                        kind: op.validated.op.kind.name().to_string(),
                        tab_id: op.validated.tab_id.clone(),
                        applied_range: op.final_span,
                        position_shift: op.delta,
                        removed_blank_lines: removed_counts[op.validated.index],
                        inverse,
                        capability,
                        applied_at,
                        undone: false,
                        undone_at: None,
                        undo_of: undo_tags[op.validated.index],
                    })
                    .collect();
                self.history.record(&snapshot.document_id, records);

                tracing::info!(
                    batch = %batch_id,
                    document = snapshot.document_id,
                    applied = outcome.applied,
                    "batch applied"
                );
                Ok(BatchResult {
                    batch_id,
                    success: true,
                    operations: outcomes,
                    preview: None,
                })
            }
        }
    }
}

fn resolve_batch(
    snapshot: &DocumentSnapshot,
    operations: Vec<Operation>,
) -> Result<Vec<ResolvedOp>, EngineError> {
    operations
        .into_iter()
        .enumerate()
        .map(|(index, op)| {
            let tab = match &op.tab_id {
                Some(tab_id) => {
                    snapshot
                        .tab(tab_id)
                        .ok_or_else(|| EngineError::LocatorNotFound {
                            index,
                            message: format!("tab '{tab_id}' not found"),
                        })?
                }
                None => snapshot
                    .first_tab()
                    .ok_or_else(|| EngineError::LocatorNotFound {
                        index,
                        message: "document has no tabs".to_string(),
                    })?,
            };
            let range = match &op.target {
                Target::Range(range) => *range,
                Target::Locator(loc) => locator::resolve(loc, tab).map_err(|err| match err {
                    ResolveError::NotFound { message } => {
                        EngineError::LocatorNotFound { index, message }
                    }
                    ResolveError::Ambiguous { search, matches } => EngineError::AmbiguousLocator {
                        index,
                        search,
                        matches,
                    },
                })?,
            };
            Ok(ResolvedOp {
                index,
                tab_id: tab.tab_id.clone(),
                op,
                range,
            })
        })
        .collect()
}

/// Rewrite the text of every list-marked insert through the normalizer.
/// Returns removed-break counts indexed by batch position.
fn normalize_marked(validated: &mut [ValidatedOp]) -> Vec<usize> {
    let mut removed = vec![0usize; validated.len()];

    for op in validated.iter_mut() {
        if op.list_marking.is_none() {
            continue;
        }
        if let OpKind::InsertText { text } | OpKind::ReplaceText { text } = &mut op.op.kind {
            let result = normalize_for_list(text);
            if result.removed_count > 0 {
                *text = result.clean_text;
                removed[op.index] = result.removed_count;
            }
        }
    }
    removed
}

/// Build the inverse operation and undo capability for one adjusted
/// operation, reading prior text and metadata from the snapshot.
///
/// Inverses are expressed against the operation's applied span. Undo
/// replays them in strict reverse order with adjustment disabled, which
/// recreates exactly the document state each span was measured in.
fn compute_inverse(
    snapshot: &DocumentSnapshot,
    op: &AdjustedOp,
) -> (Option<Operation>, UndoCapability) {
    let tab = match snapshot.tab(&op.validated.tab_id) {
        Some(tab) => tab,
        None => return (None, UndoCapability::None),
    };
    let original = op.validated.range;
    let span = op.applied_span;
    let tab_id = Some(op.validated.tab_id.clone());

    let with_tab = |mut inverse: Operation| {
        inverse.tab_id = tab_id.clone();
        inverse
    };

    match &op.validated.op.kind {
        OpKind::InsertText { .. } => (
            Some(with_tab(Operation::at_range(OpKind::DeleteRange, span))),
            UndoCapability::Full,
        ),
        OpKind::ReplaceText { .. } => (
            Some(with_tab(Operation::at_range(
                OpKind::ReplaceText {
                    text: tab.slice(original),
                },
                span,
            ))),
            UndoCapability::Full,
        ),
        OpKind::DeleteRange => {
            let capability = if tab.has_style_metadata() {
                // Reinsertion restores text only; prior character styling
                // over the deleted span is not reconstructed.
                UndoCapability::Partial
            } else {
                UndoCapability::Full
            };
            (
                Some(with_tab(Operation::at_range(
                    OpKind::InsertText {
                        text: tab.slice(original),
                    },
                    Range::at(span.start),
                ))),
                capability,
            )
        }
        OpKind::FormatRange { style } => {
            let prior = tab.style_at(original.start).cloned().unwrap_or_default();
            let (inverse_style, capability) = invert_style(style, &prior, tab.has_style_metadata());
            if inverse_style.is_empty() {
                return (None, UndoCapability::None);
            }
            (
                Some(with_tab(Operation::at_range(
                    OpKind::FormatRange {
                        style: inverse_style,
                    },
                    span,
                ))),
                capability,
            )
        }
        OpKind::ConvertToList { .. } => {
            let inverse = match tab.list_style_at(original.start) {
                Some(prior) => Operation::at_range(OpKind::ConvertToList { style: prior }, span),
                None => Operation::at_range(OpKind::ClearList, span),
            };
            (Some(with_tab(inverse)), UndoCapability::Full)
        }
        OpKind::ClearList => match tab.list_style_at(original.start) {
            Some(prior) => (
                Some(with_tab(Operation::at_range(
                    OpKind::ConvertToList { style: prior },
                    span,
                ))),
                UndoCapability::Full,
            ),
            None => (None, UndoCapability::None),
        },
        OpKind::InsertTableRow { .. } | OpKind::MergeCells { .. } => (None, UndoCapability::None),
    }
}

/// For each attribute the applied style set, the inverse restores the value
/// in force before the batch. Boolean attributes default to unset (false).
/// A size or link with no recorded prior value cannot be restored and is
/// omitted, degrading the capability.
fn invert_style(
    applied: &TextStyle,
    prior: &TextStyle,
    has_metadata: bool,
) -> (TextStyle, UndoCapability) {
    let mut inverse = TextStyle::default();
    let mut capability = if has_metadata {
        UndoCapability::Full
    } else {
        UndoCapability::Partial
    };

    if applied.bold.is_some() {
        inverse.bold = Some(prior.bold.unwrap_or(false));
    }
    if applied.italic.is_some() {
        inverse.italic = Some(prior.italic.unwrap_or(false));
    }
    if applied.underline.is_some() {
        inverse.underline = Some(prior.underline.unwrap_or(false));
    }
    if applied.strikethrough.is_some() {
        inverse.strikethrough = Some(prior.strikethrough.unwrap_or(false));
    }
    if applied.font_size.is_some() {
        match prior.font_size {
            Some(size) => inverse.font_size = Some(size),
            None => capability = UndoCapability::Partial,
        }
    }
    if applied.link.is_some() {
        match &prior.link {
            Some(link) => inverse.link = Some(link.clone()),
            None => capability = UndoCapability::Partial,
        }
    }
    (inverse, capability)
}

/// Translate adjusted operations into transport requests, in batch order.
fn translate(adjusted: &[AdjustedOp]) -> Vec<DocRequest> {
    let mut requests = Vec::with_capacity(adjusted.len());
    for op in adjusted {
        let tab_id = op.validated.tab_id.clone();
        let effective = op.effective;
        match &op.validated.op.kind {
            OpKind::InsertText { text } => {
                requests.push(DocRequest::InsertText {
                    tab_id: tab_id.clone(),
                    offset: effective.start,
                    text: text.clone(),
                });
                if let Some(style) = op.validated.list_marking {
                    requests.push(DocRequest::CreateParagraphBullets {
                        tab_id,
                        range: op.applied_span,
                        style,
                    });
                }
            }
            OpKind::ReplaceText { text } => {
                requests.push(DocRequest::DeleteRange {
                    tab_id: tab_id.clone(),
                    range: effective,
                });
                requests.push(DocRequest::InsertText {
                    tab_id: tab_id.clone(),
                    offset: effective.start,
                    text: text.clone(),
                });
                if let Some(style) = op.validated.list_marking {
                    requests.push(DocRequest::CreateParagraphBullets {
                        tab_id,
                        range: op.applied_span,
                        style,
                    });
                }
            }
            OpKind::DeleteRange => {
                requests.push(DocRequest::DeleteRange {
                    tab_id,
                    range: effective,
                });
            }
            OpKind::FormatRange { style } => {
                requests.push(DocRequest::UpdateTextStyle {
                    tab_id,
                    range: effective,
                    style: style.clone(),
                });
            }
            OpKind::ConvertToList { style } => {
                // A folded conversion's bullets were emitted by its insert.
                if op.validated.merged_into.is_none() {
                    requests.push(DocRequest::CreateParagraphBullets {
                        tab_id,
                        range: effective,
                        style: *style,
                    });
                }
            }
            OpKind::ClearList => {
                requests.push(DocRequest::DeleteParagraphBullets {
                    tab_id,
                    range: effective,
                });
            }
            OpKind::InsertTableRow { cells, below } => {
                requests.push(DocRequest::InsertTableRow {
                    tab_id,
                    offset: effective.start,
                    cells: cells.clone(),
                    below: *below,
                });
            }
            OpKind::MergeCells { rows, columns } => {
                requests.push(DocRequest::MergeTableCells {
                    tab_id,
                    offset: effective.start,
                    rows: *rows,
                    columns: *columns,
                });
            }
        }
    }
    requests
}

/// Replay the batch's text edits on local copies of the affected tabs and
/// diff the result. Formatting and list requests count as modifications but
/// produce no text diff.
fn simulate(snapshot: &DocumentSnapshot, requests: &[DocRequest]) -> PreviewReport {
    let mut diffs = Vec::new();
    for tab in &snapshot.tabs {
        let original = tab.text();
        let mut buffer = Rope::from(original.as_str());
        for request in requests.iter().filter(|r| r.tab_id() == tab.tab_id) {
            match request {
                DocRequest::InsertText { offset, text, .. } => {
                    let pos = (offset - 1).min(buffer.len());
                    buffer.edit(pos..pos, text.as_str());
                }
                DocRequest::DeleteRange { range, .. } => {
                    let start = (range.start - 1).min(buffer.len());
                    let end = (range.end - 1).min(buffer.len()).max(start);
                    buffer.edit(start..end, "");
                }
                _ => {}
            }
        }
        let modified = buffer.to_string();
        if modified != original {
            diffs.push(TabDiff {
                tab_id: tab.tab_id.clone(),
                diff: diffy::create_patch(&original, &modified).to_string(),
            });
        }
    }
    PreviewReport {
        would_modify: !requests.is_empty(),
        diffs,
    }
}
