//! Cumulative offset adjustment.
//!
//! Operations in a batch are expressed against one snapshot, but each text
//! edit shifts every later offset in the same tab. This pass walks the batch
//! in order, keeping a running signed delta per tab, and rewrites each
//! operation's range into the coordinates the document will actually have
//! when that operation applies.

use std::collections::HashMap;

use crate::error::EngineError;
use crate::ops::validate::ValidatedOp;
use crate::ops::{OpKind, Range};
use crate::snapshot::{DocumentSnapshot, ORIGIN};

/// A validated operation with submission-ready coordinates.
#[derive(Debug, Clone)]
pub struct AdjustedOp {
    pub validated: ValidatedOp,
    /// The range the operation targets at its moment of application.
    pub effective: Range,
    /// Signed length change this operation contributes to later offsets.
    pub delta: i64,
    /// The span the operation's result occupies immediately after it
    /// applies: inserted text for inserts, the surviving insertion point
    /// for deletes, the styled range for formatting kinds. Inverses are
    /// expressed against this span, since undo replays them in reverse
    /// order into exactly this document state.
    pub applied_span: Range,
    /// `applied_span` carried forward into post-batch coordinates, after
    /// every later operation in the same tab has also applied. Reported to
    /// callers as where the result actually landed.
    pub final_span: Range,
}

/// Length change an operation causes in its tab's text projection.
/// Formatting, list, and table kinds leave the projection length unchanged.
fn length_delta(op: &ValidatedOp, effective: Range) -> i64 {
    match &op.op.kind {
        OpKind::InsertText { text } => text.len() as i64,
        OpKind::ReplaceText { text } => text.len() as i64 - effective.len() as i64,
        OpKind::DeleteRange => -(effective.len() as i64),
        OpKind::FormatRange { .. }
        | OpKind::ConvertToList { .. }
        | OpKind::ClearList
        | OpKind::InsertTableRow { .. }
        | OpKind::MergeCells { .. } => 0,
    }
}

fn applied_span(op: &ValidatedOp, effective: Range) -> Range {
    match &op.op.kind {
        OpKind::InsertText { text } => Range::new(effective.start, effective.start + text.len()),
        OpKind::ReplaceText { text } => Range::new(effective.start, effective.start + text.len()),
        OpKind::DeleteRange => Range::at(effective.start),
        _ => effective,
    }
}

/// Rewrite a batch's ranges into per-application coordinates, then carry
/// each operation's result span forward to post-batch coordinates.
///
/// With `auto_adjust` off, ranges are taken as given: the caller (or the
/// undo planner, whose inverses already sit in per-application coordinates)
/// has done the arithmetic itself. Deltas and spans are still computed.
///
/// A range that earlier deletions shift below the first writable offset has
/// no valid application point and rejects the batch.
pub fn adjust(
    snapshot: &DocumentSnapshot,
    ops: Vec<ValidatedOp>,
    auto_adjust: bool,
) -> Result<Vec<AdjustedOp>, EngineError> {
    let mut deltas: HashMap<String, i64> = HashMap::new();
    let mut adjusted: Vec<AdjustedOp> = Vec::with_capacity(ops.len());

    for op in ops {
        let running = deltas.entry(op.tab_id.clone()).or_insert(0);
        let effective = if auto_adjust {
            if (op.range.start as i64 + *running) < ORIGIN as i64 {
                let max = snapshot
                    .tab(&op.tab_id)
                    .map(|tab| tab.end_offset())
                    .unwrap_or(ORIGIN);
                return Err(EngineError::IndexOutOfBounds {
                    index: op.index,
                    offset: 0,
                    max,
                });
            }
            op.range.shifted(*running)
        } else {
            op.range
        };
        let delta = length_delta(&op, effective);
        let span = applied_span(&op, effective);
        *running += delta;

        tracing::trace!(
            operation = op.index,
            kind = op.op.kind.name(),
            original_start = op.range.start,
            effective_start = effective.start,
            delta,
            "adjusted operation range"
        );

        adjusted.push(AdjustedOp {
            validated: op,
            effective,
            delta,
            applied_span: span,
            final_span: span,
        });
    }

    // A later edit at or before a span's start shifts that span. Edits
    // strictly after it cannot move it, and an insertion landing exactly at
    // the start pushes the span right (spans track content, not positions).
    for i in 0..adjusted.len() {
        let mut shift = 0i64;
        for j in (i + 1)..adjusted.len() {
            if adjusted[j].validated.tab_id == adjusted[i].validated.tab_id
                && adjusted[j].effective.start <= adjusted[i].applied_span.start
            {
                shift += adjusted[j].delta;
            }
        }
        adjusted[i].final_span = adjusted[i].applied_span.shifted(shift);
    }

    Ok(adjusted)
}
