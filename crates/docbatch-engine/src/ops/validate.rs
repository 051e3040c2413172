//! Batch validation: per-kind required fields, range structure and bounds,
//! and cross-operation conflict detection.
//!
//! Validation runs after locator resolution and before offset adjustment; it
//! never mutates the snapshot, only annotates the operation list.

use crate::error::EngineError;
use crate::ops::{ListStyle, OpKind, Operation, Range};
use crate::snapshot::{DocumentSnapshot, ORIGIN};

/// An operation whose target has been resolved to a concrete range in the
/// snapshot's (pre-batch) offset space.
#[derive(Debug, Clone)]
pub struct ResolvedOp {
    /// Position in the caller's batch; error reporting refers to this.
    pub index: usize,
    pub tab_id: String,
    pub op: Operation,
    pub range: Range,
}

/// A resolved operation that passed validation, annotated with its role in
/// any list conversion within the batch.
#[derive(Debug, Clone)]
pub struct ValidatedOp {
    pub index: usize,
    pub tab_id: String,
    pub op: Operation,
    pub range: Range,
    /// Set when this operation's inserted text feeds a list conversion,
    /// either inline or via a later `convert_to_list` on the same target.
    pub list_marking: Option<ListStyle>,
    /// For a `convert_to_list` that marked an earlier insert: that insert's
    /// batch index. The conversion is folded into the insert; its own range
    /// is notional and the bullets go over the inserted text.
    pub merged_into: Option<usize>,
}

/// Validate a resolved batch. Fail-fast: the first structural problem
/// rejects the whole batch and nothing downstream runs.
pub fn validate(
    snapshot: &DocumentSnapshot,
    ops: Vec<ResolvedOp>,
) -> Result<Vec<ValidatedOp>, EngineError> {
    let mut checked = Vec::with_capacity(ops.len());
    for resolved in ops {
        check_required_fields(&resolved)?;
        let range = check_shape(&resolved)?;
        checked.push(ValidatedOp {
            index: resolved.index,
            tab_id: resolved.tab_id,
            op: resolved.op,
            range,
            list_marking: None,
            merged_into: None,
        });
    }

    mark_list_conversions(&mut checked);

    for op in &checked {
        check_bounds(snapshot, op)?;
    }

    // Conflict detection over the corrected ranges, same tab only. A folded
    // conversion's range is notional and does not participate.
    for (a_pos, a) in checked.iter().enumerate() {
        if a.merged_into.is_some() {
            continue;
        }
        for b in checked.iter().skip(a_pos + 1) {
            if b.merged_into.is_none()
                && a.tab_id == b.tab_id
                && a.range.conflicts_with(&b.range)
            {
                return Err(EngineError::OverlappingOperations {
                    first: a.index,
                    second: b.index,
                });
            }
        }
    }

    Ok(checked)
}

fn check_required_fields(resolved: &ResolvedOp) -> Result<(), EngineError> {
    let index = resolved.index;
    match &resolved.op.kind {
        OpKind::InsertText { text } | OpKind::ReplaceText { text } => {
            if text.is_empty() {
                return Err(EngineError::MissingRequiredParam {
                    index,
                    param: "text",
                });
            }
        }
        OpKind::DeleteRange => {}
        OpKind::FormatRange { style } => {
            if style.is_empty() {
                return Err(EngineError::MissingRequiredParam {
                    index,
                    param: "style",
                });
            }
        }
        OpKind::ConvertToList { .. } | OpKind::ClearList => {}
        OpKind::InsertTableRow { cells, .. } => {
            if cells.is_empty() {
                return Err(EngineError::MissingRequiredParam {
                    index,
                    param: "cells",
                });
            }
        }
        OpKind::MergeCells { rows, columns } => {
            if rows * columns < 2 {
                return Err(EngineError::MissingRequiredParam {
                    index,
                    param: "rows/columns",
                });
            }
        }
    }
    Ok(())
}

/// Shape checks; returns the range to use downstream (insertions aimed at
/// the reserved first slot are bumped to ORIGIN).
fn check_shape(resolved: &ResolvedOp) -> Result<Range, EngineError> {
    let index = resolved.index;
    let mut range = resolved.range;

    if range.start > range.end {
        return Err(EngineError::InvalidRange {
            index,
            start: range.start,
            end: range.end,
        });
    }

    let insertion_kind = matches!(
        resolved.op.kind,
        OpKind::InsertText { .. } | OpKind::InsertTableRow { .. } | OpKind::MergeCells { .. }
    );

    if insertion_kind {
        if !range.is_insertion_point() {
            return Err(EngineError::InvalidRange {
                index,
                start: range.start,
                end: range.end,
            });
        }
        if range.start == 0 {
            tracing::debug!(operation = index, "bumping insertion off the reserved first slot");
            range = Range::at(ORIGIN);
        }
    } else if range.is_insertion_point() {
        // Range kinds need something to act on.
        return Err(EngineError::InvalidRange {
            index,
            start: range.start,
            end: range.end,
        });
    }

    Ok(range)
}

fn check_bounds(snapshot: &DocumentSnapshot, op: &ValidatedOp) -> Result<(), EngineError> {
    let tab = snapshot
        .tab(&op.tab_id)
        .ok_or_else(|| EngineError::LocatorNotFound {
            index: op.index,
            message: format!("tab '{}' not found in snapshot", op.tab_id),
        })?;

    let max = tab.end_offset();
    if op.range.start < ORIGIN {
        return Err(EngineError::IndexOutOfBounds {
            index: op.index,
            offset: op.range.start,
            max,
        });
    }
    // A folded conversion's end refers to text that exists only once its
    // insert has applied; only its start is checked against the snapshot.
    let checked_end = if op.merged_into.is_some() {
        op.range.start
    } else {
        op.range.end
    };
    if checked_end > max {
        return Err(EngineError::IndexOutOfBounds {
            index: op.index,
            offset: checked_end,
            max,
        });
    }
    Ok(())
}

/// Look-ahead marking: an insert or replace feeds the normalizer when it
/// carries the inline `convert_to_list` option, or when a later
/// `convert_to_list` in the batch starts exactly at its target offset. In
/// the latter case the conversion is folded into the insert.
fn mark_list_conversions(ops: &mut [ValidatedOp]) {
    for i in 0..ops.len() {
        if !ops[i].op.kind.inserts_text() || ops[i].list_marking.is_some() {
            continue;
        }
        if let Some(style) = ops[i].op.convert_to_list {
            ops[i].list_marking = Some(style);
            continue;
        }
        let (tab_id, start, index) = (ops[i].tab_id.clone(), ops[i].range.start, ops[i].index);
        for later in ops[i + 1..].iter_mut() {
            if later.tab_id == tab_id
                && later.range.start == start
                && later.merged_into.is_none()
            {
                if let OpKind::ConvertToList { style } = later.op.kind {
                    later.merged_into = Some(index);
                    ops[i].list_marking = Some(style);
                    break;
                }
            }
        }
    }
}
