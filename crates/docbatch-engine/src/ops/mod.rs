//! The operation model: a closed set of edit kinds, their targets, and the
//! stages that turn caller descriptors into submission-ready requests.
//!
//! An [`Operation`] pairs an [`OpKind`] with a [`Target`]. Targets arrive
//! either as a resolved [`Range`] in the snapshot's offset space or as a
//! semantic [`Locator`](locator::Locator) that the resolver turns into one.
//! Validation, list normalization, and cumulative-offset adjustment each
//! run as separate passes over the batch (see [`validate`], [`normalize`],
//! and [`adjust`]).

pub mod adjust;
pub mod locator;
pub mod normalize;
pub mod validate;

use serde::{Deserialize, Serialize};

use locator::Locator;

/// A half-open offset range `[start, end)` in a tab's offset space, always
/// expressed as the space exists immediately before the operation applies.
/// `start == end` marks a pure insertion point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub start: usize,
    pub end: usize,
}

impl Range {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// An insertion point: a zero-width range.
    pub fn at(offset: usize) -> Self {
        Self {
            start: offset,
            end: offset,
        }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_insertion_point(&self) -> bool {
        self.start == self.end
    }

    pub fn shifted(&self, delta: i64) -> Self {
        Self {
            start: (self.start as i64 + delta) as usize,
            end: (self.end as i64 + delta) as usize,
        }
    }

    /// Whether two ranges conflict for batching purposes.
    ///
    /// Non-empty ranges conflict on strict interval intersection. An
    /// insertion point conflicts only when it falls strictly inside the
    /// other range; touching a boundary is allowed, and two insertion
    /// points never conflict (batch order breaks the tie).
    pub fn conflicts_with(&self, other: &Range) -> bool {
        match (self.is_insertion_point(), other.is_insertion_point()) {
            (true, true) => false,
            (true, false) => other.start < self.start && self.start < other.end,
            (false, true) => self.start < other.start && other.start < self.end,
            (false, false) => self.start.max(other.start) < self.end.min(other.end),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ListStyle {
    Ordered,
    Unordered,
}

/// Character-level style attributes. `None` means "leave unchanged"; a
/// format operation must set at least one attribute.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextStyle {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bold: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub italic: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub underline: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strikethrough: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_size: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

impl TextStyle {
    pub fn is_empty(&self) -> bool {
        self.bold.is_none()
            && self.italic.is_none()
            && self.underline.is_none()
            && self.strikethrough.is_none()
            && self.font_size.is_none()
            && self.link.is_none()
    }
}

/// The closed set of operation kinds. Every kind has exhaustive handling in
/// validation, length-delta computation, inverse computation, and request
/// translation; adding a kind is a compile-checked change in each.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OpKind {
    InsertText { text: String },
    ReplaceText { text: String },
    DeleteRange,
    FormatRange { style: TextStyle },
    ConvertToList { style: ListStyle },
    ClearList,
    InsertTableRow { cells: Vec<String>, below: bool },
    MergeCells { rows: usize, columns: usize },
}

impl OpKind {
    pub fn name(&self) -> &'static str {
        match self {
            OpKind::InsertText { .. } => "insert_text",
            OpKind::ReplaceText { .. } => "replace_text",
            OpKind::DeleteRange => "delete_range",
            OpKind::FormatRange { .. } => "format_range",
            OpKind::ConvertToList { .. } => "convert_to_list",
            OpKind::ClearList => "clear_list",
            OpKind::InsertTableRow { .. } => "insert_table_row",
            OpKind::MergeCells { .. } => "merge_cells",
        }
    }

    /// Whether this kind inserts text that a later `convert_to_list` in the
    /// same batch could listify.
    pub fn inserts_text(&self) -> bool {
        matches!(self, OpKind::InsertText { .. } | OpKind::ReplaceText { .. })
    }
}

/// Where an operation lands: a pre-resolved range, or a semantic locator
/// to be resolved against the snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    Range(Range),
    Locator(Locator),
}

/// One edit in a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    #[serde(flatten)]
    pub kind: OpKind,
    pub target: Target,
    /// Inline list conversion: normalize the inserted text and bullet it in
    /// one step, without a separate `convert_to_list` operation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub convert_to_list: Option<ListStyle>,
    /// Tab the operation targets; the document's first tab when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<String>,
}

impl Operation {
    pub fn new(kind: OpKind, target: Target) -> Self {
        Self {
            kind,
            target,
            convert_to_list: None,
            tab_id: None,
        }
    }

    pub fn at_range(kind: OpKind, range: Range) -> Self {
        Self::new(kind, Target::Range(range))
    }

    pub fn with_locator(kind: OpKind, locator: Locator) -> Self {
        Self::new(kind, Target::Locator(locator))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_empty_ranges_conflict_on_strict_intersection() {
        assert!(Range::new(5, 10).conflicts_with(&Range::new(8, 12)));
        assert!(Range::new(8, 12).conflicts_with(&Range::new(5, 10)));
        // touching at a boundary is not a conflict
        assert!(!Range::new(5, 10).conflicts_with(&Range::new(10, 15)));
        assert!(!Range::new(10, 15).conflicts_with(&Range::new(5, 10)));
    }

    #[test]
    fn test_insertion_point_conflicts_only_strictly_inside() {
        let range = Range::new(5, 10);
        assert!(Range::at(7).conflicts_with(&range));
        assert!(range.conflicts_with(&Range::at(7)));
        // boundary insertion points are allowed
        assert!(!Range::at(5).conflicts_with(&range));
        assert!(!Range::at(10).conflicts_with(&range));
    }

    #[test]
    fn test_two_insertion_points_never_conflict() {
        assert!(!Range::at(5).conflicts_with(&Range::at(5)));
        assert!(!Range::at(5).conflicts_with(&Range::at(6)));
    }

    #[test]
    fn test_shifted() {
        assert_eq!(Range::new(5, 10).shifted(3), Range::new(8, 13));
        assert_eq!(Range::new(5, 10).shifted(-2), Range::new(3, 8));
    }

    #[test]
    fn test_operation_descriptor_round_trips_through_json() {
        let op = Operation {
            kind: OpKind::InsertText {
                text: "hello".to_string(),
            },
            target: Target::Locator(Locator::DocumentEnd),
            convert_to_list: Some(ListStyle::Unordered),
            tab_id: None,
        };
        let json = serde_json::to_string(&op).unwrap();
        assert!(json.contains("\"kind\":\"insert_text\""));
        assert!(json.contains("\"convert_to_list\":\"UNORDERED\""));
        let back: Operation = serde_json::from_str(&json).unwrap();
        assert_eq!(back, op);
    }
}
