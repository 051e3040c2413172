use std::time::SystemTime;

use xi_rope::Rope;

use crate::ops::{ListStyle, Range, TextStyle};

/// First writable offset in a tab. Offset 0 holds the structural break that
/// opens every tab and can never be targeted by an operation.
pub const ORIGIN: usize = 1;

/// Immutable, point-in-time read of a remote document.
///
/// A snapshot is fetched once per batch and never mutated; locator resolution
/// and length checks all run against it. A new batch re-fetches.
#[derive(Debug, Clone)]
pub struct DocumentSnapshot {
    pub document_id: String,
    pub tabs: Vec<Tab>,
    pub fetched_at: SystemTime,
}

impl DocumentSnapshot {
    pub fn new(document_id: impl Into<String>, tabs: Vec<Tab>, fetched_at: SystemTime) -> Self {
        Self {
            document_id: document_id.into(),
            tabs,
            fetched_at,
        }
    }

    pub fn tab(&self, tab_id: &str) -> Option<&Tab> {
        self.tabs.iter().find(|t| t.tab_id == tab_id)
    }

    /// The tab operations target when they don't name one explicitly.
    pub fn first_tab(&self) -> Option<&Tab> {
        self.tabs.first()
    }
}

/// A heading paragraph within a tab, as reported by the transport.
///
/// `end` is the offset immediately after the heading's terminating line
/// break, i.e. the insertion point a heading locator resolves to.
#[derive(Debug, Clone, PartialEq)]
pub struct Heading {
    pub title: String,
    pub level: u8,
    pub start: usize,
    pub end: usize,
}

/// One tab of a document: its text projection plus the structural metadata
/// needed to resolve locators and compute inverses.
///
/// Offsets are one-based over the tab's UTF-8 text projection: offset `o`
/// addresses buffer byte `o - 1`. The buffer always ends with a terminal
/// line break that cannot be edited or deleted; the last valid insertion
/// offset sits just before it.
#[derive(Debug, Clone)]
pub struct Tab {
    pub tab_id: String,
    pub title: String,
    buffer: Rope,
    headings: Vec<Heading>,
    lists: Vec<(Range, ListStyle)>,
    styles: Vec<(Range, TextStyle)>,
}

impl Tab {
    /// Create a tab from raw text with no structural metadata.
    /// A terminal line break is appended if the text lacks one.
    pub fn new(tab_id: impl Into<String>, title: impl Into<String>, text: &str) -> Self {
        let mut body = text.to_string();
        if !body.ends_with('\n') {
            body.push('\n');
        }
        Self {
            tab_id: tab_id.into(),
            title: title.into(),
            buffer: Rope::from(body.as_str()),
            headings: Vec::new(),
            lists: Vec::new(),
            styles: Vec::new(),
        }
    }

    pub fn with_headings(mut self, headings: Vec<Heading>) -> Self {
        self.headings = headings;
        self
    }

    pub fn with_lists(mut self, lists: Vec<(Range, ListStyle)>) -> Self {
        self.lists = lists;
        self
    }

    pub fn with_styles(mut self, styles: Vec<(Range, TextStyle)>) -> Self {
        self.styles = styles;
        self
    }

    /// Plain-text projection of the tab, including the terminal line break.
    pub fn text(&self) -> String {
        self.buffer.to_string()
    }

    /// Total length of the offset space, counting the reserved offset 0.
    pub fn len(&self) -> usize {
        self.buffer.len() + 1
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.len() <= 1
    }

    /// Last valid insertion offset: just before the terminal line break.
    /// Inserting here appends to the end of the tab's content.
    pub fn end_offset(&self) -> usize {
        self.buffer.len()
    }

    pub fn headings(&self) -> &[Heading] {
        &self.headings
    }

    pub fn heading(&self, title: &str) -> Option<&Heading> {
        self.headings.iter().find(|h| h.title == title)
    }

    /// Text covered by a range of document offsets.
    pub fn slice(&self, range: Range) -> String {
        let start = range.start.saturating_sub(1).min(self.buffer.len());
        let end = range.end.saturating_sub(1).min(self.buffer.len()).max(start);
        self.buffer.slice_to_cow(start..end).into_owned()
    }

    /// List style in force at an offset, if the transport reported one.
    pub fn list_style_at(&self, offset: usize) -> Option<ListStyle> {
        self.lists
            .iter()
            .find(|(range, _)| range.start <= offset && offset < range.end)
            .map(|(_, style)| *style)
    }

    /// Text style in force at an offset. Tabs fetched without style metadata
    /// report the default (unstyled) run.
    pub fn style_at(&self, offset: usize) -> Option<&TextStyle> {
        self.styles
            .iter()
            .find(|(range, _)| range.start <= offset && offset < range.end)
            .map(|(_, style)| style)
    }

    pub fn has_style_metadata(&self) -> bool {
        !self.styles.is_empty()
    }
}
