//! Text normalization for list conversion.
//!
//! When inserted text is about to become list items, each paragraph break
//! produces one item. Blank separator lines between paragraphs would become
//! empty bullets, so runs of consecutive breaks are collapsed to one before
//! insertion.

use std::sync::OnceLock;

use regex::Regex;

static BLANK_RUN: OnceLock<Regex> = OnceLock::new();

fn blank_run() -> &'static Regex {
    BLANK_RUN.get_or_init(|| Regex::new(r"\n{2,}").expect("blank-run pattern compiles"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized {
    pub clean_text: String,
    /// Number of line breaks removed (a run of `n` breaks loses `n - 1`).
    pub removed_count: usize,
}

/// Collapse every run of two or more consecutive paragraph breaks into a
/// single break. Single breaks are preserved. Idempotent: a second pass
/// returns the same text with `removed_count == 0`.
pub fn normalize_for_list(text: &str) -> Normalized {
    let removed_count = blank_run()
        .find_iter(text)
        .map(|m| m.len() - 1)
        .sum::<usize>();

    if removed_count == 0 {
        return Normalized {
            clean_text: text.to_string(),
            removed_count: 0,
        };
    }

    Normalized {
        clean_text: blank_run().replace_all(text, "\n").into_owned(),
        removed_count,
    }
}
