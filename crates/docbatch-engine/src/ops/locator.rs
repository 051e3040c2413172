//! Locator resolution: turning semantic targets into concrete offset ranges
//! against a snapshot tab.

use serde::{Deserialize, Serialize};

use crate::ops::Range;
use crate::snapshot::{ORIGIN, Tab};

/// Which match a search locator selects. `Nth` is 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Occurrence {
    #[default]
    First,
    Last,
    #[serde(untagged)]
    Nth(usize),
}

/// Where a search-based operation lands relative to the matched text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchPosition {
    Before,
    After,
    #[default]
    Replace,
}

/// A semantic description of a target position or range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Locator {
    Search {
        text: String,
        #[serde(default)]
        occurrence: Occurrence,
        #[serde(default)]
        position: SearchPosition,
        #[serde(default = "default_match_case")]
        match_case: bool,
        /// Fail with an ambiguity error when more than one match exists.
        #[serde(default)]
        require_unique: bool,
    },
    Heading {
        title: String,
    },
    DocumentStart,
    DocumentEnd,
    Offset {
        at: usize,
    },
}

fn default_match_case() -> bool {
    true
}

/// Resolution failure, mapped to an engine error (with the operation's batch
/// index attached) by the executor.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolveError {
    NotFound { message: String },
    Ambiguous { search: String, matches: usize },
}

/// Resolve a locator to a concrete range in `tab`'s offset space.
///
/// Search matching is exact-substring over the tab's plain-text projection;
/// whitespace is not normalized, so callers must match literal text.
pub fn resolve(locator: &Locator, tab: &Tab) -> Result<Range, ResolveError> {
    match locator {
        Locator::Search {
            text,
            occurrence,
            position,
            match_case,
            require_unique,
        } => resolve_search(tab, text, *occurrence, *position, *match_case, *require_unique),
        Locator::Heading { title } => match tab.heading(title) {
            Some(heading) => Ok(Range::at(heading.end)),
            None => Err(ResolveError::NotFound {
                message: format!("heading '{title}' not found"),
            }),
        },
        Locator::DocumentStart => Ok(Range::at(ORIGIN)),
        Locator::DocumentEnd => Ok(Range::at(tab.end_offset())),
        // The reserved first slot cannot host content; an explicit offset 0
        // is bumped to the first writable position.
        Locator::Offset { at } => Ok(Range::at((*at).max(ORIGIN))),
    }
}

fn resolve_search(
    tab: &Tab,
    needle: &str,
    occurrence: Occurrence,
    position: SearchPosition,
    match_case: bool,
    require_unique: bool,
) -> Result<Range, ResolveError> {
    if needle.is_empty() {
        return Err(ResolveError::NotFound {
            message: "search text cannot be empty".to_string(),
        });
    }

    let haystack = tab.text();
    let matches = find_occurrences(&haystack, needle, match_case);

    if matches.is_empty() {
        return Err(ResolveError::NotFound {
            message: format!("text '{needle}' not found in tab '{}'", tab.tab_id),
        });
    }
    if require_unique && matches.len() > 1 {
        return Err(ResolveError::Ambiguous {
            search: needle.to_string(),
            matches: matches.len(),
        });
    }

    let position_in_text = match occurrence {
        Occurrence::First => matches[0],
        Occurrence::Last => matches[matches.len() - 1],
        Occurrence::Nth(n) => {
            if n == 0 || n > matches.len() {
                return Err(ResolveError::NotFound {
                    message: format!(
                        "occurrence {n} of '{needle}' not found; tab contains {} occurrence(s)",
                        matches.len()
                    ),
                });
            }
            matches[n - 1]
        }
    };

    // Text positions are zero-based; document offsets start at ORIGIN.
    let start = position_in_text + ORIGIN;
    let end = start + needle.len();
    Ok(match position {
        SearchPosition::Before => Range::at(start),
        SearchPosition::After => Range::at(end),
        SearchPosition::Replace => Range::new(start, end),
    })
}

/// Byte positions of every match of `needle` in `haystack`. Overlapping
/// matches are not counted twice; the scan resumes past each match end.
fn find_occurrences(haystack: &str, needle: &str, match_case: bool) -> Vec<usize> {
    let mut positions = Vec::new();
    if match_case {
        let mut from = 0;
        while let Some(found) = haystack[from..].find(needle) {
            positions.push(from + found);
            from += found + needle.len();
        }
    } else {
        // Case-insensitive matching compares fixed-width byte windows so
        // that match positions stay valid offsets.
        let hay = haystack.as_bytes();
        let pat = needle.as_bytes();
        let mut start = 0;
        while start + pat.len() <= hay.len() {
            if hay[start..start + pat.len()].eq_ignore_ascii_case(pat)
                && haystack.is_char_boundary(start)
            {
                positions.push(start);
                start += pat.len();
            } else {
                start += 1;
            }
        }
    }
    positions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::Heading;

    fn search(text: &str) -> Locator {
        Locator::Search {
            text: text.to_string(),
            occurrence: Occurrence::First,
            position: SearchPosition::Replace,
            match_case: true,
            require_unique: false,
        }
    }

    #[test]
    fn test_search_first_match_wins() {
        let tab = Tab::new("t0", "Body", "one two one two");
        let range = resolve(&search("one"), &tab).unwrap();
        // "one" begins at text position 0, document offset 1
        assert_eq!(range, Range::new(1, 4));
    }

    #[test]
    fn test_search_last_occurrence() {
        let tab = Tab::new("t0", "Body", "one two one two");
        let locator = Locator::Search {
            text: "one".to_string(),
            occurrence: Occurrence::Last,
            position: SearchPosition::Replace,
            match_case: true,
            require_unique: false,
        };
        assert_eq!(resolve(&locator, &tab).unwrap(), Range::new(9, 12));
    }

    #[test]
    fn test_search_nth_occurrence_out_of_range() {
        let tab = Tab::new("t0", "Body", "one two one");
        let locator = Locator::Search {
            text: "one".to_string(),
            occurrence: Occurrence::Nth(3),
            position: SearchPosition::Replace,
            match_case: true,
            require_unique: false,
        };
        let err = resolve(&locator, &tab).unwrap_err();
        assert!(matches!(err, ResolveError::NotFound { .. }));
    }

    #[test]
    fn test_search_positions() {
        let tab = Tab::new("t0", "Body", "alpha beta gamma");
        let before = Locator::Search {
            text: "beta".to_string(),
            occurrence: Occurrence::First,
            position: SearchPosition::Before,
            match_case: true,
            require_unique: false,
        };
        let after = Locator::Search {
            text: "beta".to_string(),
            occurrence: Occurrence::First,
            position: SearchPosition::After,
            match_case: true,
            require_unique: false,
        };
        assert_eq!(resolve(&before, &tab).unwrap(), Range::at(7));
        assert_eq!(resolve(&after, &tab).unwrap(), Range::at(11));
    }

    #[test]
    fn test_search_requires_literal_whitespace() {
        let tab = Tab::new("t0", "Body", "Goal  1");
        assert!(resolve(&search("Goal 1"), &tab).is_err());
        assert!(resolve(&search("Goal  1"), &tab).is_ok());
    }

    #[test]
    fn test_ambiguous_only_when_uniqueness_requested() {
        let tab = Tab::new("t0", "Body", "dup text dup text");
        assert!(resolve(&search("dup"), &tab).is_ok());

        let unique = Locator::Search {
            text: "dup".to_string(),
            occurrence: Occurrence::First,
            position: SearchPosition::Replace,
            match_case: true,
            require_unique: true,
        };
        let err = resolve(&unique, &tab).unwrap_err();
        assert_eq!(
            err,
            ResolveError::Ambiguous {
                search: "dup".to_string(),
                matches: 2
            }
        );
    }

    #[test]
    fn test_overlapping_matches_counted_once() {
        let tab = Tab::new("t0", "Body", "aaa");
        let unique = Locator::Search {
            text: "aa".to_string(),
            occurrence: Occurrence::First,
            position: SearchPosition::Replace,
            match_case: true,
            require_unique: true,
        };
        // "aa" at positions 0 and 1 overlap; only the first counts
        assert_eq!(resolve(&unique, &tab).unwrap(), Range::new(1, 3));

        let folded = Locator::Search {
            text: "AA".to_string(),
            occurrence: Occurrence::First,
            position: SearchPosition::Replace,
            match_case: false,
            require_unique: true,
        };
        assert_eq!(resolve(&folded, &tab).unwrap(), Range::new(1, 3));

        let second = Locator::Search {
            text: "aa".to_string(),
            occurrence: Occurrence::Nth(2),
            position: SearchPosition::Replace,
            match_case: true,
            require_unique: false,
        };
        assert!(matches!(
            resolve(&second, &tab).unwrap_err(),
            ResolveError::NotFound { .. }
        ));
    }

    #[test]
    fn test_case_insensitive_search() {
        let tab = Tab::new("t0", "Body", "Hello World");
        let locator = Locator::Search {
            text: "hello".to_string(),
            occurrence: Occurrence::First,
            position: SearchPosition::Replace,
            match_case: false,
            require_unique: false,
        };
        assert_eq!(resolve(&locator, &tab).unwrap(), Range::new(1, 6));
    }

    #[test]
    fn test_heading_resolves_after_terminating_break() {
        let text = "Overview\nBody follows here";
        let tab = Tab::new("t0", "Body", text).with_headings(vec![Heading {
            title: "Overview".to_string(),
            level: 1,
            start: 1,
            // "Overview\n" covers offsets 1..=9; the insertion point after
            // the terminating break is offset 10
            end: 10,
        }]);
        let locator = Locator::Heading {
            title: "Overview".to_string(),
        };
        assert_eq!(resolve(&locator, &tab).unwrap(), Range::at(10));
    }

    #[test]
    fn test_document_end_is_last_valid_insertion_offset() {
        let tab = Tab::new("t0", "Body", "abc");
        // "abc\n": terminal break at offset 4; inserting there appends
        assert_eq!(resolve(&Locator::DocumentEnd, &tab).unwrap(), Range::at(4));
    }

    #[test]
    fn test_offset_zero_bumped_to_origin() {
        let tab = Tab::new("t0", "Body", "abc");
        assert_eq!(
            resolve(&Locator::Offset { at: 0 }, &tab).unwrap(),
            Range::at(ORIGIN)
        );
    }
}
