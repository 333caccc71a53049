use serde::{Deserialize, Serialize};

use crate::error::BreadcrumbsError;

/// A span of text in UTF-16 code units, matching the native text view's
/// coordinate space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TextRange {
    pub offset: usize,
    pub length: usize,
}

impl TextRange {
    #[must_use]
    pub fn new(offset: usize, length: usize) -> Self {
        Self { offset, length }
    }

    /// Exclusive end offset, saturating so a hostile file cannot overflow.
    #[must_use]
    pub fn end(&self) -> usize {
        self.offset.saturating_add(self.length)
    }
}

impl From<(usize, usize)> for TextRange {
    fn from((offset, length): (usize, usize)) -> Self {
        Self { offset, length }
    }
}

/// Recoverable state of one editing session.
///
/// Missing fields deserialize to their defaults so records written by older
/// builds keep loading after fields are added.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Breadcrumbs {
    pub exit_status: i32,
    pub text_overflow_ranges: Vec<TextRange>,
    pub comment_line_ranges: Vec<TextRange>,
    pub diff_header_line_ranges: Vec<TextRange>,
    pub diff_add_line_ranges: Vec<TextRange>,
    pub diff_remove_line_ranges: Vec<TextRange>,
    pub spell_checking: bool,
}

impl Breadcrumbs {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Check that every range sequence is sorted by offset and free of overlaps.
    pub fn validate(&self) -> Result<(), BreadcrumbsError> {
        let fields: [(&'static str, &[TextRange]); 5] = [
            ("text_overflow_ranges", &self.text_overflow_ranges),
            ("comment_line_ranges", &self.comment_line_ranges),
            ("diff_header_line_ranges", &self.diff_header_line_ranges),
            ("diff_add_line_ranges", &self.diff_add_line_ranges),
            ("diff_remove_line_ranges", &self.diff_remove_line_ranges),
        ];
        for (field, ranges) in fields {
            if !is_ordered_and_disjoint(ranges) {
                return Err(BreadcrumbsError::InvalidRanges { field });
            }
        }
        Ok(())
    }
}

fn is_ordered_and_disjoint(ranges: &[TextRange]) -> bool {
    ranges
        .windows(2)
        .all(|pair| pair[0].end() <= pair[1].offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_record_is_empty() {
        let crumbs = Breadcrumbs::new();
        assert_eq!(crumbs.exit_status, 0);
        assert!(crumbs.text_overflow_ranges.is_empty());
        assert!(crumbs.comment_line_ranges.is_empty());
        assert!(!crumbs.spell_checking);
    }

    #[test]
    fn validate_accepts_adjacent_ranges() {
        let crumbs = Breadcrumbs {
            comment_line_ranges: vec![TextRange::new(80, 12), TextRange::new(92, 5)],
            ..Breadcrumbs::default()
        };
        assert!(crumbs.validate().is_ok());
    }

    #[test]
    fn validate_rejects_overlap() {
        let crumbs = Breadcrumbs {
            text_overflow_ranges: vec![TextRange::new(0, 72), TextRange::new(70, 4)],
            ..Breadcrumbs::default()
        };
        let err = crumbs.validate().unwrap_err();
        assert!(matches!(
            err,
            BreadcrumbsError::InvalidRanges {
                field: "text_overflow_ranges"
            }
        ));
    }

    #[test]
    fn validate_rejects_unordered() {
        let crumbs = Breadcrumbs {
            diff_add_line_ranges: vec![TextRange::new(50, 1), TextRange::new(10, 1)],
            ..Breadcrumbs::default()
        };
        assert!(crumbs.validate().is_err());
    }

    #[test]
    fn missing_fields_default() {
        let json = r#"{"exit_status":1,"spell_checking":true}"#;
        let crumbs: Breadcrumbs = serde_json::from_str(json).unwrap();
        assert_eq!(crumbs.exit_status, 1);
        assert!(crumbs.spell_checking);
        assert!(crumbs.diff_remove_line_ranges.is_empty());
    }

    #[test]
    fn range_end_saturates() {
        assert_eq!(TextRange::new(usize::MAX, 10).end(), usize::MAX);
    }
}
