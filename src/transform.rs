use crate::diff::DiffReporter;
use crate::location::Location;
use crate::patches::SkipReason;

/// A fully resolved replacement against one source snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edit {
    pub start: usize,
    pub end: usize,
    pub new_content: String,
}

impl Edit {
    pub fn new(start: usize, end: usize, new_content: impl Into<String>) -> Self {
        Self {
            start,
            end,
            new_content: new_content.into(),
        }
    }

    pub fn replace(location: &Location, new_content: impl Into<String>) -> Self {
        Self::new(location.start, location.end, new_content)
    }

    pub fn insert(at: usize, new_content: impl Into<String>) -> Self {
        Self::new(at, at, new_content)
    }

    pub fn delete(location: &Location) -> Self {
        Self::new(location.start, location.end, String::new())
    }

    fn fits(&self, source: &str) -> bool {
        self.start <= self.end
            && self.end <= source.len()
            && source.is_char_boundary(self.start)
            && source.is_char_boundary(self.end)
    }
}

/// Replaces `[start, end)` of `source` with `new_content`.
pub fn replace_span(
    source: &str,
    edit: &Edit,
    reporter: &DiffReporter,
) -> Result<String, SkipReason> {
    if !edit.fits(source) {
        return Err(SkipReason::InvalidSpan {
            start: edit.start,
            end: edit.end,
        });
    }
    let mut out = String::with_capacity(source.len() + edit.new_content.len());
    out.push_str(&source[..edit.start]);
    out.push_str(&edit.new_content);
    out.push_str(&source[edit.end..]);
    reporter.show(source, &out, &edit.new_content, edit.start, edit.end);
    Ok(out)
}

/// Applies edits computed against the same snapshot. Edits run in descending
/// `start` order so no edit sees offsets shifted by another; overlapping edits
/// are rejected.
pub fn apply_edits(
    source: &str,
    mut edits: Vec<Edit>,
    reporter: &DiffReporter,
) -> Result<String, SkipReason> {
    edits.sort_by(|a, b| b.start.cmp(&a.start).then(b.end.cmp(&a.end)));

    let mut upper = source.len();
    for edit in &edits {
        if !edit.fits(source) || edit.end > upper {
            return Err(SkipReason::InvalidSpan {
                start: edit.start,
                end: edit.end,
            });
        }
        upper = edit.start;
    }

    let mut current = source.to_string();
    for edit in &edits {
        current = replace_span(&current, edit, reporter)?;
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replace_span_swaps_region() {
        let out = replace_span("return 200000}", &Edit::new(7, 13, "1e6"), &DiffReporter::default())
            .expect("replaced");
        assert_eq!(out, "return 1e6}");
    }

    #[test]
    fn insertion_keeps_surrounding_text() {
        let out = replace_span("{return 1}", &Edit::insert(1, "x();"), &DiffReporter::default())
            .expect("inserted");
        assert_eq!(out, "{x();return 1}");
    }

    #[test]
    fn edits_apply_in_descending_order_regardless_of_input_order() {
        let source = "a=[1];b=[2];c=[3]";
        let edits = vec![
            Edit::new(2, 5, "[10,11,12]"),
            Edit::new(14, 17, "[]"),
            Edit::new(8, 11, "[20]"),
        ];
        let out = apply_edits(source, edits, &DiffReporter::default()).expect("applied");
        assert_eq!(out, "a=[10,11,12];b=[20];c=[]");
    }

    #[test]
    fn overlapping_edits_are_rejected() {
        let edits = vec![Edit::new(0, 4, "x"), Edit::new(2, 6, "y")];
        let err = apply_edits("abcdefgh", edits, &DiffReporter::default()).unwrap_err();
        assert!(matches!(err, SkipReason::InvalidSpan { .. }));
    }

    #[test]
    fn insertion_and_replacement_at_same_offset_both_land() {
        let edits = vec![Edit::new(2, 4, "XY"), Edit::insert(2, ">")];
        let out = apply_edits("abcdef", edits, &DiffReporter::default()).expect("applied");
        assert_eq!(out, "ab>XYef");
    }

    #[test]
    fn out_of_bounds_edit_is_rejected() {
        let err = replace_span("abc", &Edit::new(1, 9, ""), &DiffReporter::default()).unwrap_err();
        assert_eq!(err, SkipReason::InvalidSpan { start: 1, end: 9 });
    }
}
