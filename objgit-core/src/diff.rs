use crate::models::{ChangeType, ObjectChange};
use similar::{ChangeTag, TextDiff};

/// Line diff of one object's payload across a commit.
#[derive(Debug, Clone)]
pub struct PayloadDiff {
    pub id: String,
    pub change_type: ChangeType,
    pub old_payload: Option<String>,
    pub new_payload: Option<String>,
    pub diff_lines: Vec<DiffLine>,
}

#[derive(Debug, Clone)]
pub struct DiffLine {
    pub line_type: DiffLineType,
    pub content: String,
    pub old_line_number: Option<usize>,
    pub new_line_number: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffLineType {
    Context,
    Addition,
    Deletion,
}

impl PayloadDiff {
    /// `previous` is the object's payload at the commit's parent, if it existed.
    pub fn from_change(change: &ObjectChange, previous: Option<&str>) -> Self {
        let (old_payload, new_payload) = match change.change_type {
            ChangeType::Added | ChangeType::Modified => (
                previous.map(str::to_string),
                Some(change.serialized_payload.clone()),
            ),
            // The tombstone is the best record of what was removed.
            ChangeType::Deleted => (
                Some(
                    previous
                        .map(str::to_string)
                        .unwrap_or_else(|| change.serialized_payload.clone()),
                ),
                None,
            ),
        };

        let diff_lines = Self::compute_diff(
            old_payload.as_deref().unwrap_or(""),
            new_payload.as_deref().unwrap_or(""),
        );

        PayloadDiff {
            id: change.id.clone(),
            change_type: change.change_type,
            old_payload,
            new_payload,
            diff_lines,
        }
    }

    fn compute_diff(old_text: &str, new_text: &str) -> Vec<DiffLine> {
        let diff = TextDiff::from_lines(old_text, new_text);
        let mut lines = Vec::new();
        let mut old_line_num = 1;
        let mut new_line_num = 1;

        for change in diff.iter_all_changes() {
            let (line_type, old_num, new_num) = match change.tag() {
                ChangeTag::Delete => {
                    let num = old_line_num;
                    old_line_num += 1;
                    (DiffLineType::Deletion, Some(num), None)
                }
                ChangeTag::Insert => {
                    let num = new_line_num;
                    new_line_num += 1;
                    (DiffLineType::Addition, None, Some(num))
                }
                ChangeTag::Equal => {
                    let old_num = old_line_num;
                    let new_num = new_line_num;
                    old_line_num += 1;
                    new_line_num += 1;
                    (DiffLineType::Context, Some(old_num), Some(new_num))
                }
            };

            lines.push(DiffLine {
                line_type,
                content: change.to_string(),
                old_line_number: old_num,
                new_line_number: new_num,
            });
        }

        lines
    }

    pub fn is_unchanged(&self) -> bool {
        self.diff_lines
            .iter()
            .all(|l| l.line_type == DiffLineType::Context)
    }

    pub fn additions(&self) -> usize {
        self.count(DiffLineType::Addition)
    }

    pub fn deletions(&self) -> usize {
        self.count(DiffLineType::Deletion)
    }

    fn count(&self, line_type: DiffLineType) -> usize {
        self.diff_lines
            .iter()
            .filter(|l| l.line_type == line_type)
            .count()
    }

    pub fn format_unified(&self, context_lines: usize) -> String {
        let old = self.old_payload.as_deref().unwrap_or("");
        let new = self.new_payload.as_deref().unwrap_or("");
        let old_header = if self.old_payload.is_some() {
            format!("a/{}", self.id)
        } else {
            "/dev/null".to_string()
        };
        let new_header = if self.new_payload.is_some() {
            format!("b/{}", self.id)
        } else {
            "/dev/null".to_string()
        };

        TextDiff::from_lines(old, new)
            .unified_diff()
            .context_radius(context_lines)
            .header(&old_header, &new_header)
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use similar_asserts::assert_eq;

    #[test]
    fn test_diff_computation() {
        let old_text = "line 1\nline 2\nline 3\n";
        let new_text = "line 1\nline 2 modified\nline 3\nline 4\n";

        let diff_lines = PayloadDiff::compute_diff(old_text, new_text);

        assert!(diff_lines
            .iter()
            .any(|l| l.line_type == DiffLineType::Addition));
        assert!(diff_lines
            .iter()
            .any(|l| l.line_type == DiffLineType::Deletion));
        assert_eq!(diff_lines[0].old_line_number, Some(1));
        assert_eq!(diff_lines[0].new_line_number, Some(1));
    }

    #[test]
    fn test_modified_payload_diff() {
        let change = ObjectChange::modified("beam", "{\n  \"length\": 12\n}\n");
        let diff = PayloadDiff::from_change(&change, Some("{\n  \"length\": 10\n}\n"));

        assert_eq!(diff.additions(), 1);
        assert_eq!(diff.deletions(), 1);
        assert!(!diff.is_unchanged());

        let expected = "\
--- a/beam
+++ b/beam
@@ -1,3 +1,3 @@
 {
-  \"length\": 10
+  \"length\": 12
 }
";
        assert_eq!(diff.format_unified(3), expected);
    }

    #[test]
    fn test_added_payload_is_all_additions() {
        let change = ObjectChange::added("column", "a\nb\n");
        let diff = PayloadDiff::from_change(&change, None);

        assert!(diff.old_payload.is_none());
        assert_eq!(diff.additions(), 2);
        assert_eq!(diff.deletions(), 0);
        assert!(diff.format_unified(3).starts_with("--- /dev/null\n+++ b/column\n"));
    }

    #[test]
    fn test_deleted_payload_uses_tombstone() {
        let change = ObjectChange::deleted("slab", "x\ny\n");
        let diff = PayloadDiff::from_change(&change, None);

        assert_eq!(diff.old_payload.as_deref(), Some("x\ny\n"));
        assert!(diff.new_payload.is_none());
        assert_eq!(diff.deletions(), 2);
    }

    #[test]
    fn test_identical_payload_is_unchanged() {
        let change = ObjectChange::modified("a", "same\n");
        let diff = PayloadDiff::from_change(&change, Some("same\n"));
        assert!(diff.is_unchanged());
        assert_eq!(diff.format_unified(3), "");
    }
}
