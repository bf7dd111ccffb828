//! Text extraction from model responses and instructions

use calcpilot_core::CellRef;
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::OnceLock;

/// Opening fence of an operation block
pub const CODE_FENCE: &str = "```json";

/// Optional `<sheet>.` prefix, then column letters and row digits
const CELL_REF_PATTERN: &str = r"(?:[A-Za-z_][A-Za-z0-9_\s]*\.)?[A-Z]+\d+";

fn cell_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(CELL_REF_PATTERN).ok())
        .as_ref()
}

fn block_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(&format!(r"(?s){}[ \t]*\n(.*?)```", regex::escape(CODE_FENCE))).ok()
        })
        .as_ref()
}

/// Extract the operation block from a response
///
/// With a label, the first ```` ```json ```` block after the label is taken;
/// without one, the first block in the text. Returns an empty string when
/// there is no such block.
///
/// ```
/// use calcpilot_agent::extract_code_block;
///
/// let text = "Here you go:\n```json\n[]\n```";
/// assert_eq!(extract_code_block(text, None), "[]");
/// assert_eq!(extract_code_block(text, Some("- Revert ops:")), "");
/// ```
pub fn extract_code_block(text: &str, label: Option<&str>) -> String {
    let search = match label {
        Some(label) if !label.is_empty() => match text.find(label) {
            Some(start) => &text[start + label.len()..],
            None => return String::new(),
        },
        _ => text,
    };

    block_pattern()
        .and_then(|re| re.captures(search))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default()
}

/// Cell references mentioned in an instruction, deduplicated and sorted
///
/// Matches that do not form a valid reference (`ABCD1`, `A0`) are dropped.
/// Sheet prefixes are matched loosely, so prose before a `.` can end up in
/// the sheet name.
pub fn extract_cell_references(text: &str) -> Vec<CellRef> {
    let Some(pattern) = cell_pattern() else {
        return Vec::new();
    };

    pattern
        .find_iter(text)
        .filter_map(|m| m.as_str().trim().parse::<CellRef>().ok())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_block_without_label() {
        let text = "Plan:\n```json\n[{\"op\": \"clear\", \"cell\": \"A1\"}]\n```\nand\n```json\n[]\n```";
        assert_eq!(
            extract_code_block(text, None),
            "[{\"op\": \"clear\", \"cell\": \"A1\"}]"
        );
    }

    #[test]
    fn test_labeled_block() {
        let text = "- Status: FAILURE\n\
                    - Reason: wrong cell\n\
                    - Suggestion: use A1\n\
                    - Revert ops:\n\
                    ```json\n\
                    [{\"op\": \"clear\", \"cell\": \"B1\"}]\n\
                    ```\n";
        assert_eq!(
            extract_code_block(text, Some("- Revert ops:")),
            "[{\"op\": \"clear\", \"cell\": \"B1\"}]"
        );
    }

    #[test]
    fn test_label_skips_earlier_blocks() {
        let text = "```json\n[1]\n```\n- Revert ops: ```json\n[]\n```";
        assert_eq!(extract_code_block(text, Some("- Revert ops:")), "[]");
    }

    #[test]
    fn test_label_without_block_after_it() {
        let text = "```json\n[1]\n```\n- Revert ops: nothing to undo";
        assert_eq!(extract_code_block(text, Some("- Revert ops:")), "");

        // Only the first occurrence of the label counts
        let text = "- Revert ops: see below\nprose\n- Revert ops:\n```json\n[2]\n```";
        assert_eq!(extract_code_block(text, Some("- Revert ops:")), "[2]");
    }

    #[test]
    fn test_no_block_is_empty() {
        assert_eq!(extract_code_block("no code here", None), "");
        assert_eq!(extract_code_block("```python\nprint(1)\n```", None), "");
        assert_eq!(extract_code_block("```json\n[] never closed", None), "");
        assert_eq!(extract_code_block("```json\n[]\n```", Some("- Revert ops:")), "");
    }

    #[test]
    fn test_block_content_is_trimmed() {
        assert_eq!(extract_code_block("```json\n\n   []  \n\n```", None), "[]");
    }

    #[test]
    fn test_extract_cell_references() {
        let cells = extract_cell_references("Put 'Hello' in B2 and copy it to A1, then B2 again");
        assert_eq!(cells, vec![CellRef::active("A1"), CellRef::active("B2")]);
    }

    #[test]
    fn test_extract_sheet_qualified_reference() {
        let cells = extract_cell_references("Data.C3 should hold the total");
        assert_eq!(cells, vec![CellRef::on_sheet("Data", "C3")]);

        // Words before the sheet name are swallowed into it
        let cells = extract_cell_references("Set Data.C3 to 5");
        assert_eq!(cells, vec![CellRef::on_sheet("Set Data", "C3")]);
    }

    #[test]
    fn test_no_references() {
        assert!(extract_cell_references("make the header bold").is_empty());
        assert!(extract_cell_references("").is_empty());
    }
}
