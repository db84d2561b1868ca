//! 列表拆分：识别项目符号、编号或多行输入，每一项单独成为一条提取

use std::sync::OnceLock;

use regex::Regex;

static MARKER_RE: OnceLock<Regex> = OnceLock::new();

fn marker_re() -> &'static Regex {
    MARKER_RE.get_or_init(|| {
        Regex::new(r"^\s*(?:(?:[-*•·▪–]|\d{1,3}[.)]|[a-zA-Z][.)]|\[\s?[xX ]?\s?\])\s+|\d{1,3}、\s*)")
            .expect("valid regex")
    })
}

/// 去掉行首的列表标记
pub fn strip_marker(line: &str) -> &str {
    match marker_re().find(line) {
        Some(m) => line[m.end()..].trim(),
        None => line.trim(),
    }
}

/// 拆分列表项：
/// - 只要有任一行带列表标记，就只取带标记的行（标题行如「今天要做：」被忽略）
/// - 没有标记但有多行非空内容时，每行一项
/// - 否则整段作为单项
pub fn split_list_items(text: &str) -> Vec<String> {
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();

    let marked: Vec<String> = lines
        .iter()
        .filter(|l| marker_re().is_match(l))
        .map(|l| strip_marker(l).to_string())
        .filter(|l| !l.is_empty())
        .collect();
    if !marked.is_empty() {
        return marked;
    }
    if lines.len() > 1 {
        return lines.into_iter().map(String::from).collect();
    }
    let single = text.trim();
    if single.is_empty() {
        Vec::new()
    } else {
        vec![single.to_string()]
    }
}

/// 输入是否包含多个条目
pub fn is_multi_item(text: &str) -> bool {
    split_list_items(text).len() > 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bulleted_list_with_header() {
        let text = "Things for today:\n- Buy milk\n- Call mom\n* Book dentist";
        assert_eq!(
            split_list_items(text),
            vec!["Buy milk", "Call mom", "Book dentist"]
        );
    }

    #[test]
    fn test_numbered_list() {
        let text = "1. Draft report\n2) Review PR\n3、整理周报";
        assert_eq!(
            split_list_items(text),
            vec!["Draft report", "Review PR", "整理周报"]
        );
    }

    #[test]
    fn test_plain_lines_and_single_item() {
        assert_eq!(split_list_items("Buy milk\nCall mom"), vec!["Buy milk", "Call mom"]);
        assert_eq!(split_list_items("  Buy milk tomorrow "), vec!["Buy milk tomorrow"]);
        assert!(split_list_items("   ").is_empty());
        assert!(!is_multi_item("Buy milk tomorrow"));
    }

    #[test]
    fn test_negative_numbers_are_not_markers() {
        assert_eq!(strip_marker("-5 degrees outside"), "-5 degrees outside");
    }
}
