//! 从 LLM 输出中提取 JSON 的策略链
//!
//! 模型经常在 JSON 外包一层 Markdown 或解释文字。按顺序尝试：
//! 1. 整段直接解析
//! 2. ```json 代码块
//! 3. 任意 ``` 代码块
//! 4. 文本中第一个花括号对象
//!
//! 每个策略是纯函数，首个成功者胜出；全部失败时由调用方走本地兜底。

use std::sync::OnceLock;

use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// 单个解析策略
#[derive(Clone, Copy)]
pub struct Strategy {
    pub name: &'static str,
    pub run: fn(&str) -> Option<Value>,
}

/// 策略链（顺序即优先级）
pub const STRATEGIES: [Strategy; 4] = [
    Strategy {
        name: "direct",
        run: direct,
    },
    Strategy {
        name: "json_fence",
        run: json_fence,
    },
    Strategy {
        name: "any_fence",
        run: any_fence,
    },
    Strategy {
        name: "first_object",
        run: first_object,
    },
];

static JSON_FENCE_RE: OnceLock<Regex> = OnceLock::new();
static ANY_FENCE_RE: OnceLock<Regex> = OnceLock::new();

fn parse_structured(s: &str) -> Option<Value> {
    let v: Value = serde_json::from_str(s.trim()).ok()?;
    // 只接受对象或数组，裸字符串/数字不算结构化输出
    if v.is_object() || v.is_array() {
        Some(v)
    } else {
        None
    }
}

/// 整段直接解析
pub fn direct(text: &str) -> Option<Value> {
    parse_structured(text)
}

/// ```json ... ``` 代码块
pub fn json_fence(text: &str) -> Option<Value> {
    let re = JSON_FENCE_RE
        .get_or_init(|| Regex::new(r"(?is)```\s*json\s*(.*?)```").expect("valid regex"));
    re.captures_iter(text)
        .find_map(|c| c.get(1).and_then(|m| parse_structured(m.as_str())))
}

/// 任意 ``` ... ``` 代码块（语言标记可有可无）
pub fn any_fence(text: &str) -> Option<Value> {
    let re = ANY_FENCE_RE
        .get_or_init(|| Regex::new(r"(?s)```[A-Za-z0-9_-]*\s*(.*?)```").expect("valid regex"));
    re.captures_iter(text)
        .find_map(|c| c.get(1).and_then(|m| parse_structured(m.as_str())))
}

/// 文本中第一个完整的花括号对象（跳过字符串中的括号）；配平失败时退回「首个 { 到最后一个 }」
pub fn first_object(text: &str) -> Option<Value> {
    let mut search_from = 0;
    while let Some(rel) = text[search_from..].find('{') {
        let start = search_from + rel;
        if let Some(end) = balanced_end(&text[start..]) {
            if let Some(v) = parse_structured(&text[start..start + end]) {
                return Some(v);
            }
        }
        search_from = start + 1;
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    parse_structured(&text[start..=end])
}

/// 返回与开头 '{' 配对的 '}' 之后的字节偏移
fn balanced_end(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// 依次尝试所有策略，返回首个成功的 JSON 与策略名
pub fn extract_json(text: &str) -> Option<(Value, &'static str)> {
    STRATEGIES
        .iter()
        .find_map(|s| (s.run)(text).map(|v| (v, s.name)))
}

/// 依次尝试所有策略，并要求结果能反序列化为 T
pub fn decode_with<T: DeserializeOwned>(text: &str) -> Option<(T, &'static str)> {
    STRATEGIES.iter().find_map(|s| {
        (s.run)(text)
            .and_then(|v| serde_json::from_value::<T>(v).ok())
            .map(|t| (t, s.name))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_accepts_object_and_array_only() {
        assert!(direct(r#"{"title": "a"}"#).is_some());
        assert!(direct(r#"[{"title": "a"}]"#).is_some());
        assert!(direct("\"just a string\"").is_none());
        assert!(direct("Sure! Here you go").is_none());
    }

    #[test]
    fn test_json_fence() {
        let text = "Here is the result:\n```json\n{\"title\": \"Buy milk\"}\n```\nThanks";
        assert_eq!(json_fence(text).unwrap()["title"], "Buy milk");
        assert!(direct(text).is_none());
    }

    #[test]
    fn test_any_fence_without_language_tag() {
        let text = "```\n{\"intent\": \"query\"}\n```";
        assert!(json_fence(text).is_none());
        assert_eq!(any_fence(text).unwrap()["intent"], "query");
    }

    #[test]
    fn test_first_object_skips_braces_in_strings() {
        let text = r#"Result -> {"title": "fix {weird} title", "intent": "new_task"} and {"x": 1}"#;
        let v = first_object(text).unwrap();
        assert_eq!(v["title"], "fix {weird} title");
    }

    #[test]
    fn test_first_object_skips_invalid_leading_braces() {
        let text = r#"use {braces} then {"ok": true}"#;
        assert_eq!(first_object(text).unwrap()["ok"], true);
    }

    #[test]
    fn test_chain_reports_winning_strategy() {
        let (_, name) = extract_json("prefix ```json\n{\"a\":1}\n```").unwrap();
        assert_eq!(name, "json_fence");
        let (_, name) = extract_json("noise {\"a\":1} noise").unwrap();
        assert_eq!(name, "first_object");
        assert!(extract_json("no json at all").is_none());
        assert!(extract_json("").is_none());
    }

    #[test]
    fn test_decode_with_typed_target() {
        #[derive(serde::Deserialize)]
        struct ActionOnly {
            action: String,
        }
        let (p, name) = decode_with::<ActionOnly>("```\n{\"action\": \"completed\"}\n```").unwrap();
        assert_eq!(p.action, "completed");
        assert_eq!(name, "any_fence");
        assert!(decode_with::<ActionOnly>("{\"other\": 1}").is_none());
    }
}
