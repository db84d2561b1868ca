//! 结构化解析层：提取类型、JSON 策略链、相对日期、列表拆分、解析器

pub mod dates;
pub mod extraction;
pub mod extractor;
pub mod list_items;
pub mod strategies;

pub use dates::{normalize_due_date, resolve_relative_date};
pub use extraction::{Intent, RawExtraction, ThoughtExtraction};
pub use extractor::{ParseOutcome, StructuredParser};
pub use list_items::{is_multi_item, split_list_items};
pub use strategies::{decode_with, extract_json};
