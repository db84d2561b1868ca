//! 工具声明生成（schemars 从参数结构体自动生成 JSON Schema）
//!
//! 声明与 TaskToolCall 使用同一组参数类型，schema 与实际解析永远一致。

use schemars::{schema_for, JsonSchema};
use serde_json::Value;

use crate::llm::ToolDeclaration;
use crate::tools::call::{
    AddTaskNoteArgs, ArchiveTasksArgs, CreateTaskArgs, SearchTasksArgs, UpdateTaskStatusArgs,
    ADD_TASK_NOTE, ARCHIVE_TASKS, CREATE_TASK, SEARCH_TASKS, UPDATE_TASK_STATUS,
};

/// 参数结构体 -> 函数参数 schema（去掉 $schema / title，函数调用接口不需要）
fn parameters_schema<T: JsonSchema>() -> Value {
    let schema = schema_for!(T);
    let mut value = serde_json::to_value(&schema).unwrap_or_else(|_| {
        serde_json::json!({ "type": "object", "properties": {} })
    });
    if let Some(obj) = value.as_object_mut() {
        obj.remove("$schema");
        obj.remove("title");
    }
    value
}

fn declaration<T: JsonSchema>(name: &str, description: &str) -> ToolDeclaration {
    ToolDeclaration {
        name: name.to_string(),
        description: description.to_string(),
        parameters: parameters_schema::<T>(),
    }
}

/// 五个任务工具的声明
pub fn tool_declarations() -> Vec<ToolDeclaration> {
    vec![
        declaration::<SearchTasksArgs>(
            SEARCH_TASKS,
            "Search tasks by title or assignee. Use query \"all\" to list every open task.",
        ),
        declaration::<CreateTaskArgs>(
            CREATE_TASK,
            "Create one task. Returns its id and url.",
        ),
        declaration::<UpdateTaskStatusArgs>(
            UPDATE_TASK_STATUS,
            "Set a task's status to Todo, In Progress or Done.",
        ),
        declaration::<ArchiveTasksArgs>(
            ARCHIVE_TASKS,
            "Find every open task matching searchTerm and archive (soft-delete) them all. Returns the archived count.",
        ),
        declaration::<AddTaskNoteArgs>(
            ADD_TASK_NOTE,
            "Append a note to a task.",
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declarations_cover_all_tools() {
        let decls = tool_declarations();
        let names: Vec<_> = decls.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(
            names,
            vec![SEARCH_TASKS, CREATE_TASK, UPDATE_TASK_STATUS, ARCHIVE_TASKS, ADD_TASK_NOTE]
        );
    }

    #[test]
    fn test_schema_uses_wire_field_names() {
        let decls = tool_declarations();
        let create = decls.iter().find(|d| d.name == CREATE_TASK).unwrap();
        assert!(create.parameters.get("$schema").is_none());
        assert!(create.parameters["properties"].get("dueDate").is_some());
        let required = create.parameters["required"].as_array().unwrap();
        assert!(required.iter().any(|r| r == "title"));

        let archive = decls.iter().find(|d| d.name == ARCHIVE_TASKS).unwrap();
        assert!(archive.parameters["properties"].get("searchTerm").is_some());
    }
}
