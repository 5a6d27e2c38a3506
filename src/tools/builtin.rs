//! Small built-in tools used by the CLI and tests

use eyre::{WrapErr, eyre};
use serde_json::{Value, json};

use super::ToolDefinition;

const DEFAULT_READ_LIMIT: usize = 2000;

async fn read_file(args: Value) -> eyre::Result<Value> {
    let path = args["path"].as_str().ok_or_else(|| eyre!("path is required"))?;
    let offset = args["offset"].as_u64().unwrap_or(1).max(1) as usize;
    let limit = args["limit"].as_u64().map(|l| l as usize).unwrap_or(DEFAULT_READ_LIMIT);

    let content = tokio::fs::read_to_string(path)
        .await
        .wrap_err_with(|| format!("Failed to read file '{}'", path))?;

    let numbered: Vec<String> = content
        .lines()
        .enumerate()
        .skip(offset - 1)
        .take(limit)
        .map(|(i, line)| format!("{:>6}|{}", i + 1, line))
        .collect();
    Ok(Value::String(numbered.join("\n")))
}

async fn list_directory(args: Value) -> eyre::Result<Value> {
    let path = args["path"].as_str().unwrap_or(".");
    let mut reader = tokio::fs::read_dir(path)
        .await
        .wrap_err_with(|| format!("Failed to list directory '{}'", path))?;

    let mut entries = Vec::new();
    while let Some(entry) = reader.next_entry().await? {
        let mut name = entry.file_name().to_string_lossy().into_owned();
        if entry.file_type().await?.is_dir() {
            name.push('/');
        }
        entries.push(name);
    }
    entries.sort();
    Ok(json!(entries))
}

async fn current_time(_args: Value) -> eyre::Result<Value> {
    Ok(Value::String(chrono::Utc::now().to_rfc3339()))
}

/// `read_file(path, offset?, limit?)`: file contents with line numbers
pub fn read_file_tool() -> ToolDefinition {
    ToolDefinition::from_fn(
        "read_file",
        "Read a text file and return its lines prefixed with line numbers.",
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Path of the file to read"},
                "offset": {"type": "integer", "description": "First line to return (1-indexed)"},
                "limit": {"type": "integer", "description": "Maximum number of lines"}
            },
            "required": ["path"]
        }),
        read_file,
    )
}

/// `list_directory(path?)`: sorted entry names, directories end with `/`
pub fn list_directory_tool() -> ToolDefinition {
    ToolDefinition::from_fn(
        "list_directory",
        "List the entries of a directory.",
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Directory to list (default: current directory)"}
            }
        }),
        list_directory,
    )
}

pub fn current_time_tool() -> ToolDefinition {
    ToolDefinition::from_fn(
        "current_time",
        "Return the current UTC time in RFC 3339 format.",
        json!({"type": "object", "properties": {}}),
        current_time,
    )
}
