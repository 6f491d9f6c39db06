//! Best-effort extraction from tool call arguments.
//!
//! Pure functions that pull the touched file path or executed command out
//! of a tool's parameters. Tool names match case-insensitively; a tool or
//! argument shape we don't recognize simply yields `None`.

use serde_json::Value;

/// Tool names and the argument keys that may carry a file path, tried in
/// order.
const TOOL_PATH_ARGS: &[(&str, &[&str])] = &[
    ("read", &["file_path", "filePath", "path"]),
    ("write", &["file_path", "filePath", "path"]),
    ("edit", &["file_path", "filePath", "path"]),
    ("notebookedit", &["notebook_path", "notebookPath"]),
    ("grep", &["path"]),
    ("glob", &["path"]),
    ("search", &["path"]),
    ("find", &["path"]),
];

/// Shell-like tool names and the argument keys that carry the command.
const TOOL_EXEC_ARGS: &[(&str, &[&str])] = &[
    ("bash", &["command", "cmd"]),
    ("exec", &["command", "cmd"]),
    ("shell", &["command", "cmd", "script"]),
    ("run", &["command", "cmd"]),
];

/// File path touched by a tool call, if the tool is path-bearing.
pub fn extract_file_path(tool_name: &str, params: &Value) -> Option<String> {
    extract(TOOL_PATH_ARGS, tool_name, params)
}

/// Command executed by a shell-like tool call.
pub fn extract_exec_command(tool_name: &str, params: &Value) -> Option<String> {
    extract(TOOL_EXEC_ARGS, tool_name, params)
}

fn extract(table: &[(&str, &[&str])], tool_name: &str, params: &Value) -> Option<String> {
    let lowered = tool_name.to_ascii_lowercase();
    let (_, keys) = table.iter().find(|(name, _)| *name == lowered)?;
    keys.iter().find_map(|key| {
        params
            .get(*key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn read_tool_yields_file_path() {
        let params = json!({"file_path": "/project/src/main.rs"});
        assert_eq!(
            extract_file_path("Read", &params).as_deref(),
            Some("/project/src/main.rs")
        );
    }

    #[test]
    fn tool_name_match_is_case_insensitive() {
        let params = json!({"filePath": "/a/b.txt"});
        assert_eq!(extract_file_path("WRITE", &params).as_deref(), Some("/a/b.txt"));
        assert_eq!(extract_file_path("write", &params).as_deref(), Some("/a/b.txt"));
    }

    #[test]
    fn notebook_edit_uses_notebook_path() {
        let params = json!({"notebook_path": "/nb/analysis.ipynb"});
        assert_eq!(
            extract_file_path("NotebookEdit", &params).as_deref(),
            Some("/nb/analysis.ipynb")
        );
    }

    #[test]
    fn bash_tool_yields_command() {
        let params = json!({"command": "cargo fmt"});
        assert_eq!(
            extract_exec_command("Bash", &params).as_deref(),
            Some("cargo fmt")
        );
    }

    #[test]
    fn unknown_tool_yields_nothing() {
        let params = json!({"file_path": "/x", "command": "ls"});
        assert_eq!(extract_file_path("WebFetch", &params), None);
        assert_eq!(extract_exec_command("WebFetch", &params), None);
    }

    #[test]
    fn missing_or_empty_arguments_yield_nothing() {
        assert_eq!(extract_file_path("Read", &json!({})), None);
        assert_eq!(extract_file_path("Read", &json!({"file_path": ""})), None);
        assert_eq!(extract_exec_command("Bash", &json!({"command": 42})), None);
    }
}
