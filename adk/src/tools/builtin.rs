//! Builtin tool definitions seeded at registry construction.
//!
//! Inline-code payloads are Python sources exposing `execute(**args)`,
//! executed inside the sandbox image. Tools touching the filesystem or
//! network therefore inherit the sandbox's isolation rather than running
//! against the controller host.

use serde_json::json;

use super::{Execution, ToolDefinition};

/// Every builtin, in registration order.
pub(super) fn all() -> Vec<ToolDefinition> {
    vec![
        read_file(),
        write_file(),
        list_directory(),
        shell(),
        python_eval(),
        http_get(),
        search_files(),
        calculator(),
    ]
}

fn read_file() -> ToolDefinition {
    ToolDefinition {
        name: "read_file".into(),
        description: "Read the contents of a file".into(),
        parameters: json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file to read"
                }
            },
            "required": ["path"]
        }),
        execution: Execution::InlineCode(
            r#"
def execute(path: str) -> str:
    with open(path, 'r') as f:
        return f.read()
"#
            .into(),
        ),
        requires_network: false,
    }
}

fn write_file() -> ToolDefinition {
    ToolDefinition {
        name: "write_file".into(),
        description: "Write content to a file".into(),
        parameters: json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file to write"
                },
                "content": {
                    "type": "string",
                    "description": "Content to write"
                }
            },
            "required": ["path", "content"]
        }),
        execution: Execution::InlineCode(
            r#"
def execute(path: str, content: str) -> str:
    with open(path, 'w') as f:
        f.write(content)
    return f"Written {len(content)} bytes to {path}"
"#
            .into(),
        ),
        requires_network: false,
    }
}

fn list_directory() -> ToolDefinition {
    ToolDefinition {
        name: "list_directory".into(),
        description: "List files and directories in a path".into(),
        parameters: json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory path to list",
                    "default": "."
                }
            },
            "required": []
        }),
        execution: Execution::InlineCode(
            r#"
import os

def execute(path: str = ".") -> list:
    entries = []
    for entry in os.listdir(path):
        full_path = os.path.join(path, entry)
        entries.append({
            "name": entry,
            "type": "directory" if os.path.isdir(full_path) else "file",
            "size": os.path.getsize(full_path) if os.path.isfile(full_path) else None,
        })
    return entries
"#
            .into(),
        ),
        requires_network: false,
    }
}

fn shell() -> ToolDefinition {
    ToolDefinition {
        name: "shell".into(),
        description: "Execute a shell command. Use with caution.".into(),
        parameters: json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "Shell command to execute"
                }
            },
            "required": ["command"]
        }),
        execution: Execution::ShellTemplate("{command}".into()),
        requires_network: false,
    }
}

fn python_eval() -> ToolDefinition {
    ToolDefinition {
        name: "python_eval".into(),
        description: "Evaluate a Python expression and return the result".into(),
        parameters: json!({
            "type": "object",
            "properties": {
                "expression": {
                    "type": "string",
                    "description": "Python expression to evaluate"
                }
            },
            "required": ["expression"]
        }),
        execution: Execution::InlineCode(
            r#"
def execute(expression: str):
    return eval(expression)
"#
            .into(),
        ),
        requires_network: false,
    }
}

fn http_get() -> ToolDefinition {
    ToolDefinition {
        name: "http_get".into(),
        description: "Make an HTTP GET request".into(),
        parameters: json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "URL to request"
                }
            },
            "required": ["url"]
        }),
        execution: Execution::InlineCode(
            r#"
import urllib.request

def execute(url: str) -> str:
    with urllib.request.urlopen(url, timeout=30) as response:
        return response.read().decode('utf-8')
"#
            .into(),
        ),
        requires_network: true,
    }
}

fn search_files() -> ToolDefinition {
    ToolDefinition {
        name: "search_files".into(),
        description: "Search for a pattern in files".into(),
        parameters: json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Pattern to search for"
                },
                "path": {
                    "type": "string",
                    "description": "Directory to search in",
                    "default": "."
                },
                "file_pattern": {
                    "type": "string",
                    "description": "File pattern to match (e.g., '*.py')",
                    "default": "*"
                }
            },
            "required": ["pattern"]
        }),
        execution: Execution::InlineCode(
            r#"
import fnmatch
import os
import re

def execute(pattern: str, path: str = ".", file_pattern: str = "*") -> list:
    results = []
    regex = re.compile(pattern)
    for root, dirs, files in os.walk(path):
        for filename in files:
            if not fnmatch.fnmatch(filename, file_pattern):
                continue
            filepath = os.path.join(root, filename)
            try:
                with open(filepath, 'r') as f:
                    for i, line in enumerate(f, 1):
                        if regex.search(line):
                            results.append({
                                "file": filepath,
                                "line": i,
                                "content": line.strip(),
                            })
            except (IOError, UnicodeDecodeError):
                pass
    return results[:100]
"#
            .into(),
        ),
        requires_network: false,
    }
}

fn calculator() -> ToolDefinition {
    ToolDefinition {
        name: "calculator".into(),
        description: "Perform mathematical calculations".into(),
        parameters: json!({
            "type": "object",
            "properties": {
                "expression": {
                    "type": "string",
                    "description": "Mathematical expression (e.g., '2 + 2 * 3')"
                }
            },
            "required": ["expression"]
        }),
        execution: Execution::InlineCode(
            r#"
import math

def execute(expression: str) -> float:
    allowed = {
        "abs": abs, "round": round, "min": min, "max": max,
        "sum": sum, "pow": pow, "sqrt": math.sqrt,
        "sin": math.sin, "cos": math.cos, "tan": math.tan,
        "log": math.log, "log10": math.log10, "exp": math.exp,
        "pi": math.pi, "e": math.e,
    }
    return eval(expression, {"__builtins__": {}}, allowed)
"#
            .into(),
        ),
        requires_network: false,
    }
}
