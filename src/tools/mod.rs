//! Diagnostic tools the model may call while working out a plan.
//!
//! Handlers take a typed argument struct. The registry deserializes the model's
//! argument object into that struct before the handler runs, so a malformed call
//! never reaches tool code.

mod docs;
mod system;

use crate::error::ToolError;
use crate::models::ToolDefinition;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;

type Handler = Box<dyn Fn(&Value) -> Result<Value, ToolError>>;

struct RegisteredTool {
    definition: ToolDefinition,
    handler: Handler,
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` under `name`. Arguments are validated against `A`.
    pub fn register<A, F>(&mut self, name: &str, description: &str, parameters: Value, handler: F)
    where
        A: DeserializeOwned,
        F: Fn(A) -> Result<Value, ToolError> + 'static,
    {
        let tool_name = name.to_string();
        let typed: Handler = Box::new(move |args: &Value| {
            let parsed = A::deserialize(args).map_err(|e| ToolError::InvalidArguments {
                tool: tool_name.clone(),
                message: e.to_string(),
            })?;
            handler(parsed)
        });
        self.tools.insert(
            name.to_string(),
            RegisteredTool {
                definition: ToolDefinition {
                    name: name.to_string(),
                    description: description.to_string(),
                    parameters,
                },
                handler: typed,
            },
        );
    }

    /// Runs the named tool. `None` when no such tool is registered.
    pub fn call(&self, name: &str, args: &Value) -> Option<Result<Value, ToolError>> {
        self.tools.get(name).map(|tool| (tool.handler)(args))
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.definition.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// The eight diagnostic tools advertised to the model.
    pub fn builtin() -> Self {
        let mut registry = Self::new();

        registry.register(
            "get_man_page",
            "Fetch the man page documentation for a Linux command. Use this to understand command syntax and options.",
            object_schema(
                json!({"command": {"type": "string", "description": "The command name (e.g., 'grep', 'find', 'systemctl')"}}),
                &["command"],
            ),
            |args: CommandArgs| docs::get_man_page(&args.command),
        );
        registry.register(
            "get_command_help",
            "Get the --help output for a command. Faster alternative to man pages.",
            object_schema(
                json!({"command": {"type": "string", "description": "The command name"}}),
                &["command"],
            ),
            |args: CommandArgs| docs::get_command_help(&args.command),
        );
        registry.register(
            "get_file_tree",
            "Get the directory structure of a path to understand what files/folders exist.",
            object_schema(
                json!({
                    "path": {"type": "string", "description": "Directory path to explore"},
                    "max_depth": {"type": "integer", "description": "Maximum depth to traverse (default: 3)"}
                }),
                &["path"],
            ),
            |args: FileTreeArgs| system::get_file_tree(&args.path, args.max_depth),
        );
        registry.register(
            "check_file_exists",
            "Check if a file or directory exists before operating on it.",
            object_schema(
                json!({"path": {"type": "string", "description": "File or directory path"}}),
                &["path"],
            ),
            |args: PathArgs| system::check_file_exists(&args.path),
        );
        registry.register(
            "read_config_file",
            "Read contents of a configuration file to understand current settings.",
            object_schema(
                json!({
                    "path": {"type": "string", "description": "Path to config file"},
                    "max_lines": {"type": "integer", "description": "Maximum lines to read (default: 100)"}
                }),
                &["path"],
            ),
            |args: ReadConfigArgs| system::read_config_file(&args.path, args.max_lines),
        );
        registry.register(
            "check_port_in_use",
            "Check if a network port is already in use to avoid conflicts.",
            object_schema(
                json!({"port": {"type": "integer", "description": "Port number to check"}}),
                &["port"],
            ),
            |args: PortArgs| Ok(system::check_port_in_use(args.port)),
        );
        registry.register(
            "get_disk_space",
            "Get available disk space for a path.",
            object_schema(
                json!({"path": {"type": "string", "description": "Path to check (default: '/')"}}),
                &[],
            ),
            |args: DiskArgs| system::get_disk_space(&args.path),
        );
        registry.register(
            "check_write_permission",
            "Check if the current user has write permission to a path.",
            object_schema(
                json!({"path": {"type": "string", "description": "Path to check"}}),
                &["path"],
            ),
            |args: PathArgs| system::check_write_permission(&args.path),
        );

        registry
    }
}

fn object_schema(properties: Value, required: &[&str]) -> Value {
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

#[derive(Deserialize)]
struct CommandArgs {
    command: String,
}

#[derive(Deserialize)]
struct PathArgs {
    path: String,
}

#[derive(Deserialize)]
struct FileTreeArgs {
    path: String,
    #[serde(default = "default_depth")]
    max_depth: usize,
}

#[derive(Deserialize)]
struct ReadConfigArgs {
    path: String,
    #[serde(default = "default_max_lines")]
    max_lines: usize,
}

#[derive(Deserialize)]
struct PortArgs {
    port: u16,
}

#[derive(Deserialize)]
struct DiskArgs {
    #[serde(default = "default_disk_path")]
    path: String,
}

fn default_depth() -> usize {
    3
}

fn default_max_lines() -> usize {
    100
}

fn default_disk_path() -> String {
    "/".to_string()
}
