//! Fixed mapping from agent tool names to command server commands.
//!
//! Each [`ToolDef`] names the command it becomes and how every parameter is
//! carried over. Parameters the table does not mention are not forwarded.
//! There is intentionally no tool for evaluating caller-supplied code.

use serde_json::{json, Map, Value};

use crate::models::command::Command;
use crate::{AppError, Result};

/// How one tool parameter is turned into a command parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamRule {
    /// Must be supplied by the agent.
    Required,
    /// Forwarded when supplied.
    Optional,
    /// Forwarded when supplied, otherwise set to the given string.
    Default(&'static str),
    /// Always set to the given string; agent input is ignored.
    Fixed(&'static str),
}

/// One parameter of a tool.
#[derive(Debug, Clone, Copy)]
pub struct ParamDef {
    /// Parameter name, identical on both sides of the mapping.
    pub name: &'static str,
    /// JSON schema type reported to the agent.
    pub kind: &'static str,
    /// Mapping rule.
    pub rule: ParamRule,
    /// Description reported to the agent.
    pub description: &'static str,
}

/// One tool exposed to the agent.
#[derive(Debug, Clone, Copy)]
pub struct ToolDef {
    /// Tool name used in `execute` requests.
    pub name: &'static str,
    /// Command sent to the command server.
    pub command: &'static str,
    /// Description reported to the agent.
    pub description: &'static str,
    /// Parameter mapping.
    pub params: &'static [ParamDef],
}

const fn param(name: &'static str, kind: &'static str, rule: ParamRule, description: &'static str) -> ParamDef {
    ParamDef {
        name,
        kind,
        rule,
        description,
    }
}

/// Every tool the relay serves.
pub const TOOLS: &[ToolDef] = &[
    ToolDef {
        name: "get_scene_info",
        command: "get_scene_info",
        description: "Get information about the current scene",
        params: &[],
    },
    ToolDef {
        name: "create_sphere",
        command: "create_geometry",
        description: "Create a sphere under /obj",
        params: &[
            param("geo_type", "string", ParamRule::Fixed("sphere"), "Geometry type"),
            param("parent_path", "string", ParamRule::Fixed("/obj"), "Parent network"),
            param("name", "string", ParamRule::Optional, "Optional name for the sphere"),
        ],
    },
    ToolDef {
        name: "create_geometry",
        command: "create_geometry",
        description: "Create a primitive geometry object",
        params: &[
            param("geo_type", "string", ParamRule::Default("box"), "Type of geometry to create"),
            param("parent_path", "string", ParamRule::Default("/obj"), "Parent network"),
            param("name", "string", ParamRule::Optional, "Optional node name"),
            param("position", "array", ParamRule::Optional, "World position [x, y, z]"),
            param("parameters", "object", ParamRule::Optional, "Additional node parameters"),
        ],
    },
    ToolDef {
        name: "create_node",
        command: "create_node",
        description: "Create a node of any type",
        params: &[
            param("node_type", "string", ParamRule::Required, "Node type name"),
            param("parent_path", "string", ParamRule::Default("/obj"), "Parent network"),
            param("name", "string", ParamRule::Optional, "Optional node name"),
        ],
    },
    ToolDef {
        name: "get_node_info",
        command: "get_node_info",
        description: "Describe a node and its parameters",
        params: &[param("path", "string", ParamRule::Required, "Absolute node path")],
    },
    ToolDef {
        name: "delete_node",
        command: "delete_node",
        description: "Delete a node and its children",
        params: &[param("path", "string", ParamRule::Required, "Absolute node path")],
    },
    ToolDef {
        name: "set_parameter",
        command: "set_parameter",
        description: "Set one parameter on a node",
        params: &[
            param("node_path", "string", ParamRule::Required, "Absolute node path"),
            param("parameter_name", "string", ParamRule::Required, "Parameter name"),
            param("value", "any", ParamRule::Required, "New value"),
        ],
    },
    ToolDef {
        name: "set_material",
        command: "set_material",
        description: "Create a material and assign it to a node",
        params: &[
            param("node_path", "string", ParamRule::Required, "Absolute node path"),
            param("material_type", "string", ParamRule::Default("principledshader"), "Material type"),
            param("material_name", "string", ParamRule::Optional, "Optional material name"),
            param("parameters", "object", ParamRule::Optional, "Material parameters"),
        ],
    },
    ToolDef {
        name: "save_hip",
        command: "save_hip",
        description: "Save the scene file",
        params: &[param("file_path", "string", ParamRule::Optional, "Target path; defaults to the current file")],
    },
    ToolDef {
        name: "load_hip",
        command: "load_hip",
        description: "Load a scene file",
        params: &[param("file_path", "string", ParamRule::Required, "Scene file to open")],
    },
    ToolDef {
        name: "render_scene",
        command: "render_scene",
        description: "Render the current frame",
        params: &[
            param("output_path", "string", ParamRule::Optional, "Image output path"),
            param("renderer", "string", ParamRule::Default("karma"), "Renderer name"),
            param("camera_path", "string", ParamRule::Optional, "Camera node path"),
            param("resolution", "array", ParamRule::Optional, "Resolution [width, height]"),
        ],
    },
];

/// Look up a tool by name.
#[must_use]
pub fn find(name: &str) -> Option<&'static ToolDef> {
    TOOLS.iter().find(|tool| tool.name == name)
}

/// Translate a tool call into a command.
///
/// # Errors
///
/// - `AppError::UnknownTool` if `tool` is not in [`TOOLS`].
/// - `AppError::InvalidParams` if a required parameter is missing or
///   `parameters` is not an object.
pub fn translate(tool: &str, parameters: &Value) -> Result<Command> {
    let def = find(tool).ok_or_else(|| AppError::UnknownTool(tool.to_owned()))?;

    let supplied = match parameters {
        Value::Object(map) => Some(map),
        Value::Null => None,
        _ => {
            return Err(AppError::InvalidParams(format!(
                "parameters for {tool} must be an object"
            )))
        }
    };

    let mut params = Map::new();
    for entry in def.params {
        let provided = supplied
            .and_then(|map| map.get(entry.name))
            .filter(|value| !value.is_null())
            .cloned();
        let value = match (entry.rule, provided) {
            (ParamRule::Fixed(fixed), _) => Some(Value::String(fixed.to_owned())),
            (ParamRule::Required, None) => {
                return Err(AppError::InvalidParams(format!(
                    "{tool} requires parameter `{}`",
                    entry.name
                )))
            }
            (ParamRule::Default(fallback), None) => Some(Value::String(fallback.to_owned())),
            (ParamRule::Optional, None) => None,
            (_, Some(value)) => Some(value),
        };
        if let Some(value) = value {
            params.insert(entry.name.to_owned(), value);
        }
    }

    Ok(Command::new(def.command, params))
}

/// Tool descriptions keyed by name, as reported in `initialize`.
#[must_use]
pub fn capabilities() -> Value {
    let tools: Map<String, Value> = TOOLS
        .iter()
        .map(|tool| (tool.name.to_owned(), describe(tool)))
        .collect();
    Value::Object(tools)
}

/// Tool list as reported by `tools/list`.
#[must_use]
pub fn list() -> Value {
    let tools: Vec<Value> = TOOLS
        .iter()
        .map(|tool| {
            let mut entry = describe(tool);
            entry["name"] = Value::String(tool.name.to_owned());
            entry
        })
        .collect();
    json!({ "tools": tools })
}

fn describe(tool: &ToolDef) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();

    for entry in tool.params {
        let mut schema = json!({ "description": entry.description });
        if entry.kind != "any" {
            schema["type"] = Value::String(entry.kind.to_owned());
        }
        match entry.rule {
            ParamRule::Fixed(_) => continue,
            ParamRule::Required => required.push(Value::String(entry.name.to_owned())),
            ParamRule::Default(fallback) => {
                schema["default"] = Value::String(fallback.to_owned());
            }
            ParamRule::Optional => {}
        }
        properties.insert(entry.name.to_owned(), schema);
    }

    json!({
        "description": tool.description,
        "parameters": {
            "type": "object",
            "properties": properties,
            "required": required,
        },
    })
}
