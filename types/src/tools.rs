/// A capability the model may invoke during the session. Only function
/// tools exist on this wire protocol today.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type")]
pub enum Tool {
    #[serde(rename = "function")]
    Function(FunctionTool),
}

impl Tool {
    pub fn name(&self) -> &str {
        match self {
            Tool::Function(f) => f.name(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FunctionTool {
    /// The name of the function
    name: String,

    /// The description of the function
    description: String,

    /// The parameters of the function in JSON Schema format
    parameters: serde_json::Value,
}

impl FunctionTool {
    pub fn new(name: &str, description: &str, parameters: serde_json::Value) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn parameters(&self) -> &serde_json::Value {
        &self.parameters
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_function_tool_wire_shape() {
        let tool = Tool::Function(FunctionTool::new(
            "set-humor-level",
            "Adjusts the assistant humor level between 0-100.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "level": { "type": "string", "description": "0 to 100" }
                },
                "required": ["level"]
            }),
        ));
        let json = serde_json::to_value(&tool).unwrap();
        assert_eq!(json["type"], "function");
        assert_eq!(json["name"], "set-humor-level");
        assert_eq!(json["parameters"]["required"][0], "level");
    }
}
