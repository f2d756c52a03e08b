use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::future::ready;
use std::pin::Pin;

use mcp_chat_model::{ModelTool, ToolCallRequest};

use super::{AnyTool, Error, Tool, ToolObject, ToolResult};

/// A set of tools with unique names, kept in registration order.
#[derive(Default)]
pub struct ToolSet {
    tools: Vec<Box<dyn ToolObject>>,
    by_name: HashMap<String, usize>,
}

impl ToolSet {
    /// Creates an empty set.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a tool.
    ///
    /// Returns `false` and drops the tool if one with the same name is
    /// already registered; the first registration wins.
    pub fn add<T: Tool>(&mut self, tool: T) -> bool {
        self.add_object(Box::new(AnyTool(tool)))
    }

    /// Adds a tool, builder style. See [`ToolSet::add`].
    #[inline]
    pub fn with_tool<T: Tool>(mut self, tool: T) -> Self {
        self.add(tool);
        self
    }

    /// Moves every tool of `other` into this set, keeping existing tools
    /// on name clashes.
    pub fn merge(&mut self, other: ToolSet) {
        for tool in other.tools {
            self.add_object(tool);
        }
    }

    fn add_object(&mut self, tool: Box<dyn ToolObject>) -> bool {
        let name = tool.name().to_owned();
        if self.by_name.contains_key(&name) {
            warn!("duplicated tool `{name}`, keeping the first one");
            return false;
        }
        self.by_name.insert(name, self.tools.len());
        self.tools.push(tool);
        true
    }

    /// Returns the number of tools.
    #[inline]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Returns `true` if the set has no tools.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Returns the tool names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.iter().map(|tool| tool.name())
    }

    /// Returns the definitions sent to the model.
    #[inline]
    pub fn definitions(&self) -> Vec<ModelTool> {
        self.tools.iter().map(|tool| tool.definition()).collect()
    }

    /// Starts executing a tool call request.
    ///
    /// An unknown tool name resolves to a `NotFound` error.
    pub fn execute(
        &self,
        req: ToolCallRequest,
    ) -> Pin<Box<dyn Future<Output = ToolResult> + Send>> {
        let Some(&idx) = self.by_name.get(&req.name) else {
            warn!("tool not found: {}", req.name);
            let reason = format!("no tool named `{}`", req.name);
            return Box::pin(ready(Err(Error::not_found().with_reason(reason))));
        };
        trace!(
            "calling tool {} ({}) with {:?}",
            req.name, req.id, req.arguments
        );
        self.tools[idx].execute(req.arguments)
    }
}

impl Debug for ToolSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_json::{Value, json};

    use super::*;
    use crate::tool::ErrorKind;

    struct Echo {
        name: &'static str,
        schema: Value,
    }

    #[derive(Deserialize)]
    struct EchoInput {
        text: String,
    }

    impl Tool for Echo {
        type Input = EchoInput;

        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            "Echoes the text back."
        }

        fn parameter_schema(&self) -> &Value {
            &self.schema
        }

        fn execute(
            &self,
            input: Self::Input,
        ) -> impl Future<Output = ToolResult> + Send + 'static {
            ready(Ok(input.text))
        }
    }

    fn echo(name: &'static str) -> Echo {
        Echo {
            name,
            schema: json!({ "type": "object" }),
        }
    }

    fn request(name: &str, arguments: Value) -> ToolCallRequest {
        ToolCallRequest {
            id: "call_1".to_owned(),
            name: name.to_owned(),
            arguments,
        }
    }

    #[test]
    fn test_first_registration_wins() {
        let mut set = ToolSet::new().with_tool(echo("echo"));
        assert!(!set.add(echo("echo")));
        assert!(set.add(echo("shout")));

        let mut other = ToolSet::new().with_tool(echo("shout"));
        other.add(echo("whisper"));
        set.merge(other);

        let names: Vec<_> = set.names().collect();
        assert_eq!(names, ["echo", "shout", "whisper"]);
        assert_eq!(set.definitions()[0].description, "Echoes the text back.");
    }

    #[tokio::test]
    async fn test_execute() {
        let set = ToolSet::new().with_tool(echo("echo"));

        let out = set.execute(request("echo", json!({ "text": "hey" }))).await;
        assert_eq!(out.unwrap(), "hey");

        let err = set.execute(request("echo", json!({}))).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        let err = set.execute(request("nope", json!({}))).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(err.reason().contains("nope"));
    }
}
