use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use voicebridge_types::tools::{FunctionTool, Tool};

/// Async callback that executes one registered tool. It receives the
/// parsed arguments object and resolves to a JSON result or a
/// human-readable failure message.
pub type ToolHandler =
    Arc<dyn Fn(serde_json::Value) -> BoxFuture<'static, Result<serde_json::Value, String>> + Send + Sync>;

/// A function call the assistant asked us to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub call_id: String,
    pub name: String,
    pub arguments: String,
}

/// Result of one tool execution, keyed back to its call id.
#[derive(Debug)]
pub(crate) struct ToolOutcome {
    pub call_id: String,
    pub result: Result<serde_json::Value, String>,
}

/// Tools the application exposes to the assistant, registered before the
/// session starts and advertised in the session configuration.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Mutex<HashMap<String, (FunctionTool, ToolHandler)>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F, Fut>(&self, tool: FunctionTool, handler: F)
    where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<serde_json::Value, String>> + Send + 'static,
    {
        let handler: ToolHandler = Arc::new(move |args| {
            Box::pin(handler(args)) as BoxFuture<'static, Result<serde_json::Value, String>>
        });
        let name = tool.name().to_string();
        let mut tools = self.tools.lock().unwrap();
        if tools.insert(name.clone(), (tool, handler)).is_some() {
            tracing::warn!(tool = %name, "replacing previously registered tool");
        }
    }

    /// Snapshot of the registered tools in wire form.
    pub fn catalog(&self) -> Vec<Tool> {
        self.tools
            .lock()
            .unwrap()
            .values()
            .map(|(tool, _)| Tool::Function(tool.clone()))
            .collect()
    }

    pub fn handler(&self, name: &str) -> Option<ToolHandler> {
        self.tools
            .lock()
            .unwrap()
            .get(name)
            .map(|(_, handler)| handler.clone())
    }

    pub fn is_empty(&self) -> bool {
        self.tools.lock().unwrap().is_empty()
    }
}

/// Runs tool invocations concurrently and funnels their outcomes back to
/// the engine loop. At most one execution per call id is in flight.
pub(crate) struct ToolBridge {
    registry: Arc<ToolRegistry>,
    in_flight: HashMap<String, JoinHandle<()>>,
    outcomes: mpsc::Sender<ToolOutcome>,
}

impl ToolBridge {
    pub(crate) fn new(registry: Arc<ToolRegistry>, outcomes: mpsc::Sender<ToolOutcome>) -> Self {
        Self {
            registry,
            in_flight: HashMap::new(),
            outcomes,
        }
    }

    pub(crate) fn dispatch(&mut self, invocation: ToolInvocation) {
        if self.in_flight.contains_key(&invocation.call_id) {
            tracing::warn!(call_id = %invocation.call_id, "duplicate function call, ignoring");
            return;
        }

        let ToolInvocation {
            call_id,
            name,
            arguments,
        } = invocation;

        let args: serde_json::Value = if arguments.trim().is_empty() {
            serde_json::json!({})
        } else {
            match serde_json::from_str(&arguments) {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(call_id = %call_id, tool = %name, "malformed tool arguments: {e}");
                    self.send_outcome(ToolOutcome {
                        call_id,
                        result: Err(format!("malformed arguments: {e}")),
                    });
                    return;
                }
            }
        };

        let Some(handler) = self.registry.handler(&name) else {
            tracing::warn!(call_id = %call_id, tool = %name, "no handler registered");
            self.send_outcome(ToolOutcome {
                call_id,
                result: Err(format!("unknown tool: {name}")),
            });
            return;
        };

        tracing::debug!(call_id = %call_id, tool = %name, "executing tool");
        let outcomes = self.outcomes.clone();
        let id = call_id.clone();
        let task = tokio::spawn(async move {
            let result = handler(args).await;
            let _ = outcomes
                .send(ToolOutcome {
                    call_id: id,
                    result,
                })
                .await;
        });
        self.in_flight.insert(call_id, task);
    }

    /// Marks a call id as settled once its outcome has been relayed.
    pub(crate) fn complete(&mut self, call_id: &str) {
        self.in_flight.remove(call_id);
    }

    pub(crate) fn abort_all(&mut self) {
        for (_, task) in self.in_flight.drain() {
            task.abort();
        }
    }

    fn send_outcome(&self, outcome: ToolOutcome) {
        let outcomes = self.outcomes.clone();
        tokio::spawn(async move {
            let _ = outcomes.send(outcome).await;
        });
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn lookup_tool() -> FunctionTool {
        FunctionTool::new(
            "lookup",
            "Looks something up",
            serde_json::json!({"type": "object", "properties": {}}),
        )
    }

    #[test]
    fn catalog_reflects_registrations() {
        let registry = ToolRegistry::new();
        assert!(registry.is_empty());
        registry.register(lookup_tool(), |_| async { Ok(serde_json::json!({})) });
        let catalog = registry.catalog();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog[0].name(), "lookup");
    }

    #[tokio::test]
    async fn dispatch_relays_successful_result() {
        let registry = Arc::new(ToolRegistry::new());
        registry.register(lookup_tool(), |args| async move {
            assert_eq!(args["level"], "50");
            Ok(serde_json::json!({"ok": true}))
        });
        let (tx, mut rx) = mpsc::channel(4);
        let mut bridge = ToolBridge::new(registry, tx);
        bridge.dispatch(ToolInvocation {
            call_id: "call-1".to_string(),
            name: "lookup".to_string(),
            arguments: "{\"level\":\"50\"}".to_string(),
        });
        let outcome = rx.recv().await.unwrap();
        assert_eq!(outcome.call_id, "call-1");
        assert_eq!(outcome.result.unwrap(), serde_json::json!({"ok": true}));
    }

    #[tokio::test]
    async fn dispatch_relays_handler_failure() {
        let registry = Arc::new(ToolRegistry::new());
        registry.register(lookup_tool(), |_| async { Err("boom".to_string()) });
        let (tx, mut rx) = mpsc::channel(4);
        let mut bridge = ToolBridge::new(registry, tx);
        bridge.dispatch(ToolInvocation {
            call_id: "call-2".to_string(),
            name: "lookup".to_string(),
            arguments: String::new(),
        });
        let outcome = rx.recv().await.unwrap();
        assert_eq!(outcome.result.unwrap_err(), "boom");
    }

    #[tokio::test]
    async fn unknown_tool_reports_error_outcome() {
        let registry = Arc::new(ToolRegistry::new());
        let (tx, mut rx) = mpsc::channel(4);
        let mut bridge = ToolBridge::new(registry, tx);
        bridge.dispatch(ToolInvocation {
            call_id: "call-3".to_string(),
            name: "missing".to_string(),
            arguments: "{}".to_string(),
        });
        let outcome = rx.recv().await.unwrap();
        assert!(outcome.result.unwrap_err().contains("unknown tool"));
    }

    #[tokio::test]
    async fn duplicate_call_id_is_ignored_while_in_flight() {
        let registry = Arc::new(ToolRegistry::new());
        registry.register(lookup_tool(), |_| async {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            Ok(serde_json::json!(1))
        });
        let (tx, mut rx) = mpsc::channel(4);
        let mut bridge = ToolBridge::new(registry, tx);
        let invocation = ToolInvocation {
            call_id: "call-4".to_string(),
            name: "lookup".to_string(),
            arguments: "{}".to_string(),
        };
        bridge.dispatch(invocation.clone());
        bridge.dispatch(invocation);
        let first = rx.recv().await.unwrap();
        assert_eq!(first.call_id, "call-4");
        bridge.complete("call-4");
        let second = tokio::time::timeout(std::time::Duration::from_millis(50), rx.recv()).await;
        assert!(second.is_err(), "duplicate dispatch should not run");
    }
}
