//! Tests for duraclaw-tools: ToolResult, ToolRegistry, and the plugin tool
//! suspend/resume contract.

use async_trait::async_trait;
use duraclaw_tools::*;
use serde_json::{json, Value};
use tokio::sync::mpsc;

// ===========================================================================
// ToolResult
// ===========================================================================

#[test]
fn tool_result_text() {
    let r = ToolResult::text("hello");
    assert!(!r.is_error());
    assert_eq!(r.to_content_string(), "hello");
}

#[test]
fn tool_result_error() {
    let r = ToolResult::error("boom");
    assert!(r.is_error());
    assert_eq!(r.to_content_string(), "Error: boom");
}

#[test]
fn tool_result_json() {
    let r = ToolResult::Json(json!({"key": "value"}));
    assert!(!r.is_error());
    let s = r.to_content_string();
    assert!(s.contains("key"));
    assert!(s.contains("value"));
}

// ===========================================================================
// ToolRegistry — a simple echo tool
// ===========================================================================

struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echoes its input back"
    }

    fn input_schema(&self) -> Value {
        json!({"type": "object", "properties": {"text": {"type": "string"}}, "required": ["text"]})
    }

    fn is_read_only(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value) -> ToolResult {
        match args.get("text").and_then(Value::as_str) {
            Some(text) => ToolResult::text(text),
            None => ToolResult::error("missing 'text'"),
        }
    }
}

#[tokio::test]
async fn registry_default_is_empty() {
    let reg = ToolRegistry::new();
    assert!(reg.list().is_empty());
    assert!(reg.get_definitions().is_empty());
}

#[tokio::test]
async fn registry_execute_missing_tool() {
    let reg = ToolRegistry::new();
    let result = reg.execute("nonexistent", json!({})).await;
    assert!(result.is_error());
    assert!(result.to_content_string().contains("not found"));
}

#[tokio::test]
async fn registry_register_and_execute() {
    let mut reg = ToolRegistry::new();
    reg.register(EchoTool);

    assert!(reg.get("echo").is_some());
    assert_eq!(reg.list_read_only(), vec!["echo"]);

    let result = reg.execute("echo", json!({"text": "hi"})).await;
    assert_eq!(result.to_content_string(), "hi");

    let result = reg.execute("echo", json!({})).await;
    assert!(result.is_error());
}

#[tokio::test]
async fn registry_definitions_have_schema() {
    let mut reg = ToolRegistry::new();
    reg.register(EchoTool);
    let defs = reg.get_definitions();
    assert_eq!(defs.len(), 1);
    assert_eq!(defs[0].name, "echo");
    assert!(defs[0].input_schema.is_object());
}

#[tokio::test]
async fn registry_remove_tool() {
    let mut reg = ToolRegistry::new();
    reg.register(EchoTool);
    assert!(reg.remove("echo"));
    assert!(reg.get("echo").is_none());
    assert!(!reg.remove("echo"));
}

#[tokio::test]
async fn registry_execute_cancellable_races_cancellation() {
    use tokio_util::sync::CancellationToken;

    struct SlowTool;
    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "sleeps forever"
        }
        fn input_schema(&self) -> Value {
            json!({})
        }
        async fn execute(&self, _args: Value) -> ToolResult {
            std::future::pending::<()>().await;
            unreachable!()
        }
    }

    let mut reg = ToolRegistry::new();
    reg.register(SlowTool);

    let token = CancellationToken::new();
    token.cancel();

    let result = reg.execute_cancellable("slow", json!({}), token).await;
    assert_eq!(result.to_content_string(), "[cancelled]");
}

// ===========================================================================
// PluginTool — a mock two-step elicit tool modeled on a flight-booking
// confirmation flow: the plugin asks once for a destination, once for a
// yes/no confirmation, then completes.
// ===========================================================================

struct BookFlightPlugin;

#[async_trait]
impl PluginTool for BookFlightPlugin {
    fn name(&self) -> &str {
        "book_flight"
    }

    fn description(&self) -> &str {
        "Books a flight, confirming details with the user first"
    }

    fn input_schema(&self) -> Value {
        json!({"type": "object", "properties": {"destination": {"type": "string"}}})
    }

    async fn run(&self, ctx: PluginContext) -> Result<Value, String> {
        let destination = ctx
            .arguments
            .get("destination")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();

        let confirm = ctx
            .elicit(
                "confirm",
                format!("Book a flight to {}?", destination),
                json!({"type": "boolean"}),
            )
            .await;

        match confirm {
            ElicitResponse::Value(v) if v == json!(true) => {
                Ok(json!({"booked": true, "destination": destination}))
            }
            ElicitResponse::Value(_) => Err("booking declined".to_string()),
            ElicitResponse::Error(e) => Err(e),
            ElicitResponse::Cancelled => Err("cancelled".to_string()),
        }
    }
}

#[tokio::test]
async fn plugin_tool_elicit_confirm_then_complete() {
    let plugin = BookFlightPlugin;
    let (tx, mut rx) = mpsc::channel(4);
    let ctx = PluginContext::new("call-1", json!({"destination": "SFO"}), tx);

    let run_handle = tokio::spawn(async move { plugin.run(ctx).await });

    let event = rx.recv().await.expect("expected an elicit event");
    let PluginEvent::Elicit(request) = event else {
        panic!("expected Elicit event");
    };
    assert_eq!(request.key, "confirm");
    assert!(request.message.contains("SFO"));

    request
        .respond_to
        .send(ElicitResponse::Value(json!(true)))
        .unwrap();

    let result = run_handle.await.unwrap().unwrap();
    assert_eq!(result["booked"], true);
    assert_eq!(result["destination"], "SFO");
}

#[tokio::test]
async fn plugin_tool_elicit_decline_fails() {
    let plugin = BookFlightPlugin;
    let (tx, mut rx) = mpsc::channel(4);
    let ctx = PluginContext::new("call-1", json!({"destination": "SFO"}), tx);

    let run_handle = tokio::spawn(async move { plugin.run(ctx).await });

    let event = rx.recv().await.expect("expected an elicit event");
    let PluginEvent::Elicit(request) = event else {
        panic!("expected Elicit event");
    };
    request
        .respond_to
        .send(ElicitResponse::Value(json!(false)))
        .unwrap();

    let result = run_handle.await.unwrap();
    assert_eq!(result, Err("booking declined".to_string()));
}

#[tokio::test]
async fn plugin_tool_dropped_respond_channel_cancels() {
    let plugin = BookFlightPlugin;
    let (tx, mut rx) = mpsc::channel(4);
    let ctx = PluginContext::new("call-1", json!({"destination": "SFO"}), tx);

    let run_handle = tokio::spawn(async move { plugin.run(ctx).await });

    let event = rx.recv().await.expect("expected an elicit event");
    let PluginEvent::Elicit(request) = event else {
        panic!("expected Elicit event");
    };
    drop(request.respond_to);

    let result = run_handle.await.unwrap();
    assert_eq!(result, Err("cancelled".to_string()));
}

#[test]
fn plugin_registry_register_and_list() {
    let mut reg = PluginToolRegistry::new();
    reg.register(BookFlightPlugin);
    assert!(reg.contains("book_flight"));
    assert_eq!(reg.list(), vec!["book_flight"]);
    assert_eq!(reg.get_definitions().len(), 1);
}

#[test]
fn plugin_registry_missing_tool() {
    let reg = PluginToolRegistry::new();
    assert!(reg.get("nonexistent").is_none());
    assert!(!reg.contains("nonexistent"));
}
