use duraclaw_core::{
    ApiErrorBody, BindMode, ChatRequestBody, ElicitResponseBody, Error, EventPayload,
    GatewayConfig, HealthResponse, IsomorphicClientOutputBody, Lsn, PluginAbortBody, ToolCallInfo,
    Usage,
};

// ===========================================================================
// Lsn
// ===========================================================================

#[test]
fn lsn_ordering_and_next() {
    let a = Lsn(1);
    let b = Lsn(2);
    assert!(a < b);
    assert_eq!(a.next(), b);
    assert_eq!(Lsn::SENTINEL, Lsn(0));
}

#[test]
fn lsn_serializes_as_plain_number() {
    let lsn = Lsn(42);
    let json = serde_json::to_string(&lsn).unwrap();
    assert_eq!(json, "42");

    let parsed: Lsn = serde_json::from_str("42").unwrap();
    assert_eq!(parsed, Lsn(42));
}

#[test]
fn lsn_display() {
    assert_eq!(Lsn(7).to_string(), "7");
}

// ===========================================================================
// EventPayload
// ===========================================================================

#[test]
fn event_payload_text_round_trips_with_type_tag() {
    let payload = EventPayload::Text {
        delta: "hello".to_string(),
    };
    let json = serde_json::to_value(&payload).unwrap();
    assert_eq!(json["type"], "text");
    assert_eq!(json["delta"], "hello");

    let back: EventPayload = serde_json::from_value(json).unwrap();
    matches!(back, EventPayload::Text { delta } if delta == "hello");
}

#[test]
fn event_payload_tool_calls_round_trip() {
    let payload = EventPayload::ToolCalls {
        calls: vec![ToolCallInfo {
            id: "call-1".to_string(),
            name: "book_flight".to_string(),
            arguments: serde_json::json!({"destination": "SFO"}),
        }],
    };
    let json = serde_json::to_value(&payload).unwrap();
    assert_eq!(json["type"], "tool_calls");
    assert_eq!(json["calls"][0]["name"], "book_flight");
}

#[test]
fn event_payload_plugin_elicit_request_round_trips() {
    let payload = EventPayload::PluginElicitRequest {
        session_id: "sess-1".to_string(),
        call_id: "call-1".to_string(),
        elicit_id: "elicit-1".to_string(),
        tool_name: "book_flight".to_string(),
        key: "confirm".to_string(),
        message: "Confirm the booking?".to_string(),
        schema: serde_json::json!({"type": "boolean"}),
    };
    let json = serde_json::to_value(&payload).unwrap();
    assert_eq!(json["type"], "plugin_elicit_request");
    let back: EventPayload = serde_json::from_value(json).unwrap();
    assert!(back.is_terminal());
}

#[test]
fn event_payload_complete_and_error_are_terminal() {
    let complete = EventPayload::Complete {
        text: "done".to_string(),
        usage: Usage::default(),
    };
    assert!(complete.is_terminal());

    let error = EventPayload::Error {
        message: "boom".to_string(),
        recoverable: true,
    };
    assert!(error.is_terminal());

    let text = EventPayload::Text {
        delta: "x".to_string(),
    };
    assert!(!text.is_terminal());
}

// ===========================================================================
// Protocol bodies
// ===========================================================================

#[test]
fn chat_request_body_defaults() {
    let body: ChatRequestBody = serde_json::from_str(r#"{"message":"hi"}"#).unwrap();
    assert_eq!(body.message, "hi");
    assert!(body.persona.is_none());
    assert!(body.model.is_none());
}

#[test]
fn elicit_response_body_value_variant() {
    let body: ElicitResponseBody = serde_json::from_str(r#"{"value": true}"#).unwrap();
    matches!(body, ElicitResponseBody::Value { value } if value == serde_json::json!(true));
}

#[test]
fn elicit_response_body_error_variant() {
    let body: ElicitResponseBody = serde_json::from_str(r#"{"error": "cancelled"}"#).unwrap();
    matches!(body, ElicitResponseBody::Error { error } if error == "cancelled");
}

#[test]
fn plugin_abort_body_parses() {
    let body: PluginAbortBody = serde_json::from_str(r#"{"call_id":"call-1"}"#).unwrap();
    assert_eq!(body.call_id, "call-1");
}

#[test]
fn isomorphic_client_output_body_parses() {
    let body: IsomorphicClientOutputBody =
        serde_json::from_str(r#"{"call_id":"call-1","output":{"ok":true}}"#).unwrap();
    assert_eq!(body.call_id, "call-1");
    assert_eq!(body.output["ok"], true);
}

#[test]
fn health_response_shape() {
    let resp = HealthResponse::healthy(3);
    let json = serde_json::to_value(&resp).unwrap();
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["sessions"], 3);
}

#[test]
fn api_error_body_wraps_message() {
    let body = ApiErrorBody::new("session not found: abc");
    assert_eq!(body.error, "session not found: abc");
}

// ===========================================================================
// Config
// ===========================================================================

#[test]
fn bind_mode_to_addr() {
    let loopback = BindMode::Loopback.to_addr(8080);
    assert!(loopback.ip().is_loopback());
    assert_eq!(loopback.port(), 8080);

    let lan = BindMode::Lan.to_addr(8080);
    assert!(!lan.ip().is_loopback());
}

#[test]
fn gateway_config_default_port() {
    let cfg = GatewayConfig::default();
    assert_eq!(cfg.port, 18789);
    assert_eq!(cfg.bind, BindMode::Lan);
}

// ===========================================================================
// Error
// ===========================================================================

#[test]
fn error_display_messages() {
    let err = Error::session_not_found("sess-1");
    assert_eq!(err.to_string(), "session not found: sess-1");

    let err = Error::StaleReader {
        requested: 5,
        floor: 10,
    };
    assert_eq!(
        err.to_string(),
        "stale reader: requested lsn 5 below retained floor 10"
    );
}

#[test]
fn error_is_recoverable_only_for_llm_errors() {
    let llm_err = Error::llm_error("anthropic", "rate limited");
    assert!(llm_err.is_recoverable());

    let not_found = Error::session_not_found("sess-1");
    assert!(!not_found.is_recoverable());
}
