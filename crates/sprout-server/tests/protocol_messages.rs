//! Integration tests for protocol message serialization.
//!
//! Tests client and server message types against the JSON lesson pages send
//! and receive.

use sprout_core::{FailureReason, SessionEvent, SessionId, SessionStatus};
use sprout_server::protocol::*;

#[test]
fn test_all_client_messages_parse() {
    let inputs = [
        r#"{"type":"create_session","session_id":"r1","initial_snippet":"print(1)","read_only":true}"#,
        r#"{"type":"create_session"}"#,
        r#"{"type":"edit","session_id":"r1","snippet":"print(2)"}"#,
        r#"{"type":"run","session_id":"r1"}"#,
        r#"{"type":"reset","session_id":"r1","confirmed":true}"#,
        r#"{"type":"reset","session_id":"r1"}"#,
        r#"{"type":"clear_output","session_id":"r1"}"#,
        r#"{"type":"load_example","session_id":"r1","name":"hello"}"#,
        r#"{"type":"format","session_id":"r1"}"#,
        r#"{"type":"destroy_session","session_id":"r1"}"#,
        r#"{"type":"get_session","session_id":"r1"}"#,
        r#"{"type":"list_examples"}"#,
        r#"{"type":"check_snippet","snippet":"import os"}"#,
    ];

    for input in inputs {
        let parsed: Result<ClientMessage, _> = serde_json::from_str(input);
        assert!(parsed.is_ok(), "Failed to parse {input}: {:?}", parsed.err());
    }
}

#[test]
fn test_reset_defaults_to_unconfirmed() {
    let parsed: ClientMessage =
        serde_json::from_str(r#"{"type":"reset","session_id":"r1"}"#).unwrap();
    match parsed {
        ClientMessage::Reset { confirmed, .. } => assert!(!confirmed),
        _ => panic!("Wrong message type"),
    }
}

#[test]
fn test_unknown_message_type_rejected() {
    let parsed: Result<ClientMessage, _> = serde_json::from_str(r#"{"type":"execute_all"}"#);
    assert!(parsed.is_err());
}

#[test]
fn test_session_events_map_to_server_messages() {
    let id = SessionId::from("r1");
    let events = vec![
        (
            SessionEvent::Output {
                session_id: id.clone(),
                chunk: "ok\n".to_string(),
            },
            "output",
        ),
        (
            SessionEvent::Status {
                session_id: id.clone(),
                status: SessionStatus::Failed,
                message: "Blocked".to_string(),
                failure: Some(FailureReason::SnippetRejected {
                    pattern: "import os".to_string(),
                }),
            },
            "status",
        ),
        (
            SessionEvent::OutputCleared {
                session_id: id.clone(),
            },
            "output_cleared",
        ),
        (
            SessionEvent::SnippetChanged {
                session_id: id.clone(),
                snippet: "print(1)".to_string(),
            },
            "snippet_changed",
        ),
    ];

    for (event, expected_type) in events {
        let json = serde_json::to_value(ServerMessage::from(event)).unwrap();
        assert_eq!(json["type"], expected_type);
        assert_eq!(json["session_id"], "r1");
    }
}

#[test]
fn test_status_failure_shape() {
    let msg = ServerMessage::Status {
        session_id: SessionId::from("r1"),
        status: SessionStatus::Failed,
        message: "Error: NameError".to_string(),
        failure: Some(FailureReason::RuntimeError {
            message: "NameError: name 'x' is not defined".to_string(),
        }),
    };
    let json = serde_json::to_value(&msg).unwrap();
    assert_eq!(json["status"], "failed");
    assert_eq!(json["failure"]["kind"], "runtime_error");
    assert_eq!(json["failure"]["message"], "NameError: name 'x' is not defined");
}

#[test]
fn test_run_completed_serialization() {
    let msg = ServerMessage::RunCompleted {
        session_id: SessionId::from("r1"),
        status: SessionStatus::Succeeded,
        failure: None,
        duration_ms: Some(12),
    };
    let json = serde_json::to_string(&msg).unwrap();
    assert!(json.contains("\"type\":\"run_completed\""));
    assert!(json.contains("\"status\":\"succeeded\""));
    assert!(json.contains("\"duration_ms\":12"));
}

#[test]
fn test_safety_verdict_serialization() {
    let msg = ServerMessage::SafetyVerdict {
        allowed: false,
        matched_pattern: Some("eval(".to_string()),
    };
    let json = serde_json::to_value(&msg).unwrap();
    assert_eq!(json["type"], "safety_verdict");
    assert_eq!(json["allowed"], false);
    assert_eq!(json["matched_pattern"], "eval(");
}
