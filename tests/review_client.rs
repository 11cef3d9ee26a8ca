use std::time::Duration;

use diffreview::error::Error;
use diffreview::llm::{ChatClient, OpenAiClient, review};
use diffreview::prompts::SENTINEL;
use mockito::{Matcher, Server};

fn client_for(server: &Server, key: &str) -> OpenAiClient {
    OpenAiClient::new(Some(key.to_string()))
        .with_base_url(server.url())
        .with_model("test-model")
}

#[test]
fn test_success_returns_trimmed_first_choice() {
    let mut server = Server::new();
    let mock = server
        .mock("POST", "/chat/completions")
        .match_header("authorization", "Bearer sk-test-123")
        .match_header("content-type", "application/json")
        .match_body(Matcher::PartialJson(serde_json::json!({
            "model": "test-model",
            "messages": [
                {"role": "system", "content": "be strict"},
                {"role": "user", "content": "the prompt"}
            ]
        })))
        .with_status(200)
        .with_body(format!(
            r#"{{"choices":[{{"message":{{"role":"assistant","content":"  {SENTINEL}\n"}}}},{{"message":{{"content":"second"}}}}]}}"#
        ))
        .expect(1)
        .create();

    let client = client_for(&server, "sk-test-123");
    let text = review(&client, "be strict", "the prompt").unwrap();
    mock.assert();
    assert_eq!(text, SENTINEL);
}

#[test]
fn test_invalid_credential_makes_no_request() {
    let mut server = Server::new();
    let mock = server
        .mock("POST", "/chat/completions")
        .expect(0)
        .create();

    let client = client_for(&server, "not-a-key");
    let err = client.complete("system", "prompt").unwrap_err();
    mock.assert();
    assert!(matches!(err, Error::Configuration(_)));
}

#[test]
fn test_missing_credential_makes_no_request() {
    let mut server = Server::new();
    let mock = server
        .mock("POST", "/chat/completions")
        .expect(0)
        .create();

    let client = OpenAiClient::new(None).with_base_url(server.url());
    let err = client.complete("system", "prompt").unwrap_err();
    mock.assert();
    assert!(matches!(err, Error::Configuration(_)));
}

#[test]
fn test_401_is_authentication_error() {
    let mut server = Server::new();
    let mock = server
        .mock("POST", "/chat/completions")
        .with_status(401)
        .with_body(r#"{"error":{"message":"Incorrect API key provided"}}"#)
        .expect(1)
        .create();

    let err = client_for(&server, "sk-revoked").complete("s", "p").unwrap_err();
    mock.assert();
    match err {
        Error::Authentication(msg) => assert!(msg.contains("Incorrect API key")),
        other => panic!("expected Authentication, got {other:?}"),
    }
}

#[test]
fn test_429_is_rate_limit_error_without_retry() {
    let mut server = Server::new();
    let mock = server
        .mock("POST", "/chat/completions")
        .with_status(429)
        .with_body(r#"{"error":{"message":"Rate limit reached"}}"#)
        .expect(1)
        .create();

    let err = client_for(&server, "sk-busy").complete("s", "p").unwrap_err();
    mock.assert();
    assert!(matches!(err, Error::RateLimit(_)));
}

#[test]
fn test_other_status_is_service_error_with_message() {
    let mut server = Server::new();
    let mock = server
        .mock("POST", "/chat/completions")
        .with_status(503)
        .with_body("upstream unavailable")
        .expect(1)
        .create();

    let err = client_for(&server, "sk-x").complete("s", "p").unwrap_err();
    mock.assert();
    match err {
        Error::Service { status, message } => {
            assert_eq!(status, 503);
            assert_eq!(message, "upstream unavailable");
        }
        other => panic!("expected Service, got {other:?}"),
    }
}

#[test]
fn test_empty_choices_is_service_error() {
    let mut server = Server::new();
    let _mock = server
        .mock("POST", "/chat/completions")
        .with_status(200)
        .with_body(r#"{"choices":[]}"#)
        .create();

    let err = client_for(&server, "sk-x").complete("s", "p").unwrap_err();
    assert!(matches!(err, Error::Service { status: 200, .. }));
}

#[test]
fn test_connection_failure_is_network_error() {
    // Nothing listens on port 1.
    let client = OpenAiClient::new(Some("sk-x".to_string()))
        .with_base_url("http://127.0.0.1:1/v1")
        .with_timeout(Some(Duration::from_secs(5)));
    let err = client.complete("s", "p").unwrap_err();
    assert!(matches!(err, Error::Network(_)), "got {err:?}");
}
