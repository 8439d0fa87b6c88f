//! End-to-end registration and invocation over HTTP

use mockito::Matcher;
use serde_json::{json, Map, Value};
use utcp_client::UtcpClient;
use utcp_core::{Error, UtcpClientConfig};
use utcp_protocols::HttpCallTemplate;

fn args(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

async fn echo_server() -> mockito::ServerGuard {
    let mut server = mockito::Server::new_async().await;
    let manual = json!({
        "utcp_version": "1.0.1",
        "manual_version": "1.0.0",
        "tools": [{
            "name": "echo",
            "description": "Echo a message back",
            "tags": ["echo", "debug"],
            "tool_call_template": {
                "call_template_type": "http",
                "url": format!("{}/echo", server.url()),
                "http_method": "POST",
                "body_field": "body"
            }
        }]
    });
    server
        .mock("GET", "/utcp")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(manual.to_string())
        .create_async()
        .await;
    server
        .mock("POST", "/echo")
        .match_body(Matcher::Json(json!({"message": "hi"})))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"message": "hi"}"#)
        .create_async()
        .await;
    server
}

#[tokio::test]
async fn test_register_and_call_echo() {
    let server = echo_server().await;
    let client = UtcpClient::with_default_plugins(None, UtcpClientConfig::new())
        .await
        .unwrap();

    let template = HttpCallTemplate::new(format!("{}/utcp", server.url()))
        .with_name("echo_api")
        .to_call_template()
        .unwrap();
    let result = client.register_manual(template).await.unwrap();
    assert!(result.success, "errors: {:?}", result.errors);

    let tools = client.list_tools().await.unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "echo_api.echo");

    let value = client
        .call_tool("echo_api.echo", args(json!({"body": {"message": "hi"}})))
        .await
        .unwrap();
    assert_eq!(value, json!({"message": "hi"}));

    let found = client.search_tools("echo message", 10, None).await.unwrap();
    assert_eq!(found[0].name, "echo_api.echo");

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_second_registration_is_rejected() {
    let server = echo_server().await;
    let client = UtcpClient::with_default_plugins(None, UtcpClientConfig::new())
        .await
        .unwrap();
    let template = HttpCallTemplate::new(format!("{}/utcp", server.url()))
        .with_name("echo-api")
        .to_call_template()
        .unwrap();

    client.register_manual(template.clone()).await.unwrap();
    let before = client.list_tools().await.unwrap();

    let err = client.register_manual(template).await.unwrap_err();
    assert!(matches!(err, Error::DuplicateManual { ref name } if name == "echo_api"));
    assert_eq!(client.list_tools().await.unwrap(), before);

    assert!(client.deregister_manual("echo_api").await.unwrap());
    assert!(client.list_tools().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unreachable_manual_is_reported() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/utcp")
        .with_status(503)
        .create_async()
        .await;

    let client = UtcpClient::with_default_plugins(None, UtcpClientConfig::new())
        .await
        .unwrap();
    let template = HttpCallTemplate::new(format!("{}/utcp", server.url()))
        .with_name("down")
        .to_call_template()
        .unwrap();

    let result = client.register_manual(template).await.unwrap();
    assert!(!result.success);
    assert!(result.errors[0].contains("503"));
    assert!(client.get_manual("down").await.unwrap().is_none());

    let err = client.call_tool("down.anything", Map::new()).await.unwrap_err();
    assert!(matches!(err, Error::ToolNotFound { .. }));
}

#[tokio::test]
async fn test_startup_manuals_and_post_processing() {
    let server = echo_server().await;
    let config: UtcpClientConfig = serde_json::from_value(json!({
        "manual_call_templates": [{
            "call_template_type": "http",
            "name": "startup",
            "url": format!("{}/utcp", server.url())
        }],
        "post_processing": [{
            "tool_post_processor_type": "limit_strings",
            "limit": 1
        }]
    }))
    .unwrap();

    let client = UtcpClient::with_default_plugins(None, config).await.unwrap();
    assert!(client.get_tool("startup.echo").await.unwrap().is_some());

    let value = client
        .call_tool("startup.echo", args(json!({"body": {"message": "hi"}})))
        .await
        .unwrap();
    assert_eq!(value, json!({"message": "h"}));
}
