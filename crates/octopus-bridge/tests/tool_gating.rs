//! Tool calls end to end against the in-process broker and a mock
//! authorization server.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use octopus_bridge::{FabricBridge, JsonRpcRequest, McpServer, McpToolResult};
use octopus_fabric::MemoryBroker;
use octopus_session::{MemoryTokenStore, MockAuthorizationServer, SessionConfig, SessionManager};
use serde_json::{json, Value};
use tokio::task::JoinSet;

struct Harness {
    broker: MemoryBroker,
    auth: Arc<MockAuthorizationServer>,
    mcp: McpServer,
}

fn harness() -> Harness {
    let broker = MemoryBroker::new(2);
    let auth = Arc::new(MockAuthorizationServer::new());
    let config = SessionConfig {
        client_id: Some("test-client".into()),
        ..SessionConfig::default()
    };
    let session = SessionManager::new(config, auth.clone(), Arc::new(MemoryTokenStore::new()));
    let bridge = FabricBridge::new(
        session,
        Arc::new(broker.clone()),
        Arc::new(broker.clone()),
        Duration::from_secs(5),
    );
    Harness {
        broker,
        auth,
        mcp: McpServer::new(Arc::new(bridge)),
    }
}

impl Harness {
    async fn call(&self, tool: &str, arguments: Value) -> McpToolResult {
        call_tool(&self.mcp, tool, arguments).await
    }

    async fn ok(&self, tool: &str, arguments: Value) -> String {
        let result = self.call(tool, arguments).await;
        assert!(!result.is_error, "{} failed: {}", tool, text(&result));
        text(&result)
    }

    async fn err(&self, tool: &str, arguments: Value) -> String {
        let result = self.call(tool, arguments).await;
        assert!(result.is_error, "{} unexpectedly succeeded: {}", tool, text(&result));
        text(&result)
    }

    async fn login(&self) {
        let prompt = self.ok("diaspora_authenticate", Value::Null).await;
        assert!(prompt.contains("client_id=test-client"));
        let done = self.ok("complete_diaspora_auth", json!({ "code": "abc123" })).await;
        assert_eq!(done, "Login successful! You can now use Diaspora tools.");
    }
}

async fn call_tool(mcp: &McpServer, tool: &str, arguments: Value) -> McpToolResult {
    let request: JsonRpcRequest = serde_json::from_value(json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "tools/call",
        "params": { "name": tool, "arguments": arguments },
    }))
    .unwrap();
    let response = mcp.handle(request).await.expect("requests get a response");
    assert!(response.error.is_none(), "unexpected rpc error: {:?}", response.error);
    serde_json::from_value(response.result.unwrap()).unwrap()
}

/// Split a `partition=P, offset=O` receipt.
fn receipt(text: &str) -> (i64, i64) {
    let (partition, offset) = text
        .strip_prefix("partition=")
        .and_then(|rest| rest.split_once(", offset="))
        .unwrap_or_else(|| panic!("not a receipt: {}", text));
    (partition.parse().unwrap(), offset.parse().unwrap())
}

fn text(result: &McpToolResult) -> String {
    serde_json::to_value(&result.content[0]).unwrap()["text"]
        .as_str()
        .unwrap()
        .to_string()
}

fn gated_calls() -> Vec<(&'static str, Value)> {
    vec![
        ("create_key", Value::Null),
        ("list_topics", Value::Null),
        ("register_topic", json!({ "topic": "alerts" })),
        ("unregister_topic", json!({ "topic": "alerts" })),
        ("produce_event", json!({ "topic": "alerts", "value": "v" })),
        ("consume_latest_event", json!({ "topic": "alerts" })),
    ]
}

#[tokio::test]
async fn locked_session_refuses_every_gated_tool() {
    let h = harness();
    for (tool, args) in gated_calls() {
        let message = h.err(tool, args).await;
        assert!(
            message.contains("missing precondition: logged in"),
            "{}: {}",
            tool,
            message
        );
        assert!(message.contains("diaspora_authenticate"));
    }
    assert_eq!(h.broker.operation_count(), 0);
}

#[tokio::test]
async fn data_plane_needs_a_rotated_key() {
    let h = harness();
    h.login().await;
    assert_eq!(
        h.ok("register_topic", json!({ "topic": "alerts" })).await,
        "Topic alerts registered."
    );
    let before = h.broker.operation_count();

    for (tool, args) in [
        ("produce_event", json!({ "topic": "alerts", "value": "v" })),
        ("consume_latest_event", json!({ "topic": "alerts" })),
    ] {
        let message = h.err(tool, args).await;
        assert!(message.contains("missing precondition: key rotated"), "{}", message);
        assert!(message.contains("create_key"));
    }
    assert_eq!(h.broker.operation_count(), before);
}

#[tokio::test(start_paused = true)]
async fn produce_then_consume_returns_the_record() {
    let h = harness();
    h.login().await;
    h.ok("register_topic", json!({ "topic": "alerts" })).await;

    let key: Value = serde_json::from_str(&h.ok("create_key", Value::Null).await).unwrap();
    assert_eq!(key["status"], "success");
    assert!(key["access_key"].as_str().unwrap().starts_with("MEM"));
    assert!(key.get("secret_key").is_none());

    let receipt = h
        .ok(
            "produce_event",
            json!({
                "topic": "alerts",
                "value": "disk full",
                "key": "node-7",
                "headers": { "source": "sensor" },
            }),
        )
        .await;

    let newest: Value = serde_json::from_str(
        &h.ok("consume_latest_event", json!({ "topic": "alerts", "timeout_s": 2 }))
            .await,
    )
    .unwrap();
    assert_eq!(newest["topic"], "alerts");
    assert_eq!(newest["value"], "disk full");
    assert_eq!(newest["key"], "node-7");
    assert_eq!(newest["offset"], 0);
    assert_eq!(
        receipt,
        format!("partition={}, offset=0", newest["partition"].as_i64().unwrap())
    );
    assert_eq!(h.broker.active_consumers(), 0);
}

#[tokio::test]
async fn asynchronous_produce_reports_queued() {
    let h = harness();
    h.login().await;
    h.ok("register_topic", json!({ "topic": "alerts" })).await;
    h.ok("create_key", Value::Null).await;

    let receipt = h
        .ok(
            "produce_event",
            json!({ "topic": "alerts", "value": "v", "sync": false }),
        )
        .await;
    assert_eq!(receipt, "queued");
}

#[tokio::test(start_paused = true)]
async fn consuming_an_empty_topic_returns_null() {
    let h = harness();
    h.login().await;
    h.ok("register_topic", json!({ "topic": "quiet" })).await;
    h.ok("create_key", Value::Null).await;

    let newest = h
        .ok("consume_latest_event", json!({ "topic": "quiet", "timeout_s": 1 }))
        .await;
    assert_eq!(newest, "null");
}

#[tokio::test]
async fn logout_relocks_and_is_idempotent() {
    let h = harness();
    h.login().await;
    h.ok("create_key", Value::Null).await;

    assert_eq!(h.ok("logout", Value::Null).await, "Logged out and tokens revoked.");
    assert!(!h.auth.revoked().is_empty());

    let message = h
        .err("produce_event", json!({ "topic": "alerts", "value": "v" }))
        .await;
    assert!(message.contains("missing precondition: logged in"));

    assert_eq!(h.ok("logout", Value::Null).await, "No active tokens found.");
}

#[tokio::test]
async fn fresh_login_requires_a_new_key() {
    let h = harness();
    h.login().await;
    h.ok("create_key", Value::Null).await;
    h.ok("logout", Value::Null).await;
    h.login().await;

    let message = h
        .err("consume_latest_event", json!({ "topic": "alerts" }))
        .await;
    assert!(message.contains("missing precondition: key rotated"));
}

#[tokio::test]
async fn completing_without_a_flow_fails() {
    let h = harness();
    let message = h.err("complete_diaspora_auth", json!({ "code": "abc" })).await;
    assert!(message.contains("diaspora_authenticate"));
    assert_eq!(h.auth.exchange_count(), 0);
}

#[tokio::test]
async fn rejected_code_leaves_session_locked() {
    let h = harness();
    h.ok("diaspora_authenticate", Value::Null).await;
    h.auth.reject_codes(true);
    let message = h.err("complete_diaspora_auth", json!({ "code": "stale" })).await;
    assert!(message.contains("invalid_grant"));
    assert!(h.err("list_topics", Value::Null).await.contains("logged in"));
}

#[tokio::test]
async fn unregistering_an_unknown_topic_is_not_found() {
    let h = harness();
    h.login().await;
    let message = h.err("unregister_topic", json!({ "topic": "ghost" })).await;
    assert_eq!(message, "topic not found: ghost");

    h.ok("register_topic", json!({ "topic": "b" })).await;
    h.ok("register_topic", json!({ "topic": "a" })).await;
    assert_eq!(
        h.ok("register_topic", json!({ "topic": "a" })).await,
        "Topic a already registered."
    );
    assert_eq!(h.ok("list_topics", Value::Null).await, r#"["a","b"]"#);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_produces_share_one_producer() {
    let h = harness();
    h.login().await;
    h.ok("register_topic", json!({ "topic": "alerts" })).await;
    h.ok("create_key", Value::Null).await;

    let mut calls = JoinSet::new();
    for i in 0..8 {
        let mcp = h.mcp.clone();
        calls.spawn(async move {
            let args = json!({
                "topic": "alerts",
                "value": format!("v{}", i),
                "key": format!("k{}", i),
            });
            call_tool(&mcp, "produce_event", args).await
        });
    }

    let mut placed = HashSet::new();
    while let Some(joined) = calls.join_next().await {
        let result = joined.unwrap();
        assert!(!result.is_error, "produce failed: {}", text(&result));
        assert!(placed.insert(receipt(&text(&result))));
    }
    assert_eq!(placed.len(), 8);

    let mut per_partition = [0i64; 2];
    for (partition, _) in &placed {
        per_partition[*partition as usize] += 1;
    }
    for (partition, offset) in &placed {
        assert!(*offset < per_partition[*partition as usize]);
    }
    assert!(h.mcp.bridge().flush().await);
}

#[tokio::test]
async fn receipts_name_an_existing_partition() {
    let h = harness();
    h.login().await;
    h.ok("register_topic", json!({ "topic": "alerts" })).await;
    h.ok("create_key", Value::Null).await;

    for key in ["a", "b", "node-7", "zz", ""] {
        let (partition, offset) = receipt(
            &h.ok(
                "produce_event",
                json!({ "topic": "alerts", "value": "v", "key": key }),
            )
            .await,
        );
        assert!((0..2).contains(&partition), "partition {} for key {:?}", partition, key);
        assert!(offset >= 0);
    }
    let (partition, _) = receipt(
        &h.ok("produce_event", json!({ "topic": "alerts", "value": "unkeyed" }))
            .await,
    );
    assert!((0..2).contains(&partition));
}

#[tokio::test]
async fn flush_drains_queued_publishes() {
    let h = harness();
    assert!(h.mcp.bridge().flush().await);

    h.login().await;
    h.ok("register_topic", json!({ "topic": "alerts" })).await;
    h.ok("create_key", Value::Null).await;
    for _ in 0..3 {
        let queued = h
            .ok("produce_event", json!({ "topic": "alerts", "value": "v", "sync": false }))
            .await;
        assert_eq!(queued, "queued");
    }
    assert!(h.mcp.bridge().flush().await);
}
