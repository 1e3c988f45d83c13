//! Whole bridge: mock WebSocket node -> supervisor -> dispatcher -> mock
//! job runner.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

use chainbridge_core::types::{Endpoint, Protocol, SubscriptionRecord};
use chainbridge_service::{Bridge, BridgeConfig, SubscriptionState};

#[derive(Debug, Clone)]
struct Run {
    job: String,
    access_key: Option<String>,
    secret: Option<String>,
    body: Value,
}

#[derive(Clone, Default)]
struct Runner {
    runs: Arc<Mutex<Vec<Run>>>,
}

async fn create_run(
    State(runner): State<Runner>,
    Path(job): Path<String>,
    headers: HeaderMap,
    body: String,
) -> StatusCode {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).map(String::from);
    runner.runs.lock().unwrap().push(Run {
        job,
        access_key: header("X-Chainlink-EA-AccessKey"),
        secret: header("X-Chainlink-EA-Secret"),
        body: serde_json::from_str(&body).unwrap_or(Value::Null),
    });
    StatusCode::CREATED
}

async fn spawn_runner() -> (String, Runner) {
    let runner = Runner::default();
    let app = Router::new()
        .route("/v2/specs/:job/runs", post(create_run))
        .with_state(runner.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), runner)
}

/// Confirms the subscription, then sends one log notification.
async fn spawn_node() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let _subscribe = ws.next().await;
        let ack = json!({"jsonrpc": "2.0", "id": 1, "result": "0xfeed"});
        ws.send(Message::Text(ack.to_string())).await.unwrap();
        let note = json!({
            "jsonrpc": "2.0",
            "method": "eth_subscription",
            "params": {
                "subscription": "0xfeed",
                "result": {
                    "address": "0x0000000000000000000000000000000000000abc",
                    "topics": ["0x000000000000000000000000000000000000000000000000000000000000dead"],
                    "data": "0x01",
                    "blockNumber": "0x42",
                    "blockHash": "0xaa",
                    "transactionHash": "0xbb",
                    "transactionIndex": "0x0",
                    "logIndex": "0x1"
                }
            }
        });
        ws.send(Message::Text(note.to_string())).await.unwrap();
        while ws.next().await.is_some() {}
    });
    format!("ws://{addr}")
}

fn record(id: &str, url: String, chain: &str) -> SubscriptionRecord {
    SubscriptionRecord {
        id: id.into(),
        job_reference: format!("job-{id}"),
        endpoint: Endpoint {
            url,
            protocol: Protocol::WebSocket,
            chain: chain.into(),
            refresh_interval_secs: 0,
        },
        addresses: vec!["0xabc".into()],
        topics: vec!["0xdead".into()],
    }
}

#[tokio::test]
async fn log_event_triggers_job_exactly_once() {
    let (runner_url, runner) = spawn_runner().await;
    let node_url = spawn_node().await;

    let mut config = BridgeConfig::default();
    config.chainlink.url = runner_url;
    config.chainlink.access_key = "key".into();
    config.chainlink.secret = "secret".into();
    config.subscriptions = vec![
        record("eth", node_url, "ethereum"),
        record("doge", "ws://127.0.0.1:1".into(), "dogecoin"),
    ];

    let bridge = Bridge::from_config(&config).await.unwrap();
    let report = bridge.boot().await.unwrap();
    assert_eq!(report.started, vec!["eth".to_string()]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "doge");

    timeout(Duration::from_secs(5), async {
        while runner.runs.lock().unwrap().is_empty() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();
    // Leave room for a duplicate to show up.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let runs = runner.runs.lock().unwrap().clone();
    assert_eq!(runs.len(), 1);
    let run = &runs[0];
    assert_eq!(run.job, "job-eth");
    assert_eq!(run.access_key.as_deref(), Some("key"));
    assert_eq!(run.secret.as_deref(), Some("secret"));
    assert_eq!(run.body["blockNumber"], "0x42");
    assert_eq!(run.body["logIndex"], "0x1");

    let metrics = bridge.metrics();
    assert_eq!(metrics.delivered, 1);
    assert_eq!(metrics.failed, 0);

    let supervisor = bridge.supervisor().clone();
    assert_eq!(supervisor.state("eth").await, Some(SubscriptionState::Running));
    assert_eq!(supervisor.state("doge").await, Some(SubscriptionState::Failed));

    timeout(Duration::from_secs(5), bridge.shutdown()).await.unwrap();
    assert_eq!(supervisor.state("eth").await, Some(SubscriptionState::Stopped));
}

#[tokio::test]
async fn unreachable_node_fails_only_its_subscription() {
    let (runner_url, _runner) = spawn_runner().await;
    let mut config = BridgeConfig::default();
    config.chainlink.url = runner_url;
    config.ws.connect_timeout_secs = 1;
    config.subscriptions = vec![record("down", "ws://127.0.0.1:1".into(), "ethereum")];

    let bridge = Bridge::from_config(&config).await.unwrap();
    let report = bridge.boot().await.unwrap();
    assert!(report.started.is_empty());
    assert_eq!(report.failed[0].0, "down");

    let status = bridge.supervisor().snapshot().await;
    assert_eq!(status[0].state, SubscriptionState::Failed);
    bridge.shutdown().await;
}

#[tokio::test]
async fn bad_endpoint_scheme_fails_only_its_subscription() {
    let (runner_url, runner) = spawn_runner().await;
    let node_url = spawn_node().await;

    let mut config = BridgeConfig::default();
    config.chainlink.url = runner_url;
    config.subscriptions = vec![
        record("eth", node_url, "ethereum"),
        record("bad", "https://node.example".into(), "ethereum"),
    ];

    let bridge = Bridge::from_config(&config).await.unwrap();
    let report = bridge.boot().await.unwrap();
    assert_eq!(report.started, vec!["eth".to_string()]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "bad");
    assert!(report.failed[0].1.contains("https"));

    let supervisor = bridge.supervisor().clone();
    assert_eq!(supervisor.state("bad").await, Some(SubscriptionState::Failed));

    timeout(Duration::from_secs(5), async {
        while runner.runs.lock().unwrap().is_empty() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(runner.runs.lock().unwrap()[0].job, "job-eth");

    timeout(Duration::from_secs(5), bridge.shutdown()).await.unwrap();
}
