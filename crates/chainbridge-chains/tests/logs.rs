//! Log managers end to end: registry -> transport -> filter/parser -> sink.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::routing::post;
use axum::Router;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use chainbridge_chains::{ChainRegistry, DefaultTransports};
use chainbridge_core::subscription::StartContext;
use chainbridge_core::types::{Endpoint, JobEvent, Protocol, SubscriptionRecord};

fn record(url: String, protocol: Protocol) -> SubscriptionRecord {
    SubscriptionRecord {
        id: "sub-e2e".into(),
        job_reference: "job-e2e".into(),
        endpoint: Endpoint {
            url,
            protocol,
            chain: "ethereum".into(),
            refresh_interval_secs: 1,
        },
        addresses: vec!["0xabc".into()],
        topics: vec!["0xdead".into()],
    }
}

fn log(block: &str) -> Value {
    json!({
        "address": "0x0000000000000000000000000000000000000abc",
        "topics": ["0x000000000000000000000000000000000000000000000000000000000000dead"],
        "data": "0x",
        "blockNumber": block,
        "blockHash": "0x01",
        "transactionHash": "0x02",
        "transactionIndex": "0x0",
        "logIndex": "0x0"
    })
}

#[tokio::test]
async fn websocket_subscription_delivers_one_event() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (sub_tx, mut sub_rx) = mpsc::unbounded_channel::<Value>();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        if let Some(Ok(Message::Text(text))) = ws.next().await {
            let _ = sub_tx.send(serde_json::from_str(&text).unwrap());
        }
        let ack = json!({"jsonrpc": "2.0", "id": 1, "result": "0xsub"});
        ws.send(Message::Text(ack.to_string())).await.unwrap();
        let note = json!({
            "jsonrpc": "2.0",
            "method": "eth_subscription",
            "params": {"subscription": "0xsub", "result": log("0x10")}
        });
        ws.send(Message::Text(note.to_string())).await.unwrap();
        while ws.next().await.is_some() {}
    });

    let registry = ChainRegistry::with_log_chains(Arc::new(DefaultTransports::default()));
    let (sink, mut events) = mpsc::channel::<JobEvent>(16);
    let ctx = StartContext { sink, cancel: CancellationToken::new() };
    let handle = registry
        .start(&record(format!("ws://{addr}"), Protocol::WebSocket), ctx)
        .await
        .unwrap();

    let subscribe = timeout(Duration::from_secs(3), sub_rx.recv()).await.unwrap().unwrap();
    assert_eq!(subscribe["method"], "eth_subscribe");
    assert_eq!(subscribe["params"][1]["address"][0], "0x0000000000000000000000000000000000000abc");

    let event = timeout(Duration::from_secs(3), events.recv()).await.unwrap().unwrap();
    assert_eq!(event.job_reference, "job-e2e");
    let body: Value = serde_json::from_slice(&event.event.payload).unwrap();
    assert_eq!(body["blockNumber"], "0x10");

    // The confirmation was consumed, so nothing else is pending.
    assert!(timeout(Duration::from_millis(200), events.recv()).await.is_err());
    handle.stop().await;
}

#[derive(Clone, Default)]
struct Node {
    requests: Arc<Mutex<Vec<Value>>>,
}

async fn get_logs(State(node): State<Node>, body: String) -> String {
    let req: Value = serde_json::from_str(&body).unwrap();
    let n = {
        let mut requests = node.requests.lock().unwrap();
        requests.push(req);
        requests.len()
    };
    let result = if n == 1 { json!([log("0x20")]) } else { json!([]) };
    json!({"jsonrpc": "2.0", "id": 1, "result": result}).to_string()
}

#[tokio::test]
async fn rpc_polling_resumes_after_delivered_block() {
    let node = Node::default();
    let app = Router::new().route("/", post(get_logs)).with_state(node.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let registry = ChainRegistry::with_log_chains(Arc::new(DefaultTransports::default()));
    let (sink, mut events) = mpsc::channel::<JobEvent>(16);
    let ctx = StartContext { sink, cancel: CancellationToken::new() };
    let handle = registry
        .start(&record(format!("http://{addr}/"), Protocol::Rpc), ctx)
        .await
        .unwrap();

    let event = timeout(Duration::from_secs(3), events.recv()).await.unwrap().unwrap();
    let body: Value = serde_json::from_slice(&event.event.payload).unwrap();
    assert_eq!(body["blockNumber"], "0x20");

    // Second poll fires after the 1s refresh interval.
    timeout(Duration::from_secs(3), async {
        while node.requests.lock().unwrap().len() < 2 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .unwrap();
    handle.stop().await;

    let requests = node.requests.lock().unwrap().clone();
    assert_eq!(requests[0]["method"], "eth_getLogs");
    assert_eq!(requests[0]["params"][0]["fromBlock"], "latest");
    assert_eq!(requests[1]["params"][0]["fromBlock"], "0x21");
}
