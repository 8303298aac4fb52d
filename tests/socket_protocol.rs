// tests/socket_protocol.rs

mod common;
use crate::common::Harness;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use autokube::server;
use autokube_test_utils::fake_runner::Behaviour;
use autokube_test_utils::with_timeout;

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn serve(h: &Harness) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let supervisor = h.supervisor.clone();
    tokio::spawn(async move {
        server::serve(listener, supervisor, std::future::pending()).await.unwrap();
    });
    format!("{addr}")
}

async fn connect(addr: &str) -> Ws {
    let (ws, _) = connect_async(format!("ws://{addr}/api/socket")).await.unwrap();
    ws
}

async fn send(ws: &mut Ws, frame: Value) {
    ws.send(Message::text(frame.to_string())).await.unwrap();
}

async fn next_event(ws: &mut Ws) -> Value {
    loop {
        let msg = with_timeout(ws.next()).await.expect("socket closed").unwrap();
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

/// Read events until one satisfies `pred`; returns everything read.
async fn read_until<F>(ws: &mut Ws, pred: F) -> Vec<Value>
where
    F: Fn(&Value) -> bool,
{
    let mut seen = Vec::new();
    loop {
        let event = next_event(ws).await;
        let done = pred(&event);
        seen.push(event);
        if done {
            return seen;
        }
    }
}

fn line_is(event: &Value, text: &str) -> bool {
    event["event"] == "log" && event["line"] == text
}

fn line_contains(event: &Value, needle: &str) -> bool {
    event["event"] == "log" && event["line"].as_str().is_some_and(|l| l.contains(needle))
}

#[tokio::test]
async fn run_script_streams_the_deployment() {
    let h = Harness::new();
    let addr = serve(&h).await;
    let mut ws = connect(&addr).await;

    send(&mut ws, json!({"event": "run-script", "clusterId": "c1"})).await;
    let events = read_until(&mut ws, |e| line_is(e, "[status] DONE")).await;

    assert!(events.iter().all(|e| e["clusterId"] == "c1"));
    assert!(events.iter().any(|e| line_is(e, "[app] process exited with code 0")));
    assert_eq!(h.runner.spawned_for("c1").len(), 5);
}

#[tokio::test]
async fn numeric_cluster_ids_are_accepted() {
    let h = Harness::new();
    let addr = serve(&h).await;
    let mut ws = connect(&addr).await;

    send(&mut ws, json!({"event": "run-script", "clusterId": 17})).await;
    read_until(&mut ws, |e| line_is(e, "[status] DONE")).await;

    assert_eq!(h.runner.spawned_for("17").len(), 5);
}

#[tokio::test]
async fn second_trigger_is_told_already_running() {
    let h = Harness::new();
    let (hold, release) = Behaviour::hold(&["booting"]);
    h.runner.script("python", hold);
    let addr = serve(&h).await;

    let mut first = connect(&addr).await;
    send(&mut first, json!({"event": "run-script", "clusterId": "c1"})).await;
    read_until(&mut first, |e| line_is(e, "[python] booting")).await;

    let mut second = connect(&addr).await;
    send(&mut second, json!({"event": "run-script", "clusterId": "c1"})).await;
    // History and the re-attach notice are queued before the refusal.
    let events = read_until(&mut second, |e| line_contains(e, "already running")).await;
    assert!(events.iter().any(|e| line_is(e, "[python] booting")));
    assert!(
        events
            .iter()
            .any(|e| line_contains(e, "re-attached to running stage RUN_PROVISION"))
    );

    release.notify_one();
    read_until(&mut first, |e| line_is(e, "[status] DONE")).await;
    read_until(&mut second, |e| line_is(e, "[status] DONE")).await;
    assert_eq!(h.runner.spawned_for("c1").len(), 5);
}

#[tokio::test]
async fn kill_script_reports_nothing_running() {
    let h = Harness::new();
    let addr = serve(&h).await;
    let mut ws = connect(&addr).await;

    send(&mut ws, json!({"event": "kill-script", "clusterId": "c1"})).await;
    let event = next_event(&mut ws).await;

    assert!(line_contains(&event, "nothing running"));
}

#[tokio::test]
async fn kill_script_cancels_a_running_deployment() {
    let h = Harness::new();
    let (hold, _release) = Behaviour::hold(&["booting"]);
    h.runner.script("ansible", hold);
    let addr = serve(&h).await;
    let mut ws = connect(&addr).await;

    send(&mut ws, json!({"event": "run-script", "clusterId": "c1"})).await;
    read_until(&mut ws, |e| line_is(e, "[ansible] booting")).await;

    send(&mut ws, json!({"event": "kill-script", "clusterId": "c1"})).await;
    let events = read_until(&mut ws, |e| line_contains(e, "(cancelled)")).await;

    assert!(events.iter().any(|e| line_is(e, "[supervisor] killed ansible process")));
    assert!(!h.runner.spawned().contains(&"app"));
}

#[tokio::test]
async fn kill_from_another_connection_gets_the_kill_lines() {
    let h = Harness::new();
    let (hold, _release) = Behaviour::hold(&["booting"]);
    h.runner.script("ansible", hold);
    let addr = serve(&h).await;

    let mut runner = connect(&addr).await;
    send(&mut runner, json!({"event": "run-script", "clusterId": "c1"})).await;
    read_until(&mut runner, |e| line_is(e, "[ansible] booting")).await;

    let mut operator = connect(&addr).await;
    send(&mut operator, json!({"event": "kill-script", "clusterId": "c1"})).await;
    let event = next_event(&mut operator).await;

    assert!(line_is(&event, "[supervisor] killed ansible process"));
}

#[tokio::test]
async fn repeated_request_logs_does_not_replay_again() {
    let mut h = Harness::new();
    let addr = serve(&h).await;
    h.supervisor.start("c1").unwrap();
    h.next_outcome().await;
    let history = h.log("c1");

    let mut ws = connect(&addr).await;
    send(&mut ws, json!({"event": "request-logs", "clusterId": "c1"})).await;
    send(&mut ws, json!({"event": "request-logs", "clusterId": "c1"})).await;
    send(&mut ws, json!({"event": "request-status", "clusterId": "c1"})).await;

    let events = read_until(&mut ws, |e| e["event"] == "status").await;
    let lines: Vec<_> = events
        .iter()
        .filter(|e| e["event"] == "log")
        .filter_map(|e| e["line"].as_str())
        .collect();
    assert_eq!(lines, history);
}

#[tokio::test]
async fn clear_logs_without_log_is_reported() {
    let h = Harness::new();
    let addr = serve(&h).await;
    let mut ws = connect(&addr).await;

    send(&mut ws, json!({"event": "clear-logs", "clusterId": "c9"})).await;
    let event = next_event(&mut ws).await;

    assert_eq!(event["event"], "log");
    assert_eq!(event["line"], "[supervisor] no logs found for cluster c9");
}

#[tokio::test]
async fn request_status_replies_with_status_event() {
    let h = Harness::new();
    let addr = serve(&h).await;
    let mut ws = connect(&addr).await;

    send(&mut ws, json!({"event": "request-status", "clusterId": "c1"})).await;
    let event = next_event(&mut ws).await;

    assert_eq!(event["event"], "status");
    assert_eq!(event["clusterId"], "c1");
    assert_eq!(event["stage"], "IDLE");
    assert_eq!(event["running"], false);
}

#[tokio::test]
async fn malformed_frames_get_an_error_event() {
    let h = Harness::new();
    let addr = serve(&h).await;
    let mut ws = connect(&addr).await;

    send(&mut ws, json!({"event": "format-disk"})).await;
    let event = next_event(&mut ws).await;

    assert_eq!(event["event"], "error");
    assert!(event["message"].as_str().unwrap().starts_with("invalid event"));
}

#[tokio::test]
async fn informational_replies_go_to_the_requester_only() {
    let h = Harness::new();
    let addr = serve(&h).await;

    let mut watcher = connect(&addr).await;
    send(&mut watcher, json!({"event": "request-logs", "clusterId": "c1"})).await;
    let first = next_event(&mut watcher).await;
    assert!(line_contains(&first, "no logs for cluster c1 yet"));

    let mut other = connect(&addr).await;
    send(&mut other, json!({"event": "kill-script", "clusterId": "c1"})).await;
    assert!(line_contains(&next_event(&mut other).await, "nothing running"));

    // A real line reaches the watcher; the other connection's reply did not.
    h.supervisor.stream().emit("c1", "[python] hello");
    let event = next_event(&mut watcher).await;
    assert!(line_is(&event, "[python] hello"));
}

#[tokio::test]
async fn healthz_answers_ok() {
    let h = Harness::new();
    let addr = serve(&h).await;

    let body = reqwest::get(format!("http://{addr}/healthz"))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "ok");
}
