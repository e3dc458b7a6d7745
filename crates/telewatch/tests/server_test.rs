//! End-to-end tests: real listener on 127.0.0.1:0, HTTP via reqwest, live
//! connections via tokio-tungstenite.

#![allow(clippy::unwrap_used)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use jsonwebtoken::{EncodingKey, Header, encode};
use pretty_assertions::assert_eq;
use reqwest::StatusCode;
use secrecy::SecretString;
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use telewatch::{AppState, create_router};
use telewatch_core::{
    AlarmLog, AlarmQuery, JwtVerifier, MemoryStore, Pipeline, PipelineConfig, Stores, TokenVerifier,
};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const SECRET: &str = "server-test-secret";

// ── Harness ──────────────────────────────────────────────────────────

async fn spawn_app() -> (SocketAddr, Pipeline) {
    let store = Arc::new(MemoryStore::new());
    let verifier: Arc<dyn TokenVerifier> =
        Arc::new(JwtVerifier::new(&SecretString::from(SECRET.to_owned())));
    let pipeline = Pipeline::new(PipelineConfig::default(), Stores::memory(&store), verifier);
    pipeline.start().await.unwrap();

    let app = create_router(AppState::new(pipeline.clone()), None);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, pipeline)
}

fn token_for(owner: &str) -> String {
    encode(
        &Header::default(),
        &json!({ "userId": owner }),
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

async fn connect(addr: SocketAddr) -> Socket {
    let (socket, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    socket
}

async fn send_json(socket: &mut Socket, value: &Value) {
    socket
        .send(Message::text(value.to_string()))
        .await
        .unwrap();
}

/// Next JSON text frame, skipping control frames.
async fn next_json(socket: &mut Socket) -> Value {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match socket.next().await {
                Some(Ok(Message::Text(text))) => {
                    return serde_json::from_str(text.as_str()).unwrap();
                }
                Some(Ok(Message::Close(_))) | None => panic!("connection closed"),
                Some(Ok(_)) => {}
                Some(Err(e)) => panic!("read failed: {e}"),
            }
        }
    })
    .await
    .expect("timed out waiting for frame")
}

async fn put_voltage_rule(client: &reqwest::Client, addr: SocketAddr, gateway: &str) {
    let resp = client
        .put(format!("http://{addr}/api/alarm-settings"))
        .json(&json!({
            "gatewayId": gateway,
            "settings": [{
                "category": "Voltage",
                "subcategory": "VL1",
                "high": 240.0,
                "low": 200.0,
                "priority": "High",
                "message": "voltage out of range"
            }]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

async fn post_reading(
    client: &reqwest::Client,
    addr: SocketAddr,
    body: &Value,
) -> reqwest::Response {
    client
        .post(format!("http://{addr}/api/readings"))
        .json(body)
        .send()
        .await
        .unwrap()
}

// ── Health ───────────────────────────────────────────────────────────

#[tokio::test]
async fn healthz_reports_watching_notifier() {
    let (addr, _pipeline) = spawn_app().await;

    let body: Value = reqwest::get(format!("http://{addr}/healthz"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body, json!({ "status": "ok", "notifier": "watching" }));
}

// ── Live flow ────────────────────────────────────────────────────────

#[tokio::test]
async fn subscribed_client_receives_reading_and_alarms() {
    let (addr, _pipeline) = spawn_app().await;
    let client = reqwest::Client::new();
    put_voltage_rule(&client, addr, "gw-1").await;

    let mut socket = connect(addr).await;
    send_json(
        &mut socket,
        &json!({
            "event": "subscribe",
            "data": { "gatewayId": "gw-1", "token": token_for("owner-1") }
        }),
    )
    .await;

    let ack = next_json(&mut socket).await;
    assert_eq!(ack["event"], "subscribed");
    assert_eq!(ack["data"]["ok"], true);
    assert_eq!(ack["data"]["gatewayId"], "gw-1");
    assert_eq!(ack["data"]["ownerRoom"], "owner:owner-1");

    let backlog = next_json(&mut socket).await;
    assert_eq!(backlog["event"], "alarm-backlog");
    assert_eq!(backlog["data"], json!([]));

    let resp = post_reading(
        &client,
        addr,
        &json!({
            "gatewayId": "gw-1",
            "ownerId": "owner-1",
            "data": { "Voltage": { "VL1": 250.0 } }
        }),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let stored: Value = resp.json().await.unwrap();
    assert!(stored["id"].is_string());

    let reading = next_json(&mut socket).await;
    assert_eq!(reading["event"], "new-reading");
    assert_eq!(reading["data"]["id"], stored["id"]);
    assert_eq!(reading["data"]["data"]["Voltage"]["VL1"], 250.0);

    let alarms = next_json(&mut socket).await;
    assert_eq!(alarms["event"], "new-alarms");
    let batch = alarms["data"].as_array().unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0]["category"], "Voltage");
    assert_eq!(batch[0]["subcategory"], "VL1");
    assert_eq!(batch[0]["priority"], "High");
    assert_eq!(batch[0]["message"], "voltage out of range");

    let global = next_json(&mut socket).await;
    assert_eq!(global["event"], "global-alarms");
    assert_eq!(global["data"], alarms["data"]);
}

#[tokio::test]
async fn joining_gateway_sends_latest_reading_snapshot() {
    let (addr, _pipeline) = spawn_app().await;
    let client = reqwest::Client::new();

    let resp = post_reading(
        &client,
        addr,
        &json!({ "gatewayId": "gw-snap", "data": { "Current": { "I1": 3.5 } } }),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let mut socket = connect(addr).await;
    send_json(&mut socket, &json!({ "event": "subscribe", "data": "gw-snap" })).await;

    // The live copy of the reading may race the subscription; ignore it.
    let mut frames = Vec::new();
    while frames.len() < 2 {
        let frame = next_json(&mut socket).await;
        if frame["event"] != "new-reading" {
            frames.push(frame);
        }
    }
    let [ack, snapshot] = <[Value; 2]>::try_from(frames).unwrap();
    assert_eq!(ack["event"], "subscribed");
    assert!(ack["data"].get("ownerRoom").is_none());

    assert_eq!(snapshot["event"], "reading");
    assert_eq!(snapshot["data"]["gatewayId"], "gw-snap");
    assert_eq!(snapshot["data"]["data"]["Current"]["I1"], 3.5);
}

#[tokio::test]
async fn invalid_token_downgrades_to_gateway_only() {
    let (addr, _pipeline) = spawn_app().await;

    let mut socket = connect(addr).await;
    send_json(
        &mut socket,
        &json!({
            "event": "subscribe",
            "data": { "gatewayId": "gw-2", "token": "not-a-jwt" }
        }),
    )
    .await;

    let ack = next_json(&mut socket).await;
    assert_eq!(ack["event"], "subscribed");
    assert_eq!(ack["data"]["ok"], true);
    assert!(ack["data"].get("ownerRoom").is_none());
    assert!(ack["data"]["error"].is_string());
}

#[tokio::test]
async fn malformed_frame_gets_error_and_connection_stays_open() {
    let (addr, _pipeline) = spawn_app().await;
    let mut socket = connect(addr).await;

    socket.send(Message::text("{not json".to_owned())).await.unwrap();
    let error = next_json(&mut socket).await;
    assert_eq!(error["event"], "error");
    assert!(error["data"]["message"].as_str().unwrap().starts_with("malformed message"));

    send_json(&mut socket, &json!({ "event": "teleport", "data": {} })).await;
    assert_eq!(next_json(&mut socket).await["event"], "error");

    send_json(&mut socket, &json!({ "event": "subscribe", "data": "gw-3" })).await;
    let ack = next_json(&mut socket).await;
    assert_eq!(ack["event"], "subscribed");
    assert_eq!(ack["data"]["gatewayId"], "gw-3");
}

// ── Write boundary ───────────────────────────────────────────────────

#[tokio::test]
async fn reading_without_gateway_is_rejected() {
    let (addr, _pipeline) = spawn_app().await;
    let client = reqwest::Client::new();

    let resp = post_reading(&client, addr, &json!({ "data": { "Voltage": { "VL1": 1.0 } } })).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("gatewayId"));

    let resp = client
        .post(format!("http://{addr}/api/readings"))
        .header("content-type", "application/json")
        .body("[1, 2")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn manual_alarm_insert_validates_and_persists() {
    let (addr, pipeline) = spawn_app().await;
    let client = reqwest::Client::new();
    let url = format!("http://{addr}/api/alarm-records");

    let resp = client
        .post(&url)
        .json(&json!({
            "gatewayId": "gw-4",
            "timestamp": "2025-03-01T10:00:00Z",
            "category": "Voltage",
            "subcategory": "VL1",
            "value": 260.0,
            "priority": "Medium",
            "message": "manual"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.json::<Value>().await.unwrap(), json!({ "success": true }));

    let resp = client
        .post(&url)
        .json(&json!({
            "timestamp": 1_740_823_200_000_i64,
            "category": "Voltage",
            "subcategory": "VL1",
            "value": 260.0,
            "priority": "Low"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let stored = pipeline
        .stores()
        .alarms
        .find(AlarmQuery::default())
        .await
        .unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].gateway_id.as_str(), "gw-4");
}

#[tokio::test]
async fn alarm_settings_round_trip_and_validation() {
    let (addr, _pipeline) = spawn_app().await;
    let client = reqwest::Client::new();
    let url = format!("http://{addr}/api/alarm-settings");

    let resp = client.get(&url).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    put_voltage_rule(&client, addr, "gw-5").await;

    let rules: Value = client
        .get(format!("{url}?gatewayId=gw-5"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let rules = rules.as_array().unwrap();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0]["gatewayId"], "gw-5");
    assert_eq!(rules[0]["high"], 240.0);

    let resp = client
        .put(&url)
        .json(&json!({
            "gatewayId": "gw-5",
            "settings": [
                { "category": "Voltage", "subcategory": "VL1", "high": 1.0 },
                { "category": "Voltage", "subcategory": "VL1", "high": 2.0 }
            ]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = client
        .put(&url)
        .json(&json!({
            "gatewayId": "gw-5",
            "settings": [{ "category": "Voltage", "subcategory": "VL1", "high": 1.0, "low": 5.0 }]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}
