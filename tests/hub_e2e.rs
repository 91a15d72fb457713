//! End-to-end: real axum server, real WebSocket clients

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use peer_hub::config::HubConfig;
use peer_hub::gateway;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

async fn start_server(master_password: &str) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let config = HubConfig {
        host: "127.0.0.1".into(),
        port: addr.port(),
        master_password: master_password.into(),
    };
    let (tx, rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        gateway::run_server(listener, &config, async move {
            let _ = rx.await;
        })
        .await
        .unwrap();
    });
    TestServer {
        addr,
        shutdown: Some(tx),
    }
}

async fn connect(addr: SocketAddr) -> Client {
    let (ws, _) = connect_async(format!("ws://{addr}/hub")).await.unwrap();
    ws
}

async fn send(ws: &mut Client, kind: &str, conv: &str, data: Value) {
    let frame = json!({"type": kind, "conv": conv, "data": data}).to_string();
    ws.send(Message::Text(frame)).await.unwrap();
}

async fn recv(ws: &mut Client) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .unwrap();
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

async fn http_get(addr: SocketAddr, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let req = format!("GET {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n");
    stream.write_all(req.as_bytes()).await.unwrap();
    let mut buf = String::new();
    stream.read_to_string(&mut buf).await.unwrap();
    buf
}

#[tokio::test]
async fn test_offer_answer_round_trip() {
    let server = start_server("").await;
    let mut alice = connect(server.addr).await;
    let mut bob = connect(server.addr).await;

    send(
        &mut alice,
        "create_responder",
        "alice-reg",
        json!({"name": "alice", "accesskeys": ["k1"], "description": "desk"}),
    )
    .await;
    let ack = recv(&mut alice).await;
    assert_eq!(ack["type"], "info");
    assert_eq!(ack["conv"], "alice-reg");

    send(
        &mut bob,
        "create_initiator",
        "bob-reg",
        json!({"name": "bob", "targetname": "alice", "targetaccesskey": "k1", "sdp": "v=0 offer"}),
    )
    .await;
    let ack = recv(&mut bob).await;
    assert_eq!(ack["type"], "info");
    assert_eq!(ack["conv"], "bob-reg");

    let offer = recv(&mut alice).await;
    assert_eq!(offer["type"], "offer");
    assert_eq!(offer["conv"], "alice-reg");
    assert_eq!(offer["data"]["initiator"], "bob");
    assert_eq!(offer["data"]["sdp"], "v=0 offer");
    let exchange_id = offer["data"]["id"].as_str().unwrap().to_string();

    send(
        &mut alice,
        "offer_answer",
        "alice-ans",
        json!({"exchangeid": exchange_id, "sdp": "v=0 answer"}),
    )
    .await;

    let answer = recv(&mut bob).await;
    assert_eq!(answer["type"], "agreement_answer");
    assert_eq!(answer["conv"], "bob-reg");
    assert_eq!(answer["data"]["exchangeid"], exchange_id.as_str());
    assert_eq!(answer["data"]["sdp"], "v=0 answer");

    let ack = recv(&mut alice).await;
    assert_eq!(ack["type"], "info");
    assert_eq!(ack["conv"], "alice-ans");

    // Second answer for the same exchange
    send(
        &mut alice,
        "offer_answer",
        "again",
        json!({"exchangeid": exchange_id, "sdp": "x"}),
    )
    .await;
    let err = recv(&mut alice).await;
    assert_eq!(err["type"], "error");
    assert_eq!(err["conv"], "again");
    assert_eq!(err["data"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_denied_initiator_gets_failed_offer() {
    let server = start_server("").await;
    let mut alice = connect(server.addr).await;
    let mut bob = connect(server.addr).await;

    send(
        &mut alice,
        "create_responder",
        "a",
        json!({"name": "alice", "accesskey": "right"}),
    )
    .await;
    recv(&mut alice).await;

    send(
        &mut bob,
        "create_initiator",
        "b",
        json!({"name": "bob", "targetname": "alice", "targetaccesskey": "wrong", "sdp": "v=0"}),
    )
    .await;
    let failed = recv(&mut bob).await;
    assert_eq!(failed["type"], "offer_failed");
    assert_eq!(failed["conv"], "b");
    assert_eq!(failed["data"]["code"], "ACCESS_DENIED");
}

#[tokio::test]
async fn test_unknown_message_keeps_connection_open() {
    let server = start_server("").await;
    let mut ws = connect(server.addr).await;

    ws.send(Message::Text("{garbage".into())).await.unwrap();
    let err = recv(&mut ws).await;
    assert_eq!(err["type"], "error");
    assert_eq!(err["data"]["code"], "VALIDATION");

    send(&mut ws, "find_answerer", "q", json!({})).await;
    let err = recv(&mut ws).await;
    assert_eq!(err["conv"], "q");

    send(&mut ws, "create_responder", "r", json!({"name": "still-here"})).await;
    assert_eq!(recv(&mut ws).await["type"], "info");
}

#[tokio::test]
async fn test_reregistration_closes_previous_socket() {
    let server = start_server("").await;
    let mut first = connect(server.addr).await;
    let mut second = connect(server.addr).await;

    send(&mut first, "create_responder", "1", json!({"name": "alice"})).await;
    recv(&mut first).await;
    send(&mut second, "create_responder", "2", json!({"name": "alice"})).await;
    recv(&mut second).await;

    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match first.next().await {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => return true,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await
    .unwrap();
    assert!(closed);
}

#[tokio::test]
async fn test_secret_required_when_configured() {
    let server = start_server("s3cret").await;

    let refused = connect_async(format!("ws://{}/hub", server.addr)).await;
    match refused {
        Err(tokio_tungstenite::tungstenite::Error::Http(resp)) => {
            assert_eq!(resp.status().as_u16(), 401);
        }
        Err(e) => panic!("expected 401, got {e}"),
        Ok(_) => panic!("upgrade without secret was accepted"),
    }

    let (mut ws, _) = connect_async(format!("ws://{}/hub?secret=s3cret", server.addr))
        .await
        .unwrap();
    send(&mut ws, "create_responder", "c", json!({"name": "alice"})).await;
    assert_eq!(recv(&mut ws).await["type"], "info");
}

#[tokio::test]
async fn test_http_preview_and_health() {
    let server = start_server("s3cret").await;
    let (mut ws, _) = connect_async(format!("ws://{}/hub?secret=s3cret", server.addr))
        .await
        .unwrap();
    send(
        &mut ws,
        "create_responder",
        "c",
        json!({"name": "alice", "accesskeys": ["hidden-key"], "description": "lab camera"}),
    )
    .await;
    recv(&mut ws).await;

    let body = http_get(server.addr, "/responders").await;
    assert!(body.starts_with("HTTP/1.1 200"));
    assert!(body.contains("\"name\":\"alice\""));
    assert!(body.contains("\"protected\":true"));
    assert!(body.contains("lab camera"));
    assert!(!body.contains("hidden-key"));

    let body = http_get(server.addr, "/health").await;
    assert!(body.starts_with("HTTP/1.1 200"));
    assert!(body.contains("timestamp_ms"));
}
