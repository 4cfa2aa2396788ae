//! End-to-end tests: a real listener, real WebSocket clients, the in-process queue.

use futures_util::{SinkExt, StreamExt};
use jsonwebtoken::{encode, EncodingKey, Header};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use surge_core::QueueClient;
use surge_protocol::OutboundMessage;
use surge_server::{config::Config, AppState, Server};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

const SECRET: &str = "test-secret";
const TIMEOUT: Duration = Duration::from_secs(5);

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestServer {
    addr: SocketAddr,
    state: Arc<AppState>,
    queue: Arc<surge_core::MemoryQueue>,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<anyhow::Result<()>>,
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.host = "127.0.0.1".into();
    config.port = 0;
    config.metrics.enabled = false;
    config.heartbeat.interval_ms = 60_000;
    config.queue.publish_destination = Some("inbound".into());
    config.queue.consume_source = Some("outbound".into());
    config.auth.jwt_secret = Some(SECRET.into());
    config
}

async fn start(config: Config) -> TestServer {
    let server = Server::bind(config).await.unwrap();
    let addr = server.local_addr().unwrap();
    let state = server.state();
    let queue = server.queue();

    let (shutdown, signal) = oneshot::channel::<()>();
    let task = tokio::spawn(server.run(async move {
        let _ = signal.await;
    }));

    TestServer {
        addr,
        state,
        queue,
        shutdown,
        task,
    }
}

fn token(secret: &str) -> String {
    encode(
        &Header::default(),
        &serde_json::json!({ "sub": "tester" }),
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}

async fn connect(addr: SocketAddr, bearer: Option<&str>) -> Result<Client, WsError> {
    let mut request = format!("ws://{addr}/").into_client_request()?;
    if let Some(token) = bearer {
        request.headers_mut().insert(
            "Authorization",
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
    }
    connect_async(request).await.map(|(ws, _)| ws)
}

async fn wait_for_connections(state: &AppState, n: usize) {
    tokio::time::timeout(TIMEOUT, async {
        while state.gateway.registry().len() != n {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

/// Next Text message, skipping keepalive traffic.
async fn next_text(client: &mut Client) -> String {
    tokio::time::timeout(TIMEOUT, async {
        loop {
            match client.next().await.unwrap().unwrap() {
                Message::Text(text) => return text,
                Message::Ping(_) | Message::Pong(_) => continue,
                other => panic!("unexpected message: {other:?}"),
            }
        }
    })
    .await
    .unwrap()
}

/// Next message that is not a server keepalive ping.
async fn next_non_ping(client: &mut Client) -> Message {
    loop {
        match client.next().await.unwrap().unwrap() {
            Message::Ping(_) => continue,
            other => return other,
        }
    }
}

#[tokio::test]
async fn test_missing_token_is_rejected() {
    let server = start(test_config()).await;

    match connect(server.addr, None).await {
        Err(WsError::Http(response)) => {
            assert_eq!(response.status(), 401);
            assert_eq!(
                response.headers().get("content-type").unwrap(),
                "application/json; charset=UTF-8"
            );
        }
        other => panic!("expected 401, got {:?}", other.map(|_| ())),
    }
    assert!(server.state.gateway.registry().is_empty());
}

#[tokio::test]
async fn test_invalid_token_is_rejected() {
    let server = start(test_config()).await;

    let result = connect(server.addr, Some(&token("wrong-secret"))).await;
    assert!(matches!(result, Err(WsError::Http(ref r)) if r.status() == 401));

    let result = connect(server.addr, Some("not-a-jwt")).await;
    assert!(matches!(result, Err(WsError::Http(ref r)) if r.status() == 401));
}

#[tokio::test]
async fn test_missing_secret_fails_startup() {
    let mut config = test_config();
    config.auth.jwt_secret = None;
    assert!(Server::bind(config).await.is_err());

    let mut config = test_config();
    config.auth.jwt_secret = Some(String::new());
    assert!(Server::bind(config).await.is_err());
}

#[tokio::test]
async fn test_client_text_is_published_trimmed() {
    let server = start(test_config()).await;
    let mut published = server.queue.subscribe("inbound").await.unwrap();

    let mut client = connect(server.addr, Some(&token(SECRET))).await.unwrap();
    wait_for_connections(&server.state, 1).await;

    client
        .send(Message::Text("hello\0\0\0".to_string()))
        .await
        .unwrap();

    let message = tokio::time::timeout(TIMEOUT, published.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(message.body, "hello");
}

#[tokio::test]
async fn test_queue_message_is_broadcast() {
    let server = start(test_config()).await;

    let mut first = connect(server.addr, Some(&token(SECRET))).await.unwrap();
    let mut second = connect(server.addr, Some(&token(SECRET))).await.unwrap();
    wait_for_connections(&server.state, 2).await;

    server
        .queue
        .push("outbound", OutboundMessage::new("42", "x"));

    for client in [&mut first, &mut second] {
        assert_eq!(next_text(client).await, r#"{"id":"42","body":"x"}"#);
    }
}

#[tokio::test]
async fn test_client_ping_gets_pong() {
    let server = start(test_config()).await;
    let mut client = connect(server.addr, Some(&token(SECRET))).await.unwrap();
    wait_for_connections(&server.state, 1).await;

    client.send(Message::Ping(b"hi".to_vec())).await.unwrap();

    // The gateway's reply replaces the WebSocket layer's automatic echo,
    // so exactly one Pong arrives.
    let pong = tokio::time::timeout(TIMEOUT, next_non_ping(&mut client))
        .await
        .unwrap();
    assert_eq!(pong, Message::Pong(b"pong".to_vec()));

    let extra = tokio::time::timeout(Duration::from_millis(200), next_non_ping(&mut client)).await;
    assert!(extra.is_err(), "unexpected second reply: {extra:?}");
}

#[tokio::test]
async fn test_server_pings_on_connect() {
    let server = start(test_config()).await;
    let mut client = connect(server.addr, Some(&token(SECRET))).await.unwrap();

    let message = tokio::time::timeout(TIMEOUT, client.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(message, Message::Ping(b"ping".to_vec()));
}

#[tokio::test]
async fn test_client_close_unlinks() {
    let server = start(test_config()).await;
    let mut client = connect(server.addr, Some(&token(SECRET))).await.unwrap();
    wait_for_connections(&server.state, 1).await;

    client.close(None).await.unwrap();
    wait_for_connections(&server.state, 0).await;
}

#[tokio::test]
async fn test_health_endpoint() {
    let server = start(test_config()).await;
    let _client = connect(server.addr, Some(&token(SECRET))).await.unwrap();
    wait_for_connections(&server.state, 1).await;

    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    stream
        .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();

    let mut response = String::new();
    tokio::time::timeout(TIMEOUT, stream.read_to_string(&mut response))
        .await
        .unwrap()
        .unwrap();

    assert!(response.starts_with("HTTP/1.1 200 OK"), "{response}");
    assert!(response.contains(r#""status":"ok""#));
    assert!(response.contains(r#""connections":1"#));
}

#[tokio::test]
async fn test_shutdown_closes_clients() {
    let server = start(test_config()).await;
    let mut client = connect(server.addr, Some(&token(SECRET))).await.unwrap();
    wait_for_connections(&server.state, 1).await;

    server.shutdown.send(()).unwrap();

    let closed = tokio::time::timeout(TIMEOUT, async {
        loop {
            match client.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(closed.is_ok());

    tokio::time::timeout(TIMEOUT, server.task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(server.state.gateway.registry().is_empty());
}

#[tokio::test]
async fn test_bind_conflict_fails() {
    let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let mut config = test_config();
    config.port = taken.local_addr().unwrap().port();

    assert!(Server::bind(config).await.is_err());
}
