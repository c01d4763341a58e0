//! End-to-end exchange tests
//!
//! Runs a real server on an ephemeral loopback port and drives it with the
//! shared client or with raw frames.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chatwire::server::ActiveConnections;
use chatwire::wire::{Control, Status, actions, encode_value};
use chatwire::{
    ActionHandler, ActionRegistry, ChatClient, ClientConfig, ConnectionManager, Reply, Request, Result, Server,
    ServerConfig, ShutdownHandle, WireError,
};
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

/// Running server plus the handles a test needs after `run` takes ownership
struct TestServer {
    addr: SocketAddr,
    shutdown: ShutdownHandle,
    active: ActiveConnections,
    registry: Arc<ActionRegistry>,
    task: JoinHandle<Result<()>>,
}

impl TestServer {
    async fn start(config: ServerConfig, registry: ActionRegistry) -> Self {
        let server = Server::bind(config, registry).await.unwrap();
        let addr = server.local_addr().unwrap();
        let shutdown = server.shutdown_handle();
        let active = server.active_connections();
        let registry = server.registry();
        let task = tokio::spawn(server.run());
        Self {
            addr,
            shutdown,
            active,
            registry,
            task,
        }
    }

    fn client_config(&self) -> ClientConfig {
        ClientConfig::new("127.0.0.1", self.addr.port()).with_retries(3, Duration::from_millis(50))
    }

    fn client(&self) -> ChatClient {
        ChatClient::new(Arc::new(ConnectionManager::new(self.client_config())))
    }

    async fn stop(self) {
        self.shutdown.shutdown();
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("server did not stop")
            .unwrap()
            .unwrap();
    }
}

/// Handler that sleeps before answering
struct SlowHandler {
    delay: Duration,
}

#[async_trait]
impl ActionHandler for SlowHandler {
    async fn handle(&self, _request: Request) -> Result<Reply> {
        tokio::time::sleep(self.delay).await;
        Ok(Reply::status(Status::SUCCESS))
    }
}

/// Handler that sleeps, then answers with its first param
struct DelayedEcho {
    delay: Duration,
}

#[async_trait]
impl ActionHandler for DelayedEcho {
    async fn handle(&self, request: Request) -> Result<Reply> {
        tokio::time::sleep(self.delay).await;
        let value: Value = request.param(0)?;
        Ok(Reply::success(value))
    }
}

fn stub_registry(spec: chatwire::ActionSpec, reply: Vec<Value>) -> ActionRegistry {
    let mut registry = ActionRegistry::new();
    registry
        .register(spec, chatwire::server::StubHandler::new(reply))
        .unwrap();
    registry
}

/// GET_FRIENDS answers with the user id it was asked about
fn echo_registry() -> ActionRegistry {
    let mut registry = ActionRegistry::new();
    registry
        .register_fn(actions::GET_FRIENDS, |request| {
            let user_id: i64 = request.param(0)?;
            Ok(Reply::success(json!(user_id)))
        })
        .unwrap();
    registry
}

fn unused_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn write_raw(stream: &mut TcpStream, value: Value) {
    stream.write_all(&encode_value(&value).unwrap()).await.unwrap();
}

async fn write_corrupt(stream: &mut TcpStream) {
    let garbage = b"{{{";
    stream.write_all(&(garbage.len() as u32).to_be_bytes()).await.unwrap();
    stream.write_all(garbage).await.unwrap();
}

async fn read_raw(stream: &mut TcpStream) -> Value {
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await.unwrap();
    let mut body = vec![0u8; u32::from_be_bytes(header) as usize];
    stream.read_exact(&mut body).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

async fn wait_until<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached");
}

#[tokio::test]
async fn test_concurrent_callers_get_their_own_replies() {
    let server = TestServer::start(ServerConfig::local(), echo_registry()).await;
    let client = server.client();

    let mut tasks = Vec::new();
    for user_id in 0..32i64 {
        let client = client.clone();
        tasks.push(tokio::spawn(async move {
            let response = client.get_friends(user_id).await.unwrap();
            (user_id, response)
        }));
    }

    for task in tasks {
        let (user_id, response) = task.await.unwrap();
        assert!(response.is_success());
        assert_eq!(response.payload_as::<i64>().unwrap(), Some(user_id));
    }

    assert_eq!(server.registry.dispatch_count(), 32);
    client.manager().disconnect().await;
    server.stop().await;
}

#[tokio::test]
async fn test_ping_is_answered_without_dispatch() {
    let server = TestServer::start(ServerConfig::local(), echo_registry()).await;
    let client = server.client();

    for _ in 0..3 {
        assert!(client.ping().await.unwrap());
    }
    assert_eq!(server.registry.dispatch_count(), 0);

    client.manager().disconnect().await;
    server.stop().await;
}

#[tokio::test]
async fn test_unknown_action_keeps_connection_open() {
    let server = TestServer::start(ServerConfig::local(), echo_registry()).await;
    let manager = ConnectionManager::new(server.client_config());

    let values = manager.send_request_and_read("NOPE", &[], 1).await.unwrap();
    assert_eq!(values, vec![json!(Control::UNKNOWN_ACTION)]);

    let values = manager.send_request_and_read(Control::PING, &[], 1).await.unwrap();
    assert_eq!(values, vec![json!(Control::PONG)]);
    assert!(manager.is_connected());

    manager.disconnect().await;
    server.stop().await;
}

#[tokio::test]
async fn test_corrupt_action_frame_is_skipped() {
    let server = TestServer::start(ServerConfig::local(), echo_registry()).await;
    let mut stream = TcpStream::connect(server.addr).await.unwrap();

    write_corrupt(&mut stream).await;
    // A non-string action token is skipped the same way
    write_raw(&mut stream, json!(42)).await;
    write_raw(&mut stream, json!(Control::PING)).await;
    assert_eq!(read_raw(&mut stream).await, json!(Control::PONG));

    drop(stream);
    server.stop().await;
}

#[tokio::test]
async fn test_corrupt_param_gets_malformed_request() {
    let server = TestServer::start(ServerConfig::local(), echo_registry()).await;
    let mut stream = TcpStream::connect(server.addr).await.unwrap();

    write_raw(&mut stream, json!("GET_FRIENDS")).await;
    write_corrupt(&mut stream).await;
    assert_eq!(read_raw(&mut stream).await, json!(Status::MALFORMED_REQUEST));
    assert_eq!(read_raw(&mut stream).await, Value::Null);

    write_raw(&mut stream, json!(Control::PING)).await;
    assert_eq!(read_raw(&mut stream).await, json!(Control::PONG));
    assert_eq!(server.registry.dispatch_count(), 0);

    drop(stream);
    server.stop().await;
}

#[tokio::test]
async fn test_wrongly_typed_param_gets_padded_reply() {
    let server = TestServer::start(ServerConfig::local(), echo_registry()).await;
    let manager = ConnectionManager::new(server.client_config());

    let values = manager
        .send_request_and_read("GET_FRIENDS", &[json!("not-a-number")], 2)
        .await
        .unwrap();
    assert_eq!(values, vec![json!(Status::MALFORMED_REQUEST), Value::Null]);
    assert!(manager.is_connected());

    manager.disconnect().await;
    server.stop().await;
}

#[tokio::test]
async fn test_login_stub_reports_success() {
    let registry = stub_registry(
        actions::LOGIN,
        vec![json!(Status::SUCCESS), json!({"id": 7, "email": "a@b.com"})],
    );
    let server = TestServer::start(ServerConfig::local(), registry).await;
    let client = server.client();

    let response = client.login("a@b.com", "hunter2").await.unwrap();
    assert_eq!(response.status(), Some(Status::SUCCESS));
    assert_eq!(response.payload().unwrap()["id"], json!(7));

    client.manager().disconnect().await;
    server.stop().await;
}

#[tokio::test]
async fn test_reply_arity_violation_closes_connection() {
    let mut registry = ActionRegistry::new();
    registry
        .register_fn(actions::VERIFY, |_| Ok(Reply::success(json!("extra"))))
        .unwrap();
    let server = TestServer::start(ServerConfig::local(), registry).await;
    let client = server.client();

    let err = client.verify("a@b.com", "123456").await.unwrap_err();
    assert!(matches!(err, WireError::Transport(_)));
    assert!(!client.manager().is_connected());
    wait_until(|| server.active.is_empty()).await;

    server.stop().await;
}

#[tokio::test]
async fn test_disconnect_removes_active_connection() {
    let server = TestServer::start(ServerConfig::local(), echo_registry()).await;
    let client = server.client();

    assert!(client.ping().await.unwrap());
    assert_eq!(server.active.len(), 1);

    client.manager().disconnect().await;
    assert!(!client.manager().is_connected());
    wait_until(|| server.active.is_empty()).await;

    server.stop().await;
}

#[tokio::test]
async fn test_connect_gives_up_after_retries() {
    let port = unused_port();
    let manager = ConnectionManager::new(ClientConfig::new("127.0.0.1", port).with_retries(3, Duration::from_millis(100)));

    let started = Instant::now();
    let err = manager.connect().await.unwrap_err();
    let elapsed = started.elapsed();

    match err {
        WireError::Connection { attempts, .. } => assert_eq!(attempts, 3),
        other => panic!("expected connection error, got {}", other),
    }
    // Two sleeps between three attempts, none after the last
    assert!(elapsed >= Duration::from_millis(200));
    assert!(elapsed < Duration::from_secs(2));
    assert!(!manager.is_connected());
}

#[tokio::test]
async fn test_connect_succeeds_when_server_comes_up_late() {
    let port = unused_port();
    let starter = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        let config = ServerConfig {
            port,
            ..ServerConfig::local()
        };
        TestServer::start(config, echo_registry()).await
    });

    let manager = ConnectionManager::new(ClientConfig::new("127.0.0.1", port).with_retries(3, Duration::from_millis(400)));
    manager.connect().await.unwrap();
    assert!(manager.is_connected());

    let server = starter.await.unwrap();
    manager.disconnect().await;
    server.stop().await;
}

#[tokio::test]
async fn test_shutdown_closes_all_connections() {
    let server = TestServer::start(ServerConfig::local(), echo_registry()).await;
    let clients: Vec<ChatClient> = (0..3).map(|_| server.client()).collect();

    for client in &clients {
        assert!(client.ping().await.unwrap());
    }
    assert_eq!(server.active.len(), 3);

    let active = server.active.clone();
    server.stop().await;
    assert!(active.is_empty());

    for client in &clients {
        assert!(client.ping().await.is_err());
    }
}

#[tokio::test]
async fn test_shutdown_aborts_slow_handler_after_grace() {
    let mut registry = ActionRegistry::new();
    registry
        .register(
            actions::VERIFY,
            SlowHandler {
                delay: Duration::from_secs(30),
            },
        )
        .unwrap();
    let config = ServerConfig::local().with_shutdown_grace(Duration::from_millis(200));
    let server = TestServer::start(config, registry).await;
    let client = server.client();

    let pending = {
        let client = client.clone();
        tokio::spawn(async move { client.verify("a@b.com", "123456").await })
    };
    let registry = Arc::clone(&server.registry);
    wait_until(move || registry.dispatch_count() == 1).await;

    let started = Instant::now();
    server.stop().await;
    assert!(started.elapsed() < Duration::from_secs(5));

    assert!(pending.await.unwrap().is_err());
}

#[tokio::test]
async fn test_saturated_server_delays_instead_of_rejecting() {
    let config = ServerConfig::local().with_max_workers(1);
    let server = TestServer::start(config, echo_registry()).await;

    let first = server.client();
    assert!(first.ping().await.unwrap());

    let second = server.client();
    let waiting = {
        let second = second.clone();
        tokio::spawn(async move { second.ping().await })
    };

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!waiting.is_finished());

    first.manager().disconnect().await;
    let answered = tokio::time::timeout(Duration::from_secs(5), waiting)
        .await
        .expect("second client never served")
        .unwrap()
        .unwrap();
    assert!(answered);

    second.manager().disconnect().await;
    server.stop().await;
}

#[tokio::test]
async fn test_response_timeout_drops_connection() {
    let mut registry = ActionRegistry::new();
    registry
        .register(
            actions::VERIFY,
            SlowHandler {
                delay: Duration::from_secs(2),
            },
        )
        .unwrap();
    let server = TestServer::start(ServerConfig::local(), registry).await;
    let manager = Arc::new(ConnectionManager::new(
        server.client_config().with_response_timeout(Duration::from_millis(100)),
    ));
    let client = ChatClient::new(manager.clone());

    match client.verify("a@b.com", "123456").await {
        Err(WireError::Transport(e)) => assert_eq!(e.kind(), std::io::ErrorKind::TimedOut),
        other => panic!("expected timeout, got {:?}", other.map(|_| ())),
    }
    assert!(!manager.is_connected());

    server.stop().await;
}

#[tokio::test]
async fn test_cancelled_exchange_does_not_leak_reply_to_next_caller() {
    let mut registry = ActionRegistry::new();
    registry
        .register(
            actions::GET_FRIENDS,
            DelayedEcho {
                delay: Duration::from_millis(300),
            },
        )
        .unwrap();
    let server = TestServer::start(ServerConfig::local(), registry).await;
    let manager = ConnectionManager::new(server.client_config());

    let abandoned = tokio::time::timeout(
        Duration::from_millis(50),
        manager.send_request_and_read("GET_FRIENDS", &[json!(111)], 2),
    )
    .await;
    assert!(abandoned.is_err());

    let values = manager
        .send_request_and_read("GET_FRIENDS", &[json!(222)], 2)
        .await
        .unwrap();
    assert_eq!(values, vec![json!(Status::SUCCESS), json!(222)]);

    // The split path refuses to read from the abandoned stream as well
    let _ = tokio::time::timeout(
        Duration::from_millis(50),
        manager.send_request_and_read("GET_FRIENDS", &[json!(333)], 2),
    )
    .await;
    assert!(matches!(manager.read_response().await, Err(WireError::NotConnected)));

    manager.disconnect().await;
    server.stop().await;
}

#[tokio::test]
async fn test_split_send_and_read_leaves_nothing_pending() {
    let server = TestServer::start(ServerConfig::local(), stub_registry(actions::VERIFY, vec![json!(Status::SUCCESS)])).await;
    let manager = ConnectionManager::new(server.client_config());

    manager
        .send_request("VERIFY", &[json!("a@b.com"), json!("123456")])
        .await
        .unwrap();
    assert_eq!(manager.read_response().await.unwrap(), json!(Status::SUCCESS));

    // The next reply on the stream belongs to the next request
    let values = manager.send_request_and_read(Control::PING, &[], 1).await.unwrap();
    assert_eq!(values, vec![json!(Control::PONG)]);

    manager.disconnect().await;
    server.stop().await;
}

#[tokio::test]
async fn test_short_login_stub_breaks_contract() {
    // LOGIN always replies with two values; a bare status is a handler fault
    let server = TestServer::start(ServerConfig::local(), stub_registry(actions::LOGIN, vec![json!(Status::SUCCESS)])).await;
    let manager = ConnectionManager::new(server.client_config());

    manager
        .send_request("LOGIN", &[json!("a@b.com"), json!("hunter2")])
        .await
        .unwrap();
    assert!(matches!(manager.read_response().await, Err(WireError::Transport(_))));
    assert!(!manager.is_connected());

    server.stop().await;
}

#[tokio::test]
async fn test_idle_connection_is_closed_after_read_timeout() {
    let config = ServerConfig::local().with_read_timeout(Duration::from_millis(100));
    let server = TestServer::start(config, echo_registry()).await;
    let mut stream = TcpStream::connect(server.addr).await.unwrap();

    let mut buf = [0u8; 1];
    let read = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf))
        .await
        .expect("server never closed the idle connection")
        .unwrap();
    assert_eq!(read, 0);
    wait_until(|| server.active.is_empty()).await;

    server.stop().await;
}
