use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::Level;

use ampere::container::Container;
use ampere::request::Request;
use ampere::routing::{DuplexHandler, Handler};
use ampere::{Hook, TcpClient, TcpServer};

#[ctor::ctor]
fn init_test_logging() {
    tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .try_init()
        .ok();
}

async fn booted_server() -> (TcpServer, TcpClient) {
    let server = TcpServer::new();
    server.boot(0).await.unwrap();
    let port = server.local_addr().await.unwrap().port();
    let client = TcpClient::new(&format!("127.0.0.1:{}", port)).unwrap();
    (server, client)
}

struct Greeter;

#[async_trait]
impl Handler for Greeter {
    async fn run(&self, request: &Request) -> anyhow::Result<()> {
        request.reply(&format!("hello, {}", request.message())).await?;
        Ok(())
    }
}

#[tokio::test]
async fn test_one_shot_request_with_reply() {
    let (server, client) = booted_server().await;
    server.listen("greet", Arc::new(Greeter)).await;

    let reply = client.send("greet", "alice", &[]).await.unwrap();
    assert_eq!(reply.as_deref(), Some("hello, alice"));

    server.shutdown().await;
}

#[tokio::test]
async fn test_one_shot_request_without_reply() {
    let (server, client) = booted_server().await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    server
        .listen_fn("drop-box", move |request: &Request| {
            tx.send(request.message().to_string()).ok();
            Ok(())
        })
        .await;

    let reply = client.send("drop-box", "just store this", &[]).await.unwrap();
    assert_eq!(reply, None);

    let stored = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
    assert_eq!(stored, "just store this");

    server.shutdown().await;
}

#[tokio::test]
async fn test_headers_reach_the_handler() {
    let (server, client) = booted_server().await;

    struct HeaderEcho;

    #[async_trait]
    impl Handler for HeaderEcho {
        async fn run(&self, request: &Request) -> anyhow::Result<()> {
            request
                .reply(request.header_or("trace-id", "<unset>"))
                .await?;
            Ok(())
        }
    }

    server.listen("echo-header", Arc::new(HeaderEcho)).await;

    let reply = client
        .send("echo-header", "body", &[("trace-id", "abc-123")])
        .await
        .unwrap();
    assert_eq!(reply.as_deref(), Some("abc-123"));

    server.shutdown().await;
}

struct CountingSession;

#[async_trait]
impl DuplexHandler for CountingSession {
    async fn exchange(&self, line: &str, _request: &Request) -> anyhow::Result<Option<String>> {
        if line == "bye" {
            return Ok(None);
        }
        Ok(Some(format!("{} has {} chars", line, line.len())))
    }
}

#[tokio::test]
async fn test_direct_connection_conversation() {
    let (server, client) = booted_server().await;
    server.listen_duplex("session", Arc::new(CountingSession)).await;

    let mut conn = client.direct("session").await.unwrap();

    assert_eq!(
        conn.exchange("first").await.unwrap().as_deref(),
        Some("first has 5 chars")
    );
    assert_eq!(
        conn.exchange("second line").await.unwrap().as_deref(),
        Some("second line has 11 chars")
    );

    // the handler ends the session on "bye"; the server closes its end afterwards
    assert_eq!(conn.exchange("bye").await.unwrap(), None);

    server.shutdown().await;
}

#[tokio::test]
async fn test_direct_connection_needs_a_duplex_route() {
    let (server, client) = booted_server().await;
    server.listen("plain", Arc::new(Greeter)).await;

    let mut conn = client.direct("plain").await.unwrap();
    // the server refuses the upgrade and closes the connection; depending on timing the
    // client sees either a clean EOF or a reset while writing
    let outcome = conn.exchange("anyone there?").await;
    assert!(matches!(outcome, Ok(None) | Err(_)));

    server.shutdown().await;
}

struct Redactor;

#[async_trait]
impl Hook for Redactor {
    async fn before(&self, request: &mut Request, _deps: &Container) -> anyhow::Result<()> {
        let redacted = request.message().replace("secret", "[redacted]");
        request.set_message(redacted);
        Ok(())
    }
}

#[tokio::test]
async fn test_before_hook_runs_ahead_of_the_handler() {
    let (server, client) = booted_server().await;
    server.middleware("*", Arc::new(Redactor)).await;

    struct EchoBack;

    #[async_trait]
    impl Handler for EchoBack {
        async fn run(&self, request: &Request) -> anyhow::Result<()> {
            request.reply(request.message()).await?;
            Ok(())
        }
    }

    server.listen("echo", Arc::new(EchoBack)).await;

    let reply = client.send("echo", "the secret plan", &[]).await.unwrap();
    assert_eq!(reply.as_deref(), Some("the [redacted] plan"));

    server.shutdown().await;
}

/// handler that removes another route from the very server dispatching it
struct RoutePruner {
    server: Arc<TcpServer>,
}

#[async_trait]
impl Handler for RoutePruner {
    async fn run(&self, request: &Request) -> anyhow::Result<()> {
        self.server.forget("other").await;
        request.reply("pruned").await?;
        Ok(())
    }
}

#[tokio::test]
async fn test_handler_may_forget_routes_on_its_own_server() {
    let server = Arc::new(TcpServer::new());
    server.boot(0).await.unwrap();
    let port = server.local_addr().await.unwrap().port();
    let client = TcpClient::new(&format!("127.0.0.1:{}", port)).unwrap();

    server.listen_fn("other", |_| Ok(())).await;
    server
        .listen("prune", Arc::new(RoutePruner { server: server.clone() }))
        .await;

    // must complete: dispatch releases the route table before the handler runs
    let reply = timeout(Duration::from_secs(5), client.send("prune", "go", &[]))
        .await
        .expect("dispatch blocked on its own server's route table")
        .unwrap();
    assert_eq!(reply.as_deref(), Some("pruned"));

    // the forgotten route is gone for the next request
    let reply = client.send("other", "anyone?", &[]).await.unwrap();
    assert_eq!(reply, None);

    server.shutdown().await;
}

#[tokio::test]
async fn test_reboot_after_shutdown() {
    let server = TcpServer::new();
    server.boot(0).await.unwrap();
    server.shutdown().await;
    assert!(!server.is_active());

    server.boot(0).await.unwrap();
    assert!(server.is_active());
    server.listen("greet", Arc::new(Greeter)).await;

    let port = server.local_addr().await.unwrap().port();
    let client = TcpClient::new(&format!("127.0.0.1:{}", port)).unwrap();
    let reply = client.send("greet", "again", &[]).await.unwrap();
    assert_eq!(reply.as_deref(), Some("hello, again"));

    server.shutdown().await;
}

#[tokio::test]
async fn test_unknown_route_closes_without_reply() {
    let (server, client) = booted_server().await;

    let reply = client.send("nowhere", "lost", &[]).await.unwrap();
    assert_eq!(reply, None);

    server.shutdown().await;
}
