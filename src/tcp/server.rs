use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::select;
use tokio::sync::{Notify, RwLock};
use tracing::{debug, error, info, warn};

use crate::container::Container;
use crate::dispatch::ServerCore;
use crate::error::{map_bind_error, Result};
use crate::hooks::{Hook, HookRegistry};
use crate::request::{Replier, Request, RequestBuilder};
use crate::routing::{DuplexHandler, Handler, HandlerKind};
use crate::tcp::framer::{self, Frame};

/// Sentinel body a client sends to upgrade the connection into a duplex session instead of a
/// one-shot request.
pub const DIRECT_CONNECTION_OPEN: &str = "Direct-connection: open";

/// Route-based messaging over TCP.
///
/// Each accepted connection carries one framed request. A regular request is dispatched through
/// the middleware pipeline to a message handler, which may reply on the same connection. A
/// request whose body is [DIRECT_CONNECTION_OPEN] instead upgrades the connection into a duplex
/// session driven by the route's [DuplexHandler], one line in, at most one line out, until
/// either side ends it.
pub struct TcpServer {
    core: Arc<ServerCore>,
    bound: RwLock<Option<BoundListener>>,
    active: AtomicBool,
}

/// one boot's listener address and its private shutdown signal; a later boot gets a fresh
/// pair, so a straggling accept loop from an earlier boot can never consume the new loop's
/// shutdown
struct BoundListener {
    addr: Option<SocketAddr>,
    shutdown: Arc<Notify>,
}

impl TcpServer {
    pub fn new() -> TcpServer {
        Self::with_global_hooks(None)
    }

    pub fn with_global_hooks(global_hooks: Option<Arc<HookRegistry>>) -> TcpServer {
        TcpServer {
            core: Arc::new(ServerCore::new(global_hooks)),
            bound: RwLock::new(None),
            active: AtomicBool::new(false),
        }
    }

    /// Binds the listener and starts the accept loop. Booting an already-bound server is a
    /// no-op; after a [TcpServer::shutdown] the server can boot again.
    pub async fn boot(&self, port: u16) -> Result<()> {
        let mut bound = self.bound.write().await;
        if bound.is_some() {
            return Ok(());
        }

        let listener = TcpListener::bind(("0.0.0.0", port))
            .await
            .map_err(|e| map_bind_error(e, port))?;
        let shutdown = Arc::new(Notify::new());

        *bound = Some(BoundListener {
            addr: listener.local_addr().ok(),
            shutdown: shutdown.clone(),
        });
        self.active.store(true, Ordering::SeqCst);

        tokio::spawn(accept_loop(listener, self.core.clone(), shutdown));
        Ok(())
    }

    pub async fn shutdown(&self) {
        if let Some(bound) = self.bound.write().await.take() {
            bound.shutdown.notify_one();
        }
        self.active.store(false, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.bound.read().await.as_ref().and_then(|b| b.addr)
    }

    pub async fn listen(&self, route: &str, handler: Arc<dyn Handler>) {
        self.core.listen(route, handler).await;
    }

    pub async fn listen_fn<F>(&self, route: &str, handler: F)
    where
        F: Fn(&Request) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.core.listen_fn(route, handler).await;
    }

    pub async fn listen_duplex(&self, route: &str, handler: Arc<dyn DuplexHandler>) {
        self.core.listen_duplex(route, handler).await;
    }

    pub async fn forget(&self, route: &str) {
        self.core.forget(route).await;
    }

    pub async fn middleware(&self, route_or_wildcard: &str, hook: Arc<dyn Hook>) {
        self.core.middleware(route_or_wildcard, hook).await;
    }

    pub fn deps(&self) -> &Container {
        self.core.deps()
    }
}

impl Default for TcpServer {
    fn default() -> Self {
        Self::new()
    }
}

async fn accept_loop(listener: TcpListener, core: Arc<ServerCore>, shutdown: Arc<Notify>) {
    info!("listening for connections on {:?}", listener.local_addr().ok());

    loop {
        select! {
            _ = shutdown.notified() => {
                info!("shutting down acceptor");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tokio::spawn(handle_connection(stream, peer, core.clone()));
                }
                Err(e) => {
                    error!("error accepting connection: {}", e);
                }
            }
        }
    }
}

/// One accepted connection. Failures are logged and end this connection only.
async fn handle_connection(stream: TcpStream, peer: SocketAddr, core: Arc<ServerCore>) {
    let (read_half, write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let replier = Replier::new(write_half);

    let frame = match framer::read_frame(&mut reader).await {
        Ok(Some(frame)) => frame,
        Ok(None) => return,
        Err(e) => {
            warn!("dropping connection from {}: {}", peer, e);
            return;
        }
    };

    if frame.body == DIRECT_CONNECTION_OPEN {
        run_duplex_session(frame, reader, replier, peer, core).await;
        return;
    }

    let mut request = RequestBuilder::new()
        .route(&frame.route)
        .message(frame.body)
        .sender(peer)
        .hostname(peer.ip().to_string())
        .headers(frame.headers)
        .replier(replier)
        .build();

    let id = frame.route.clone();
    core.dispatch_logged(&id, &mut request).await;
}

/// Duplex session: before-hooks run once on the opening request, then each incoming line is
/// handed to the route's [DuplexHandler]. `None` from the handler, EOF, or a handler error ends
/// the session; after-hooks run on the way out.
async fn run_duplex_session(
    frame: Frame,
    mut reader: BufReader<OwnedReadHalf>,
    replier: Replier,
    peer: SocketAddr,
    core: Arc<ServerCore>,
) {
    let handler = {
        let router = core.router().read().await;
        match router.handler_for(&frame.route) {
            Ok((_, HandlerKind::Duplex(handler))) => handler,
            Ok((path, HandlerKind::Message(_))) => {
                warn!(
                    "{} asked for a duplex session on {:?}, which holds a message handler",
                    peer, path
                );
                return;
            }
            Err(e) => {
                warn!("cannot open duplex session for {}: {}", peer, e);
                return;
            }
        }
    };

    let mut request = RequestBuilder::new()
        .route(&frame.route)
        .message(frame.body)
        .sender(peer)
        .hostname(peer.ip().to_string())
        .headers(frame.headers)
        .replier(replier.clone())
        .build();

    if let Err(e) = core.run_before(&mut request).await {
        warn!("middleware rejected duplex session from {}: {}", peer, e);
        return;
    }

    debug!("duplex session with {} open on {:?}", peer, request.route());

    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                warn!("duplex session with {} broke: {}", peer, e);
                break;
            }
        }
        let line = line.trim_end_matches(['\r', '\n']);

        match handler.exchange(line, &request).await {
            Ok(Some(reply)) => {
                if let Err(e) = replier.reply(&reply).await {
                    warn!("cannot reply to {}: {}", peer, e);
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!("duplex handler for {:?} failed: {}", request.route(), e);
                break;
            }
        }
    }

    if let Err(e) = core.run_after(&mut request).await {
        warn!("after-middleware failed closing duplex session from {}: {}", peer, e);
    }
    debug!("duplex session with {} closed", peer);
}
