use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::select;
use tokio::sync::{Notify, RwLock};
use tracing::{error, info, warn};

use crate::checksum::Checksum;
use crate::container::Container;
use crate::dispatch::ServerCore;
use crate::error::{map_bind_error, Error, Result};
use crate::hooks::{Hook, HookRegistry};
use crate::request::{Request, RequestBuilder};
use crate::routing::route::normalize;
use crate::routing::Handler;
use crate::scheduler::TaskManager;
use crate::udp::codec::{self, MAX_DATAGRAM_SIZE};
use crate::udp::reassembly::{FragmentKey, FragmentStore, InsertOutcome};

/// Route-based messaging over UDP datagrams.
///
/// Outbound messages are fragmented into size-bounded datagrams; inbound datagrams are
/// reassembled per `(sender, route checksum, message checksum)` before dispatch. Delivery is
/// strictly best effort: lost or half-received messages are invisible to handlers by design.
pub struct UdpServer {
    core: Arc<ServerCore>,
    store: Arc<FragmentStore>,
    bound: RwLock<Option<BoundSocket>>,
    active: AtomicBool,
}

/// one boot's socket and its private shutdown signal; a later boot gets a fresh pair, so a
/// straggling receive loop from an earlier boot can never consume the new loop's shutdown
struct BoundSocket {
    socket: Arc<UdpSocket>,
    shutdown: Arc<Notify>,
}

impl UdpServer {
    pub fn new() -> UdpServer {
        Self::with_global_hooks(None)
    }

    pub fn with_global_hooks(global_hooks: Option<Arc<HookRegistry>>) -> UdpServer {
        UdpServer {
            core: Arc::new(ServerCore::new(global_hooks)),
            store: Arc::new(FragmentStore::default()),
            bound: RwLock::new(None),
            active: AtomicBool::new(false),
        }
    }

    /// Binds the socket and starts the receive loop. Port 0 binds an ephemeral port, which is
    /// all a pure sender needs. Booting an already-bound server is a no-op; after a
    /// [UdpServer::shutdown] the server can boot again.
    pub async fn boot(&self, port: u16) -> Result<()> {
        let mut bound = self.bound.write().await;
        if bound.is_some() {
            return Ok(());
        }

        let socket = UdpSocket::bind(("0.0.0.0", port))
            .await
            .map_err(|e| map_bind_error(e, port))?;
        let socket = Arc::new(socket);
        let shutdown = Arc::new(Notify::new());

        *bound = Some(BoundSocket {
            socket: socket.clone(),
            shutdown: shutdown.clone(),
        });
        self.active.store(true, Ordering::SeqCst);

        tokio::spawn(recv_loop(
            socket,
            self.core.clone(),
            self.store.clone(),
            shutdown,
        ));
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
        let bound = self.bound.read().await;
        bound.as_ref().and_then(|b| b.socket.local_addr().ok())
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

    pub async fn forget(&self, route: &str) {
        self.core.forget(route).await;
    }

    pub async fn middleware(&self, route_or_wildcard: &str, hook: Arc<dyn Hook>) {
        self.core.middleware(route_or_wildcard, hook).await;
    }

    pub fn deps(&self) -> &Container {
        self.core.deps()
    }

    /// Encodes the message into datagrams and sends them to `target` (`ip:port`; the alias
    /// `all` broadcasts). Before-hooks run on the outbound request prior to encoding and may
    /// replace the message; after-hooks run once all datagrams are flushed.
    pub async fn send(
        &self,
        route: &str,
        target: &str,
        message: &str,
        headers: &[(&str, &str)],
    ) -> Result<()> {
        if self.bound.read().await.is_none() {
            self.boot(0).await?;
        }

        let addr = match target.strip_prefix("all:") {
            Some(port) => crate::util::parse_target(&format!("255.255.255.255:{port}"))?,
            None => crate::util::parse_target(target)?,
        };

        let route = normalize(route);
        let headers: Vec<(String, String)> = headers
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let mut request = RequestBuilder::new()
            .route(&route)
            .message(message)
            .sender(addr)
            .headers(headers.iter().map(|(k, v)| (k.clone(), v.clone())))
            .build();
        self.core.run_before(&mut request).await?;

        let datagrams = codec::encode(&route, request.message(), &headers)?;

        let socket = {
            let bound = self.bound.read().await;
            match bound.as_ref() {
                Some(bound) => bound.socket.clone(),
                None => {
                    return Err(Error::InvalidArgument(
                        "server was shut down while sending".to_string(),
                    ))
                }
            }
        };

        let broadcast = matches!(addr.ip(), IpAddr::V4(ip) if ip.is_broadcast());
        if broadcast {
            socket.set_broadcast(true)?;
        }
        for datagram in &datagrams {
            socket.send_to(datagram.as_bytes(), addr).await?;
        }
        if broadcast {
            socket.set_broadcast(false)?;
        }

        self.core.run_after(&mut request).await?;
        Ok(())
    }
}

impl Default for UdpServer {
    fn default() -> Self {
        Self::new()
    }
}

async fn recv_loop(
    socket: Arc<UdpSocket>,
    core: Arc<ServerCore>,
    store: Arc<FragmentStore>,
    shutdown: Arc<Notify>,
) {
    info!("listening for datagrams on {:?}", socket.local_addr().ok());

    loop {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE + 1];
        select! {
            _ = shutdown.notified() => {
                info!("shutting down receiver");
                break;
            }
            received = socket.recv_from(&mut buf) => match received {
                Ok((len, sender)) => {
                    if len > MAX_DATAGRAM_SIZE {
                        warn!("datagram from {} exceeds {} bytes - skipping", sender, MAX_DATAGRAM_SIZE);
                        continue;
                    }
                    buf.truncate(len);
                    tokio::spawn(handle_datagram(buf, sender, core.clone(), store.clone()));
                }
                Err(e) => {
                    error!("error receiving datagram: {}", e);
                }
            }
        }
    }
}

/// One received datagram: decode, reassemble, dispatch. Every failure is isolated to this
/// datagram and logged - the receive loop and other in-flight reassembly are unaffected.
async fn handle_datagram(
    datagram: Vec<u8>,
    sender: SocketAddr,
    core: Arc<ServerCore>,
    store: Arc<FragmentStore>,
) {
    let fragment = match codec::decode(&datagram) {
        Ok(fragment) => fragment,
        Err(e) => {
            warn!("dropping undecodable datagram from {}: {}", sender, e);
            return;
        }
    };

    if fragment.count == 1 {
        // short-circuit: no store entry for single-fragment messages
        dispatch_message(
            core,
            fragment.route_checksum,
            fragment.payload,
            fragment.headers,
            sender,
        )
        .await;
        return;
    }

    let key = FragmentKey {
        sender,
        route_checksum: fragment.route_checksum,
        message_checksum: fragment.message_checksum,
    };

    match store.insert(key, fragment.seq, fragment.count, fragment.payload) {
        InsertOutcome::Completed(message) => {
            dispatch_message(core, fragment.route_checksum, message, fragment.headers, sender)
                .await;
        }
        InsertOutcome::Pending { fresh: true } => {
            let store = store.clone();
            TaskManager::after(store.timeout()).once(move || async move {
                store.evict_if_incomplete(&key);
            });
        }
        InsertOutcome::Pending { fresh: false } => {}
    }
}

async fn dispatch_message(
    core: Arc<ServerCore>,
    route_checksum: Checksum,
    message: String,
    headers: Vec<(String, String)>,
    sender: SocketAddr,
) {
    let id = route_checksum.to_string();

    let path = {
        let router = core.router().read().await;
        match router.resolve(&id) {
            Ok(path) => path,
            Err(e) => {
                warn!("cannot resolve route checksum {} from {}: {}", id, sender, e);
                return;
            }
        }
    };

    let mut request = RequestBuilder::new()
        .route(&path)
        .message(message)
        .sender(sender)
        .headers(headers)
        .build();

    core.dispatch_logged(&id, &mut request).await;
}