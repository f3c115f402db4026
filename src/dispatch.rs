use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::warn;

use crate::container::Container;
use crate::error::{Error, Result};
use crate::hooks::{Hook, HookRegistry, Pipeline};
use crate::request::Request;
use crate::routing::{DuplexHandler, FnHandler, Handler, HandlerKind, Router};

/// Registries and dispatch glue shared by the UDP and TCP server facades: the route table,
/// the middleware pipeline and the dependency container, each guarded by its own coarse lock.
///
/// No lock is ever held while user code (handlers, hooks, providers) runs, so that code may
/// freely call back into its own server - listen, forget, register middleware or services.
pub struct ServerCore {
    router: RwLock<Router>,
    pipeline: Pipeline,
    deps: Container,
}

impl ServerCore {
    pub fn new(global_hooks: Option<Arc<HookRegistry>>) -> ServerCore {
        ServerCore {
            router: RwLock::new(Router::new()),
            pipeline: Pipeline::new(global_hooks),
            deps: Container::new(),
        }
    }

    pub async fn listen(&self, route: &str, handler: Arc<dyn Handler>) {
        self.router
            .write()
            .await
            .register(route, HandlerKind::Message(handler));
    }

    pub async fn listen_fn<F>(&self, route: &str, handler: F)
    where
        F: Fn(&Request) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.listen(route, Arc::new(FnHandler(handler))).await;
    }

    pub async fn listen_duplex(&self, route: &str, handler: Arc<dyn DuplexHandler>) {
        self.router
            .write()
            .await
            .register(route, HandlerKind::Duplex(handler));
    }

    /// removes the route and its route-scoped local middleware
    pub async fn forget(&self, route: &str) {
        self.router.write().await.remove(route);
        self.pipeline.local().remove_route(route).await;
    }

    pub async fn middleware(&self, route_or_wildcard: &str, hook: Arc<dyn Hook>) {
        self.pipeline.local().add(route_or_wildcard, hook).await;
    }

    pub fn router(&self) -> &RwLock<Router> {
        &self.router
    }

    pub fn deps(&self) -> &Container {
        &self.deps
    }

    pub async fn run_before(&self, request: &mut Request) -> Result<()> {
        self.pipeline.run_before(request, &self.deps).await
    }

    pub async fn run_after(&self, request: &mut Request) -> Result<()> {
        self.pipeline.run_after(request, &self.deps).await
    }

    /// Full inbound dispatch for one reconstructed message: before hooks, handler invocation,
    /// after hooks. Errors are returned to the caller, which logs and isolates them per
    /// message - a failing request never affects the receive loop or other requests.
    pub async fn dispatch(&self, id: &str, request: &mut Request) -> Result<()> {
        self.run_before(request).await?;

        // the read guard must be gone before the handler runs: a handler blocking on
        // router.write() while dispatch holds the read would wedge every later dispatch
        // behind the queued writer
        let handler = {
            let router = self.router.read().await;
            router.prepare(id, request)?
        };

        match handler {
            HandlerKind::Message(handler) => handler.run(request).await.map_err(Error::Handler)?,
            HandlerKind::Duplex(_) => {
                return Err(Error::InvalidArgument(format!(
                    "route {:?} holds a duplex handler and is only reachable over a direct TCP connection",
                    request.route()
                )))
            }
        }

        self.run_after(request).await
    }

    /// convenience used by the receive paths: dispatch and log instead of propagating
    pub async fn dispatch_logged(&self, id: &str, request: &mut Request) {
        if let Err(e) = self.dispatch(id, request).await {
            warn!("dispatch of {:?} from {} failed: {}", request.route(), request.sender(), e);
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::request::RequestBuilder;

    use super::*;

    struct Tag;

    #[async_trait]
    impl Hook for Tag {
        async fn before(
            &self,
            request: &mut Request,
            _deps: &Container,
        ) -> anyhow::Result<()> {
            request.set_message(format!("tagged:{}", request.message()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_dispatch_runs_hooks_around_handler() {
        let core = ServerCore::new(None);
        let seen = Arc::new(AtomicUsize::new(0));

        let s = seen.clone();
        core.listen_fn("chat", move |request| {
            assert_eq!(request.message(), "tagged:hi");
            s.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await;
        core.middleware("chat", Arc::new(Tag)).await;

        let mut request = RequestBuilder::new().route("chat").message("hi").build();
        core.dispatch("chat", &mut request).await.unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    /// handler that removes a route from the very server dispatching it
    struct RoutePruner {
        core: Arc<ServerCore>,
    }

    #[async_trait]
    impl Handler for RoutePruner {
        async fn run(&self, _request: &Request) -> anyhow::Result<()> {
            self.core.forget("other").await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_handler_may_modify_routes_mid_dispatch() {
        let core = Arc::new(ServerCore::new(None));
        core.listen_fn("other", |_| Ok(())).await;
        core.listen("prune", Arc::new(RoutePruner { core: core.clone() })).await;

        let mut request = RequestBuilder::new().route("prune").build();
        tokio::time::timeout(
            std::time::Duration::from_secs(5),
            core.dispatch("prune", &mut request),
        )
        .await
        .expect("dispatch must not hold the route table while the handler runs")
        .unwrap();

        assert!(!core.router().read().await.has("other"));
    }

    struct Registering;

    #[async_trait]
    impl Hook for Registering {
        async fn before(&self, _request: &mut Request, deps: &Container) -> anyhow::Result<()> {
            deps.singleton("seen", true);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_hook_may_register_services_mid_dispatch() {
        let core = ServerCore::new(None);
        core.listen_fn("chat", |_| Ok(())).await;
        core.middleware("chat", Arc::new(Registering)).await;

        let mut request = RequestBuilder::new().route("chat").message("hi").build();
        core.dispatch("chat", &mut request).await.unwrap();

        assert!(*core.deps().resolve_as::<bool>("seen").unwrap());
    }

    #[tokio::test]
    async fn test_forget_clears_route_and_middleware() {
        let core = ServerCore::new(None);
        core.listen_fn("chat", |_| Ok(())).await;
        core.middleware("chat", Arc::new(Tag)).await;

        core.forget("chat").await;

        let mut request = RequestBuilder::new().route("chat").message("hi").build();
        assert!(core.dispatch("chat", &mut request).await.is_err());
        // the route-scoped hook is gone as well: the message stays untagged
        assert_eq!(request.message(), "hi");
    }
}
