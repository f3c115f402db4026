use std::sync::Arc;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use tokio::sync::RwLock;

use crate::container::Container;
use crate::error::{Error, Result};
use crate::request::Request;

pub const WILDCARD: &str = "*";

/// Before/after hook around route dispatch. Hooks may mutate the request's message (e.g.
/// decrypt it) and resolve collaborators from the container; they must not assume they are
/// the only registered hook. The pipeline does not enforce timeouts - not blocking
/// indefinitely is a hook implementor's responsibility.
#[async_trait]
pub trait Hook: Send + Sync + 'static {
    async fn before(&self, _request: &mut Request, _deps: &Container) -> anyhow::Result<()> {
        Ok(())
    }

    async fn after(&self, _request: &mut Request, _deps: &Container) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Ordered hook lists keyed by route pattern or the `"*"` wildcard. Registries are explicit
/// objects: every server owns a local one and may share a global one, so tests can
/// instantiate independent registries instead of touching process-wide state.
#[derive(Default)]
pub struct HookRegistry {
    hooks: RwLock<FxHashMap<String, Vec<Arc<dyn Hook>>>>,
}

impl HookRegistry {
    pub fn new() -> HookRegistry {
        Default::default()
    }

    pub async fn add(&self, route: &str, hook: Arc<dyn Hook>) {
        self.hooks
            .write()
            .await
            .entry(route.to_string())
            .or_default()
            .push(hook);
    }

    pub async fn remove_route(&self, route: &str) {
        self.hooks.write().await.remove(route);
    }

    /// snapshot of the hook list for one key, in registration order
    async fn hooks_for(&self, route: &str) -> Vec<Arc<dyn Hook>> {
        self.hooks
            .read()
            .await
            .get(route)
            .cloned()
            .unwrap_or_default()
    }
}

enum Phase {
    Before,
    After,
}

/// Runs before/after hooks across the four scopes in fixed order: server-local wildcard,
/// server-local route, global wildcard, global route. The same order applies to both phases.
pub struct Pipeline {
    local: HookRegistry,
    global: Option<Arc<HookRegistry>>,
}

impl Pipeline {
    pub fn new(global: Option<Arc<HookRegistry>>) -> Pipeline {
        Pipeline {
            local: HookRegistry::new(),
            global,
        }
    }

    pub fn local(&self) -> &HookRegistry {
        &self.local
    }

    pub async fn run_before(&self, request: &mut Request, deps: &Container) -> Result<()> {
        self.run(Phase::Before, request, deps).await
    }

    pub async fn run_after(&self, request: &mut Request, deps: &Container) -> Result<()> {
        self.run(Phase::After, request, deps).await
    }

    async fn run(&self, phase: Phase, request: &mut Request, deps: &Container) -> Result<()> {
        let route = request.route().to_string();

        let mut scopes = Vec::with_capacity(4);
        scopes.push(self.local.hooks_for(WILDCARD).await);
        scopes.push(self.local.hooks_for(&route).await);
        if let Some(global) = &self.global {
            scopes.push(global.hooks_for(WILDCARD).await);
            scopes.push(global.hooks_for(&route).await);
        }

        for hooks in scopes {
            for hook in hooks {
                let outcome = match phase {
                    Phase::Before => hook.before(request, deps).await,
                    Phase::After => hook.after(request, deps).await,
                };
                outcome.map_err(Error::Handler)?;
            }
        }
        Ok(())
    }
}
