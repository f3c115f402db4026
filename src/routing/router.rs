use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::checksum::Checksum;
use crate::error::{Error, Result};
use crate::request::Request;
use crate::routing::route::{normalize, HandlerKind, Route};

/// Path registry with checksum fallback resolution.
///
/// Routes are keyed by their normalized path, with a side table from checksum to path so a
/// 32-bit decimal checksum can stand in for the full route string on the wire. Distinct paths
/// colliding on one checksum are possible (32-bit hash over an unbounded string space): the
/// first registration wins the checksum slot and resolution order becomes registration order,
/// which is logged as a warning because callers must not rely on it.
pub struct Router {
    routes: FxHashMap<String, Route>,
    by_checksum: FxHashMap<Checksum, String>,
}

impl Router {
    pub fn new() -> Router {
        Router {
            routes: Default::default(),
            by_checksum: Default::default(),
        }
    }

    /// Registers a handler under the normalized path. Re-registering a path overwrites its
    /// previous handler.
    pub fn register(&mut self, path: &str, handler: HandlerKind) {
        let route = Route::new(path, handler);

        match self.by_checksum.get(&route.checksum()) {
            Some(existing) if existing != route.path() => {
                warn!(
                    "routes {:?} and {:?} collide on checksum {} - wire resolution order for \
                     this checksum is registration order, which is unstable",
                    existing,
                    route.path(),
                    route.checksum()
                );
            }
            Some(_) => {}
            None => {
                self.by_checksum
                    .insert(route.checksum(), route.path().to_string());
            }
        }

        debug!("registered route {:?} as checksum {}", route.path(), route.checksum());
        self.routes.insert(route.path().to_string(), route);
    }

    /// Resolves a route id - a literal path or a checksum in decimal form - to the canonical
    /// registered path.
    pub fn resolve(&self, id: &str) -> Result<String> {
        let id = normalize(id);

        if self.routes.contains_key(&id) {
            return Ok(id);
        }

        if let Ok(checksum) = id.parse::<Checksum>() {
            if let Some(path) = self.by_checksum.get(&checksum) {
                return Ok(path.clone());
            }
        }

        Err(Error::NotFound(id))
    }

    pub fn has(&self, id: &str) -> bool {
        self.resolve(id).is_ok()
    }

    /// Removes both the exact-path entry and, if this route owned it, the checksum entry.
    /// A collision partner that is still registered takes over the checksum slot.
    pub fn remove(&mut self, path: &str) {
        let path = normalize(path);
        let removed = match self.routes.remove(&path) {
            Some(route) => route,
            None => return,
        };

        if self.by_checksum.get(&removed.checksum()).map(|p| p.as_str()) == Some(&path) {
            self.by_checksum.remove(&removed.checksum());

            if let Some(partner) = self
                .routes
                .values()
                .find(|r| r.checksum() == removed.checksum())
            {
                self.by_checksum
                    .insert(partner.checksum(), partner.path().to_string());
            }
        }
    }

    pub fn route(&self, path: &str) -> Option<&Route> {
        self.routes.get(&normalize(path))
    }

    /// Resolves `id` and returns the canonical path together with a clone of the handler.
    pub fn handler_for(&self, id: &str) -> Result<(String, HandlerKind)> {
        let path = self.resolve(id)?;
        let route = self
            .routes
            .get(&path)
            .ok_or_else(|| Error::NoMatch(path.clone()))?;
        Ok((path, route.handler().clone()))
    }

    /// Resolves `id`, binds pattern arguments into the request, and hands back a clone of the
    /// handler. Callers invoke the handler after releasing any lock around the router, so a
    /// handler may register or remove routes on its own server while it runs.
    pub fn prepare(&self, id: &str, request: &mut Request) -> Result<HandlerKind> {
        let path = self.resolve(id)?;
        let route = self
            .routes
            .get(&path)
            .ok_or_else(|| Error::NoMatch(path.clone()))?;

        // defensive double-check mirroring resolution
        if !route.matches(&normalize(id)) && !route.matches(&path) {
            return Err(Error::NoMatch(path));
        }

        route.bind_arguments(request);
        Ok(route.handler().clone())
    }

    /// Resolves `id`, binds pattern arguments into the request, and invokes the handler.
    pub async fn handle(&self, id: &str, request: &mut Request) -> Result<()> {
        match self.prepare(id, request)? {
            HandlerKind::Message(handler) => handler.run(request).await.map_err(Error::Handler),
            HandlerKind::Duplex(_) => Err(Error::InvalidArgument(format!(
                "route {:?} holds a duplex handler and is only reachable over a direct TCP connection",
                request.route()
            ))),
        }
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}
