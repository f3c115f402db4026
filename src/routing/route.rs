use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use async_trait::async_trait;

use crate::checksum::Checksum;
use crate::request::Request;
use crate::util::{split_unescaped, unescape};

/// User callback invoked once per fully reconstructed message.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn run(&self, request: &Request) -> anyhow::Result<()>;
}

/// Wrapper so a plain closure can listen on a route.
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F> Handler for FnHandler<F>
where
    F: Fn(&Request) -> anyhow::Result<()> + Send + Sync + 'static,
{
    async fn run(&self, request: &Request) -> anyhow::Result<()> {
        (self.0)(request)
    }
}

/// Long-lived handler for a persistent duplex TCP session: called once per inbound line,
/// replying with `Some(text)` or closing the conversation with `None`.
#[async_trait]
pub trait DuplexHandler: Send + Sync + 'static {
    async fn exchange(&self, line: &str, request: &Request) -> anyhow::Result<Option<String>>;
}

/// What a registered route dispatches to: a per-message callback, or a duplex session handler
/// that takes over the whole TCP connection.
#[derive(Clone)]
pub enum HandlerKind {
    Message(Arc<dyn Handler>),
    Duplex(Arc<dyn DuplexHandler>),
}

enum RouteKind {
    Exact,
    /// ordered variable names declared by a `:a|:b|...` path
    Pattern { variables: Vec<String> },
}

/// A registered route: normalized path, its checksum (the wire proxy for the path), and the
/// handler. A path whose `|`-separated segments all start with `:` is a pattern route and
/// binds message tokens to its variables on dispatch.
pub struct Route {
    path: String,
    checksum: Checksum,
    kind: RouteKind,
    handler: HandlerKind,
}

impl Debug for Route {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Route{{path:{:?}, checksum:{}}}", self.path, self.checksum)
    }
}

impl Route {
    pub fn new(path: &str, handler: HandlerKind) -> Route {
        let path = normalize(path);
        let kind = pattern_variables(&path)
            .map(|variables| RouteKind::Pattern { variables })
            .unwrap_or(RouteKind::Exact);

        Route {
            checksum: Checksum::of(&path),
            path,
            kind,
            handler,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn checksum(&self) -> Checksum {
        self.checksum
    }

    pub fn handler(&self) -> &HandlerKind {
        &self.handler
    }

    pub fn is_pattern(&self) -> bool {
        matches!(self.kind, RouteKind::Pattern { .. })
    }

    /// `id` may be the literal (normalized) path or the path's checksum in decimal form
    pub fn matches(&self, id: &str) -> bool {
        self.path == id || self.checksum.to_string() == id
    }

    /// For pattern routes: splits the message on unescaped `|` and cyclically binds tokens to
    /// the declared variable names, so one message can carry repeated tuples. Trailing tokens
    /// that do not fill a complete cycle are dropped (integer division), which is documented
    /// behavior rather than an error.
    pub fn bind_arguments(&self, request: &mut Request) {
        let variables = match &self.kind {
            RouteKind::Exact => return,
            RouteKind::Pattern { variables } => variables,
        };

        let tokens: Vec<String> = split_unescaped(request.message(), '|')
            .iter()
            .map(|t| unescape(t))
            .collect();

        let cycles = tokens.len() / variables.len();
        let mut values: Vec<Vec<String>> = vec![Vec::with_capacity(cycles); variables.len()];

        let mut item = tokens.into_iter();
        for _ in 0..cycles {
            for slot in values.iter_mut() {
                slot.push(item.next().expect("token count is a multiple of cycles"));
            }
        }

        for (name, slot) in variables.iter().zip(values) {
            request.bind_variable(name.clone(), slot);
        }
    }
}

/// strips exactly one leading and one trailing `/`
pub(crate) fn normalize(path: &str) -> String {
    let path = path.strip_prefix('/').unwrap_or(path);
    let path = path.strip_suffix('/').unwrap_or(path);
    path.to_string()
}

fn pattern_variables(path: &str) -> Option<Vec<String>> {
    if path.is_empty() {
        return None;
    }
    path.split('|')
        .map(|segment| segment.strip_prefix(':').map(|name| name.to_string()))
        .collect()
}
