use std::fmt::{Debug, Formatter};
use std::net::SocketAddr;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;

use crate::error::{Error, Result};

/// Shared write half of a TCP connection, letting a handler send a line-terminated response
/// back on the socket the request arrived on.
#[derive(Clone)]
pub struct Replier {
    writer: Arc<Mutex<OwnedWriteHalf>>,
}

impl Replier {
    pub fn new(writer: OwnedWriteHalf) -> Replier {
        Replier {
            writer: Arc::new(Mutex::new(writer)),
        }
    }

    pub async fn reply(&self, text: &str) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(text.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok(())
    }
}

/// One logical received (or outbound) message, built after full reassembly for UDP or once per
/// TCP exchange. Middleware `before` hooks may replace the message body (e.g. decryption)
/// before the handler sees it; the handler itself gets read-only access.
pub struct Request {
    route: String,
    message: String,
    /// body length at construction time; not re-validated after [Request::set_message]
    length: usize,
    sender: SocketAddr,
    hostname: Option<String>,
    headers: FxHashMap<String, String>,
    variables: FxHashMap<String, Vec<String>>,
    replier: Option<Replier>,
}

impl Debug for Request {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Request{{route:{:?}, sender:{}, length:{}}}", self.route, self.sender, self.length)
    }
}

impl Request {
    pub fn route(&self) -> &str {
        &self.route
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// replaces the message body, e.g. after decryption; the recorded [Request::length] is
    /// that of the originally received message and stays untouched
    pub fn set_message(&mut self, message: impl Into<String>) {
        self.message = message.into();
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn sender(&self) -> SocketAddr {
        self.sender
    }

    pub fn hostname(&self) -> Option<&str> {
        self.hostname.as_deref()
    }

    pub fn headers(&self) -> &FxHashMap<String, String> {
        &self.headers
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(|v| v.as_str())
    }

    pub fn header_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.header(key).unwrap_or(default)
    }

    pub fn has_header(&self, key: &str) -> bool {
        self.headers.contains_key(key)
    }

    /// values bound to a pattern-route variable, e.g. `name` for a route `:name|:file`
    pub fn variable(&self, name: &str) -> Option<&[String]> {
        self.variables.get(name).map(|v| v.as_slice())
    }

    pub(crate) fn bind_variable(&mut self, name: impl Into<String>, values: Vec<String>) {
        self.variables.insert(name.into(), values);
    }

    /// sends a line-terminated response on the originating TCP connection;
    /// fails for UDP requests, which have no reply channel
    pub async fn reply(&self, text: &str) -> Result<()> {
        match &self.replier {
            Some(replier) => replier.reply(text).await,
            None => Err(Error::InvalidArgument(
                "this request has no reply channel (UDP requests are one-way)".to_string(),
            )),
        }
    }

    pub fn replier(&self) -> Option<&Replier> {
        self.replier.as_ref()
    }
}

/// Assembles a [Request]; used by both transports right before dispatch.
pub struct RequestBuilder {
    route: String,
    message: String,
    sender: Option<SocketAddr>,
    hostname: Option<String>,
    headers: FxHashMap<String, String>,
    replier: Option<Replier>,
}

impl RequestBuilder {
    pub fn new() -> RequestBuilder {
        RequestBuilder {
            route: String::new(),
            message: String::new(),
            sender: None,
            hostname: None,
            headers: Default::default(),
            replier: None,
        }
    }

    pub fn route(mut self, route: impl Into<String>) -> Self {
        self.route = route.into();
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn sender(mut self, sender: SocketAddr) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn headers<K: Into<String>, V: Into<String>>(
        mut self,
        headers: impl IntoIterator<Item = (K, V)>,
    ) -> Self {
        for (k, v) in headers {
            self.headers.insert(k.into(), v.into());
        }
        self
    }

    pub fn replier(mut self, replier: Replier) -> Self {
        self.replier = Some(replier);
        self
    }

    pub fn build(self) -> Request {
        let length = self.message.len();
        Request {
            route: self.route,
            message: self.message,
            length,
            sender: self
                .sender
                .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 0))),
            hostname: self.hostname,
            headers: self.headers,
            variables: Default::default(),
            replier: self.replier,
        }
    }
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self::new()
    }
}
