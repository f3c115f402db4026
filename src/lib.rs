//! Route-based request/response messaging over UDP and TCP.
//!
//! Handlers are registered under string routes; messages address a route either by its literal
//! path or by its CRC-32 checksum. UDP messages are fragmented into size-bounded datagrams and
//! reassembled on receipt, TCP requests travel as length-delimited frames on short-lived
//! connections, with an optional persistent line-oriented duplex mode. A middleware pipeline of
//! before/after hooks wraps every dispatch, and a small service container carries shared
//! dependencies into handlers.

pub mod checksum;
pub mod container;
pub mod dispatch;
pub mod error;
pub mod hooks;
pub mod request;
pub mod routing;
pub mod scheduler;
pub mod tcp;
pub mod udp;
pub(crate) mod util;

pub use checksum::Checksum;
pub use container::Container;
pub use error::{Error, Result};
pub use hooks::{Hook, HookRegistry};
pub use request::{Request, RequestBuilder};
pub use routing::{DuplexHandler, Handler, Router};
pub use tcp::{TcpClient, TcpServer};
pub use udp::UdpServer;
