pub mod route;
pub mod router;

pub use route::{DuplexHandler, FnHandler, Handler, HandlerKind, Route};
pub use router::Router;
