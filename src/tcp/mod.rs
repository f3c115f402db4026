pub mod client;
pub mod framer;
pub mod server;

pub use client::{DirectConnection, TcpClient};
pub use server::{TcpServer, DIRECT_CONNECTION_OPEN};
