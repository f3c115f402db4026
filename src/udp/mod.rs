pub mod codec;
pub mod reassembly;
pub mod server;

pub use server::UdpServer;
