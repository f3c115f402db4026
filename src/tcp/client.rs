use std::net::SocketAddr;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::{Error, Result};
use crate::tcp::framer;
use crate::tcp::server::DIRECT_CONNECTION_OPEN;
use crate::util::parse_target;

/// Upper end of the registered port range; ports above it are ephemeral and not valid as a
/// service target.
const MAX_SERVICE_PORT: u16 = 49151;

/// Connecting side of the TCP transport. One client addresses one server; each [TcpClient::send]
/// opens a fresh connection, [TcpClient::direct] opens a persistent duplex session.
pub struct TcpClient {
    target: SocketAddr,
}

impl TcpClient {
    pub fn new(target: &str) -> Result<TcpClient> {
        let target = parse_target(target)?;
        if target.port() > MAX_SERVICE_PORT {
            return Err(Error::InvalidArgument(format!(
                "port {} is in the ephemeral range (> {})",
                target.port(),
                MAX_SERVICE_PORT
            )));
        }
        Ok(TcpClient { target })
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    /// Sends one framed request and waits for the reply line, if any. `Ok(None)` means the
    /// handler closed the connection without replying.
    pub async fn send(
        &self,
        route: &str,
        message: &str,
        headers: &[(&str, &str)],
    ) -> Result<Option<String>> {
        let stream = TcpStream::connect(self.target).await?;
        let (read_half, mut write_half) = stream.into_split();

        let headers: Vec<(String, String)> = headers
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        framer::write_frame(&mut write_half, route, &headers, message).await?;

        let mut reader = BufReader::new(read_half);
        read_reply_line(&mut reader).await
    }

    /// Opens a duplex session on `route`. The server only accepts this for routes registered
    /// with a duplex handler.
    pub async fn direct(&self, route: &str) -> Result<DirectConnection> {
        let stream = TcpStream::connect(self.target).await?;
        let (read_half, mut write_half) = stream.into_split();

        framer::write_frame(&mut write_half, route, &[], DIRECT_CONNECTION_OPEN).await?;
        debug!("direct connection to {} open on {:?}", self.target, route);

        Ok(DirectConnection {
            reader: BufReader::new(read_half),
            writer: write_half,
        })
    }
}

/// Client end of a duplex session: line-oriented, one message per line in either direction.
pub struct DirectConnection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl DirectConnection {
    pub async fn send_line(&mut self, line: &str) -> Result<()> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// `Ok(None)` once the server has ended the session.
    pub async fn read_line(&mut self) -> Result<Option<String>> {
        read_reply_line(&mut self.reader).await
    }

    /// One round trip: send a line, wait for the answer.
    pub async fn exchange(&mut self, line: &str) -> Result<Option<String>> {
        self.send_line(line).await?;
        self.read_line().await
    }

    pub async fn close(mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

async fn read_reply_line(reader: &mut BufReader<OwnedReadHalf>) -> Result<Option<String>> {
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Ok(None);
    }
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    Ok(Some(line))
}
