use std::io::ErrorKind;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};

/// One request frame on a TCP stream.
///
/// Wire layout, all lines CRLF-terminated:
/// ```text
/// <route> <body-length>
/// <header-key>: <header-value>        (zero or more)
///                                     (blank line)
/// <body, exactly body-length bytes>
/// ```
/// The declared length is authoritative: the reader consumes exactly that many body bytes, so
/// bodies may freely contain newlines and further frames can follow on the same stream.
#[derive(Debug)]
pub struct Frame {
    pub route: String,
    pub length: usize,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    route: &str,
    headers: &[(String, String)],
    body: &str,
) -> Result<()> {
    let mut out = String::with_capacity(route.len() + body.len() + 32);
    out.push_str(route);
    out.push(' ');
    out.push_str(&body.len().to_string());
    out.push_str("\r\n");
    for (key, value) in headers {
        out.push_str(key);
        out.push_str(": ");
        out.push_str(value);
        out.push_str("\r\n");
    }
    out.push_str("\r\n");
    out.push_str(body);

    writer.write_all(out.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads the next frame off the stream. `Ok(None)` is a clean end of stream before the first
/// byte of a frame; EOF anywhere inside a frame is malformed.
pub async fn read_frame<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Option<Frame>> {
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Ok(None);
    }
    let line = line.trim_end_matches(['\r', '\n']);

    let (route, length) = line
        .rsplit_once(' ')
        .ok_or_else(|| Error::MalformedFrame(format!("request line {:?} lacks a length", line)))?;
    let length: usize = length
        .parse()
        .map_err(|_| Error::MalformedFrame(format!("invalid body length {:?}", length)))?;

    let mut headers = Vec::new();
    loop {
        let mut header_line = String::new();
        if reader.read_line(&mut header_line).await? == 0 {
            return Err(Error::MalformedFrame(
                "stream ended inside the header block".to_string(),
            ));
        }
        let header_line = header_line.trim_end_matches(['\r', '\n']);
        if header_line.is_empty() {
            break;
        }
        let (key, value) = header_line.split_once(':').ok_or_else(|| {
            Error::MalformedFrame(format!("header line {:?} lacks a colon", header_line))
        })?;
        headers.push((key.trim().to_string(), value.trim().to_string()));
    }

    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await.map_err(|e| {
        if e.kind() == ErrorKind::UnexpectedEof {
            Error::MalformedFrame(format!("stream ended inside a {} byte body", length))
        } else {
            Error::Transport(e)
        }
    })?;
    let body = String::from_utf8(body)
        .map_err(|_| Error::MalformedFrame("body is not valid UTF-8".to_string()))?;

    Ok(Some(Frame {
        route: route.to_string(),
        length,
        headers,
        body,
    }))
}
