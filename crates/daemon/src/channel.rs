//! Half-duplex request/response channel
//!
//! [`Channel::recv`] hands out an [`Exchange`] that mutably borrows the
//! channel. The only way to release that borrow is [`Responder::respond`], so
//! a second request cannot be read before the first one is answered.

use crate::protocol::{decode_request, encode_response, ProtocolError, Request, Response};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::debug;

/// One end of a newline-delimited JSON connection
pub struct Channel<R, W> {
    reader: BufReader<R>,
    writer: W,
    line: String,
}

impl<R, W> Channel<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer,
            line: String::new(),
        }
    }

    /// Wait for the next request; `None` once the peer closes the connection
    pub async fn recv(&mut self) -> Result<Option<Exchange<'_, R, W>>, ProtocolError> {
        loop {
            self.line.clear();
            if self.reader.read_line(&mut self.line).await? == 0 {
                return Ok(None);
            }
            let line = self.line.trim();
            if line.is_empty() {
                continue;
            }
            debug!("Received {} bytes", line.len());
            let request = decode_request(line)?;
            return Ok(Some(Exchange {
                request,
                responder: Responder { channel: self },
            }));
        }
    }
}

/// A received request awaiting its response
pub struct Exchange<'c, R, W> {
    request: Request,
    responder: Responder<'c, R, W>,
}

impl<'c, R, W> Exchange<'c, R, W> {
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Take ownership of the request, keeping the obligation to respond
    pub fn split(self) -> (Request, Responder<'c, R, W>) {
        (self.request, self.responder)
    }
}

/// Write half of an [`Exchange`]
pub struct Responder<'c, R, W> {
    channel: &'c mut Channel<R, W>,
}

impl<R, W> Responder<'_, R, W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub async fn respond(self, response: &Response) -> Result<(), ProtocolError> {
        let mut encoded = encode_response(response)?;
        encoded.push('\n');
        let writer = &mut self.channel.writer;
        writer.write_all(encoded.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }
}
