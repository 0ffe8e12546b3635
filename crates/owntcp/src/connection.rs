//! # Connection Primitive
//!
//! A TCP session split into a framed reader and a framed writer, so each
//! direction can be driven by its own task.
//!
//! ## Invariants
//! - Reads retry until a section is complete; a short read is not EOF.
//! - A zero-byte read anywhere in a frame ends the stream: `read_message`
//!   returns `Ok(None)` and the reader must not be used again.
//! - Section lengths are checked against `max_frame_bytes` before allocating.

use std::net::SocketAddr;

use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::tcp::OwnedWriteHalf;

use ownrpc::Message;
use ownrpc::PAYLOAD_LEN_LEN;
use ownrpc::PREFIX_LEN;
use ownrpc::Prefix;

use crate::config::Config;
use crate::error::Error;
use crate::error::Result;

/// Reads whole messages from a byte stream.
pub struct FrameReader<R> {
    inner: R,
    max_frame_bytes: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R, max_frame_bytes: usize) -> Self {
        Self { inner, max_frame_bytes }
    }

    /// Reads the next message, or `None` once the stream has ended.
    pub async fn read_message(&mut self) -> Result<Option<Message>> {
        let mut prefix = [0u8; PREFIX_LEN];
        if !self.read_full(&mut prefix).await? {
            return Ok(None);
        }
        let prefix = Prefix::decode(&prefix, self.max_frame_bytes)?;

        let mut topic = vec![0u8; prefix.topic_len];
        if !self.read_full(&mut topic).await? {
            return Ok(self.truncated("topic"));
        }
        let topic = ownrpc::decode_topic(&topic)?;

        let mut len = [0u8; PAYLOAD_LEN_LEN];
        if !self.read_full(&mut len).await? {
            return Ok(self.truncated("payload length"));
        }
        let payload = match ownrpc::decode_payload_len(&len, self.max_frame_bytes)? {
            Some(n) => {
                let mut payload = vec![0u8; n];
                if !self.read_full(&mut payload).await? {
                    return Ok(self.truncated("payload"));
                }
                Some(payload.into())
            }
            None => None,
        };

        Ok(Some(Message {
            id: prefix.id,
            fire_and_forget: prefix.fire_and_forget,
            topic,
            payload,
        }))
    }

    /// Fills `buf` completely. Returns `false` if the stream ended first.
    async fn read_full(&mut self, buf: &mut [u8]) -> Result<bool> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]).await? {
                0 => return Ok(false),
                n => filled += n,
            }
        }
        Ok(true)
    }

    fn truncated(&self, section: &str) -> Option<Message> {
        tracing::debug!(section, "stream ended inside a frame");
        None
    }
}

/// Writes whole messages to a byte stream.
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Frames and writes one message, flushing it to the socket.
    pub async fn write_message(&mut self, msg: &Message) -> Result<()> {
        let bytes = msg.to_bytes()?;
        self.inner.write_all(&bytes).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Half-closes the stream. Errors are ignored; the peer may already be gone.
    pub async fn shutdown(&mut self) {
        let _ = self.inner.shutdown().await;
    }
}

/// One TCP session, before its halves are handed to the loops.
pub struct Connection {
    peer: SocketAddr,
    reader: FrameReader<OwnedReadHalf>,
    writer: FrameWriter<OwnedWriteHalf>,
}

impl Connection {
    /// Resolves `addr` (a literal socket address or `host:port`) and connects
    /// to the first address that accepts.
    pub async fn connect(addr: &str, config: &Config) -> Result<Self> {
        let candidates: Vec<SocketAddr> = match addr.parse::<SocketAddr>() {
            Ok(literal) => vec![literal],
            Err(_) => tokio::net::lookup_host(addr)
                .await
                .map_err(|e| Error::Resolve(format!("{}: {}", addr, e)))?
                .collect(),
        };

        let mut last_err = Error::Resolve(format!("{}: no addresses", addr));
        for candidate in candidates {
            match TcpStream::connect(candidate).await {
                Ok(stream) => return Self::from_stream(stream, config),
                Err(e) => {
                    tracing::debug!(%candidate, error = %e, "connect attempt failed");
                    last_err = e.into();
                }
            }
        }
        Err(last_err)
    }

    /// Wraps an accepted or connected stream.
    pub fn from_stream(stream: TcpStream, config: &Config) -> Result<Self> {
        let peer = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        let (read, write) = stream.into_split();
        Ok(Self {
            peer,
            reader: FrameReader::new(read, config.max_frame_bytes),
            writer: FrameWriter::new(write),
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn into_split(self) -> (FrameReader<OwnedReadHalf>, FrameWriter<OwnedWriteHalf>) {
        (self.reader, self.writer)
    }
}
