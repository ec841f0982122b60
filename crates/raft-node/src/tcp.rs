//! # tcp
//!
//! why: let nodes in separate processes reach each other
//! relations: TcpGateway serves a node's RpcHandler, TcpTransport is the matching Transport
//! what: newline-delimited json framing of RaftMessage over tokio tcp streams

use crate::error::TransportError;
use crate::gateway::{dispatch, RpcHandler, Transport};
use crate::node::stopped;
use raft_core::{AppendRequest, AppendResponse, RaftMessage, VoteRequest, VoteResponse};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::watch;
use tracing::{debug, info, warn};

const LINE_ENDINGS: &[char] = &['\n', '\r'];

/// Longest line a peer may send, newline included
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Next message on the stream; `None` once the peer closes it
pub async fn read_message<R>(reader: &mut R) -> Result<Option<RaftMessage>, TransportError>
where
    R: AsyncBufRead + Unpin,
{
    read_frame(reader, MAX_FRAME_BYTES).await
}

async fn read_frame<R>(reader: &mut R, limit: usize) -> Result<Option<RaftMessage>, TransportError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        let read = (&mut *reader).take(limit as u64 + 1).read_line(&mut line).await?;
        if read == 0 {
            return Ok(None);
        }
        if read > limit {
            return Err(TransportError::FrameTooLarge { limit });
        }
        let trimmed = line.trim_end_matches(LINE_ENDINGS);
        if trimmed.is_empty() {
            continue;
        }
        return Ok(Some(serde_json::from_str(trimmed)?));
    }
}

pub async fn write_message<W>(writer: &mut W, msg: &RaftMessage) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    let mut encoded = msg.encode()?;
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}

/// Accepts peer connections and answers them from a node's handler
pub struct TcpGateway {
    listener: TcpListener,
}

impl TcpGateway {
    pub async fn bind(addr: impl ToSocketAddrs) -> io::Result<Self> {
        Ok(Self {
            listener: TcpListener::bind(addr).await?,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve until `shutdown` turns true
    pub async fn serve(self, handler: Arc<dyn RpcHandler>, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = stopped(&mut shutdown) => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let handler = Arc::clone(&handler);
                        tokio::spawn(async move {
                            if let Err(err) = handle_connection(stream, handler).await {
                                warn!(%peer, %err, "peer connection closed with error");
                            }
                        });
                    }
                    Err(err) => warn!(%err, "failed to accept connection"),
                },
            }
        }
        info!("gateway stopped");
    }
}

async fn handle_connection(stream: TcpStream, handler: Arc<dyn RpcHandler>) -> Result<(), TransportError> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    while let Some(msg) = read_message(&mut reader).await? {
        let reply = dispatch(handler.as_ref(), msg)?;
        write_message(&mut writer, &reply).await?;
    }
    Ok(())
}

/// Opens a connection per call: one request line out, one response line back
#[derive(Debug, Clone, Default)]
pub struct TcpTransport;

impl TcpTransport {
    async fn call(&self, peer: &str, msg: RaftMessage) -> Result<RaftMessage, TransportError> {
        let stream = TcpStream::connect(peer).await.map_err(|err| {
            debug!(peer, %err, "connect failed");
            TransportError::Unreachable(peer.to_string())
        })?;
        let (reader, mut writer) = stream.into_split();
        write_message(&mut writer, &msg).await?;

        let mut reader = BufReader::new(reader);
        read_message(&mut reader)
            .await?
            .ok_or_else(|| TransportError::Unreachable(peer.to_string()))
    }
}

impl Transport for TcpTransport {
    async fn request_vote(&self, peer: &str, req: VoteRequest) -> Result<VoteResponse, TransportError> {
        match self.call(peer, req.into()).await? {
            RaftMessage::VoteResponse(resp) => Ok(resp),
            other => Err(TransportError::UnexpectedResponse {
                expected: "vote_response",
                got: other.kind(),
            }),
        }
    }

    async fn append_entries(
        &self,
        peer: &str,
        req: AppendRequest,
    ) -> Result<AppendResponse, TransportError> {
        match self.call(peer, req.into()).await? {
            RaftMessage::AppendEntriesResponse(resp) => Ok(resp),
            other => Err(TransportError::UnexpectedResponse {
                expected: "append_entries_response",
                got: other.kind(),
            }),
        }
    }
}
