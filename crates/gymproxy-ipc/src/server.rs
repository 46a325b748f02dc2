use std::{io::ErrorKind, sync::Arc};

use async_trait::async_trait;
use gymproxy_core::{ConnId, Endpoint, RpcReply, RpcRequest};
use tokio::{
    net::{TcpListener, UnixListener},
    sync::{mpsc, oneshot},
};

use crate::{
    IpcError,
    client::ProxyStream,
    codec::{decode_request, encode_reply},
    framing::{read_message, write_message},
};

/// Requests queued between connection tasks and the request loop.
const INBOUND_QUEUE_DEPTH: usize = 64;

/// Serves decoded requests one at a time.
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    async fn handle(&self, conn: ConnId, req: RpcRequest) -> RpcReply;
}

/// Connection events reported outside the request stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// A peer connected.
    Accepted { conn: ConnId, peer: String },
    /// A peer went away, cleanly or not.
    Disconnected { conn: ConnId },
}

/// One request waiting for the request loop.
struct Inbound {
    conn: ConnId,
    frames: Vec<Vec<u8>>,
    reply_tx: oneshot::Sender<Vec<Vec<u8>>>,
}

enum ListenerKind {
    Tcp(TcpListener),
    Unix(UnixListener),
}

/// Bound TCP or UNIX socket listener.
pub struct ProxyListener {
    inner: ListenerKind,
    endpoint: Endpoint,
}

impl ProxyListener {
    pub async fn bind(endpoint: &Endpoint) -> Result<Self, IpcError> {
        let (inner, endpoint) = match endpoint {
            Endpoint::Tcp(addr) => {
                let listener = TcpListener::bind(addr).await?;
                let local = Endpoint::Tcp(listener.local_addr()?.to_string());
                (ListenerKind::Tcp(listener), local)
            }
            Endpoint::Ipc(path) => (
                ListenerKind::Unix(UnixListener::bind(path)?),
                endpoint.clone(),
            ),
        };
        Ok(Self { inner, endpoint })
    }

    /// Endpoint actually bound, with any ephemeral TCP port resolved.
    pub fn local_endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    async fn accept(&self) -> std::io::Result<(Box<dyn ProxyStream>, String)> {
        match &self.inner {
            ListenerKind::Tcp(listener) => {
                let (stream, addr) = listener.accept().await?;
                stream.set_nodelay(true)?;
                Ok((Box::new(stream), addr.to_string()))
            }
            ListenerKind::Unix(listener) => {
                let (stream, _) = listener.accept().await?;
                Ok((Box::new(stream), "unix".to_string()))
            }
        }
    }
}

/// Accepts connections forever, feeding every request through one request
/// loop and reporting connects/disconnects on `events`.
pub async fn serve(
    listener: ProxyListener,
    handler: Arc<dyn RequestHandler>,
    events: mpsc::UnboundedSender<LifecycleEvent>,
) -> Result<(), IpcError> {
    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE_DEPTH);
    tokio::spawn(request_loop(inbound_rx, handler));

    tracing::info!(url = %listener.local_endpoint(), "proxy server running");

    let mut next_conn = 1_u64;
    loop {
        let (stream, peer) = listener.accept().await?;
        let conn = ConnId(next_conn);
        next_conn = next_conn.saturating_add(1);

        tracing::debug!(%conn, %peer, "accepted connection");
        if events
            .send(LifecycleEvent::Accepted { conn, peer })
            .is_err()
        {
            tracing::warn!(%conn, "lifecycle monitor is gone");
        }

        let inbound = inbound_tx.clone();
        let events = events.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_connection(conn, stream, inbound).await {
                tracing::debug!(%conn, error = %err, "connection handler exited with error");
            }
            let _ = events.send(LifecycleEvent::Disconnected { conn });
        });
    }
}

/// Single consumer of every request on the endpoint: decode, dispatch,
/// reply exactly once.
async fn request_loop(mut inbound: mpsc::Receiver<Inbound>, handler: Arc<dyn RequestHandler>) {
    while let Some(Inbound {
        conn,
        frames,
        reply_tx,
    }) = inbound.recv().await
    {
        tracing::debug!(%conn, frame = %String::from_utf8_lossy(&frames[0]), "rx");

        let reply = match decode_request(frames) {
            Ok(request) => handler.handle(conn, request).await,
            Err(err) => {
                tracing::warn!(%conn, error = %err, "rejecting undecodable request");
                RpcReply::err(err.to_string())
            }
        };

        let frames = match encode_reply(reply) {
            Ok(frames) => frames,
            Err(err) => {
                tracing::error!(%conn, error = %err, "failed to encode reply");
                match encode_reply(RpcReply::err(err.to_string())) {
                    Ok(frames) => frames,
                    Err(_) => continue,
                }
            }
        };
        tracing::debug!(%conn, frame = %String::from_utf8_lossy(&frames[0]), "tx");

        if reply_tx.send(frames).is_err() {
            tracing::debug!(%conn, "peer left before its reply was sent");
        }
    }
}

async fn handle_connection(
    conn: ConnId,
    mut stream: Box<dyn ProxyStream>,
    inbound: mpsc::Sender<Inbound>,
) -> Result<(), IpcError> {
    loop {
        let frames = match read_message(&mut stream).await {
            Ok(frames) => frames,
            Err(IpcError::Io(err))
                if matches!(
                    err.kind(),
                    ErrorKind::UnexpectedEof | ErrorKind::ConnectionReset | ErrorKind::BrokenPipe
                ) =>
            {
                return Ok(());
            }
            Err(err) => return Err(err),
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        inbound
            .send(Inbound {
                conn,
                frames,
                reply_tx,
            })
            .await
            .map_err(|_| IpcError::Closed)?;

        // The next request is only read once this one has been answered.
        let reply = reply_rx.await.map_err(|_| IpcError::Closed)?;
        write_message(&mut stream, &reply).await?;
    }
}
