//! WebSocket transport implementation using `tokio-tungstenite`.
//!
//! Both directions produce the same [`WebSocketConnection`] type: the peer
//! side wraps accepted TCP streams in `MaybeTlsStream::Plain`, which is the
//! stream type the client side gets back from `connect_async`.

use std::io::{self, ErrorKind};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request, Response,
};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::{Connection, ConnectionId, Connector, Transport, TransportError};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn next_connection_id() -> ConnectionId {
    ConnectionId::new(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
}

/// tungstenite errors travel as the `source` of an `io::Error`.
fn wrap_io(kind: ErrorKind, error: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> io::Error {
    io::Error::new(kind, error)
}

// ---------------------------------------------------------------------------
// Client side
// ---------------------------------------------------------------------------

/// Dials WebSocket URLs such as `ws://localhost:8000/ws/{participant}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

impl Connector for WebSocketConnector {
    type Connection = WebSocketConnection;

    async fn connect(
        &self,
        url: &str,
    ) -> Result<WebSocketConnection, TransportError> {
        let (ws, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| {
                TransportError::ConnectFailed(wrap_io(ErrorKind::ConnectionRefused, e))
            })?;

        let id = next_connection_id();
        tracing::debug!(%id, url, "WebSocket connection open");
        Ok(WebSocketConnection::new(id, ws, "/".to_owned()))
    }
}

// ---------------------------------------------------------------------------
// Peer side
// ---------------------------------------------------------------------------

/// A WebSocket-based [`Transport`] that listens for incoming connections.
pub struct WebSocketTransport {
    listener: TcpListener,
}

impl WebSocketTransport {
    /// Binds a new WebSocket transport to the given address.
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::AcceptFailed)?;
        tracing::info!(addr, "WebSocket transport listening");
        Ok(Self { listener })
    }

    /// Returns the address the listener is bound to. Useful after binding
    /// to port 0.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

impl Transport for WebSocketTransport {
    type Connection = WebSocketConnection;

    async fn accept(&mut self) -> Result<Self::Connection, TransportError> {
        let (stream, addr) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::AcceptFailed)?;

        // The request path carries the participant identity, so capture it
        // during the upgrade.
        let mut path = String::from("/");
        let ws = tokio_tungstenite::accept_hdr_async(
            MaybeTlsStream::Plain(stream),
            |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                path = req.uri().path().to_owned();
                Ok(resp)
            },
        )
        .await
        .map_err(|e| {
            TransportError::AcceptFailed(wrap_io(ErrorKind::ConnectionRefused, e))
        })?;

        let id = next_connection_id();
        tracing::debug!(%id, %addr, %path, "accepted WebSocket connection");

        Ok(WebSocketConnection::new(id, ws, path))
    }
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// A single WebSocket connection.
///
/// The stream is split so a task parked in [`recv`](Connection::recv) never
/// blocks senders.
pub struct WebSocketConnection {
    id: ConnectionId,
    path: String,
    sink: Mutex<SplitSink<WsStream, Message>>,
    stream: Mutex<SplitStream<WsStream>>,
}

impl WebSocketConnection {
    fn new(id: ConnectionId, ws: WsStream, path: String) -> Self {
        let (sink, stream) = ws.split();
        Self {
            id,
            path,
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
        }
    }

    /// The request path of the upgrade (peer side), or `/` for connections
    /// this process dialed.
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Connection for WebSocketConnection {
    async fn send(&self, frame: &str) -> Result<(), TransportError> {
        let msg = Message::Text(frame.to_owned().into());
        self.sink.lock().await.send(msg).await.map_err(|e| {
            TransportError::SendFailed(wrap_io(ErrorKind::BrokenPipe, e))
        })
    }

    async fn recv(&self) -> Result<Option<String>, TransportError> {
        let mut stream = self.stream.lock().await;
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    return Ok(Some(text.as_str().to_owned()));
                }
                Some(Ok(Message::Binary(data))) => {
                    // A bad frame is the codec's problem, not the connection's:
                    // pass it up lossily so it fails to decode.
                    let text = String::from_utf8(data.to_vec()).unwrap_or_else(|e| {
                        tracing::debug!(id = %self.id, error = %e, "binary frame is not UTF-8");
                        String::from_utf8_lossy(e.as_bytes()).into_owned()
                    });
                    return Ok(Some(text));
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::trace!(id = %self.id, ?frame, "close frame received");
                    return Ok(None);
                }
                None => return Ok(None),
                Some(Ok(_)) => continue, // ping/pong are answered by tungstenite
                Some(Err(e)) => {
                    return Err(TransportError::ReceiveFailed(wrap_io(
                        ErrorKind::ConnectionReset,
                        e,
                    )));
                }
            }
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.sink.lock().await.close().await.map_err(|e| {
            TransportError::SendFailed(wrap_io(ErrorKind::BrokenPipe, e))
        })
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}
