/// Failures below the message layer: sockets, handshakes, frames.
///
/// Variants carrying an `io::Error` keep it as the `source`, so callers
/// can still tell a refused dial from a reset mid-frame.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The peer could not be reached, or refused the upgrade.
    #[error("could not open connection: {0}")]
    ConnectFailed(#[source] std::io::Error),

    /// The connection is gone; the string says how.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// A frame could not be written.
    #[error("could not send frame: {0}")]
    SendFailed(#[source] std::io::Error),

    /// A frame could not be read, or arrived as something other than text.
    #[error("could not read frame: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// The listener could not bind, or an incoming upgrade failed.
    #[error("could not accept connection: {0}")]
    AcceptFailed(#[source] std::io::Error),
}
