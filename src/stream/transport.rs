use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::error::RelayError;

/// One live bidirectional connection. `recv` yields text frames until the
/// peer closes or the transport fails.
#[async_trait]
pub trait StreamConnection: Send {
    async fn send(&mut self, text: String) -> Result<(), RelayError>;

    async fn recv(&mut self) -> Option<Result<String, RelayError>>;

    async fn ping(&mut self) -> Result<(), RelayError>;

    async fn close(&mut self);
}

/// Dials a fresh connection for each session. The adapter owns reconnect
/// policy; implementations only know how to connect once.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn StreamConnection>, RelayError>;
}

pub struct WsTransport {
    url: String,
}

impl WsTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl StreamTransport for WsTransport {
    async fn connect(&self) -> Result<Box<dyn StreamConnection>, RelayError> {
        let (socket, _response) = connect_async(&self.url)
            .await
            .map_err(|err| RelayError::Transport(err.to_string()))?;
        Ok(Box::new(WsConnection { socket }))
    }
}

struct WsConnection {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl StreamConnection for WsConnection {
    async fn send(&mut self, text: String) -> Result<(), RelayError> {
        self.socket
            .send(Message::Text(text))
            .await
            .map_err(|err| RelayError::Transport(err.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, RelayError>> {
        while let Some(item) = self.socket.next().await {
            match item {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Close(_)) => return None,
                // Ping/pong and binary frames carry no domain meaning here.
                Ok(_) => continue,
                Err(err) => return Some(Err(RelayError::Transport(err.to_string()))),
            }
        }
        None
    }

    async fn ping(&mut self) -> Result<(), RelayError> {
        self.socket
            .send(Message::Ping(Vec::new()))
            .await
            .map_err(|err| RelayError::Transport(err.to_string()))
    }

    async fn close(&mut self) {
        let _ = self.socket.close(None).await;
    }
}
