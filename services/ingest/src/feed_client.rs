//! WebSocket client for the upstream strike feed.
//!
//! The supervisor only sees the [`FeedConnector`] and [`FeedConnection`]
//! traits; [`WsConnector`] is the production implementation.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

use crate::config::FeedConfig;

/// Errors that can occur on the feed connection.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection timed out after {0:?}")]
    Timeout(Duration),

    #[error("Subscription failed: {0}")]
    SubscribeFailed(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

/// Opens connections to the feed.
#[async_trait]
pub trait FeedConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn FeedConnection>, FeedError>;
}

/// One live feed connection.
#[async_trait]
pub trait FeedConnection: Send {
    /// Send the control message that starts the live stream.
    async fn subscribe(&mut self, message: &str) -> Result<(), FeedError>;

    /// Next frame payload, or `None` once the peer has closed the stream.
    async fn next_frame(&mut self) -> Result<Option<Bytes>, FeedError>;

    async fn close(&mut self);
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connects to the configured WebSocket endpoint.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new(config: &FeedConfig) -> Self {
        Self {
            url: config.url.clone(),
            connect_timeout: config.connection_timeout(),
        }
    }
}

#[async_trait]
impl FeedConnector for WsConnector {
    async fn connect(&self) -> Result<Box<dyn FeedConnection>, FeedError> {
        debug!(url = %self.url, "Connecting to strike feed");

        let (stream, _) = tokio::time::timeout(
            self.connect_timeout,
            tokio_tungstenite::connect_async(self.url.as_str()),
        )
        .await
        .map_err(|_| FeedError::Timeout(self.connect_timeout))?
        .map_err(|e| FeedError::ConnectionFailed(e.to_string()))?;

        info!(url = %self.url, "Connected to strike feed");

        let (write, read) = stream.split();
        Ok(Box::new(WsConnection { write, read }))
    }
}

/// A connected WebSocket, split into its sink and stream halves.
pub struct WsConnection {
    write: SplitSink<WsStream, Message>,
    read: SplitStream<WsStream>,
}

#[async_trait]
impl FeedConnection for WsConnection {
    async fn subscribe(&mut self, message: &str) -> Result<(), FeedError> {
        self.write
            .send(Message::Text(message.to_string().into()))
            .await
            .map_err(|e| FeedError::SubscribeFailed(e.to_string()))
    }

    async fn next_frame(&mut self) -> Result<Option<Bytes>, FeedError> {
        while let Some(message) = self.read.next().await {
            let message = message.map_err(|e| FeedError::Transport(e.to_string()))?;

            match message {
                Message::Text(text) => return Ok(Some(Bytes::copy_from_slice(text.as_bytes()))),
                Message::Binary(data) => return Ok(Some(data)),
                Message::Close(frame) => {
                    debug!(frame = ?frame, "Feed sent close frame");
                    return Ok(None);
                }
                // Pings are answered by tungstenite itself.
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            }
        }

        Ok(None)
    }

    async fn close(&mut self) {
        if let Err(e) = self.write.close().await {
            debug!(error = %e, "Error closing feed connection");
        }
    }
}
