//! Pending-transaction push feed

use crate::watcher::WatcherError;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

/// A subscription-based source of raw feed messages
#[async_trait]
pub trait PendingFeed: Send {
    /// Connect and send the subscription request
    async fn subscribe(&mut self, request: &str) -> Result<(), WatcherError>;

    /// Next text message; `None` once the feed has closed
    async fn next_message(&mut self) -> Option<Result<String, WatcherError>>;

    async fn close(&mut self);
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket feed, e.g. an `eth_subscribe` pending-transaction stream
pub struct WsPendingFeed {
    url: String,
    timeout: Duration,
    stream: Option<WsStream>,
}

impl WsPendingFeed {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            timeout,
            stream: None,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl PendingFeed for WsPendingFeed {
    async fn subscribe(&mut self, request: &str) -> Result<(), WatcherError> {
        info!(url = %self.url, "Connecting to pending transaction feed");

        let (mut stream, _) = tokio::time::timeout(self.timeout, connect_async(self.url.as_str()))
            .await
            .map_err(|_| WatcherError::Connect(format!("timed out after {:?}", self.timeout)))?
            .map_err(|e| WatcherError::Connect(e.to_string()))?;

        debug!(request, "Sending subscribe request");
        tokio::time::timeout(self.timeout, stream.send(Message::Text(request.to_string())))
            .await
            .map_err(|_| WatcherError::Subscribe(format!("timed out after {:?}", self.timeout)))?
            .map_err(|e| WatcherError::Subscribe(e.to_string()))?;

        self.stream = Some(stream);
        Ok(())
    }

    async fn next_message(&mut self) -> Option<Result<String, WatcherError>> {
        let stream = self.stream.as_mut()?;
        loop {
            match stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Binary(bytes)) => return Some(Ok(String::from_utf8_lossy(&bytes).into_owned())),
                Ok(Message::Close(frame)) => {
                    info!(frame = ?frame, "Feed closed by remote");
                    return None;
                }
                // Pings are answered by tungstenite on the next read
                Ok(_) => continue,
                Err(e) => {
                    warn!(error = %e, "Feed stream error");
                    return Some(Err(WatcherError::Disconnected(e.to_string())));
                }
            }
        }
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.close(None).await {
                debug!(error = %e, "Error closing feed");
            }
        }
    }
}
