use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::debug;

use crate::error::TransportError;

const MIN_TIMEOUT_SECONDS: u64 = 1;

/// Connection parameters for one feed session.
///
/// Built by the lifecycle coordinator from the static configuration plus
/// the signed-in account's session token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedConfig {
    pub endpoint: String,
    pub session_token: String,
    pub api_key: String,
    pub max_connect_attempts: u32,
    pub retry_delay_seconds: u64,
    pub connect_timeout_seconds: u64,
}

impl FeedConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_seconds)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds.max(MIN_TIMEOUT_SECONDS))
    }
}

/// Socket-level transport carrying the event feed.
///
/// `recv` resolves with exactly one complete application frame; control
/// traffic such as pings stays internal to the implementation.
pub trait FeedTransport: Send + 'static {
    fn connect(
        config: &FeedConfig,
    ) -> impl Future<Output = Result<Self, TransportError>> + Send
    where
        Self: Sized;

    fn send(&mut self, data: &[u8]) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn recv(&mut self) -> impl Future<Output = Result<Vec<u8>, TransportError>> + Send;

    fn close(&mut self) -> impl Future<Output = Result<(), TransportError>> + Send;
}

type FeedSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// [`FeedTransport`] over a TLS websocket.
pub struct WebSocketTransport {
    socket: FeedSocket,
}

fn map_websocket_error(error: WsError) -> TransportError {
    match error {
        WsError::ConnectionClosed | WsError::AlreadyClosed => {
            TransportError::Closed { reason: None }
        }
        other => TransportError::WebSocket(other.to_string()),
    }
}

fn handshake_request(config: &FeedConfig) -> Result<Request, TransportError> {
    if !config.endpoint.starts_with("ws://") && !config.endpoint.starts_with("wss://") {
        return Err(TransportError::InvalidEndpoint(config.endpoint.clone()));
    }

    let mut request = config
        .endpoint
        .as_str()
        .into_client_request()
        .map_err(|_| TransportError::InvalidEndpoint(config.endpoint.clone()))?;

    let api_key = HeaderValue::from_str(&config.api_key)
        .map_err(|_| TransportError::WebSocket("api key is not a valid header value".to_string()))?;
    request.headers_mut().insert("x-api-key", api_key);

    if !config.session_token.is_empty() {
        let bearer = HeaderValue::from_str(&format!("Bearer {}", config.session_token)).map_err(
            |_| TransportError::WebSocket("session token is not a valid header value".to_string()),
        )?;
        request.headers_mut().insert("authorization", bearer);
    }

    Ok(request)
}

impl FeedTransport for WebSocketTransport {
    async fn connect(config: &FeedConfig) -> Result<Self, TransportError> {
        let request = handshake_request(config)?;

        let (socket, _response) = timeout(config.connect_timeout(), connect_async(request))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(map_websocket_error)?;

        debug!(endpoint = %config.endpoint, "feed socket established");
        Ok(Self { socket })
    }

    async fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        if data.is_empty() {
            return Ok(());
        }

        let text = std::str::from_utf8(data).map_err(|error| {
            TransportError::WebSocket(format!("outbound frame is not utf-8: {error}"))
        })?;

        self.socket
            .send(Message::Text(text.into()))
            .await
            .map_err(map_websocket_error)
    }

    async fn recv(&mut self) -> Result<Vec<u8>, TransportError> {
        loop {
            let message = match self.socket.next().await {
                Some(message) => message.map_err(map_websocket_error)?,
                None => return Err(TransportError::Closed { reason: None }),
            };

            match message {
                Message::Text(text) => return Ok(text.to_string().into_bytes()),
                Message::Binary(bytes) => return Ok(bytes.to_vec()),
                Message::Close(frame) => {
                    return Err(TransportError::Closed {
                        reason: frame.map(|frame| frame.reason.to_string()),
                    });
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.socket.close(None).await.map_err(map_websocket_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn config(endpoint: &str, session_token: &str) -> FeedConfig {
        FeedConfig {
            endpoint: endpoint.to_string(),
            session_token: session_token.to_string(),
            api_key: "key-123".to_string(),
            max_connect_attempts: 5,
            retry_delay_seconds: 5,
            connect_timeout_seconds: 30,
        }
    }

    #[test]
    fn handshake_request_carries_credentials() {
        let request = handshake_request(&config("wss://feed.rookery.app/socket", "token-abc"))
            .expect("request should build");

        assert_eq!(
            request
                .headers()
                .get("authorization")
                .and_then(|value| value.to_str().ok()),
            Some("Bearer token-abc")
        );
        assert_eq!(
            request
                .headers()
                .get("x-api-key")
                .and_then(|value| value.to_str().ok()),
            Some("key-123")
        );
    }

    #[test]
    fn handshake_request_omits_bearer_for_empty_token() {
        let request = handshake_request(&config("wss://feed.rookery.app/socket", ""))
            .expect("request should build");
        assert!(request.headers().get("authorization").is_none());
    }

    #[test]
    fn rejects_non_websocket_endpoint() {
        let result = handshake_request(&config("https://feed.rookery.app/socket", "token"));
        assert_matches!(result, Err(TransportError::InvalidEndpoint(_)));
    }

    #[test]
    fn connect_timeout_has_a_floor() {
        let mut short = config("wss://feed.rookery.app/socket", "token");
        short.connect_timeout_seconds = 0;
        assert_eq!(short.connect_timeout(), Duration::from_secs(1));
    }
}
