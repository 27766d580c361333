//! Push connection transport.

use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use nanowallet_types::Confirmation;
use serde_json::json;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

/// Opens push connections.
#[async_trait]
pub trait PushConnector: Send + Sync {
    async fn connect(&self, url: &str) -> AppResult<Box<dyn PushStream>>;
}

/// An open push connection.
#[async_trait]
pub trait PushStream: Send {
    /// Next confirmation. `Ok(None)` when the server closed the connection.
    async fn next_confirmation(&mut self) -> AppResult<Option<Confirmation>>;
}

/// Node websocket: subscribes to the `confirmation` topic on connect.
#[derive(Debug, Default, Clone)]
pub struct WsConnector;

struct WsStream {
    inner: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

fn ws_error(e: tokio_tungstenite::tungstenite::Error) -> AppError {
    AppError::network(format!("websocket: {}", e))
}

#[async_trait]
impl PushConnector for WsConnector {
    async fn connect(&self, url: &str) -> AppResult<Box<dyn PushStream>> {
        let (mut ws, _response) = connect_async(url).await.map_err(ws_error)?;

        let subscribe = json!({ "action": "subscribe", "topic": "confirmation" });
        ws.send(Message::Text(subscribe.to_string().into()))
            .await
            .map_err(ws_error)?;
        info!(url = %url, "Subscribed to confirmations");

        Ok(Box::new(WsStream { inner: ws }))
    }
}

#[async_trait]
impl PushStream for WsStream {
    async fn next_confirmation(&mut self) -> AppResult<Option<Confirmation>> {
        while let Some(msg) = self.inner.next().await {
            match msg.map_err(ws_error)? {
                Message::Text(text) => match Confirmation::from_ws_json(&text) {
                    Ok(Some(confirmation)) => return Ok(Some(confirmation)),
                    Ok(None) => debug!("Ignoring non-confirmation frame"),
                    Err(e) => warn!(error = %e, "Failed to parse push message"),
                },
                Message::Close(_) => return Ok(None),
                // pongs are answered by tungstenite
                _ => {}
            }
        }
        Ok(None)
    }
}
