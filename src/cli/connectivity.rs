//! WebSocket transport for the catalogue control connection.
//!
//! One `WsTransport` is one TLS WebSocket; every command and reply is a single
//! text message. Pings are answered by tungstenite and never surface here.

use std::io::ErrorKind;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use rustls::ClientConfig;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{Connector, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

use crate::config::{Settings, MAX_MESSAGE_SIZE};
use crate::error::{AppError, AppResult};
use crate::identity::Identity;
use crate::session::tls;
use crate::session::Transport;

pub struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

fn ws_error(e: WsError) -> AppError {
    match e {
        WsError::Tls(t) => AppError::tls("tls_handshake", t.to_string()),
        WsError::Io(io) if io.kind() == ErrorKind::InvalidData => AppError::tls("tls_handshake", io.to_string()),
        WsError::ConnectionClosed | WsError::AlreadyClosed => AppError::transport("closed", "connection closed"),
        other => AppError::transport("websocket", other.to_string()),
    }
}

impl WsTransport {
    /// Open `url` presenting the client certificate in `config`.
    pub async fn open(url: &str, config: Arc<ClientConfig>) -> AppResult<Self> {
        let req = url
            .into_client_request()
            .map_err(|e| AppError::user("bad_endpoint", format!("{}: {}", url, e)))?;
        let mut ws_cfg = WebSocketConfig::default();
        ws_cfg.max_message_size = Some(MAX_MESSAGE_SIZE);
        ws_cfg.max_frame_size = Some(MAX_MESSAGE_SIZE);
        let (stream, resp) = tokio_tungstenite::connect_async_tls_with_config(
            req,
            Some(ws_cfg),
            false,
            Some(Connector::Rustls(config)),
        )
        .await
        .map_err(ws_error)?;
        debug!(target: "jsh::ws", "upgrade answered with {}", resp.status());
        Ok(Self { stream })
    }
}

/// Build the TLS config for `identity` and open the configured endpoint.
pub async fn connect(settings: &Settings, identity: &Identity) -> AppResult<WsTransport> {
    let config = tls::client_config(identity, &settings.ca_dirs)?;
    let url = settings.ws_url();
    info!(target: "jsh::ws", "connecting to {}", url);
    WsTransport::open(&url, config).await
}

#[async_trait]
impl Transport for WsTransport {
    async fn send_text(&mut self, text: String) -> AppResult<()> {
        self.stream.send(Message::Text(text)).await.map_err(ws_error)
    }

    async fn recv_text(&mut self) -> AppResult<String> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(s))) => return Ok(s),
                Some(Ok(Message::Binary(b))) => return Ok(String::from_utf8_lossy(&b).into_owned()),
                Some(Ok(Message::Close(frame))) => {
                    let why = frame.map(|f| f.reason.to_string()).unwrap_or_default();
                    return Err(AppError::transport("closed", format!("server closed the connection {}", why).trim_end()));
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(ws_error(e)),
                None => return Err(AppError::transport("closed", "connection closed by peer")),
            }
        }
    }

    async fn close(&mut self) -> AppResult<()> {
        match self.stream.close(None).await {
            Ok(()) | Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(ws_error(e)),
        }
    }
}
