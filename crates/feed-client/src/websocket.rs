//! WebSocket client for price room subscriptions.

use crate::error::Error;
use crate::types::{ConnectedInfo, PriceUpdate};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::{self, Message};
use url::Url;

/// Messages received from the server.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerMessage {
    /// Admission confirmed.
    #[serde(rename = "connected")]
    Connected(ConnectedInfo),
    /// New price for a subscribed instrument.
    #[serde(rename = "price:update")]
    PriceUpdate(PriceUpdate),
    /// Error message, sent before the server closes the connection.
    #[serde(rename = "error")]
    Error(String),
    /// The server closed the connection.
    #[serde(skip)]
    Closed {
        /// Close code, if the server sent one.
        code: Option<u16>,
        /// Close reason.
        reason: String,
    },
}

/// Commands sent to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
pub enum ClientCommand {
    /// Join a room.
    Subscribe {
        /// Room name.
        room: String,
    },
    /// Leave a room.
    Unsubscribe {
        /// Room name.
        room: String,
    },
    /// Present a bearer token after connecting.
    Auth {
        /// Bearer token.
        token: String,
    },
}

/// Appends `token` to `url` as the `token` query parameter.
///
/// # Errors
/// Returns [`Error::InvalidUrl`] if `url` cannot be parsed.
pub fn with_token(url: &str, token: &str) -> Result<String, Error> {
    let mut url = Url::parse(url)?;
    url.query_pairs_mut().append_pair("token", token);
    Ok(url.into())
}

/// WebSocket client for receiving price updates.
///
/// Dropping the client (or calling [`WsClient::close`]) closes the
/// connection.
pub struct WsClient {
    rx: mpsc::Receiver<ServerMessage>,
    tx: Option<mpsc::Sender<ClientCommand>>,
}

impl WsClient {
    /// Connects to the WebSocket server.
    ///
    /// With `Some(token)` the token travels in the `token` query parameter;
    /// with `None` the caller is expected to [`authenticate`](Self::authenticate).
    ///
    /// # Errors
    /// Returns error if the URL is invalid or the connection fails.
    pub async fn connect(url: &str, token: Option<&str>) -> Result<Self, Error> {
        let url = match token {
            Some(token) => with_token(url, token)?,
            None => url.to_string(),
        };
        let request = url.into_client_request().map_err(Box::new)?;
        Self::connect_request(request).await
    }

    /// Connects with the token in an `Authorization: Bearer` header.
    ///
    /// # Errors
    /// Returns error if the header is invalid or the connection fails.
    pub async fn connect_with_bearer(url: &str, token: &str) -> Result<Self, Error> {
        let mut request = url.into_client_request().map_err(Box::new)?;
        let value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| Box::new(tungstenite::Error::HttpFormat(e.into())))?;
        request.headers_mut().insert(AUTHORIZATION, value);
        Self::connect_request(request).await
    }

    async fn connect_request(
        request: tungstenite::handshake::client::Request,
    ) -> Result<Self, Error> {
        let (ws_stream, _) = connect_async(request).await.map_err(Box::new)?;
        let (mut write, mut read) = ws_stream.split();

        // Channel for receiving messages
        let (msg_tx, msg_rx) = mpsc::channel::<ServerMessage>(100);

        // Channel for sending commands
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<ClientCommand>(100);

        tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        if let Ok(message) = serde_json::from_str::<ServerMessage>(&text)
                            && msg_tx.send(message).await.is_err()
                        {
                            break;
                        }
                    }
                    Ok(Message::Close(frame)) => {
                        let (code, reason) = match frame {
                            Some(frame) => (Some(u16::from(frame.code)), frame.reason.as_str().to_string()),
                            None => (None, String::new()),
                        };
                        let _ = msg_tx.send(ServerMessage::Closed { code, reason }).await;
                        break;
                    }
                    Err(_) => break,
                    _ => {}
                }
            }
        });

        tokio::spawn(async move {
            while let Some(cmd) = cmd_rx.recv().await {
                if let Ok(json) = serde_json::to_string(&cmd)
                    && write.send(Message::Text(json.into())).await.is_err()
                {
                    return;
                }
            }
            let _ = write.send(Message::Close(None)).await;
        });

        Ok(Self {
            rx: msg_rx,
            tx: Some(cmd_tx),
        })
    }

    /// Receives the next message from the server.
    ///
    /// Returns `None` once the connection is gone.
    pub async fn recv(&mut self) -> Option<ServerMessage> {
        self.rx.recv().await
    }

    /// Sends a command to the server.
    ///
    /// # Errors
    /// Returns [`Error::ConnectionClosed`] if the connection is gone.
    pub async fn send(&self, cmd: ClientCommand) -> Result<(), Error> {
        match &self.tx {
            Some(tx) => tx.send(cmd).await.map_err(|_| Error::ConnectionClosed),
            None => Err(Error::ConnectionClosed),
        }
    }

    /// Joins a room.
    ///
    /// # Errors
    /// Returns error if the send fails.
    pub async fn subscribe(&self, room: &str) -> Result<(), Error> {
        self.send(ClientCommand::Subscribe {
            room: room.to_string(),
        })
        .await
    }

    /// Leaves a room.
    ///
    /// # Errors
    /// Returns error if the send fails.
    pub async fn unsubscribe(&self, room: &str) -> Result<(), Error> {
        self.send(ClientCommand::Unsubscribe {
            room: room.to_string(),
        })
        .await
    }

    /// Sends the bearer token in an `auth` frame.
    ///
    /// # Errors
    /// Returns error if the send fails.
    pub async fn authenticate(&self, token: &str) -> Result<(), Error> {
        self.send(ClientCommand::Auth {
            token: token.to_string(),
        })
        .await
    }

    /// Closes the connection. Messages already received can still be read.
    pub fn close(&mut self) {
        self.tx = None;
    }
}
