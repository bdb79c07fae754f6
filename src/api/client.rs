//! Foreground side of the bridge.

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use futures_util::StreamExt;

use super::websocket::SignalMessage;
use super::{ApiResponse, Lifecycle, LivenessUpdate, LocationUpdate, SessionUpdate};
use crate::dispatch::DispatchRecord;

#[derive(Error, Debug)]
pub enum BridgeClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("Bridge rejected request ({status}): {message}")]
    Rejected { status: StatusCode, message: String },
    #[error("Malformed signal: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Clone)]
pub struct BridgeClient {
    http: reqwest::Client,
    base_url: String,
}

impl BridgeClient {
    pub fn new(base_url: &str) -> Result<Self, BridgeClientError> {
        let http = reqwest::Client::builder().timeout(Duration::from_secs(5)).build()?;
        Ok(Self { http, base_url: base_url.trim_end_matches('/').to_string() })
    }

    pub async fn update_liveness(&self, update: &LivenessUpdate) -> Result<(), BridgeClientError> {
        self.put("/liveness", update).await
    }

    pub async fn report_lifecycle(&self, lifecycle: Lifecycle) -> Result<(), BridgeClientError> {
        self.update_liveness(&LivenessUpdate { lifecycle: Some(lifecycle), ..Default::default() })
            .await
    }

    pub async fn set_live_channel(&self, active: bool) -> Result<(), BridgeClientError> {
        self.update_liveness(&LivenessUpdate { live_channel_active: Some(active), ..Default::default() })
            .await
    }

    pub async fn save_session(&self, token: &str, base_url: Option<&str>) -> Result<(), BridgeClientError> {
        let body = SessionUpdate { token: token.to_string(), base_url: base_url.map(str::to_string) };
        self.put("/session", &body).await
    }

    pub async fn clear_session(&self) -> Result<(), BridgeClientError> {
        let response = self.http.delete(self.url("/session")).send().await?;
        check::<serde_json::Value>(response).await.map(|_| ())
    }

    pub async fn set_location(&self, lat: f64, lng: f64) -> Result<(), BridgeClientError> {
        self.put("/location", &LocationUpdate { lat, lng }).await
    }

    pub async fn recent_alerts(&self, limit: usize) -> Result<Vec<DispatchRecord>, BridgeClientError> {
        let response = self
            .http
            .get(self.url("/alerts"))
            .query(&[("limit", limit)])
            .send()
            .await?;
        Ok(check::<Vec<DispatchRecord>>(response).await?.unwrap_or_default())
    }

    /// Open the live signal stream
    pub async fn subscribe(&self) -> Result<SignalSubscription, BridgeClientError> {
        let ws_url = format!("{}/ws", self.base_url.replacen("http", "ws", 1));
        let (socket, _) = connect_async(ws_url.as_str()).await?;
        Ok(SignalSubscription { socket })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn put<B: Serialize>(&self, path: &str, body: &B) -> Result<(), BridgeClientError> {
        let response = self.http.put(self.url(path)).json(body).send().await?;
        check::<serde_json::Value>(response).await.map(|_| ())
    }
}

async fn check<T: DeserializeOwned>(response: reqwest::Response) -> Result<Option<T>, BridgeClientError> {
    let status = response.status();
    let body: ApiResponse<T> = response.json().await?;
    if status.is_success() && body.success {
        Ok(body.data)
    } else {
        Err(BridgeClientError::Rejected {
            status,
            message: body.error.unwrap_or_else(|| "unknown error".to_string()),
        })
    }
}

/// An open `/ws` connection
pub struct SignalSubscription {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl SignalSubscription {
    /// Next signal; `None` once the bridge closes the stream
    pub async fn next(&mut self) -> Option<Result<SignalMessage, BridgeClientError>> {
        while let Some(message) = self.socket.next().await {
            match message {
                Ok(Message::Text(text)) => {
                    return Some(serde_json::from_str(&text).map_err(BridgeClientError::from));
                }
                Ok(Message::Close(_)) => return None,
                Ok(_) => continue,
                Err(e) => return Some(Err(e.into())),
            }
        }
        None
    }
}
