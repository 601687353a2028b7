//! The persistent channel to the control plane.

use futures::{SinkExt, StreamExt};
use legator_wire::Envelope;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ProbeError, ProbeResult};

/// Initial reconnect delay.
const BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Reconnect delay cap.
const BACKOFF_CAP: Duration = Duration::from_secs(60);

/// Header naming the connecting probe.
pub(crate) const PROBE_ID_HEADER: &str = "x-legator-probe-id";

/// A live channel: an inbox of parsed envelopes and an outbox sender.
///
/// Dropping the connection (or either endpoint closing) ends both pump
/// tasks; the agent loop reconnects with backoff.
pub struct Connection {
    /// Envelopes received from the control plane.
    pub inbox: mpsc::Receiver<Envelope>,
    /// Envelopes to send to the control plane.
    pub outbox: mpsc::Sender<Envelope>,
}

impl Connection {
    /// Dial the control plane once.
    ///
    /// `http`/`https` URLs are converted to `ws`/`wss`; authentication is
    /// the probe's API key as a bearer token plus the probe id header.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::Connection`] on dial or handshake failure.
    pub async fn connect(
        server_url: &str,
        probe_id: &str,
        api_key: &str,
    ) -> ProbeResult<Self> {
        let ws_url = websocket_url(server_url);
        let mut request = ws_url
            .clone()
            .into_client_request()
            .map_err(|e| ProbeError::Connection(e.to_string()))?;
        let headers = request.headers_mut();
        headers.insert(
            AUTHORIZATION,
            format!("Bearer {api_key}")
                .parse()
                .map_err(|_| ProbeError::Connection("invalid api key header".into()))?,
        );
        headers.insert(
            PROBE_ID_HEADER,
            probe_id
                .parse()
                .map_err(|_| ProbeError::Connection("invalid probe id header".into()))?,
        );

        let (socket, _) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| ProbeError::Connection(e.to_string()))?;
        info!(url = %ws_url, "connected to control plane");

        let (mut sink, mut stream) = socket.split();
        let (inbox_tx, inbox) = mpsc::channel::<Envelope>(64);
        let (outbox, mut outbox_rx) = mpsc::channel::<Envelope>(64);

        // Reader: ws frames -> inbox.
        tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Message::Text(text)) => match serde_json::from_str::<Envelope>(&text) {
                        Ok(envelope) => {
                            if inbox_tx.send(envelope).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!(error = %e, "undecodable frame dropped"),
                    },
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
            debug!("channel reader stopped");
        });

        // Writer: outbox -> ws frames.
        tokio::spawn(async move {
            while let Some(envelope) = outbox_rx.recv().await {
                let Ok(text) = serde_json::to_string(&envelope) else {
                    continue;
                };
                if sink.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
            debug!("channel writer stopped");
        });

        Ok(Self { inbox, outbox })
    }

    /// Dial with exponential backoff until connected or cancelled.
    ///
    /// Returns `None` when `cancel` fires first.
    pub async fn connect_with_backoff(
        server_url: &str,
        probe_id: &str,
        api_key: &str,
        cancel: &CancellationToken,
    ) -> Option<Self> {
        let mut delay = BACKOFF_BASE;
        loop {
            match Self::connect(server_url, probe_id, api_key).await {
                Ok(connection) => return Some(connection),
                Err(e) => {
                    warn!(error = %e, retry_in = ?delay, "connect failed");
                }
            }
            tokio::select! {
                () = cancel.cancelled() => return None,
                () = tokio::time::sleep(delay) => {}
            }
            delay = (delay * 2).min(BACKOFF_CAP);
        }
    }
}

/// Convert an HTTP control-plane URL to its websocket endpoint.
fn websocket_url(server_url: &str) -> String {
    let base = server_url.trim_end_matches('/');
    let converted = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    };
    format!("{converted}/api/v1/probes/connect")
}
