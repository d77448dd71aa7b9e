//! Firehose ingestor
//!
//! Long-lived consumer of the network's repository event stream. Every
//! event is reduced to the DID it concerns (event-level `did`, falling back
//! to the `repo` field) and pushed onto the Schedule queue; payloads are
//! discarded. The connection reconnects forever with capped exponential
//! backoff, and a watchdog forces a reconnect when the stream goes silent
//! for longer than the heartbeat window.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::queue::WorkQueue;
use crate::types::Did;

#[derive(Debug, Clone)]
pub struct FirehoseConfig {
    /// Host of the event stream (the daemon subscribes at `/subscribe`).
    pub host: String,
    /// Silence longer than this forces a reconnect.
    pub heartbeat: Duration,
    /// How often the watchdog checks for silence.
    pub probe_interval: Duration,
}

impl FirehoseConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            heartbeat: Duration::from_secs(20),
            probe_interval: Duration::from_secs(5),
        }
    }
}

/// Consume the firehose until shutdown, pushing observed DIDs onto the
/// Schedule queue.
pub async fn run_firehose(
    config: FirehoseConfig,
    schedule: Arc<WorkQueue<Did>>,
    cancel: CancellationToken,
) {
    let url = format!("wss://{}/subscribe", config.host);
    let mut reconnect_delay = Duration::from_millis(500);
    let max_reconnect_delay = Duration::from_secs(30);

    loop {
        if cancel.is_cancelled() {
            return;
        }

        info!(url = %url, "firehose connecting");
        match connect_async(&url).await {
            Ok((ws, _)) => {
                info!("firehose connected");
                reconnect_delay = Duration::from_millis(500);

                consume_stream(ws, &config, &schedule, &cancel).await;

                if cancel.is_cancelled() {
                    return;
                }
                info!("firehose disconnected");
            }
            Err(e) => {
                error!(error = %e, "firehose connection error");
            }
        }

        warn!(delay = ?reconnect_delay, "firehose reconnecting");
        tokio::select! {
            _ = tokio::time::sleep(reconnect_delay) => {}
            _ = cancel.cancelled() => return,
        }
        reconnect_delay = (reconnect_delay * 2).min(max_reconnect_delay);
    }
}

/// Read events until the connection drops, the watchdog fires, or shutdown.
async fn consume_stream(
    ws: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    config: &FirehoseConfig,
    schedule: &WorkQueue<Did>,
    cancel: &CancellationToken,
) {
    let (mut sink, mut stream) = ws.split();
    let mut probe = tokio::time::interval(config.probe_interval);
    probe.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut last_event = Instant::now();

    loop {
        tokio::select! {
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        last_event = Instant::now();
                        if let Some(did) = extract_did(&text) {
                            schedule.push(did);
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        last_event = Instant::now();
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        info!(?frame, "firehose closed by server");
                        return;
                    }
                    Some(Ok(_)) => {
                        // Binary frames and pongs still prove liveness.
                        last_event = Instant::now();
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "firehose read error");
                        return;
                    }
                    None => {
                        info!("firehose stream ended");
                        return;
                    }
                }
            }
            _ = probe.tick() => {
                if last_event.elapsed() > config.heartbeat {
                    warn!(
                        silent_for = ?last_event.elapsed(),
                        "firehose heartbeat timeout, forcing reconnect"
                    );
                    return;
                }
            }
            _ = cancel.cancelled() => {
                debug!("firehose shutting down");
                return;
            }
        }
    }
}

/// The DID an event concerns: the event-level `did`, else the `repo` field.
fn extract_did(raw: &str) -> Option<Did> {
    let event: Value = serde_json::from_str(raw).ok()?;
    let did = event
        .get("did")
        .and_then(Value::as_str)
        .or_else(|| event.get("repo").and_then(Value::as_str))?;
    if did.is_empty() {
        return None;
    }
    Some(did.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_event_level_did() {
        let raw = r#"{"did":"did:plc:top","repo":"did:plc:fallback","kind":"commit"}"#;
        assert_eq!(extract_did(raw).as_deref(), Some("did:plc:top"));
    }

    #[test]
    fn falls_back_to_repo_field() {
        let raw = r#"{"repo":"did:plc:fallback","ops":[{"action":"create"}]}"#;
        assert_eq!(extract_did(raw).as_deref(), Some("did:plc:fallback"));
    }

    #[test]
    fn events_without_a_did_are_dropped() {
        assert!(extract_did(r#"{"kind":"info"}"#).is_none());
        assert!(extract_did(r#"{"did":""}"#).is_none());
        assert!(extract_did("not json").is_none());
    }
}
