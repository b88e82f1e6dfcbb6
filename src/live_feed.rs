use crate::config::Config;
use crate::error::{Result, ViewerError};
use crate::stomp::Frame;
use futures::{SinkExt, StreamExt};
use log::{debug, error, info, trace, warn};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tokio_tungstenite::{connect_async, tungstenite::Message};

const SUBSCRIPTION_ID: &str = "sub-0";
const DISCONNECT_RECEIPT: &str = "disconnect-0";

/// Messages from the live feed to its consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedMessage {
    /// Subscribed to the log topic
    Connected,
    /// One raw backend log line
    Line(String),
    Disconnected,
}

/// How a single connection ended
enum SessionEnd {
    /// Server closed or the socket failed; reconnect after the delay
    Dropped,
    /// Shutdown requested or nobody is listening any more
    Stop,
}

/// Keeps one STOMP-over-WebSocket subscription to the log topic alive,
/// reconnecting with a fixed delay. No missed lines are replayed.
pub struct LiveFeed {
    url: String,
    host: String,
    topic: String,
    auth_token: Option<String>,
    reconnect_delay: Duration,
    message_tx: mpsc::Sender<FeedMessage>,
}

impl LiveFeed {
    pub fn new(config: &Config, message_tx: mpsc::Sender<FeedMessage>) -> Self {
        Self {
            url: config.live_feed_url(),
            host: config.host(),
            topic: config.topic.clone(),
            auth_token: config.token.clone(),
            reconnect_delay: config.reconnect_delay(),
            message_tx,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            info!("Connecting to log stream: {}", self.url);

            let end = match self.connect_and_stream(&mut shutdown).await {
                Ok(end) => end,
                Err(e) => {
                    error!("Log stream error: {}", e);
                    SessionEnd::Dropped
                }
            };

            if self.message_tx.send(FeedMessage::Disconnected).await.is_err() {
                break;
            }
            if let SessionEnd::Stop = end {
                break;
            }

            warn!("Reconnecting to log stream in {:?}", self.reconnect_delay);
            tokio::select! {
                _ = sleep(self.reconnect_delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        debug!("Log stream task finished");
    }

    async fn connect_and_stream(&self, shutdown: &mut watch::Receiver<bool>) -> Result<SessionEnd> {
        let (ws_stream, _) = tokio::select! {
            connected = connect_async(self.url.as_str()) => connected?,
            _ = shutdown.changed() => return Ok(SessionEnd::Stop),
        };
        let (mut writer, mut reader) = ws_stream.split();

        writer
            .send(Message::Text(
                Frame::connect(&self.host, self.auth_token.as_deref()).encode(),
            ))
            .await?;

        let mut subscribed = false;

        loop {
            tokio::select! {
                incoming = reader.next() => {
                    let text = match incoming {
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(Message::Close(frame))) => {
                            info!("Log stream closed by server: {:?}", frame);
                            return Ok(SessionEnd::Dropped);
                        }
                        Some(Ok(other)) => {
                            trace!("Ignoring non-text message: {:?}", other);
                            continue;
                        }
                        Some(Err(e)) => return Err(e.into()),
                        None => return Ok(SessionEnd::Dropped),
                    };

                    for frame in Frame::decode_all(&text)? {
                        match frame.command.as_str() {
                            "CONNECTED" if !subscribed => {
                                debug!("STOMP session established: {:?}", frame.get("version"));
                                writer
                                    .send(Message::Text(
                                        Frame::subscribe(SUBSCRIPTION_ID, &self.topic).encode(),
                                    ))
                                    .await?;
                                subscribed = true;
                                info!("Subscribed to {}", self.topic);
                                if self.message_tx.send(FeedMessage::Connected).await.is_err() {
                                    return Ok(SessionEnd::Stop);
                                }
                            }
                            "MESSAGE" => {
                                trace!("Log line received ({} bytes)", frame.body.len());
                                if self.message_tx.send(FeedMessage::Line(frame.body)).await.is_err() {
                                    return Ok(SessionEnd::Stop);
                                }
                            }
                            "ERROR" => {
                                let reason = frame
                                    .get("message")
                                    .map(str::to_string)
                                    .unwrap_or(frame.body);
                                return Err(ViewerError::StompError(reason));
                            }
                            other => debug!("Ignoring STOMP frame {}", other),
                        }
                    }
                }

                _ = shutdown.changed() => {
                    info!("Closing log stream");
                    let _ = writer
                        .send(Message::Text(Frame::disconnect(DISCONNECT_RECEIPT).encode()))
                        .await;
                    let _ = writer.send(Message::Close(None)).await;
                    return Ok(SessionEnd::Stop);
                }
            }
        }
    }
}
