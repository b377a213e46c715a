//! Event channel client: one live connection to the message source, channel
//! subscriptions, and a chronological buffer of received events.
//!
//! Delivery is at-most-once: events lost across a disconnect are not
//! replayed. Malformed frames are dropped and processing continues with the
//! next event.

use std::{
    collections::{HashSet, VecDeque},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use futures::{stream::SplitSink, SinkExt, StreamExt};
use shared::{
    domain::ChannelName,
    error::TransportError,
    protocol::{ImpactEvent, StreamRequest},
};
use tokio::{net::TcpStream, sync::Mutex, task::JoinHandle};
use tokio_tungstenite::{
    connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};

use crate::EngineInput;

type WsWriter = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

pub struct EventChannelClient {
    url: String,
    writer: Mutex<Option<WsWriter>>,
    subscriptions: Mutex<HashSet<ChannelName>>,
    buffer: Mutex<VecDeque<ImpactEvent>>,
    buffer_capacity: usize,
    connected: AtomicBool,
    sink: tokio::sync::mpsc::UnboundedSender<EngineInput>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
}

impl EventChannelClient {
    pub async fn connect(
        url: impl Into<String>,
        buffer_capacity: usize,
        sink: tokio::sync::mpsc::UnboundedSender<EngineInput>,
    ) -> Result<Arc<Self>, TransportError> {
        let client = Arc::new(Self {
            url: url.into(),
            writer: Mutex::new(None),
            subscriptions: Mutex::new(HashSet::new()),
            buffer: Mutex::new(VecDeque::new()),
            buffer_capacity,
            connected: AtomicBool::new(false),
            sink,
            reader_task: Mutex::new(None),
        });
        client.dial().await?;
        Ok(client)
    }

    async fn dial(self: &Arc<Self>) -> Result<(), TransportError> {
        let (ws_stream, _) = connect_async(&self.url)
            .await
            .map_err(|err| TransportError::new(format!("websocket connect failed: {err}")))?;
        let (writer, mut reader) = ws_stream.split();
        *self.writer.lock().await = Some(writer);
        self.connected.store(true, Ordering::SeqCst);
        info!(url = %self.url, "event stream connected");

        let client = Arc::clone(self);
        let task = tokio::spawn(async move {
            while let Some(message) = reader.next().await {
                match message {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ImpactEvent>(&text) {
                        Ok(event) => client.ingest(event).await,
                        Err(err) => {
                            warn!(error = %err, "malformed event payload dropped");
                        }
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        warn!(error = %err, "event stream receive failed");
                        break;
                    }
                }
            }
            client.connected.store(false, Ordering::SeqCst);
            *client.writer.lock().await = None;
            let _ = client.sink.send(EngineInput::TransportDown);
        });
        *self.reader_task.lock().await = Some(task);
        Ok(())
    }

    async fn ingest(&self, event: ImpactEvent) {
        {
            let subscriptions = self.subscriptions.lock().await;
            if !subscriptions.contains(&event.channel) {
                debug!(channel = %event.channel, "event for unsubscribed channel ignored");
                return;
            }
        }
        {
            let mut buffer = self.buffer.lock().await;
            if buffer.len() == self.buffer_capacity {
                buffer.pop_front();
            }
            buffer.push_back(event.clone());
        }
        let _ = self.sink.send(EngineInput::Event(event));
    }

    /// Fire-and-forget subscribe. Membership is tracked locally; no
    /// acknowledgment is expected from the transport.
    pub async fn subscribe(&self, channel: ChannelName) {
        self.subscriptions.lock().await.insert(channel.clone());
        self.send_request(StreamRequest::Subscribe { channel }).await;
    }

    pub async fn unsubscribe(&self, channel: ChannelName) {
        self.subscriptions.lock().await.remove(&channel);
        self.send_request(StreamRequest::Unsubscribe { channel })
            .await;
    }

    async fn send_request(&self, request: StreamRequest) {
        let frame = match serde_json::to_string(&request) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(error = %err, "subscription frame serialization failed");
                return;
            }
        };
        let mut writer = self.writer.lock().await;
        if let Some(writer) = writer.as_mut() {
            if let Err(err) = writer.send(Message::Text(frame)).await {
                warn!(error = %err, "subscription frame send failed");
            }
        } else {
            debug!("subscription frame dropped, stream disconnected");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Re-dial and re-subscribe the current membership set. Events missed
    /// while disconnected are gone; the UI must tolerate the gap.
    pub async fn reconnect(self: &Arc<Self>) -> Result<(), TransportError> {
        if self.is_connected() {
            return Ok(());
        }
        if let Some(task) = self.reader_task.lock().await.take() {
            task.abort();
        }
        self.dial().await?;
        let channels: Vec<ChannelName> = {
            let subscriptions = self.subscriptions.lock().await;
            subscriptions.iter().cloned().collect()
        };
        for channel in channels {
            self.send_request(StreamRequest::Subscribe { channel }).await;
        }
        Ok(())
    }

    /// The chronological buffer of received events, oldest first.
    pub async fn recent_events(&self) -> Vec<ImpactEvent> {
        self.buffer.lock().await.iter().cloned().collect()
    }

    pub async fn shutdown(&self) {
        if let Some(task) = self.reader_task.lock().await.take() {
            task.abort();
        }
        let mut writer = self.writer.lock().await;
        if let Some(writer) = writer.as_mut() {
            let _ = writer.close().await;
        }
        self.connected.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
#[path = "tests/stream_tests.rs"]
mod tests;
