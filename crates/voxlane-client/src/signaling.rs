use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{
    connect_async, tungstenite::protocol::Message as WsMessage, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, info, warn};
use url::Url;
use voxlane_common::{Error, Result, SignalingMessage};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Handler = Box<dyn FnMut(SignalingEvent) + Send + 'static>;

/// What the relay transport delivers to its consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingEvent {
    Message(SignalingMessage),
    /// The transport closed, locally or remotely. Delivered once, last.
    Disconnected { reason: String },
}

/// Outbound half of the relay transport, as seen by the negotiator.
pub trait SignalSink: Send + Sync {
    /// Fails with `Error::NotConnected` when the transport is not open.
    /// Success means the message was queued, not delivered.
    fn send(&self, message: SignalingMessage) -> Result<()>;
    /// Close the transport. Idempotent.
    fn close(&self);
}

/// WebSocket connection to the signaling relay.
pub struct SignalingChannel {
    endpoint: String,
    outgoing: mpsc::UnboundedSender<WsMessage>,
    open: Arc<AtomicBool>,
    shutdown: Arc<watch::Sender<Option<String>>>,
    reader: Mutex<Option<SplitStream<WsStream>>>,
}

impl SignalingChannel {
    /// Open the transport. Does not retry.
    pub async fn connect(endpoint: &str) -> Result<Self> {
        let url = Url::parse(endpoint)
            .map_err(|e| Error::transport(format!("invalid relay endpoint {endpoint}: {e}")))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(Error::transport(format!(
                "relay endpoint must be ws:// or wss://, got {}",
                url.scheme()
            )));
        }

        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| Error::transport(format!("{endpoint}: {e}")))?;
        info!("Connected to signaling relay: {}", endpoint);

        let (mut write, read) = ws_stream.split();
        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<WsMessage>();
        let open = Arc::new(AtomicBool::new(true));
        let (shutdown, _) = watch::channel::<Option<String>>(None);
        let shutdown = Arc::new(shutdown);

        // Task to push queued frames to the relay
        let writer_open = Arc::clone(&open);
        let writer_shutdown = Arc::clone(&shutdown);
        tokio::spawn(async move {
            while let Some(frame) = outgoing_rx.recv().await {
                let closing = matches!(frame, WsMessage::Close(_));
                if let Err(e) = write.send(frame).await {
                    error!("Failed to send signaling message: {}", e);
                    writer_open.store(false, Ordering::SeqCst);
                    mark_shutdown(&writer_shutdown, format!("send failed: {e}"));
                    break;
                }
                if closing {
                    break;
                }
            }
            let _ = write.close().await;
        });

        Ok(Self {
            endpoint: endpoint.to_string(),
            outgoing,
            open,
            shutdown,
            reader: Mutex::new(Some(read)),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Serialize and queue a message for the relay.
    pub fn send(&self, message: SignalingMessage) -> Result<()> {
        if !self.is_open() {
            return Err(Error::NotConnected);
        }
        let text = message.encode()?;
        self.outgoing
            .send(WsMessage::Text(text.into()))
            .map_err(|_| Error::NotConnected)?;
        debug!("-> relay: {}", message.kind());
        Ok(())
    }

    /// Register the single consumer of incoming messages.
    ///
    /// The handler sees every decodable message in arrival order, then one
    /// `Disconnected`. Malformed frames are logged and dropped.
    pub fn on_message<F>(&self, handler: F) -> Result<()>
    where
        F: FnMut(SignalingEvent) + Send + 'static,
    {
        let read = {
            let mut guard = match self.reader.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.take()
        }
        .ok_or_else(|| Error::transport("message handler already registered"))?;

        tokio::spawn(read_loop(
            read,
            Box::new(handler),
            Arc::clone(&self.open),
            Arc::clone(&self.shutdown),
        ));
        Ok(())
    }

    /// Convenience over [`on_message`](Self::on_message) that forwards every
    /// event into a channel.
    pub fn event_stream(&self) -> Result<mpsc::UnboundedReceiver<SignalingEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.on_message(move |event| {
            let _ = tx.send(event);
        })?;
        Ok(rx)
    }

    /// Close the transport. Idempotent.
    pub fn close(&self) {
        if !self.open.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("Closing signaling relay connection: {}", self.endpoint);
        let _ = self.outgoing.send(WsMessage::Close(None));
        mark_shutdown(&self.shutdown, "closed locally".to_string());
    }
}

impl SignalSink for SignalingChannel {
    fn send(&self, message: SignalingMessage) -> Result<()> {
        SignalingChannel::send(self, message)
    }

    fn close(&self) {
        SignalingChannel::close(self)
    }
}

impl Drop for SignalingChannel {
    fn drop(&mut self) {
        self.close();
    }
}

fn mark_shutdown(shutdown: &watch::Sender<Option<String>>, reason: String) {
    shutdown.send_if_modified(|current| {
        if current.is_none() {
            *current = Some(reason);
            true
        } else {
            false
        }
    });
}

async fn wait_shutdown(shutdown: &mut watch::Receiver<Option<String>>) -> String {
    match shutdown.wait_for(Option::is_some).await {
        Ok(reason) => reason.clone().unwrap_or_default(),
        Err(_) => "signaling channel dropped".to_string(),
    }
}

async fn read_loop(
    mut read: SplitStream<WsStream>,
    mut handler: Handler,
    open: Arc<AtomicBool>,
    shutdown: Arc<watch::Sender<Option<String>>>,
) {
    let mut shutdown_rx = shutdown.subscribe();
    let reason = loop {
        tokio::select! {
            biased;
            reason = wait_shutdown(&mut shutdown_rx) => break reason,
            frame = read.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => match SignalingMessage::decode(text.as_str()) {
                    Ok(Some(message)) => {
                        debug!("<- relay: {}", message.kind());
                        handler(SignalingEvent::Message(message));
                    }
                    Ok(None) => debug!("Ignoring signaling message of unknown type"),
                    Err(e) => warn!("Dropping signaling frame: {}", e),
                },
                Some(Ok(WsMessage::Binary(_))) => {
                    warn!("Dropping binary signaling frame");
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    break match frame {
                        Some(frame) if !frame.reason.is_empty() => {
                            format!("closed by relay: {}", frame.reason.as_str())
                        }
                        _ => "closed by relay".to_string(),
                    };
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!("Signaling WebSocket error: {}", e);
                    break e.to_string();
                }
                None => break "relay stream ended".to_string(),
            },
        }
    };

    open.store(false, Ordering::SeqCst);
    mark_shutdown(&shutdown, reason.clone());
    info!("Signaling relay disconnected: {}", reason);
    handler(SignalingEvent::Disconnected { reason });
}
