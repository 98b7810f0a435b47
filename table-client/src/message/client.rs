use crate::error::ClientResult;
use crate::message::transport::{MemoryTransport, TcpTransport, Transport};
use crate::message::{FeedClientConfig, MessageError};
use crate::store::{ChangeFeed, FeedSubscription, feed_channel};
use async_trait::async_trait;
use shared::message::{
    BusMessage, EventType, HandshakePayload, PROTOCOL_VERSION, ResponsePayload,
    TableChangedPayload,
};
use shared::{TableChange, TableId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

type PendingRequests = Arc<Mutex<HashMap<Uuid, oneshot::Sender<BusMessage>>>>;

/// Change feed client
///
/// Speaks the subscription protocol over one connection: a reader task
/// routes `Response` frames to pending requests and fans `TableChanged`
/// frames out to every open subscription, each of which keeps only its
/// own table.
#[derive(Debug, Clone)]
pub struct FeedClient {
    transport: ClientTransport,
    changes_tx: broadcast::Sender<TableChange>,
    pending_requests: PendingRequests,
    config: FeedClientConfig,
    shutdown: CancellationToken,
}

#[derive(Debug, Clone)]
enum ClientTransport {
    Tcp(TcpTransport),
    Memory(MemoryTransport),
}

impl ClientTransport {
    async fn read_message(&self) -> Result<BusMessage, MessageError> {
        match self {
            ClientTransport::Tcp(t) => t.read_message().await,
            ClientTransport::Memory(t) => t.read_message().await,
        }
    }

    async fn write_message(&self, msg: &BusMessage) -> Result<(), MessageError> {
        match self {
            ClientTransport::Tcp(t) => t.write_message(msg).await,
            ClientTransport::Memory(t) => t.write_message(msg).await,
        }
    }

    async fn close(&self) -> Result<(), MessageError> {
        match self {
            ClientTransport::Tcp(t) => t.close().await,
            ClientTransport::Memory(t) => t.close().await,
        }
    }
}

impl FeedClient {
    /// Connect via TCP and perform the handshake
    pub async fn connect(addr: &str, config: FeedClientConfig) -> Result<Self, MessageError> {
        let transport = TcpTransport::connect(addr).await?;
        tracing::info!(addr, "Connected to change feed");
        Self::handshake(ClientTransport::Tcp(transport), config).await
    }

    /// Create an in-memory client
    pub async fn memory(
        server_broadcast_tx: &broadcast::Sender<BusMessage>,
        client_to_server_tx: &broadcast::Sender<BusMessage>,
        config: FeedClientConfig,
    ) -> Result<Self, MessageError> {
        let transport = MemoryTransport::new(server_broadcast_tx, client_to_server_tx);
        Self::handshake(ClientTransport::Memory(transport), config).await
    }

    async fn handshake(
        transport: ClientTransport,
        config: FeedClientConfig,
    ) -> Result<Self, MessageError> {
        // 🤝 Perform Handshake
        let payload = HandshakePayload {
            version: PROTOCOL_VERSION,
            client_name: Some(config.client_name.clone()),
            client_version: Some(env!("CARGO_PKG_VERSION").to_string()),
            client_id: None, // Let server generate
        };
        transport
            .write_message(&BusMessage::handshake(&payload)?)
            .await?;

        Ok(Self::new(transport, config))
    }

    fn new(transport: ClientTransport, config: FeedClientConfig) -> Self {
        let (changes_tx, _) = broadcast::channel(1024);
        let pending_requests: PendingRequests = Arc::new(Mutex::new(HashMap::new()));
        let shutdown = CancellationToken::new();

        let client = Self {
            transport: transport.clone(),
            changes_tx: changes_tx.clone(),
            pending_requests: pending_requests.clone(),
            config,
            shutdown: shutdown.clone(),
        };

        // Spawn background task to dispatch messages
        tokio::spawn(async move {
            loop {
                let msg = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    msg = transport.read_message() => msg,
                };
                match msg {
                    Ok(msg) => dispatch(msg, &pending_requests, &changes_tx),
                    Err(e) => {
                        // 连接断开: 订阅静默结束, 由新会话重新订阅
                        tracing::warn!("Change feed read error: {}", e);
                        break;
                    }
                }
            }
            // Fail any request still waiting for a reply
            if let Ok(mut pending) = pending_requests.lock() {
                pending.clear();
            }
        });

        client
    }

    /// Send a message and await the server's response.
    pub async fn request(&self, msg: &BusMessage) -> Result<BusMessage, MessageError> {
        let request_id = msg.request_id;
        let (tx, rx) = oneshot::channel();

        self.pending()?.insert(request_id, tx);

        if let Err(e) = self.transport.write_message(msg).await {
            self.pending()?.remove(&request_id);
            return Err(e);
        }

        match tokio::time::timeout(self.config.request_timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(MessageError::Connection(
                "Response channel closed".to_string(),
            )),
            Err(_) => {
                self.pending()?.remove(&request_id);
                Err(MessageError::Timeout(format!(
                    "{} timed out",
                    msg.event_type
                )))
            }
        }
    }

    fn pending(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<Uuid, oneshot::Sender<BusMessage>>>, MessageError>
    {
        self.pending_requests
            .lock()
            .map_err(|_| MessageError::Connection("Pending request table poisoned".to_string()))
    }

    /// Close the client connection
    pub async fn close(&self) -> Result<(), MessageError> {
        self.shutdown.cancel();
        self.transport.close().await
    }

    async fn open(&self, table_id: TableId) -> Result<FeedSubscription, MessageError> {
        // Listen before subscribing so no change between the two is lost
        let mut changes = self.changes_tx.subscribe();

        let response = self.request(&BusMessage::subscribe(table_id)?).await?;
        let reply: ResponsePayload = response.parse_payload()?;
        if !reply.success {
            return Err(MessageError::Rejected(reply.message));
        }

        let (publisher, subscription) = feed_channel(table_id, self.config.subscription_buffer);
        let transport = self.transport.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = publisher.cancelled() => break,
                    change = changes.recv() => match change {
                        Ok(change) if change.id == table_id => {
                            if !publisher.publish(change).await {
                                break;
                            }
                        }
                        Ok(_) => continue,
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!(table_id, "Change feed lagged, {} updates skipped", n);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }

            match BusMessage::unsubscribe(table_id) {
                Ok(msg) => {
                    if let Err(e) = transport.write_message(&msg).await {
                        tracing::debug!(table_id, "Unsubscribe not delivered: {}", e);
                    }
                }
                Err(e) => tracing::warn!(table_id, "Failed to encode unsubscribe: {}", e),
            }
            tracing::debug!(table_id, "Feed subscription ended");
        });

        Ok(subscription)
    }
}

fn dispatch(
    msg: BusMessage,
    pending_requests: &PendingRequests,
    changes_tx: &broadcast::Sender<TableChange>,
) {
    match msg.event_type {
        EventType::Response => {
            let Some(correlation_id) = msg.correlation_id else {
                tracing::debug!("Uncorrelated response dropped");
                return;
            };
            let waiter = pending_requests
                .lock()
                .ok()
                .and_then(|mut pending| pending.remove(&correlation_id));
            if let Some(tx) = waiter {
                let _ = tx.send(msg);
            }
        }
        EventType::TableChanged => match msg.parse_payload::<TableChangedPayload>() {
            Ok(payload) => {
                if let Err(e) = changes_tx.send(payload.change) {
                    tracing::debug!("No subscribers for change: {}", e);
                }
            }
            Err(e) => tracing::warn!("Malformed table change: {}", e),
        },
        other => tracing::debug!("Ignoring {} frame", other),
    }
}

#[async_trait]
impl ChangeFeed for FeedClient {
    async fn subscribe(&self, table_id: TableId) -> ClientResult<FeedSubscription> {
        Ok(self.open(table_id).await?)
    }
}
