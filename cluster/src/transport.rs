use async_trait::async_trait;
use bytes::Bytes;
use hastream_common::Result;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Application message type carried by recovery markers
pub const SENTINEL: &str = "SENTINEL";

/// Session connectivity events reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Up,
    Down,
    Reconnecting,
    Reconnected,
}

/// Flow events for a queue binding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowEvent {
    /// Binding established
    Up,

    /// This binding is now the exclusive, message-receiving consumer
    Active,

    /// This binding lost its exclusive status
    Inactive,

    /// Broker unbound the flow
    Down,
}

/// Which of a member's two bindings an event belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowKind {
    Input,
    State,
}

impl std::fmt::Display for FlowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlowKind::Input => write!(f, "input"),
            FlowKind::State => write!(f, "state"),
        }
    }
}

/// A message as delivered by the broker
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerMessage {
    pub payload: Bytes,

    /// Control tag; payload messages leave it unset
    pub application_message_type: Option<String>,

    /// Topic the message was published to, if any
    pub topic: Option<String>,
}

impl BrokerMessage {
    pub fn payload(topic: impl Into<String>, payload: Bytes) -> Self {
        Self {
            payload,
            application_message_type: None,
            topic: Some(topic.into()),
        }
    }

    /// Recovery marker carrying the token of the activation that sent it
    pub fn sentinel(token: &str) -> Self {
        Self {
            payload: Bytes::copy_from_slice(token.as_bytes()),
            application_message_type: Some(SENTINEL.to_string()),
            topic: None,
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.application_message_type.as_deref() == Some(SENTINEL)
    }

    /// Activation token of a recovery marker
    pub fn marker_token(&self) -> Option<&str> {
        if !self.is_sentinel() {
            return None;
        }
        std::str::from_utf8(&self.payload).ok()
    }
}

/// Everything a transport can tell a cluster member, in delivery order
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Session(SessionEvent),
    Flow { flow: FlowKind, event: FlowEvent },
    Message { flow: FlowKind, message: BrokerMessage },
}

/// Receives session events on behalf of a member.
///
/// Every sink handed out by one member feeds the same ordered mailbox, so
/// events reach the member one at a time.
#[derive(Debug, Clone)]
pub struct SessionSink {
    tx: mpsc::UnboundedSender<TransportEvent>,
}

impl SessionSink {
    pub fn new(tx: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self { tx }
    }

    /// Returns false once the member has gone away.
    pub fn session_event(&self, event: SessionEvent) -> bool {
        self.tx.send(TransportEvent::Session(event)).is_ok()
    }

    pub fn flow_sink(&self, flow: FlowKind) -> FlowSink {
        FlowSink {
            tx: self.tx.clone(),
            flow,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receives flow events and messages for one queue binding
#[derive(Debug, Clone)]
pub struct FlowSink {
    tx: mpsc::UnboundedSender<TransportEvent>,
    flow: FlowKind,
}

impl FlowSink {
    pub fn flow_event(&self, event: FlowEvent) -> bool {
        self.tx
            .send(TransportEvent::Flow {
                flow: self.flow,
                event,
            })
            .is_ok()
    }

    pub fn message(&self, message: BrokerMessage) -> bool {
        self.tx
            .send(TransportEvent::Message {
                flow: self.flow,
                message,
            })
            .is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Session settings passed through to the transport untouched
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionProperties {
    pub host: String,
    pub vpn: String,
    pub username: String,
    pub password: String,
    pub client_name: String,
    pub connect_retries: u32,
    pub connect_timeout_ms: u64,
    pub reconnect_retries: u32,
    pub keep_alive_limit: u32,
    pub keep_alive_interval_ms: u64,
}

impl Default for SessionProperties {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            vpn: "default".to_string(),
            username: "default".to_string(),
            password: String::new(),
            client_name: String::new(),
            connect_retries: 5,
            connect_timeout_ms: 1000,
            reconnect_retries: 300,
            keep_alive_limit: 3,
            keep_alive_interval_ms: 1000,
        }
    }
}

/// A bound queue flow. Flows are created stopped.
#[async_trait]
pub trait FlowHandle: Send + Sync {
    /// Queue this flow is bound to
    fn queue(&self) -> &str;

    async fn start(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;

    /// Unbind the flow; calling it on a destroyed flow is an error
    async fn destroy(&self) -> Result<()>;
}

/// Broker session, queue and flow primitives consumed by a cluster member
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, props: &SessionProperties, sink: SessionSink) -> Result<()>;

    /// Create the queue unless it already exists
    async fn provision_queue(&self, name: &str, quota_mb: u32) -> Result<()>;

    async fn deprovision_queue(&self, name: &str) -> Result<()>;

    async fn subscribe_queue_to_topic(&self, queue: &str, topic: &str) -> Result<()>;

    /// Bind a stopped flow with active-flow indication enabled
    async fn bind_queue(&self, queue: &str, sink: FlowSink) -> Result<Box<dyn FlowHandle>>;

    async fn send_buffer(&self, topic: &str, payload: Bytes) -> Result<()>;

    /// Enqueue a recovery marker carrying `token` directly onto a queue
    async fn send_sentinel(&self, queue: &str, token: &str) -> Result<()>;

    async fn disconnect_session(&self) -> Result<()>;
}
