use crate::topic::{is_valid_subscription, topic_matches};
use bytes::Bytes;
use hastream_cluster::{BrokerMessage, FlowEvent, FlowSink, SessionEvent, SessionSink};
use hastream_common::{ClusterError, Result};
use metrics::counter;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub type SessionId = Uuid;
pub type FlowId = u64;

const BYTES_PER_MB: usize = 1024 * 1024;

struct Session {
    client_name: String,
    sink: SessionSink,
    up: bool,
}

struct Consumer {
    flow_id: FlowId,
    session: SessionId,
    sink: FlowSink,
    started: bool,
}

/// An exclusive queue: the first bound consumer is the active one and the
/// only one that receives messages.
struct Queue {
    quota_bytes: usize,
    used_bytes: usize,
    subscriptions: Vec<String>,
    messages: VecDeque<BrokerMessage>,
    consumers: Vec<Consumer>,
}

impl Queue {
    fn new(quota_mb: u32) -> Self {
        Self {
            quota_bytes: quota_mb as usize * BYTES_PER_MB,
            used_bytes: 0,
            subscriptions: Vec::new(),
            messages: VecDeque::new(),
            consumers: Vec::new(),
        }
    }

    fn accepts(&self, topic: &str) -> bool {
        self.subscriptions.iter().any(|s| topic_matches(s, topic))
    }

    fn enqueue(&mut self, name: &str, message: BrokerMessage) -> bool {
        let size = message.payload.len();
        if self.used_bytes + size > self.quota_bytes {
            warn!("Queue quota exceeded, discarding message: queue={}, used_bytes={}", name, self.used_bytes);
            counter!("broker.messages.discarded").increment(1);
            return false;
        }
        self.used_bytes += size;
        self.messages.push_back(message);
        self.deliver();
        true
    }

    /// Hand every spooled message to the active consumer if it is started.
    fn deliver(&mut self) {
        let consumer = match self.consumers.first() {
            Some(c) if c.started => c,
            _ => return,
        };
        while let Some(message) = self.messages.pop_front() {
            let size = message.payload.len();
            if !consumer.sink.message(message.clone()) {
                self.messages.push_front(message);
                return;
            }
            self.used_bytes -= size;
        }
    }

    /// Remove a consumer, promoting the next one if the active one left.
    fn remove_consumer(&mut self, flow_id: FlowId) -> Option<Consumer> {
        let position = self.consumers.iter().position(|c| c.flow_id == flow_id)?;
        let removed = self.consumers.remove(position);
        if position == 0 {
            if let Some(next) = self.consumers.first() {
                next.sink.flow_event(FlowEvent::Active);
                self.deliver();
            }
        }
        Some(removed)
    }
}

#[derive(Default)]
struct BrokerState {
    sessions: HashMap<SessionId, Session>,
    queues: HashMap<String, Queue>,
    topic_subscribers: Vec<(String, mpsc::UnboundedSender<BrokerMessage>)>,
    next_flow_id: FlowId,
}

impl BrokerState {
    fn ensure_up(&self, session: SessionId) -> Result<()> {
        match self.sessions.get(&session) {
            Some(s) if s.up => Ok(()),
            _ => Err(ClusterError::NotConnected),
        }
    }

    /// Remove every consumer owned by `session` from every queue
    fn drop_consumers_of(&mut self, session: SessionId) {
        for (name, queue) in self.queues.iter_mut() {
            let owned: Vec<FlowId> = queue
                .consumers
                .iter()
                .filter(|c| c.session == session)
                .map(|c| c.flow_id)
                .collect();
            for flow_id in owned {
                queue.remove_consumer(flow_id);
                debug!("Unbound flow: queue={}, flow_id={}", name, flow_id);
            }
        }
    }

    fn session_by_name(&self, client_name: &str) -> Option<SessionId> {
        self.sessions
            .iter()
            .find(|(_, s)| s.client_name == client_name)
            .map(|(id, _)| *id)
    }
}

/// In-process broker with exclusive queues, topic-to-queue subscriptions and
/// single-level/trailing wildcards. Cloning shares the same broker.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&self, client_name: &str, sink: SessionSink) -> SessionId {
        let id = Uuid::new_v4();
        let mut state = self.state.lock();
        sink.session_event(SessionEvent::Up);
        state.sessions.insert(
            id,
            Session {
                client_name: client_name.to_string(),
                sink,
                up: true,
            },
        );
        info!("Session connected: client={}, session={}", client_name, id);
        id
    }

    /// Close a session cleanly, unbinding whatever it still has bound
    pub fn disconnect(&self, session: SessionId) -> Result<()> {
        let mut state = self.state.lock();
        let removed = state
            .sessions
            .remove(&session)
            .ok_or(ClusterError::NotConnected)?;
        state.drop_consumers_of(session);
        info!("Session disconnected: client={}, session={}", removed.client_name, session);
        Ok(())
    }

    /// Simulate a network failure: the session goes down, then its flows are
    /// unbound and exclusive queues fail over. Returns false for an unknown
    /// or already severed client.
    pub fn sever_session(&self, client_name: &str) -> bool {
        let mut state = self.state.lock();
        let Some(id) = state.session_by_name(client_name) else {
            return false;
        };
        match state.sessions.get_mut(&id) {
            Some(session) if session.up => {
                session.up = false;
                session.sink.session_event(SessionEvent::Down);
            }
            _ => return false,
        }
        state.drop_consumers_of(id);
        warn!("Session severed: client={}", client_name);
        true
    }

    /// Bring a severed session back, reporting it as reconnected
    pub fn restore_session(&self, client_name: &str) -> bool {
        let mut state = self.state.lock();
        let Some(id) = state.session_by_name(client_name) else {
            return false;
        };
        match state.sessions.get_mut(&id) {
            Some(session) if !session.up => {
                session.up = true;
                session.sink.session_event(SessionEvent::Reconnected);
                info!("Session restored: client={}", client_name);
                true
            }
            _ => false,
        }
    }

    pub fn provision_queue(&self, session: SessionId, name: &str, quota_mb: u32) -> Result<()> {
        let mut state = self.state.lock();
        state.ensure_up(session).map_err(|e| ClusterError::Provision {
            queue: name.to_string(),
            message: e.to_string(),
        })?;
        if quota_mb == 0 {
            return Err(ClusterError::Provision {
                queue: name.to_string(),
                message: "quota must be positive".to_string(),
            });
        }
        if !state.queues.contains_key(name) {
            state.queues.insert(name.to_string(), Queue::new(quota_mb));
            info!("Provisioned queue: queue={}, quota_mb={}", name, quota_mb);
        }
        Ok(())
    }

    pub fn deprovision_queue(&self, session: SessionId, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.ensure_up(session)?;
        if let Some(queue) = state.queues.remove(name) {
            for consumer in &queue.consumers {
                consumer.sink.flow_event(FlowEvent::Down);
            }
            info!("Deprovisioned queue: queue={}, discarded={}", name, queue.messages.len());
        }
        Ok(())
    }

    pub fn subscribe_queue(&self, session: SessionId, queue: &str, topic: &str) -> Result<()> {
        let mut state = self.state.lock();
        let subscribe_error = |message: String| ClusterError::Subscribe {
            queue: queue.to_string(),
            topic: topic.to_string(),
            message,
        };
        state.ensure_up(session).map_err(|e| subscribe_error(e.to_string()))?;
        if !is_valid_subscription(topic) {
            return Err(subscribe_error("invalid subscription".to_string()));
        }
        let entry = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| subscribe_error("unknown queue".to_string()))?;
        if !entry.subscriptions.iter().any(|s| s == topic) {
            entry.subscriptions.push(topic.to_string());
            debug!("Queue subscribed: queue={}, topic={}", queue, topic);
        }
        Ok(())
    }

    /// Bind a stopped consumer. The first consumer of a queue is told it is
    /// active.
    pub fn bind(&self, session: SessionId, queue: &str, sink: FlowSink) -> Result<FlowId> {
        let mut state = self.state.lock();
        let bind_error = |message: String| ClusterError::Bind {
            queue: queue.to_string(),
            message,
        };
        state.ensure_up(session).map_err(|e| bind_error(e.to_string()))?;

        state.next_flow_id += 1;
        let flow_id = state.next_flow_id;
        let entry = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| bind_error("unknown queue".to_string()))?;

        sink.flow_event(FlowEvent::Up);
        if entry.consumers.is_empty() {
            sink.flow_event(FlowEvent::Active);
        }
        entry.consumers.push(Consumer {
            flow_id,
            session,
            sink,
            started: false,
        });
        debug!("Flow bound: queue={}, flow_id={}, consumers={}", queue, flow_id, entry.consumers.len());
        Ok(flow_id)
    }

    pub fn start_flow(&self, queue: &str, flow_id: FlowId) -> Result<()> {
        self.with_consumer(queue, flow_id, |entry, index| {
            entry.consumers[index].started = true;
            entry.deliver();
        })
    }

    pub fn stop_flow(&self, queue: &str, flow_id: FlowId) -> Result<()> {
        self.with_consumer(queue, flow_id, |entry, index| {
            entry.consumers[index].started = false;
        })
    }

    pub fn unbind(&self, queue: &str, flow_id: FlowId) -> Result<()> {
        let mut state = self.state.lock();
        state
            .queues
            .get_mut(queue)
            .and_then(|entry| entry.remove_consumer(flow_id))
            .map(|_| debug!("Flow unbound: queue={}, flow_id={}", queue, flow_id))
            .ok_or_else(|| unknown_flow(queue, flow_id))
    }

    /// Publish on behalf of a session
    pub fn send(&self, session: SessionId, topic: &str, payload: Bytes) -> Result<usize> {
        self.state.lock().ensure_up(session)?;
        Ok(self.publish(topic, payload))
    }

    /// Enqueue directly onto a queue, bypassing topic routing
    pub fn send_to_queue(&self, session: SessionId, queue: &str, message: BrokerMessage) -> Result<()> {
        let mut state = self.state.lock();
        state.ensure_up(session)?;
        let entry = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| ClusterError::transport(format!("unknown queue {}", queue)))?;
        if !entry.enqueue(queue, message) {
            return Err(ClusterError::transport(format!("queue {} is full", queue)));
        }
        Ok(())
    }

    /// Route a message to every matching queue and topic subscriber. Returns
    /// the number of queues that accepted it.
    pub fn publish(&self, topic: &str, payload: Bytes) -> usize {
        let mut state = self.state.lock();
        let message = BrokerMessage::payload(topic, payload);

        let mut accepted = 0;
        for (name, queue) in state.queues.iter_mut() {
            if queue.accepts(topic) && queue.enqueue(name, message.clone()) {
                accepted += 1;
            }
        }
        state.topic_subscribers.retain(|(pattern, tx)| {
            !topic_matches(pattern, topic) || tx.send(message.clone()).is_ok()
        });

        counter!("broker.messages.published").increment(1);
        accepted
    }

    /// Direct (non-queued) topic subscription for monitors
    pub fn subscribe_topic(&self, pattern: &str) -> mpsc::UnboundedReceiver<BrokerMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().topic_subscribers.push((pattern.to_string(), tx));
        rx
    }

    /// Spooled, undelivered messages
    pub fn queue_depth(&self, queue: &str) -> Option<usize> {
        self.state.lock().queues.get(queue).map(|q| q.messages.len())
    }

    pub fn queue_exists(&self, queue: &str) -> bool {
        self.state.lock().queues.contains_key(queue)
    }

    pub fn consumer_count(&self, queue: &str) -> usize {
        self.state
            .lock()
            .queues
            .get(queue)
            .map_or(0, |q| q.consumers.len())
    }

    /// Client name owning the active consumer of a queue
    pub fn active_consumer(&self, queue: &str) -> Option<String> {
        let state = self.state.lock();
        let consumer = state.queues.get(queue)?.consumers.first()?;
        state
            .sessions
            .get(&consumer.session)
            .map(|s| s.client_name.clone())
    }

    fn with_consumer(
        &self,
        queue: &str,
        flow_id: FlowId,
        f: impl FnOnce(&mut Queue, usize),
    ) -> Result<()> {
        let mut state = self.state.lock();
        let entry = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| unknown_flow(queue, flow_id))?;
        let index = entry
            .consumers
            .iter()
            .position(|c| c.flow_id == flow_id)
            .ok_or_else(|| unknown_flow(queue, flow_id))?;
        f(entry, index);
        Ok(())
    }
}

fn unknown_flow(queue: &str, flow_id: FlowId) -> ClusterError {
    ClusterError::Flow {
        queue: queue.to_string(),
        message: format!("flow {} is not bound", flow_id),
    }
}
