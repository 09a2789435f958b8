//! Test doubles shared by the unit tests of this crate.

use crate::listener::ClusterEventListener;
use crate::transport::{FlowHandle, FlowSink, SessionEvent, SessionProperties, SessionSink, Transport};
use async_trait::async_trait;
use bytes::Bytes;
use hastream_common::{ClusterError, HAState, Result, SeqState};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum ListenerEvent {
    Ha(HAState, HAState),
    Seq(SeqState, SeqState),
    State(f64),
    Input(i32),
}

/// Records every callback; output is `input + 1.0`.
#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<ListenerEvent>>,
}

impl RecordingListener {
    pub fn events(&self) -> Vec<ListenerEvent> {
        self.events.lock().clone()
    }

    pub fn position(&self, event: &ListenerEvent) -> Option<usize> {
        self.events.lock().iter().position(|e| e == event)
    }
}

impl ClusterEventListener<i32, f64> for RecordingListener {
    fn on_ha_state_change(&self, old: HAState, new: HAState) {
        self.events.lock().push(ListenerEvent::Ha(old, new));
    }

    fn on_seq_state_change(&self, old: SeqState, new: SeqState) {
        self.events.lock().push(ListenerEvent::Seq(old, new));
    }

    fn on_state_message(&self, state: &f64) {
        self.events.lock().push(ListenerEvent::State(*state));
    }

    fn update_application_state(&self, input: &i32) -> f64 {
        self.events.lock().push(ListenerEvent::Input(*input));
        *input as f64 + 1.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Connect(String),
    Provision(String),
    Deprovision(String),
    Subscribe(String, String),
    Bind(String),
    Start(String),
    Stop(String),
    Destroy(String),
    Send(String, Bytes),
    Sentinel(String),
    Disconnect,
}

/// Transport that records calls and lets a test push events through the
/// sinks it was handed.
pub struct ScriptedTransport {
    calls: Arc<Mutex<Vec<Call>>>,
    session: Mutex<Option<SessionSink>>,
    flows: Mutex<HashMap<String, FlowSink>>,
    auto_up: bool,
    fail_provision: Mutex<Option<String>>,
    fail_destroy: Mutex<Option<String>>,
    refused_markers: Mutex<usize>,
    markers: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            session: Mutex::new(None),
            flows: Mutex::new(HashMap::new()),
            auto_up: true,
            fail_provision: Mutex::new(None),
            fail_destroy: Mutex::new(None),
            refused_markers: Mutex::new(0),
            markers: Mutex::new(Vec::new()),
        }
    }

    /// A transport whose session never comes up
    pub fn silent() -> Self {
        Self {
            auto_up: false,
            ..Self::new()
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn session_sink(&self) -> SessionSink {
        self.session.lock().clone().expect("not connected")
    }

    pub fn flow_sink(&self, queue: &str) -> FlowSink {
        self.flows.lock().get(queue).cloned().expect("queue not bound")
    }

    pub fn fail_provision_of(&self, queue: &str) {
        *self.fail_provision.lock() = Some(queue.to_string());
    }

    pub fn fail_destroy_of(&self, queue: &str) {
        *self.fail_destroy.lock() = Some(queue.to_string());
    }

    /// Refuse the next `count` recovery markers
    pub fn refuse_markers(&self, count: usize) {
        *self.refused_markers.lock() = count;
    }

    /// Token of the most recent recovery marker the transport accepted
    pub fn last_marker(&self) -> Option<String> {
        self.markers.lock().last().cloned()
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }
}

struct ScriptedFlow {
    queue: String,
    calls: Arc<Mutex<Vec<Call>>>,
    fail_destroy: bool,
}

#[async_trait]
impl FlowHandle for ScriptedFlow {
    fn queue(&self) -> &str {
        &self.queue
    }

    async fn start(&self) -> Result<()> {
        self.calls.lock().push(Call::Start(self.queue.clone()));
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.calls.lock().push(Call::Stop(self.queue.clone()));
        Ok(())
    }

    async fn destroy(&self) -> Result<()> {
        self.calls.lock().push(Call::Destroy(self.queue.clone()));
        if self.fail_destroy {
            return Err(ClusterError::Flow {
                queue: self.queue.clone(),
                message: "handle already invalid".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn connect(&self, props: &SessionProperties, sink: SessionSink) -> Result<()> {
        self.record(Call::Connect(props.client_name.clone()));
        if self.auto_up {
            sink.session_event(SessionEvent::Up);
        }
        *self.session.lock() = Some(sink);
        Ok(())
    }

    async fn provision_queue(&self, name: &str, _quota_mb: u32) -> Result<()> {
        self.record(Call::Provision(name.to_string()));
        if self.fail_provision.lock().as_deref() == Some(name) {
            return Err(ClusterError::Provision {
                queue: name.to_string(),
                message: "permission denied".to_string(),
            });
        }
        Ok(())
    }

    async fn deprovision_queue(&self, name: &str) -> Result<()> {
        self.record(Call::Deprovision(name.to_string()));
        Ok(())
    }

    async fn subscribe_queue_to_topic(&self, queue: &str, topic: &str) -> Result<()> {
        self.record(Call::Subscribe(queue.to_string(), topic.to_string()));
        Ok(())
    }

    async fn bind_queue(&self, queue: &str, sink: FlowSink) -> Result<Box<dyn FlowHandle>> {
        self.record(Call::Bind(queue.to_string()));
        self.flows.lock().insert(queue.to_string(), sink);
        let fail_destroy = self.fail_destroy.lock().as_deref() == Some(queue);
        Ok(Box::new(ScriptedFlow {
            queue: queue.to_string(),
            calls: self.calls.clone(),
            fail_destroy,
        }))
    }

    async fn send_buffer(&self, topic: &str, payload: Bytes) -> Result<()> {
        self.record(Call::Send(topic.to_string(), payload));
        Ok(())
    }

    async fn send_sentinel(&self, queue: &str, token: &str) -> Result<()> {
        self.record(Call::Sentinel(queue.to_string()));
        let mut refused = self.refused_markers.lock();
        if *refused > 0 {
            *refused -= 1;
            return Err(ClusterError::Transport {
                message: format!("queue {} is over quota", queue),
            });
        }
        self.markers.lock().push(token.to_string());
        Ok(())
    }

    async fn disconnect_session(&self) -> Result<()> {
        self.record(Call::Disconnect);
        Ok(())
    }
}

/// Poll `condition` until it holds or two seconds pass.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..400 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
