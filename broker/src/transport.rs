use crate::broker::{FlowId, InMemoryBroker, SessionId};
use async_trait::async_trait;
use bytes::Bytes;
use hastream_cluster::{BrokerMessage, FlowHandle, FlowSink, SessionProperties, SessionSink, Transport};
use hastream_common::{ClusterError, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// [`Transport`] backed by an [`InMemoryBroker`]; one per cluster member.
pub struct InMemoryTransport {
    broker: InMemoryBroker,
    session: Mutex<Option<SessionId>>,
}

impl InMemoryTransport {
    pub fn new(broker: InMemoryBroker) -> Self {
        Self {
            broker,
            session: Mutex::new(None),
        }
    }

    pub fn broker(&self) -> &InMemoryBroker {
        &self.broker
    }

    fn session(&self) -> Result<SessionId> {
        (*self.session.lock()).ok_or(ClusterError::NotConnected)
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn connect(&self, props: &SessionProperties, sink: SessionSink) -> Result<()> {
        let mut session = self.session.lock();
        if session.is_some() {
            return Err(ClusterError::Connect {
                message: format!("client {} is already connected", props.client_name),
            });
        }
        *session = Some(self.broker.connect(&props.client_name, sink));
        Ok(())
    }

    async fn provision_queue(&self, name: &str, quota_mb: u32) -> Result<()> {
        let session = self.session().map_err(|e| ClusterError::Provision {
            queue: name.to_string(),
            message: e.to_string(),
        })?;
        self.broker.provision_queue(session, name, quota_mb)
    }

    async fn deprovision_queue(&self, name: &str) -> Result<()> {
        self.broker.deprovision_queue(self.session()?, name)
    }

    async fn subscribe_queue_to_topic(&self, queue: &str, topic: &str) -> Result<()> {
        let session = self.session().map_err(|e| ClusterError::Subscribe {
            queue: queue.to_string(),
            topic: topic.to_string(),
            message: e.to_string(),
        })?;
        self.broker.subscribe_queue(session, queue, topic)
    }

    async fn bind_queue(&self, queue: &str, sink: FlowSink) -> Result<Box<dyn FlowHandle>> {
        let session = self.session().map_err(|e| ClusterError::Bind {
            queue: queue.to_string(),
            message: e.to_string(),
        })?;
        let flow_id = self.broker.bind(session, queue, sink)?;
        Ok(Box::new(InMemoryFlow {
            broker: self.broker.clone(),
            queue: queue.to_string(),
            flow_id,
            destroyed: AtomicBool::new(false),
        }))
    }

    async fn send_buffer(&self, topic: &str, payload: Bytes) -> Result<()> {
        let queues = self.broker.send(self.session()?, topic, payload)?;
        debug!("Published: topic={}, queues={}", topic, queues);
        Ok(())
    }

    async fn send_sentinel(&self, queue: &str, token: &str) -> Result<()> {
        self.broker
            .send_to_queue(self.session()?, queue, BrokerMessage::sentinel(token))
    }

    async fn disconnect_session(&self) -> Result<()> {
        match self.session.lock().take() {
            Some(session) => self.broker.disconnect(session),
            None => Ok(()),
        }
    }
}

/// A consumer bound to one queue of an [`InMemoryBroker`]
pub struct InMemoryFlow {
    broker: InMemoryBroker,
    queue: String,
    flow_id: FlowId,
    destroyed: AtomicBool,
}

impl InMemoryFlow {
    fn check_live(&self) -> Result<()> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(ClusterError::Flow {
                queue: self.queue.clone(),
                message: "flow destroyed".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl FlowHandle for InMemoryFlow {
    fn queue(&self) -> &str {
        &self.queue
    }

    async fn start(&self) -> Result<()> {
        self.check_live()?;
        self.broker.start_flow(&self.queue, self.flow_id)
    }

    async fn stop(&self) -> Result<()> {
        self.check_live()?;
        self.broker.stop_flow(&self.queue, self.flow_id)
    }

    async fn destroy(&self) -> Result<()> {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return Err(ClusterError::Flow {
                queue: self.queue.clone(),
                message: "flow already destroyed".to_string(),
            });
        }
        self.broker.unbind(&self.queue, self.flow_id)
    }
}
