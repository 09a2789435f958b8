use crate::listener::ClusterEventListener;
use crate::serializer::ClusteredAppSerializer;
use crate::state::{ClusterSnapshot, ClusterStateHolder};
use crate::transport::{
    BrokerMessage, FlowEvent, FlowHandle, FlowKind, SessionEvent, SessionProperties, SessionSink,
    Transport, TransportEvent,
};
use crate::ClusterConfig;
use bytes::Bytes;
use hastream_common::{ClusterError, HAState, QueueNames, Result, SeqState};
use metrics::{counter, histogram};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Interval;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Delay before re-sending a recovery marker the broker refused
const MARKER_RETRY: Duration = Duration::from_millis(500);

/// Requests from the public handle to the member's event loop
enum Command {
    Bind {
        reply: oneshot::Sender<Result<()>>,
    },
    Publish {
        payload: Bytes,
        reply: oneshot::Sender<Result<String>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// One member of an active/backup cluster.
///
/// Binds the shared input queue and this member's private state queue, and
/// drives role election and state recovery from broker events. All broker
/// events and commands are handled by a single event-loop task that owns the
/// [`ClusterStateHolder`]; this handle only exposes read-only snapshots.
pub struct ClusterCoordinator<I, O> {
    config: ClusterConfig,
    names: QueueNames,
    transport: Arc<dyn Transport>,
    serializer: Arc<dyn ClusteredAppSerializer<I, O>>,
    events: mpsc::UnboundedSender<TransportEvent>,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ClusterSnapshot<I, O>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<I, O> ClusterCoordinator<I, O>
where
    I: Clone + Send + Sync + 'static,
    O: Clone + Send + Sync + 'static,
{
    /// Create a member and spawn its event loop. Must be called inside a
    /// Tokio runtime.
    pub fn new(
        config: ClusterConfig,
        transport: Arc<dyn Transport>,
        serializer: Arc<dyn ClusteredAppSerializer<I, O>>,
        listener: Arc<dyn ClusterEventListener<I, O>>,
    ) -> Result<Self> {
        config.validate()?;

        let names = config.queue_names();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();

        let holder = ClusterStateHolder::new(names.client_name.clone(), listener);
        let (state_tx, state_rx) = watch::channel(holder.snapshot());

        let member = Member {
            config: config.clone(),
            names: names.clone(),
            transport: transport.clone(),
            serializer: serializer.clone(),
            sink: SessionSink::new(events_tx.clone()),
            holder,
            state_tx,
            input_flow: None,
            state_flow: None,
            awaiting_marker: None,
            marker_retry_at: None,
            recovery_started: None,
            bound: false,
            needs_rebind: false,
        };

        info!(
            "Starting cluster member: member={}, input_queue={}, state_queue={}",
            names.client_name, names.input_queue, names.state_queue
        );
        let task = tokio::spawn(member.run(events_rx, commands_rx));

        Ok(Self {
            config,
            names,
            transport,
            serializer,
            events: events_tx,
            commands: commands_tx,
            state: state_rx,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn queue_names(&self) -> &QueueNames {
        &self.names
    }

    /// Current role state, last input and last output
    pub fn snapshot(&self) -> ClusterSnapshot<I, O> {
        self.state.borrow().clone()
    }

    /// Receiver that observes every state change of this member
    pub fn watch(&self) -> watch::Receiver<ClusterSnapshot<I, O>> {
        self.state.clone()
    }

    /// Open the broker session. An empty client name is replaced by the
    /// member's derived name.
    pub async fn connect(&self, props: &SessionProperties) -> Result<()> {
        let mut props = props.clone();
        if props.client_name.is_empty() {
            props.client_name = self.names.client_name.clone();
        }
        info!("Connecting session: member={}, host={}", props.client_name, props.host);
        self.transport
            .connect(&props, SessionSink::new(self.events.clone()))
            .await
    }

    /// Wait for the session to come up, then provision, subscribe and bind
    /// both queues. Errors here are configuration-level and fatal.
    pub async fn bind_queues(&self) -> Result<()> {
        self.wait_for_connected().await?;

        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Bind { reply })
            .map_err(|_| ClusterError::Shutdown)?;
        rx.await.map_err(|_| ClusterError::Shutdown)?
    }

    /// Publish an output: to the active topic while active and up to date,
    /// otherwise to the standby topic. Returns the topic used.
    pub async fn send_output(&self, output: &O) -> Result<String> {
        let payload = self.serializer.serialize_output(output)?;
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Publish { payload, reply })
            .map_err(|_| ClusterError::Shutdown)?;
        rx.await.map_err(|_| ClusterError::Shutdown)?
    }

    /// Publish already-serialized auxiliary output to an arbitrary topic
    pub async fn send_serialized_output(&self, topic: &str, payload: Bytes) -> Result<()> {
        self.transport.send_buffer(topic, payload).await
    }

    /// Stop both flows, disconnect the session and stop the event loop.
    /// Safe to call more than once.
    pub async fn destroy(&self) -> Result<()> {
        let task = match self.task.lock().take() {
            Some(task) => task,
            None => return Ok(()),
        };

        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown { reply }).is_ok() {
            let _ = rx.await;
        }
        if let Err(e) = task.await {
            error!("Cluster member task failed: member={}, error={}", self.names.client_name, e);
        }
        Ok(())
    }

    async fn wait_for_connected(&self) -> Result<()> {
        let mut state = self.state.clone();
        let timeout_ms = self.config.connect_timeout_ms;
        let connected = async {
            state
                .wait_for(|s| s.ha_state.is_connected())
                .await
                .map(|_| ())
        };

        match tokio::time::timeout(Duration::from_millis(timeout_ms), connected).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(ClusterError::Shutdown),
            Err(_) => Err(ClusterError::ConnectTimeout { timeout_ms }),
        }
    }
}

/// The event loop's private state
struct Member<I, O> {
    config: ClusterConfig,
    names: QueueNames,
    transport: Arc<dyn Transport>,
    serializer: Arc<dyn ClusteredAppSerializer<I, O>>,
    sink: SessionSink,
    holder: ClusterStateHolder<I, O>,
    state_tx: watch::Sender<ClusterSnapshot<I, O>>,
    input_flow: Option<Box<dyn FlowHandle>>,
    state_flow: Option<Box<dyn FlowHandle>>,
    /// Token of our own recovery marker in flight on the state queue
    awaiting_marker: Option<String>,
    /// Set while a refused recovery marker waits to be re-sent
    marker_retry_at: Option<tokio::time::Instant>,
    recovery_started: Option<Instant>,
    bound: bool,
    needs_rebind: bool,
}

impl<I, O> Member<I, O>
where
    I: Clone + Send + Sync + 'static,
    O: Clone + Send + Sync + 'static,
{
    async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
        mut commands: mpsc::UnboundedReceiver<Command>,
    ) {
        let mut heartbeat = self.heartbeat();

        loop {
            tokio::select! {
                Some(event) = events.recv() => {
                    self.handle_event(event).await;
                }
                command = commands.recv() => match command {
                    Some(Command::Bind { reply }) => {
                        let result = self.bind().await;
                        if let Err(e) = &result {
                            error!("Failed to bind queues: member={}, error={}", self.names.client_name, e);
                        }
                        let _ = reply.send(result);
                    }
                    Some(Command::Publish { payload, reply }) => {
                        let _ = reply.send(self.publish(payload).await);
                    }
                    Some(Command::Shutdown { reply }) => {
                        self.teardown().await;
                        self.publish_snapshot();
                        let _ = reply.send(());
                        break;
                    }
                    None => {
                        self.teardown().await;
                        break;
                    }
                },
                _ = next_tick(&mut heartbeat) => {
                    self.send_heartbeat().await;
                }
                _ = retry_at(self.marker_retry_at) => {
                    self.marker_retry_at = None;
                    self.send_marker().await;
                }
            }
            self.publish_snapshot();
            debug_assert!(
                self.holder.seq_state().is_valid_for(self.holder.ha_state()),
                "invalid state combination: member={}, ha={}, seq={}",
                self.names.client_name,
                self.holder.ha_state(),
                self.holder.seq_state()
            );
        }

        debug!("Cluster member event loop stopped: member={}", self.names.client_name);
    }

    fn heartbeat(&self) -> Option<Interval> {
        if self.config.heartbeat_interval_ms == 0 {
            return None;
        }
        let period = Duration::from_millis(self.config.heartbeat_interval_ms);
        Some(tokio::time::interval_at(tokio::time::Instant::now() + period, period))
    }

    fn publish_snapshot(&self) {
        self.state_tx.send_replace(self.holder.snapshot());
    }

    async fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Session(event) => self.on_session_event(event).await,
            TransportEvent::Flow { flow: FlowKind::Input, event } => {
                self.on_input_flow_event(event).await
            }
            TransportEvent::Flow { flow: FlowKind::State, event } => self.on_state_flow_event(event),
            TransportEvent::Message { flow: FlowKind::Input, message } => {
                self.on_input_message(message).await
            }
            TransportEvent::Message { flow: FlowKind::State, message } => {
                self.on_state_message(message).await
            }
        }
    }

    async fn on_session_event(&mut self, event: SessionEvent) {
        debug!("Session event: member={}, event={:?}", self.names.client_name, event);
        match event {
            SessionEvent::Up | SessionEvent::Reconnected => {
                if self.holder.ha_state() != HAState::Disconnected {
                    return;
                }
                self.holder.set_ha_state(HAState::Connected);
                self.holder.set_seq_state(SeqState::Connected);

                if self.needs_rebind {
                    info!("Session restored, rebinding queues: member={}", self.names.client_name);
                    if let Err(e) = self.bind().await {
                        error!("Failed to rebind queues: member={}, error={}", self.names.client_name, e);
                    }
                }
            }
            SessionEvent::Down => {
                warn!("Session lost: member={}", self.names.client_name);
                self.clear_recovery();
                self.holder.reset();
                self.needs_rebind = self.bound;
                counter!("cluster.sessions.lost").increment(1);
            }
            SessionEvent::Reconnecting => {
                info!("Session reconnecting: member={}", self.names.client_name);
            }
        }
    }

    /// Input flow events elect the active member.
    async fn on_input_flow_event(&mut self, event: FlowEvent) {
        debug!("Input queue flow event: member={}, event={:?}", self.names.client_name, event);
        match event {
            FlowEvent::Active => self.become_active().await,
            FlowEvent::Inactive => self.become_backup().await,
            FlowEvent::Down => warn!("Input flow unbound by broker: member={}", self.names.client_name),
            FlowEvent::Up => {}
        }
    }

    fn on_state_flow_event(&mut self, event: FlowEvent) {
        debug!("State queue flow event: member={}, event={:?}", self.names.client_name, event);
        match event {
            FlowEvent::Active => {
                if self.holder.ha_state() == HAState::Active {
                    return;
                }
                self.holder.set_ha_state(HAState::Backup);
                self.holder.set_seq_state(SeqState::Recovering);
            }
            FlowEvent::Down => warn!("State flow unbound by broker: member={}", self.names.client_name),
            FlowEvent::Up | FlowEvent::Inactive => {}
        }
    }

    /// Input can still be queued behind a session or flow event that took
    /// away our authority; such input is dropped, never applied.
    async fn on_input_message(&mut self, message: BrokerMessage) {
        if !self.is_authoritative() {
            warn!(
                "Dropping input received while not authoritative: member={}, ha={}, seq={}",
                self.names.client_name,
                self.holder.ha_state(),
                self.holder.seq_state()
            );
            counter!("cluster.inputs.rejected").increment(1);
            return;
        }

        let input = match self.serializer.deserialize_input(&message.payload) {
            Ok(input) => input,
            Err(e) => {
                warn!("Dropping malformed input message: member={}, error={}", self.names.client_name, e);
                counter!("cluster.messages.malformed", "flow" => "input").increment(1);
                return;
            }
        };

        let output = self.holder.record_accepted_input(input);
        counter!("cluster.inputs.processed").increment(1);

        match self.serializer.serialize_output(&output) {
            Ok(payload) => {
                if let Err(e) = self.publish(payload).await {
                    error!("Failed to publish output: member={}, error={}", self.names.client_name, e);
                }
            }
            Err(e) => error!("Failed to serialize output: member={}, error={}", self.names.client_name, e),
        }
    }

    /// The state queue carries the active member's output plus our own
    /// recovery marker.
    async fn on_state_message(&mut self, message: BrokerMessage) {
        if !self.holder.ha_state().is_connected() {
            debug!("Ignoring state message while disconnected: member={}", self.names.client_name);
            return;
        }
        if message.is_sentinel() {
            let awaiting = self.awaiting_marker.is_some();
            if awaiting && message.marker_token() == self.awaiting_marker.as_deref() {
                self.complete_recovery().await;
            } else {
                warn!(
                    "Ignoring stale recovery marker: member={}, awaiting={}",
                    self.names.client_name, awaiting
                );
            }
            return;
        }

        let output = match self.serializer.deserialize_output(&message.payload) {
            Ok(output) => output,
            Err(e) => {
                warn!("Dropping malformed state message: member={}, error={}", self.names.client_name, e);
                counter!("cluster.messages.malformed", "flow" => "state").increment(1);
                return;
            }
        };

        if self.is_recovering() {
            // Still draining the outgoing active member's backlog
            self.holder.set_last_output(output);
        } else if self.is_authoritative() {
            debug!("Ignoring state message while active: member={}", self.names.client_name);
            return;
        } else {
            self.holder.set_ha_state(HAState::Backup);
            self.holder.set_last_output(output);
            self.holder.set_seq_state(SeqState::Following);
        }
        counter!("cluster.state_messages.applied").increment(1);
    }

    /// Granted the input queue: push a marker to the tail of our own state
    /// queue and wait for it before consuming any input.
    async fn become_active(&mut self) {
        if self.is_recovering() || self.is_authoritative() {
            return;
        }

        info!(
            "Recovering all state from the state queue: member={}, seq={}, queue={}",
            self.names.client_name,
            self.holder.seq_state(),
            self.names.state_queue
        );
        self.recovery_started = Some(Instant::now());
        self.send_marker().await;
        self.holder.set_seq_state(SeqState::Recovering);
        self.holder.set_ha_state(HAState::Active);
    }

    /// Each activation tags its marker with a fresh token so a marker left
    /// behind by an earlier activation cannot end this recovery. A refused
    /// marker is retried; the input flow stays stopped meanwhile.
    async fn send_marker(&mut self) {
        let token = Uuid::new_v4().to_string();
        match self.transport.send_sentinel(&self.names.state_queue, &token).await {
            Ok(()) => {
                debug!("Recovery marker sent: member={}, token={}", self.names.client_name, token);
                self.awaiting_marker = Some(token);
            }
            Err(e) => {
                error!(
                    "Failed to send recovery marker, retrying: member={}, retry_ms={}, error={}",
                    self.names.client_name,
                    MARKER_RETRY.as_millis(),
                    e
                );
                counter!("cluster.markers.failed").increment(1);
                self.marker_retry_at = Some(tokio::time::Instant::now() + MARKER_RETRY);
            }
        }
    }

    /// Waiting for our own marker, or for a chance to re-send it
    fn is_recovering(&self) -> bool {
        self.awaiting_marker.is_some() || self.marker_retry_at.is_some()
    }

    fn clear_recovery(&mut self) {
        self.awaiting_marker = None;
        self.marker_retry_at = None;
        self.recovery_started = None;
    }

    async fn become_backup(&mut self) {
        if let Some(flow) = &self.input_flow {
            if let Err(e) = flow.stop().await {
                warn!("Failed to stop input flow: member={}, error={}", self.names.client_name, e);
            }
        }
        self.clear_recovery();
        if self.holder.seq_state() == SeqState::UpToDate {
            self.holder.set_seq_state(SeqState::Recovering);
        }
        if self.holder.ha_state().is_connected() {
            self.holder.set_ha_state(HAState::Backup);
        }
    }

    async fn complete_recovery(&mut self) {
        info!("Finished recovering state: member={}", self.names.client_name);
        self.awaiting_marker = None;
        self.holder.set_seq_state(SeqState::UpToDate);
        self.holder.set_ha_state(HAState::Active);

        if let Some(started) = self.recovery_started.take() {
            histogram!("cluster.recovery.duration").record(started.elapsed().as_secs_f64());
        }
        counter!("cluster.recoveries.completed").increment(1);

        match &self.input_flow {
            Some(flow) => {
                if let Err(e) = flow.start().await {
                    error!("Failed to start input flow: member={}, error={}", self.names.client_name, e);
                }
            }
            None => error!("Recovery completed without an input flow: member={}", self.names.client_name),
        }
    }

    fn is_authoritative(&self) -> bool {
        self.holder.ha_state() == HAState::Active && self.holder.seq_state() == SeqState::UpToDate
    }

    async fn bind(&mut self) -> Result<()> {
        if !self.holder.ha_state().is_connected() {
            return Err(ClusterError::NotConnected);
        }
        self.release_flows().await;

        let quota = self.config.queue_quota_mb;
        let state_topic = self.config.state_subscription().to_string();

        self.transport.provision_queue(&self.names.input_queue, quota).await?;
        self.transport
            .subscribe_queue_to_topic(&self.names.input_queue, &self.config.input_topic)
            .await?;
        self.transport.provision_queue(&self.names.state_queue, quota).await?;
        self.transport
            .subscribe_queue_to_topic(&self.names.state_queue, &state_topic)
            .await?;

        self.holder.set_seq_state(SeqState::Bound);

        let state_flow = self
            .transport
            .bind_queue(&self.names.state_queue, self.sink.flow_sink(FlowKind::State))
            .await?;
        state_flow.start().await?;
        self.state_flow = Some(state_flow);

        // Left stopped: the broker picks one bound input flow as active
        let input_flow = self
            .transport
            .bind_queue(&self.names.input_queue, self.sink.flow_sink(FlowKind::Input))
            .await?;
        self.input_flow = Some(input_flow);

        self.bound = true;
        self.needs_rebind = false;
        info!(
            "Queues bound: member={}, input_topic={}, state_topic={}",
            self.names.client_name, self.config.input_topic, state_topic
        );
        Ok(())
    }

    async fn publish(&self, payload: Bytes) -> Result<String> {
        let topic = if self.is_authoritative() {
            &self.config.active_topic
        } else {
            &self.config.standby_topic
        };
        self.transport.send_buffer(topic, payload).await?;
        counter!("cluster.outputs.published").increment(1);
        Ok(topic.clone())
    }

    async fn send_heartbeat(&self) {
        if !self.holder.ha_state().is_connected() {
            return;
        }
        let Some(output) = self.holder.last_output() else {
            return;
        };
        match self.serializer.serialize_output(output) {
            Ok(payload) => {
                if let Err(e) = self.publish(payload).await {
                    warn!("Heartbeat publish failed: member={}, error={}", self.names.client_name, e);
                }
            }
            Err(e) => warn!("Failed to serialize heartbeat: member={}, error={}", self.names.client_name, e),
        }
    }

    /// Input before state, so the broker does not report an unsolicited
    /// unbind on the state queue while input is still flowing.
    async fn release_flows(&mut self) {
        if let Some(flow) = self.input_flow.take() {
            self.release_flow(flow).await;
        }
        if let Some(flow) = self.state_flow.take() {
            self.release_flow(flow).await;
        }
    }

    async fn release_flow(&self, flow: Box<dyn FlowHandle>) {
        if let Err(e) = flow.stop().await {
            warn!("Failed to stop flow: member={}, queue={}, error={}", self.names.client_name, flow.queue(), e);
        }
        if let Err(e) = flow.destroy().await {
            warn!("Failed to destroy flow: member={}, queue={}, error={}", self.names.client_name, flow.queue(), e);
        }
    }

    async fn teardown(&mut self) {
        info!("Destroying cluster member: member={}", self.names.client_name);
        self.release_flows().await;
        if let Err(e) = self.transport.disconnect_session().await {
            warn!("Failed to disconnect session: member={}, error={}", self.names.client_name, e);
        }
        self.clear_recovery();
        self.bound = false;
        self.needs_rebind = false;
        self.holder.reset();
    }
}

async fn next_tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn retry_at(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}
