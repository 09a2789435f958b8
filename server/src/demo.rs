use crate::engine::{MatcherState, MockMatchingEngine};
use crate::gateway::{OrderGateway, OrderGenerator};
use crate::health::{ClusterHealth, MemberHealth};
use crate::matcher::{ClientOrder, Matcher};
use crate::settings::Settings;
use anyhow::Context;
use bytes::Bytes;
use hastream_broker::{InMemoryBroker, InMemoryTransport};
use hastream_cluster::{ClusterCoordinator, JsonSerializer, Transport};
use hastream_common::QueueNames;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

type Coordinator = ClusterCoordinator<ClientOrder, MatcherState>;

/// Outcome of a demo run
#[derive(Debug, Clone, Serialize)]
pub struct DemoReport {
    pub orders_sent: u64,
    pub last_order_id: Option<u64>,
    pub trades_announced: usize,
    pub failed_over_from: Option<String>,
    pub queues_released: usize,
    pub health: ClusterHealth,
    pub final_states: Vec<MatcherState>,
}

struct RunningMember {
    name: String,
    coordinator: Arc<Coordinator>,
    engine: Arc<MockMatchingEngine>,
    announcer: JoinHandle<()>,
}

impl RunningMember {
    fn is_authoritative(&self) -> bool {
        self.coordinator.snapshot().is_authoritative()
    }
}

async fn start_member(
    broker: &InMemoryBroker,
    settings: &Settings,
    instance: u32,
) -> anyhow::Result<RunningMember> {
    let mut config = settings.cluster.clone();
    config.instance = instance;
    let demo = &settings.demo;

    let (trades_tx, mut trades_rx) = mpsc::unbounded_channel();
    let book = Matcher::new(demo.par, demo.price_increment);
    let engine = Arc::new(MockMatchingEngine::new(
        MatcherState::new(&config.app_id, instance, &demo.instrument, book),
        trades_tx,
    ));

    let trade_topic = QueueNames::announcement_topic(&config.app_id, "trade");
    let coordinator = Arc::new(ClusterCoordinator::new(
        config,
        Arc::new(InMemoryTransport::new(broker.clone())),
        Arc::new(JsonSerializer::<ClientOrder, MatcherState>::new()),
        engine.clone(),
    )?);
    let name = coordinator.queue_names().client_name.clone();

    let announcer = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            while let Some(trade) = trades_rx.recv().await {
                let payload = match serde_json::to_vec(&trade) {
                    Ok(payload) => Bytes::from(payload),
                    Err(e) => {
                        warn!("Failed to encode trade: {}", e);
                        continue;
                    }
                };
                if let Err(e) = coordinator.send_serialized_output(&trade_topic, payload).await {
                    warn!("Failed to announce trade: {}", e);
                }
            }
        })
    };

    coordinator
        .connect(&settings.session)
        .await
        .with_context(|| format!("Failed to connect {}", name))?;
    coordinator
        .bind_queues()
        .await
        .with_context(|| format!("Failed to bind queues for {}", name))?;

    info!("Started cluster member: member={}", name);
    Ok(RunningMember {
        name,
        coordinator,
        engine,
        announcer,
    })
}

/// Poll until `done` holds or the timeout passes
async fn settle(
    timeout: Duration,
    what: &str,
    mut done: impl FnMut() -> bool,
) -> anyhow::Result<()> {
    let polled = tokio::time::timeout(timeout, async {
        while !done() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    polled.map_err(|_| anyhow::anyhow!("Timed out waiting for {}", what))
}

/// Destroy the authoritative member, returning its name
async fn kill_active(members: &[RunningMember]) -> anyhow::Result<Option<String>> {
    let Some(active) = members.iter().find(|m| m.is_authoritative()) else {
        warn!("No active member to fail over from");
        return Ok(None);
    };
    warn!("Destroying active member: member={}", active.name);
    active.coordinator.destroy().await?;
    Ok(Some(active.name.clone()))
}

/// Deprovision every named queue, logging failures; returns how many went
async fn release_queues(transport: &dyn Transport, queues: &[String]) -> usize {
    let mut released = 0;
    for queue in queues {
        match transport.deprovision_queue(queue).await {
            Ok(()) => released += 1,
            Err(e) => warn!("Failed to deprovision queue: queue={}, error={}", queue, e),
        }
    }
    released
}

/// Run a clustered matching engine against an in-memory broker: start the
/// members, stream orders through the gateway, optionally destroy the
/// active member part-way, and wait for the survivors to catch up.
pub async fn run(settings: &Settings) -> anyhow::Result<DemoReport> {
    settings.validate()?;
    let demo = &settings.demo;
    let timeout = Duration::from_millis(demo.settle_timeout_ms);

    let broker = InMemoryBroker::new();
    let trade_topic = QueueNames::announcement_topic(&settings.cluster.app_id, "trade");
    let mut trades = broker.subscribe_topic(&trade_topic);

    let mut members = Vec::new();
    for instance in 1..=demo.instances {
        members.push(start_member(&broker, settings, instance).await?);
    }
    settle(timeout, "an active member", || {
        members.iter().filter(|m| m.is_authoritative()).count() == 1
    })
    .await?;

    let gateway_transport: Arc<dyn Transport> = Arc::new(InMemoryTransport::new(broker.clone()));
    let gateway = OrderGateway::connect(
        gateway_transport.clone(),
        &settings.session,
        &settings.cluster.input_topic,
    )
    .await?;
    let mut generator = match demo.seed {
        Some(seed) => OrderGenerator::seeded(seed, demo.start_order_id, &demo.instrument, demo.par, demo.price_increment),
        None => OrderGenerator::new(demo.start_order_id, &demo.instrument, demo.par, demo.price_increment),
    };

    let mut failed_over_from = None;
    let mut last_order_id = None;
    for sent in 0..demo.orders {
        if demo.failover_after == Some(sent) {
            failed_over_from = kill_active(&members).await?;
        }
        let order = generator.next_order();
        gateway.send(&order).await?;
        last_order_id = Some(order.seq_id);
        if demo.order_interval_ms > 0 {
            tokio::time::sleep(Duration::from_millis(demo.order_interval_ms)).await;
        }
    }

    if let Some(last) = last_order_id {
        settle(timeout, "the active member to apply every order", || {
            members.iter().any(|m| {
                let snapshot = m.coordinator.snapshot();
                snapshot.is_authoritative()
                    && snapshot.last_output.map(|s| s.last_input) == Some(last)
            })
        })
        .await?;
    }

    let mut trades_announced = 0;
    while trades.try_recv().is_ok() {
        trades_announced += 1;
    }

    let health = ClusterHealth::evaluate(
        members
            .iter()
            .map(|m| {
                let snapshot = m.coordinator.snapshot();
                MemberHealth::from_states(m.name.clone(), snapshot.ha_state, snapshot.seq_state)
            })
            .collect(),
    );
    let final_states = members.iter().map(|m| m.engine.state()).collect();

    for member in &members {
        member.coordinator.destroy().await?;
        member.announcer.abort();
    }
    let mut queues: Vec<String> = members
        .iter()
        .map(|m| m.coordinator.queue_names().state_queue.clone())
        .collect();
    if let Some(member) = members.first() {
        queues.push(member.coordinator.queue_names().input_queue.clone());
    }
    let queues_released = release_queues(gateway_transport.as_ref(), &queues).await;
    if let Err(e) = gateway.disconnect().await {
        warn!("Failed to disconnect gateway: {}", e);
    }

    info!(
        "Demo finished: orders={}, trades={}, status={:?}",
        demo.orders, trades_announced, health.status
    );
    Ok(DemoReport {
        orders_sent: demo.orders,
        last_order_id,
        trades_announced,
        failed_over_from,
        queues_released,
        health,
        final_states,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hastream_cluster::{SessionProperties, SessionSink};

    #[tokio::test]
    async fn test_release_queues() {
        let broker = InMemoryBroker::new();
        let transport = InMemoryTransport::new(broker.clone());
        let (tx, _rx) = mpsc::unbounded_channel();
        transport
            .connect(&SessionProperties::default(), SessionSink::new(tx))
            .await
            .unwrap();
        transport.provision_queue("fntest_input", 1).await.unwrap();
        transport.provision_queue("fntest_state1", 1).await.unwrap();

        let queues = vec!["fntest_input".to_string(), "fntest_state1".to_string()];
        assert_eq!(release_queues(&transport, &queues).await, 2);
        assert!(!broker.queue_exists("fntest_input"));
        assert!(!broker.queue_exists("fntest_state1"));

        transport.disconnect_session().await.unwrap();
        assert_eq!(release_queues(&transport, &queues).await, 0);
    }
}
