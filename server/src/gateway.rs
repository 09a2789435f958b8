use crate::engine::MatcherState;
use crate::matcher::ClientOrder;
use hastream_cluster::{
    ClusteredAppSerializer, JsonSerializer, SessionProperties, SessionSink, Transport,
    TransportEvent,
};
use hastream_common::Result;
use metrics::counter;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

pub const TRADERS: [&str; 9] = ["JPMC", "GS", "MS", "DB", "HSBC", "RBC", "TD", "UBS", "WF"];

/// Random orders around a par price, up to two increments away
pub struct OrderGenerator {
    rng: StdRng,
    next_id: u64,
    instrument: String,
    par: f64,
    increment: f64,
}

impl OrderGenerator {
    pub fn new(start_id: u64, instrument: &str, par: f64, increment: f64) -> Self {
        Self::with_rng(StdRng::from_entropy(), start_id, instrument, par, increment)
    }

    pub fn seeded(seed: u64, start_id: u64, instrument: &str, par: f64, increment: f64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed), start_id, instrument, par, increment)
    }

    fn with_rng(rng: StdRng, start_id: u64, instrument: &str, par: f64, increment: f64) -> Self {
        Self {
            rng,
            next_id: start_id,
            instrument: instrument.to_string(),
            par,
            increment,
        }
    }

    pub fn next_order(&mut self) -> ClientOrder {
        let is_buy = self.rng.gen_bool(0.5);
        let offset = self.rng.gen_range(0..3) as f64 * self.increment;
        let price = if is_buy { self.par - offset } else { self.par + offset };

        let order = ClientOrder {
            seq_id: self.next_id,
            is_buy,
            quantity: self.rng.gen::<f64>() * 1000.0,
            price,
            instrument: self.instrument.clone(),
            trader: TRADERS[self.rng.gen_range(0..TRADERS.len())].to_string(),
        };
        self.next_id += 1;
        order
    }
}

/// Publishes client orders to the clustered application's input topic
pub struct OrderGateway {
    transport: Arc<dyn Transport>,
    serializer: JsonSerializer<ClientOrder, MatcherState>,
    topic: String,
}

impl OrderGateway {
    pub async fn connect(
        transport: Arc<dyn Transport>,
        props: &SessionProperties,
        topic: &str,
    ) -> Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let TransportEvent::Session(event) = event {
                    info!("Gateway session event: {:?}", event);
                }
            }
        });

        let mut props = props.clone();
        props.client_name = "MockOrderGW".to_string();
        transport.connect(&props, SessionSink::new(tx)).await?;

        Ok(Self {
            transport,
            serializer: JsonSerializer::new(),
            topic: topic.to_string(),
        })
    }

    pub async fn send(&self, order: &ClientOrder) -> Result<()> {
        debug!("Sending order: {}", order);
        let payload = self.serializer.serialize_input(order)?;
        self.transport.send_buffer(&self.topic, payload).await?;
        counter!("gateway.orders.sent").increment(1);
        Ok(())
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.transport.disconnect_session().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_orders_stay_near_par() {
        let mut generator = OrderGenerator::seeded(7, 100, "MSFT", 100.0, 0.25);

        for expected_id in 100..200 {
            let order = generator.next_order();
            assert_eq!(order.seq_id, expected_id);
            assert_eq!(order.instrument, "MSFT");
            assert!(TRADERS.contains(&order.trader.as_str()));
            assert!((0.0..1000.0).contains(&order.quantity));
            if order.is_buy {
                assert!(order.price <= 100.0 && order.price >= 99.5);
            } else {
                assert!(order.price >= 100.0 && order.price <= 100.5);
            }
        }
    }

    #[test]
    fn test_seeded_generators_repeat() {
        let mut a = OrderGenerator::seeded(42, 1, "MSFT", 100.0, 0.25);
        let mut b = OrderGenerator::seeded(42, 1, "MSFT", 100.0, 0.25);
        for _ in 0..10 {
            assert_eq!(a.next_order(), b.next_order());
        }
    }
}
