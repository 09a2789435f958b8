use crate::matcher::{ClientOrder, Matcher, Trade};
use hastream_cluster::ClusterEventListener;
use hastream_common::{HAState, SeqState};
use metrics::counter;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Output of the matching engine: the whole book plus the sequence id of the
/// last order applied. Role fields are carried along for external monitors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatcherState {
    pub app: String,
    pub instance: u32,
    pub instrument: String,
    pub book: Matcher,
    pub ha_state: HAState,
    pub seq_state: SeqState,
    pub last_input: u64,
    pub last_output: u64,
}

impl MatcherState {
    pub fn new(app: &str, instance: u32, instrument: &str, book: Matcher) -> Self {
        Self {
            app: app.to_string(),
            instance,
            instrument: instrument.to_string(),
            book,
            ha_state: HAState::Disconnected,
            seq_state: SeqState::Init,
            last_input: 0,
            last_output: 0,
        }
    }

    pub fn add_order(&mut self, order: &ClientOrder) -> Vec<Trade> {
        self.last_input = order.seq_id;
        self.last_output = order.seq_id;
        self.book.add_order(order)
    }
}

impl fmt::Display for MatcherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MatcherState{{instrument={}, seq_id={}, buys={}, sells={}}}",
            self.instrument,
            self.last_input,
            self.book.buys.len(),
            self.book.sells.len()
        )
    }
}

/// Clustered matching engine. Applies orders while active, mirrors the
/// active member's book while backup, and hands trades to a channel for
/// announcement.
pub struct MockMatchingEngine {
    state: Mutex<MatcherState>,
    trades: mpsc::UnboundedSender<Trade>,
}

impl MockMatchingEngine {
    pub fn new(state: MatcherState, trades: mpsc::UnboundedSender<Trade>) -> Self {
        Self {
            state: Mutex::new(state),
            trades,
        }
    }

    pub fn state(&self) -> MatcherState {
        self.state.lock().clone()
    }
}

impl ClusterEventListener<ClientOrder, MatcherState> for MockMatchingEngine {
    fn on_ha_state_change(&self, old: HAState, new: HAState) {
        let mut state = self.state.lock();
        info!("HA change: instance={}, {} => {}", state.instance, old, new);
        state.ha_state = new;
    }

    fn on_seq_state_change(&self, old: SeqState, new: SeqState) {
        let mut state = self.state.lock();
        info!("Seq change: instance={}, {} => {}", state.instance, old, new);
        state.seq_state = new;
    }

    fn on_state_message(&self, output: &MatcherState) {
        let mut state = self.state.lock();
        state.book = output.book.clone();
        state.last_input = output.last_input;
        state.last_output = output.last_input;
        debug!("Mirrored state: instance={}, {}", state.instance, state);
    }

    fn update_application_state(&self, order: &ClientOrder) -> MatcherState {
        let mut state = self.state.lock();
        let trades = state.add_order(order);
        counter!("matcher.orders.applied").increment(1);

        for trade in trades {
            if self.trades.send(trade).is_err() {
                warn!("Trade announcer stopped: instance={}", state.instance);
                break;
            }
        }
        state.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> (MockMatchingEngine, mpsc::UnboundedReceiver<Trade>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = MatcherState::new("matcher", 1, "MSFT", Matcher::new(100.0, 0.25));
        (MockMatchingEngine::new(state, tx), rx)
    }

    #[test]
    fn test_orders_update_book_and_emit_trades() {
        let (engine, mut trades) = engine();

        let output = engine.update_application_state(&ClientOrder::sell(1, "MSFT", 100.0, 5.0));
        assert_eq!(output.last_input, 1);
        assert!(trades.try_recv().is_err());

        let output = engine.update_application_state(&ClientOrder::buy(2, "MSFT", 100.0, 5.0));
        assert_eq!(output.last_output, 2);
        assert!(output.book.sells.is_empty());

        let trade = trades.try_recv().unwrap();
        assert_eq!(trade.quantity, 5.0);
        assert_eq!(trade.instrument, "MSFT");
    }

    #[test]
    fn test_backup_mirrors_book() {
        let (active, _active_trades) = engine();
        let output = active.update_application_state(&ClientOrder::buy(9, "MSFT", 99.75, 3.0));

        let (backup, _backup_trades) = engine();
        backup.on_ha_state_change(HAState::Connected, HAState::Backup);
        backup.on_state_message(&output);

        let mirrored = backup.state();
        assert_eq!(mirrored.book, output.book);
        assert_eq!(mirrored.last_input, 9);
        assert_eq!(mirrored.ha_state, HAState::Backup);
        assert_eq!(mirrored.instance, 1);
    }
}
