use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

/// An order as submitted by a client through the gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientOrder {
    pub seq_id: u64,
    pub is_buy: bool,
    pub quantity: f64,
    pub price: f64,
    pub instrument: String,
    pub trader: String,
}

impl ClientOrder {
    pub fn buy(seq_id: u64, instrument: &str, price: f64, quantity: f64) -> Self {
        Self {
            seq_id,
            is_buy: true,
            quantity,
            price,
            instrument: instrument.to_string(),
            trader: String::new(),
        }
    }

    pub fn sell(seq_id: u64, instrument: &str, price: f64, quantity: f64) -> Self {
        Self {
            is_buy: false,
            ..Self::buy(seq_id, instrument, price, quantity)
        }
    }
}

impl fmt::Display for ClientOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ClientOrder{{seq_id={}, side={}, quantity={:.2}, price={:.2}, instrument={}}}",
            self.seq_id,
            if self.is_buy { 'B' } else { 'S' },
            self.quantity,
            self.price,
            self.instrument
        )
    }
}

/// A fill between a buy level and a sell level
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub instrument: String,
    pub price: f64,
    pub quantity: f64,
}

impl fmt::Display for Trade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ {}", self.quantity, self.price)
    }
}

/// Aggregated resting quantity at one price
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Level {
    pub price: f64,
    pub quantity: f64,
}

/// Price-level order book for a single instrument.
///
/// Buys are kept best (highest) first and sells best (lowest) first. Crossing
/// levels trade at the average of the two level prices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Matcher {
    pub par: f64,
    pub price_increment: f64,
    pub buys: Vec<Level>,
    pub sells: Vec<Level>,
}

impl Matcher {
    pub fn new(par: f64, price_increment: f64) -> Self {
        Self {
            par,
            price_increment,
            buys: Vec::new(),
            sells: Vec::new(),
        }
    }

    /// Lowest price in the book
    pub fn min_price(&self) -> Option<f64> {
        self.buys
            .last()
            .or_else(|| self.sells.first())
            .map(|l| l.price)
    }

    /// Highest price in the book
    pub fn max_price(&self) -> Option<f64> {
        self.sells
            .last()
            .or_else(|| self.buys.first())
            .map(|l| l.price)
    }

    pub fn add_order(&mut self, order: &ClientOrder) -> Vec<Trade> {
        if order.quantity.is_nan() || order.quantity <= 0.0 || !order.price.is_finite() {
            warn!("Ignoring unmatchable order: {}", order);
            return Vec::new();
        }

        if order.is_buy {
            // Best buy is the highest price
            insert_level(&mut self.buys, order, |new, existing| new > existing);
        } else {
            insert_level(&mut self.sells, order, |new, existing| new < existing);
        }
        self.cross(&order.instrument)
    }

    fn cross(&mut self, instrument: &str) -> Vec<Trade> {
        let mut trades = Vec::new();

        while let (Some(buy), Some(sell)) = (self.buys.first_mut(), self.sells.first_mut()) {
            if buy.price < sell.price {
                break;
            }

            let quantity = buy.quantity.min(sell.quantity);
            let trade = Trade {
                instrument: instrument.to_string(),
                price: (buy.price + sell.price) / 2.0,
                quantity,
            };
            info!("TRADE: {} {}", instrument, trade);

            buy.quantity -= quantity;
            sell.quantity -= quantity;
            if buy.quantity <= 0.0 {
                debug!("Clearing buy level: price={}", buy.price);
                self.buys.remove(0);
            }
            if sell.quantity <= 0.0 {
                debug!("Clearing sell level: price={}", sell.price);
                self.sells.remove(0);
            }
            trades.push(trade);
        }

        trades
    }
}

/// Merge into an existing level at the same price or insert a new level
/// ahead of the first level it is better than.
fn insert_level(levels: &mut Vec<Level>, order: &ClientOrder, better: impl Fn(f64, f64) -> bool) {
    if let Some(level) = levels.iter_mut().find(|l| l.price == order.price) {
        level.quantity += order.quantity;
        return;
    }
    let position = levels
        .iter()
        .position(|l| better(order.price, l.price))
        .unwrap_or(levels.len());
    levels.insert(
        position,
        Level {
            price: order.price,
            quantity: order.quantity,
        },
    );
}
