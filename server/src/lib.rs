//! Mock matching engine clustered over exclusive queues, plus the order
//! gateway and demo harness that drive it.

pub mod demo;
pub mod engine;
pub mod gateway;
pub mod health;
pub mod matcher;
pub mod settings;

pub use demo::{run, DemoReport};
pub use settings::{DemoSettings, Settings};
