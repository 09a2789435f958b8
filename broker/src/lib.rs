//! In-process message broker for running and testing clustered applications
//! without an external message router.
//!
//! Queues are exclusive: the first bound consumer receives every message and
//! is told so with an active flow event; when it unbinds or its session is
//! severed, the next consumer is promoted.

pub mod broker;
pub mod topic;
pub mod transport;

pub use broker::{FlowId, InMemoryBroker, SessionId};
pub use topic::topic_matches;
pub use transport::{InMemoryFlow, InMemoryTransport};
