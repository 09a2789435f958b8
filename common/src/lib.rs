pub mod error;
pub mod naming;
pub mod types;

pub use error::{ClusterError, Result};
pub use naming::QueueNames;
pub use types::*;
