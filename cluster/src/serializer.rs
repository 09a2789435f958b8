use bytes::Bytes;
use hastream_common::{ClusterError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;

/// Converts application messages to and from wire bytes.
///
/// Keeping this out of the coordinator lets every application define its own
/// input and output messages.
pub trait ClusteredAppSerializer<I, O>: Send + Sync {
    fn deserialize_input(&self, msg: &[u8]) -> Result<I>;

    fn deserialize_output(&self, msg: &[u8]) -> Result<O>;

    fn serialize_output(&self, output: &O) -> Result<Bytes>;

    /// Used by gateways and tests that inject input
    fn serialize_input(&self, input: &I) -> Result<Bytes>;
}

/// Compact binary encoding for any serde types
pub struct BincodeSerializer<I, O> {
    _marker: PhantomData<fn() -> (I, O)>,
}

impl<I, O> BincodeSerializer<I, O> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<I, O> Default for BincodeSerializer<I, O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I, O> ClusteredAppSerializer<I, O> for BincodeSerializer<I, O>
where
    I: Serialize + DeserializeOwned,
    O: Serialize + DeserializeOwned,
{
    fn deserialize_input(&self, msg: &[u8]) -> Result<I> {
        bincode::deserialize(msg).map_err(|e| ClusterError::Serialization(e.to_string()))
    }

    fn deserialize_output(&self, msg: &[u8]) -> Result<O> {
        bincode::deserialize(msg).map_err(|e| ClusterError::Serialization(e.to_string()))
    }

    fn serialize_output(&self, output: &O) -> Result<Bytes> {
        bincode::serialize(output)
            .map(Bytes::from)
            .map_err(|e| ClusterError::Serialization(e.to_string()))
    }

    fn serialize_input(&self, input: &I) -> Result<Bytes> {
        bincode::serialize(input)
            .map(Bytes::from)
            .map_err(|e| ClusterError::Serialization(e.to_string()))
    }
}

/// JSON encoding, readable by external monitors
pub struct JsonSerializer<I, O> {
    _marker: PhantomData<fn() -> (I, O)>,
}

impl<I, O> JsonSerializer<I, O> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<I, O> Default for JsonSerializer<I, O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I, O> ClusteredAppSerializer<I, O> for JsonSerializer<I, O>
where
    I: Serialize + DeserializeOwned,
    O: Serialize + DeserializeOwned,
{
    fn deserialize_input(&self, msg: &[u8]) -> Result<I> {
        serde_json::from_slice(msg).map_err(|e| ClusterError::Serialization(e.to_string()))
    }

    fn deserialize_output(&self, msg: &[u8]) -> Result<O> {
        serde_json::from_slice(msg).map_err(|e| ClusterError::Serialization(e.to_string()))
    }

    fn serialize_output(&self, output: &O) -> Result<Bytes> {
        serde_json::to_vec(output)
            .map(Bytes::from)
            .map_err(|e| ClusterError::Serialization(e.to_string()))
    }

    fn serialize_input(&self, input: &I) -> Result<Bytes> {
        serde_json::to_vec(input)
            .map(Bytes::from)
            .map_err(|e| ClusterError::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Order {
        seq: u64,
        instrument: String,
        quantity: f64,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Book {
        last_seq: u64,
        levels: Vec<(f64, f64)>,
    }

    fn boundary_orders() -> Vec<Order> {
        vec![
            Order { seq: 1, instrument: "MSFT".to_string(), quantity: 100.5 },
            Order { seq: 0, instrument: String::new(), quantity: 0.0 },
            Order { seq: u64::MAX, instrument: "BRK.A".to_string(), quantity: f64::MAX },
        ]
    }

    #[test]
    fn test_bincode_round_trip() {
        let serializer = BincodeSerializer::<Order, Book>::new();

        for order in boundary_orders() {
            let bytes = serializer.serialize_input(&order).unwrap();
            assert_eq!(serializer.deserialize_input(&bytes).unwrap(), order);
        }

        let book = Book { last_seq: 7, levels: vec![(99.75, 10.0), (100.0, 0.0)] };
        let bytes = serializer.serialize_output(&book).unwrap();
        assert_eq!(serializer.deserialize_output(&bytes).unwrap(), book);

        let empty = Book { last_seq: 0, levels: Vec::new() };
        let bytes = serializer.serialize_output(&empty).unwrap();
        assert_eq!(serializer.deserialize_output(&bytes).unwrap(), empty);
    }

    #[test]
    fn test_json_round_trip() {
        let serializer = JsonSerializer::<Order, Book>::new();

        for order in boundary_orders().into_iter().take(2) {
            let bytes = serializer.serialize_input(&order).unwrap();
            assert_eq!(serializer.deserialize_input(&bytes).unwrap(), order);
        }

        let book = Book { last_seq: 3, levels: vec![(100.25, 5.5)] };
        let bytes = serializer.serialize_output(&book).unwrap();
        assert_eq!(serializer.deserialize_output(&bytes).unwrap(), book);
    }

    #[test]
    fn test_malformed_payloads_are_errors() {
        let json = JsonSerializer::<Order, Book>::new();
        assert!(matches!(
            json.deserialize_input(b"{not json"),
            Err(ClusterError::Serialization(_))
        ));
        assert!(json.deserialize_output(b"").is_err());

        let bin = BincodeSerializer::<Order, Book>::new();
        assert!(matches!(
            bin.deserialize_output(&[0xff]),
            Err(ClusterError::Serialization(_))
        ));
    }
}
