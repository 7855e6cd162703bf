// Replicated key-value state machine.
//
// Operations and responses travel through the log as bincode payloads.
// Snapshots serialize the map in bounded chunks so large states stream
// through the chunked install protocol instead of one oversized message.

use std::collections::BTreeMap;

use bincode::{Decode, Encode};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{RaftError, Result};
use crate::machine::StateMachine;
use crate::model::LogIndex;

/// Entries per snapshot chunk payload.
const SNAPSHOT_CHUNK_ENTRIES: usize = 64;

/// Operation against the key-value machine.
#[derive(Debug, Clone, Serialize, Deserialize, Encode, Decode)]
pub enum KvOperation {
    /// Set `key` to `value`, returning the previous value
    Put { key: String, value: Vec<u8> },

    /// Read the current value of `key`
    Get { key: String },

    /// Remove `key`, returning the removed value
    Remove { key: String },
}

impl KvOperation {
    pub fn put(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        KvOperation::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn get(key: impl Into<String>) -> Self {
        KvOperation::Get { key: key.into() }
    }

    pub fn remove(key: impl Into<String>) -> Self {
        KvOperation::Remove { key: key.into() }
    }

    pub fn encode(&self) -> Bytes {
        let encoded = bincode::encode_to_vec(self, bincode::config::standard())
            .expect("kv operation encoding cannot fail");
        Bytes::from(encoded)
    }

    fn decode(payload: &Bytes) -> Result<Self> {
        let (operation, _) = bincode::decode_from_slice(payload, bincode::config::standard())
            .map_err(|e| RaftError::InvalidArgument(format!("malformed kv operation: {e}")))?;
        Ok(operation)
    }
}

/// Response produced by the key-value machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub enum KvResponse {
    /// Value observed or displaced by the operation
    Value(Option<Vec<u8>>),
}

impl KvResponse {
    pub fn encode(&self) -> Bytes {
        let encoded = bincode::encode_to_vec(self, bincode::config::standard())
            .expect("kv response encoding cannot fail");
        Bytes::from(encoded)
    }

    pub fn decode(payload: &Bytes) -> Result<Self> {
        let (response, _) = bincode::decode_from_slice(payload, bincode::config::standard())
            .map_err(|e| RaftError::InvalidArgument(format!("malformed kv response: {e}")))?;
        Ok(response)
    }
}

/// In-memory replicated key-value store.
#[derive(Debug, Default)]
pub struct KvStateMachine {
    data: BTreeMap<String, Vec<u8>>,
}

impl KvStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Direct read access, for tests and local inspection.
    pub fn value_of(&self, key: &str) -> Option<&Vec<u8>> {
        self.data.get(key)
    }

    fn run(&self, operation: &KvOperation) -> KvResponse {
        match operation {
            KvOperation::Put { key, .. } | KvOperation::Get { key } | KvOperation::Remove { key } => {
                KvResponse::Value(self.data.get(key).cloned())
            }
        }
    }
}

impl StateMachine for KvStateMachine {
    fn apply(&mut self, _log_index: LogIndex, operation: &Bytes) -> Result<Bytes> {
        let operation = KvOperation::decode(operation)?;
        let response = match operation {
            KvOperation::Put { key, value } => KvResponse::Value(self.data.insert(key, value)),
            KvOperation::Get { key } => KvResponse::Value(self.data.get(&key).cloned()),
            KvOperation::Remove { key } => KvResponse::Value(self.data.remove(&key)),
        };
        Ok(response.encode())
    }

    fn take_snapshot(&self, _log_index: LogIndex) -> Result<Vec<Bytes>> {
        let pairs: Vec<(String, Vec<u8>)> = self
            .data
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let mut chunks = Vec::new();
        for window in pairs.chunks(SNAPSHOT_CHUNK_ENTRIES) {
            let encoded = bincode::encode_to_vec(window.to_vec(), bincode::config::standard())
                .map_err(|e| RaftError::Internal(format!("kv snapshot encoding: {e}")))?;
            chunks.push(Bytes::from(encoded));
        }
        if chunks.is_empty() {
            // an empty machine still snapshots as one empty chunk
            let encoded =
                bincode::encode_to_vec::<Vec<(String, Vec<u8>)>, _>(Vec::new(), bincode::config::standard())
                    .map_err(|e| RaftError::Internal(format!("kv snapshot encoding: {e}")))?;
            chunks.push(Bytes::from(encoded));
        }
        Ok(chunks)
    }

    fn install_snapshot(&mut self, _log_index: LogIndex, chunks: &[Bytes]) -> Result<()> {
        let mut data = BTreeMap::new();
        for chunk in chunks {
            let (pairs, _): (Vec<(String, Vec<u8>)>, _) =
                bincode::decode_from_slice(chunk, bincode::config::standard())
                    .map_err(|e| RaftError::StoreError(format!("malformed kv snapshot: {e}")))?;
            data.extend(pairs);
        }
        self.data = data;
        Ok(())
    }

    fn run_operation(&self, operation: &Bytes) -> Result<Bytes> {
        let operation = KvOperation::decode(operation)?;
        Ok(self.run(&operation).encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(machine: &mut KvStateMachine, index: LogIndex, op: KvOperation) -> KvResponse {
        let payload = machine.apply(index, &op.encode()).unwrap();
        KvResponse::decode(&payload).unwrap()
    }

    #[test]
    fn test_put_get_remove() {
        let mut machine = KvStateMachine::new();

        let previous = apply(&mut machine, 1, KvOperation::put("k", b"v1".to_vec()));
        assert_eq!(previous, KvResponse::Value(None));

        let displaced = apply(&mut machine, 2, KvOperation::put("k", b"v2".to_vec()));
        assert_eq!(displaced, KvResponse::Value(Some(b"v1".to_vec())));

        let read = apply(&mut machine, 3, KvOperation::get("k"));
        assert_eq!(read, KvResponse::Value(Some(b"v2".to_vec())));

        let removed = apply(&mut machine, 4, KvOperation::remove("k"));
        assert_eq!(removed, KvResponse::Value(Some(b"v2".to_vec())));
        assert!(machine.is_empty());
    }

    #[test]
    fn test_run_operation_is_read_only() {
        let mut machine = KvStateMachine::new();
        apply(&mut machine, 1, KvOperation::put("k", b"v".to_vec()));

        let response = machine
            .run_operation(&KvOperation::remove("k").encode())
            .unwrap();
        assert_eq!(
            KvResponse::decode(&response).unwrap(),
            KvResponse::Value(Some(b"v".to_vec()))
        );
        // the remove did not take effect
        assert_eq!(machine.value_of("k"), Some(&b"v".to_vec()));
    }

    #[test]
    fn test_snapshot_round_trip_in_chunks() {
        let mut machine = KvStateMachine::new();
        for i in 0..200 {
            apply(
                &mut machine,
                i + 1,
                KvOperation::put(format!("key-{i:03}"), format!("value-{i}").into_bytes()),
            );
        }

        let chunks = machine.take_snapshot(200).unwrap();
        assert!(chunks.len() > 1);

        let mut restored = KvStateMachine::new();
        restored.install_snapshot(200, &chunks).unwrap();
        assert_eq!(restored.len(), 200);
        assert_eq!(
            restored.value_of("key-042"),
            Some(&b"value-42".to_vec())
        );
    }

    #[test]
    fn test_empty_machine_snapshots_one_chunk() {
        let machine = KvStateMachine::new();
        let chunks = machine.take_snapshot(0).unwrap();
        assert_eq!(chunks.len(), 1);

        let mut restored = KvStateMachine::new();
        restored.install_snapshot(0, &chunks).unwrap();
        assert!(restored.is_empty());
    }

    #[test]
    fn test_malformed_operation_rejected() {
        let mut machine = KvStateMachine::new();
        let result = machine.apply(1, &Bytes::from_static(b"\xff\xff\xff"));
        assert!(matches!(result, Err(RaftError::InvalidArgument(_))));
    }
}
