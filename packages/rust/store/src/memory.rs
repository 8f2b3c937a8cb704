use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use cid::Cid;
use feedgraph_shared::{ContentId, FeedGraphError, Result};
use futures::StreamExt;
use multihash::Multihash;
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::{BlobStream, ContentStore, NodeOptions};

/// SHA2-256 multihash code
const SHA2_256_CODE: u64 = 0x12;

/// Raw codec identifier (0x55) for blobs
const RAW_CODEC: u64 = 0x55;

/// DAG-CBOR codec identifier (0x71) for nodes
const DAG_CBOR_CODEC: u64 = 0x71;

/// In-memory, HashMap-based content store.
///
/// Blob ids are CIDv1(raw, sha2-256) of the bytes; node ids are
/// CIDv1(dag-cbor, sha2-256) of the DAG-CBOR encoding of the document, with
/// `{"/": "<cid>"}` maps encoded as links. An IPFS daemon given the same
/// document through `dag/put` (dag-json in, dag-cbor stored) computes the same
/// id. Only [`NodeOptions::CANONICAL`] is accepted for nodes.
pub struct MemoryStore {
    blobs: RwLock<HashMap<ContentId, Bytes>>,
    nodes: RwLock<HashMap<ContentId, Value>>,
    blob_writes: AtomicUsize,
    node_writes: AtomicUsize,
    reject_writes: bool,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            blobs: RwLock::new(HashMap::new()),
            nodes: RwLock::new(HashMap::new()),
            blob_writes: AtomicUsize::new(0),
            node_writes: AtomicUsize::new(0),
            reject_writes: false,
        }
    }

    /// A store that fails every write, standing in for an unreachable backend.
    pub fn rejecting() -> Self {
        Self {
            reject_writes: true,
            ..Self::new()
        }
    }

    /// Number of `put_blob` calls that reached the store.
    pub fn blob_writes(&self) -> usize {
        self.blob_writes.load(Ordering::SeqCst)
    }

    /// Number of `put_node` calls that reached the store.
    pub fn node_writes(&self) -> usize {
        self.node_writes.load(Ordering::SeqCst)
    }

    /// Number of distinct blobs held.
    pub fn blob_count(&self) -> usize {
        self.blobs.read().map(|map| map.len()).unwrap_or_default()
    }

    /// Fetch a stored blob.
    pub fn blob(&self, id: &ContentId) -> Option<Bytes> {
        self.blobs.read().ok()?.get(id).cloned()
    }

    fn check_writable(&self) -> Result<()> {
        if self.reject_writes {
            return Err(FeedGraphError::Store("store rejected the write".into()));
        }
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn put_blob(&self, mut body: BlobStream) -> Result<ContentId> {
        self.blob_writes.fetch_add(1, Ordering::SeqCst);
        self.check_writable()?;

        let mut hasher = Sha256::new();
        let mut data = BytesMut::new();
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            hasher.update(&chunk);
            data.extend_from_slice(&chunk);
        }

        let id = id_from_digest(RAW_CODEC, &hasher.finalize())?;
        let mut map = self.blobs.write().map_err(|_| poisoned())?;
        map.entry(id.clone()).or_insert_with(|| data.freeze());
        Ok(id)
    }

    async fn put_node(&self, json: &[u8], options: &NodeOptions) -> Result<ContentId> {
        self.node_writes.fetch_add(1, Ordering::SeqCst);
        self.check_writable()?;

        if *options != NodeOptions::CANONICAL {
            return Err(FeedGraphError::Store(format!(
                "unsupported node options: {options:?}"
            )));
        }

        let document: Value = serde_json::from_slice(json)
            .map_err(|e| FeedGraphError::Store(format!("node is not valid JSON: {e}")))?;
        let encoded = encode_node(&document)?;

        let id = id_from_digest(DAG_CBOR_CODEC, &Sha256::digest(&encoded))?;
        let mut map = self.nodes.write().map_err(|_| poisoned())?;
        map.entry(id.clone()).or_insert(document);
        Ok(id)
    }

    async fn get_node(&self, id: &ContentId) -> Result<Value> {
        self.nodes
            .read()
            .map_err(|_| poisoned())?
            .get(id)
            .cloned()
            .ok_or_else(|| FeedGraphError::Store(format!("node not found: {id}")))
    }
}

fn poisoned() -> FeedGraphError {
    FeedGraphError::Store("memory store lock poisoned".into())
}

/// DAG-CBOR bytes of a dag-json document.
fn encode_node(document: &Value) -> Result<Vec<u8>> {
    serde_ipld_dagcbor::to_vec(&DagJson(document))
        .map_err(|e| FeedGraphError::Store(format!("DAG-CBOR encoding failed: {e}")))
}

/// Serializes a JSON value the way dag-json is read: a map whose only key is
/// `"/"` and whose value parses as a CID is a link (CBOR tag 42), not a map.
struct DagJson<'a>(&'a Value);

impl Serialize for DagJson<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self.0 {
            Value::Object(map) => {
                if let Some(link) = as_link(map) {
                    return link.serialize(serializer);
                }
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (key, value) in map {
                    out.serialize_entry(key, &DagJson(value))?;
                }
                out.end()
            }
            Value::Array(items) => serializer.collect_seq(items.iter().map(DagJson)),
            scalar => scalar.serialize(serializer),
        }
    }
}

fn as_link(map: &serde_json::Map<String, Value>) -> Option<Cid> {
    match (map.len(), map.get("/")) {
        (1, Some(Value::String(cid))) => cid.parse().ok(),
        _ => None,
    }
}

/// CIDv1 with a SHA2-256 multihash.
fn id_from_digest(codec: u64, digest: &[u8]) -> Result<ContentId> {
    let hash = Multihash::<64>::wrap(SHA2_256_CODE, digest)
        .map_err(|e| FeedGraphError::Store(format!("multihash: {e}")))?;
    Ok(ContentId::new(Cid::new_v1(codec, hash)))
}

#[cfg(test)]
mod tests {
    use super::*;

    use futures::stream;

    const HELLO_CID: &str = "bafkreifzjut3te2nhyekklss27nh3k72ysco7y32koao5eei66wof36n5e";

    fn chunks(parts: &[&'static [u8]]) -> BlobStream {
        let parts: Vec<Result<Bytes>> = parts.iter().map(|p| Ok(Bytes::from_static(p))).collect();
        stream::iter(parts).boxed()
    }

    #[tokio::test]
    async fn identical_blobs_share_an_id() {
        let store = MemoryStore::new();
        let a = store.put_bytes(Bytes::from_static(b"hello world")).await.unwrap();
        let b = store.put_bytes(Bytes::from_static(b"hello world")).await.unwrap();
        let c = store.put_bytes(Bytes::from_static(b"goodbye")).await.unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(store.blob_writes(), 3);
        assert_eq!(store.blob_count(), 2);
        assert_eq!(a.codec(), RAW_CODEC);
        assert_eq!(a.to_string(), HELLO_CID);
    }

    #[tokio::test]
    async fn chunked_blob_hashes_like_whole_bytes() {
        let store = MemoryStore::new();
        let id = store
            .put_blob(chunks(&[b"hel", b"lo ", b"", b"world"]))
            .await
            .unwrap();

        assert_eq!(id.to_string(), HELLO_CID);
        assert_eq!(store.blob(&id).unwrap(), Bytes::from_static(b"hello world"));
    }

    #[tokio::test]
    async fn stream_error_aborts_blob_write() {
        let store = MemoryStore::new();
        let body = stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(FeedGraphError::Store("connection reset".into())),
        ])
        .boxed();

        let err = store.put_blob(body).await.unwrap_err();
        assert!(err.to_string().contains("connection reset"));
        assert_eq!(store.blob_writes(), 1);
        assert_eq!(store.blob_count(), 0);
    }

    #[tokio::test]
    async fn link_maps_are_encoded_as_cbor_links() {
        let store = MemoryStore::new();
        let json = format!(r#"{{"link":{{"/":"{HELLO_CID}"}}}}"#);

        let encoded = encode_node(&serde_json::from_str(&json).unwrap()).unwrap();
        // tag 42, then a 37-byte string: identity multibase prefix + binary CID
        assert_eq!(&encoded[6..10], &[0xd8, 0x2a, 0x58, 0x25]);
        assert_eq!(encoded[10], 0x00);

        // Same id a daemon computes for this document via dag/put.
        let id = store
            .put_node(json.as_bytes(), &NodeOptions::CANONICAL)
            .await
            .unwrap();
        assert_eq!(
            id.to_string(),
            "bafyreibxatvjahmjebw5pang7susd55uzesh66lb3tahljxv5s2ljabily"
        );
        assert_eq!(store.get_node(&id).await.unwrap()["link"]["/"], HELLO_CID);
    }

    #[test]
    fn non_cid_slash_maps_stay_maps() {
        let value = serde_json::json!({ "/": "not a cid" });
        let encoded = encode_node(&value).unwrap();
        assert_eq!(encoded[0], 0xa1);
        assert!(!encoded.windows(2).any(|w| w == [0xd8, 0x2a]));
    }

    #[tokio::test]
    async fn node_ids_ignore_key_order() {
        let store = MemoryStore::new();
        let opts = NodeOptions::CANONICAL;
        let a = store
            .put_node(br#"{"title":"Example Cast","items":[1,2]}"#, &opts)
            .await
            .unwrap();
        let b = store
            .put_node(br#"{"items":[1,2],"title":"Example Cast"}"#, &opts)
            .await
            .unwrap();

        assert_eq!(a, b);
        assert_eq!(a.codec(), DAG_CBOR_CODEC);

        let node = store.get_node(&a).await.unwrap();
        assert_eq!(node["title"], "Example Cast");
    }

    #[tokio::test]
    async fn non_canonical_options_are_rejected() {
        let store = MemoryStore::new();
        let opts = NodeOptions {
            input_encoding: "json",
            node_kind: "protobuf",
            hash: "sha2-256",
        };
        assert!(store.put_node(b"{}", &opts).await.is_err());
    }

    #[tokio::test]
    async fn rejecting_store_fails_writes() {
        let store = MemoryStore::rejecting();
        assert!(store.put_bytes(Bytes::from_static(b"x")).await.is_err());
        assert!(store.put_node(b"{}", &NodeOptions::CANONICAL).await.is_err());
        assert_eq!(store.blob_writes(), 1);
    }

    #[tokio::test]
    async fn missing_node_is_store_error() {
        let store = MemoryStore::new();
        let id = store.put_bytes(Bytes::from_static(b"blob")).await.unwrap();
        let err = store.get_node(&id).await.unwrap_err();
        assert!(matches!(err, FeedGraphError::Store(_)));
    }
}
