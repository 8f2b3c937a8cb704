//! Content-addressed store interface and backends.
//!
//! The [`ContentStore`] trait is the only thing the ingestion pipeline knows
//! about storage:
//! - `put_blob` stores a raw byte stream (media files, the original feed payload)
//! - `put_node` stores a JSON document as a structured DAG node
//! - `get_node` reads a node back as JSON
//!
//! Backends:
//! - [`IpfsHttpStore`]: an IPFS daemon reached over its HTTP API
//! - [`MemoryStore`]: in-process, for tests and offline previews
//!
//! All implementations must be idempotent: storing identical bytes twice
//! yields the same [`ContentId`]. They are not transactional.

mod ipfs;
mod memory;

use async_trait::async_trait;
use bytes::Bytes;
use feedgraph_shared::{ContentId, Result};
use futures::stream::{self, BoxStream, StreamExt};

pub use ipfs::IpfsHttpStore;
pub use memory::MemoryStore;

/// A blob body delivered chunk by chunk.
///
/// Bodies are never required to fit in memory: backends consume the stream as
/// it arrives.
pub type BlobStream = BoxStream<'static, Result<Bytes>>;

/// Encoding parameters for a DAG node write.
///
/// Previously published roots were written with [`NodeOptions::CANONICAL`];
/// any other triple produces different content ids for the same document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeOptions {
    /// Encoding of the submitted document.
    pub input_encoding: &'static str,
    /// Node format the store persists.
    pub node_kind: &'static str,
    /// Multihash function name.
    pub hash: &'static str,
}

impl NodeOptions {
    /// JSON in, CBOR node out, SHA2-256 addressed.
    pub const CANONICAL: NodeOptions = NodeOptions {
        input_encoding: "json",
        node_kind: "cbor",
        hash: "sha2-256",
    };

    /// IPLD codec name for the input encoding (`json` → `dag-json`).
    pub fn input_codec(&self) -> String {
        dag_codec(self.input_encoding)
    }

    /// IPLD codec name for the stored node (`cbor` → `dag-cbor`).
    pub fn store_codec(&self) -> String {
        dag_codec(self.node_kind)
    }
}

impl Default for NodeOptions {
    fn default() -> Self {
        Self::CANONICAL
    }
}

fn dag_codec(name: &str) -> String {
    if name.starts_with("dag-") {
        name.to_string()
    } else {
        format!("dag-{name}")
    }
}

/// A content-addressed blob/DAG store.
///
/// Concurrent calls must be safe; the pipeline issues them from many tasks.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Store a streamed body and return its content id.
    ///
    /// An error yielded by the stream aborts the write; nothing is stored.
    async fn put_blob(&self, body: BlobStream) -> Result<ContentId>;

    /// Store a body that is already in memory.
    async fn put_bytes(&self, bytes: Bytes) -> Result<ContentId> {
        self.put_blob(stream::once(async move { Result::<Bytes>::Ok(bytes) }).boxed())
            .await
    }

    /// Store a JSON document as a DAG node and return its content id.
    async fn put_node(&self, json: &[u8], options: &NodeOptions) -> Result<ContentId>;

    /// Read a DAG node back as JSON.
    async fn get_node(&self, id: &ContentId) -> Result<serde_json::Value>;
}
