//! Publishing a [`FeedDocument`] to the content store, and reading it back.

use std::sync::Arc;

use feedgraph_shared::{ContentId, FeedDocument, FeedGraphError, Result};
use feedgraph_store::{ContentStore, NodeOptions};
use tracing::{info, instrument};

/// Writes assembled documents as DAG nodes.
pub struct GraphPublisher {
    store: Arc<dyn ContentStore>,
    options: NodeOptions,
}

impl GraphPublisher {
    /// Publisher using [`NodeOptions::CANONICAL`].
    pub fn new(store: Arc<dyn ContentStore>) -> Self {
        Self {
            store,
            options: NodeOptions::CANONICAL,
        }
    }

    /// Store `document` and return its root content id.
    ///
    /// Any store failure is fatal and reported as [`FeedGraphError::Publish`].
    #[instrument(skip_all, fields(feed_id = %document.feed_id, items = document.items.len()))]
    pub async fn publish(&self, document: &FeedDocument) -> Result<ContentId> {
        let encoded = encode(document)?;
        let root = self
            .store
            .put_node(&encoded, &self.options)
            .await
            .map_err(|e| FeedGraphError::publish(e.to_string()))?;

        info!(%root, bytes = encoded.len(), "feed document published");
        Ok(root)
    }
}

/// Canonical JSON for `document`: object keys sorted, no insignificant whitespace.
///
/// Going through [`serde_json::Value`] sorts keys, so field declaration
/// order never leaks into the encoding.
pub fn encode(document: &FeedDocument) -> Result<Vec<u8>> {
    let value = serde_json::to_value(document)
        .map_err(|e| FeedGraphError::publish(format!("failed to serialize document: {e}")))?;
    serde_json::to_vec(&value)
        .map_err(|e| FeedGraphError::publish(format!("failed to encode document: {e}")))
}

/// Pretty-printed JSON for display.
pub fn to_pretty_json(document: &FeedDocument) -> Result<String> {
    let value = serde_json::to_value(document)
        .map_err(|e| FeedGraphError::validation(format!("failed to serialize document: {e}")))?;
    serde_json::to_string_pretty(&value)
        .map_err(|e| FeedGraphError::validation(format!("failed to encode document: {e}")))
}

/// Read a published document back from the store.
#[instrument(skip(store))]
pub async fn read_document(store: &dyn ContentStore, root: &ContentId) -> Result<FeedDocument> {
    let node = store.get_node(root).await?;
    serde_json::from_value(node)
        .map_err(|e| FeedGraphError::validation(format!("{root} is not a feed document: {e}")))
}

/// JSON Schema of the published document.
pub fn document_schema() -> serde_json::Value {
    let schema = schemars::schema_for!(FeedDocument);
    serde_json::to_value(schema).unwrap_or_default()
}
