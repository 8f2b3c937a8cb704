//! End-to-end `ingest` pipeline: URL → feed → items → document → root CID.

use std::sync::Arc;
use std::time::Duration;

use feedgraph_feed::FeedSource;
use feedgraph_shared::{
    ContentId, Diagnostic, FeedDocument, FeedGraphError, FeedIdentity, IngestConfig, Item,
    ParsedEntry, Result, RunId,
};
use feedgraph_store::ContentStore;
use tokio::time::Instant;
use tracing::{info, instrument, warn};

use crate::assembler::FeedAssembler;
use crate::item::ItemAssembler;
use crate::publisher::{GraphPublisher, to_pretty_json};
use crate::resolver::{EnclosureResolver, run_deadline};

/// Result of the `ingest` pipeline.
#[derive(Debug)]
pub struct IngestResult {
    pub run_id: RunId,
    /// Root content id of the published document.
    pub root: ContentId,
    pub feed_id: FeedIdentity,
    pub title: String,
    /// The published document as pretty-printed JSON.
    pub document_json: String,
    /// Downgraded enclosures and dropped images, feed-level first.
    pub diagnostics: Vec<Diagnostic>,
    pub item_count: usize,
    pub elapsed: Duration,
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called as each item finishes, in source order.
    fn item_assembled(&self, current: usize, total: usize);
    /// Called when the pipeline completes.
    fn done(&self, result: &IngestResult);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn item_assembled(&self, _current: usize, _total: usize) {}
    fn done(&self, _result: &IngestResult) {}
}

/// Run the full ingest pipeline.
///
/// 1. Fetch and parse the feed (fatal on failure)
/// 2. Resolve every item's enclosures and image, bounded by the worker pool
/// 3. Resolve the feed image and original payload, compose the document
/// 4. Publish the document (fatal on failure)
#[instrument(skip_all, fields(url = %url, run_id = tracing::field::Empty))]
pub async fn ingest(
    url: &str,
    config: &IngestConfig,
    source: &dyn FeedSource,
    store: Arc<dyn ContentStore>,
    progress: &dyn ProgressReporter,
) -> Result<IngestResult> {
    let start = Instant::now();
    let deadline = run_deadline(start, config.run_deadline);
    let run_id = RunId::new();
    tracing::Span::current().record("run_id", tracing::field::display(&run_id));

    info!(concurrency = config.concurrency, "starting ingest run");

    // --- Phase 1: Feed ---
    progress.phase("Fetching feed");
    let feed = source
        .fetch_feed(url, config.feed_timeout.min(config.run_deadline))
        .await?;

    // --- Phase 2: Items ---
    progress.phase("Resolving enclosures");
    let resolver = Arc::new(EnclosureResolver::with_deadline(
        Arc::clone(&store),
        config,
        deadline,
    )?);
    let items = assemble_items(&resolver, feed.entries, progress).await?;

    // --- Phase 3: Feed document ---
    progress.phase("Assembling feed document");
    let document = FeedAssembler::new(resolver).assemble(feed.meta, items).await;
    let document_json = to_pretty_json(&document)?;

    // --- Phase 4: Publish ---
    progress.phase("Publishing");
    let root = GraphPublisher::new(store).publish(&document).await?;

    let diagnostics = document.all_diagnostics();
    for diagnostic in &diagnostics {
        warn!(%diagnostic, "attachment downgraded");
    }

    let result = IngestResult {
        run_id,
        root,
        feed_id: document.feed_id.clone(),
        title: document.title.clone(),
        document_json,
        diagnostics,
        item_count: document.items.len(),
        elapsed: start.elapsed(),
    };

    info!(
        root = %result.root,
        items = result.item_count,
        downgraded = result.diagnostics.len(),
        elapsed_ms = result.elapsed.as_millis() as u64,
        "ingest complete"
    );

    progress.done(&result);
    Ok(result)
}

/// Fetch a feed and assemble it with every attachment left light.
///
/// Nothing is fetched besides the feed itself and nothing is written to a store.
#[instrument(skip_all, fields(url = %url))]
pub async fn preview(
    url: &str,
    config: &IngestConfig,
    source: &dyn FeedSource,
) -> Result<FeedDocument> {
    let feed = source.fetch_feed(url, config.feed_timeout).await?;
    let items = feed
        .entries
        .into_iter()
        .map(ItemAssembler::assemble_light)
        .collect();
    Ok(FeedAssembler::assemble_light(feed.meta, items))
}

/// Assemble all items concurrently and return them in source order.
async fn assemble_items(
    resolver: &Arc<EnclosureResolver>,
    entries: Vec<ParsedEntry>,
    progress: &dyn ProgressReporter,
) -> Result<Vec<Item>> {
    let assembler = ItemAssembler::new(Arc::clone(resolver));
    let total = entries.len();

    let handles: Vec<_> = entries
        .into_iter()
        .enumerate()
        .map(|(index, entry)| {
            let assembler = assembler.clone();
            tokio::spawn(async move { assembler.assemble(index, entry).await })
        })
        .collect();

    let mut items = Vec::with_capacity(total);
    for (index, handle) in handles.into_iter().enumerate() {
        let item = handle.await.map_err(|e| {
            FeedGraphError::validation(format!("item {index} assembly task failed: {e}"))
        })?;
        progress.item_assembled(index + 1, total);
        items.push(item);
    }

    Ok(items)
}
