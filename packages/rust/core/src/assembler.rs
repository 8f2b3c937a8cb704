//! Top-level document assembly: feed metadata, identity, feed image, the
//! original payload reference, and the ordered items.

use std::sync::Arc;

use feedgraph_shared::{
    AttachmentRole, CURRENT_SCHEMA_VERSION, Diagnostic, Enclosure, FeedDocument, FeedMeta, Item,
};
use tracing::{info, instrument, warn};

use crate::identity;
use crate::image::ImageResolver;
use crate::resolver::EnclosureResolver;

/// Composes a [`FeedDocument`] from parsed feed metadata and assembled items.
///
/// The only network I/O here is the feed image and the original payload;
/// item-level attachments were resolved by the item assembler.
pub struct FeedAssembler {
    resolver: Arc<EnclosureResolver>,
}

impl FeedAssembler {
    pub fn new(resolver: Arc<EnclosureResolver>) -> Self {
        Self { resolver }
    }

    #[instrument(skip_all, fields(feed_link = %meta.feed_link, items = items.len()))]
    pub async fn assemble(&self, meta: FeedMeta, items: Vec<Item>) -> FeedDocument {
        let images = ImageResolver::new(&self.resolver);
        let (image, original) = tokio::join!(
            images.resolve(meta.image.as_ref()),
            self.resolver.resolve(&meta.feed_link, &meta.feed_type),
        );

        let mut diagnostics = Vec::new();

        if let Some(error) = image.warning {
            diagnostics.push(Diagnostic {
                role: AttachmentRole::FeedImage,
                item_index: None,
                error,
            });
        }

        let original = match original {
            Ok(original) => original,
            Err(error) => {
                warn!(cause = %error.cause, "original feed payload not stored, keeping light reference");
                let light = EnclosureResolver::resolve_light(&meta.feed_link, &meta.feed_type);
                diagnostics.push(Diagnostic {
                    role: AttachmentRole::OriginalFeed,
                    item_index: None,
                    error,
                });
                light
            }
        };

        let document = compose(meta, image.image, original, items, diagnostics);
        info!(feed_id = %document.feed_id, "feed document assembled");
        document
    }

    /// Assemble without fetching: feed image and original payload stay light.
    pub fn assemble_light(meta: FeedMeta, items: Vec<Item>) -> FeedDocument {
        let image = ImageResolver::resolve_light(meta.image.as_ref());
        let original = EnclosureResolver::resolve_light(&meta.feed_link, &meta.feed_type);
        compose(meta, image, original, items, Vec::new())
    }
}

fn compose(
    meta: FeedMeta,
    image: Option<Enclosure>,
    original: Enclosure,
    items: Vec<Item>,
    diagnostics: Vec<Diagnostic>,
) -> FeedDocument {
    FeedDocument {
        schema_version: CURRENT_SCHEMA_VERSION,
        feed_id: identity::derive(&meta.feed_link),
        title: meta.title.clone(),
        description: meta.description.clone(),
        link: meta.link.clone(),
        updated: meta.updated.or(meta.published).map(|at| at.to_rfc3339()),
        image,
        original,
        source: meta,
        items,
        diagnostics,
    }
}
