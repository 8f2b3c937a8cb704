//! Assembly of one feed entry into an [`Item`].

use std::sync::Arc;

use feedgraph_shared::{AttachmentRole, Diagnostic, FetchError, Item, ParsedEntry};
use tracing::{debug, instrument, warn};

use crate::image::ImageResolver;
use crate::resolver::EnclosureResolver;

/// Builds items, resolving every declared enclosure and the entry image.
#[derive(Clone)]
pub struct ItemAssembler {
    resolver: Arc<EnclosureResolver>,
}

impl ItemAssembler {
    pub fn new(resolver: Arc<EnclosureResolver>) -> Self {
        Self { resolver }
    }

    /// Assemble the entry found at `index` in the source feed.
    ///
    /// Enclosures are fetched concurrently and re-collected in declaration
    /// order. A failed enclosure stays light and is recorded as a diagnostic;
    /// a failed image is dropped and recorded the same way.
    #[instrument(skip_all, fields(index = index, enclosures = entry.enclosures.len()))]
    pub async fn assemble(&self, index: usize, entry: ParsedEntry) -> Item {
        let mut handles = Vec::with_capacity(entry.enclosures.len());
        for declared in &entry.enclosures {
            let resolver = Arc::clone(&self.resolver);
            let url = declared.url.clone();
            let media_type = declared.media_type.clone();
            handles.push(tokio::spawn(async move {
                resolver.resolve(&url, &media_type).await
            }));
        }

        let image = ImageResolver::new(&self.resolver)
            .resolve(entry.image.as_ref())
            .await;

        let mut enclosures = Vec::with_capacity(handles.len());
        let mut diagnostics = Vec::new();

        let outcomes = handles.into_iter().zip(&entry.enclosures).enumerate();
        for (position, (handle, declared)) in outcomes {
            let outcome = handle.await.unwrap_or_else(|e| {
                Err(FetchError::new(
                    &declared.url,
                    format!("resolution task failed: {e}"),
                ))
            });

            match outcome {
                Ok(enclosure) => enclosures.push(enclosure),
                Err(error) => {
                    warn!(
                        index,
                        position,
                        url = %declared.url,
                        cause = %error.cause,
                        "enclosure fetch failed, keeping light enclosure"
                    );
                    enclosures.push(EnclosureResolver::resolve_light(
                        &declared.url,
                        &declared.media_type,
                    ));
                    diagnostics.push(Diagnostic {
                        role: AttachmentRole::Enclosure { position },
                        item_index: Some(index),
                        error,
                    });
                }
            }
        }

        if let Some(error) = image.warning {
            diagnostics.push(Diagnostic {
                role: AttachmentRole::ItemImage,
                item_index: Some(index),
                error,
            });
        }

        debug!(
            resolved = enclosures.iter().filter(|e| e.is_resolved()).count(),
            failed = diagnostics.len(),
            "item assembled"
        );

        Item {
            entry,
            enclosures,
            image: image.image,
            diagnostics,
        }
    }

    /// Assemble without fetching: every attachment stays light.
    pub fn assemble_light(entry: ParsedEntry) -> Item {
        let enclosures = entry
            .enclosures
            .iter()
            .map(|declared| EnclosureResolver::resolve_light(&declared.url, &declared.media_type))
            .collect();
        let image = ImageResolver::resolve_light(entry.image.as_ref());

        Item {
            entry,
            enclosures,
            image,
            diagnostics: Vec::new(),
        }
    }
}
