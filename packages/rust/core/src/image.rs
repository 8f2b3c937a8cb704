//! Feed-level and item-level image attachments.

use feedgraph_shared::{Enclosure, FetchError, ParsedImage};
use tracing::warn;

use crate::resolver::EnclosureResolver;

/// Declared type recorded on every image enclosure.
pub const IMAGE_FILE_TYPE: &str = "image";

/// Outcome of resolving an optional image.
///
/// A failed fetch never surfaces as an error: the image is dropped and the
/// failure is returned as a warning for the caller to record.
#[derive(Debug, Default)]
pub struct ImageResolution {
    pub image: Option<Enclosure>,
    pub warning: Option<FetchError>,
}

/// Resolves image descriptors through a run's [`EnclosureResolver`].
pub struct ImageResolver<'a> {
    resolver: &'a EnclosureResolver,
}

impl<'a> ImageResolver<'a> {
    pub fn new(resolver: &'a EnclosureResolver) -> Self {
        Self { resolver }
    }

    pub async fn resolve(&self, image: Option<&ParsedImage>) -> ImageResolution {
        let Some(image) = usable(image) else {
            return ImageResolution::default();
        };

        match self.resolver.resolve(&image.url, IMAGE_FILE_TYPE).await {
            Ok(enclosure) => ImageResolution {
                image: Some(enclosure.with_title(image.title.clone())),
                warning: None,
            },
            Err(error) => {
                warn!(url = %image.url, cause = %error.cause, "image fetch failed, dropping image");
                ImageResolution {
                    image: None,
                    warning: Some(error),
                }
            }
        }
    }

    /// Metadata-only image enclosure.
    pub fn resolve_light(image: Option<&ParsedImage>) -> Option<Enclosure> {
        usable(image).map(|image| {
            EnclosureResolver::resolve_light(&image.url, IMAGE_FILE_TYPE)
                .with_title(image.title.clone())
        })
    }
}

fn usable(image: Option<&ParsedImage>) -> Option<&ParsedImage> {
    image.filter(|image| !image.url.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use feedgraph_shared::IngestConfig;
    use feedgraph_store::MemoryStore;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn resolver(store: Arc<MemoryStore>) -> EnclosureResolver {
        let config = IngestConfig {
            allow_private_hosts: true,
            fetch_timeout: Duration::from_secs(5),
            ..IngestConfig::default()
        };
        EnclosureResolver::new(store, &config).unwrap()
    }

    #[tokio::test]
    async fn absent_or_blank_image_is_none() {
        let store = Arc::new(MemoryStore::new());
        let resolver = resolver(store.clone());
        let images = ImageResolver::new(&resolver);

        let none = images.resolve(None).await;
        assert!(none.image.is_none() && none.warning.is_none());

        let blank = ParsedImage {
            url: "   ".into(),
            title: Some("Cover".into()),
        };
        let blank = images.resolve(Some(&blank)).await;
        assert!(blank.image.is_none() && blank.warning.is_none());
        assert_eq!(store.blob_writes(), 0);
    }

    #[tokio::test]
    async fn resolved_image_carries_title() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cover.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"jpeg".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryStore::new());
        let resolver = resolver(store.clone());
        let descriptor = ParsedImage {
            url: format!("{}/cover.jpg", server.uri()),
            title: Some("Example Cast".into()),
        };

        let resolution = ImageResolver::new(&resolver).resolve(Some(&descriptor)).await;
        let image = resolution.image.unwrap();
        assert!(resolution.warning.is_none());
        assert!(image.is_resolved());
        assert_eq!(image.file_type(), IMAGE_FILE_TYPE);
        assert_eq!(image.title(), Some("Example Cast"));
    }

    #[tokio::test]
    async fn failed_image_is_dropped_with_warning() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing.png"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let store = Arc::new(MemoryStore::new());
        let resolver = resolver(store.clone());
        let descriptor = ParsedImage {
            url: format!("{}/missing.png", server.uri()),
            title: None,
        };

        let resolution = ImageResolver::new(&resolver).resolve(Some(&descriptor)).await;
        assert!(resolution.image.is_none());
        let warning = resolution.warning.unwrap();
        assert_eq!(warning.url, descriptor.url);
        assert!(warning.cause.contains("404"));
    }

    #[test]
    fn light_image_has_no_content_id() {
        let descriptor = ParsedImage {
            url: "http://x/cover.jpg".into(),
            title: Some("Cover".into()),
        };
        let image = ImageResolver::resolve_light(Some(&descriptor)).unwrap();
        assert!(!image.is_resolved());
        assert_eq!(image.title(), Some("Cover"));
        assert!(ImageResolver::resolve_light(None).is_none());
    }
}
