//! Conversion from `feed-rs` models into [`ParsedFeed`].
//!
//! RSS, Atom and JSON Feed payloads all go through `feed_rs::parser`, then
//! get flattened into the format-neutral source model.

use std::collections::BTreeMap;

use feed_rs::model::{Entry, Feed, Image, Link, MediaObject, Text};
use feedgraph_shared::{
    FeedMeta, ParsedEnclosure, ParsedEntry, ParsedFeed, ParsedImage, Person,
};
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum FeedParseError {
    #[error("feed payload is empty")]
    EmptyPayload,
    #[error("feed parse error: {0}")]
    Syntax(#[from] feed_rs::parser::ParseFeedError),
}

/// Parse a raw feed payload fetched from `fetch_url`.
///
/// `fetch_url` becomes the feed's canonical link when the payload does not
/// declare a `rel="self"` link of its own.
pub fn parse_feed_bytes(raw: &[u8], fetch_url: &str) -> Result<ParsedFeed, FeedParseError> {
    let trimmed = trim_leading_ascii_whitespace(raw);
    if trimmed.is_empty() {
        return Err(FeedParseError::EmptyPayload);
    }
    let feed = feed_rs::parser::Builder::new()
        .id_generator(stable_id)
        .build()
        .parse(trimmed)?;
    Ok(convert_feed(feed, fetch_url))
}

/// Id for feeds and entries that declare none.
///
/// feed-rs falls back to a random UUID when there is neither a link nor a
/// title to hash; the id is left empty instead so that the same payload always
/// parses to the same model.
fn stable_id(links: &[Link], title: &Option<Text>, uri: Option<&str>) -> String {
    if links.is_empty() && (uri.is_none() || title.is_none()) {
        return String::new();
    }
    feed_rs::parser::generate_id(links, title, uri)
}

fn convert_feed(feed: Feed, fetch_url: &str) -> ParsedFeed {
    let feed_link = self_link(&feed.links)
        .map(|link| link.href.clone())
        .unwrap_or_else(|| fetch_url.to_string());
    let link = feed
        .links
        .iter()
        .find(|link| link.rel.as_deref() != Some("self"))
        .map(|link| link.href.clone());
    let image = feed
        .logo
        .as_ref()
        .or(feed.icon.as_ref())
        .and_then(image_from_model);

    let mut extensions = BTreeMap::new();
    if !feed.id.trim().is_empty() {
        extensions.insert("id".to_string(), Value::String(feed.id.clone()));
    }
    if let Some(ttl) = feed.ttl {
        extensions.insert("ttl".to_string(), Value::from(ttl));
    }

    let meta = FeedMeta {
        title: text_content(feed.title.as_ref()).unwrap_or_default(),
        description: text_content(feed.description.as_ref()),
        link,
        feed_link,
        updated: feed.updated,
        published: feed.published,
        authors: feed.authors.iter().map(person_from_model).collect(),
        language: feed.language.clone(),
        image,
        copyright: text_content(feed.rights.as_ref()),
        generator: feed.generator.as_ref().map(|g| g.content.clone()),
        categories: feed.categories.iter().map(|c| c.term.clone()).collect(),
        feed_type: format!("{:?}", feed.feed_type).to_lowercase(),
        extensions,
    };

    let entries = feed.entries.iter().map(entry_from_model).collect();

    ParsedFeed { meta, entries }
}

fn entry_from_model(entry: &Entry) -> ParsedEntry {
    let link = entry
        .links
        .iter()
        .find(|link| !matches!(link.rel.as_deref(), Some("enclosure") | Some("self")))
        .map(|link| link.href.clone());

    let mut enclosures: Vec<ParsedEnclosure> =
        entry.media.iter().flat_map(enclosures_from_media).collect();
    if enclosures.is_empty() {
        // Atom declares attachments as rel="enclosure" links.
        enclosures = entry
            .links
            .iter()
            .filter(|link| link.rel.as_deref() == Some("enclosure"))
            .map(|link| ParsedEnclosure {
                url: link.href.clone(),
                media_type: link.media_type.clone().unwrap_or_default(),
                length: link.length,
            })
            .collect();
    }

    let image = entry
        .media
        .iter()
        .flat_map(|media| media.thumbnails.iter())
        .find_map(|thumbnail| image_from_model(&thumbnail.image));

    let mut extensions = BTreeMap::new();
    if let Some(source) = &entry.source {
        extensions.insert("source".to_string(), Value::String(source.clone()));
    }
    if let Some(rights) = text_content(entry.rights.as_ref()) {
        extensions.insert("rights".to_string(), Value::String(rights));
    }
    if let Some(language) = &entry.language {
        extensions.insert("language".to_string(), Value::String(language.clone()));
    }
    if let Some(duration) = entry.media.iter().find_map(|media| media.duration) {
        extensions.insert("durationSecs".to_string(), Value::from(duration.as_secs()));
    }

    ParsedEntry {
        id: entry.id.clone(),
        title: text_content(entry.title.as_ref()).unwrap_or_default(),
        link,
        description: text_content(entry.summary.as_ref()),
        content: entry.content.as_ref().and_then(|content| content.body.clone()),
        published: entry.published,
        updated: entry.updated,
        authors: entry.authors.iter().map(person_from_model).collect(),
        categories: entry.categories.iter().map(|c| c.term.clone()).collect(),
        enclosures,
        image,
        extensions,
    }
}

fn enclosures_from_media(media: &MediaObject) -> Vec<ParsedEnclosure> {
    media
        .content
        .iter()
        .filter_map(|content| {
            let url = content.url.as_ref()?.to_string();
            Some(ParsedEnclosure {
                url,
                media_type: content
                    .content_type
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_default(),
                length: content.size,
            })
        })
        .collect()
}

fn self_link(links: &[Link]) -> Option<&Link> {
    links.iter().find(|link| link.rel.as_deref() == Some("self"))
}

fn image_from_model(image: &Image) -> Option<ParsedImage> {
    if image.uri.trim().is_empty() {
        return None;
    }
    Some(ParsedImage {
        url: image.uri.clone(),
        title: image.title.clone(),
    })
}

fn person_from_model(person: &feed_rs::model::Person) -> Person {
    Person {
        name: person.name.clone(),
        email: person.email.clone(),
        uri: person.uri.clone(),
    }
}

fn text_content(text: Option<&Text>) -> Option<String> {
    text.map(|t| t.content.trim().to_string())
        .filter(|content| !content.is_empty())
}

fn trim_leading_ascii_whitespace(raw: &[u8]) -> &[u8] {
    let start = raw
        .iter()
        .position(|byte| !byte.is_ascii_whitespace())
        .unwrap_or(raw.len());
    &raw[start..]
}
