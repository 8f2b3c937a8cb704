//! Stable feed identities.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use feedgraph_shared::FeedIdentity;
use sha2::{Digest, Sha256};

/// Derive the identity of the feed published at `url`.
///
/// SHA-256 of the URL bytes, URL-safe base64 without padding. Total over all
/// inputs, including the empty string.
pub fn derive(url: &str) -> FeedIdentity {
    let digest = Sha256::digest(url.as_bytes());
    FeedIdentity::from_encoded(URL_SAFE_NO_PAD.encode(digest))
}
