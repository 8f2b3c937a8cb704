//! Shared types, error model, and configuration for feedgraph.
//!
//! This crate is the foundation depended on by all other feedgraph crates.
//! It provides:
//! - [`FeedGraphError`]: the unified error type, plus the per-enclosure [`FetchError`]
//! - Source types ([`ParsedFeed`], [`ParsedEntry`]) as delivered by a feed source
//! - Document types ([`FeedDocument`], [`Item`], [`Enclosure`], [`ContentId`], [`FeedIdentity`])
//! - Configuration ([`AppConfig`], [`IngestConfig`], config loading)

pub mod config;
pub mod error;
pub mod source;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DefaultsConfig, FetchPolicyConfig, IngestConfig, StoreConfig, config_dir,
    config_file_path, init_config, load_config, load_config_from,
};
pub use error::{FeedGraphError, FetchError, Result};
pub use source::{FeedMeta, ParsedEnclosure, ParsedEntry, ParsedFeed, ParsedImage, Person};
pub use types::{
    AttachmentRole, CURRENT_SCHEMA_VERSION, ContentId, Diagnostic, Enclosure, FeedDocument,
    FeedIdentity, Item, RunId,
};
