//! Core pipeline and domain logic for feedgraph.
//!
//! This crate turns a parsed feed into a content-addressed document graph
//! (feed → items → enclosures) and publishes it as a single root id:
//! - [`identity`]: stable feed identities
//! - [`resolver`]: fetch-and-store for enclosures, with per-run deduplication
//! - [`image`], [`item`], [`assembler`]: document assembly
//! - [`publisher`]: canonical encoding, publish, read-back, schema
//! - [`pipeline`]: the end-to-end `ingest` and `preview` workflows

pub mod assembler;
pub mod identity;
pub mod image;
pub mod item;
pub mod pipeline;
pub mod publisher;
pub mod resolver;

pub use assembler::FeedAssembler;
pub use image::{ImageResolution, ImageResolver};
pub use item::ItemAssembler;
pub use pipeline::{IngestResult, ProgressReporter, SilentProgress, ingest, preview};
pub use publisher::{GraphPublisher, document_schema, read_document};
pub use resolver::{EnclosureResolver, FetchResult};
